//! QUIC wire formats used by the Initial probe.
//!
//! Send side: the fixed 22-byte long header placed at the start of a
//! 1200-byte, zero-padded UDP payload.
//!
//! ```text
//! offset  size  field
//!      0     1  header_flags        form=1 | fixed=1 | type=Initial | reserved=00 | pn_len=01
//!      1     4  version             0x1a1a1a1a (big-endian)
//!      5     1  dst_conn_id_length  8
//!      6     8  dst_conn_id         "SCANNING"
//!     14     1  src_conn_id_length  0
//!     15     1  token_length        0
//!     16     2  length              2-byte varint (0b01 prefix), bytes after this field
//!     18     4  packet_number       0 (big-endian)
//! ```
//!
//! Receive side: the common response header `flags(1) | connection_id(8)`
//! optionally followed by a list of 4-byte version tags. Tags are opaque and
//! compared byte-for-byte in received order.

use std::fmt;

/// Minimum UDP payload size of a client Initial (anti-amplification padding).
pub const QUIC_PACKET_LENGTH: usize = 1200;

/// Reserved version pattern (`0x?a?a?a?a`) that forces version negotiation.
pub const QUIC_VERSION_FORCE_NEGOTIATION: u32 = 0x1a1a_1a1a;

pub const HEADER_FLAG_FORM_LONG_HEADER: u8 = 0x80;
pub const HEADER_FLAG_FIXED_BIT: u8 = 0x40;
pub const HEADER_FLAG_TYPE_INITIAL: u8 = 0x00;
pub const HEADER_FLAG_RESERVED_BITS: u8 = 0x00;
/// Packet number length bits; fixed so the unprotected nibble is predictable.
pub const HEADER_FLAG_PACKET_NUMBER_LENGTH: u8 = 0x01;

/// Length of the synthetic connection ID.
pub const CONNECTION_ID_LEN: usize = 8;

/// Serialized size of [`QuicLongHeader`].
pub const LONG_HEADER_LEN: usize = 22;
const LENGTH_FIELD_OFFSET: usize = 16;
const LENGTH_FIELD_END: usize = 18;

/// Bytes a response needs before any classification is attempted.
pub const COMMON_HEADER_LEN: usize = 1 + CONNECTION_ID_LEN;
/// Response flag: a version list follows the common header.
pub const PUBLIC_FLAG_HAS_VERS: u8 = 0x01;
/// Response flag: the responder reset the connection.
pub const PUBLIC_FLAG_HAS_RST: u8 = 0x02;

const VARINT_2BYTE_PREFIX: u16 = 0x4000;
const VARINT_2BYTE_MAX: u16 = 0x3FFF;

// =============================================================================
// Connection ID
// =============================================================================

/// 8-byte connection ID carried in every probe of a run.
///
/// Built by packing eight bytes little-endian into a `u64`, so the wire
/// bytes read as the original characters in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// The scanner's connection ID: ASCII "SCANNING".
    pub fn scanning() -> Self {
        Self::from_chars(*b"SCANNING")
    }

    /// Pack `bytes[0]` into the low byte through `bytes[7]` into the high byte.
    pub const fn from_chars(bytes: [u8; CONNECTION_ID_LEN]) -> Self {
        Self(
            (bytes[0] as u64)
                | (bytes[1] as u64) << 8
                | (bytes[2] as u64) << 16
                | (bytes[3] as u64) << 24
                | (bytes[4] as u64) << 32
                | (bytes[5] as u64) << 40
                | (bytes[6] as u64) << 48
                | (bytes[7] as u64) << 56,
        )
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Bytes as they appear on the wire.
    pub fn to_wire(&self) -> [u8; CONNECTION_ID_LEN] {
        self.0.to_le_bytes()
    }

    pub fn from_wire(bytes: [u8; CONNECTION_ID_LEN]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.to_wire() {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Version tags
// =============================================================================

/// Opaque 4-byte version tag, kept in received byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionTag(pub [u8; 4]);

impl VersionTag {
    /// The tag our probes advertise; seeing it first in a list means an echo.
    pub const PROBE: VersionTag = VersionTag(QUIC_VERSION_FORCE_NEGOTIATION.to_be_bytes());
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a:02x}{b:02x}{c:02x}{d:02x}")
    }
}

// =============================================================================
// Long header (send side)
// =============================================================================

/// QUIC long header as sent in the Initial probe.
///
/// Header protection is deliberately not applied: the flag nibble and packet
/// number go out in the clear, which is enough to elicit version negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuicLongHeader {
    pub header_flags: u8,
    pub version: u32,
    pub dst_conn_id: ConnectionId,
    pub src_conn_id_length: u8,
    pub token_length: u8,
    /// Bytes following the length field (packet number + payload).
    pub length: u16,
    pub packet_number: u32,
}

impl QuicLongHeader {
    /// Header for a padded Initial probe carrying `conn_id`.
    pub fn initial_probe(conn_id: ConnectionId) -> Self {
        let protected = HEADER_FLAG_RESERVED_BITS | HEADER_FLAG_PACKET_NUMBER_LENGTH;
        let public =
            HEADER_FLAG_FORM_LONG_HEADER | HEADER_FLAG_FIXED_BIT | HEADER_FLAG_TYPE_INITIAL;
        Self {
            header_flags: public | protected,
            version: QUIC_VERSION_FORCE_NEGOTIATION,
            dst_conn_id: conn_id,
            src_conn_id_length: 0,
            token_length: 0,
            length: (QUIC_PACKET_LENGTH - LENGTH_FIELD_END) as u16,
            packet_number: 0,
        }
    }

    /// Write the header into the first [`LONG_HEADER_LEN`] bytes of `buf`.
    ///
    /// Panics if `buf` is shorter than the header or `length` does not fit a
    /// 2-byte varint; both are caller bugs.
    pub fn serialize(&self, buf: &mut [u8]) {
        assert!(
            buf.len() >= LONG_HEADER_LEN,
            "QUIC header buffer too small: {} < {LONG_HEADER_LEN}",
            buf.len()
        );
        assert!(self.length <= VARINT_2BYTE_MAX, "length exceeds 2-byte varint");

        buf[0] = self.header_flags;
        buf[1..5].copy_from_slice(&self.version.to_be_bytes());
        buf[5] = CONNECTION_ID_LEN as u8;
        buf[6..14].copy_from_slice(&self.dst_conn_id.to_wire());
        buf[14] = self.src_conn_id_length;
        buf[15] = self.token_length;
        buf[LENGTH_FIELD_OFFSET..LENGTH_FIELD_END]
            .copy_from_slice(&(VARINT_2BYTE_PREFIX | self.length).to_be_bytes());
        buf[18..22].copy_from_slice(&self.packet_number.to_be_bytes());
    }

    /// Read back a header written by [`serialize`](Self::serialize).
    ///
    /// Returns `None` for short input, a non-long-header form, a connection
    /// ID length other than 8, or a length field that is not a 2-byte varint.
    pub fn deserialize(buf: &[u8]) -> Option<Self> {
        if buf.len() < LONG_HEADER_LEN {
            return None;
        }
        if buf[0] & HEADER_FLAG_FORM_LONG_HEADER == 0 || buf[5] as usize != CONNECTION_ID_LEN {
            return None;
        }
        let raw_len = u16::from_be_bytes([buf[16], buf[17]]);
        if raw_len & 0xC000 != VARINT_2BYTE_PREFIX {
            return None;
        }
        let mut cid = [0u8; CONNECTION_ID_LEN];
        cid.copy_from_slice(&buf[6..14]);
        Some(Self {
            header_flags: buf[0],
            version: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
            dst_conn_id: ConnectionId::from_wire(cid),
            src_conn_id_length: buf[14],
            token_length: buf[15],
            length: raw_len & VARINT_2BYTE_MAX,
            packet_number: u32::from_be_bytes([buf[18], buf[19], buf[20], buf[21]]),
        })
    }
}

// =============================================================================
// Response header (receive side)
// =============================================================================

/// Borrowed view of a response's common header and trailing bytes.
#[derive(Debug, Clone, Copy)]
pub struct ResponseHeader<'a> {
    pub flags: u8,
    pub conn_id: ConnectionId,
    tail: &'a [u8],
}

impl<'a> ResponseHeader<'a> {
    /// `None` when the payload cannot hold the common header.
    pub fn parse(payload: &'a [u8]) -> Option<Self> {
        if payload.len() < COMMON_HEADER_LEN {
            return None;
        }
        let mut cid = [0u8; CONNECTION_ID_LEN];
        cid.copy_from_slice(&payload[1..COMMON_HEADER_LEN]);
        Some(Self {
            flags: payload[0],
            conn_id: ConnectionId::from_wire(cid),
            tail: &payload[COMMON_HEADER_LEN..],
        })
    }

    pub fn has_version_list(&self) -> bool {
        self.flags & PUBLIC_FLAG_HAS_VERS != 0
    }

    pub fn is_reset(&self) -> bool {
        self.flags & PUBLIC_FLAG_HAS_RST != 0
    }

    /// Whole tags available after the header; a trailing partial tag is ignored.
    pub fn version_count(&self) -> usize {
        self.tail.len() / 4
    }

    pub fn versions(&self) -> impl Iterator<Item = VersionTag> + 'a {
        self.tail
            .chunks_exact(4)
            .map(|c| VersionTag([c[0], c[1], c[2], c[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_packs_little_endian() {
        let cid = ConnectionId::scanning();
        assert_eq!(cid.as_u64() & 0xFF, b'S' as u64, "first char in low byte");
        assert_eq!(cid.as_u64() >> 56, b'G' as u64, "last char in high byte");
        assert_eq!(&cid.to_wire(), b"SCANNING");
    }

    #[test]
    fn test_connection_id_wire_roundtrip() {
        let cid = ConnectionId::scanning();
        assert_eq!(ConnectionId::from_wire(cid.to_wire()), cid);
        assert_eq!(cid.to_string(), "5343414e4e494e47");
    }

    #[test]
    fn test_initial_probe_header_flags() {
        let hdr = QuicLongHeader::initial_probe(ConnectionId::scanning());
        assert_eq!(hdr.header_flags & 0x80, 0x80, "long header form");
        assert_eq!(hdr.header_flags & 0x40, 0x40, "fixed bit");
        assert_eq!(hdr.header_flags & 0x30, 0x00, "Initial type");
        assert_eq!(hdr.header_flags & 0x0C, 0x00, "reserved bits clear");
        assert_eq!(hdr.header_flags & 0x03, 0x01, "packet number length bits");
        assert_eq!(hdr.header_flags, 0xC1);
    }

    #[test]
    fn test_serialize_field_offsets() {
        let hdr = QuicLongHeader::initial_probe(ConnectionId::scanning());
        let mut buf = [0xEEu8; LONG_HEADER_LEN];
        hdr.serialize(&mut buf);

        assert_eq!(buf[0], 0xC1);
        assert_eq!(&buf[1..5], &[0x1a, 0x1a, 0x1a, 0x1a]);
        assert_eq!(buf[5], 8);
        assert_eq!(&buf[6..14], b"SCANNING");
        assert_eq!(buf[14], 0, "no source connection ID");
        assert_eq!(buf[15], 0, "no token");
        // 1200 - 18 = 1182 = 0x049E, with 2-byte varint prefix → 0x449E
        assert_eq!(&buf[16..18], &[0x44, 0x9E]);
        assert_eq!(&buf[18..22], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_length_covers_rest_of_packet() {
        let hdr = QuicLongHeader::initial_probe(ConnectionId::scanning());
        assert_eq!(hdr.length as usize + 18, QUIC_PACKET_LENGTH);
    }

    #[test]
    fn test_deserialize_reads_serialized_header() {
        let hdr = QuicLongHeader::initial_probe(ConnectionId::scanning());
        let mut buf = [0u8; QUIC_PACKET_LENGTH];
        hdr.serialize(&mut buf);
        assert_eq!(QuicLongHeader::deserialize(&buf), Some(hdr));
    }

    #[test]
    fn test_deserialize_rejects_short_and_short_form() {
        assert!(QuicLongHeader::deserialize(&[0xC1; 10]).is_none());
        let mut buf = [0u8; LONG_HEADER_LEN];
        QuicLongHeader::initial_probe(ConnectionId::scanning()).serialize(&mut buf);
        buf[0] = 0x40;
        assert!(QuicLongHeader::deserialize(&buf).is_none(), "short header form");
    }

    #[test]
    #[should_panic(expected = "QUIC header buffer too small")]
    fn test_serialize_asserts_buffer_size() {
        let mut buf = [0u8; 8];
        QuicLongHeader::initial_probe(ConnectionId::scanning()).serialize(&mut buf);
    }

    #[test]
    fn test_probe_version_tag_bytes() {
        assert_eq!(VersionTag::PROBE.0, [0x1a; 4]);
        assert_eq!(VersionTag::PROBE.to_string(), "1a1a1a1a");
    }

    #[test]
    fn test_response_header_parse_too_short() {
        assert!(ResponseHeader::parse(&[0x01; COMMON_HEADER_LEN - 1]).is_none());
    }

    #[test]
    fn test_response_header_version_count_floors() {
        let mut payload = vec![PUBLIC_FLAG_HAS_VERS];
        payload.extend_from_slice(b"SCANNING");
        payload.extend_from_slice(&[0xff, 0x00, 0x00, 0x1d]);
        payload.extend_from_slice(&[0x00, 0x00, 0x00]); // partial tag
        let hdr = ResponseHeader::parse(&payload).unwrap();
        assert!(hdr.has_version_list());
        assert!(!hdr.is_reset());
        assert_eq!(hdr.conn_id, ConnectionId::scanning());
        assert_eq!(hdr.version_count(), 1);
        let tags: Vec<VersionTag> = hdr.versions().collect();
        assert_eq!(tags, vec![VersionTag([0xff, 0x00, 0x00, 0x1d])]);
    }
}
