//! QUIC Initial probe module.
//!
//! Sends a 1200-byte IETF QUIC Initial carrying a reserved version so any
//! compliant server answers with version negotiation. No per-target state is
//! kept: replies are correlated by source port and by the constant
//! connection ID echoed back, and each source address is processed at most
//! once per run (first response wins).

use std::fmt::Write as _;
use std::io::Write;
use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::error::ProbeError;
use crate::packet::quic::{
    ConnectionId, QuicLongHeader, ResponseHeader, VersionTag, QUIC_PACKET_LENGTH,
};
use crate::packet::{
    format_eth_header, format_ip_header, format_udp_header, get_src_port, ip_checksum,
    ip_header_len, ip_protocol, make_eth_header, make_ip_header, make_udp_header, MacAddr,
    Validation, ETH_HDR_LEN, IPPROTO_UDP, IP_HDR_LEN, UDP_HDR_LEN,
};
use crate::ScanConfig;

use super::dedup::{PagedBitmap, SourceSet};
use super::fieldset::FieldSet;
use super::{FieldDef, FieldKind, ModuleDescriptor, ProbeModule};

pub const MODULE_NAME: &str = "quic_initial";

/// Full frame size: Ethernet + IPv4 + UDP + padded QUIC payload.
pub const FRAME_LEN: usize = ETH_HDR_LEN + IP_HDR_LEN + UDP_HDR_LEN + QUIC_PACKET_LENGTH;

const IP_OFFSET: usize = ETH_HDR_LEN;
const UDP_OFFSET: usize = IP_OFFSET + IP_HDR_LEN;
const PAYLOAD_OFFSET: usize = UDP_OFFSET + UDP_HDR_LEN;

/// Snaplen used before the real payload size is known.
const DEFAULT_SNAPLEN: usize = 1500;

/// Replies this large are never version negotiation (our own Initial is 1200).
const VERSION_NEGOTIATION_MAX_LEN: usize = QUIC_PACKET_LENGTH;

pub static FIELDS: [FieldDef; 4] = [
    FieldDef {
        name: "classification",
        kind: FieldKind::String,
        desc: "packet classification",
    },
    FieldDef {
        name: "success",
        kind: FieldKind::Int,
        desc: "is response considered success",
    },
    FieldDef {
        name: "versions",
        kind: FieldKind::String,
        desc: "versions if reported",
    },
    FieldDef {
        name: "info",
        kind: FieldKind::String,
        desc: "info",
    },
];

/// Values fixed at global initialisation and read by every thread after.
struct GlobalState {
    target_port: u16,
    source_port_first: u16,
    num_ports: u32,
    connection_id: ConnectionId,
    seen: Arc<dyn SourceSet>,
}

/// The `quic_initial` probe module.
pub struct QuicInitialModule {
    descriptor: ModuleDescriptor,
    injected: Option<Arc<dyn SourceSet>>,
    state: Option<GlobalState>,
}

impl QuicInitialModule {
    /// Uninitialised module; `global_initialize` allocates a [`PagedBitmap`].
    pub fn new() -> Self {
        Self {
            descriptor: ModuleDescriptor {
                name: MODULE_NAME,
                packet_length: FRAME_LEN,
                pcap_filter: "udp".to_string(),
                pcap_snaplen: DEFAULT_SNAPLEN,
                port_args: true,
                helptext: "Probe module that sends QUIC Initial packets to hosts.",
                fields: &FIELDS,
            },
            injected: None,
            state: None,
        }
    }

    /// Uninitialised module that will deduplicate through `seen`.
    pub fn with_source_set(seen: Arc<dyn SourceSet>) -> Self {
        Self {
            injected: Some(seen),
            ..Self::new()
        }
    }

    /// Connection ID carried by this run's probes, once initialised.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.state.as_ref().map(|s| s.connection_id)
    }

    /// The dedup set in use, once initialised.
    pub fn source_set(&self) -> Option<&Arc<dyn SourceSet>> {
        self.state.as_ref().map(|s| &s.seen)
    }

    fn state(&self) -> &GlobalState {
        match &self.state {
            Some(state) => state,
            None => panic!("{MODULE_NAME}: used before global_initialize"),
        }
    }
}

impl Default for QuicInitialModule {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeModule for QuicInitialModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn global_initialize(&mut self, config: &ScanConfig) -> Result<(), ProbeError> {
        config.validate()?;
        let num_ports = config.num_ports();

        // Answers come back from the target port
        self.descriptor.pcap_filter = format!("udp src port {}", config.target_port);
        self.descriptor.pcap_snaplen = FRAME_LEN;
        self.descriptor.packet_length = FRAME_LEN;

        let seen: Arc<dyn SourceSet> = match &self.injected {
            Some(set) => Arc::clone(set),
            None => Arc::new(PagedBitmap::new()),
        };

        let connection_id = ConnectionId::scanning();
        tracing::debug!(
            filter = %self.descriptor.pcap_filter,
            snaplen = self.descriptor.pcap_snaplen,
            num_ports,
            connection_id = %connection_id,
            "quic_initial initialised"
        );

        self.state = Some(GlobalState {
            target_port: config.target_port,
            source_port_first: config.source_port_first,
            num_ports,
            connection_id,
            seen,
        });
        Ok(())
    }

    fn thread_initialize(
        &self,
        buf: &mut [u8],
        src_mac: &MacAddr,
        gw_mac: &MacAddr,
    ) -> Result<(), ProbeError> {
        assert!(
            buf.len() >= FRAME_LEN,
            "frame buffer too small: {} < {FRAME_LEN}",
            buf.len()
        );
        let state = self.state.as_ref().ok_or(ProbeError::NotInitialized)?;

        buf.fill(0);
        make_eth_header(&mut buf[..IP_OFFSET], src_mac, gw_mac);
        make_ip_header(
            &mut buf[IP_OFFSET..UDP_OFFSET],
            IPPROTO_UDP,
            (IP_HDR_LEN + UDP_HDR_LEN + QUIC_PACKET_LENGTH) as u16,
        );
        make_udp_header(
            &mut buf[UDP_OFFSET..PAYLOAD_OFFSET],
            state.target_port,
            (UDP_HDR_LEN + QUIC_PACKET_LENGTH) as u16,
        );
        tracing::trace!(frame_len = FRAME_LEN, "quic_initial thread buffer prepared");
        Ok(())
    }

    fn make_packet(
        &self,
        buf: &mut [u8],
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        probe_num: u32,
        validation: &Validation,
    ) -> usize {
        assert!(
            buf.len() >= FRAME_LEN,
            "frame buffer too small: {} < {FRAME_LEN}",
            buf.len()
        );
        let state = self.state();

        let ip = IP_OFFSET;
        buf[ip + 12..ip + 16].copy_from_slice(&src_ip.octets());
        buf[ip + 16..ip + 20].copy_from_slice(&dst_ip.octets());

        let src_port = get_src_port(
            state.source_port_first,
            state.num_ports,
            probe_num,
            validation,
        );
        buf[UDP_OFFSET..UDP_OFFSET + 2].copy_from_slice(&src_port.to_be_bytes());

        let payload = &mut buf[PAYLOAD_OFFSET..FRAME_LEN];
        payload.fill(0); // padding up to 1200 bytes
        QuicLongHeader::initial_probe(state.connection_id).serialize(payload);

        let ip_len = (IP_HDR_LEN + UDP_HDR_LEN + QUIC_PACKET_LENGTH) as u16;
        let udp_len = (UDP_HDR_LEN + QUIC_PACKET_LENGTH) as u16;
        buf[ip + 2..ip + 4].copy_from_slice(&ip_len.to_be_bytes());
        buf[UDP_OFFSET + 4..UDP_OFFSET + 6].copy_from_slice(&udp_len.to_be_bytes());

        buf[ip + 10] = 0;
        buf[ip + 11] = 0;
        let sum = ip_checksum(&buf[ip..UDP_OFFSET]);
        buf[ip + 10..ip + 12].copy_from_slice(&sum.to_be_bytes());

        FRAME_LEN
    }

    fn validate_packet(&self, ip_header: &[u8], capture_len: usize, src_ip: Ipv4Addr) -> bool {
        let ihl = match ip_header_len(ip_header) {
            Some(ihl) if ihl >= IP_HDR_LEN => ihl,
            _ => return false,
        };
        if ihl + UDP_HDR_LEN > capture_len {
            tracing::trace!(capture_len, "drop: too short for UDP header");
            return false;
        }
        if ip_protocol(ip_header) != Some(IPPROTO_UDP) {
            return false;
        }

        // Dedup before any parsing so duplicate floods stay cheap
        let seen = &self.state().seen;
        if seen.contains(src_ip) {
            tracing::trace!(src = %src_ip, "drop: source already answered");
            return false;
        }
        seen.insert(src_ip)
    }

    fn process_packet(&self, payload: &[u8], fs: &mut FieldSet) {
        let Some(hdr) = ResponseHeader::parse(payload) else {
            tracing::trace!(len = payload.len(), "drop: shorter than QUIC common header");
            return;
        };

        if hdr.conn_id == self.state().connection_id {
            fs.add_string("classification", "quic");
            fs.add_uint("success", 1);
        }

        if payload.len() >= VERSION_NEGOTIATION_MAX_LEN {
            return;
        }

        if hdr.has_version_list() {
            let count = hdr.version_count();
            if count == 0 {
                return;
            }
            let mut tags = hdr.versions();
            let first = match tags.next() {
                Some(tag) => tag,
                None => return,
            };
            if first == VersionTag::PROBE {
                // Our own version came back: a UDP echo, not a QUIC server
                fs.modify_string("classification", "udp");
                fs.modify_uint("success", 0);
                return;
            }

            let mut versions = String::with_capacity(count * 10);
            let _ = write!(versions, "{first}");
            for tag in tags {
                let _ = write!(versions, ", {tag}");
            }
            fs.add_string("versions", versions);
        } else if hdr.is_reset() {
            fs.modify_string("info", "RST");
        }
    }

    fn print_packet(&self, out: &mut dyn Write, frame: &[u8]) -> std::io::Result<()> {
        let eth = frame.get(..IP_OFFSET).unwrap_or(&[]);
        let ip = frame.get(IP_OFFSET..UDP_OFFSET).unwrap_or(&[]);
        let udp = frame.get(UDP_OFFSET..PAYLOAD_OFFSET).unwrap_or(&[]);
        writeln!(out, "{}", format_udp_header(udp))?;
        writeln!(out, "{}", format_ip_header(ip))?;
        writeln!(out, "{}", format_eth_header(eth))?;
        writeln!(out, "{}", "-".repeat(54))
    }

    fn cleanup(&mut self) -> Result<(), ProbeError> {
        if let Some(state) = &self.state {
            tracing::info!(sources = state.seen.len(), "quic_initial cleanup");
        }
        Ok(())
    }
}
