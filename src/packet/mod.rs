//! Raw frame templating helpers shared by probe modules.
//!
//! Byte-level Ethernet / IPv4 / UDP header construction, the IPv4 header
//! checksum, stateless source-port selection and the one-line header
//! printers used by `print_packet`. All multi-byte header fields are written
//! big-endian (network order) at fixed offsets; nothing here relies on
//! struct memory layout.

pub mod quic;

use std::net::Ipv4Addr;

use crate::error::ProbeError;

/// Ethernet II header length (dst MAC + src MAC + ethertype).
pub const ETH_HDR_LEN: usize = 14;
/// IPv4 header length without options (IHL = 5).
pub const IP_HDR_LEN: usize = 20;
/// UDP header length.
pub const UDP_HDR_LEN: usize = 8;
/// Size of the per-thread frame buffer handed to `thread_initialize`.
pub const MAX_PACKET_SIZE: usize = 4096;

/// IANA protocol number for UDP.
pub const IPPROTO_UDP: u8 = 17;
/// EtherType for IPv4.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// IP ID stamped on every probe.
const IP_ID: u16 = 54321;
/// TTL stamped on every probe.
const IP_TTL: u8 = 255;

/// 48-bit Ethernet hardware address.
pub type MacAddr = [u8; 6];

/// Per-probe validation token produced by the scanner's address generator.
///
/// Only word 1 is consumed here (source port selection); the rest is opaque.
pub type Validation = [u32; 4];

/// Parse a colon-separated MAC address string (e.g. "fe:00:00:00:01:01").
pub fn parse_mac_str(s: &str) -> Result<MacAddr, ProbeError> {
    let s = s.trim();
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return Err(ProbeError::Config(format!("invalid MAC address: '{}'", s)));
    }
    let mut mac = [0u8; 6];
    for (i, p) in parts.iter().enumerate() {
        mac[i] = u8::from_str_radix(p, 16)
            .map_err(|_| ProbeError::Config(format!("invalid MAC octet '{}' in '{}'", p, s)))?;
    }
    Ok(mac)
}

fn format_mac(mac: &[u8]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

// =============================================================================
// Header templating
// =============================================================================

/// Write an Ethernet II header: dst = gateway MAC, src = our MAC, IPv4 type.
pub fn make_eth_header(eth: &mut [u8], src_mac: &MacAddr, gw_mac: &MacAddr) {
    eth[0..6].copy_from_slice(gw_mac);
    eth[6..12].copy_from_slice(src_mac);
    eth[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
}

/// Write a 20-byte IPv4 header with zeroed addresses and checksum.
///
/// Addresses and the checksum are filled per probe by the module.
pub fn make_ip_header(ip: &mut [u8], protocol: u8, total_len: u16) {
    ip[0] = 0x45; // Version=4, IHL=5
    ip[1] = 0; // TOS
    ip[2..4].copy_from_slice(&total_len.to_be_bytes());
    ip[4..6].copy_from_slice(&IP_ID.to_be_bytes());
    ip[6] = 0; // no DF, no fragment offset
    ip[7] = 0;
    ip[8] = IP_TTL;
    ip[9] = protocol;
    ip[10] = 0;
    ip[11] = 0;
}

/// Write a UDP header with the given destination port and length.
///
/// Source port is set per probe; the checksum is left zero (optional on IPv4).
pub fn make_udp_header(udp: &mut [u8], dst_port: u16, len: u16) {
    udp[0] = 0;
    udp[1] = 0;
    udp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    udp[4..6].copy_from_slice(&len.to_be_bytes());
    udp[6] = 0;
    udp[7] = 0;
}

// =============================================================================
// Checksum utilities
// =============================================================================

/// Sum of big-endian 16-bit words with the carries folded back in.
fn fold_words(words: impl Iterator<Item = u16>) -> u16 {
    let mut sum: u32 = words.map(u32::from).sum();
    while sum > 0xFFFF {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Big-endian words of `data`; an odd last byte is the high half of a word.
fn be_words(data: &[u8]) -> impl Iterator<Item = u16> + '_ {
    data.chunks(2).map(|pair| match *pair {
        [hi, lo] => u16::from_be_bytes([hi, lo]),
        [hi] => u16::from_be_bytes([hi, 0]),
        _ => 0,
    })
}

/// RFC 1071 Internet checksum.
fn ones_complement_sum(data: &[u8]) -> u16 {
    !fold_words(be_words(data))
}

/// IPv4 header checksum; the checksum word (bytes 10..12) is skipped.
pub fn ip_checksum(header: &[u8]) -> u16 {
    let words = be_words(header)
        .enumerate()
        .filter(|&(i, _)| i != 5)
        .map(|(_, w)| w);
    !fold_words(words)
}

/// Whether an IPv4 header (checksum field included) sums to 0xFFFF.
pub fn verify_ip_checksum(header: &[u8]) -> bool {
    let ihl = match header.first() {
        Some(b) => ((b & 0x0F) as usize) * 4,
        None => return false,
    };
    if ihl < IP_HDR_LEN || header.len() < ihl {
        return false;
    }
    ones_complement_sum(&header[..ihl]) == 0
}

// =============================================================================
// Source port selection
// =============================================================================

/// Pick the source port for a probe from the validation token.
///
/// Deterministic in `(num_ports, probe_num, validation)` so receivers can
/// recompute it without remembering what was sent.
pub fn get_src_port(
    source_port_first: u16,
    num_ports: u32,
    probe_num: u32,
    validation: &Validation,
) -> u16 {
    debug_assert!(num_ports > 0, "num_ports must be positive");
    let offset = validation[1].wrapping_add(probe_num) % num_ports.max(1);
    source_port_first.wrapping_add(offset as u16)
}

/// Whether `port` is a source port one of the first `probes` probes to a
/// target could have been sent from.
///
/// The window starts at `validation[1] mod num_ports` and wraps at the end
/// of the range, mirroring `get_src_port` for `probe_num` in `0..probes`.
pub fn check_dst_port(
    port: u16,
    source_port_first: u16,
    num_ports: u32,
    probes: u32,
    validation: &Validation,
) -> bool {
    if num_ports == 0 || port < source_port_first {
        return false;
    }
    let to_validate = (port - source_port_first) as u32;
    if to_validate >= num_ports {
        return false;
    }
    let min = validation[1] % num_ports;
    // distance from the window start, going forward with wraparound
    let distance = (to_validate + num_ports - min) % num_ports;
    distance < probes.min(num_ports)
}

// =============================================================================
// Receive-side accessors
// =============================================================================

/// IPv4 header length in bytes from the IHL nibble, or `None` if absent.
pub fn ip_header_len(ip: &[u8]) -> Option<usize> {
    ip.first().map(|b| ((b & 0x0F) as usize) * 4)
}

/// Protocol byte of an IPv4 header.
pub fn ip_protocol(ip: &[u8]) -> Option<u8> {
    ip.get(9).copied()
}

/// Source address of an IPv4 header.
pub fn ip_source(ip: &[u8]) -> Option<Ipv4Addr> {
    let b = ip.get(12..16)?;
    Some(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
}

/// UDP payload of a captured IPv4 packet, bounded by the captured length.
///
/// Honours IHL options. When the UDP length field claims more than was
/// captured, the payload is truncated to what is actually present.
pub fn udp_payload(ip: &[u8]) -> Option<&[u8]> {
    let ihl = ip_header_len(ip)?;
    if ihl < IP_HDR_LEN || ip.len() < ihl + UDP_HDR_LEN {
        return None;
    }
    let udp = &ip[ihl..];
    let claimed = u16::from_be_bytes([udp[4], udp[5]]) as usize;
    if claimed < UDP_HDR_LEN {
        return None;
    }
    let end = claimed.min(udp.len());
    Some(&udp[UDP_HDR_LEN..end])
}

// =============================================================================
// Header printers
// =============================================================================

/// `udp { source: S | dest: D | checksum: 0xXXXX }`
pub fn format_udp_header(udp: &[u8]) -> String {
    if udp.len() < UDP_HDR_LEN {
        return "udp { truncated }".to_string();
    }
    format!(
        "udp {{ source: {} | dest: {} | checksum: {:#06X} }}",
        u16::from_be_bytes([udp[0], udp[1]]),
        u16::from_be_bytes([udp[2], udp[3]]),
        u16::from_be_bytes([udp[6], udp[7]]),
    )
}

/// `ip { saddr: A | daddr: B | checksum: 0xXXXX }`
pub fn format_ip_header(ip: &[u8]) -> String {
    if ip.len() < IP_HDR_LEN {
        return "ip { truncated }".to_string();
    }
    format!(
        "ip {{ saddr: {} | daddr: {} | checksum: {:#06X} }}",
        Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]),
        Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]),
        u16::from_be_bytes([ip[10], ip[11]]),
    )
}

/// `eth { shost: aa:bb:cc:dd:ee:ff | dhost: .. }`
pub fn format_eth_header(eth: &[u8]) -> String {
    if eth.len() < ETH_HDR_LEN {
        return "eth { truncated }".to_string();
    }
    format!(
        "eth {{ shost: {} | dhost: {} }}",
        format_mac(&eth[6..12]),
        format_mac(&eth[0..6]),
    )
}
