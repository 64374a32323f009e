//! Output formatters for the CLI.
//!
//! Supports pretty (one `name: value` per line) and JSON output formats.

use std::net::Ipv4Addr;

use serde::Serialize;

use crate::probe::{FieldSet, ModuleDescriptor};

/// Outcome of replaying one captured packet through a module.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedPacket {
    pub src: Ipv4Addr,
    /// Whether the validator let the packet through.
    pub accepted: bool,
    pub fields: FieldSet,
}

/// Format any serializable value as pretty JSON.
pub fn format_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"serialization failed: {e}\"}}"))
}

/// `name: value` per field, in insertion order.
pub fn format_fields_pretty(fs: &FieldSet) -> String {
    let mut out = String::new();
    for (name, value) in fs.iter() {
        out.push_str(&format!("{name}: {value}\n"));
    }
    out
}

/// Descriptor summary followed by the field table.
pub fn format_descriptor_pretty(desc: &ModuleDescriptor) -> String {
    let mut out = String::new();
    out.push_str(&format!("Probe module {}\n", desc.name));
    out.push_str(&format!("{}\n\n", desc.helptext));
    out.push_str(&format!("packet length: {}\n", desc.packet_length));
    out.push_str(&format!("pcap filter:   {}\n", desc.pcap_filter));
    out.push_str(&format!("pcap snaplen:  {}\n", desc.pcap_snaplen));
    out.push_str(&format!("port args:     {}\n", desc.port_args));
    out.push('\n');

    out.push_str(&format!("{:<16}{:<8}{}\n", "FIELD", "TYPE", "DESCRIPTION"));
    for field in desc.fields {
        out.push_str(&format!(
            "{:<16}{:<8}{}\n",
            field.name,
            field.kind.to_string(),
            field.desc
        ));
    }
    out
}

/// One block per packet; rejected packets are marked and carry no fields.
pub fn format_classified_pretty(results: &[ClassifiedPacket]) -> String {
    let mut out = String::new();
    for r in results {
        if !r.accepted {
            out.push_str(&format!("{}: dropped\n", r.src));
            continue;
        }
        if r.fields.is_empty() {
            out.push_str(&format!("{}: no classification\n", r.src));
            continue;
        }
        out.push_str(&format!("{}:\n", r.src));
        for line in format_fields_pretty(&r.fields).lines() {
            out.push_str(&format!("  {line}\n"));
        }
    }

    let accepted = results.iter().filter(|r| r.accepted).count();
    out.push_str(&format!(
        "\n{} packets, {accepted} accepted, {} dropped\n",
        results.len(),
        results.len() - accepted
    ));
    out
}

/// 16 bytes per line, prefixed with the hex offset.
pub fn format_hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3 + bytes.len() / 16 * 8);
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        out.push_str(&format!("{:04x}  {}\n", i * 16, hex.join(" ")));
    }
    out
}
