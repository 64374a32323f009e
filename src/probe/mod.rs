//! Probe module interface.
//!
//! A probe module owns the protocol-specific parts of a stateless scan:
//! building the frame for each target, cheaply gating received packets, and
//! classifying the ones that pass. The scanner's send and receive threads
//! call into it; the module never schedules work of its own.

pub mod dedup;
pub mod fieldset;
pub mod quic_initial;

use std::io::Write;
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::error::ProbeError;
use crate::packet::{MacAddr, Validation};
use crate::ScanConfig;

pub use dedup::{PagedBitmap, SourceSet};
pub use fieldset::{FieldSet, FieldValue};
pub use quic_initial::QuicInitialModule;

/// Type of an output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Int,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Int => write!(f, "int"),
        }
    }
}

/// Schema entry for one output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub desc: &'static str,
}

/// Metadata the scanner reads to drive a module.
///
/// `packet_length`, `pcap_filter` and `pcap_snaplen` hold generic defaults
/// until `global_initialize` replaces them with values derived from the
/// scan configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDescriptor {
    pub name: &'static str,
    pub packet_length: usize,
    pub pcap_filter: String,
    pub pcap_snaplen: usize,
    /// Whether the module takes a target port.
    pub port_args: bool,
    pub helptext: &'static str,
    pub fields: &'static [FieldDef],
}

/// Lifecycle and per-packet callbacks of a probe module.
///
/// Setup (`global_initialize`, `cleanup`) runs single-threaded. The
/// per-packet methods take `&self` and may be called from several threads
/// at once; each sending thread owns its frame buffer.
pub trait ProbeModule: Send + Sync {
    /// Current metadata (final only after `global_initialize`).
    fn descriptor(&self) -> &ModuleDescriptor;

    /// Process-wide setup from the scan configuration.
    fn global_initialize(&mut self, config: &ScanConfig) -> Result<(), ProbeError>;

    /// Zero `buf` and write the per-thread constant headers.
    fn thread_initialize(
        &self,
        buf: &mut [u8],
        src_mac: &MacAddr,
        gw_mac: &MacAddr,
    ) -> Result<(), ProbeError>;

    /// Fill in the per-probe fields; returns the frame length to transmit.
    fn make_packet(
        &self,
        buf: &mut [u8],
        src_ip: Ipv4Addr,
        dst_ip: Ipv4Addr,
        probe_num: u32,
        validation: &Validation,
    ) -> usize;

    /// Cheap structural gate run before `process_packet`.
    fn validate_packet(&self, ip_header: &[u8], capture_len: usize, src_ip: Ipv4Addr) -> bool;

    /// Classify a validated UDP payload into `fs`.
    fn process_packet(&self, payload: &[u8], fs: &mut FieldSet);

    /// Human-readable dump of a frame built by `make_packet`.
    fn print_packet(&self, out: &mut dyn Write, frame: &[u8]) -> std::io::Result<()>;

    /// Process-wide teardown.
    fn cleanup(&mut self) -> Result<(), ProbeError>;
}

/// Names accepted by [`module_by_name`].
pub fn module_names() -> &'static [&'static str] {
    &[quic_initial::MODULE_NAME]
}

/// Construct an uninitialised module by name.
pub fn module_by_name(name: &str) -> Result<Box<dyn ProbeModule>, ProbeError> {
    match name {
        quic_initial::MODULE_NAME => Ok(Box::new(QuicInitialModule::new())),
        other => Err(ProbeError::UnknownModule(other.to_string())),
    }
}
