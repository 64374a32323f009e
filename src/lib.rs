//! quic-scan: stateless QUIC Initial probe module for raw-packet scanners.
//!
//! Builds fully-formed Ethernet/IPv4/UDP frames carrying a padded QUIC
//! Initial with a reserved version, filters captured replies and classifies
//! them as QUIC servers, UDP echoes or resets. Usable as a library by a
//! scanner's send/receive threads or via the `quic-scan` CLI.

pub mod cli;
pub mod error;
pub mod packet;
pub mod probe;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use error::ProbeError;
pub use packet::{parse_mac_str, MacAddr, Validation};
pub use probe::{
    module_by_name, module_names, FieldSet, FieldValue, ModuleDescriptor, PagedBitmap,
    ProbeModule, QuicInitialModule, SourceSet,
};

// ─────────────────────────────────────────────────────────────────────────────
// Scan configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Scan-wide settings a probe module reads at global initialisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// UDP destination port probed on every target.
    pub target_port: u16,
    /// First source port (inclusive) handed out by `get_src_port`.
    pub source_port_first: u16,
    /// Last source port (inclusive).
    pub source_port_last: u16,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            target_port: 443,
            source_port_first: 32768,
            source_port_last: 61000,
        }
    }
}

impl ScanConfig {
    /// Size of the source port range. Only meaningful after [`validate`](Self::validate).
    pub fn num_ports(&self) -> u32 {
        (self.source_port_last as u32 + 1).saturating_sub(self.source_port_first as u32)
    }

    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.source_port_last < self.source_port_first {
            return Err(ProbeError::InvalidPortRange {
                first: self.source_port_first,
                last: self.source_port_last,
            });
        }
        Ok(())
    }

    /// Parse and validate a JSON config; missing keys take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ProbeError> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| ProbeError::Config(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ProbeError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProbeError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_config_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.target_port, 443);
        assert_eq!(config.num_ports(), 61000 - 32768 + 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scan_config_single_port_range() {
        let config = ScanConfig {
            source_port_first: 50000,
            source_port_last: 50000,
            ..ScanConfig::default()
        };
        assert_eq!(config.num_ports(), 1);
    }

    #[test]
    fn test_scan_config_full_port_range() {
        let config = ScanConfig {
            source_port_first: 0,
            source_port_last: 65535,
            ..ScanConfig::default()
        };
        assert_eq!(config.num_ports(), 65536);
    }

    #[test]
    fn test_scan_config_rejects_inverted_range() {
        let config = ScanConfig {
            source_port_first: 2,
            source_port_last: 1,
            ..ScanConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ProbeError::InvalidPortRange { first: 2, last: 1 })
        ));
    }

    #[test]
    fn test_scan_config_from_json_partial() {
        let config = ScanConfig::from_json_str(r#"{"target_port": 8443}"#).unwrap();
        assert_eq!(config.target_port, 8443);
        assert_eq!(config.source_port_first, 32768, "missing keys default");
    }

    #[test]
    fn test_scan_config_from_json_errors() {
        assert!(matches!(
            ScanConfig::from_json_str("{not json"),
            Err(ProbeError::Config(_))
        ));
        assert!(matches!(
            ScanConfig::from_json_str(r#"{"source_port_first": 9, "source_port_last": 8}"#),
            Err(ProbeError::InvalidPortRange { .. })
        ));
    }

    #[test]
    fn test_scan_config_from_missing_file() {
        let err = ScanConfig::from_json_file(Path::new("/nonexistent/quic-scan.json")).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
