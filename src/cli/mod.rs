//! CLI entrypoint for quic-scan.
//!
//! Exercises a probe module without a live scanner: print its descriptor,
//! build a probe frame offline, or replay captured IPv4 packets through the
//! validator and classifier.

pub mod output;

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::Rng;

use crate::error::ProbeError;
use crate::packet::{ip_source, parse_mac_str, udp_payload, Validation, MAX_PACKET_SIZE};
use crate::probe::{module_by_name, FieldSet, ProbeModule};
use crate::ScanConfig;

pub use output::{
    format_classified_pretty, format_descriptor_pretty, format_hex_dump, format_json,
    ClassifiedPacket,
};

// ─────────────────────────────────────────────────────────────────────────────
// CLI definition
// ─────────────────────────────────────────────────────────────────────────────

/// quic-scan: stateless QUIC Initial probe for raw-packet scanners.
#[derive(Parser, Debug)]
#[command(name = "quic-scan", version, about)]
#[command(
    long_about = "quic-scan builds padded QUIC Initial probes with a reserved version \
    to force version negotiation, and classifies captured replies as QUIC servers, \
    UDP echoes or resets. Frames are built and classified offline; nothing is sent."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a module's descriptor and output fields
    Describe(DescribeArgs),
    /// Build one probe frame and dump it
    Build(BuildArgs),
    /// Validate and classify captured IPv4 packets (hex)
    Classify(ClassifyArgs),
}

/// Scan configuration flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// JSON config file; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Destination UDP port probed on targets
    #[arg(long)]
    pub target_port: Option<u16>,
    /// First source port (inclusive)
    #[arg(long)]
    pub source_port_first: Option<u16>,
    /// Last source port (inclusive)
    #[arg(long)]
    pub source_port_last: Option<u16>,
}

/// Arguments for the `describe` subcommand.
#[derive(Args, Debug)]
pub struct DescribeArgs {
    /// Probe module name
    #[arg(long, default_value = "quic_initial")]
    pub module: String,
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Output format
    #[arg(long, default_value = "pretty", value_enum)]
    pub output: OutputFmt,
}

/// Arguments for the `build` subcommand.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Source IPv4 address
    #[arg(long)]
    pub src: Ipv4Addr,
    /// Destination IPv4 address
    #[arg(long)]
    pub dst: Ipv4Addr,
    /// Probe index (selects the source port together with the validation token)
    #[arg(long, default_value = "0")]
    pub probe: u32,
    /// Source MAC address
    #[arg(long, default_value = "02:00:00:00:00:01")]
    pub src_mac: String,
    /// Gateway MAC address
    #[arg(long, default_value = "02:00:00:00:00:fe")]
    pub gw_mac: String,
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Arguments for the `classify` subcommand.
#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Captured IPv4 packets as hex, starting at the IP header
    #[arg(required = true)]
    pub packets: Vec<String>,
    #[command(flatten)]
    pub config: ConfigArgs,
    /// Output format
    #[arg(long, default_value = "pretty", value_enum)]
    pub output: OutputFmt,
}

/// Output format argument.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFmt {
    Pretty,
    Json,
}

impl ConfigArgs {
    /// Config file (or defaults) with flag overrides applied, validated.
    pub fn resolve(&self) -> Result<ScanConfig, ProbeError> {
        let mut config = match &self.config {
            Some(path) => ScanConfig::from_json_file(path)?,
            None => ScanConfig::default(),
        };
        if let Some(port) = self.target_port {
            config.target_port = port;
        }
        if let Some(first) = self.source_port_first {
            config.source_port_first = first;
        }
        if let Some(last) = self.source_port_last {
            config.source_port_last = last;
        }
        config.validate()?;
        Ok(config)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hex input
// ─────────────────────────────────────────────────────────────────────────────

/// Decode a hex string; whitespace, `:` separators and a `0x` prefix are ignored.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, ProbeError> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    let digits: Vec<u8> = s
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(ProbeError::Hex(format!(
            "odd number of hex digits ({})",
            digits.len()
        )));
    }
    digits
        .chunks_exact(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair)
                .map_err(|_| ProbeError::Hex("non-ASCII input".to_string()))?;
            u8::from_str_radix(text, 16).map_err(|_| ProbeError::Hex(format!("bad byte '{text}'")))
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Command runners
// ─────────────────────────────────────────────────────────────────────────────

fn initialized_module(
    name: &str,
    config: &ScanConfig,
) -> Result<Box<dyn ProbeModule>, ProbeError> {
    let mut module = module_by_name(name)?;
    module.global_initialize(config)?;
    Ok(module)
}

/// Render a module's descriptor after initialising it with `config`.
pub fn run_describe(
    name: &str,
    config: &ScanConfig,
    output: OutputFmt,
) -> Result<String, ProbeError> {
    let module = initialized_module(name, config)?;
    let descriptor = module.descriptor();
    Ok(match output {
        OutputFmt::Pretty => format_descriptor_pretty(descriptor),
        OutputFmt::Json => format!("{}\n", format_json(descriptor)),
    })
}

/// Build one `quic_initial` frame and return its header dump and hex.
pub fn run_build(
    args: &BuildArgs,
    config: &ScanConfig,
    validation: &Validation,
) -> Result<String, ProbeError> {
    let src_mac = parse_mac_str(&args.src_mac)?;
    let gw_mac = parse_mac_str(&args.gw_mac)?;
    let module = initialized_module(crate::probe::quic_initial::MODULE_NAME, config)?;

    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    module.thread_initialize(&mut buf, &src_mac, &gw_mac)?;
    let len = module.make_packet(&mut buf, args.src, args.dst, args.probe, validation);
    tracing::debug!(len, src = %args.src, dst = %args.dst, "frame built");

    let mut text = Vec::new();
    module.print_packet(&mut text, &buf[..len])?;
    let mut out = String::from_utf8_lossy(&text).into_owned();
    out.push_str(&format_hex_dump(&buf[..len]));
    Ok(out)
}

/// Run each captured packet through the validator, then the classifier.
///
/// Packets share one module, so a repeated source is rejected after its
/// first accepted response.
pub fn run_classify(
    packets: &[String],
    config: &ScanConfig,
) -> Result<Vec<ClassifiedPacket>, ProbeError> {
    let mut module = initialized_module(crate::probe::quic_initial::MODULE_NAME, config)?;
    let mut results = Vec::with_capacity(packets.len());

    for hex in packets {
        let pkt = decode_hex(hex)?;
        let src = ip_source(&pkt).ok_or_else(|| {
            ProbeError::Hex(format!(
                "packet too short for IPv4 header ({} bytes)",
                pkt.len()
            ))
        })?;

        let mut fields = FieldSet::new();
        let accepted = module.validate_packet(&pkt, pkt.len(), src);
        if accepted {
            if let Some(payload) = udp_payload(&pkt) {
                module.process_packet(payload, &mut fields);
            }
        }
        results.push(ClassifiedPacket {
            src,
            accepted,
            fields,
        });
    }

    module.cleanup()?;
    Ok(results)
}

/// Dispatch a parsed command line; returns the text to print.
pub fn run(cli: &Cli) -> Result<String, ProbeError> {
    match &cli.command {
        Commands::Describe(args) => {
            let config = args.config.resolve()?;
            run_describe(&args.module, &config, args.output)
        }
        Commands::Build(args) => {
            let config = args.config.resolve()?;
            let mut rng = rand::thread_rng();
            let validation: Validation = [rng.gen(), rng.gen(), rng.gen(), rng.gen()];
            run_build(args, &config, &validation)
        }
        Commands::Classify(args) => {
            let config = args.config.resolve()?;
            let results = run_classify(&args.packets, &config)?;
            Ok(match args.output {
                OutputFmt::Pretty => format_classified_pretty(&results),
                OutputFmt::Json => format!("{}\n", format_json(&results)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::quic::PUBLIC_FLAG_HAS_VERS;
    use crate::packet::{make_ip_header, make_udp_header, IPPROTO_UDP, IP_HDR_LEN, UDP_HDR_LEN};

    fn reply_hex(src: [u8; 4], body: &[u8]) -> String {
        let mut pkt = vec![0u8; IP_HDR_LEN + UDP_HDR_LEN + body.len()];
        let total_len = pkt.len() as u16;
        make_ip_header(&mut pkt, IPPROTO_UDP, total_len);
        pkt[12..16].copy_from_slice(&src);
        make_udp_header(&mut pkt[IP_HDR_LEN..], 40000, (UDP_HDR_LEN + body.len()) as u16);
        pkt[IP_HDR_LEN + UDP_HDR_LEN..].copy_from_slice(body);
        pkt.iter().map(|b| format!("{b:02x}")).collect()
    }

    fn vn_body() -> Vec<u8> {
        let mut body = vec![PUBLIC_FLAG_HAS_VERS];
        body.extend_from_slice(b"SCANNING");
        body.extend_from_slice(&[0xff, 0x00, 0x00, 0x1d]);
        body
    }

    #[test]
    fn test_cli_parses_build() {
        let cli = Cli::parse_from([
            "quic-scan", "build", "--src", "10.0.0.2", "--dst", "192.0.2.1", "--probe", "3",
            "--target-port", "8443",
        ]);
        match cli.command {
            Commands::Build(args) => {
                assert_eq!(args.src, Ipv4Addr::new(10, 0, 0, 2));
                assert_eq!(args.probe, 3);
                assert_eq!(args.config.target_port, Some(8443));
                assert_eq!(args.src_mac, "02:00:00:00:00:01");
            }
            other => panic!("expected build, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_classify_requires_packet() {
        assert!(Cli::try_parse_from(["quic-scan", "classify"]).is_err());
    }

    #[test]
    fn test_config_args_flags_override_defaults() {
        let args = ConfigArgs {
            config: None,
            target_port: Some(4433),
            source_port_first: Some(1000),
            source_port_last: None,
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.target_port, 4433);
        assert_eq!(config.source_port_first, 1000);
        assert_eq!(config.source_port_last, 61000);
    }

    #[test]
    fn test_config_args_rejects_inverted_range() {
        let args = ConfigArgs {
            config: None,
            target_port: None,
            source_port_first: Some(2000),
            source_port_last: Some(1000),
        };
        assert!(matches!(args.resolve(), Err(ProbeError::InvalidPortRange { .. })));
    }

    #[test]
    fn test_decode_hex_variants() {
        assert_eq!(decode_hex("0x45 00:1a").unwrap(), vec![0x45, 0x00, 0x1a]);
        assert_eq!(decode_hex("").unwrap(), Vec::<u8>::new());
        assert!(matches!(decode_hex("abc"), Err(ProbeError::Hex(_))));
        assert!(matches!(decode_hex("zz"), Err(ProbeError::Hex(_))));
    }

    #[test]
    fn test_run_describe_reports_filter() {
        let config = ScanConfig {
            target_port: 8443,
            ..ScanConfig::default()
        };
        let text = run_describe("quic_initial", &config, OutputFmt::Pretty).unwrap();
        assert!(text.contains("udp src port 8443"));
        assert!(text.contains("classification"));

        let json = run_describe("quic_initial", &config, OutputFmt::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["pcap_snaplen"], 1242);
        assert_eq!(parsed["fields"][1]["kind"], "int");
    }

    #[test]
    fn test_run_describe_unknown_module() {
        let err = run_describe("dns", &ScanConfig::default(), OutputFmt::Pretty).unwrap_err();
        assert!(matches!(err, ProbeError::UnknownModule(_)));
    }

    #[test]
    fn test_run_build_dump() {
        let cli = Cli::parse_from([
            "quic-scan", "build", "--src", "192.168.1.100", "--dst", "10.0.0.1",
        ]);
        let Commands::Build(args) = cli.command else {
            panic!("expected build");
        };
        let text = run_build(&args, &ScanConfig::default(), &[0, 5, 0, 0]).unwrap();
        assert!(text.starts_with("udp { source: 32773 | dest: 443"));
        assert!(text.contains("ip { saddr: 192.168.1.100 | daddr: 10.0.0.1"));
        // QUIC header starts at frame offset 42
        assert!(text.contains("0020  "));
        assert!(text.contains("c1 1a 1a 1a 1a 08"));
    }

    #[test]
    fn test_run_build_bad_mac() {
        let cli = Cli::parse_from([
            "quic-scan", "build", "--src", "1.1.1.1", "--dst", "2.2.2.2", "--gw-mac", "nope",
        ]);
        let Commands::Build(args) = cli.command else {
            panic!("expected build");
        };
        assert!(matches!(
            run_build(&args, &ScanConfig::default(), &[0; 4]),
            Err(ProbeError::Config(_))
        ));
    }

    #[test]
    fn test_run_classify_dedups_sources() {
        let first = reply_hex([192, 0, 2, 7], &vn_body());
        let again = reply_hex([192, 0, 2, 7], &vn_body());
        let other = reply_hex([192, 0, 2, 8], &[0x02; 9]);
        let results = run_classify(&[first, again, other], &ScanConfig::default()).unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].accepted);
        assert_eq!(results[0].fields.get_str("classification"), Some("quic"));
        assert_eq!(results[0].fields.get_str("versions"), Some("ff00001d"));
        assert!(!results[1].accepted, "second reply from same source dropped");
        assert!(results[1].fields.is_empty());
        assert!(results[2].accepted);
        assert_eq!(results[2].fields.get_str("info"), Some("RST"));
    }

    #[test]
    fn test_run_classify_rejects_short_hex() {
        let err = run_classify(&["4500".to_string()], &ScanConfig::default()).unwrap_err();
        assert!(matches!(err, ProbeError::Hex(_)));
    }
}
