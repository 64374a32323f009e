//! quic-scan: stateless QUIC Initial probe tool.
//!
//! Usage:
//!   quic-scan describe [--module quic_initial] [--output json|pretty]
//!   quic-scan build --src <IP> --dst <IP> [--probe <N>] [--target-port <PORT>]
//!   quic-scan classify <HEX>... [--config <FILE>] [--output json|pretty]

use clap::Parser;
use quic_scan::cli::{self, Cli};
use tracing_subscriber::EnvFilter;

fn main() {
    // Initialise logging (RUST_LOG=debug etc.)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli::run(&cli) {
        Ok(out) => print!("{out}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
