//! Error type for probe module setup and the CLI.
//!
//! The per-packet hot path (`make_packet`, `validate_packet`,
//! `process_packet`) never returns these: malformed network input is dropped
//! silently and caller contract violations are asserted.

/// Error from probe module initialisation or CLI input handling.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid source port range: {first}-{last}")]
    InvalidPortRange { first: u16, last: u16 },

    #[error("probe module used before global_initialize")]
    NotInitialized,

    #[error("unknown probe module: '{0}'")]
    UnknownModule(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid hex input: {0}")]
    Hex(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
