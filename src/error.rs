//! Error types for the voice relay

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport-level errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection to hub failed: {0}")]
    ConnectFailed(String),

    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Routing and protocol errors
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Unknown peer identity: {0}")]
    UnknownPeer(String),

    #[error("Identity already announced: {0}")]
    IdentityTaken(String),

    #[error("Invalid control message: {0}")]
    InvalidMessage(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
