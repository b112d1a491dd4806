//! Error types for the realtime voice client

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors raised before any audio flows: bad configuration, missing
    /// credential, unusable devices, refused connection or failed handshake.
    pub fn is_startup_fatal(&self) -> bool {
        match self {
            Error::Config(_) => true,
            Error::Audio(e) => !e.is_transient(),
            Error::Network(
                NetworkError::InvalidEndpoint(_)
                | NetworkError::ConnectionFailed(_)
                | NetworkError::HandshakeFailed(_),
            ) => true,
            _ => false,
        }
    }
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Buffer overflow")]
    BufferOverflow,

    #[error("Short read: expected {expected} samples, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("Device is closed")]
    Closed,

    #[error("cpal error: {0}")]
    Cpal(String),
}

impl AudioError {
    /// A single failed read or write that the next iteration may recover from.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AudioError::StreamError(_) | AudioError::BufferOverflow | AudioError::ShortRead { .. }
        )
    }
}

/// Envelope encoding and decoding errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Invalid audio payload: {0}")]
    InvalidPayload(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// Transport errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Connection is closed")]
    Closed,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
