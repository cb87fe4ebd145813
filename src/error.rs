use register_map::DecodeError;
use std::time::Duration;

/// Failure of a single register request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("device answered with exception {0}")]
    Exception(String),
    #[error("transport failure: {0}")]
    Io(String),
}

/// Why a field of a snapshot is unavailable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("input `{0}` is unavailable")]
    MissingInput(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("unable to open serial port {path}: {source}")]
    Serial {
        path: String,
        source: tokio_serial::Error,
    },
    #[error("unable to resolve {host}: {source}")]
    Resolve {
        host: String,
        source: std::io::Error,
    },
    #[error("no address found for {0}")]
    NoAddress(String),
    #[error("unable to connect to {addr}: {source}")]
    Tcp {
        addr: String,
        source: std::io::Error,
    },
    #[error("connecting to {0} timed out")]
    Timeout(String),
    #[error("invalid serial setting: {0}")]
    InvalidSetting(String),
}

/// Failure of a whole poll cycle. No snapshot is produced.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("poll cycle cancelled")]
    Cancelled,
}
