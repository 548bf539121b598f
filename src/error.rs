//! Error types.
//!
//! Construction and close-time argument errors are returned to the caller.
//! Transmission errors are contained by the facade and only logged.
//! Transport failures after construction never show up here; they arrive as
//! `error` events.

use thiserror::Error;

use crate::websocket::ReadyState;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Raised synchronously while constructing a socket.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported url scheme `{0}`, expected ws or wss")]
    UnsupportedScheme(String),
    #[error("url must not contain a fragment: {0}")]
    Fragment(String),
    #[error("invalid subprotocol `{0}`")]
    InvalidProtocol(String),
    #[error("duplicate subprotocol `{0}`")]
    DuplicateProtocol(String),
    #[error("invalid header `{0}`")]
    InvalidHeader(String),
    #[error("invalid handshake request: {0}")]
    Request(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Raised by a native socket when a payload cannot be queued.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransmissionError {
    #[error("socket is still connecting")]
    StillConnecting,
    #[error("socket is not open ({0})")]
    NotOpen(ReadyState),
    #[error("connection task has shut down")]
    Disconnected,
}

/// Raised when `close` receives arguments the protocol does not allow.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CloseError {
    #[error("close code {0} must be 1000 or within 3000..=4999")]
    InvalidCode(u16),
    #[error("close reason is {0} bytes, the limit is 123")]
    ReasonTooLong(usize),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Umbrella error for callers that handle everything in one place.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Transmission(#[from] TransmissionError),
    #[error(transparent)]
    Close(#[from] CloseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
