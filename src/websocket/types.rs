//! Values shared by native sockets and the facade.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CloseError, ConnectionError};

/// WebSocket ready states (matching browser API)
pub const CONNECTING: u16 = 0;
pub const OPEN: u16 = 1;
pub const CLOSING: u16 = 2;
pub const CLOSED: u16 = 3;

/// Longest close reason the protocol allows, in UTF-8 bytes.
pub const MAX_CLOSE_REASON_BYTES: usize = 123;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum ReadyState {
    Connecting = CONNECTING,
    Open = OPEN,
    Closing = CLOSING,
    Closed = CLOSED,
}

impl ReadyState {
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_advance_to(self, next: ReadyState) -> bool {
        next > self
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadyState::Connecting => "CONNECTING",
            ReadyState::Open => "OPEN",
            ReadyState::Closing => "CLOSING",
            ReadyState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// How received binary payloads are surfaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryType {
    #[default]
    Blob,
    ArrayBuffer,
}

impl BinaryType {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryType::Blob => "blob",
            BinaryType::ArrayBuffer => "arraybuffer",
        }
    }
}

impl fmt::Display for BinaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageData {
    Text(String),
    /// Immutable shared bytes.
    Blob(Bytes),
    /// Owned, mutable bytes.
    ArrayBuffer(Vec<u8>),
}

impl MessageData {
    pub fn len(&self) -> usize {
        match self {
            MessageData::Text(text) => text.len(),
            MessageData::Blob(bytes) => bytes.len(),
            MessageData::ArrayBuffer(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageData::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MessageData::Text(text) => text.as_bytes(),
            MessageData::Blob(bytes) => &bytes[..],
            MessageData::ArrayBuffer(bytes) => &bytes[..],
        }
    }

    /// Decode a raw binary frame the way `binary_type` asks for.
    pub fn from_binary(bytes: Bytes, binary_type: BinaryType) -> Self {
        match binary_type {
            BinaryType::Blob => MessageData::Blob(bytes),
            BinaryType::ArrayBuffer => MessageData::ArrayBuffer(bytes.to_vec()),
        }
    }
}

impl From<&str> for MessageData {
    fn from(text: &str) -> Self {
        MessageData::Text(text.to_string())
    }
}

impl From<String> for MessageData {
    fn from(text: String) -> Self {
        MessageData::Text(text)
    }
}

impl From<Vec<u8>> for MessageData {
    fn from(bytes: Vec<u8>) -> Self {
        MessageData::ArrayBuffer(bytes)
    }
}

impl From<&[u8]> for MessageData {
    fn from(bytes: &[u8]) -> Self {
        MessageData::ArrayBuffer(bytes.to_vec())
    }
}

impl From<Bytes> for MessageData {
    fn from(bytes: Bytes) -> Self {
        MessageData::Blob(bytes)
    }
}

/// Structured values go out as their JSON text.
impl From<serde_json::Value> for MessageData {
    fn from(value: serde_json::Value) -> Self {
        MessageData::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenEvent {
    pub protocol: String,
    pub extensions: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub data: MessageData,
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

/// Payload carried by every event emitted on a facade.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Open(OpenEvent),
    Message(MessageData),
    Error(ErrorEvent),
    Close(CloseEvent),
    /// User-defined events emitted on the facade.
    Custom(serde_json::Value),
}

impl SocketEvent {
    pub fn as_open(&self) -> Option<&OpenEvent> {
        match self {
            SocketEvent::Open(event) => Some(event),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&MessageData> {
        match self {
            SocketEvent::Message(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorEvent> {
        match self {
            SocketEvent::Error(event) => Some(event),
            _ => None,
        }
    }

    pub fn as_close(&self) -> Option<&CloseEvent> {
        match self {
            SocketEvent::Close(event) => Some(event),
            _ => None,
        }
    }
}

/// Requested subprotocols: none, one, or a list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Protocols(Vec<String>);

impl Protocols {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Protocols {
    fn from(protocol: &str) -> Self {
        Protocols(vec![protocol.to_string()])
    }
}

impl From<String> for Protocols {
    fn from(protocol: String) -> Self {
        Protocols(vec![protocol])
    }
}

impl From<Vec<String>> for Protocols {
    fn from(protocols: Vec<String>) -> Self {
        Protocols(protocols)
    }
}

impl From<&[&str]> for Protocols {
    fn from(protocols: &[&str]) -> Self {
        Protocols(protocols.iter().map(|p| p.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Protocols {
    fn from(protocols: [&str; N]) -> Self {
        Protocols(protocols.iter().map(|p| p.to_string()).collect())
    }
}

impl From<Option<Protocols>> for Protocols {
    fn from(protocols: Option<Protocols>) -> Self {
        protocols.unwrap_or_default()
    }
}

/// Options accepted at construction for parity with server-side sockets.
/// A client socket reads none of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionOptions(pub serde_json::Map<String, serde_json::Value>);

impl ConnectionOptions {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendOptions {
    /// Send text payloads as a binary frame.
    pub binary: bool,
}

/// Check `close` arguments against the limits of the closing handshake.
pub fn validate_close(code: Option<u16>, reason: Option<&str>) -> Result<(), CloseError> {
    if let Some(code) = code {
        if code != 1000 && !(3000..=4999).contains(&code) {
            return Err(CloseError::InvalidCode(code));
        }
    }
    if let Some(reason) = reason {
        if reason.len() > MAX_CLOSE_REASON_BYTES {
            return Err(CloseError::ReasonTooLong(reason.len()));
        }
    }
    Ok(())
}

/// Parse `address` into the absolute URL a socket connects to.
pub fn resolve_url(address: &str) -> Result<url::Url, ConnectionError> {
    let mut url = url::Url::parse(address).map_err(|source| ConnectionError::InvalidUrl {
        url: address.to_string(),
        source,
    })?;

    let scheme = match url.scheme() {
        "ws" | "wss" => None,
        "http" => Some("ws"),
        "https" => Some("wss"),
        other => return Err(ConnectionError::UnsupportedScheme(other.to_string())),
    };
    if let Some(scheme) = scheme {
        url.set_scheme(scheme)
            .map_err(|_| ConnectionError::UnsupportedScheme(url.scheme().to_string()))?;
    }

    if url.fragment().is_some() {
        return Err(ConnectionError::Fragment(address.to_string()));
    }
    Ok(url)
}

/// Subprotocol names must be unique HTTP tokens.
pub fn validate_protocols(protocols: &[String]) -> Result<(), ConnectionError> {
    for (index, protocol) in protocols.iter().enumerate() {
        if protocol.is_empty() || !protocol.bytes().all(is_token_byte) {
            return Err(ConnectionError::InvalidProtocol(protocol.clone()));
        }
        if protocols[..index].contains(protocol) {
            return Err(ConnectionError::DuplicateProtocol(protocol.clone()));
        }
    }
    Ok(())
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_state_codes_match_constants() {
        assert_eq!(ReadyState::Connecting.code(), 0);
        assert_eq!(ReadyState::Open.code(), 1);
        assert_eq!(ReadyState::Closing.code(), 2);
        assert_eq!(ReadyState::Closed.code(), 3);
        assert_eq!(ReadyState::Closing.to_string(), "CLOSING");
    }

    #[test]
    fn ready_state_only_moves_forward() {
        assert!(ReadyState::Connecting.can_advance_to(ReadyState::Open));
        assert!(ReadyState::Connecting.can_advance_to(ReadyState::Closed));
        assert!(!ReadyState::Closed.can_advance_to(ReadyState::Open));
        assert!(!ReadyState::Open.can_advance_to(ReadyState::Open));
    }

    #[test]
    fn resolve_url_normalises_http_schemes() {
        assert_eq!(resolve_url("ws://localhost:9000").unwrap().as_str(), "ws://localhost:9000/");
        assert_eq!(resolve_url("https://example.com/feed").unwrap().as_str(), "wss://example.com/feed");
    }

    #[test]
    fn resolve_url_rejects_bad_addresses() {
        assert!(matches!(resolve_url("not a url"), Err(ConnectionError::InvalidUrl { .. })));
        assert!(matches!(
            resolve_url("ftp://example.com"),
            Err(ConnectionError::UnsupportedScheme(scheme)) if scheme == "ftp"
        ));
        assert!(matches!(resolve_url("ws://example.com/#top"), Err(ConnectionError::Fragment(_))));
    }

    #[test]
    fn protocols_must_be_unique_tokens() {
        let ok: Protocols = ["chat", "superchat.v2"].into();
        assert!(validate_protocols(ok.as_slice()).is_ok());

        let spaced: Protocols = "has space".into();
        assert!(matches!(
            validate_protocols(spaced.as_slice()),
            Err(ConnectionError::InvalidProtocol(_))
        ));

        let dup: Protocols = ["chat", "chat"].into();
        assert!(matches!(
            validate_protocols(dup.as_slice()),
            Err(ConnectionError::DuplicateProtocol(p)) if p == "chat"
        ));
    }

    #[test]
    fn close_arguments_are_checked() {
        assert!(validate_close(None, None).is_ok());
        assert!(validate_close(Some(1000), Some("done")).is_ok());
        assert!(validate_close(Some(4999), None).is_ok());
        assert_eq!(validate_close(Some(1001), None), Err(CloseError::InvalidCode(1001)));
        assert_eq!(validate_close(Some(2999), None), Err(CloseError::InvalidCode(2999)));

        let long = "x".repeat(124);
        assert_eq!(validate_close(Some(1000), Some(&long)), Err(CloseError::ReasonTooLong(124)));
    }

    #[test]
    fn binary_frames_decode_per_binary_type() {
        let bytes = Bytes::from_static(b"\x01\x02");
        assert_eq!(
            MessageData::from_binary(bytes.clone(), BinaryType::Blob),
            MessageData::Blob(bytes.clone())
        );
        assert_eq!(
            MessageData::from_binary(bytes, BinaryType::ArrayBuffer),
            MessageData::ArrayBuffer(vec![1, 2])
        );
    }

    #[test]
    fn json_values_are_sent_as_text() {
        let data = MessageData::from(serde_json::json!({ "op": "ping" }));
        assert_eq!(data.as_text(), Some(r#"{"op":"ping"}"#));
    }

    #[test]
    fn binary_type_uses_browser_names() {
        let parsed: BinaryType = serde_json::from_str("\"arraybuffer\"").unwrap();
        assert_eq!(parsed, BinaryType::ArrayBuffer);
        assert_eq!(BinaryType::default().to_string(), "blob");
    }
}
