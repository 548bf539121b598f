//! Event Loop Protocol
//!
//! Signals flow from network tasks into the loop, which hands each one to the
//! sink registered for the socket it belongs to.

use bytes::Bytes;

/// Identifies a socket registered with an event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub(crate) u32);

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw frame payload as read off the wire, before `binary_type` decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lifecycle signals a network task reports for its socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketSignal {
    /// Handshake finished; carries what the server negotiated.
    Opened { protocol: String, extensions: String },
    Received(Payload),
    /// The peer started the closing handshake.
    Closing,
    Failed { message: String },
    Closed {
        code: u16,
        reason: String,
        was_clean: bool,
    },
}

/// Receives signals on the loop thread.
///
/// Implementors are the loop-side halves of native sockets. They run user
/// callbacks, so `deliver` may re-enter the loop handle (to connect another
/// socket, for instance).
pub trait SignalSink {
    fn deliver(&self, signal: SocketSignal);
}
