//! Test Utilities
//!
//! An in-memory native socket whose lifecycle is driven by hand, so facade
//! behaviour can be checked without a network or an event loop.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::{CloseError, ConnectionError, TransmissionError};
use crate::websocket::{
    BinaryType, CloseEvent, ErrorEvent, MessageData, MessageEvent, NativeHandlers, NativeSocket,
    OpenEvent, ReadyState, SocketFactory, resolve_url, validate_close, validate_protocols,
};

#[derive(Default)]
struct MockState {
    url: String,
    requested_protocols: Vec<String>,
    handlers: RefCell<Option<Rc<NativeHandlers>>>,
    state: Cell<Option<ReadyState>>,
    binary_type: Cell<BinaryType>,
    buffered: Cell<u64>,
    protocol: RefCell<String>,
    extensions: RefCell<String>,
    sent: RefCell<Vec<MessageData>>,
    close_requests: RefCell<Vec<(Option<u16>, Option<String>)>>,
    reject_sends: Cell<bool>,
}

/// Scriptable socket. Clones share state, so a test keeps one clone while the
/// facade owns another.
#[derive(Clone)]
pub struct MockSocket {
    state: Rc<MockState>,
}

impl MockSocket {
    fn new(url: String, requested_protocols: Vec<String>) -> Self {
        Self {
            state: Rc::new(MockState {
                url,
                requested_protocols,
                ..MockState::default()
            }),
        }
    }

    fn current(&self) -> ReadyState {
        self.state.state.get().unwrap_or(ReadyState::Connecting)
    }

    fn handlers(&self) -> Option<Rc<NativeHandlers>> {
        self.state.handlers.borrow().clone()
    }

    /// Finish the handshake. Ignored once a close has been requested.
    pub fn open(&self, protocol: &str, extensions: &str) {
        if self.current() != ReadyState::Connecting {
            return;
        }
        self.state.state.set(Some(ReadyState::Open));
        *self.state.protocol.borrow_mut() = protocol.to_string();
        *self.state.extensions.borrow_mut() = extensions.to_string();

        if let Some(handlers) = self.handlers() {
            (handlers.on_open)(OpenEvent {
                protocol: protocol.to_string(),
                extensions: extensions.to_string(),
            });
        }
    }

    /// Deliver an incoming message. Dropped unless the socket is open.
    pub fn receive(&self, data: impl Into<MessageData>) {
        if self.current() != ReadyState::Open {
            return;
        }
        let data = match data.into() {
            MessageData::Blob(bytes) => MessageData::from_binary(bytes, self.state.binary_type.get()),
            other => other,
        };
        if let Some(handlers) = self.handlers() {
            (handlers.on_message)(MessageEvent {
                data,
                origin: self.state.url.clone(),
            });
        }
    }

    pub fn fail(&self, message: &str) {
        if self.current() == ReadyState::Closed {
            return;
        }
        if let Some(handlers) = self.handlers() {
            (handlers.on_error)(ErrorEvent {
                message: message.to_string(),
            });
        }
    }

    /// Report the connection as closed. Only the first call has an effect.
    pub fn finish_close(&self, code: u16, reason: &str, was_clean: bool) {
        if self.current() == ReadyState::Closed {
            return;
        }
        self.state.state.set(Some(ReadyState::Closed));
        if let Some(handlers) = self.handlers() {
            (handlers.on_close)(CloseEvent {
                code,
                reason: reason.to_string(),
                was_clean,
            });
        }
    }

    /// Make every subsequent `send` fail as if the transport went away.
    pub fn reject_sends(&self, reject: bool) {
        self.state.reject_sends.set(reject);
    }

    pub fn set_buffered_amount(&self, amount: u64) {
        self.state.buffered.set(amount);
    }

    pub fn sent(&self) -> Vec<MessageData> {
        self.state.sent.borrow().clone()
    }

    /// Effective close calls, in order.
    pub fn close_requests(&self) -> Vec<(Option<u16>, Option<String>)> {
        self.state.close_requests.borrow().clone()
    }

    pub fn requested_protocols(&self) -> Vec<String> {
        self.state.requested_protocols.clone()
    }
}

impl NativeSocket for MockSocket {
    fn set_handlers(&self, handlers: NativeHandlers) {
        *self.state.handlers.borrow_mut() = Some(Rc::new(handlers));
    }

    fn send(&self, data: MessageData) -> Result<(), TransmissionError> {
        match self.current() {
            ReadyState::Connecting => Err(TransmissionError::StillConnecting),
            ReadyState::Closing | ReadyState::Closed => Err(TransmissionError::NotOpen(self.current())),
            ReadyState::Open if self.state.reject_sends.get() => Err(TransmissionError::Disconnected),
            ReadyState::Open => {
                self.state.sent.borrow_mut().push(data);
                Ok(())
            }
        }
    }

    fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<(), CloseError> {
        validate_close(code, reason)?;
        if matches!(self.current(), ReadyState::Closing | ReadyState::Closed) {
            return Ok(());
        }
        self.state.state.set(Some(ReadyState::Closing));
        self.state
            .close_requests
            .borrow_mut()
            .push((code, reason.map(str::to_string)));
        Ok(())
    }

    fn binary_type(&self) -> BinaryType {
        self.state.binary_type.get()
    }

    fn set_binary_type(&self, binary_type: BinaryType) {
        self.state.binary_type.set(binary_type);
    }

    fn buffered_amount(&self) -> u64 {
        self.state.buffered.get()
    }

    fn extensions(&self) -> String {
        self.state.extensions.borrow().clone()
    }

    fn protocol(&self) -> String {
        self.state.protocol.borrow().clone()
    }

    fn ready_state(&self) -> ReadyState {
        self.current()
    }

    fn url(&self) -> String {
        self.state.url.clone()
    }
}

/// Hands out [`MockSocket`]s and remembers them for the test to drive.
#[derive(Default)]
pub struct MockFactory {
    created: RefCell<Vec<MockSocket>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently created socket.
    pub fn last(&self) -> Option<MockSocket> {
        self.created.borrow().last().cloned()
    }
}

impl SocketFactory for MockFactory {
    type Socket = MockSocket;

    fn connect(&self, address: &str, protocols: &[String]) -> Result<MockSocket, ConnectionError> {
        let url = resolve_url(address)?;
        validate_protocols(protocols)?;

        let socket = MockSocket::new(url.to_string(), protocols.to_vec());
        self.created.borrow_mut().push(socket.clone());
        Ok(socket)
    }
}
