//! Native Sockets
//!
//! The callback-based socket primitive the facade adapts, and the default
//! implementation backed by tokio-tungstenite. A native socket follows
//! browser WebSocket semantics: ready state only moves forward, messages are
//! only delivered while open, and a failure is reported as an error followed
//! by an abnormal close.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{ORIGIN, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};

use crate::config::ConnectorConfig;
use crate::error::{CloseError, ConnectionError, TransmissionError};
use crate::event_loop::{EventLoop, LoopHandle, Payload, SignalSink, SocketId, SocketSignal};
use crate::websocket::manager::{self, Connection, Outbound};
use crate::websocket::types::{
    BinaryType, CloseEvent, ErrorEvent, MessageData, MessageEvent, OpenEvent, ReadyState,
    resolve_url, validate_close, validate_protocols,
};

/// The four lifecycle callbacks a native socket reports through.
pub struct NativeHandlers {
    pub on_open: Box<dyn Fn(OpenEvent)>,
    pub on_message: Box<dyn Fn(MessageEvent)>,
    pub on_error: Box<dyn Fn(ErrorEvent)>,
    pub on_close: Box<dyn Fn(CloseEvent)>,
}

/// A callback-based full-duplex socket.
pub trait NativeSocket: 'static {
    /// Install the lifecycle callbacks. Called once, right after construction.
    fn set_handlers(&self, handlers: NativeHandlers);

    fn send(&self, data: MessageData) -> Result<(), TransmissionError>;

    fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<(), CloseError>;

    fn binary_type(&self) -> BinaryType;
    fn set_binary_type(&self, binary_type: BinaryType);
    fn buffered_amount(&self) -> u64;
    fn extensions(&self) -> String;
    fn protocol(&self) -> String;
    fn ready_state(&self) -> ReadyState;
    fn url(&self) -> String;
}

/// Constructs native sockets. Resolved once and injected into the facade.
pub trait SocketFactory {
    type Socket: NativeSocket;

    fn connect(&self, address: &str, protocols: &[String]) -> Result<Self::Socket, ConnectionError>;
}

/// Opens [`TungsteniteSocket`]s whose signals are delivered on one event loop.
#[derive(Clone)]
pub struct TungsteniteConnector {
    handle: LoopHandle,
    config: ConnectorConfig,
}

impl TungsteniteConnector {
    pub fn new(event_loop: &EventLoop) -> Self {
        Self::with_config(event_loop, ConnectorConfig::default())
    }

    pub fn with_config(event_loop: &EventLoop, config: ConnectorConfig) -> Self {
        Self {
            handle: event_loop.handle(),
            config,
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    fn build_request(&self, url: &url::Url, protocols: &[String]) -> Result<Request, ConnectionError> {
        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();

        if !protocols.is_empty() {
            let value = HeaderValue::from_str(&protocols.join(", "))
                .map_err(|_| ConnectionError::InvalidHeader("Sec-WebSocket-Protocol".into()))?;
            headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        if let Some(origin) = &self.config.origin {
            let value = HeaderValue::from_str(origin)
                .map_err(|_| ConnectionError::InvalidHeader("Origin".into()))?;
            headers.insert(ORIGIN, value);
        }

        for (name, value) in &self.config.headers {
            let header = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConnectionError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ConnectionError::InvalidHeader(name.clone()))?;
            headers.append(header, value);
        }

        Ok(request)
    }
}

impl SocketFactory for TungsteniteConnector {
    type Socket = TungsteniteSocket;

    fn connect(&self, address: &str, protocols: &[String]) -> Result<TungsteniteSocket, ConnectionError> {
        let url = resolve_url(address)?;
        validate_protocols(protocols)?;
        let request = self.build_request(&url, protocols)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let buffered = Arc::new(AtomicU64::new(0));

        let shared = Rc::new_cyclic(|weak: &Weak<SocketShared>| {
            let sink: Weak<dyn SignalSink> = weak.clone();
            let id = self.handle.register(sink);
            SocketShared {
                id,
                origin: url.origin().ascii_serialization(),
                url: url.clone(),
                handle: self.handle.clone(),
                outbound: tx,
                buffered: buffered.clone(),
                state: Cell::new(ReadyState::Connecting),
                binary_type: Cell::new(BinaryType::default()),
                protocol: RefCell::new(String::new()),
                extensions: RefCell::new(String::new()),
                handlers: RefCell::new(None),
            }
        });

        manager::spawn(
            Connection {
                id: shared.id,
                url,
                outbound: rx,
                client: self.handle.client(),
                buffered,
            },
            request,
        );

        Ok(TungsteniteSocket { shared })
    }
}

/// Loop-side half of a tokio-tungstenite connection.
pub struct TungsteniteSocket {
    shared: Rc<SocketShared>,
}

struct SocketShared {
    id: SocketId,
    url: url::Url,
    origin: String,
    handle: LoopHandle,
    outbound: mpsc::UnboundedSender<Outbound>,
    buffered: Arc<AtomicU64>,
    state: Cell<ReadyState>,
    binary_type: Cell<BinaryType>,
    protocol: RefCell<String>,
    extensions: RefCell<String>,
    handlers: RefCell<Option<Rc<NativeHandlers>>>,
}

impl SocketShared {
    fn advance(&self, next: ReadyState) -> bool {
        let current = self.state.get();
        if !current.can_advance_to(next) {
            return false;
        }
        log::debug!("[WebSocket {}] {} -> {}", self.id, current, next);
        self.state.set(next);
        true
    }

    fn handlers(&self) -> Option<Rc<NativeHandlers>> {
        self.handlers.borrow().clone()
    }
}

impl SignalSink for SocketShared {
    fn deliver(&self, signal: SocketSignal) {
        match signal {
            SocketSignal::Opened { protocol, extensions } => {
                // A close requested while connecting wins over a late handshake.
                if self.state.get() != ReadyState::Connecting {
                    log::debug!("[WebSocket {}] Dropping open, state is {}", self.id, self.state.get());
                    return;
                }
                self.advance(ReadyState::Open);
                *self.protocol.borrow_mut() = protocol.clone();
                *self.extensions.borrow_mut() = extensions.clone();

                if let Some(handlers) = self.handlers() {
                    (handlers.on_open)(OpenEvent { protocol, extensions });
                }
            }
            SocketSignal::Received(payload) => {
                if self.state.get() != ReadyState::Open {
                    return;
                }
                let data = match payload {
                    Payload::Text(text) => MessageData::Text(text),
                    Payload::Binary(bytes) => MessageData::from_binary(bytes, self.binary_type.get()),
                };
                if let Some(handlers) = self.handlers() {
                    (handlers.on_message)(MessageEvent {
                        data,
                        origin: self.origin.clone(),
                    });
                }
            }
            SocketSignal::Closing => {
                self.advance(ReadyState::Closing);
            }
            SocketSignal::Failed { message } => {
                if self.state.get() == ReadyState::Closed {
                    return;
                }
                if let Some(handlers) = self.handlers() {
                    (handlers.on_error)(ErrorEvent { message });
                }
            }
            SocketSignal::Closed { code, reason, was_clean } => {
                if !self.advance(ReadyState::Closed) {
                    return;
                }
                self.handle.unregister(self.id);
                log::info!("[WebSocket {}] Closed ({} {}, clean: {})", self.id, code, reason, was_clean);

                if let Some(handlers) = self.handlers() {
                    (handlers.on_close)(CloseEvent { code, reason, was_clean });
                }
            }
        }
    }
}

impl NativeSocket for TungsteniteSocket {
    fn set_handlers(&self, handlers: NativeHandlers) {
        *self.shared.handlers.borrow_mut() = Some(Rc::new(handlers));
    }

    fn send(&self, data: MessageData) -> Result<(), TransmissionError> {
        let shared = &self.shared;
        match shared.state.get() {
            ReadyState::Connecting => return Err(TransmissionError::StillConnecting),
            ReadyState::Closing | ReadyState::Closed => {
                return Err(TransmissionError::NotOpen(shared.state.get()));
            }
            ReadyState::Open => {}
        }

        let payload = match data {
            MessageData::Text(text) => Payload::Text(text),
            MessageData::Blob(bytes) => Payload::Binary(bytes),
            MessageData::ArrayBuffer(bytes) => Payload::Binary(bytes.into()),
        };
        let len = payload.len() as u64;
        log::debug!("[WebSocket {}] send({} bytes)", shared.id, len);

        shared.buffered.fetch_add(len, Ordering::SeqCst);
        shared
            .outbound
            .send(Outbound::Message(payload))
            .map_err(|_| {
                shared.buffered.fetch_sub(len, Ordering::SeqCst);
                TransmissionError::Disconnected
            })
    }

    fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<(), CloseError> {
        validate_close(code, reason)?;

        let shared = &self.shared;
        let command = match shared.state.get() {
            ReadyState::Closing | ReadyState::Closed => return Ok(()),
            ReadyState::Connecting => Outbound::Abort,
            ReadyState::Open => Outbound::Close {
                code,
                reason: reason.unwrap_or_default().to_string(),
            },
        };

        log::info!("[WebSocket {}] close({:?}, {:?})", shared.id, code, reason);
        shared.advance(ReadyState::Closing);
        if shared.outbound.send(command).is_err() {
            log::warn!("[WebSocket {}] Connection task already stopped", shared.id);
        }
        Ok(())
    }

    fn binary_type(&self) -> BinaryType {
        self.shared.binary_type.get()
    }

    fn set_binary_type(&self, binary_type: BinaryType) {
        self.shared.binary_type.set(binary_type);
    }

    fn buffered_amount(&self) -> u64 {
        self.shared.buffered.load(Ordering::SeqCst)
    }

    fn extensions(&self) -> String {
        self.shared.extensions.borrow().clone()
    }

    fn protocol(&self) -> String {
        self.shared.protocol.borrow().clone()
    }

    fn ready_state(&self) -> ReadyState {
        self.shared.state.get()
    }

    fn url(&self) -> String {
        self.shared.url.to_string()
    }
}

impl Drop for TungsteniteSocket {
    fn drop(&mut self) {
        let shared = &self.shared;
        match shared.state.get() {
            ReadyState::Connecting => {
                let _ = shared.outbound.send(Outbound::Abort);
            }
            ReadyState::Open => {
                let _ = shared.outbound.send(Outbound::Close {
                    code: Some(1001),
                    reason: String::new(),
                });
            }
            ReadyState::Closing | ReadyState::Closed => {}
        }
        shared.handle.unregister(shared.id);
    }
}
