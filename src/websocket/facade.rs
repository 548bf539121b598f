//! Socket Facade
//!
//! Wraps one native socket and re-emits its lifecycle callbacks as named
//! events. Each bridge runs the single-slot handler (`onopen` and friends)
//! first and the broadcast listeners second.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::emitter::{Emitter, EventEmitter};
use crate::error::{CloseError, ConnectionError};
use crate::websocket::native::{NativeHandlers, NativeSocket, SocketFactory, TungsteniteSocket};
use crate::websocket::types::{
    self, BinaryType, CloseEvent, ConnectionOptions, ErrorEvent, MessageData, MessageEvent,
    OpenEvent, Protocols, ReadyState, SendOptions, SocketEvent,
};

/// Names of the events a facade emits.
pub mod events {
    pub const OPEN: &str = "open";
    pub const MESSAGE: &str = "message";
    pub const ERROR: &str = "error";
    pub const CLOSE: &str = "close";
}

type Slot<T> = Option<Rc<dyn Fn(&T)>>;

#[derive(Default)]
struct HandlerSlots {
    onopen: Slot<OpenEvent>,
    onmessage: Slot<MessageData>,
    onerror: Slot<ErrorEvent>,
    onclose: Slot<CloseEvent>,
}

struct FacadeInner<S> {
    socket: S,
    slots: RefCell<HandlerSlots>,
    emitter: Emitter<SocketEvent>,
}

/// A WebSocket that notifies through an event emitter.
pub struct SocketFacade<S: NativeSocket = TungsteniteSocket> {
    inner: Rc<FacadeInner<S>>,
}

impl<S: NativeSocket> SocketFacade<S> {
    pub const CONNECTING: u16 = types::CONNECTING;
    pub const OPEN: u16 = types::OPEN;
    pub const CLOSING: u16 = types::CLOSING;
    pub const CLOSED: u16 = types::CLOSED;

    /// Construct the native socket through `factory` and wire its callbacks.
    ///
    /// `options` exists for parity with server-side sockets and is ignored.
    /// Address and protocol errors come straight from the factory.
    pub fn create<F>(
        factory: &F,
        address: &str,
        options: Option<ConnectionOptions>,
        protocols: impl Into<Protocols>,
    ) -> Result<Self, ConnectionError>
    where
        F: SocketFactory<Socket = S>,
    {
        if let Some(options) = options.filter(|options| !options.is_empty()) {
            log::debug!("[WebSocket] Ignoring client options: {:?}", options);
        }

        let protocols = protocols.into();
        let socket = factory.connect(address, protocols.as_slice())?;

        let inner = Rc::new(FacadeInner {
            socket,
            slots: RefCell::new(HandlerSlots::default()),
            emitter: Emitter::new(),
        });
        inner.socket.set_handlers(bridge(Rc::downgrade(&inner)));

        Ok(Self { inner })
    }

    /// Transmit `data`. Failures are logged and never returned.
    pub fn send(&self, data: impl Into<MessageData>) {
        self.send_with(data, SendOptions::default(), || {});
    }

    /// Transmit `data`, then run `callback` if the socket accepted it.
    ///
    /// A rejected payload is logged; `callback` is not run and nothing is
    /// returned to the caller.
    pub fn send_with(&self, data: impl Into<MessageData>, options: SendOptions, callback: impl FnOnce()) {
        let mut data = data.into();
        if options.binary {
            if let MessageData::Text(text) = data {
                data = MessageData::ArrayBuffer(text.into_bytes());
            }
        }

        match self.inner.socket.send(data) {
            Ok(()) => callback(),
            Err(e) => log::error!("[WebSocket {}] send failed: {}", self.url(), e),
        }
    }

    /// Start closing the connection. Invalid arguments are returned; calling
    /// again after the first effective close does nothing.
    pub fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<(), CloseError> {
        self.inner.socket.close(code, reason)
    }

    pub fn set_onopen(&self, handler: Option<impl Fn(&OpenEvent) + 'static>) {
        self.inner.slots.borrow_mut().onopen = handler.map(|h| Rc::new(h) as Rc<dyn Fn(&OpenEvent)>);
    }

    pub fn set_onmessage(&self, handler: Option<impl Fn(&MessageData) + 'static>) {
        self.inner.slots.borrow_mut().onmessage =
            handler.map(|h| Rc::new(h) as Rc<dyn Fn(&MessageData)>);
    }

    pub fn set_onerror(&self, handler: Option<impl Fn(&ErrorEvent) + 'static>) {
        self.inner.slots.borrow_mut().onerror = handler.map(|h| Rc::new(h) as Rc<dyn Fn(&ErrorEvent)>);
    }

    pub fn set_onclose(&self, handler: Option<impl Fn(&CloseEvent) + 'static>) {
        self.inner.slots.borrow_mut().onclose = handler.map(|h| Rc::new(h) as Rc<dyn Fn(&CloseEvent)>);
    }

    pub fn has_onopen(&self) -> bool {
        self.inner.slots.borrow().onopen.is_some()
    }

    pub fn has_onmessage(&self) -> bool {
        self.inner.slots.borrow().onmessage.is_some()
    }

    pub fn has_onerror(&self) -> bool {
        self.inner.slots.borrow().onerror.is_some()
    }

    pub fn has_onclose(&self) -> bool {
        self.inner.slots.borrow().onclose.is_some()
    }

    pub fn binary_type(&self) -> BinaryType {
        self.inner.socket.binary_type()
    }

    pub fn set_binary_type(&self, binary_type: BinaryType) {
        self.inner.socket.set_binary_type(binary_type);
    }

    /// Bytes accepted by `send` but not yet written to the network.
    pub fn buffered_amount(&self) -> u64 {
        self.inner.socket.buffered_amount()
    }

    pub fn extensions(&self) -> String {
        self.inner.socket.extensions()
    }

    pub fn protocol(&self) -> String {
        self.inner.socket.protocol()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.socket.ready_state()
    }

    pub fn url(&self) -> String {
        self.inner.socket.url()
    }
}

impl<S: NativeSocket> EventEmitter<SocketEvent> for SocketFacade<S> {
    fn emitter(&self) -> &Emitter<SocketEvent> {
        &self.inner.emitter
    }
}

impl<S: NativeSocket> FacadeInner<S> {
    fn bridge_open(&self, event: OpenEvent) {
        let handler = self.slots.borrow().onopen.clone();
        if let Some(handler) = handler {
            handler(&event);
        }
        self.emitter.emit(events::OPEN, &SocketEvent::Open(event));
    }

    fn bridge_message(&self, event: MessageEvent) {
        let handler = self.slots.borrow().onmessage.clone();
        let event = SocketEvent::Message(event.data);
        if let (Some(handler), SocketEvent::Message(data)) = (handler, &event) {
            handler(data);
        }
        self.emitter.emit(events::MESSAGE, &event);
    }

    fn bridge_error(&self, event: ErrorEvent) {
        let handler = self.slots.borrow().onerror.clone();
        if let Some(handler) = handler {
            handler(&event);
        }
        self.emitter.emit(events::ERROR, &SocketEvent::Error(event));
    }

    fn bridge_close(&self, event: CloseEvent) {
        let handler = self.slots.borrow().onclose.clone();
        if let Some(handler) = handler {
            handler(&event);
        }
        self.emitter.emit(events::CLOSE, &SocketEvent::Close(event));
    }
}

/// The four lifecycle bridges. They hold the facade weakly so a dropped
/// facade simply stops receiving events.
fn bridge<S: NativeSocket>(inner: Weak<FacadeInner<S>>) -> NativeHandlers {
    let open = inner.clone();
    let message = inner.clone();
    let error = inner.clone();
    let close = inner;

    NativeHandlers {
        on_open: Box::new(move |event| {
            if let Some(inner) = open.upgrade() {
                inner.bridge_open(event);
            }
        }),
        on_message: Box::new(move |event| {
            if let Some(inner) = message.upgrade() {
                inner.bridge_message(event);
            }
        }),
        on_error: Box::new(move |event| {
            if let Some(inner) = error.upgrade() {
                inner.bridge_error(event);
            }
        }),
        on_close: Box::new(move |event| {
            if let Some(inner) = close.upgrade() {
                inner.bridge_close(event);
            }
        }),
    }
}
