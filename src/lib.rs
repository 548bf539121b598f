//! # ws_shim
//!
//! A WebSocket client that reports `open`, `message`, `error` and `close`
//! through an event emitter, with browser-style `onopen`/`onmessage`/
//! `onerror`/`onclose` slots that run before the listeners.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use ws_shim::{EventEmitter, EventLoop, Protocols, SocketEvent, SocketFacade, TungsteniteConnector};
//!
//! let event_loop = EventLoop::new();
//! let connector = TungsteniteConnector::new(&event_loop);
//!
//! let ws = SocketFacade::create(&connector, "ws://localhost:8080", None, Protocols::none())?;
//! ws.on("message", |event: &SocketEvent| {
//!     if let Some(data) = event.as_message() {
//!         println!("received {:?}", data);
//!     }
//! });
//!
//! event_loop.run_until(Duration::from_secs(5), || ws.ready_state().code() == ws_shim::OPEN);
//! ws.send("hello");
//! event_loop.run();
//! # Ok::<(), ws_shim::Error>(())
//! ```

pub mod config;
pub mod emitter;
pub mod error;
pub mod event_loop;
pub mod testing;
pub mod websocket;

pub use config::ConnectorConfig;
pub use emitter::{Emitter, EventEmitter, ListenerId};
pub use error::{CloseError, ConfigError, ConnectionError, Error, Result, TransmissionError};
pub use event_loop::{EventLoop, LoopClient, LoopHandle};
pub use websocket::*;
