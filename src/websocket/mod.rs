//! WebSocket Implementation
//!
//! A browser-style WebSocket facade over an injected native socket, plus the
//! default native socket built on tokio-tungstenite.

mod facade;
mod manager;
mod native;
mod types;

pub use facade::{SocketFacade, events};
pub use native::{NativeHandlers, NativeSocket, SocketFactory, TungsteniteConnector, TungsteniteSocket};
pub use types::*;
