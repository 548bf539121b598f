//! Event Loop Module
//!
//! The single-threaded context lifecycle signals are delivered on. Network
//! tasks run on Tokio worker threads and only talk to the loop through a
//! channel, so every user callback runs on the thread that pumps the loop.

mod client;
mod engine;
mod protocol;

pub use client::LoopClient;
pub use engine::{EventLoop, LoopCommand, LoopHandle};
pub(crate) use engine::TOKIO;
pub use protocol::{Payload, SignalSink, SocketId, SocketSignal};
