//! Event Loop Engine
//!
//! Owns the receiving end of the command channel and the registry of sockets
//! signals are routed to. All dispatch happens on the thread that calls
//! `turn`, `run_until` or `run`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::{Duration, Instant};

use super::client::LoopClient;
use super::protocol::{SignalSink, SocketId, SocketSignal};

/// Commands that can be sent to the event loop.
#[derive(Debug)]
pub enum LoopCommand {
    /// Deliver a lifecycle signal to a socket.
    Signal { socket: SocketId, signal: SocketSignal },
    /// Stop `EventLoop::run`.
    Shutdown,
}

/// Static Tokio runtime for network tasks.
pub(crate) static TOKIO: once_cell::sync::Lazy<tokio::runtime::Runtime> =
    once_cell::sync::Lazy::new(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("ws-shim-io")
            .build()
            .expect("Failed to build Tokio runtime")
    });

struct LoopShared {
    client: LoopClient,
    sinks: RefCell<HashMap<SocketId, Weak<dyn SignalSink>>>,
    next_id: Cell<u32>,
}

/// Loop-thread handle used by native sockets to register themselves.
///
/// Not `Send`: sockets and their callbacks live on the loop thread.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Rc<LoopShared>,
}

impl LoopHandle {
    pub fn client(&self) -> LoopClient {
        self.shared.client.clone()
    }

    /// Register a sink and get the id its network task should signal with.
    pub fn register(&self, sink: Weak<dyn SignalSink>) -> SocketId {
        let id = SocketId(self.shared.next_id.get());
        self.shared.next_id.set(id.0.wrapping_add(1));
        self.shared.sinks.borrow_mut().insert(id, sink);
        id
    }

    pub fn unregister(&self, id: SocketId) {
        self.shared.sinks.borrow_mut().remove(&id);
    }

    /// Number of sockets still registered.
    pub fn live_sockets(&self) -> usize {
        self.shared.sinks.borrow().len()
    }
}

/// Single-threaded event loop delivering socket signals in arrival order.
pub struct EventLoop {
    handle: LoopHandle,
    receiver: Receiver<LoopCommand>,
    stopped: Cell<bool>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        let shared = LoopShared {
            client: LoopClient { sender },
            sinks: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
        };

        Self {
            handle: LoopHandle {
                shared: Rc::new(shared),
            },
            receiver,
            stopped: Cell::new(false),
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Get a client handle for pushing commands from other threads.
    pub fn client(&self) -> LoopClient {
        self.handle.client()
    }

    /// Dispatch everything already queued without blocking.
    ///
    /// Returns the number of commands processed.
    pub fn turn(&self) -> usize {
        let mut processed = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(command) => {
                    self.dispatch(command);
                    processed += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        processed
    }

    /// Pump the loop until `done` returns true or `timeout` elapses.
    ///
    /// Returns the final value of `done`.
    pub fn run_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.turn();
            if done() {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            match self.receiver.recv_timeout(deadline - now) {
                Ok(command) => self.dispatch(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return done(),
            }
        }
    }

    /// Pump the loop until every registered socket has closed or a shutdown
    /// was requested through a [`LoopClient`].
    pub fn run(&self) {
        log::info!("Event loop started");
        self.stopped.set(false);

        while !self.stopped.get() && self.handle.live_sockets() > 0 {
            match self.receiver.recv() {
                Ok(command) => self.dispatch(command),
                Err(e) => {
                    log::error!("Event loop channel error: {}", e);
                    break;
                }
            }
        }

        log::info!("Event loop stopped");
    }

    fn dispatch(&self, command: LoopCommand) {
        match command {
            LoopCommand::Signal { socket, signal } => {
                // Upgrade outside the borrow: delivering runs user callbacks.
                let sink = self
                    .handle
                    .shared
                    .sinks
                    .borrow()
                    .get(&socket)
                    .and_then(Weak::upgrade);

                match sink {
                    Some(sink) => sink.deliver(signal),
                    None => {
                        log::debug!("[WebSocket {}] No socket registered, dropping {:?}", socket, signal);
                        self.handle.unregister(socket);
                    }
                }
            }
            LoopCommand::Shutdown => {
                log::info!("Event loop shutting down");
                self.stopped.set(true);
            }
        }
    }
}
