use std::sync::mpsc;

use crate::event_loop::{LoopCommand, SocketId, SocketSignal};

/// Client handle for pushing work onto an event loop.
///
/// Cheap to clone and `Send`, so network tasks on other threads hold one.
#[derive(Clone, Debug)]
pub struct LoopClient {
    pub(crate) sender: mpsc::Sender<LoopCommand>,
}

impl LoopClient {
    /// Queue a lifecycle signal for the given socket.
    pub fn signal(&self, socket: SocketId, signal: SocketSignal) {
        if let Err(e) = self.sender.send(LoopCommand::Signal { socket, signal }) {
            log::warn!("[WebSocket {}] Event loop is gone, dropping signal: {:?}", socket, e.0);
        }
    }

    /// Stop `EventLoop::run` after the commands already queued.
    pub fn shutdown(&self) {
        let _ = self.sender.send(LoopCommand::Shutdown);
    }
}
