//! Event Emitter
//!
//! A single-threaded listener registry keyed by event name. Listeners for a
//! name run in registration order. `emit` snapshots the listener list first,
//! so listeners added while an event is being dispatched only see later
//! emissions.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Identifies one registered listener so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener<E> {
    id: ListenerId,
    callback: Rc<dyn Fn(&E)>,
    once: bool,
}

impl<E> Clone for Listener<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            callback: self.callback.clone(),
            once: self.once,
        }
    }
}

/// Listener registry for events carrying a payload of type `E`.
pub struct Emitter<E> {
    // Kept as a list so event names come back in first-registration order.
    listeners: RefCell<Vec<(String, Vec<Listener<E>>)>>,
    next_id: Cell<u64>,
}

impl<E> Default for Emitter<E> {
    fn default() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        }
    }
}

impl<E> Emitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener for `event`.
    pub fn on(&self, event: &str, listener: impl Fn(&E) + 'static) -> ListenerId {
        self.add(event, Rc::new(listener), false)
    }

    /// Add a listener that is removed right before its first invocation.
    pub fn once(&self, event: &str, listener: impl Fn(&E) + 'static) -> ListenerId {
        self.add(event, Rc::new(listener), true)
    }

    /// Remove a single listener. Returns false if it was not registered.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let Some(index) = listeners.iter().position(|(name, _)| name == event) else {
            return false;
        };

        let entry = &mut listeners[index].1;
        let before = entry.len();
        entry.retain(|listener| listener.id != id);
        let removed = entry.len() != before;

        if entry.is_empty() {
            listeners.remove(index);
        }
        removed
    }

    /// Remove every listener for `event`, or every listener at all when `None`.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut listeners = self.listeners.borrow_mut();
        match event {
            Some(event) => listeners.retain(|(name, _)| name != event),
            None => listeners.clear(),
        }
    }

    /// Call every listener for `event` with `payload`.
    ///
    /// Returns true if the event had listeners.
    pub fn emit(&self, event: &str, payload: &E) -> bool {
        let snapshot: Vec<Listener<E>> = {
            let mut listeners = self.listeners.borrow_mut();
            let Some(index) = listeners.iter().position(|(name, _)| name == event) else {
                return false;
            };

            let snapshot = listeners[index].1.clone();
            listeners[index].1.retain(|listener| !listener.once);
            if listeners[index].1.is_empty() {
                listeners.remove(index);
            }
            snapshot
        };

        // The registry borrow is released here so listeners may subscribe,
        // unsubscribe or emit without tripping the RefCell.
        for listener in &snapshot {
            (listener.callback)(payload);
        }
        !snapshot.is_empty()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .borrow()
            .iter()
            .find(|(name, _)| name == event)
            .map(|(_, listeners)| listeners.len())
            .unwrap_or(0)
    }

    /// Names that currently have at least one listener.
    pub fn event_names(&self) -> Vec<String> {
        self.listeners
            .borrow()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn add(&self, event: &str, callback: Rc<dyn Fn(&E)>, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let listener = Listener { id, callback, once };
        let mut listeners = self.listeners.borrow_mut();
        match listeners.iter_mut().find(|(name, _)| name == event) {
            Some((_, entry)) => entry.push(listener),
            None => listeners.push((event.to_string(), vec![listener])),
        }
        id
    }
}

/// The subscribe/unsubscribe/emit capability, for types that embed an [`Emitter`].
pub trait EventEmitter<E> {
    fn emitter(&self) -> &Emitter<E>;

    fn on(&self, event: &str, listener: impl Fn(&E) + 'static) -> ListenerId {
        self.emitter().on(event, listener)
    }

    fn once(&self, event: &str, listener: impl Fn(&E) + 'static) -> ListenerId {
        self.emitter().once(event, listener)
    }

    fn off(&self, event: &str, id: ListenerId) -> bool {
        self.emitter().off(event, id)
    }

    fn emit(&self, event: &str, payload: &E) -> bool {
        self.emitter().emit(event, payload)
    }

    fn remove_all_listeners(&self, event: Option<&str>) {
        self.emitter().remove_all_listeners(event)
    }

    fn listener_count(&self, event: &str) -> usize {
        self.emitter().listener_count(event)
    }

    fn event_names(&self) -> Vec<String> {
        self.emitter().event_names()
    }
}

impl<E> EventEmitter<E> for Emitter<E> {
    fn emitter(&self) -> &Emitter<E> {
        self
    }
}
