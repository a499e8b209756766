//! The named-channel event dispatcher (§6). Pub/sub is intentionally the only
//! interface the command buffer talks to: the dispatcher itself has no idea what a
//! "command" or a "system" is.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// A token returned by [`EventDispatcher::add_listener`], used to unsubscribe later.
pub type ListenerId = u64;

type Payload = dyn Any + Send + Sync;
type Listener = Box<dyn Fn(&Payload) + Send + Sync>;

/// Named pub/sub channels. Dispatching to a name nobody subscribed to is silently
/// ignored, per the error taxonomy's "normal control flow" classification.
#[derive(Default)]
pub struct EventDispatcher {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<String, Vec<(ListenerId, Listener)>>>,
}

impl EventDispatcher {
    pub fn add_listener<F>(&self, name: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap()
            .entry(name.into())
            .or_default()
            .push((id, Box::new(callback)));
        id
    }

    /// Removes a previously registered listener. Returns whether it was found.
    pub fn remove_listener(&self, name: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap();
        let Some(list) = listeners.get_mut(name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(candidate, _)| *candidate != id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(name);
        }
        removed
    }

    pub fn dispatch(&self, name: &str, payload: &Payload) {
        if let Some(list) = self.listeners.read().unwrap().get(name) {
            for (_, callback) in list {
                callback(payload);
            }
        }
    }

    /// Dispatches an ordered batch of payloads under one event name with a single
    /// listener-list lookup, as the command buffer's flush does.
    pub fn dispatch_batch(&self, name: &str, payloads: &[Box<Payload>]) {
        let listeners = self.listeners.read().unwrap();
        let Some(list) = listeners.get(name) else {
            return;
        };
        for payload in payloads {
            for (_, callback) in list {
                callback(payload.as_ref());
            }
        }
    }
}
