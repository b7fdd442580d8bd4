// SPDX-License-Identifier: MIT

//! Status-keyed publish/subscribe
//!
//! `EventBus` is a dispatch table from [`Status`] to an ordered list of
//! listeners. `publish` runs every listener registered for the status
//! synchronously on the calling task. Listeners may publish again; the
//! table lock is never held while a listener runs.

use crate::core::status::Status;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// An event delivered to listeners
#[derive(Debug, Clone)]
pub struct Event<T> {
    pub value: T,
    pub status: Status,
}

impl<T> Event<T> {
    pub fn new(value: T, status: Status) -> Self {
        Self { value, status }
    }
}

/// Listener callback
pub type Listener<T> = Arc<dyn Fn(&Event<T>) + Send + Sync>;

/// Dispatch table of listeners keyed by status
pub struct EventBus<T> {
    listeners: RwLock<HashMap<Status, Vec<Listener<T>>>>,
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Register a listener for one status. Listeners for the same status run
    /// in registration order.
    pub fn add_listener<F>(&self, status: Status, listener: F)
    where
        F: Fn(&Event<T>) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.entry(status).or_default().push(Arc::new(listener));
    }

    /// Deliver `value` to every listener registered for `status`.
    ///
    /// Returns the number of listeners invoked.
    pub fn publish(&self, value: T, status: Status) -> usize {
        let targets: Vec<Listener<T>> = {
            let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            match listeners.get(&status) {
                Some(list) => list.clone(),
                None => {
                    log::debug!("No listener registered for status {}", status);
                    return 0;
                }
            }
        };

        let event = Event::new(value, status);
        for listener in &targets {
            listener(&event);
        }
        targets.len()
    }

    /// Number of listeners registered for `status`
    pub fn listener_count(&self, status: Status) -> usize {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        listeners.get(&status).map_or(0, Vec::len)
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
