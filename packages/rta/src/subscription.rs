//! Live subscriptions and the table that routes push events to them.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;
use crate::protocol::ProtocolError;

/// Receives change notifications for a subscription.
///
/// Handlers run on the connection's read loop. Every frame behind the one
/// being handled waits until the handler returns, so anything slow must be
/// handed off to another task.
pub trait SubscriptionHandler: Send + Sync {
    fn handle_change(&self, resource: &str, branch: Uuid, change_number: u64);
}

impl<F> SubscriptionHandler for F
where
    F: Fn(&str, Uuid, u64) + Send + Sync,
{
    fn handle_change(&self, resource: &str, branch: Uuid, change_number: u64) {
        self(resource, branch, change_number)
    }
}

/// Ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopHandler;

impl SubscriptionHandler for NopHandler {
    fn handle_change(&self, _: &str, _: Uuid, _: u64) {}
}

/// A live interest in one resource, valid from a successful subscribe
/// handshake until it is unsubscribed or the connection goes away.
pub struct Subscription {
    id: u32,
    resource: String,
    data: Value,
    handler: RwLock<Arc<dyn SubscriptionHandler>>,
}

impl Subscription {
    pub(crate) fn new(
        id: u32,
        resource: String,
        data: Value,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Self {
        Self {
            id,
            resource,
            data,
            handler: RwLock::new(handler),
        }
    }

    /// Server-assigned identifier; push events name the subscription by it.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Custom data the server attached to the subscribe reply.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Replace the handler. Dispatches already in flight finish with the
    /// handler they started with.
    pub fn handle(&self, handler: Arc<dyn SubscriptionHandler>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    pub(crate) fn handler(&self) -> Arc<dyn SubscriptionHandler> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

/// Subscriptions keyed by server-assigned id. `None` once the connection
/// has been torn down, after which nothing can be registered.
pub(crate) struct SubscriptionTable {
    entries: Mutex<Option<HashMap<u32, Arc<Subscription>>>>,
}

impl SubscriptionTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Some(HashMap::new())),
        }
    }

    /// Register `sub`. A live subscription already holding the same id is
    /// kept and the newcomer refused.
    pub(crate) fn insert(&self, sub: Arc<Subscription>) -> Result<(), Error> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let map = entries.as_mut().ok_or(Error::ConnectionClosed)?;
        match map.entry(sub.id()) {
            Entry::Occupied(_) => Err(ProtocolError::DuplicateSubscription(sub.id()).into()),
            Entry::Vacant(slot) => {
                slot.insert(sub);
                Ok(())
            }
        }
    }

    pub(crate) fn get(&self, id: u32) -> Option<Arc<Subscription>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.as_ref().and_then(|map| map.get(&id).cloned())
    }

    pub(crate) fn remove(&self, id: u32) -> Option<Arc<Subscription>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.as_mut().and_then(|map| map.remove(&id))
    }

    /// Close the table, returning how many subscriptions were dropped.
    pub(crate) fn close(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.take().map_or(0, |map| map.len())
    }

    pub(crate) fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.as_ref().map_or(0, HashMap::len)
    }
}
