//! Sequence numbers and the tables of handshakes awaiting a reply.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::error::Error;
use crate::subscription::{Subscription, SubscriptionHandler};

/// Hands out sequence numbers for one connection. Starts at 1.
#[derive(Debug)]
pub(crate) struct SequenceAllocator {
    next: AtomicU32,
}

impl SequenceAllocator {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    pub(crate) fn next(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// What the caller asked for; the dispatcher needs it to finish the job.
pub(crate) enum Intent {
    Subscribe {
        resource: String,
        handler: Arc<dyn SubscriptionHandler>,
    },
    Unsubscribe,
}

/// What the dispatcher hands the caller. A completed subscribe carries its
/// subscription, already registered for push routing; an unsubscribe
/// carries nothing.
pub(crate) type Delivery = Result<Option<Arc<Subscription>>, Error>;

/// One outstanding handshake.
pub(crate) struct Slot {
    pub(crate) intent: Intent,
    pub(crate) tx: oneshot::Sender<Delivery>,
}

/// Outstanding handshakes of one request kind, keyed by sequence number.
///
/// Removal goes through [`PendingTable::take`] for both the dispatcher and
/// an abandoning caller, so exactly one of them ends up owning the slot.
pub(crate) struct PendingTable {
    slots: Mutex<Option<HashMap<u32, Slot>>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(Some(HashMap::new())),
        }
    }

    pub(crate) fn insert(&self, seq: u32, slot: Slot) -> Result<(), Error> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let map = slots.as_mut().ok_or(Error::ConnectionClosed)?;
        map.insert(seq, slot);
        Ok(())
    }

    pub(crate) fn take(&self, seq: u32) -> Option<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.as_mut().and_then(|map| map.remove(&seq))
    }

    /// Close the table and hand back whatever was still waiting.
    pub(crate) fn close(&self) -> Vec<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .take()
            .map(|map| map.into_values().collect())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.as_ref().map_or(0, HashMap::len)
    }
}
