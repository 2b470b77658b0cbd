use std::sync::{Arc, PoisonError, RwLock};

use rta::SubscriptionHandler;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::reference::SessionReference;

/// Reacts to changes of a published session. Runs on the RTA read loop, so
/// it must not block.
pub trait Handler: Send + Sync {
    fn handle_session_change(&self, reference: &SessionReference, branch: Uuid, change_number: u64);
}

impl<F> Handler for F
where
    F: Fn(&SessionReference, Uuid, u64) + Send + Sync,
{
    fn handle_session_change(
        &self,
        reference: &SessionReference,
        branch: Uuid,
        change_number: u64,
    ) {
        self(reference, branch, change_number)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NopHandler;

impl Handler for NopHandler {
    fn handle_session_change(&self, _: &SessionReference, _: Uuid, _: u64) {}
}

/// Bridges the connection subscription to the session handler currently
/// installed on one session.
pub(crate) struct SessionTaps {
    reference: SessionReference,
    handler: RwLock<Arc<dyn Handler>>,
}

impl SessionTaps {
    pub(crate) fn new(reference: SessionReference) -> Self {
        Self {
            reference,
            handler: RwLock::new(Arc::new(NopHandler)),
        }
    }

    pub(crate) fn replace(&self, handler: Arc<dyn Handler>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    fn current(&self) -> Arc<dyn Handler> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SubscriptionHandler for SessionTaps {
    fn handle_change(&self, resource: &str, branch: Uuid, change_number: u64) {
        let reference: SessionReference = match resource.parse() {
            Ok(r) => r,
            Err(e) => {
                warn!(resource, error = %e, "dropping change for unrecognised resource");
                return;
            }
        };
        if !self.reference.matches(&reference) {
            debug!(%reference, "dropping change for another session");
            return;
        }
        self.current()
            .handle_session_change(&reference, branch, change_number);
    }
}
