use std::sync::Arc;

use rta::Conn;
use uuid::Uuid;

use crate::activity::ActivityHandle;
use crate::description::SessionDescription;
use crate::error::Error;
use crate::reference::SessionReference;
use crate::session::{PublishConfig, Session, Target};

/// Joins sessions found through activity handles.
#[derive(Clone)]
pub struct JoinConfig {
    pub publish: PublishConfig,
}

impl JoinConfig {
    pub fn new(publish: PublishConfig) -> Self {
        Self { publish }
    }

    /// Join the session behind `handle_id`, committing `description` through
    /// the handle. `reference` names the session for change routing and the
    /// later commits of the returned [`Session`]. No activity is announced.
    pub async fn join_handle(
        &self,
        conn: Arc<Conn>,
        handle_id: Uuid,
        reference: SessionReference,
        description: SessionDescription,
    ) -> Result<Session, Error> {
        self.publish
            .publish_to(conn, Target::Handle(handle_id), reference, description)
            .await
    }

    /// Join the session a search result points at.
    pub async fn join_activity(
        &self,
        conn: Arc<Conn>,
        handle: &ActivityHandle,
        description: SessionDescription,
    ) -> Result<Session, Error> {
        let id = handle.id.ok_or(Error::MissingHandleId)?;
        self.join_handle(conn, id, handle.session_reference.clone(), description)
            .await
    }
}
