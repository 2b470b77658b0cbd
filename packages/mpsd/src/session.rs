use std::sync::Arc;

use rta::{Conn, Subscription, SubscriptionHandler};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::description::{
    CHANGE_TYPE_EVERYTHING, Commit, MemberSubscription, SessionDescription,
};
use crate::error::Error;
use crate::handler::{Handler, SessionTaps};
use crate::reference::SessionReference;
use crate::store::SessionStore;

/// RTA resource that delivers change notifications for every session the
/// caller is a member of.
pub const CONNECTIONS_RESOURCE: &str = "https://sessiondirectory.xboxlive.com/connections/";

/// Publishes sessions over an existing RTA connection.
#[derive(Clone)]
pub struct PublishConfig {
    pub store: SessionStore,
}

impl PublishConfig {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// Subscribe to session changes on `conn`, commit `description` with the
    /// caller's member bound to that subscription, then announce the session
    /// as the caller's activity.
    ///
    /// On failure after the subscription was made it is released again
    /// best-effort. A failed activity commit also leaves the session.
    pub async fn publish(
        &self,
        conn: Arc<Conn>,
        reference: SessionReference,
        description: SessionDescription,
    ) -> Result<Session, Error> {
        let session = self
            .publish_to(conn, Target::Session, reference, description)
            .await?;
        if let Err(e) = self.store.commit_activity(&session.reference).await {
            if let Err(leave) = session.close().await {
                warn!(session = %session.reference, error = %leave, "failed to leave session");
            }
            return Err(e);
        }
        Ok(session)
    }

    pub(crate) async fn publish_to(
        &self,
        conn: Arc<Conn>,
        target: Target,
        reference: SessionReference,
        mut description: SessionDescription,
    ) -> Result<Session, Error> {
        let taps = Arc::new(SessionTaps::new(reference.clone()));
        let sub = conn
            .subscribe(CONNECTIONS_RESOURCE, taps.clone() as Arc<dyn SubscriptionHandler>)
            .await?;

        let Some(connection_id) = connection_id(sub.data()) else {
            release(&conn, &sub).await;
            return Err(Error::MissingConnectionId);
        };
        join(&mut description, connection_id);

        let committed = match target {
            Target::Session => self.store.commit(&reference, &description).await,
            Target::Handle(id) => self.store.commit_handle(id, &description).await,
        };
        if let Err(e) = committed {
            release(&conn, &sub).await;
            return Err(e);
        }
        info!(session = %reference, %connection_id, "published session");

        Ok(Session {
            conn,
            store: self.store.clone(),
            reference,
            sub,
            taps,
        })
    }
}

/// Where the first commit of a published session goes.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Target {
    Session,
    /// The session an activity handle points at.
    Handle(Uuid),
}

fn connection_id(data: &Value) -> Option<Uuid> {
    data.get("ConnectionId")?.as_str()?.parse().ok()
}

fn join(description: &mut SessionDescription, connection_id: Uuid) {
    let me = description
        .members
        .entry("me".to_string())
        .or_default()
        .get_or_insert_with(Default::default);
    let system = me
        .properties
        .get_or_insert_with(Default::default)
        .system
        .get_or_insert_with(Default::default);
    system.active = true;
    system.connection = Some(connection_id);
    system.subscription = Some(MemberSubscription {
        id: Uuid::new_v4().to_string(),
        change_types: vec![CHANGE_TYPE_EVERYTHING.to_string()],
    });
}

async fn release(conn: &Conn, sub: &Subscription) {
    if let Err(e) = conn.unsubscribe(sub).await {
        warn!(subscription_id = sub.id(), error = %e, "failed to release session subscription");
    }
}

/// A session the caller has joined and is receiving changes for.
pub struct Session {
    conn: Arc<Conn>,
    store: SessionStore,
    reference: SessionReference,
    sub: Arc<Subscription>,
    taps: Arc<SessionTaps>,
}

impl Session {
    pub fn reference(&self) -> &SessionReference {
        &self.reference
    }

    /// Install `handler` for change notifications of this session, replacing
    /// the previous one. Pass [`crate::NopHandler`] to stop receiving them.
    pub fn handle(&self, handler: Arc<dyn Handler>) {
        self.taps.replace(handler);
    }

    pub async fn query(&self) -> Result<Commit, Error> {
        self.store.query(&self.reference).await
    }

    pub async fn commit(&self, description: &SessionDescription) -> Result<Option<Commit>, Error> {
        self.store.commit(&self.reference, description).await
    }

    /// Stop listening and leave the session. Only the leave commit can fail
    /// the call; a failed unsubscribe is logged.
    pub async fn close(&self) -> Result<(), Error> {
        if let Err(e) = self.conn.unsubscribe(&self.sub).await {
            error!(session = %self.reference, error = %e, "failed to unsubscribe session");
        }
        self.store
            .commit(&self.reference, &SessionDescription::leave())
            .await?;
        info!(session = %self.reference, "left session");
        Ok(())
    }
}
