//! The multiplexed connection.
//!
//! One read loop task per connection decodes every inbound frame and routes
//! it: handshake replies complete the caller waiting in the matching
//! pending table, events go to the handler of the named subscription.
//! Callers share the write half behind a mutex, one frame per send.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RtaConfig;
use crate::error::Error;
use crate::pending::{Delivery, Intent, PendingTable, SequenceAllocator, Slot};
use crate::protocol::{self, Inbound, ProtocolError, Reply, RequestKind};
use crate::subscription::{Subscription, SubscriptionHandler, SubscriptionTable};

type FrameSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;

/// A connection to the real-time activity service.
///
/// Dropping the connection tears it down like [`Conn::close`] does, minus
/// the close frame.
pub struct Conn {
    shared: Arc<Shared>,
}

struct Shared {
    writer: Mutex<FrameSink>,
    sequence: SequenceAllocator,
    expected: [PendingTable; 2],
    subscriptions: SubscriptionTable,
    handshake_timeout: Duration,
    /// Fired to stop the read loop.
    shutdown: CancellationToken,
    /// Fired once teardown has completed.
    closed: CancellationToken,
}

/// How long a caller is willing to wait for a reply.
#[derive(Clone, Copy)]
enum Deadline<'a> {
    After(Duration),
    Token(&'a CancellationToken),
}

impl Deadline<'_> {
    async fn expired(self) -> Error {
        match self {
            Deadline::After(timeout) => {
                tokio::time::sleep(timeout).await;
                Error::Timeout(timeout)
            }
            Deadline::Token(token) => {
                token.cancelled().await;
                Error::Cancelled
            }
        }
    }
}

impl Conn {
    /// Run a connection over an already upgraded WebSocket. Spawns the read
    /// loop, so it must be called from within a Tokio runtime.
    pub fn from_stream<S>(ws: WebSocketStream<S>, config: &RtaConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let sink: FrameSink = Box::pin(sink);
        let shared = Arc::new(Shared {
            writer: Mutex::new(sink),
            sequence: SequenceAllocator::new(),
            expected: [PendingTable::new(), PendingTable::new()],
            subscriptions: SubscriptionTable::new(),
            handshake_timeout: config.handshake_timeout(),
            shutdown: CancellationToken::new(),
            closed: CancellationToken::new(),
        });

        tokio::spawn(read_loop(shared.clone(), stream));

        Self { shared }
    }

    /// Subscribe to `resource`, waiting at most the configured handshake
    /// timeout for the reply.
    pub async fn subscribe(
        &self,
        resource: impl Into<String>,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<Arc<Subscription>, Error> {
        let deadline = Deadline::After(self.shared.handshake_timeout);
        self.shared.subscribe(resource.into(), handler, deadline).await
    }

    /// Subscribe to `resource`, giving up with [`Error::Cancelled`] when
    /// `cancel` fires.
    pub async fn subscribe_with_cancel(
        &self,
        resource: impl Into<String>,
        handler: Arc<dyn SubscriptionHandler>,
        cancel: &CancellationToken,
    ) -> Result<Arc<Subscription>, Error> {
        self.shared
            .subscribe(resource.into(), handler, Deadline::Token(cancel))
            .await
    }

    /// Stop receiving events for `sub` and tell the server so.
    ///
    /// The subscription stops routing events as soon as this is called,
    /// whatever the server answers.
    pub async fn unsubscribe(&self, sub: &Subscription) -> Result<(), Error> {
        let deadline = Deadline::After(self.shared.handshake_timeout);
        self.shared.unsubscribe(sub.id(), deadline).await
    }

    pub async fn unsubscribe_with_cancel(
        &self,
        sub: &Subscription,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        self.shared
            .unsubscribe(sub.id(), Deadline::Token(cancel))
            .await
    }

    /// Tear the connection down. Outstanding requests fail with
    /// [`Error::ConnectionClosed`]. Calling this more than once is harmless.
    pub async fn close(&self) {
        self.shared.teardown();
        let mut writer = self.shared.writer.lock().await;
        if let Err(e) = writer.close().await {
            debug!(error = %e, "rta close frame not delivered");
        }
    }

    /// Resolves once the connection has been torn down, by either side.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.len()
    }

    /// Number of handshakes of `kind` still waiting for a reply.
    pub fn pending_count(&self, kind: RequestKind) -> usize {
        self.shared.table(kind).len()
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

impl Shared {
    fn table(&self, kind: RequestKind) -> &PendingTable {
        &self.expected[kind.index()]
    }

    async fn subscribe(
        self: &Arc<Self>,
        resource: String,
        handler: Arc<dyn SubscriptionHandler>,
        deadline: Deadline<'_>,
    ) -> Result<Arc<Subscription>, Error> {
        let seq = self.sequence.next();
        let frame = protocol::encode_subscribe(seq, &resource);
        let intent = Intent::Subscribe { resource, handler };
        self.request(RequestKind::Subscribe, seq, frame, intent, deadline)
            .await?
            .ok_or_else(|| Error::Protocol(ProtocolError::Field {
                index: 3,
                field: "subscription id",
            }))
    }

    async fn unsubscribe(self: &Arc<Self>, id: u32, deadline: Deadline<'_>) -> Result<(), Error> {
        if self.closed.is_cancelled() {
            return Err(Error::ConnectionClosed);
        }
        if self.subscriptions.remove(id).is_none() {
            return Err(Error::NotSubscribed(id));
        }
        self.send_unsubscribe(id, deadline).await
    }

    async fn send_unsubscribe(
        self: &Arc<Self>,
        id: u32,
        deadline: Deadline<'_>,
    ) -> Result<(), Error> {
        let seq = self.sequence.next();
        let frame = protocol::encode_unsubscribe(seq, id);
        self.request(RequestKind::Unsubscribe, seq, frame, Intent::Unsubscribe, deadline)
            .await
            .map(|_| ())
    }

    /// Register a slot, send the request and wait for whichever comes first:
    /// the reply, a send failure, or the deadline.
    async fn request(
        self: &Arc<Self>,
        kind: RequestKind,
        seq: u32,
        frame: String,
        intent: Intent,
        deadline: Deadline<'_>,
    ) -> Delivery {
        let (tx, rx) = oneshot::channel();
        self.table(kind).insert(seq, Slot { intent, tx })?;
        let mut waiter = Waiter {
            shared: self,
            kind,
            seq,
            rx,
        };

        debug!(%kind, seq, "sending rta request");
        let exchange = async {
            self.send(frame).await?;
            (&mut waiter.rx)
                .await
                .unwrap_or(Err(Error::ConnectionClosed))
        };

        tokio::select! {
            delivery = exchange => delivery,
            err = deadline.expired() => Err(err),
        }
    }

    async fn send(&self, frame: String) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(frame.into()))
            .await
            .map_err(Error::Send)
    }

    fn dispatch(self: &Arc<Self>, text: &str) {
        match protocol::decode(text) {
            Ok(Inbound::Reply(reply)) => self.complete(reply),
            Ok(Inbound::Event {
                subscription_id,
                data,
            }) => self.deliver(subscription_id, &data),
            Ok(Inbound::Resync) => warn!("rta server requested resync; ignoring"),
            Err(e) => warn!(error = %e, frame = text, "skipping malformed rta frame"),
        }
    }

    fn complete(self: &Arc<Self>, reply: Reply) {
        let Some(slot) = self.table(reply.kind).take(reply.seq) else {
            debug!(kind = %reply.kind, seq = reply.seq, "discarding reply with no waiter");
            return;
        };

        let delivery = if !reply.status.is_success() {
            Err(Error::Rejected {
                kind: reply.kind,
                status: reply.status,
                message: reply.message,
            })
        } else {
            match (slot.intent, reply.subscription_id) {
                (Intent::Subscribe { resource, handler }, Some(id)) => {
                    let sub = Arc::new(Subscription::new(id, resource, reply.data, handler));
                    match self.subscriptions.insert(sub.clone()) {
                        Ok(()) => {
                            debug!(seq = reply.seq, subscription_id = id, "subscribed");
                            Ok(Some(sub))
                        }
                        Err(Error::ConnectionClosed) => Err(Error::ConnectionClosed),
                        Err(e) => {
                            warn!(
                                seq = reply.seq,
                                subscription_id = id,
                                error = %e,
                                "refusing subscribe reply"
                            );
                            Err(e)
                        }
                    }
                }
                (Intent::Unsubscribe, _) => Ok(None),
                (Intent::Subscribe { .. }, None) => Err(Error::Protocol(ProtocolError::Field {
                    index: 3,
                    field: "subscription id",
                })),
            }
        };

        if let Err(Ok(Some(sub))) = slot.tx.send(delivery) {
            self.release_orphan(sub);
        }
    }

    fn deliver(&self, subscription_id: u32, data: &serde_json::Value) {
        let Some(sub) = self.subscriptions.get(subscription_id) else {
            debug!(subscription_id, "dropping event for unknown subscription");
            return;
        };
        let taps = match protocol::shoulder_taps(data) {
            Ok(taps) => taps,
            Err(e) => {
                warn!(subscription_id, error = %e, "skipping malformed rta event");
                return;
            }
        };
        for tap in taps {
            sub.handler()
                .handle_change(&tap.resource, tap.branch, tap.change_number);
        }
    }

    /// A subscription was registered but its caller had already gone. Take
    /// it back out and let the server know in the background.
    fn release_orphan(self: &Arc<Self>, sub: Arc<Subscription>) {
        let id = sub.id();
        if self.subscriptions.remove(id).is_none() {
            return;
        }
        debug!(subscription_id = id, "releasing subscription abandoned by its caller");
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let shared = self.clone();
        runtime.spawn(async move {
            let deadline = Deadline::After(shared.handshake_timeout);
            if let Err(e) = shared.send_unsubscribe(id, deadline).await {
                debug!(subscription_id = id, error = %e, "background unsubscribe failed");
            }
        });
    }

    /// Fail everything still waiting and forget every subscription.
    fn teardown(&self) {
        self.shutdown.cancel();
        let mut failed = 0usize;
        for table in &self.expected {
            for slot in table.close() {
                let _ = slot.tx.send(Err(Error::ConnectionClosed));
                failed += 1;
            }
        }
        let dropped = self.subscriptions.close();
        if !self.closed.is_cancelled() {
            info!(failed, dropped, "rta connection closed");
            self.closed.cancel();
        }
    }
}

/// The caller's claim on a pending slot. Dropping it, whether the caller
/// finished, failed to send, or was cancelled, races the dispatcher for the
/// slot through the table's single removal.
struct Waiter<'a> {
    shared: &'a Arc<Shared>,
    kind: RequestKind,
    seq: u32,
    rx: oneshot::Receiver<Delivery>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.shared.table(self.kind).take(self.seq).is_some() {
            debug!(kind = %self.kind, seq = self.seq, "abandoned pending request");
            return;
        }
        // The dispatcher won. If we never looked at what it delivered, a
        // fresh subscription would be left registered with nobody holding it.
        if let Ok(Ok(Some(sub))) = self.rx.try_recv() {
            self.shared.release_orphan(sub);
        }
    }
}

async fn read_loop<S>(
    shared: Arc<Shared>,
    mut stream: futures::stream::SplitStream<WebSocketStream<S>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    info!("rta read loop started");
    loop {
        let msg = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            msg = stream.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => shared.dispatch(text.as_str()),
            Some(Ok(Message::Binary(_))) => {
                warn!(error = %ProtocolError::Binary, "skipping malformed rta frame");
            }
            Some(Ok(Message::Close(frame))) => {
                info!(?frame, "rta server closed the connection");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "rta read failed");
                break;
            }
            None => break,
        }
    }
    shared.teardown();
    info!("rta read loop exited");
}
