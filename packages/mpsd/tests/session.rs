//! Session publishing against a local directory stand-in (axum) and a
//! scripted RTA peer over an in-memory WebSocket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use futures::{SinkExt, StreamExt};
use mpsd::{
    ActivityFilter, ActivityHandle, Error, Handler, JoinConfig, NopHandler, PublishConfig,
    SessionDescription, SessionReference, SessionStore,
};
use rta::{Conn, DisplayClaims, RtaConfig, StaticTokenSource, Token, Uuid};
use serde_json::{Value, json};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;

/// Timeout for each async operation in tests.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const SCID: &str = "4fc10100-5f7a-4470-899b-280835760c07";
const HANDLE_ID: &str = "8d3f4f0e-1d0b-4e0a-9b5e-3a6c0f5d2e11";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// --- directory stand-in ---

#[derive(Debug, Clone)]
struct Put {
    name: String,
    authorization: String,
    contract_version: String,
    body: Value,
}

#[derive(Default)]
struct Directory {
    puts: Mutex<Vec<Put>>,
    activities: Mutex<Vec<Value>>,
    searches: Mutex<Vec<(Option<String>, Value)>>,
}

impl Directory {
    fn puts(&self) -> Vec<Put> {
        self.puts.lock().unwrap().clone()
    }

    fn activities(&self) -> Vec<Value> {
        self.activities.lock().unwrap().clone()
    }

    fn searches(&self) -> Vec<(Option<String>, Value)> {
        self.searches.lock().unwrap().clone()
    }
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn commit_body(name: &str, body: Value) -> Value {
    let mut commit = json!({
        "contractVersion": 107,
        "branch": "5b5c1a4e-3c1c-4c4b-9c7e-0d5b6a2f9e11",
        "changeNumber": 1,
        "name": name,
    });
    if let Some(members) = body.get("members") {
        commit["members"] = members.clone();
    }
    commit
}

async fn put_session(
    State(dir): State<Arc<Directory>>,
    Path((_scid, _template, name)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    dir.puts.lock().unwrap().push(Put {
        name: name.clone(),
        authorization: header(&headers, "authorization"),
        contract_version: header(&headers, "x-xbl-contract-version"),
        body: body.clone(),
    });
    if name == "broken" {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    if body["members"]["me"].is_null() {
        return StatusCode::NO_CONTENT.into_response();
    }
    (StatusCode::CREATED, Json(commit_body(&name, body))).into_response()
}

async fn put_handle_session(
    State(dir): State<Arc<Directory>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let name = format!("handle:{id}");
    dir.puts.lock().unwrap().push(Put {
        name: name.clone(),
        authorization: header(&headers, "authorization"),
        contract_version: header(&headers, "x-xbl-contract-version"),
        body: body.clone(),
    });
    (StatusCode::OK, Json(commit_body(&name, body))).into_response()
}

async fn post_activity(State(dir): State<Arc<Directory>>, Json(body): Json<Value>) -> Response {
    dir.activities.lock().unwrap().push(body.clone());
    if body["sessionRef"]["name"] == "nohandle" {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn search_handles(
    State(dir): State<Arc<Directory>>,
    RawQuery(query): RawQuery,
    Json(body): Json<Value>,
) -> Response {
    dir.searches.lock().unwrap().push((query, body));
    Json(json!({"results": [{
        "type": "activity",
        "id": HANDLE_ID,
        "version": 1,
        "ownerXuid": "7777",
        "createTime": "2024-05-01T10:00:00Z",
        "sessionRef": {"scid": SCID, "templateName": "Lobby", "name": "abc"},
        "relatedInfo": {"visibility": "open", "maxMembersCount": 8},
    }]}))
    .into_response()
}

async fn get_session(Path((_scid, _template, name)): Path<(String, String, String)>) -> Response {
    if name == "gone" {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(commit_body(&name, json!({}))).into_response()
}

async fn serve_directory() -> (String, Arc<Directory>) {
    let dir = Arc::new(Directory::default());
    let app = Router::new()
        .route(
            "/serviceconfigs/{scid}/sessionTemplates/{template}/sessions/{name}",
            get(get_session).put(put_session),
        )
        .route("/handles", post(post_activity))
        .route("/handles/query", post(search_handles))
        .route("/handles/{id}/session", put(put_handle_session))
        .with_state(dir.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), dir)
}

// --- RTA peer ---

struct Peer {
    ws: WebSocketStream<DuplexStream>,
}

impl Peer {
    async fn recv(&mut self) -> Value {
        loop {
            match timeout(TEST_TIMEOUT, self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    return serde_json::from_str(text.as_str()).expect("client sent invalid json");
                }
                Ok(Some(Ok(_))) => continue,
                other => panic!("peer did not receive a request: {other:?}"),
            }
        }
    }

    async fn send(&mut self, frame: Value) {
        self.ws
            .send(Message::Text(frame.to_string().into()))
            .await
            .expect("peer send failed");
    }

    async fn accept_subscribe(&mut self, id: u32, data: Value) -> Value {
        let req = self.recv().await;
        assert_eq!(req[0], 1, "expected a subscribe request, got {req}");
        self.send(json!([1, req[1], 0, id, data])).await;
        req
    }

    async fn answer_unsubscribe(&mut self, status: u64) -> Value {
        let req = self.recv().await;
        assert_eq!(req[0], 2, "expected an unsubscribe request, got {req}");
        self.send(json!([2, req[1], status])).await;
        req
    }
}

async fn connect() -> (Arc<Conn>, Peer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
    (
        Arc::new(Conn::from_stream(client, &RtaConfig::default())),
        Peer { ws: server },
    )
}

struct Fixture {
    conn: Arc<Conn>,
    peer: Peer,
    dir: Arc<Directory>,
    config: PublishConfig,
}

async fn fixture() -> Fixture {
    init_tracing();
    let (base_url, dir) = serve_directory().await;
    let (conn, peer) = connect().await;
    let src = Arc::new(StaticTokenSource::new(Token::new(
        "secret",
        DisplayClaims {
            user_hash: "uhs1".into(),
            xuid: "2535".into(),
            ..Default::default()
        },
    )));
    let store = SessionStore::new(src).with_base_url(base_url);
    Fixture {
        conn,
        peer,
        dir,
        config: PublishConfig::new(store),
    }
}

fn reference(name: &str) -> SessionReference {
    SessionReference::new(SCID.parse().unwrap(), "Lobby", name)
}

fn tap(subscription_id: u32, resource: &str, change_number: u64) -> Value {
    json!([3, subscription_id, {
        "shoulderTaps": [{
            "resource": resource,
            "branch": Uuid::nil(),
            "changeNumber": change_number,
        }]
    }])
}

#[tokio::test]
async fn publish_routes_changes_and_close_leaves() {
    let Fixture {
        conn,
        mut peer,
        dir,
        config,
    } = fixture().await;
    let connection_id = Uuid::new_v4();

    let (session, req) = tokio::join!(
        config.publish(conn.clone(), reference("abc"), SessionDescription::default()),
        peer.accept_subscribe(9, json!({"ConnectionId": connection_id}))
    );
    let session = session.unwrap();
    assert_eq!(req[2], mpsd::CONNECTIONS_RESOURCE);

    let puts = dir.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].authorization, "XBL3.0 x=uhs1;secret");
    assert_eq!(puts[0].contract_version, "107");
    let system = &puts[0].body["members"]["me"]["properties"]["system"];
    assert_eq!(system["active"], true);
    assert_eq!(system["connection"], connection_id.to_string());
    assert_eq!(
        dir.activities(),
        vec![json!({
            "type": "activity",
            "sessionRef": {"scid": SCID, "templateName": "Lobby", "name": "abc"},
            "version": 1,
        })]
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler: Arc<dyn Handler> = Arc::new(move |r: &SessionReference, _: Uuid, n: u64| {
        let _ = tx.send((r.name.clone(), n));
    });
    session.handle(handler);

    peer.send(tap(9, &format!("{SCID}~Lobby~other"), 1)).await;
    peer.send(tap(9, &format!("{SCID}~lobby~ABC"), 2)).await;
    let change = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(change, ("ABC".to_string(), 2));

    session.handle(Arc::new(NopHandler));
    peer.send(tap(9, &format!("{SCID}~Lobby~abc"), 3)).await;

    let (closed, unsub) = tokio::join!(session.close(), peer.answer_unsubscribe(0));
    closed.unwrap();
    assert_eq!(unsub[2], 9);
    assert!(rx.try_recv().is_err());

    let puts = dir.puts();
    assert_eq!(puts.len(), 2);
    assert_eq!(puts[1].body, json!({"members": {"me": null}}));
}

#[tokio::test]
async fn missing_connection_id_releases_subscription() {
    let Fixture {
        conn,
        mut peer,
        dir,
        config,
    } = fixture().await;

    let publish = config.publish(conn.clone(), reference("abc"), SessionDescription::default());
    let script = async {
        peer.accept_subscribe(4, json!({})).await;
        peer.answer_unsubscribe(0).await
    };
    let (result, unsub) = tokio::join!(publish, script);

    assert!(matches!(result, Err(Error::MissingConnectionId)));
    assert_eq!(unsub[2], 4);
    assert_eq!(conn.subscription_count(), 0);
    assert!(dir.puts().is_empty());
}

#[tokio::test]
async fn failed_commit_releases_subscription() {
    let Fixture {
        conn,
        mut peer,
        dir,
        config,
    } = fixture().await;

    let publish = config.publish(conn.clone(), reference("broken"), SessionDescription::default());
    let script = async {
        peer.accept_subscribe(5, json!({"ConnectionId": Uuid::new_v4()}))
            .await;
        peer.answer_unsubscribe(0).await
    };
    let (result, unsub) = tokio::join!(publish, script);

    match result {
        Err(Error::Status { status, .. }) => assert_eq!(status.as_u16(), 500),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("publish should fail"),
    }
    assert_eq!(unsub[2], 5);
    assert_eq!(conn.subscription_count(), 0);
    let puts = dir.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].name, "broken");
    assert!(dir.activities().is_empty());
}

#[tokio::test]
async fn failed_activity_commit_leaves_session() {
    let Fixture {
        conn,
        mut peer,
        dir,
        config,
    } = fixture().await;

    let publish = config.publish(
        conn.clone(),
        reference("nohandle"),
        SessionDescription::default(),
    );
    let script = async {
        peer.accept_subscribe(6, json!({"ConnectionId": Uuid::new_v4()}))
            .await;
        peer.answer_unsubscribe(0).await
    };
    let (result, unsub) = tokio::join!(publish, script);

    match result {
        Err(Error::Status { method, status, url }) => {
            assert_eq!(method, reqwest::Method::POST);
            assert_eq!(status.as_u16(), 500);
            assert!(url.ends_with("/handles"), "{url}");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("publish should fail"),
    }
    assert_eq!(unsub[2], 6);
    assert_eq!(conn.subscription_count(), 0);
    let puts = dir.puts();
    assert_eq!(puts.len(), 2);
    assert_eq!(puts[1].name, "nohandle");
    assert_eq!(puts[1].body, json!({"members": {"me": null}}));
}

#[tokio::test]
async fn close_still_leaves_when_unsubscribe_is_rejected() {
    let Fixture {
        conn,
        mut peer,
        dir,
        config,
    } = fixture().await;

    let (session, _) = tokio::join!(
        config.publish(conn.clone(), reference("abc"), SessionDescription::default()),
        peer.accept_subscribe(2, json!({"ConnectionId": Uuid::new_v4()}))
    );
    let session = session.unwrap();

    let (closed, _) = tokio::join!(session.close(), peer.answer_unsubscribe(1001));
    closed.unwrap();
    assert_eq!(conn.subscription_count(), 0);
    assert_eq!(dir.puts().last().unwrap().body, json!({"members": {"me": null}}));
}

#[tokio::test]
async fn query_reads_document_and_maps_status() {
    let Fixture {
        conn,
        mut peer,
        config,
        ..
    } = fixture().await;

    let (session, _) = tokio::join!(
        config.publish(conn.clone(), reference("abc"), SessionDescription::default()),
        peer.accept_subscribe(3, json!({"ConnectionId": Uuid::new_v4()}))
    );
    let session = session.unwrap();
    let commit = session.query().await.unwrap();
    assert_eq!(commit.contract_version, 107);
    assert_eq!(commit.change_number, 1);

    let err = config.store.query(&reference("gone")).await.unwrap_err();
    match err {
        Error::Status { status, url, .. } => {
            assert_eq!(status.as_u16(), 404);
            assert!(url.ends_with("/sessions/gone"), "{url}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn search_scopes_owners_to_social_group() {
    let Fixture { dir, config, .. } = fixture().await;
    let scid: Uuid = SCID.parse().unwrap();

    let handles = ActivityFilter::social_group("people")
        .search(&config.store, scid)
        .await
        .unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].id, Some(HANDLE_ID.parse().unwrap()));
    assert_eq!(handles[0].owner_xuid, "7777");
    assert_eq!(handles[0].session_reference, reference("abc"));
    assert_eq!(handles[0].related_info.as_ref().unwrap().max_members_count, 8);

    let other = ActivityFilter {
        social_group: Some("favorites".into()),
        social_group_xuid: Some("42".into()),
    };
    other.search(&config.store, scid).await.unwrap();
    ActivityFilter::default()
        .search(&config.store, scid)
        .await
        .unwrap();

    let searches = dir.searches();
    assert_eq!(searches.len(), 3);
    assert_eq!(
        searches[0].0.as_deref(),
        Some("include=relatedInfo,customProperties")
    );
    assert_eq!(
        searches[0].1,
        json!({
            "type": "activity",
            "scid": SCID,
            "owners": {"people": {"moniker": "people", "monikerXuid": "2535"}},
        })
    );
    assert_eq!(
        searches[1].1["owners"],
        json!({"people": {"moniker": "favorites", "monikerXuid": "42"}})
    );
    assert_eq!(searches[2].1["owners"], json!({}));
}

#[tokio::test]
async fn join_activity_commits_through_handle() {
    let Fixture {
        conn,
        mut peer,
        dir,
        config,
    } = fixture().await;
    let handles = ActivityFilter::social_group("people")
        .search(&config.store, SCID.parse().unwrap())
        .await
        .unwrap();
    let join = JoinConfig::new(config);
    let connection_id = Uuid::new_v4();

    let (session, _) = tokio::join!(
        join.join_activity(conn.clone(), &handles[0], SessionDescription::default()),
        peer.accept_subscribe(8, json!({"ConnectionId": connection_id}))
    );
    let session = session.unwrap();
    assert_eq!(session.reference(), &reference("abc"));

    let puts = dir.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].name, format!("handle:{HANDLE_ID}"));
    assert_eq!(
        puts[0].body["members"]["me"]["properties"]["system"]["connection"],
        connection_id.to_string()
    );
    assert!(dir.activities().is_empty());

    let (tx, mut rx) = mpsc::unbounded_channel();
    session.handle(Arc::new(move |r: &SessionReference, _: Uuid, n: u64| {
        let _ = tx.send((r.name.clone(), n));
    }));
    peer.send(tap(8, &format!("{SCID}~Lobby~abc"), 4)).await;
    let change = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(change, ("abc".to_string(), 4));

    let (closed, _) = tokio::join!(session.close(), peer.answer_unsubscribe(0));
    closed.unwrap();
    let puts = dir.puts();
    assert_eq!(puts.len(), 2);
    assert_eq!(puts[1].name, "abc");
}

#[tokio::test]
async fn join_activity_without_id_does_not_subscribe() {
    let Fixture {
        conn,
        dir,
        config,
        ..
    } = fixture().await;
    let handle = ActivityHandle::new(reference("abc"));

    let result = JoinConfig::new(config)
        .join_activity(conn.clone(), &handle, SessionDescription::default())
        .await;
    assert!(matches!(result, Err(Error::MissingHandleId)));
    assert_eq!(conn.subscription_count(), 0);
    assert!(dir.puts().is_empty());
}
