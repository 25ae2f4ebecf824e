#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;
use wall_api::{Envelope, NewPost, Post, EVENT_CHANGES, EVENT_JOIN, EVENT_LEAVE, EVENT_REPLY, POSTS_TABLE};

pub const ANON: &str = "anon-key";
pub const TOPIC: &str = "realtime:wall-posts";

#[derive(Clone)]
enum Frame {
    Change(Value),
    Raw(String),
}

#[derive(Default)]
struct Inner {
    posts: Vec<Post>,
    objects: HashMap<String, (String, Vec<u8>)>,
    admins: HashSet<Uuid>,
    events: Vec<String>,
    auth: Vec<(String, String)>,
    fail_fetch: bool,
    deny_deletes: bool,
}

/// In-process stand-in for the hosted backend: posts table, storage bucket,
/// role RPC and the realtime websocket.
#[derive(Clone)]
pub struct Fake {
    inner: Arc<Mutex<Inner>>,
    frames: broadcast::Sender<Frame>,
}

impl Fake {
    fn new() -> Self {
        let (frames, _) = broadcast::channel(64);
        Self {
            inner: Arc::default(),
            frames,
        }
    }

    /// Insert a row without emitting a change.
    pub fn seed(&self, user_id: Uuid, user_name: &str, content: &str) -> Post {
        let post = Post {
            id: Uuid::new_v4(),
            user_id,
            user_name: user_name.into(),
            content: Some(content.into()),
            media_urls: vec![],
            created_at: OffsetDateTime::now_utc(),
        };
        self.inner.lock().posts.insert(0, post.clone());
        post
    }

    pub fn posts(&self) -> Vec<Post> {
        self.inner.lock().posts.clone()
    }

    pub fn object(&self, path: &str) -> Option<(String, Vec<u8>)> {
        self.inner.lock().objects.get(path).cloned()
    }

    pub fn grant_admin(&self, user_id: Uuid) {
        self.inner.lock().admins.insert(user_id);
    }

    /// Websocket events received from clients, in arrival order.
    pub fn events(&self) -> Vec<String> {
        self.inner.lock().events.clone()
    }

    /// `(apikey, authorization)` of every REST request.
    pub fn auth(&self) -> Vec<(String, String)> {
        self.inner.lock().auth.clone()
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.inner.lock().fail_fetch = fail;
    }

    pub fn deny_deletes(&self, deny: bool) {
        self.inner.lock().deny_deletes = deny;
    }

    /// Send a frame verbatim to every connected socket.
    pub fn push_raw(&self, text: &str) {
        let _ = self.frames.send(Frame::Raw(text.into()));
    }

    fn record(&self, headers: &HeaderMap) {
        let get = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        let pair = (get(header::HeaderName::from_static("apikey")), get(header::AUTHORIZATION));
        self.inner.lock().auth.push(pair);
    }

    fn emit(&self, kind: &str, record: Value, old_record: Value) {
        let _ = self.frames.send(Frame::Change(json!({
            "ids": [1],
            "data": {
                "schema": "public",
                "table": POSTS_TABLE,
                "type": kind,
                "record": record,
                "old_record": old_record,
                "commit_timestamp": OffsetDateTime::now_utc().unix_timestamp(),
            }
        })));
    }
}

fn prefer(headers: &HeaderMap) -> &str {
    headers
        .get("prefer")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"message": message}))).into_response()
}

#[derive(Deserialize)]
struct ListQuery {
    order: Option<String>,
    limit: Option<usize>,
}

async fn list_posts(State(fake): State<Fake>, headers: HeaderMap, Query(q): Query<ListQuery>) -> Response {
    fake.record(&headers);
    if fake.inner.lock().fail_fetch {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "database offline");
    }
    if q.order.as_deref() != Some("created_at.desc") {
        return error(StatusCode::BAD_REQUEST, "unexpected order");
    }
    let posts: Vec<Post> = fake
        .posts()
        .into_iter()
        .take(q.limit.unwrap_or(usize::MAX))
        .collect();
    Json(posts).into_response()
}

async fn count_posts(State(fake): State<Fake>, headers: HeaderMap) -> Response {
    fake.record(&headers);
    if prefer(&headers) != "count=exact" {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let n = fake.inner.lock().posts.len();
    let range = if n == 0 {
        "*/0".to_string()
    } else {
        format!("0-{}/{}", n - 1, n)
    };
    (StatusCode::OK, [(header::CONTENT_RANGE, range)]).into_response()
}

async fn create_post(State(fake): State<Fake>, headers: HeaderMap, Json(new): Json<NewPost>) -> Response {
    fake.record(&headers);
    if prefer(&headers) != "return=representation" {
        return error(StatusCode::BAD_REQUEST, "missing prefer");
    }
    let post = Post {
        id: Uuid::new_v4(),
        user_id: new.user_id,
        user_name: new.user_name,
        content: new.content,
        media_urls: new.media_urls,
        created_at: OffsetDateTime::now_utc(),
    };
    fake.inner.lock().posts.insert(0, post.clone());
    fake.emit("INSERT", json!(post), Value::Null);
    (StatusCode::CREATED, Json(vec![post])).into_response()
}

async fn delete_post(
    State(fake): State<Fake>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    fake.record(&headers);
    let Some(id) = q
        .get("id")
        .and_then(|f| f.strip_prefix("eq."))
        .and_then(|s| Uuid::parse_str(s).ok())
    else {
        return error(StatusCode::BAD_REQUEST, "bad filter");
    };
    let removed = {
        let mut inner = fake.inner.lock();
        if inner.deny_deletes {
            None
        } else {
            let pos = inner.posts.iter().position(|p| p.id == id);
            pos.map(|i| inner.posts.remove(i))
        }
    };
    match removed {
        Some(post) => {
            fake.emit("DELETE", Value::Null, json!({"id": id}));
            Json(vec![post]).into_response()
        }
        None => Json(Vec::<Post>::new()).into_response(),
    }
}

async fn has_role(State(fake): State<Fake>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    fake.record(&headers);
    let user = body["_user_id"].as_str().and_then(|s| Uuid::parse_str(s).ok());
    let Some(user) = user else {
        return error(StatusCode::BAD_REQUEST, "bad user id");
    };
    let admin = body["_role"] == "admin" && fake.inner.lock().admins.contains(&user);
    Json(admin).into_response()
}

async fn upload(
    State(fake): State<Fake>,
    Path((bucket, path)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    fake.record(&headers);
    if bucket != "wall-media" {
        return error(StatusCode::NOT_FOUND, "bucket not found");
    }
    let path = path.trim_start_matches('/').to_string();
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    fake.inner
        .lock()
        .objects
        .insert(path.clone(), (content_type, body.to_vec()));
    Json(json!({"Key": format!("{bucket}/{path}")})).into_response()
}

async fn realtime(
    ws: WebSocketUpgrade,
    State(fake): State<Fake>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    if q.get("apikey").map(String::as_str) != Some(ANON) || q.get("vsn").is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| serve_socket(socket, fake))
}

async fn serve_socket(mut socket: WebSocket, fake: Fake) {
    let mut frames = fake.frames.subscribe();
    let mut topic: Option<String> = None;
    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(Message::Text(text))) = msg else { break };
                let Ok(env) = serde_json::from_str::<Envelope>(&text) else { continue };
                fake.inner.lock().events.push(env.event.clone());
                let status = match env.event.as_str() {
                    EVENT_JOIN if env.payload["access_token"] == "revoked" => "error",
                    EVENT_JOIN => {
                        topic = Some(env.topic.clone());
                        "ok"
                    }
                    EVENT_LEAVE => {
                        topic = None;
                        "ok"
                    }
                    _ => "ok",
                };
                let reply = Envelope {
                    topic: env.topic,
                    event: EVENT_REPLY.into(),
                    payload: json!({"status": status, "response": {}}),
                    reference: env.reference,
                };
                let text = serde_json::to_string(&reply).unwrap();
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            frame = frames.recv() => {
                let Ok(frame) = frame else { continue };
                let text = match (frame, &topic) {
                    (Frame::Raw(text), _) => text,
                    (Frame::Change(payload), Some(topic)) => serde_json::to_string(&Envelope {
                        topic: topic.clone(),
                        event: EVENT_CHANGES.into(),
                        payload,
                        reference: None,
                    })
                    .unwrap(),
                    (Frame::Change(_), None) => continue,
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn router(fake: Fake) -> Router {
    Router::new()
        .route(
            "/rest/v1/wall_posts",
            get(list_posts)
                .head(count_posts)
                .post(create_post)
                .delete(delete_post),
        )
        .route("/rest/v1/rpc/has_role", post(has_role))
        .route("/storage/v1/object/:bucket/*path", post(upload))
        .route("/realtime/v1/websocket", get(realtime))
        .with_state(fake)
}

pub async fn spawn_server() -> (Fake, Url, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();
    let fake = Fake::new();
    let app = router(fake.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    let base = Url::parse(&format!("http://{addr}")).unwrap();
    (fake, base, server)
}

/// Poll `cond` until it holds, failing the test after a few seconds.
pub async fn eventually<F: Fn() -> bool>(cond: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
