use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use wall_api::{ChangePayload, ChangeType, Envelope, EVENT_CHANGES, EVENT_CLOSE, EVENT_ERROR, EVENT_REPLY};

use crate::error::{WallError, WallResult};
use crate::remote::{FeedEvent, Subscription};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket endpoint of the realtime service for a REST base URL.
pub fn websocket_url(base: &Url, anon_key: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&format!(
        "{}/realtime/v1/websocket",
        base.as_str().trim_end_matches('/')
    ))?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    // http(s) and ws(s) are all special schemes, so the swap cannot fail
    let _ = url.set_scheme(scheme);
    url.query_pairs_mut()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

/// Channel subscription to the posts table over the realtime websocket.
#[derive(Clone)]
pub struct RealtimeClient {
    endpoint: Url,
    topic: String,
    table: String,
    access_token: String,
    heartbeat: Duration,
}

impl RealtimeClient {
    pub fn new(endpoint: Url, channel: &str, table: &str, access_token: &str) -> Self {
        Self {
            endpoint,
            topic: format!("realtime:{channel}"),
            table: table.into(),
            access_token: access_token.into(),
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat = every;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Connect, join the channel and wait for the server to accept it.
    pub async fn subscribe(&self) -> WallResult<Subscription> {
        let (mut socket, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| WallError::Subscribe(e.to_string()))?;
        let mut refs = Refs::default();
        let join_ref = refs.next();
        let join = Envelope::join(&self.topic, &self.table, &self.access_token, join_ref.clone());
        send(&mut socket, &join).await?;
        timeout(JOIN_TIMEOUT, await_join(&mut socket, &join_ref))
            .await
            .map_err(|_| WallError::Subscribe("join timed out".into()))??;
        info!(topic = %self.topic, "realtime channel joined");

        let (tx, rx) = unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(pump(socket, self.clone(), refs, tx, cancel.clone()));
        Ok(Subscription::new(rx, cancel))
    }
}

#[derive(Default)]
struct Refs(u64);

impl Refs {
    fn next(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}

async fn send(socket: &mut Socket, envelope: &Envelope) -> WallResult<()> {
    let text = serde_json::to_string(envelope).map_err(|e| WallError::Subscribe(e.to_string()))?;
    socket
        .send(Message::Text(text))
        .await
        .map_err(|e| WallError::Subscribe(e.to_string()))
}

async fn await_join(socket: &mut Socket, join_ref: &str) -> WallResult<()> {
    while let Some(frame) = socket.next().await {
        let frame = frame.map_err(|e| WallError::Subscribe(e.to_string()))?;
        let Message::Text(text) = frame else { continue };
        let Ok(env) = serde_json::from_str::<Envelope>(&text) else {
            continue;
        };
        if env.event == EVENT_REPLY && env.reference.as_deref() == Some(join_ref) {
            if env.is_ok_reply() {
                return Ok(());
            }
            return Err(WallError::Subscribe(format!("join rejected: {}", env.payload)));
        }
    }
    Err(WallError::Subscribe("socket closed before join reply".into()))
}

async fn pump(
    mut socket: Socket,
    client: RealtimeClient,
    mut refs: Refs,
    tx: UnboundedSender<FeedEvent>,
    cancel: CancellationToken,
) {
    let mut heartbeat = interval(client.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let leave = Envelope::leave(&client.topic, refs.next());
                if let Err(err) = send(&mut socket, &leave).await {
                    debug!(error = %err, "leave not delivered");
                }
                let _ = socket.close(None).await;
                debug!(topic = %client.topic, "realtime channel left");
                break;
            }
            _ = heartbeat.tick() => {
                if let Err(err) = send(&mut socket, &Envelope::heartbeat(refs.next())).await {
                    warn!(error = %err, "realtime heartbeat failed");
                    break;
                }
            }
            frame = socket.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = decode_frame(&text, &client.topic, &client.table) {
                        let _ = tx.send(event);
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    warn!(topic = %client.topic, "realtime socket closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "realtime socket error");
                    break;
                }
            }
        }
    }
}

/// Turn a websocket text frame into a feed event for `table` on `topic`.
/// Replies, heartbeats and other tables yield nothing; malformed frames are
/// logged and skipped.
pub fn decode_frame(text: &str, topic: &str, table: &str) -> Option<FeedEvent> {
    let env: Envelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(err) => {
            warn!(error = %err, "malformed realtime frame");
            return None;
        }
    };
    if env.topic != topic {
        return None;
    }
    match env.event.as_str() {
        EVENT_CHANGES => {}
        EVENT_ERROR | EVENT_CLOSE => {
            warn!(event = %env.event, payload = %env.payload, "realtime channel reported");
            return None;
        }
        _ => return None,
    }
    let change = match serde_json::from_value::<ChangePayload>(env.payload) {
        Ok(payload) => payload.data,
        Err(err) => {
            warn!(error = %err, "malformed change payload");
            return None;
        }
    };
    if change.table != table {
        return None;
    }
    match change.kind {
        ChangeType::Insert => match change.inserted_post() {
            Ok(Some(post)) => Some(FeedEvent::Insert(post)),
            Ok(None) => {
                warn!("insert without record");
                None
            }
            Err(err) => {
                warn!(error = %err, "malformed inserted row");
                None
            }
        },
        ChangeType::Delete => {
            let id = change.deleted_id();
            if id.is_none() {
                warn!("delete without old record id");
            }
            id.map(FeedEvent::Delete)
        }
        ChangeType::Update => None,
    }
}
