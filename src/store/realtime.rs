//! Realtime change notifications over the platform's Phoenix websocket.
//!
//! A single manager task owns the socket. It connects lazily when the first
//! channel is joined, disconnects when the last one is left, and reconnects
//! with jittered exponential backoff, re-joining every open channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use super::auth::Session;
use super::{ChangeEvent, ChangeKind, ChannelSpec, Realtime, Subscription};
use crate::config::RealtimeSection;
use crate::errors::StoreError;

const PHOENIX_TOPIC: &str = "phoenix";

/// Phoenix v1 message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    fn new(topic: &str, event: &str, payload: Value, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(reference.to_string()),
        }
    }
}

/// Build the websocket endpoint from the project URL.
pub fn websocket_url(base_url: &str, anon_key: &str) -> Result<Url, StoreError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| StoreError::Realtime(format!("invalid project URL {}: {}", base_url, e)))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => other,
    }
    .to_string();
    url.set_scheme(&scheme)
        .map_err(|_| StoreError::Realtime(format!("cannot use scheme {} for realtime", scheme)))?;
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

/// `phx_join` payload subscribing to postgres changes of one table.
pub fn join_payload(spec: &ChannelSpec, access_token: Option<&str>) -> Value {
    let mut change = json!({
        "event": "*",
        "schema": "public",
        "table": spec.table.as_str(),
    });
    if let Some(filter) = spec.filter_expr() {
        change["filter"] = Value::String(filter);
    }
    let mut payload = json!({
        "config": {
            "broadcast": { "ack": false, "self": false },
            "presence": { "key": "" },
            "postgres_changes": [change],
            "private": false,
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_string());
    }
    payload
}

/// Decode a `postgres_changes` frame into a change notification.
pub fn decode_change(frame: &Frame) -> Option<ChangeEvent> {
    if frame.event != "postgres_changes" {
        return None;
    }
    let data = frame.payload.get("data")?;
    let non_empty = |v: Option<&Value>| {
        v.filter(|v| !v.is_null() && v.as_object().is_none_or(|o| !o.is_empty()))
            .cloned()
    };
    Some(ChangeEvent {
        table: data.get("table")?.as_str()?.to_string(),
        kind: data
            .get("type")
            .and_then(|t| serde_json::from_value::<ChangeKind>(t.clone()).ok())
            .unwrap_or(ChangeKind::Other),
        new: non_empty(data.get("record")),
        old: non_empty(data.get("old_record")),
        commit_timestamp: data
            .get("commit_timestamp")
            .and_then(|t| t.as_str())
            .map(str::to_string),
    })
}

fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    base_ms.saturating_add(nanos % jitter_ms)
}

// ── Client ───────────────────────────────────────────────────────────

enum Command {
    Join {
        topic: String,
        spec: ChannelSpec,
        events: mpsc::UnboundedSender<ChangeEvent>,
    },
    Leave {
        topic: String,
    },
}

struct Joined {
    spec: ChannelSpec,
    events: mpsc::UnboundedSender<ChangeEvent>,
}

enum Outcome {
    Idle,
    Shutdown,
    Disconnected(String),
}

#[derive(Clone)]
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl RealtimeClient {
    /// Start the manager task. No socket is opened until a channel is joined.
    pub fn spawn(
        base_url: &str,
        anon_key: &str,
        session: watch::Receiver<Option<Session>>,
        config: RealtimeSection,
    ) -> Result<Self, StoreError> {
        let endpoint = websocket_url(base_url, anon_key)?;
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_manager(endpoint, session, config, rx));
        Ok(Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }
}

#[async_trait]
impl Realtime for RealtimeClient {
    async fn subscribe(&self, channel: ChannelSpec) -> Result<Subscription, StoreError> {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let topic = format!("realtime:{}-{}", channel.name, n);
        let (events, rx) = mpsc::unbounded_channel();
        self.commands
            .send(Command::Join {
                topic: topic.clone(),
                spec: channel.clone(),
                events,
            })
            .map_err(|_| StoreError::Realtime("realtime manager stopped".into()))?;
        let commands = self.commands.clone();
        Ok(Subscription::new(channel.name, rx, move || {
            let _ = commands.send(Command::Leave { topic });
        }))
    }
}

async fn run_manager(
    endpoint: Url,
    mut session: watch::Receiver<Option<Session>>,
    config: RealtimeSection,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut channels: HashMap<String, Joined> = HashMap::new();
    let mut backoff = config.reconnect_initial_ms;

    loop {
        if channels.is_empty() {
            match commands.recv().await {
                Some(Command::Join { topic, spec, events }) => {
                    channels.insert(topic, Joined { spec, events });
                }
                Some(Command::Leave { .. }) => {}
                None => return,
            }
            continue;
        }

        tracing::debug!(endpoint = %endpoint.path(), channels = channels.len(), "connecting realtime");
        match tokio_tungstenite::connect_async(endpoint.as_str()).await {
            Ok((stream, _)) => {
                backoff = config.reconnect_initial_ms;
                match drive(stream, &mut channels, &mut commands, &mut session, &config).await {
                    Outcome::Shutdown => return,
                    Outcome::Idle => continue,
                    Outcome::Disconnected(reason) => {
                        tracing::warn!(%reason, "realtime connection lost");
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "realtime connect failed"),
        }

        let delay = jittered_backoff(backoff, config.jitter_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        let next = (backoff as f64 * config.reconnect_multiplier) as u64;
        backoff = next.min(config.reconnect_max_ms);
    }
}

async fn drive<S>(
    stream: tokio_tungstenite::WebSocketStream<S>,
    channels: &mut HashMap<String, Joined>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    session: &mut watch::Receiver<Option<Session>>,
    config: &RealtimeSection,
) -> Outcome
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut source) = stream.split();
    let mut refs = RefCounter::default();

    let access_token = current_token(session);
    for (topic, joined) in channels.iter() {
        let payload = join_payload(&joined.spec, access_token.as_deref());
        if let Some(msg) = encode(&Frame::new(topic, "phx_join", payload, refs.next()))
            && sink.send(msg).await.is_err()
        {
            return Outcome::Disconnected("join failed".into());
        }
    }

    let mut heartbeat = tokio::time::interval(Duration::from_secs(config.heartbeat_secs.max(1)));
    heartbeat.tick().await;
    let mut pending_heartbeat: Option<String> = None;
    let mut session_open = true;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if pending_heartbeat.is_some() {
                    return Outcome::Disconnected("heartbeat timed out".into());
                }
                let reference = refs.next();
                if let Some(msg) = encode(&Frame::new(PHOENIX_TOPIC, "heartbeat", json!({}), reference)) {
                    if sink.send(msg).await.is_err() {
                        return Outcome::Disconnected("heartbeat send failed".into());
                    }
                    pending_heartbeat = Some(reference.to_string());
                }
            }

            changed = session.changed(), if session_open => {
                if changed.is_err() {
                    session_open = false;
                    continue;
                }
                let Some(access_token) = current_token(session) else { continue };
                for topic in channels.keys() {
                    let payload = json!({ "access_token": access_token });
                    if let Some(msg) = encode(&Frame::new(topic, "access_token", payload, refs.next()))
                        && sink.send(msg).await.is_err()
                    {
                        return Outcome::Disconnected("token refresh send failed".into());
                    }
                }
            }

            command = commands.recv() => {
                match command {
                    Some(Command::Join { topic, spec, events }) => {
                        let payload = join_payload(&spec, current_token(session).as_deref());
                        let frame = Frame::new(&topic, "phx_join", payload, refs.next());
                        channels.insert(topic, Joined { spec, events });
                        if let Some(msg) = encode(&frame)
                            && sink.send(msg).await.is_err()
                        {
                            return Outcome::Disconnected("join failed".into());
                        }
                    }
                    Some(Command::Leave { topic }) => {
                        if channels.remove(&topic).is_some()
                            && let Some(msg) = encode(&Frame::new(&topic, "phx_leave", json!({}), refs.next()))
                        {
                            let _ = sink.send(msg).await;
                        }
                        if channels.is_empty() {
                            let _ = sink.send(Message::Close(None)).await;
                            return Outcome::Idle;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return Outcome::Shutdown;
                    }
                }
            }

            message = source.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        return Outcome::Disconnected("closed by server".into());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Outcome::Disconnected(e.to_string()),
                };
                let frame: Frame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "undecodable realtime frame");
                        continue;
                    }
                };
                handle_frame(frame, channels, &mut pending_heartbeat);
            }
        }
    }
}

#[derive(Default)]
struct RefCounter(u64);

impl RefCounter {
    fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}

fn current_token(session: &watch::Receiver<Option<Session>>) -> Option<String> {
    session.borrow().as_ref().map(|s| s.access_token.clone())
}

fn encode(frame: &Frame) -> Option<Message> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode realtime frame");
            None
        }
    }
}

fn handle_frame(
    frame: Frame,
    channels: &mut HashMap<String, Joined>,
    pending_heartbeat: &mut Option<String>,
) {
    match frame.event.as_str() {
        "phx_reply" if frame.topic == PHOENIX_TOPIC => {
            if frame.reference == *pending_heartbeat {
                *pending_heartbeat = None;
            }
        }
        "phx_reply" => {
            let status = frame.payload.get("status").and_then(Value::as_str);
            if status == Some("error") {
                tracing::warn!(topic = %frame.topic, response = %frame.payload["response"], "channel join rejected");
            }
        }
        "phx_error" | "phx_close" => {
            tracing::warn!(topic = %frame.topic, event = %frame.event, "channel closed by server");
        }
        "system" => {
            tracing::debug!(topic = %frame.topic, payload = %frame.payload, "realtime system message");
        }
        _ => {
            let Some(change) = decode_change(&frame) else {
                return;
            };
            let closed = match channels.get(&frame.topic) {
                Some(joined) if joined.spec.matches(&change) => joined.events.send(change).is_err(),
                Some(_) => false,
                None => return,
            };
            if closed {
                channels.remove(&frame.topic);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Table;

    #[test]
    fn test_websocket_url_switches_scheme_and_path() {
        let url = websocket_url("https://abc.supabase.co", "anon-key").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon-key&vsn=1.0.0"
        );
        let local = websocket_url("http://127.0.0.1:54321", "k").unwrap();
        assert!(local.as_str().starts_with("ws://127.0.0.1:54321/realtime/v1/websocket"));
    }

    #[test]
    fn test_join_payload_carries_table_filter_and_token() {
        let spec = ChannelSpec::filtered(Table::Tasks, "project_id", "p1");
        let payload = join_payload(&spec, Some("jwt"));
        let change = &payload["config"]["postgres_changes"][0];
        assert_eq!(change["table"], "tasks");
        assert_eq!(change["event"], "*");
        assert_eq!(change["filter"], "project_id=eq.p1");
        assert_eq!(payload["access_token"], "jwt");

        let unfiltered = join_payload(&ChannelSpec::table(Table::Columns), None);
        assert!(unfiltered["config"]["postgres_changes"][0].get("filter").is_none());
        assert!(unfiltered.get("access_token").is_none());
    }

    #[test]
    fn test_decode_postgres_changes_frame() {
        let text = r#"{
            "topic": "realtime:tasks-1",
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "schema": "public",
                    "table": "tasks",
                    "commit_timestamp": "2024-05-01T10:00:00Z",
                    "type": "DELETE",
                    "record": {},
                    "old_record": {"id": "9b2e0f5c-1f0e-4d43-9a53-4a3b1e2d7c11"},
                    "columns": [],
                    "errors": null
                },
                "ids": [1]
            },
            "ref": null
        }"#;
        let frame: Frame = serde_json::from_str(text).unwrap();
        let change = decode_change(&frame).unwrap();
        assert_eq!(change.table, "tasks");
        assert_eq!(change.kind, ChangeKind::Delete);
        assert!(change.new.is_none());
        assert_eq!(
            change.old.unwrap()["id"],
            "9b2e0f5c-1f0e-4d43-9a53-4a3b1e2d7c11"
        );
        assert_eq!(change.commit_timestamp.as_deref(), Some("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn test_non_change_frames_are_not_decoded() {
        let frame = Frame::new("realtime:tasks-1", "phx_reply", json!({"status": "ok"}), 3);
        assert!(decode_change(&frame).is_none());
    }

    #[test]
    fn test_heartbeat_reply_clears_pending() {
        let mut channels = HashMap::new();
        let mut pending = Some("7".to_string());
        let reply = Frame::new(PHOENIX_TOPIC, "phx_reply", json!({"status": "ok"}), 7);
        handle_frame(reply, &mut channels, &mut pending);
        assert!(pending.is_none());
    }

    #[tokio::test]
    async fn test_change_routed_to_joined_channel() {
        let (events, mut rx) = mpsc::unbounded_channel();
        let mut channels = HashMap::new();
        channels.insert(
            "realtime:tasks-1".to_string(),
            Joined {
                spec: ChannelSpec::table(Table::Tasks),
                events,
            },
        );
        let frame = Frame {
            topic: "realtime:tasks-1".into(),
            event: "postgres_changes".into(),
            payload: json!({"data": {"table": "tasks", "type": "INSERT", "record": {"id": "x"}}}),
            reference: None,
        };
        let mut pending = None;
        handle_frame(frame, &mut channels, &mut pending);
        let change = rx.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.new.unwrap()["id"], "x");
    }

    #[test]
    fn test_jittered_backoff_stays_within_bounds() {
        assert_eq!(jittered_backoff(500, 0), 500);
        let d = jittered_backoff(500, 100);
        assert!((500..600).contains(&d));
    }

    // ── Socket lifecycle against a local websocket server ────────────

    const WAIT: Duration = Duration::from_secs(5);

    /// One accepted socket as the server sees it. Dropping it drops the
    /// connection without a close frame.
    struct Conn {
        frames: mpsc::UnboundedReceiver<Frame>,
        outgoing: mpsc::UnboundedSender<Frame>,
    }

    impl Conn {
        /// The next frame from the client, or `None` once it hung up.
        async fn next(&mut self) -> Option<Frame> {
            tokio::time::timeout(WAIT, self.frames.recv())
                .await
                .expect("timed out waiting for a client frame")
        }

        fn reply(&self, frame: Frame) {
            self.outgoing.send(frame).unwrap();
        }
    }

    /// Accept websocket clients on a free port, handing each one over as a
    /// `Conn`. Returns the project URL the client should be pointed at.
    async fn serve() -> (String, mpsc::UnboundedReceiver<Conn>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (conns_tx, conns) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
                    continue;
                };
                let (frames_tx, frames) = mpsc::unbounded_channel();
                let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Frame>();
                if conns_tx.send(Conn { frames, outgoing }).is_err() {
                    return;
                }
                tokio::spawn(async move {
                    let (mut sink, mut source) = ws.split();
                    loop {
                        tokio::select! {
                            message = source.next() => match message {
                                Some(Ok(Message::Text(text))) => {
                                    let frame: Frame = serde_json::from_str(&text).unwrap();
                                    let _ = frames_tx.send(frame);
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                            frame = outgoing_rx.recv() => match frame {
                                Some(frame) => {
                                    let text = serde_json::to_string(&frame).unwrap();
                                    if sink.send(Message::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                });
            }
        });
        (url, conns)
    }

    async fn accept(conns: &mut mpsc::UnboundedReceiver<Conn>) -> Conn {
        tokio::time::timeout(WAIT, conns.recv())
            .await
            .expect("client never connected")
            .unwrap()
    }

    fn session(token: &str) -> Session {
        Session {
            access_token: token.into(),
            refresh_token: "refresh".into(),
            token_type: "bearer".into(),
            expires_at: None,
            expires_in: None,
            user: None,
        }
    }

    fn fast(heartbeat_secs: u64) -> RealtimeSection {
        RealtimeSection {
            heartbeat_secs,
            reconnect_initial_ms: 10,
            reconnect_max_ms: 50,
            reconnect_multiplier: 2.0,
            jitter_ms: 0,
        }
    }

    /// Joins arrive in no fixed order; collect the next `n` as topics.
    async fn joined_topics(conn: &mut Conn, n: usize) -> Vec<String> {
        let mut topics = Vec::new();
        while topics.len() < n {
            let frame = conn.next().await.expect("connection closed before joining");
            assert_eq!(frame.event, "phx_join");
            topics.push(frame.topic);
        }
        topics.sort();
        topics
    }

    #[tokio::test]
    async fn test_connects_on_first_join_and_idles_after_last_leave() {
        let (url, mut conns) = serve().await;
        let (session_tx, session_rx) = watch::channel(Some(session("jwt-1")));
        let client = RealtimeClient::spawn(&url, "anon", session_rx, fast(30)).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(conns.try_recv().is_err(), "connected before any channel was joined");

        let mut sub = client.subscribe(ChannelSpec::table(Table::Tasks)).await.unwrap();
        let mut conn = accept(&mut conns).await;
        let join = conn.next().await.unwrap();
        assert_eq!(join.event, "phx_join");
        assert!(join.topic.starts_with("realtime:tasks-"));
        assert_eq!(join.payload["access_token"], "jwt-1");
        assert_eq!(join.payload["config"]["postgres_changes"][0]["table"], "tasks");

        // A refreshed session is pushed to every joined channel.
        session_tx.send(Some(session("jwt-2"))).unwrap();
        let refresh = conn.next().await.unwrap();
        assert_eq!(refresh.event, "access_token");
        assert_eq!(refresh.topic, join.topic);
        assert_eq!(refresh.payload["access_token"], "jwt-2");

        conn.reply(Frame {
            topic: join.topic.clone(),
            event: "postgres_changes".into(),
            payload: json!({"data": {"table": "tasks", "type": "UPDATE", "record": {"id": "t1"}}}),
            reference: None,
        });
        let change = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(change.kind, ChangeKind::Update);

        drop(sub);
        let leave = conn.next().await.unwrap();
        assert_eq!(leave.event, "phx_leave");
        assert_eq!(leave.topic, join.topic);
        assert!(conn.next().await.is_none(), "socket left open with no channels");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(conns.try_recv().is_err(), "reconnected while idle");

        let _again = client.subscribe(ChannelSpec::table(Table::Columns)).await.unwrap();
        let mut conn = accept(&mut conns).await;
        let join = conn.next().await.unwrap();
        assert_eq!(join.event, "phx_join");
        assert_eq!(join.payload["access_token"], "jwt-2");
    }

    #[tokio::test]
    async fn test_reconnect_rejoins_every_open_channel() {
        let (url, mut conns) = serve().await;
        let (_session_tx, session_rx) = watch::channel(None);
        let client = RealtimeClient::spawn(&url, "anon", session_rx, fast(30)).unwrap();

        let _tasks = client.subscribe(ChannelSpec::table(Table::Tasks)).await.unwrap();
        let _chat = client
            .subscribe(ChannelSpec::filtered(Table::ChatMessages, "project_id", "p1"))
            .await
            .unwrap();

        let mut first = accept(&mut conns).await;
        let topics = joined_topics(&mut first, 2).await;

        drop(first);
        let mut second = accept(&mut conns).await;
        assert_eq!(joined_topics(&mut second, 2).await, topics);
    }

    #[tokio::test]
    async fn test_unanswered_heartbeat_drops_the_connection() {
        let (url, mut conns) = serve().await;
        let (_session_tx, session_rx) = watch::channel(None);
        let client = RealtimeClient::spawn(&url, "anon", session_rx, fast(1)).unwrap();
        let _sub = client.subscribe(ChannelSpec::table(Table::Tasks)).await.unwrap();

        let mut conn = accept(&mut conns).await;
        assert_eq!(conn.next().await.unwrap().event, "phx_join");

        // Answered: the socket stays up for the next beat.
        let beat = conn.next().await.unwrap();
        assert_eq!((beat.topic.as_str(), beat.event.as_str()), (PHOENIX_TOPIC, "heartbeat"));
        conn.reply(Frame {
            topic: PHOENIX_TOPIC.into(),
            event: "phx_reply".into(),
            payload: json!({"status": "ok", "response": {}}),
            reference: beat.reference.clone(),
        });
        let beat = conn.next().await.unwrap();
        assert_eq!(beat.event, "heartbeat");

        // Unanswered: the client gives up on this socket and dials again.
        assert!(conn.next().await.is_none());
        let mut conn = accept(&mut conns).await;
        assert_eq!(conn.next().await.unwrap().event, "phx_join");
    }
}
