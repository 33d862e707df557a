//! Backend client wrapper. The only code that talks to the hosted platform.
//!
//! ## Module Map
//!
//! ```text
//! ┌───────────────┐  Arc<dyn Store>     ┌───────────────────────────────┐
//! │    Backend    │ ──────────────────> │ rest.rs   PostgREST over HTTP │
//! │ (context obj) │                     │ memory.rs in-process tables   │
//! │               │  Arc<dyn Realtime>  ├───────────────────────────────┤
//! │               │ ──────────────────> │ realtime.rs Phoenix websocket │
//! │               │                     │ memory.rs broadcast channel   │
//! │               │  AuthClient         ├───────────────────────────────┤
//! │               │ ──────────────────> │ auth.rs  GoTrue + session     │
//! └───────────────┘                     └───────────────────────────────┘
//! ```
//!
//! `Store` is JSON-shaped, mirroring the table API of the
//! platform; typed decoding happens in `board::service`. A `Backend` is passed
//! explicitly to every service and live view instead of living in a global.

pub mod auth;
pub mod memory;
pub mod realtime;
pub mod rest;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::errors::StoreError;

pub use auth::{AuthClient, Session, User};
pub use memory::MemoryStore;
pub use realtime::RealtimeClient;
pub use rest::RestStore;

// ── Tables ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Teams,
    Projects,
    TeamMembers,
    Columns,
    Tasks,
    ChatMessages,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Teams => "teams",
            Self::Projects => "projects",
            Self::TeamMembers => "team_members",
            Self::Columns => "columns",
            Self::Tasks => "tasks",
            Self::ChatMessages => "chat_messages",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Queries ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Row selection: projected columns, equality filters, ordering and limit.
/// Updates and deletes only use the filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub columns: String,
    pub filters: Vec<(String, String)>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            columns: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.columns = columns.to_string();
        self
    }

    pub fn eq(mut self, column: &str, value: impl fmt::Display) -> Self {
        self.filters.push((column.to_string(), value.to_string()));
        self
    }

    pub fn order(mut self, column: &str) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending: true,
        });
        self
    }

    pub fn order_desc(mut self, column: &str) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending: false,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// PostgREST filter parameters (`col=eq.value`).
    pub fn filter_params(&self) -> Vec<(String, String)> {
        self.filters
            .iter()
            .map(|(col, val)| (col.clone(), format!("eq.{}", val)))
            .collect()
    }

    /// Full PostgREST query string parameters for a read.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.columns.clone())];
        params.extend(self.filter_params());
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_string(), order));
        }
        if let Some(n) = self.limit {
            params.push(("limit".to_string(), n.to_string()));
        }
        params
    }

    /// Whether a JSON row satisfies every equality filter.
    pub fn matches(&self, row: &Value) -> bool {
        self.filters
            .iter()
            .all(|(col, val)| row.get(col).is_some_and(|v| value_text(v) == *val))
    }
}

/// Text form of a scalar JSON value as it appears in a filter.
pub(crate) fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

// ── Store ────────────────────────────────────────────────────────────

/// Table-style CRUD against the remote store. Writes return the affected
/// rows as the store persisted them.
#[async_trait]
pub trait Store: Send + Sync {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError>;

    async fn insert(&self, table: Table, rows: Vec<Value>) -> Result<Vec<Value>, StoreError>;

    async fn update(&self, table: Table, patch: Value, query: &Query)
    -> Result<Vec<Value>, StoreError>;

    async fn delete(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError>;
}

/// Decode raw rows into `T`.
pub fn decode_rows<T: DeserializeOwned>(table: Table, rows: Vec<Value>) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|e| StoreError::decode(table.as_str(), e)))
        .collect()
}

pub async fn select_as<T: DeserializeOwned>(
    store: &dyn Store,
    table: Table,
    query: &Query,
) -> Result<Vec<T>, StoreError> {
    let rows = store.select(table, query).await?;
    decode_rows(table, rows)
}

// ── Realtime ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    #[serde(other)]
    Other,
}

/// A row change on a table, delivered to every subscribed client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub new: Option<Value>,
    pub old: Option<Value>,
    pub commit_timestamp: Option<String>,
}

/// What a channel listens to: one table, optionally narrowed by `column=eq.value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub table: Table,
    pub filter: Option<(String, String)>,
}

impl ChannelSpec {
    pub fn table(table: Table) -> Self {
        Self {
            name: table.as_str().to_string(),
            table,
            filter: None,
        }
    }

    pub fn filtered(table: Table, column: &str, value: impl fmt::Display) -> Self {
        let value = value.to_string();
        Self {
            name: format!("{}:{}={}", table, column, value),
            table,
            filter: Some((column.to_string(), value)),
        }
    }

    /// Filter in the platform's `column=eq.value` form.
    pub fn filter_expr(&self) -> Option<String> {
        self.filter
            .as_ref()
            .map(|(col, val)| format!("{}=eq.{}", col, val))
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table.as_str() {
            return false;
        }
        let Some((col, val)) = &self.filter else {
            return true;
        };
        // DELETE payloads may only carry the key; let them through.
        let row = event.new.as_ref().or(event.old.as_ref());
        match row.and_then(|r| r.get(col)) {
            Some(v) => value_text(v) == *val,
            None => event.kind == ChangeKind::Delete,
        }
    }
}

type CancelFn = Box<dyn FnOnce() + Send>;

/// A live channel subscription. Dropping it leaves the channel.
pub struct Subscription {
    channel: String,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    cancel: Option<CancelFn>,
}

impl Subscription {
    pub fn new(
        channel: impl Into<String>,
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            channel: channel.into(),
            events,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Next change, or `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// A change that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.events.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            tracing::debug!(channel = %self.channel, "leaving realtime channel");
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait Realtime: Send + Sync {
    async fn subscribe(&self, channel: ChannelSpec) -> Result<Subscription, StoreError>;
}

// ── Backend context ──────────────────────────────────────────────────

/// Capability context threaded through services and live views.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn Store>,
    pub realtime: Arc<dyn Realtime>,
}

impl Backend {
    pub fn new(store: Arc<dyn Store>, realtime: Arc<dyn Realtime>) -> Self {
        Self { store, realtime }
    }

    /// Backend over a single in-process store, used by tests and offline runs.
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            store: store.clone(),
            realtime: store,
        }
    }

    /// Backend talking to the hosted platform, authenticated by `auth`'s
    /// current session (or the anon key when signed out).
    pub fn connect(config: &Config, auth: &AuthClient) -> Result<Self, StoreError> {
        let backend = &config.file.backend;
        let rest = RestStore::new(&backend.url, &backend.anon_key, auth.watch())?;
        let realtime = RealtimeClient::spawn(
            &backend.url,
            &backend.anon_key,
            auth.watch(),
            config.file.realtime.clone(),
        )?;
        Ok(Self {
            store: Arc::new(rest),
            realtime: Arc::new(realtime),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_renders_postgrest_params() {
        let q = Query::new()
            .select("position")
            .eq("project_id", "p1")
            .eq("column_id", "c1")
            .order_desc("position")
            .limit(1);
        assert_eq!(
            q.to_params(),
            vec![
                ("select".to_string(), "position".to_string()),
                ("project_id".to_string(), "eq.p1".to_string()),
                ("column_id".to_string(), "eq.c1".to_string()),
                ("order".to_string(), "position.desc".to_string()),
                ("limit".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_query_matches_scalars() {
        let row = json!({"id": "a", "position": 3, "done": false});
        assert!(Query::new().eq("id", "a").eq("position", 3).matches(&row));
        assert!(Query::new().eq("done", false).matches(&row));
        assert!(!Query::new().eq("position", 4).matches(&row));
        assert!(!Query::new().eq("missing", "x").matches(&row));
    }

    #[test]
    fn test_channel_filter_matches_project_rows() {
        let spec = ChannelSpec::filtered(Table::Tasks, "project_id", "p1");
        assert_eq!(spec.filter_expr().as_deref(), Some("project_id=eq.p1"));

        let mut ev = ChangeEvent {
            table: "tasks".into(),
            kind: ChangeKind::Insert,
            new: Some(json!({"id": "t", "project_id": "p1"})),
            old: None,
            commit_timestamp: None,
        };
        assert!(spec.matches(&ev));
        ev.new = Some(json!({"id": "t", "project_id": "p2"}));
        assert!(!spec.matches(&ev));
        ev.table = "columns".into();
        ev.new = Some(json!({"id": "t", "project_id": "p1"}));
        assert!(!spec.matches(&ev));

        let key_only_delete = ChangeEvent {
            table: "tasks".into(),
            kind: ChangeKind::Delete,
            new: None,
            old: Some(json!({"id": "t"})),
            commit_timestamp: None,
        };
        assert!(spec.matches(&key_only_delete));
    }

    #[test]
    fn test_change_kind_parses_unknown_tags_as_other() {
        let kind: ChangeKind = serde_json::from_str("\"TRUNCATE\"").unwrap();
        assert_eq!(kind, ChangeKind::Other);
        let kind: ChangeKind = serde_json::from_str("\"INSERT\"").unwrap();
        assert_eq!(kind, ChangeKind::Insert);
    }

    #[tokio::test]
    async fn test_dropping_subscription_runs_cancel_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let count = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::unbounded_channel();
        let c = count.clone();
        let sub = Subscription::new("tasks", rx, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
