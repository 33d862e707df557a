//! In-process implementation of [`Store`] and [`Realtime`].
//!
//! Tables are JSON row vectors behind a `tokio::sync::RwLock`; every write is
//! published on a broadcast channel so subscribers observe the same change
//! notifications the hosted platform would send. Server-side defaults (`id`,
//! `created_at`) are filled in on insert.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use super::{ChangeEvent, ChangeKind, ChannelSpec, Query, Realtime, Store, Subscription, Table};
use crate::errors::StoreError;

const CHANGE_BUFFER: usize = 256;

pub struct MemoryStore {
    tables: RwLock<HashMap<Table, Vec<Value>>>,
    changes: broadcast::Sender<ChangeEvent>,
    failing_writes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            tables: RwLock::new(HashMap::new()),
            changes,
            failing_writes: AtomicUsize::new(0),
        }
    }

    /// Reject the next `n` writes (insert/update/delete) as if the network
    /// dropped them.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, AtomicOrdering::SeqCst);
    }

    /// Insert rows directly, still emitting change notifications.
    pub async fn seed(&self, table: Table, rows: Vec<Value>) {
        let mut tables = self.tables.write().await;
        let entries = tables.entry(table).or_default();
        for row in rows {
            let row = with_defaults(table, row);
            entries.push(row.clone());
            self.publish(table, ChangeKind::Insert, Some(row), None);
        }
    }

    pub async fn rows(&self, table: Table) -> Vec<Value> {
        self.tables
            .read()
            .await
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    fn check_write(&self) -> Result<(), StoreError> {
        let injected = self.failing_writes.fetch_update(
            AtomicOrdering::SeqCst,
            AtomicOrdering::SeqCst,
            |n| n.checked_sub(1),
        );
        if injected.is_ok() {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }

    fn publish(&self, table: Table, kind: ChangeKind, new: Option<Value>, old: Option<Value>) {
        // No receivers is fine.
        let _ = self.changes.send(ChangeEvent {
            table: table.as_str().to_string(),
            kind,
            new,
            old,
            commit_timestamp: Some(chrono::Utc::now().to_rfc3339()),
        });
    }
}

fn with_defaults(table: Table, mut row: Value) -> Value {
    if let Value::Object(ref mut map) = row {
        map.entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        if table == Table::ChatMessages {
            map.entry("created_at")
                .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339()));
        }
    }
    row
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        // Nulls sort last, as in Postgres ascending order.
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

fn project(row: &Value, columns: &str) -> Value {
    if columns.trim() == "*" {
        return row.clone();
    }
    let mut out = serde_json::Map::new();
    for col in columns.split(',').map(str::trim) {
        if let Some(v) = row.get(col) {
            out.insert(col.to_string(), v.clone());
        }
    }
    Value::Object(out)
}

#[async_trait]
impl Store for MemoryStore {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<&Value> = tables
            .get(&table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| {
            query.order.iter().fold(Ordering::Equal, |acc, o| {
                acc.then_with(|| {
                    let ord = compare_values(a.get(&o.column), b.get(&o.column));
                    if o.ascending { ord } else { ord.reverse() }
                })
            })
        });
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|r| project(r, &query.columns))
            .collect())
    }

    async fn insert(&self, table: Table, rows: Vec<Value>) -> Result<Vec<Value>, StoreError> {
        self.check_write()?;
        let mut tables = self.tables.write().await;
        let entries = tables.entry(table).or_default();

        // The whole batch is checked before any row lands.
        let mut inserted: Vec<Value> = Vec::with_capacity(rows.len());
        for row in rows {
            if !row.is_object() {
                return Err(StoreError::Rejected {
                    status: 400,
                    code: None,
                    message: format!("{} rows must be objects", table),
                });
            }
            let row = with_defaults(table, row);
            let id = row.get("id");
            if entries.iter().chain(inserted.iter()).any(|r| r.get("id") == id) {
                return Err(StoreError::Rejected {
                    status: 409,
                    code: Some("23505".into()),
                    message: format!("duplicate key value violates unique constraint \"{}_pkey\"", table),
                });
            }
            inserted.push(row);
        }
        entries.extend(inserted.iter().cloned());
        for row in &inserted {
            self.publish(table, ChangeKind::Insert, Some(row.clone()), None);
        }
        Ok(inserted)
    }

    async fn update(
        &self,
        table: Table,
        patch: Value,
        query: &Query,
    ) -> Result<Vec<Value>, StoreError> {
        self.check_write()?;
        let Value::Object(fields) = patch else {
            return Err(StoreError::Rejected {
                status: 400,
                code: None,
                message: "update patch must be an object".into(),
            });
        };
        let mut tables = self.tables.write().await;
        let mut updated = Vec::new();
        if let Some(rows) = tables.get_mut(&table) {
            for row in rows.iter_mut().filter(|r| query.matches(r)) {
                let old = row.clone();
                if let Value::Object(map) = row {
                    for (k, v) in &fields {
                        map.insert(k.clone(), v.clone());
                    }
                }
                updated.push((old, row.clone()));
            }
        }
        for (old, new) in &updated {
            self.publish(table, ChangeKind::Update, Some(new.clone()), Some(old.clone()));
        }
        Ok(updated.into_iter().map(|(_, new)| new).collect())
    }

    async fn delete(&self, table: Table, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.check_write()?;
        let mut tables = self.tables.write().await;
        let mut removed = Vec::new();
        if let Some(rows) = tables.get_mut(&table) {
            rows.retain(|r| {
                if query.matches(r) {
                    removed.push(r.clone());
                    false
                } else {
                    true
                }
            });
        }
        for row in &removed {
            // Default replica identity: only the key is in the old record.
            let key = serde_json::json!({ "id": row.get("id").cloned().unwrap_or(Value::Null) });
            self.publish(table, ChangeKind::Delete, None, Some(key));
        }
        Ok(removed)
    }
}

#[async_trait]
impl Realtime for MemoryStore {
    async fn subscribe(&self, channel: ChannelSpec) -> Result<Subscription, StoreError> {
        let mut changes = self.changes.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let name = channel.name.clone();
        let forward = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) => {
                        if channel.matches(&event) && tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(channel = %channel.name, missed = n, "realtime subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::new(name, rx, move || forward.abort()))
    }
}
