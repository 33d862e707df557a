//! Realtime merge reducer.
//!
//! Folds change notifications into in-memory row lists. The reducer itself
//! does not de-duplicate INSERTs; [`apply_deduped`] is the variant used by the
//! live board, which sees its own writes echoed back.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::models::{ChatMessage, Row};
use crate::errors::StoreError;
use crate::store::{ChangeEvent, ChangeKind};

/// A decoded change for rows of type `R`.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange<R> {
    Insert(R),
    Update(R),
    Delete(Uuid),
    Ignored,
}

#[derive(Deserialize)]
struct RowKey {
    id: Uuid,
}

impl<R: DeserializeOwned> RowChange<R> {
    /// Decode a notification. DELETE only needs the old row's primary key,
    /// which is all the store sends unless the table has full replica identity.
    pub fn decode(event: &ChangeEvent) -> Result<Self, StoreError> {
        let decode_err = |e| StoreError::decode(event.table.clone(), e);
        match event.kind {
            ChangeKind::Insert | ChangeKind::Update => {
                let Some(new) = event.new.clone() else {
                    return Ok(Self::Ignored);
                };
                let row: R = serde_json::from_value(new).map_err(decode_err)?;
                Ok(if event.kind == ChangeKind::Insert {
                    Self::Insert(row)
                } else {
                    Self::Update(row)
                })
            }
            ChangeKind::Delete => {
                let Some(old) = event.old.clone() else {
                    return Ok(Self::Ignored);
                };
                let key: RowKey = serde_json::from_value(old).map_err(decode_err)?;
                Ok(Self::Delete(key.id))
            }
            ChangeKind::Other => Ok(Self::Ignored),
        }
    }
}

/// Apply one change: INSERT prepends, UPDATE replaces by id (no-op when
/// absent), DELETE removes every row with the id.
pub fn apply<R: Row>(rows: &mut Vec<R>, change: RowChange<R>) {
    match change {
        RowChange::Insert(row) => rows.insert(0, row),
        RowChange::Update(row) => {
            let id = row.row_id();
            if let Some(slot) = rows.iter_mut().find(|r| r.row_id() == id) {
                *slot = row;
            }
        }
        RowChange::Delete(id) => rows.retain(|r| r.row_id() != id),
        RowChange::Ignored => {}
    }
}

/// Like [`apply`], but an INSERT for an id already present replaces it.
pub fn apply_deduped<R: Row>(rows: &mut Vec<R>, change: RowChange<R>) {
    match change {
        RowChange::Insert(row) if rows.iter().any(|r| r.row_id() == row.row_id()) => {
            apply(rows, RowChange::Update(row))
        }
        other => apply(rows, other),
    }
}

/// Decode and apply a raw notification, logging and ignoring undecodable
/// payloads.
pub fn merge_event<R: Row + DeserializeOwned>(rows: &mut Vec<R>, event: &ChangeEvent) {
    match RowChange::decode(event) {
        Ok(change) => apply(rows, change),
        Err(e) => tracing::warn!(table = %event.table, error = %e, "dropping undecodable change"),
    }
}

/// Chat feed reducer: only INSERTs matter, newest first, capped at `capacity`.
pub fn apply_chat(messages: &mut Vec<ChatMessage>, change: RowChange<ChatMessage>, capacity: usize) {
    if let RowChange::Insert(message) = change {
        if messages.iter().any(|m| m.id == message.id) {
            return;
        }
        messages.insert(0, message);
        messages.truncate(capacity);
    }
}
