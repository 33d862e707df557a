//! Optimistic drag-and-drop reordering.
//!
//! [`apply_move`] is pure: it maps the current task list and a [`Move`] to a
//! new list with dense per-column positions. Persisting the result is the
//! caller's job (see `live::LiveBoard::drag`), and [`position_changes`]
//! lists the rows whose column or position differ between two lists.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::models::Task;

/// Where a dragged card was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropTarget {
    pub column_id: Uuid,
    /// Insertion slot within the destination column's visible order.
    pub index: usize,
}

/// Result of a drag gesture. `destination` is `None` when the card was
/// dropped outside every column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DragResult {
    pub task_id: Uuid,
    pub source_column: Uuid,
    pub destination: Option<DropTarget>,
}

impl DragResult {
    pub fn into_move(self) -> Option<Move> {
        self.destination.map(|dest| Move {
            task_id: self.task_id,
            from_column: self.source_column,
            to_column: dest.column_id,
            to_index: dest.index,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub task_id: Uuid,
    pub from_column: Uuid,
    pub to_column: Uuid,
    pub to_index: usize,
}

/// A row whose placement changed, as persisted by `move_task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionChange {
    pub task_id: Uuid,
    pub column_id: Uuid,
    pub position: i32,
}

/// Apply a move to a task list.
///
/// The moving task is spliced into the destination column at `to_index`
/// (clamped) and the destination column is renumbered 0..n-1. When the task
/// leaves its column, that column is renumbered too. An unknown task id
/// returns the list unchanged. Tasks keep their relative order in the
/// returned `Vec`; only `column_id` and `position` change.
pub fn apply_move(tasks: &[Task], mv: &Move) -> Vec<Task> {
    let Some(moving_idx) = tasks.iter().position(|t| t.id == mv.task_id) else {
        tracing::debug!(task_id = %mv.task_id, "move ignored: task not in list");
        return tasks.to_vec();
    };
    let source = tasks[moving_idx].column_id;
    if source != mv.from_column {
        tracing::debug!(
            task_id = %mv.task_id,
            recorded = %source,
            dragged_from = %mv.from_column,
            "drag source differs from recorded column; using recorded column"
        );
    }

    let mut next = tasks.to_vec();

    // Destination order: siblings by position, moving task spliced in.
    let mut dest: Vec<usize> = next
        .iter()
        .enumerate()
        .filter(|(_, t)| t.column_id == mv.to_column && t.id != mv.task_id)
        .map(|(i, _)| i)
        .collect();
    dest.sort_by_key(|&i| next[i].position);
    dest.insert(mv.to_index.min(dest.len()), moving_idx);

    next[moving_idx].column_id = mv.to_column;
    renumber(&mut next, &dest);

    if source != mv.to_column {
        let mut src: Vec<usize> = next
            .iter()
            .enumerate()
            .filter(|(_, t)| t.column_id == source)
            .map(|(i, _)| i)
            .collect();
        src.sort_by_key(|&i| next[i].position);
        renumber(&mut next, &src);
    }

    next
}

fn renumber(tasks: &mut [Task], order: &[usize]) {
    for (position, &i) in order.iter().enumerate() {
        tasks[i].position = position as i32;
    }
}

/// Rows of `after` whose column or position differ from `before`, with the
/// moving task first so it is persisted before its siblings.
pub fn position_changes(before: &[Task], after: &[Task], moving: Uuid) -> Vec<PositionChange> {
    let mut changes: Vec<PositionChange> = after
        .iter()
        .filter(|t| {
            before
                .iter()
                .find(|b| b.id == t.id)
                .is_none_or(|b| b.column_id != t.column_id || b.position != t.position)
        })
        .map(|t| PositionChange {
            task_id: t.id,
            column_id: t.column_id,
            position: t.position,
        })
        .collect();
    changes.sort_by_key(|c| c.task_id != moving);
    changes
}
