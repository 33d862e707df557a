//! Board data service: typed reads and writes against a [`Store`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use uuid::Uuid;

use super::filter::TaskFilter;
use super::reorder::PositionChange;
use super::models::{
    Board, Column, ColumnView, DEFAULT_COLUMNS, NewTask, Project, Task, TaskPatch, TaskStatus,
    Team, TeamMember,
};
use crate::errors::BoardError;
use crate::store::{Backend, Query, Store, Table, decode_rows, select_as};

#[derive(Clone)]
pub struct BoardService {
    store: Arc<dyn Store>,
}

impl BoardService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn from_backend(backend: &Backend) -> Self {
        Self::new(backend.store.clone())
    }

    /// Columns and tasks of a project ordered by position. A project without
    /// columns gets the three default columns and an empty task list.
    pub async fn fetch_board(&self, project_id: Uuid) -> Result<Board, BoardError> {
        let columns = self.fetch_columns(project_id).await?;
        if columns.is_empty() {
            let columns = self.bootstrap_columns(project_id).await?;
            return Ok(Board {
                columns,
                tasks: Vec::new(),
            });
        }
        let tasks: Vec<Task> = select_as(
            self.store.as_ref(),
            Table::Tasks,
            &Query::new().eq("project_id", project_id).order("position"),
        )
        .await?;
        Ok(Board { columns, tasks })
    }

    pub async fn fetch_columns(&self, project_id: Uuid) -> Result<Vec<Column>, BoardError> {
        Ok(select_as(
            self.store.as_ref(),
            Table::Columns,
            &Query::new().eq("project_id", project_id).order("position"),
        )
        .await?)
    }

    async fn bootstrap_columns(&self, project_id: Uuid) -> Result<Vec<Column>, BoardError> {
        tracing::info!(%project_id, "creating default columns");
        let rows = DEFAULT_COLUMNS
            .iter()
            .enumerate()
            .map(|(position, (title, slug))| {
                json!({
                    "id": Uuid::new_v4(),
                    "project_id": project_id,
                    "title": title,
                    "slug": slug,
                    "position": position,
                })
            })
            .collect();
        let inserted = self.store.insert(Table::Columns, rows).await?;
        let mut columns: Vec<Column> = decode_rows(Table::Columns, inserted)?;
        columns.sort_by_key(|c| c.position);
        Ok(columns)
    }

    /// Append a task to the end of `column_id`.
    pub async fn create_task(
        &self,
        project_id: Uuid,
        column_id: Uuid,
        fields: NewTask,
    ) -> Result<Task, BoardError> {
        let title = fields.title.trim().to_string();
        if title.is_empty() {
            return Err(BoardError::InvalidInput("task title must not be blank".into()));
        }

        let top = self
            .store
            .select(
                Table::Tasks,
                &Query::new()
                    .select("position")
                    .eq("project_id", project_id)
                    .eq("column_id", column_id)
                    .order_desc("position")
                    .limit(1),
            )
            .await?;
        let max_position = top
            .first()
            .and_then(|row| row.get("position"))
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        let position = max_position + 1;

        let mut row = serde_json::to_value(NewTask { title, ..fields })
            .map_err(|e| BoardError::InvalidInput(e.to_string()))?;
        if let Value::Object(ref mut map) = row {
            map.insert("id".into(), json!(Uuid::new_v4()));
            map.insert("project_id".into(), json!(project_id));
            map.insert("column_id".into(), json!(column_id));
            map.insert("position".into(), json!(position));
        }
        let inserted = self.store.insert(Table::Tasks, vec![row]).await?;
        let task: Task = single(Table::Tasks, inserted)?
            .ok_or_else(|| BoardError::InvalidInput("insert returned no row".into()))?;
        tracing::debug!(task_id = %task.id, %column_id, position, "task created");
        Ok(task)
    }

    pub async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> Result<Task, BoardError> {
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(BoardError::InvalidInput("task title must not be blank".into()));
        }
        if patch.is_empty() {
            return Err(BoardError::InvalidInput("nothing to update".into()));
        }
        let body = serde_json::to_value(patch).map_err(|e| BoardError::InvalidInput(e.to_string()))?;
        let updated = self
            .store
            .update(Table::Tasks, body, &Query::new().eq("id", id))
            .await?;
        single(Table::Tasks, updated)?.ok_or(BoardError::TaskNotFound { id })
    }

    /// Set a task's column and position as given. Siblings are not renumbered.
    pub async fn move_task(
        &self,
        id: Uuid,
        to_column_id: Uuid,
        to_position: i32,
    ) -> Result<Task, BoardError> {
        let updated = self
            .store
            .update(
                Table::Tasks,
                json!({ "column_id": to_column_id, "position": to_position }),
                &Query::new().eq("id", id),
            )
            .await?;
        single(Table::Tasks, updated)?.ok_or(BoardError::TaskNotFound { id })
    }

    /// Delete a task and return the removed row.
    pub async fn delete_task(&self, id: Uuid) -> Result<Task, BoardError> {
        let removed = self
            .store
            .delete(Table::Tasks, &Query::new().eq("id", id))
            .await?;
        single(Table::Tasks, removed)?.ok_or(BoardError::TaskNotFound { id })
    }

    /// Persist reorder results one row at a time, in order. Each write is
    /// independent; the failures are returned.
    pub async fn persist_positions(
        &self,
        changes: &[PositionChange],
    ) -> Vec<(PositionChange, BoardError)> {
        let mut failures = Vec::new();
        for change in changes {
            if let Err(e) = self
                .move_task(change.task_id, change.column_id, change.position)
                .await
            {
                tracing::warn!(task_id = %change.task_id, error = %e, "failed to persist move");
                failures.push((*change, e));
            }
        }
        failures
    }

    pub async fn list_teams(&self) -> Result<Vec<Team>, BoardError> {
        Ok(select_as(self.store.as_ref(), Table::Teams, &Query::new().order("name")).await?)
    }

    pub async fn list_projects(&self, team_id: Uuid) -> Result<Vec<Project>, BoardError> {
        Ok(select_as(
            self.store.as_ref(),
            Table::Projects,
            &Query::new().eq("team_id", team_id).order("name"),
        )
        .await?)
    }

    pub async fn list_members(&self, team_id: Uuid) -> Result<Vec<TeamMember>, BoardError> {
        Ok(select_as(
            self.store.as_ref(),
            Table::TeamMembers,
            &Query::new().eq("team_id", team_id),
        )
        .await?)
    }
}

fn single<T: DeserializeOwned>(table: Table, rows: Vec<Value>) -> Result<Option<T>, BoardError> {
    Ok(decode_rows(table, rows)?.into_iter().next())
}

/// Completion percentage of a column, rounded to 0..=100.
///
/// A task counts as done when its status is `done` OR the column's slug is
/// `done`, so every task in the Done column counts regardless of status.
/// The two conditions can disagree; the column slug wins.
pub fn column_progress(column: &Column, tasks: &[Task]) -> u8 {
    let column_tasks: Vec<&Task> = tasks.iter().filter(|t| t.column_id == column.id).collect();
    if column_tasks.is_empty() {
        return 0;
    }
    let done = column_tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Done || column.is_done_column())
        .count();
    ((done as f64 / column_tasks.len() as f64) * 100.0).round() as u8
}

/// Per-column ordered tasks with progress. Progress is computed over the
/// filtered tasks, matching what the view shows.
pub fn column_views(board: &Board, filter: Option<&TaskFilter>) -> Vec<ColumnView> {
    let visible: Vec<Task> = match filter {
        Some(f) => f.apply(&board.tasks).into_iter().cloned().collect(),
        None => board.tasks.clone(),
    };
    let mut columns = board.columns.clone();
    columns.sort_by_key(|c| c.position);
    columns
        .into_iter()
        .map(|column| {
            let mut tasks: Vec<Task> = visible
                .iter()
                .filter(|t| t.column_id == column.id)
                .cloned()
                .collect();
            tasks.sort_by_key(|t| t.position);
            let progress = column_progress(&column, &visible);
            ColumnView {
                column,
                tasks,
                progress,
            }
        })
        .collect()
}
