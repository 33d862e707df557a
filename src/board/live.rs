//! Live board: a cached board kept in sync through realtime changes.
//!
//! The cache is written from three places: optimistic local edits, task
//! change notifications (folded with the de-duplicating reducer) and column
//! refetches. Every commit bumps a version on a watch channel so views can
//! re-render. After [`LiveBoard::close`] (or drop) no refetch commits.
//!
//! Drags are saved by a single worker in the order they were made, so the
//! sibling renumbering of one drag never interleaves with the next.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::filter::TaskFilter;
use super::merge::{self, RowChange};
use super::models::{Board, ColumnView, NewTask, Task, TaskPatch};
use super::reorder::{self, DragResult, PositionChange};
use super::service::{BoardService, column_views};
use crate::config::BoardSection;
use crate::errors::BoardError;
use crate::store::{Backend, ChannelSpec, Subscription, Table};

#[derive(Debug, Clone, Copy, Default)]
pub struct LiveOptions {
    /// Refetch the whole board after a drag fails to persist.
    pub reconcile_on_failure: bool,
}

impl From<&BoardSection> for LiveOptions {
    fn from(section: &BoardSection) -> Self {
        Self {
            reconcile_on_failure: section.reconcile_on_failure,
        }
    }
}

struct Shared {
    project_id: Uuid,
    service: BoardService,
    board: RwLock<Board>,
    closed: AtomicBool,
    version: watch::Sender<u64>,
    options: LiveOptions,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    async fn fold(&self, change: RowChange<Task>) {
        merge::apply_deduped(&mut self.board.write().await.tasks, change);
        self.bump();
    }

    async fn refresh(&self) -> Result<bool, BoardError> {
        let board = self.service.fetch_board(self.project_id).await?;
        if self.is_closed() {
            tracing::debug!(project_id = %self.project_id, "board closed; discarding refetch");
            return Ok(false);
        }
        *self.board.write().await = board;
        self.bump();
        Ok(true)
    }

    async fn refresh_columns(&self) -> Result<bool, BoardError> {
        let columns = self.service.fetch_columns(self.project_id).await?;
        if self.is_closed() {
            return Ok(false);
        }
        self.board.write().await.columns = columns;
        self.bump();
        Ok(true)
    }
}

/// Position writes of one drag, saved as a unit by the save worker.
struct SaveJob {
    changes: Vec<PositionChange>,
    done: oneshot::Sender<()>,
}

pub struct LiveBoard {
    shared: Arc<Shared>,
    pumps: Vec<JoinHandle<()>>,
    /// Dropped on close; the worker finishes queued saves and exits.
    saves: Option<mpsc::UnboundedSender<SaveJob>>,
}

impl LiveBoard {
    /// Subscribe to the project's task and column changes, then load the
    /// board. Changes that arrive during the load are applied afterwards.
    pub async fn open(
        backend: &Backend,
        project_id: Uuid,
        options: LiveOptions,
    ) -> Result<Self, BoardError> {
        let tasks_sub = backend
            .realtime
            .subscribe(ChannelSpec::filtered(Table::Tasks, "project_id", project_id))
            .await?;
        let columns_sub = backend
            .realtime
            .subscribe(ChannelSpec::filtered(Table::Columns, "project_id", project_id))
            .await?;

        let service = BoardService::from_backend(backend);
        let board = service.fetch_board(project_id).await?;
        tracing::info!(
            %project_id,
            columns = board.columns.len(),
            tasks = board.tasks.len(),
            "board opened"
        );

        let (version, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            project_id,
            service,
            board: RwLock::new(board),
            closed: AtomicBool::new(false),
            version,
            options,
        });
        let pumps = vec![
            spawn_task_pump(shared.clone(), tasks_sub),
            spawn_column_pump(shared.clone(), columns_sub),
        ];
        let (saves, jobs) = mpsc::unbounded_channel();
        spawn_save_worker(shared.clone(), jobs);
        Ok(Self {
            shared,
            pumps,
            saves: Some(saves),
        })
    }

    pub fn project_id(&self) -> Uuid {
        self.shared.project_id
    }

    /// Receiver that changes whenever the cached board does.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    pub async fn snapshot(&self) -> Board {
        self.shared.board.read().await.clone()
    }

    pub async fn column_view(&self, filter: Option<&TaskFilter>) -> Vec<ColumnView> {
        column_views(&*self.shared.board.read().await, filter)
    }

    /// Apply a drag locally and queue it for saving.
    ///
    /// Returns `None` when nothing changed (dropped outside any column, or an
    /// unknown task). Otherwise the returned handle completes once this
    /// drag's writes are done. The moving task is written first, then each
    /// sibling whose position changed. Failures are logged and never roll
    /// back the local state; with `reconcile_on_failure` the board is
    /// refetched.
    pub async fn drag(&self, result: DragResult) -> Option<JoinHandle<()>> {
        let mv = result.into_move()?;
        let (done, saved) = oneshot::channel();
        {
            let mut board = self.shared.board.write().await;
            let next = reorder::apply_move(&board.tasks, &mv);
            let changes = reorder::position_changes(&board.tasks, &next, mv.task_id);
            if changes.is_empty() {
                return None;
            }
            board.tasks = next;
            // Queued under the board lock so save order matches drag order.
            let queued = self
                .saves
                .as_ref()
                .is_some_and(|saves| saves.send(SaveJob { changes, done }).is_ok());
            if !queued {
                tracing::warn!(task_id = %mv.task_id, "board closed; move not saved");
            }
        }
        self.shared.bump();

        Some(tokio::spawn(async move {
            let _ = saved.await;
        }))
    }

    pub async fn add_task(&self, column_id: Uuid, fields: NewTask) -> Result<Task, BoardError> {
        let task = self
            .shared
            .service
            .create_task(self.shared.project_id, column_id, fields)
            .await?;
        self.shared.fold(RowChange::Insert(task.clone())).await;
        Ok(task)
    }

    pub async fn update_task(&self, id: Uuid, patch: &TaskPatch) -> Result<Task, BoardError> {
        let task = self.shared.service.update_task(id, patch).await?;
        self.shared.fold(RowChange::Update(task.clone())).await;
        Ok(task)
    }

    pub async fn delete_task(&self, id: Uuid) -> Result<Task, BoardError> {
        let task = self.shared.service.delete_task(id).await?;
        self.shared.fold(RowChange::Delete(id)).await;
        Ok(task)
    }

    /// Refetch the whole board. Returns `false` when the board was closed
    /// while the fetch was in flight and the result was discarded.
    pub async fn refresh(&self) -> Result<bool, BoardError> {
        if self.shared.is_closed() {
            return Err(BoardError::Closed);
        }
        self.shared.refresh().await
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        self.saves = None;
        tracing::debug!(project_id = %self.shared.project_id, "board closed");
    }
}

impl Drop for LiveBoard {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_save_worker(shared: Arc<Shared>, mut jobs: mpsc::UnboundedReceiver<SaveJob>) {
    tokio::spawn(async move {
        while let Some(job) = jobs.recv().await {
            let failures = shared.service.persist_positions(&job.changes).await;
            if !failures.is_empty()
                && shared.options.reconcile_on_failure
                && let Err(e) = shared.refresh().await
            {
                tracing::warn!(error = %e, "failed to refetch board after move failure");
            }
            let _ = job.done.send(());
        }
    });
}

fn spawn_task_pump(shared: Arc<Shared>, mut sub: Subscription) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = sub.recv().await {
            if shared.is_closed() {
                break;
            }
            match RowChange::<Task>::decode(&event) {
                Ok(change) => shared.fold(change).await,
                Err(e) => tracing::warn!(error = %e, "dropping undecodable task change"),
            }
        }
    })
}

fn spawn_column_pump(shared: Arc<Shared>, mut sub: Subscription) -> JoinHandle<()> {
    tokio::spawn(async move {
        while sub.recv().await.is_some() {
            // One refetch covers a burst of queued changes.
            while sub.try_recv().is_some() {}
            if shared.is_closed() {
                break;
            }
            if let Err(e) = shared.refresh_columns().await {
                tracing::warn!(error = %e, "failed to refetch columns");
            }
        }
    })
}
