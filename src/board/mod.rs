//! Task board domain: models, pure reducers, and the services built on them.
//!
//! ```text
//! models.rs   rows and write payloads (Team, Project, Column, Task, ...)
//! reorder.rs  drag-and-drop reordering, pure
//! merge.rs    realtime change reducer, pure
//! filter.rs   label / assignee / search filtering
//! service.rs  typed reads and writes over a Store
//! live.rs     realtime-synced board cache with optimistic drags
//! chat.rs     project chat history, sending, live feed
//! ```

pub mod chat;
pub mod filter;
pub mod live;
pub mod merge;
pub mod models;
pub mod reorder;
pub mod service;

pub use chat::{ChatFeed, ChatService};
pub use filter::TaskFilter;
pub use live::{LiveBoard, LiveOptions};
pub use models::{
    Board, ChatMessage, Column, ColumnView, NewTask, Project, Task, TaskPatch, TaskStatus, Team,
    TeamMember,
};
pub use reorder::{DragResult, DropTarget, Move};
pub use service::{BoardService, column_progress, column_views};
