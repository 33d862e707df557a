use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row that can be matched by its primary key, used by the realtime reducer.
pub trait Row {
    fn row_id(&self) -> Uuid;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamMember {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub team_id: Uuid,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl TeamMember {
    /// Name shown for the member and used as the assignee filter key.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or("?")
    }

    /// Two-letter uppercase initials of the label.
    pub fn initials(&self) -> String {
        self.label().chars().take(2).collect::<String>().to_uppercase()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub slug: String,
    pub position: i32,
}

impl Column {
    pub fn is_done_column(&self) -> bool {
        self.slug == DONE_SLUG
    }
}

pub const DONE_SLUG: &str = "done";

/// Columns created the first time a project is opened without any.
pub const DEFAULT_COLUMNS: [(&str, &str); 3] = [
    ("To Do", "todo"),
    ("In Progress", "inprogress"),
    ("Done", DONE_SLUG),
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "inprogress",
            Self::Done => "done",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Todo => "To Do",
            Self::InProgress => "In Progress",
            Self::Done => "Done",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "inprogress" | "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub column_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub assignee: Option<String>,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub project_id: Uuid,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Row for Task {
    fn row_id(&self) -> Uuid {
        self.id
    }
}

impl Row for Column {
    fn row_id(&self) -> Uuid {
        self.id
    }
}

impl Row for ChatMessage {
    fn row_id(&self) -> Uuid {
        self.id
    }
}

// Write payloads

/// Fields supplied when creating a task. Id, project, column and position are
/// assigned by the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewTask {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial task update. Only `Some` fields are sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.label.is_none()
            && self.status.is_none()
            && self.assignee.is_none()
    }
}

// View types

/// Columns and tasks of one project, both ordered by position.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Board {
    pub columns: Vec<Column>,
    pub tasks: Vec<Task>,
}

impl Board {
    /// Find a column by id, slug or case-insensitive title.
    pub fn find_column(&self, key: &str) -> Option<&Column> {
        if let Ok(id) = Uuid::parse_str(key) {
            return self.columns.iter().find(|c| c.id == id);
        }
        self.columns
            .iter()
            .find(|c| c.slug == key)
            .or_else(|| self.columns.iter().find(|c| c.title.eq_ignore_ascii_case(key)))
    }

    pub fn find_task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnView {
    pub column: Column,
    pub tasks: Vec<Task>,
    pub progress: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(slug: &str, title: &str, position: i32) -> Column {
        Column {
            id: Uuid::new_v4(),
            project_id: Uuid::nil(),
            title: title.into(),
            slug: slug.into(),
            position,
        }
    }

    #[test]
    fn test_task_status_round_trips_wire_names() {
        for status in [TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Done] {
            assert_eq!(TaskStatus::from_str(status.as_str()).unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!(TaskStatus::from_str("blocked").is_err());
    }

    #[test]
    fn test_task_deserializes_with_missing_optionals() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "project_id": Uuid::new_v4(),
            "column_id": Uuid::new_v4(),
            "title": "Write docs",
            "position": 3
        });
        let task: Task = serde_json::from_value(json).unwrap();
        assert_eq!(task.status, TaskStatus::Todo);
        assert!(task.label.is_none());
        assert_eq!(task.position, 3);
    }

    #[test]
    fn test_task_patch_serializes_only_set_fields() {
        let patch = TaskPatch {
            status: Some(TaskStatus::Done),
            ..TaskPatch::default()
        };
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, serde_json::json!({"status": "done"}));
        assert!(!patch.is_empty());
        assert!(TaskPatch::default().is_empty());
    }

    #[test]
    fn test_member_label_falls_back_to_email() {
        let member = TeamMember {
            id: None,
            team_id: Uuid::nil(),
            user_id: None,
            display_name: None,
            email: Some("dana@example.com".into()),
        };
        assert_eq!(member.label(), "dana@example.com");
        assert_eq!(member.initials(), "DA");
    }

    #[test]
    fn test_find_column_by_slug_title_and_id() {
        let todo = column("todo", "To Do", 0);
        let done = column("done", "Done", 1);
        let board = Board {
            columns: vec![todo.clone(), done.clone()],
            tasks: vec![],
        };
        assert_eq!(board.find_column("todo").map(|c| c.id), Some(todo.id));
        assert_eq!(board.find_column("DONE").map(|c| c.id), Some(done.id));
        assert_eq!(
            board.find_column(&done.id.to_string()).map(|c| c.id),
            Some(done.id)
        );
        assert!(board.find_column("archive").is_none());
    }
}
