//! Client-side task filtering for board views.

use serde::{Deserialize, Serialize};

use super::models::Task;

/// Labels offered as quick filters.
pub const KNOWN_LABELS: [&str; 4] = ["Bug", "Feature", "Design", "Docs"];

/// Label badge shown for tasks without a label.
pub const FALLBACK_LABEL: &str = "General";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Case-insensitive exact label match.
    #[serde(default)]
    pub label: Option<String>,
    /// Tasks whose assignee is any of these. Empty means no restriction.
    #[serde(default)]
    pub assignees: Vec<String>,
    /// Case-insensitive substring of title or description.
    #[serde(default)]
    pub search: String,
}

/// The quick-filter spelling of `name`, if it is one of [`KNOWN_LABELS`].
pub fn known_label(name: &str) -> Option<&'static str> {
    KNOWN_LABELS
        .iter()
        .copied()
        .find(|l| l.eq_ignore_ascii_case(name.trim()))
}

impl TaskFilter {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.assignees.is_empty() && self.search.trim().is_empty()
    }

    /// Select `label`, or clear it when it is already selected.
    pub fn toggle_label(&mut self, label: &str) {
        if self
            .label
            .as_deref()
            .is_some_and(|l| l.eq_ignore_ascii_case(label))
        {
            self.label = None;
        } else {
            self.label = Some(label.to_string());
        }
    }

    pub fn toggle_assignee(&mut self, name: &str) {
        if let Some(idx) = self.assignees.iter().position(|a| a == name) {
            self.assignees.remove(idx);
        } else {
            self.assignees.push(name.to_string());
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(ref label) = self.label
            && !task
                .label
                .as_deref()
                .unwrap_or("")
                .eq_ignore_ascii_case(label)
        {
            return false;
        }
        if !self.assignees.is_empty()
            && !task
                .assignee
                .as_ref()
                .is_some_and(|a| self.assignees.contains(a))
        {
            return false;
        }
        let query = self.search.trim().to_lowercase();
        if !query.is_empty() {
            let hit = |s: Option<&str>| s.is_some_and(|s| s.to_lowercase().contains(&query));
            if !hit(Some(&task.title)) && !hit(task.description.as_deref()) {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, tasks: &'a [Task]) -> Vec<&'a Task> {
        tasks.iter().filter(|t| self.matches(t)).collect()
    }
}
