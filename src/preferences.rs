//! Remembered selections: active team, active project and board filter.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::board::filter::TaskFilter;
use crate::board::models::{Project, Team};
use crate::board::service::BoardService;
use crate::errors::BoardError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub team_id: Option<Uuid>,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub filter: TaskFilter,
}

impl Preferences {
    /// Returns defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read preferences: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse preferences: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize preferences")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write preferences: {}", path.display()))
    }

    /// Switch team. The project belongs to the old team, so it is cleared.
    pub fn select_team(&mut self, team_id: Uuid) {
        if self.team_id != Some(team_id) {
            self.team_id = Some(team_id);
            self.project_id = None;
        }
    }

    /// Keep the active team if it still exists, else fall back to the first.
    pub fn default_team(&mut self, teams: &[Team]) -> Option<Uuid> {
        match self.team_id {
            Some(id) if teams.iter().any(|t| t.id == id) => {}
            _ => {
                self.team_id = teams.first().map(|t| t.id);
                self.project_id = None;
            }
        }
        self.team_id
    }

    /// Keep the active project if it is one of `projects`, else the first.
    pub fn default_project(&mut self, projects: &[Project]) -> Option<Uuid> {
        match self.project_id {
            Some(id) if projects.iter().any(|p| p.id == id) => {}
            _ => self.project_id = projects.first().map(|p| p.id),
        }
        self.project_id
    }

    /// Resolve the active project, choosing the first team and first project
    /// when nothing valid is selected.
    pub async fn resolve_project(&mut self, service: &BoardService) -> Result<Uuid, BoardError> {
        let teams = service.list_teams().await?;
        let team_id = self.default_team(&teams).ok_or(BoardError::NoProjectSelected)?;
        let projects = service.list_projects(team_id).await?;
        self.default_project(&projects)
            .ok_or(BoardError::NoProjectSelected)
    }
}
