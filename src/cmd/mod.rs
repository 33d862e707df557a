//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled                          |
//! |----------|-------------------------------------------|
//! | `auth`   | `Auth`                                    |
//! | `teams`  | `Teams`, `Projects`, `Members`, `Use`     |
//! | `board`  | `Board`, `Watch`                          |
//! | `filter` | `Filter`                                  |
//! | `task`   | `Task`                                    |
//! | `chat`   | `Chat`                                    |
//! | `config` | `Config`                                  |

pub mod auth;
pub mod board;
pub mod chat;
pub mod config;
pub mod filter;
pub mod task;
pub mod teams;

pub use auth::cmd_auth;
pub use board::{cmd_board, cmd_watch};
pub use chat::cmd_chat;
pub use config::cmd_config;
pub use filter::cmd_filter;
pub use task::cmd_task;
pub use teams::{cmd_members, cmd_projects, cmd_teams, cmd_use};

use anyhow::{Context, Result};
use uuid::Uuid;

use taskboard::board::BoardService;
use taskboard::config::Config;
use taskboard::preferences::Preferences;
use taskboard::store::{AuthClient, Backend};

/// Everything a command needs to talk to the backend.
pub struct Client {
    pub config: Config,
    pub auth: AuthClient,
    pub backend: Backend,
}

impl Client {
    pub async fn connect(config: &Config) -> Result<Self> {
        let auth = auth_client(config)?;
        if let Err(e) = auth.ensure_fresh().await {
            tracing::warn!(error = %e, "could not refresh session; continuing with the stored token");
        }
        let backend = Backend::connect(config, &auth).context("Failed to set up backend client")?;
        Ok(Self {
            config: config.clone(),
            auth,
            backend,
        })
    }

    pub fn service(&self) -> BoardService {
        BoardService::from_backend(&self.backend)
    }

    pub fn preferences(&self) -> Result<Preferences> {
        Preferences::load(&self.config.preferences_path())
    }

    /// The project to act on: `--project`, else the remembered one, else the
    /// first project of the first team. A newly chosen default is remembered.
    pub async fn project(&self, explicit: Option<Uuid>) -> Result<Uuid> {
        if let Some(id) = explicit {
            return Ok(id);
        }
        let mut prefs = self.preferences()?;
        let before = prefs.clone();
        let project = prefs.resolve_project(&self.service()).await.context(
            "No project available. Create a team and project, or pass --project",
        )?;
        if prefs != before {
            prefs.save(&self.config.preferences_path())?;
        }
        Ok(project)
    }
}

pub fn auth_client(config: &Config) -> Result<AuthClient> {
    config.require_backend()?;
    let backend = &config.file.backend;
    AuthClient::new(
        &backend.url,
        &backend.anon_key,
        Some(config.session_path()),
    )
    .context("Failed to restore session")
}

/// First eight characters of an id, enough to recognise a row in listings.
pub fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}
