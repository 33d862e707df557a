use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

mod cmd;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(version, about = "Team task board client for a hosted Postgres backend")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to taskboard.toml (defaults to the user config directory)
    #[arg(long, global = true, env = "TASKBOARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Project to act on instead of the remembered one
    #[arg(long, global = true)]
    pub project: Option<Uuid>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in, sign out and inspect the session
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// List teams
    Teams,
    /// List projects of a team
    Projects {
        /// Team id (defaults to the active team)
        #[arg(long)]
        team: Option<Uuid>,
    },
    /// List members of a team
    Members {
        #[arg(long)]
        team: Option<Uuid>,
    },
    /// Remember the active team and/or project (with --project)
    Use {
        #[arg(long)]
        team: Option<Uuid>,
    },
    /// Show the board of the active project
    Board {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Create, edit, move and delete tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Project chat
    Chat {
        #[command(subcommand)]
        command: ChatCommands,
    },
    /// Show or change the remembered board filter
    Filter {
        #[command(subcommand)]
        command: Option<FilterCommands>,
    },
    /// Follow the board (and optionally chat) live until interrupted
    Watch {
        #[command(flatten)]
        filter: FilterArgs,
        /// Also print incoming chat messages
        #[arg(long)]
        chat: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(clap::Args, Clone, Default)]
pub struct FilterArgs {
    /// Only tasks with this label
    #[arg(long)]
    pub label: Option<String>,
    /// Only tasks assigned to these members (repeatable)
    #[arg(long = "assignee")]
    pub assignees: Vec<String>,
    /// Only tasks whose title or description contains this text
    #[arg(long)]
    pub search: Option<String>,
    /// Ignore the remembered filter
    #[arg(long)]
    pub no_saved_filter: bool,
}

#[derive(Subcommand, Clone)]
pub enum FilterCommands {
    /// Show the remembered filter
    Show,
    /// Toggle a label quick filter (Bug, Feature, Design, Docs)
    Label { label: String },
    /// Toggle filtering by an assignee
    Assignee { name: String },
    /// Set the search text, or clear it when omitted
    Search { text: Option<String> },
    /// Remove every filter
    Clear,
}

#[derive(Subcommand, Clone)]
pub enum AuthCommands {
    /// Email a magic sign-in link
    Login {
        #[arg(long)]
        email: String,
    },
    /// Sign in with an OAuth provider
    Oauth {
        #[arg(long, default_value = taskboard::store::auth::DEFAULT_OAUTH_PROVIDER)]
        provider: String,
        /// Print the URL instead of opening a browser
        #[arg(long)]
        no_browser: bool,
    },
    /// Complete sign-in from the URL the browser landed on
    Callback { url: String },
    /// Show the current session
    Status,
    /// Refresh the access token
    Refresh,
    /// Sign out and forget the session
    Logout,
}

#[derive(Subcommand, Clone)]
pub enum TaskCommands {
    /// Add a task to a column (by slug, title or id)
    Add {
        title: String,
        #[arg(long, default_value = "todo")]
        column: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Edit task fields
    Edit {
        id: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Move a task to a column at an index, renumbering affected columns
    Move {
        id: Uuid,
        column: String,
        #[arg(long, default_value = "0")]
        index: usize,
    },
    /// Delete a task
    Rm { id: Uuid },
}

#[derive(Subcommand, Clone)]
pub enum ChatCommands {
    /// Show recent messages, newest first
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Post a message
    Send { message: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default taskboard.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = taskboard::config::Config::load(cli.config.clone())?;
    let _log_guard = taskboard::logging::init(&config.file.logging, cli.verbose)?;

    match &cli.command {
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
        Commands::Auth { command } => cmd::cmd_auth(&config, command.clone()).await?,
        Commands::Teams => cmd::cmd_teams(&config).await?,
        Commands::Projects { team } => cmd::cmd_projects(&config, *team).await?,
        Commands::Members { team } => cmd::cmd_members(&config, *team).await?,
        Commands::Use { team } => cmd::cmd_use(&config, *team, cli.project).await?,
        Commands::Board { filter } => cmd::cmd_board(&config, cli.project, filter).await?,
        Commands::Task { command } => cmd::cmd_task(&config, cli.project, command.clone()).await?,
        Commands::Chat { command } => cmd::cmd_chat(&config, cli.project, command.clone()).await?,
        Commands::Filter { command } => cmd::cmd_filter(&config, command.clone())?,
        Commands::Watch { filter, chat } => {
            cmd::cmd_watch(&config, cli.project, filter, *chat).await?
        }
    }

    Ok(())
}
