//! Board rendering and the live `watch` view.

use std::collections::HashSet;

use anyhow::Result;
use console::style;
use uuid::Uuid;

use taskboard::board::filter::{FALLBACK_LABEL, TaskFilter};
use taskboard::board::{ChatFeed, ChatMessage, ColumnView, LiveBoard, LiveOptions, column_views};
use taskboard::config::Config;
use taskboard::preferences::Preferences;

use super::super::FilterArgs;
use super::{Client, short_id};

/// Saved filter (unless disabled) with command-line overrides on top.
pub fn resolve_filter(args: &FilterArgs, prefs: &Preferences) -> TaskFilter {
    let mut filter = if args.no_saved_filter {
        TaskFilter::default()
    } else {
        prefs.filter.clone()
    };
    if let Some(label) = &args.label {
        filter.label = Some(label.clone());
    }
    if !args.assignees.is_empty() {
        filter.assignees = args.assignees.clone();
    }
    if let Some(search) = &args.search {
        filter.search = search.clone();
    }
    filter
}

fn progress_bar(progress: u8) -> String {
    let filled = (progress as usize + 5) / 10;
    format!("{}{}", "█".repeat(filled), "░".repeat(10 - filled.min(10)))
}

pub fn render_columns(views: &[ColumnView]) {
    for view in views {
        println!(
            "{} {}  {} {}%",
            style(&view.column.title).bold().cyan(),
            style(format!("({})", view.tasks.len())).dim(),
            progress_bar(view.progress),
            view.progress
        );
        if view.tasks.is_empty() {
            println!("  {}", style("No tasks").dim());
        }
        for task in &view.tasks {
            let label = task.label.as_deref().unwrap_or(FALLBACK_LABEL);
            let assignee = task
                .assignee
                .as_deref()
                .map(|a| format!("  @{}", a))
                .unwrap_or_default();
            println!(
                "  {} [{}] {}{}  {}",
                style(short_id(task.id)).dim(),
                style(label).yellow(),
                task.title,
                style(assignee).magenta(),
                style(task.status.display_name()).dim()
            );
        }
        println!();
    }
}

fn render_message(message: &ChatMessage) {
    println!(
        "{}  {}",
        style(message.created_at.format("%Y-%m-%d %H:%M")).dim(),
        message.content
    );
}

/// Messages of a newest-first feed not printed yet, oldest first. `seen` is
/// replaced by the ids currently in the feed, so it never outgrows it.
fn unseen<'a>(messages: &'a [ChatMessage], seen: &mut HashSet<Uuid>) -> Vec<&'a ChatMessage> {
    let fresh: Vec<&ChatMessage> = messages
        .iter()
        .rev()
        .filter(|m| !seen.contains(&m.id))
        .collect();
    *seen = messages.iter().map(|m| m.id).collect();
    fresh
}

pub async fn cmd_board(config: &Config, project: Option<Uuid>, args: &FilterArgs) -> Result<()> {
    let client = Client::connect(config).await?;
    let project_id = client.project(project).await?;
    let filter = resolve_filter(args, &client.preferences()?);

    let board = client.service().fetch_board(project_id).await?;
    if !filter.is_empty() {
        println!("{}", style(format!("Filter: {:?}", filter)).dim());
    }
    render_columns(&column_views(&board, Some(&filter)));
    Ok(())
}

pub async fn cmd_watch(
    config: &Config,
    project: Option<Uuid>,
    args: &FilterArgs,
    chat: bool,
) -> Result<()> {
    let client = Client::connect(config).await?;
    let project_id = client.project(project).await?;
    let filter = resolve_filter(args, &client.preferences()?);
    let section = &config.file.board;

    let board = LiveBoard::open(&client.backend, project_id, LiveOptions::from(section)).await?;
    let mut board_changes = board.changes();

    let feed = if chat {
        Some(
            ChatFeed::open(
                &client.backend,
                project_id,
                section.chat_history,
                section.chat_capacity,
            )
            .await?,
        )
    } else {
        None
    };
    let mut chat_changes = feed.as_ref().map(|f| f.changes());
    let mut seen = HashSet::new();

    let redraw = |views: Vec<ColumnView>| {
        let _ = console::Term::stdout().clear_screen();
        println!(
            "{} {}  {}",
            style("Board").bold(),
            style(short_id(board.project_id())).dim(),
            style("(Ctrl-C to stop)").dim()
        );
        println!();
        render_columns(&views);
    };

    redraw(board.column_view(Some(&filter)).await);
    if let Some(feed) = &feed {
        for message in unseen(&feed.messages().await, &mut seen) {
            render_message(message);
        }
    }

    loop {
        tokio::select! {
            changed = board_changes.changed() => {
                if changed.is_err() {
                    break;
                }
                redraw(board.column_view(Some(&filter)).await);
            }
            changed = async {
                match chat_changes.as_mut() {
                    Some(rx) => rx.changed().await,
                    None => std::future::pending().await,
                }
            } => {
                if changed.is_err() {
                    chat_changes = None;
                    continue;
                }
                if let Some(feed) = &feed {
                    for message in unseen(&feed.messages().await, &mut seen) {
                        render_message(message);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Stopped watching.");
                break;
            }
        }
    }

    board.close();
    Ok(())
}
