//! Task commands: `taskboard task add|edit|move|rm`.
//!
//! `edit` and `rm` address a task by id alone and never resolve a project.

use anyhow::{Result, anyhow, bail};
use console::style;
use uuid::Uuid;

use taskboard::board::reorder::{Move, apply_move, position_changes};
use taskboard::board::{Board, NewTask, TaskPatch, TaskStatus};
use taskboard::config::Config;
use taskboard::errors::BoardError;

use super::super::TaskCommands;
use super::{Client, short_id};

fn parse_status(value: Option<String>) -> Result<Option<TaskStatus>> {
    value
        .map(|s| s.parse::<TaskStatus>().map_err(|e| anyhow!(e)))
        .transpose()
}

fn column_id(board: &Board, key: &str) -> Result<Uuid, BoardError> {
    board
        .find_column(key)
        .map(|c| c.id)
        .ok_or_else(|| BoardError::ColumnNotFound {
            key: key.to_string(),
        })
}

pub async fn cmd_task(config: &Config, project: Option<Uuid>, command: TaskCommands) -> Result<()> {
    let client = Client::connect(config).await?;
    let service = client.service();

    match command {
        TaskCommands::Add {
            title,
            column,
            description,
            label,
            assignee,
            status,
        } => {
            let project_id = client.project(project).await?;
            let board = service.fetch_board(project_id).await?;
            let column_id = column_id(&board, &column)?;
            let fields = NewTask {
                description,
                label,
                assignee,
                status: parse_status(status)?.unwrap_or_default(),
                ..NewTask::titled(title)
            };
            let task = service.create_task(project_id, column_id, fields).await?;
            println!(
                "{} {} {}",
                style("Added").green(),
                style(short_id(task.id)).dim(),
                task.title
            );
        }
        TaskCommands::Edit {
            id,
            title,
            description,
            label,
            assignee,
            status,
        } => {
            let patch = TaskPatch {
                title,
                description,
                label,
                assignee,
                status: parse_status(status)?,
            };
            let task = service.update_task(id, &patch).await?;
            println!(
                "{} {} {}",
                style("Updated").green(),
                style(short_id(task.id)).dim(),
                task.title
            );
        }
        TaskCommands::Move { id, column, index } => {
            let project_id = client.project(project).await?;
            let board = service.fetch_board(project_id).await?;
            let to_column = column_id(&board, &column)?;
            let Some(task) = board.find_task(id) else {
                return Err(BoardError::TaskNotFound { id }.into());
            };
            let mv = Move {
                task_id: id,
                from_column: task.column_id,
                to_column,
                to_index: index,
            };
            let after = apply_move(&board.tasks, &mv);
            let changes = position_changes(&board.tasks, &after, id);
            if changes.is_empty() {
                println!("Task {} is already there.", short_id(id));
                return Ok(());
            }

            let failures = service.persist_positions(&changes).await;
            if failures.is_empty() {
                println!(
                    "{} {} ({} row(s) renumbered)",
                    style("Moved").green(),
                    short_id(id),
                    changes.len()
                );
            } else {
                for (change, error) in &failures {
                    println!(
                        "  {} {}: {}",
                        style("failed").red(),
                        short_id(change.task_id),
                        error
                    );
                }
                bail!("{} of {} position updates failed", failures.len(), changes.len());
            }
        }
        TaskCommands::Rm { id } => {
            let task = service.delete_task(id).await?;
            println!("{} {}", style("Deleted").green(), task.title);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status(None).unwrap(), None);
        assert_eq!(
            parse_status(Some("inprogress".into())).unwrap(),
            Some(TaskStatus::InProgress)
        );
        assert!(parse_status(Some("later".into())).is_err());
    }

    #[test]
    fn test_column_lookup_reports_missing_key() {
        let board = Board::default();
        let err = column_id(&board, "todo").unwrap_err();
        assert!(matches!(err, BoardError::ColumnNotFound { ref key } if key == "todo"));
    }
}
