//! Project chat: `taskboard chat list|send`.

use anyhow::Result;
use console::style;
use uuid::Uuid;

use taskboard::board::ChatService;
use taskboard::config::Config;

use super::super::ChatCommands;
use super::Client;

pub async fn cmd_chat(config: &Config, project: Option<Uuid>, command: ChatCommands) -> Result<()> {
    let client = Client::connect(config).await?;
    let project_id = client.project(project).await?;
    let chat = ChatService::from_backend(&client.backend);

    match command {
        ChatCommands::List { limit } => {
            let limit = limit.unwrap_or(config.file.board.chat_history);
            let messages = chat.recent_messages(project_id, limit).await?;
            if messages.is_empty() {
                println!("No messages yet.");
            }
            for message in messages {
                println!(
                    "{}  {}",
                    style(message.created_at.format("%Y-%m-%d %H:%M")).dim(),
                    message.content
                );
            }
        }
        ChatCommands::Send { message } => {
            let user_id = client.auth.user().map(|u| u.id);
            let sent = chat.send_message(project_id, user_id, &message).await?;
            println!("{} {}", style("Sent").green(), sent.content);
        }
    }

    Ok(())
}
