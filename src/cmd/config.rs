//! Configuration view and validation commands: `taskboard config`.

use anyhow::Result;

use taskboard::config::{Config, TaskboardToml};

use super::super::ConfigCommands;

fn mask(key: &str) -> String {
    if key.is_empty() {
        return "(unset)".to_string();
    }
    let visible: String = key.chars().take(6).collect();
    format!("{}…", visible)
}

fn print_sections(toml: &TaskboardToml) {
    println!("[backend]");
    println!("  url = \"{}\"", toml.backend.url);
    println!("  anon_key = \"{}\"", mask(&toml.backend.anon_key));
    if let Some(site) = &toml.backend.site_url {
        println!("  site_url = \"{}\"", site);
    }
    println!();

    println!("[realtime]");
    println!("  heartbeat_secs = {}", toml.realtime.heartbeat_secs);
    println!("  reconnect_initial_ms = {}", toml.realtime.reconnect_initial_ms);
    println!("  reconnect_max_ms = {}", toml.realtime.reconnect_max_ms);
    println!("  reconnect_multiplier = {}", toml.realtime.reconnect_multiplier);
    println!("  jitter_ms = {}", toml.realtime.jitter_ms);
    println!();

    println!("[board]");
    println!("  reconcile_on_failure = {}", toml.board.reconcile_on_failure);
    println!("  chat_history = {}", toml.board.chat_history);
    println!("  chat_capacity = {}", toml.board.chat_capacity);
    println!();

    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  json = {}", toml.logging.json);
    if let Some(file) = &toml.logging.file {
        println!("  file = \"{}\"", file.display());
    }
    println!();
}

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = &config.config_path;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Taskboard Configuration");
            println!("=======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No taskboard.toml found at {}", config_path.display());
                println!("Using defaults. Run 'taskboard config init' to create one.");
            }
            println!("Effective values (with env overrides):");
            println!();
            print_sections(&config.file);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            // Effective values, so env-provided credentials count.
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("taskboard.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            TaskboardToml::default().save(config_path)?;

            println!("Created taskboard.toml at {}", config_path.display());
            println!();
            println!("Set [backend] url and anon_key (or SUPABASE_URL / SUPABASE_KEY),");
            println!("then sign in with 'taskboard auth login --email you@example.com'.");
            println!();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_hides_most_of_the_key() {
        assert_eq!(mask(""), "(unset)");
        assert_eq!(mask("eyJhbGciOiJIUzI1NiJ9"), "eyJhbG…");
    }
}
