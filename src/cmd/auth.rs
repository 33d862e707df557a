//! Sign-in and session commands: `taskboard auth`.

use anyhow::Result;
use console::style;

use taskboard::config::Config;

use super::super::AuthCommands;
use super::auth_client;

pub async fn cmd_auth(config: &Config, command: AuthCommands) -> Result<()> {
    let auth = auth_client(config)?;
    let redirect = config.site_url();

    match command {
        AuthCommands::Login { email } => {
            println!("Sending magic link...");
            match auth.sign_in_with_otp(email.trim(), redirect).await {
                Ok(()) => println!("{}", style("Check your email for a magic link.").green()),
                Err(e) => {
                    println!("{}", style(&e).red());
                    return Err(e.into());
                }
            }
            println!("Then run 'taskboard auth callback <url>' with the link's final URL.");
        }
        AuthCommands::Oauth {
            provider,
            no_browser,
        } => {
            let url = auth.oauth_url(&provider, redirect)?;
            if no_browser || open::that(url.as_str()).is_err() {
                println!("Open this URL to sign in with {}:", provider);
            } else {
                println!("Opened your browser to sign in with {}.", provider);
            }
            println!("  {}", url);
            println!();
            println!("Afterwards run 'taskboard auth callback <url>' with the URL you land on.");
        }
        AuthCommands::Callback { url } => {
            let session = auth.complete_callback(&url).await?;
            let who = session
                .user
                .as_ref()
                .and_then(|u| u.email.clone())
                .unwrap_or_else(|| "unknown user".to_string());
            println!("{} {}", style("Signed in as").green(), style(who).bold());
        }
        AuthCommands::Status => match auth.session() {
            Some(session) => {
                let user = auth.get_user().await.ok().or(session.user.clone());
                let email = user
                    .as_ref()
                    .and_then(|u| u.email.as_deref())
                    .unwrap_or("(no email)");
                println!("{} {}", style("Signed in:").green().bold(), email);
                if let Some(id) = user.map(|u| u.id) {
                    println!("  user id: {}", id);
                }
                if let Some(expires_at) = session.expires_at
                    && let Some(when) = chrono::DateTime::from_timestamp(expires_at, 0)
                {
                    println!("  token expires: {}", when.to_rfc3339());
                }
            }
            None => println!("{}", style("Not signed in.").yellow()),
        },
        AuthCommands::Refresh => {
            let session = auth.refresh().await?;
            println!("{}", style("Session refreshed.").green());
            if let Some(expires_at) = session.expires_at {
                println!("  expires_at: {}", expires_at);
            }
        }
        AuthCommands::Logout => {
            auth.sign_out().await?;
            println!("Signed out.");
        }
    }

    Ok(())
}
