//! Team, project and member listings, and remembered selection.

use anyhow::{Result, bail};
use console::style;
use uuid::Uuid;

use taskboard::config::Config;

use super::{Client, short_id};

async fn active_team(client: &Client, explicit: Option<Uuid>) -> Result<Uuid> {
    if let Some(id) = explicit {
        return Ok(id);
    }
    let mut prefs = client.preferences()?;
    let teams = client.service().list_teams().await?;
    match prefs.default_team(&teams) {
        Some(id) => {
            prefs.save(&client.config.preferences_path())?;
            Ok(id)
        }
        None => bail!("No teams visible to this account"),
    }
}

pub async fn cmd_teams(config: &Config) -> Result<()> {
    let client = Client::connect(config).await?;
    let prefs = client.preferences()?;
    let teams = client.service().list_teams().await?;
    if teams.is_empty() {
        println!("No teams.");
        return Ok(());
    }
    for team in teams {
        let marker = if prefs.team_id == Some(team.id) { "*" } else { " " };
        println!("{} {}  {}", marker, style(short_id(team.id)).dim(), team.name);
    }
    Ok(())
}

pub async fn cmd_projects(config: &Config, team: Option<Uuid>) -> Result<()> {
    let client = Client::connect(config).await?;
    let team_id = active_team(&client, team).await?;
    let prefs = client.preferences()?;
    let projects = client.service().list_projects(team_id).await?;
    if projects.is_empty() {
        println!("No projects in team {}.", short_id(team_id));
        return Ok(());
    }
    for project in projects {
        let marker = if prefs.project_id == Some(project.id) { "*" } else { " " };
        println!("{} {}  {}", marker, style(project.id).dim(), project.name);
    }
    Ok(())
}

pub async fn cmd_members(config: &Config, team: Option<Uuid>) -> Result<()> {
    let client = Client::connect(config).await?;
    let team_id = active_team(&client, team).await?;
    let members = client.service().list_members(team_id).await?;
    if members.is_empty() {
        println!("No members");
        return Ok(());
    }
    let prefs = client.preferences()?;
    for member in members {
        let filtering = prefs.filter.assignees.iter().any(|a| a == member.label());
        println!(
            "  {}  {}{}",
            style(member.initials()).bold().cyan(),
            member.label(),
            if filtering {
                style("  (filter active)").dim().to_string()
            } else {
                String::new()
            }
        );
    }
    Ok(())
}

pub async fn cmd_use(config: &Config, team: Option<Uuid>, project: Option<Uuid>) -> Result<()> {
    if team.is_none() && project.is_none() {
        bail!("Pass --team and/or --project");
    }
    let client = Client::connect(config).await?;
    let service = client.service();
    let mut prefs = client.preferences()?;

    if let Some(team_id) = team {
        let teams = service.list_teams().await?;
        let Some(found) = teams.iter().find(|t| t.id == team_id) else {
            bail!("Team {} not found", team_id);
        };
        prefs.select_team(team_id);
        println!("Active team: {}", style(&found.name).bold());
    }

    if let Some(project_id) = project {
        let team_id = match prefs.team_id {
            Some(id) => id,
            None => active_team(&client, None).await?,
        };
        let projects = service.list_projects(team_id).await?;
        let Some(found) = projects.iter().find(|p| p.id == project_id) else {
            bail!("Project {} not found in team {}", project_id, short_id(team_id));
        };
        prefs.team_id = Some(team_id);
        prefs.project_id = Some(project_id);
        println!("Active project: {}", style(&found.name).bold());
    }

    prefs.save(&config.preferences_path())?;
    Ok(())
}
