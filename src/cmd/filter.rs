//! Remembered board filter: `taskboard filter`.

use anyhow::{Result, bail};
use console::style;

use taskboard::board::TaskFilter;
use taskboard::board::filter::{KNOWN_LABELS, known_label};
use taskboard::config::Config;
use taskboard::preferences::Preferences;

use super::super::FilterCommands;

fn update(filter: &mut TaskFilter, command: FilterCommands) -> Result<()> {
    match command {
        FilterCommands::Show => {}
        FilterCommands::Label { label } => {
            let Some(label) = known_label(&label) else {
                bail!(
                    "Unknown label '{}'. Quick filters: {}",
                    label,
                    KNOWN_LABELS.join(", ")
                );
            };
            filter.toggle_label(label);
        }
        FilterCommands::Assignee { name } => {
            let name = name.trim();
            if name.is_empty() {
                bail!("Assignee name must not be blank");
            }
            filter.toggle_assignee(name);
        }
        FilterCommands::Search { text } => {
            filter.search = text.map(|t| t.trim().to_string()).unwrap_or_default();
        }
        FilterCommands::Clear => *filter = TaskFilter::default(),
    }
    Ok(())
}

fn print_filter(filter: &TaskFilter) {
    let labels: Vec<String> = KNOWN_LABELS
        .iter()
        .map(|l| {
            if filter.label.as_deref() == Some(*l) {
                style(format!("[{}]", l)).bold().yellow().to_string()
            } else {
                l.to_string()
            }
        })
        .collect();
    println!("Labels:    {}", labels.join(" "));
    if filter.assignees.is_empty() {
        println!("Assignees: {}", style("(any)").dim());
    } else {
        println!("Assignees: {}", filter.assignees.join(", "));
    }
    if filter.search.is_empty() {
        println!("Search:    {}", style("(none)").dim());
    } else {
        println!("Search:    \"{}\"", filter.search);
    }
}

pub fn cmd_filter(config: &Config, command: Option<FilterCommands>) -> Result<()> {
    let path = config.preferences_path();
    let mut prefs = Preferences::load(&path)?;
    let command = command.unwrap_or(FilterCommands::Show);
    let changes = !matches!(command, FilterCommands::Show);

    update(&mut prefs.filter, command)?;
    if changes {
        prefs.save(&path)?;
    }
    print_filter(&prefs.filter);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_toggles_with_canonical_spelling() {
        let mut filter = TaskFilter::default();
        update(&mut filter, FilterCommands::Label { label: "bug".into() }).unwrap();
        assert_eq!(filter.label.as_deref(), Some("Bug"));
        update(&mut filter, FilterCommands::Label { label: "BUG".into() }).unwrap();
        assert!(filter.label.is_none());
        assert!(update(&mut filter, FilterCommands::Label { label: "Chore".into() }).is_err());
    }

    #[test]
    fn test_assignee_search_and_clear() {
        let mut filter = TaskFilter::default();
        update(&mut filter, FilterCommands::Assignee { name: " ana ".into() }).unwrap();
        update(
            &mut filter,
            FilterCommands::Search {
                text: Some(" login ".into()),
            },
        )
        .unwrap();
        assert_eq!(filter.assignees, vec!["ana".to_string()]);
        assert_eq!(filter.search, "login");

        update(&mut filter, FilterCommands::Search { text: None }).unwrap();
        assert!(filter.search.is_empty());
        update(&mut filter, FilterCommands::Clear).unwrap();
        assert!(filter.is_empty());
    }
}
