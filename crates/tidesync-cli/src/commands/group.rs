use serde::Serialize;
use tidesync_core::models::VisibilityGroup;

use crate::commands::common::{format_timestamp, normalize_group_name, CliContext};
use crate::error::CliError;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct GroupListItem {
    pub hash: String,
    pub tidemark: Option<String>,
    pub last_polled_at: i64,
}

pub fn group_to_list_item(group: &VisibilityGroup) -> GroupListItem {
    GroupListItem {
        hash: group.hash.to_string(),
        tidemark: group.tidemark.clone(),
        last_polled_at: group.last_polled_at,
    }
}

pub fn format_group_lines(groups: &[VisibilityGroup]) -> Vec<String> {
    groups
        .iter()
        .map(|group| {
            format!(
                "{}  tidemark: {}  polled: {}",
                group.hash,
                group.tidemark.as_deref().unwrap_or("-"),
                format_timestamp(group.last_polled_at)
            )
        })
        .collect()
}

pub fn run_group_add(context: &CliContext, name: &str) -> Result<(), CliError> {
    let name = normalize_group_name(name)?;
    let hash = context.store.add_group(&name)?;
    println!("Subscribed to {name} ({hash})");
    Ok(())
}

pub fn run_group_remove(context: &CliContext, name: &str) -> Result<(), CliError> {
    let name = normalize_group_name(name)?;
    let removed = context.store.remove_group(&name)?;
    println!("Unsubscribed from {name}, removed {removed} local records");
    Ok(())
}

pub fn run_group_list(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let groups = context.store.groups()?;

    if as_json {
        let items = groups
            .iter()
            .map(group_to_list_item)
            .collect::<Vec<GroupListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if groups.is_empty() {
        println!("No groups subscribed.");
        return Ok(());
    }

    for line in format_group_lines(&groups) {
        println!("{line}");
    }
    Ok(())
}
