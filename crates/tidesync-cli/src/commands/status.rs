use serde::Serialize;

use crate::commands::common::CliContext;
use crate::error::CliError;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub device_id: String,
    pub endpoint: String,
    pub pending_changes: usize,
    pub groups: usize,
    pub deferred_changes: usize,
}

pub fn collect_status(context: &CliContext) -> Result<StatusReport, CliError> {
    Ok(StatusReport {
        device_id: context.store.device_id().to_string(),
        endpoint: context.settings.endpoint.clone(),
        pending_changes: context.store.pending_count()?,
        groups: context.store.groups()?.len(),
        deferred_changes: context.store.deferred_changes()?.len(),
    })
}

pub fn run_status(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let report = collect_status(context)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Device:   {}", report.device_id);
    println!("Endpoint: {}", report.endpoint);
    println!("Pending:  {}", report.pending_changes);
    println!("Groups:   {}", report.groups);
    println!("Deferred: {}", report.deferred_changes);
    Ok(())
}
