use tidesync_core::{CycleOutcome, CycleReport, StatusCallbacks, SyncService};

use crate::commands::common::CliContext;
use crate::error::CliError;

pub fn format_cycle_report(report: &CycleReport) -> String {
    let apply = &report.apply;
    format!(
        "Sent {} changes, polled {} groups; applied {}, deleted {}, deferred {}, skipped {}, {} groups updated",
        report.sent_changes,
        report.polled_groups,
        apply.applied,
        apply.deleted,
        apply.deferred,
        apply.skipped,
        apply.groups_updated
    )
}

pub async fn run_sync(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let service = SyncService::connect(
        context.store.clone(),
        &context.settings,
        StatusCallbacks::default(),
    )?;
    let report = service.sync_now().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", format_cycle_report(&report));
    }

    match report.outcome {
        CycleOutcome::Accepted => Ok(()),
        CycleOutcome::Rejected => Err(CliError::SyncFailed(
            "service did not accept the request".to_string(),
        )),
        CycleOutcome::Failed(reason) => Err(CliError::SyncFailed(reason)),
    }
}

pub async fn run_watch(context: &CliContext) -> Result<(), CliError> {
    let callbacks = StatusCallbacks::default()
        .on_connected(|| println!("Connected"))
        .on_disconnected(|reason| println!("Disconnected: {reason}"));
    let service = SyncService::connect(context.store.clone(), &context.settings, callbacks)?;

    service.start()?;
    println!(
        "Syncing every {} ms, press Ctrl-C to stop",
        context.settings.poll_interval_ms
    );
    tokio::signal::ctrl_c().await?;
    service.stop();

    let status = service.status()?;
    println!("Stopped with {} pending changes", status.pending_changes);
    Ok(())
}
