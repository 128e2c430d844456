//! Provider health-check command.

use console::style;

use crate::config::Settings;
use crate::server::health_controller;

use super::helpers::open_store;

/// Run one health check and print the report as JSON on stdout.
pub async fn cmd_health_check(settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings).await?;
    let controller = health_controller(settings, store)?;

    let report = controller.run().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    eprintln!(
        "{} {} online, {} offline, {} recovered, {} still failing",
        style("→").cyan(),
        report.online_count(),
        report.offline_count(),
        report.recovery.recovered.len(),
        report.recovery.still_failed.len()
    );
    Ok(())
}
