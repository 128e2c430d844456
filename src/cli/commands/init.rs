//! Initialize command.

use console::style;

use crate::config::Settings;

use super::helpers::open_store;

/// Initialize the data directory and database.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    open_store(settings).await?;

    println!(
        "{} Initialized khobor database at {}",
        style("✓").green(),
        settings.database_url()
    );
    if settings.jwt_secret.is_none() {
        println!(
            "{} No JWT secret configured; set KHOBOR_JWT_SECRET before running 'khobor serve'",
            style("!").yellow()
        );
    }

    Ok(())
}
