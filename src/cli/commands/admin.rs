//! Admin registry commands.

use console::style;

use crate::config::Settings;
use crate::models::{collections, AdminRecord};

use super::helpers::open_store;

/// Add an email to the admin registry.
pub async fn cmd_admin_add(
    settings: &Settings,
    email: &str,
    added_by: Option<&str>,
) -> anyhow::Result<()> {
    let record = AdminRecord::new(email, added_by);
    if record.email.is_empty() || !record.email.contains('@') {
        anyhow::bail!("'{}' is not an email address", email);
    }

    let store = open_store(settings).await?;
    store.set(collections::ADMINS, &record.id, &record).await?;

    println!("{} {} is now an admin", style("✓").green(), record.email);
    Ok(())
}

/// Remove an email from the admin registry.
pub async fn cmd_admin_remove(settings: &Settings, email: &str) -> anyhow::Result<()> {
    let key = AdminRecord::normalize(email);
    let store = open_store(settings).await?;

    if store.delete(collections::ADMINS, &key).await? {
        println!("{} Removed admin {}", style("✓").green(), key);
    } else {
        println!("{} {} was not an admin", style("!").yellow(), key);
    }
    Ok(())
}

/// List the admin registry.
pub async fn cmd_admin_list(settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings).await?;
    let mut admins: Vec<AdminRecord> = store.list(collections::ADMINS).await?;
    admins.sort_by(|a, b| a.email.cmp(&b.email));

    if admins.is_empty() {
        println!(
            "{} No admins. Add one with 'khobor admin add <email>'.",
            style("!").yellow()
        );
        return Ok(());
    }

    println!("\n{}", style("Admins").bold());
    println!("{}", "-".repeat(70));
    println!("{:<35} {:<18} Added by", "Email", "Added");
    println!("{}", "-".repeat(70));

    for admin in admins {
        let added = admin
            .added_at
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<35} {:<18} {}",
            admin.email,
            added,
            admin.added_by.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}
