//! AI provider commands.

use chrono::Utc;
use console::style;

use crate::config::Settings;
use crate::models::{mask_api_key, AiProvider};
use crate::providers::ProviderRepository;
use crate::server::health_controller;

use super::helpers::{open_store, truncate};

fn state_label(provider: &AiProvider) -> String {
    let now = Utc::now();
    if !provider.enabled {
        return style("disabled").dim().to_string();
    }
    if provider.is_paused(now) {
        return style("paused").yellow().to_string();
    }
    match provider.status {
        Some(status) if provider.awaiting_recovery() => style(status).red().to_string(),
        Some(status) => style(status).green().to_string(),
        None => "unchecked".to_string(),
    }
}

/// List providers in priority order with masked keys.
pub async fn cmd_providers_list(settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings).await?;
    let providers = ProviderRepository::new(store).list().await?;

    if providers.is_empty() {
        println!("{} No AI providers configured.", style("!").yellow());
        return Ok(());
    }

    println!("\n{}", style("AI Providers").bold());
    println!("{}", "-".repeat(90));
    println!(
        "{:<4} {:<16} {:<20} {:<16} {:<10} {:<8} Last error",
        "Pri", "ID", "Name", "Key", "State", "Fails"
    );
    println!("{}", "-".repeat(90));

    for provider in &providers {
        let key = provider
            .api_key
            .as_deref()
            .map(mask_api_key)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<4} {:<16} {:<20} {:<16} {:<10} {:<8} {}",
            provider.priority,
            truncate(&provider.id, 16),
            truncate(&provider.name, 20),
            key,
            state_label(provider),
            provider.failure_count,
            provider
                .last_error
                .as_deref()
                .map(|e| truncate(e, 40))
                .unwrap_or_default()
        );
    }

    Ok(())
}

/// Test one provider and record the result.
pub async fn cmd_providers_test(settings: &Settings, id: &str) -> anyhow::Result<()> {
    let store = open_store(settings).await?;
    let controller = health_controller(settings, store)?;

    let check = controller.check_provider(id).await?;
    let latency = check
        .latency_ms
        .map(|ms| format!(" in {} ms", ms))
        .unwrap_or_default();

    if check.success {
        println!("{} {} answered{}", style("✓").green(), check.name, latency);
    } else {
        println!(
            "{} {} failed{}: {}",
            style("✗").red(),
            check.name,
            latency,
            check.message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
