//! Shared helper functions for CLI commands.

use console::style;

use crate::config::Settings;
use crate::store::DocumentStore;

/// Open the store, creating the schema if the database is new.
pub async fn open_store(settings: &Settings) -> anyhow::Result<DocumentStore> {
    settings.ensure_directories()?;
    let store = settings.open_store();
    if let Err(e) = store.init_schema().await {
        eprintln!("  {} Database unavailable: {}", style("✗").red(), e);
        return Err(e.into());
    }
    Ok(store)
}

/// Truncate to `max` characters, marking the cut with `...`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
        // Bangla text is multi-byte; cutting must not split a char
        assert_eq!(truncate("বাংলাদেশ", 5).chars().count(), 5);
    }
}
