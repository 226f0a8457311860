//! Output formatting utilities

use crate::OutputFormat;
use chrono::Utc;
use console::style;
use indicatif::HumanBytes;
use lodestone_types::{Account, AccountType, CompletedResult, VersionInfoDetail};
use serde::Serialize;

/// Print `value` as JSON, or through `human` for terminal output
pub fn print_output<T: Serialize>(
    value: &T,
    format: OutputFormat,
    human: impl FnOnce(&T),
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Human => human(value),
    }
    Ok(())
}

/// Account summary without any tokens
#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub player_name: String,
    pub player_uuid: String,
    pub account_type: AccountType,
    pub expires_in_secs: Option<i64>,
    pub expired: bool,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            player_name: account.player_name.clone(),
            player_uuid: account.player_uuid.clone(),
            account_type: account.account_type,
            expires_in_secs: account
                .expires_at()
                .map(|at| (at - Utc::now()).num_seconds()),
            expired: account.is_expired(),
        }
    }
}

pub fn print_account(summary: &AccountSummary) {
    println!(
        "{} {} ({:?})",
        style("●").green(),
        style(&summary.player_name).cyan().bold(),
        summary.account_type
    );
    println!("  UUID:    {}", summary.player_uuid);
    match summary.expires_in_secs {
        _ if summary.expired => println!("  Tokens:  {}", style("expired").red()),
        Some(secs) => println!("  Tokens:  valid for {}", format_remaining(secs)),
        None => println!("  Tokens:  never expire"),
    }
}

/// Format seconds as `1h 2m 3s`
pub fn format_remaining(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

pub fn print_result(result: &CompletedResult) {
    let bytes: u64 = result.success.iter().filter_map(|t| t.size).sum();
    if result.is_success() {
        println!(
            "{} {} ready: {} files, {}",
            style("✓").green().bold(),
            style(&result.version_id).cyan(),
            result.success.len(),
            HumanBytes(bytes)
        );
        return;
    }

    println!(
        "{} {}: {} completed, {} failed, {} cancelled",
        style("✗").red().bold(),
        style(&result.version_id).cyan(),
        result.success.len(),
        result.failed.len(),
        result.cancelled.len()
    );
    for failed in result.failed.iter().take(10) {
        let reason = failed
            .error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or("unknown error");
        println!("  {} {}", style(&failed.task.origin_url).dim(), reason);
    }
    if result.failed.len() > 10 {
        println!("  ... and {} more", result.failed.len() - 10);
    }
}

pub fn print_detail(detail: &VersionInfoDetail) {
    println!("  Version:   {}", detail.name);
    if let Some(parent) = &detail.inherits_from {
        println!("  Based on:  {}", parent);
    }
    if let Some(java) = &detail.java_version {
        println!("  Java:      {} ({})", java.major_version, java.component);
    }
    if let Some(main_class) = &detail.main_class {
        println!("  Main:      {}", main_class);
    }
    println!("  Loader:    {:?}", detail.loader.loader);
    println!("  Directory: {}", detail.version_dir.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_time_is_compact() {
        assert_eq!(format_remaining(42), "42s");
        assert_eq!(format_remaining(125), "2m 5s");
        assert_eq!(format_remaining(86_399), "23h 59m 59s");
        assert_eq!(format_remaining(-5), "0s");
    }

    #[test]
    fn offline_summary_never_expires() {
        let summary = AccountSummary::from(&Account::offline("Alex"));
        assert_eq!(summary.player_name, "Alex");
        assert_eq!(summary.expires_in_secs, None);
        assert!(!summary.expired);
    }
}
