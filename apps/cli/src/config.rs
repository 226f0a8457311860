//! Settings file, environment overrides and the stored account

use anyhow::{Context, Result};
use lodestone_types::{Account, OriginFallback, Settings};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SETTINGS_FILE: &str = "settings.json";
const ACCOUNT_FILE: &str = "account.json";

pub fn data_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        dirs::data_dir()
            .map(|d| d.join("lodestone"))
            .unwrap_or_else(|| PathBuf::from(".lodestone"))
    })
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SETTINGS_FILE)
}

/// Read `settings.json`, falling back to defaults when it does not exist,
/// then apply `LODESTONE_*` environment variables
pub fn load_settings(data_dir: &Path) -> Result<Settings> {
    let path = settings_path(data_dir);
    let mut settings = match std::fs::read_to_string(&path) {
        Ok(text) => serde_json::from_str(&text)
            .with_context(|| format!("Invalid settings file {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No settings file at {:?}, using defaults", path);
            Settings::default()
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

pub fn save_settings(data_dir: &Path, settings: &Settings) -> Result<()> {
    write_json(&settings_path(data_dir), settings)
}

/// Apply overrides looked up by environment variable name
pub fn apply_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(client_id) = lookup("LODESTONE_CLIENT_ID") {
        settings.auth.client_id = client_id;
    }
    if let Some(secret) = lookup("LODESTONE_CLIENT_SECRET") {
        settings.auth.client_secret = Some(secret);
    }
    if let Some(mirror) = lookup("LODESTONE_MIRROR") {
        settings.download.mirror_base = if mirror.is_empty() { None } else { Some(mirror) };
    }
    if let Some(fallback) = lookup("LODESTONE_ORIGIN_FALLBACK") {
        match fallback.as_str() {
            "never" => settings.download.origin_fallback = OriginFallback::Never,
            "final_attempt" => settings.download.origin_fallback = OriginFallback::FinalAttempt,
            other => warn!("Ignoring unknown LODESTONE_ORIGIN_FALLBACK value {:?}", other),
        }
    }
    if let Some(value) = lookup("LODESTONE_PARALLELISM") {
        match value.parse() {
            Ok(n) => settings.download.parallelism = n,
            Err(_) => warn!("Ignoring invalid LODESTONE_PARALLELISM value {:?}", value),
        }
    }
    if let Some(value) = lookup("LODESTONE_MAX_RETRIES") {
        match value.parse() {
            Ok(n) => settings.download.max_retries = n,
            Err(_) => warn!("Ignoring invalid LODESTONE_MAX_RETRIES value {:?}", value),
        }
    }
}

pub fn load_account(data_dir: &Path) -> Result<Option<Account>> {
    let path = data_dir.join(ACCOUNT_FILE);
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(Some(
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid account file {}", path.display()))?,
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

pub fn save_account(data_dir: &Path, account: &Account) -> Result<()> {
    write_json(&data_dir.join(ACCOUNT_FILE), account)
}

pub fn remove_account(data_dir: &Path) -> Result<()> {
    match std::fs::remove_file(data_dir.join(ACCOUNT_FILE)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}
