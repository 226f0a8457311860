//! CLI command implementations

use crate::config;
use crate::output::{self, AccountSummary};
use crate::progress::VersionProgress;
use crate::{ConfigAction, OutputFormat};
use anyhow::{anyhow, bail, Context as _, Result};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use lodestone_core::{
    AuthOrchestrator, DownloadOrchestrator, ReqwestTransport, StorageLayout, VersionDescriptor,
};
use lodestone_types::{
    Account, AccountType, CompletedResult, DeviceCodeResult, DownloadEvent, LoginState, Settings,
    VersionInfoDetail,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct Context {
    pub data_dir: PathBuf,
    pub settings: Settings,
    pub format: OutputFormat,
}

impl Context {
    fn auth(&self) -> Result<AuthOrchestrator> {
        let transport = Arc::new(ReqwestTransport::new()?);
        AuthOrchestrator::from_settings(&self.settings.auth, transport).context(
            "Microsoft login is not configured; set auth.client_id in settings.json or LODESTONE_CLIENT_ID",
        )
    }

    fn stored_account(&self) -> Result<Account> {
        config::load_account(&self.data_dir)?
            .ok_or_else(|| anyhow!("No account stored. Run `lodestone login` first."))
    }

    fn spinner(&self) -> ProgressBar {
        let spinner = match self.format {
            OutputFormat::Human => ProgressBar::new_spinner(),
            OutputFormat::Json => ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden()),
        };
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner
    }
}

// ============================================================================
// Account Commands
// ============================================================================

pub async fn login_device(ctx: &Context) -> Result<()> {
    let auth = ctx.auth()?;
    let spinner = ctx.spinner();
    let watcher = watch_login(&auth, spinner.clone());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let format = ctx.format;
    let shown = spinner.clone();
    let result = auth
        .login_with_device_code(
            &ctx.settings.auth.scopes,
            move |code| {
                show_device_code(code, format);
                shown.enable_steady_tick(Duration::from_millis(120));
            },
            &cancel,
        )
        .await;

    ctrl_c.abort();
    watcher.abort();
    spinner.finish_and_clear();
    let account = result.context("Login failed")?;
    store_and_print(ctx, &account)
}

pub async fn login_refresh(ctx: &Context, refresh_token: &str) -> Result<()> {
    let auth = ctx.auth()?;
    let spinner = ctx.spinner();
    spinner.enable_steady_tick(Duration::from_millis(120));
    let watcher = watch_login(&auth, spinner.clone());

    let result = auth.login_with_refresh_token(refresh_token).await;
    watcher.abort();
    spinner.finish_and_clear();
    let account = result.context("Login failed")?;
    store_and_print(ctx, &account)
}

pub fn login_offline(ctx: &Context, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("Player name must not be empty");
    }
    store_and_print(ctx, &Account::offline(name))
}

pub fn show_account(ctx: &Context) -> Result<()> {
    let account = ctx.stored_account()?;
    output::print_output(&AccountSummary::from(&account), ctx.format, output::print_account)
}

pub async fn refresh_account(ctx: &Context) -> Result<()> {
    let account = ctx.stored_account()?;
    let refreshed = if account.account_type == AccountType::Offline {
        let mut account = account;
        account.touch();
        account
    } else {
        let auth = ctx.auth()?;
        let spinner = ctx.spinner();
        spinner.enable_steady_tick(Duration::from_millis(120));
        let watcher = watch_login(&auth, spinner.clone());
        let result = auth.refresh(&account).await;
        watcher.abort();
        spinner.finish_and_clear();
        result.context("Refresh failed")?
    };
    store_and_print(ctx, &refreshed)
}

pub async fn validate_account(ctx: &Context) -> Result<()> {
    let account = ctx.stored_account()?;
    let valid = if account.account_type == AccountType::Offline {
        true
    } else {
        ctx.auth()?.validate(&account).await?
    };

    output::print_output(&json!({ "valid": valid }), ctx.format, |_| {
        if valid {
            println!("{} Token for {} is valid", style("✓").green().bold(), account.player_name);
        } else {
            println!(
                "{} Token for {} is no longer accepted; run `lodestone refresh`",
                style("✗").red().bold(),
                account.player_name
            );
        }
    })
}

pub async fn logout(ctx: &Context) -> Result<()> {
    let Some(mut account) = config::load_account(&ctx.data_dir)? else {
        println!("No account stored");
        return Ok(());
    };

    // Only Yggdrasil tokens can be revoked remotely
    if matches!(account.account_type, AccountType::Mojang | AccountType::ThirdParty) {
        if let Err(e) = ctx.auth()?.logout(&mut account).await {
            warn!("Remote sign-out failed: {}", e);
        }
    }
    config::remove_account(&ctx.data_dir)?;

    output::print_output(&json!({ "logged_out": account.player_name }), ctx.format, |_| {
        println!("{} Signed out {}", style("✓").green().bold(), account.player_name);
    })
}

fn store_and_print(ctx: &Context, account: &Account) -> Result<()> {
    config::save_account(&ctx.data_dir, account)?;
    output::print_output(&AccountSummary::from(account), ctx.format, output::print_account)
}

fn show_device_code(code: &DeviceCodeResult, format: OutputFormat) {
    match format {
        OutputFormat::Human => {
            println!(
                "Open {} and enter the code {}",
                style(&code.verification_uri).cyan().underlined(),
                style(&code.user_code).yellow().bold()
            );
        }
        // stdout carries only the final JSON
        OutputFormat::Json => eprintln!("{}", code.message),
    }
}

/// Mirror login state transitions on the spinner
fn watch_login(auth: &AuthOrchestrator, spinner: ProgressBar) -> JoinHandle<()> {
    let mut events = auth.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(progress) => {
                    spinner.set_message(describe(&progress.state));
                    if progress.state.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn describe(state: &LoginState) -> String {
    match state {
        LoginState::Idle => "Starting".to_string(),
        LoginState::RequestingMicrosoftToken => "Waiting for Microsoft sign-in".to_string(),
        LoginState::ExchangingXbox => "Signing in to Xbox Live".to_string(),
        LoginState::ExchangingXsts => "Authorizing with XSTS".to_string(),
        LoginState::ExchangingMojang => "Signing in to Minecraft services".to_string(),
        LoginState::VerifyingOwnership => "Checking game ownership".to_string(),
        LoginState::Complete => "Signed in".to_string(),
        LoginState::Failed { stage, reason } => format!("Failed at {:?}: {}", stage, reason),
    }
}

// ============================================================================
// Download Commands
// ============================================================================

pub struct DownloadRequest {
    pub version: String,
    pub name: Option<String>,
    pub descriptor: Option<PathBuf>,
    pub isolate: bool,
    pub parallelism: Option<usize>,
    pub mirror: Option<String>,
}

pub async fn download(mut ctx: Context, request: DownloadRequest) -> Result<()> {
    let settings = &mut ctx.settings;
    if let Some(parallelism) = request.parallelism {
        settings.download.parallelism = parallelism;
    }
    if let Some(mirror) = request.mirror {
        settings.download.mirror_base = Some(mirror);
    }
    if request.isolate {
        settings.download.isolate_versions = true;
    }

    if let Some(path) = &request.descriptor {
        install_descriptor(&ctx.settings, path, &request.version)?;
    }

    let engine = DownloadOrchestrator::from_settings(&ctx.settings)?;
    let install_id = request.name.clone().unwrap_or_else(|| request.version.clone());
    let mut events = engine.subscribe();
    let mut view = VersionProgress::new(&install_id, ctx.format == OutputFormat::Human);

    if !engine
        .start_download(&request.version, request.name.as_deref(), None)
        .await?
    {
        bail!("{} is already downloading", install_id);
    }

    let mut result: Option<CompletedResult> = None;
    let mut detail: Option<VersionInfoDetail> = None;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                engine.pause(Some(&install_id));
                engine.shutdown();
                view.abandon("Paused");
                eprintln!("Paused. Run the same command again to resume.");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(DownloadEvent::ProgressChanged { progress, .. }) => {
                    if progress.task.version_id == install_id {
                        view.update(&progress);
                    }
                }
                Ok(DownloadEvent::DownloadCompleted(completed)) if completed.version_id == install_id => {
                    view.finish();
                    let success = completed.is_success();
                    result = Some(completed);
                    if !success {
                        break;
                    }
                }
                Ok(DownloadEvent::CompletedInfo(info)) if info.id == install_id => {
                    detail = Some(info);
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!("Skipped {} progress events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    }

    let result = result.ok_or_else(|| anyhow!("Download of {} ended without a result", install_id))?;
    let success = result.is_success();
    match ctx.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "result": result, "version": detail }))?
            );
        }
        OutputFormat::Human => {
            output::print_result(&result);
            if let Some(detail) = &detail {
                output::print_detail(detail);
            }
        }
    }

    if !success {
        bail!("{} files could not be downloaded", result.failed.len() + result.cancelled.len());
    }
    Ok(())
}

/// Copy a descriptor file to `versions/<id>/<id>.json` in the game directory
fn install_descriptor(settings: &Settings, path: &Path, version: &str) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let descriptor: VersionDescriptor = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a version descriptor", path.display()))?;
    if descriptor.id != version {
        bail!(
            "{} describes version {}, not {}",
            path.display(),
            descriptor.id,
            version
        );
    }

    let target = StorageLayout::new(settings.game_dir.clone()).version_json(version);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, text)?;
    debug!("Installed descriptor at {:?}", target);
    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub fn config_action(ctx: &Context, action: Option<ConfigAction>) -> Result<()> {
    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(&ctx.settings)?);
        }
        ConfigAction::Path => {
            println!("{}", config::settings_path(&ctx.data_dir).display());
        }
        ConfigAction::Init => {
            let path = config::settings_path(&ctx.data_dir);
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            config::save_settings(&ctx.data_dir, &Settings::default())?;
            println!("{} Wrote {}", style("✓").green().bold(), path.display());
        }
    }
    Ok(())
}
