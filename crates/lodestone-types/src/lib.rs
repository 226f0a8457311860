//! Shared types for Lodestone
//!
//! This crate contains the data structures shared between the core
//! library and the CLI: accounts, download tasks, version details,
//! events and settings. Nothing in here performs I/O.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Account Types
// ============================================================================

/// Kind of account, which also decides the authoritative auth-info branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Offline,
    Mojang,
    Microsoft,
    Xbox,
    ThirdParty,
}

/// Tokens issued by the Microsoft identity platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicrosoftAuthInfo {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub issued_at: DateTime<Utc>,
    /// Lifetime in seconds, relative to `issued_at`
    pub expires_in: u64,
}

impl MicrosoftAuthInfo {
    pub fn expires_at(&self) -> DateTime<Utc> {
        expiry(self.issued_at, self.expires_in)
    }
}

/// `issued_at + lifetime`, saturating at the latest representable instant
fn expiry(issued_at: DateTime<Utc>, lifetime_secs: u64) -> DateTime<Utc> {
    i64::try_from(lifetime_secs)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Xbox Live / XSTS tokens and the claims returned with them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XboxAuthInfo {
    pub user_hash: String,
    /// The XSTS token scoped to the Minecraft services relying party
    pub access_token: String,
    /// The Xbox Live user token the XSTS token was derived from
    pub xbl_token: String,
    #[serde(default)]
    pub display_claims: BTreeMap<String, String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Minecraft services (or Yggdrasil-compatible) game tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MojangAuthInfo {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub client_token: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_in: u64,
}

impl MojangAuthInfo {
    pub fn expires_at(&self) -> DateTime<Utc> {
        expiry(self.issued_at, self.expires_in)
    }
}

/// Session values handed to the game on launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSession {
    pub access_token: String,
    /// `msa`, `mojang` or `legacy`
    pub user_type: String,
    pub xuid: Option<String>,
}

/// A profile property such as `textures`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProperty {
    pub name: String,
    pub value: String,
    pub signature: Option<String>,
}

/// A logged-in player account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub account_type: AccountType,
    pub player_name: String,
    pub player_uuid: String,
    pub microsoft: Option<MicrosoftAuthInfo>,
    pub xbox: Option<XboxAuthInfo>,
    pub mojang: Option<MojangAuthInfo>,
    pub session: Option<GameSession>,
    #[serde(default)]
    pub properties: Vec<AccountProperty>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(account_type: AccountType, player_name: String, player_uuid: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_type,
            player_name,
            player_uuid,
            microsoft: None,
            xbox: None,
            mojang: None,
            session: None,
            properties: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Build an offline account with the conventional name-based UUID
    pub fn offline(player_name: &str) -> Self {
        let seed = format!("OfflinePlayer:{}", player_name);
        let uuid = Uuid::new_v3(&Uuid::NAMESPACE_OID, seed.as_bytes());
        let mut account = Self::new(
            AccountType::Offline,
            player_name.to_string(),
            uuid.simple().to_string(),
        );
        account.session = Some(GameSession {
            access_token: Uuid::new_v4().simple().to_string(),
            user_type: "legacy".to_string(),
            xuid: None,
        });
        account
    }

    /// Expiry of the branch that is authoritative for `account_type`.
    /// `None` means the account never expires (offline) or the
    /// authoritative branch carries no expiry.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self.account_type {
            AccountType::Offline => None,
            AccountType::Microsoft => self.microsoft.as_ref().map(MicrosoftAuthInfo::expires_at),
            AccountType::Xbox => self.xbox.as_ref().and_then(|x| x.expires_at),
            AccountType::Mojang | AccountType::ThirdParty => {
                self.mojang.as_ref().map(MojangAuthInfo::expires_at)
            }
        }
    }

    /// Whether the authoritative branch has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.account_type == AccountType::Offline {
            return false;
        }
        let has_branch = match self.account_type {
            AccountType::Microsoft => self.microsoft.is_some(),
            AccountType::Xbox => self.xbox.is_some(),
            _ => self.mojang.is_some(),
        };
        if !has_branch {
            return true;
        }
        match self.expires_at() {
            Some(expires_at) => expires_at <= now,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Mark the account as changed
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Result of a device-code request.
///
/// `device_code` is a secret used only for polling; it is never shown to the
/// user and is redacted from `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceCodeResult {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Absolute expiry, computed once when the code was requested
    pub expires_at: DateTime<Utc>,
    /// Minimum poll interval in seconds
    pub interval: u64,
    pub message: String,
}

impl DeviceCodeResult {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(1))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl fmt::Debug for DeviceCodeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCodeResult")
            .field("device_code", &"<redacted>")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("expires_at", &self.expires_at)
            .field("interval", &self.interval)
            .field("message", &self.message)
            .finish()
    }
}

/// Stage of the login pipeline a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginStage {
    Microsoft,
    Xbox,
    Xsts,
    Mojang,
    Ownership,
}

/// State of a single login attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoginState {
    Idle,
    RequestingMicrosoftToken,
    ExchangingXbox,
    ExchangingXsts,
    ExchangingMojang,
    VerifyingOwnership,
    Complete,
    Failed { stage: LoginStage, reason: String },
}

impl LoginState {
    /// The stage that is running while in this state
    pub fn stage(&self) -> Option<LoginStage> {
        match self {
            LoginState::RequestingMicrosoftToken => Some(LoginStage::Microsoft),
            LoginState::ExchangingXbox => Some(LoginStage::Xbox),
            LoginState::ExchangingXsts => Some(LoginStage::Xsts),
            LoginState::ExchangingMojang => Some(LoginStage::Mojang),
            LoginState::VerifyingOwnership => Some(LoginStage::Ownership),
            LoginState::Failed { stage, .. } => Some(*stage),
            LoginState::Idle | LoginState::Complete => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoginState::Complete | LoginState::Failed { .. })
    }
}

/// Login state transition broadcast by the auth orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginProgress {
    pub attempt: Uuid,
    pub state: LoginState,
}

// ============================================================================
// Download Types
// ============================================================================

/// What kind of file a task downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadCategory {
    Version,
    AssetIndex,
    Assets,
    Libraries,
    Natives,
    Config,
}

/// Status of a single download task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Verifying,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Scheduling priority; higher runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// A single file transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: Uuid,
    pub version_id: String,
    /// The URL from the version descriptor
    pub origin_url: String,
    /// The URL actually requested, after mirror substitution
    pub download_url: String,
    pub size: Option<u64>,
    pub sha1: Option<String>,
    pub category: DownloadCategory,
    pub destination: PathBuf,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadTask {
    pub fn new(
        version_id: &str,
        url: String,
        destination: PathBuf,
        category: DownloadCategory,
        priority: TaskPriority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            version_id: version_id.to_string(),
            download_url: url.clone(),
            origin_url: url,
            size: None,
            sha1: None,
            category,
            destination,
            status: TaskStatus::Pending,
            priority,
            retry_count: 0,
            max_retries: 3,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_integrity(mut self, size: Option<u64>, sha1: Option<String>) -> Self {
        self.size = size;
        self.sha1 = sha1.map(|s| s.to_ascii_lowercase());
        self
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Whether the descriptor gave anything to verify the file against
    pub fn has_integrity(&self) -> bool {
        self.size.is_some() || self.sha1.is_some()
    }

    /// Path of the partial file used while transferring
    pub fn partial_path(&self) -> PathBuf {
        let mut name = self
            .destination
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".part");
        self.destination.with_file_name(name)
    }
}

/// Classification of a task failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskErrorKind {
    Network,
    Http,
    Integrity,
    Io,
    Cancelled,
    Other,
}

/// Error attached to a task's progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Live progress of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub task: DownloadTask,
    pub downloaded_bytes: u64,
    pub percentage: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub error: Option<TaskError>,
}

impl DownloadProgress {
    pub fn new(task: DownloadTask) -> Self {
        Self {
            task,
            downloaded_bytes: 0,
            percentage: 0.0,
            started_at: None,
            error: None,
        }
    }

    /// Set the byte count and recompute the percentage
    pub fn set_downloaded(&mut self, bytes: u64) {
        self.downloaded_bytes = bytes;
        self.percentage = match self.task.size {
            Some(size) if size > 0 => ((bytes as f64 / size as f64) * 100.0).min(100.0),
            _ => 0.0,
        };
    }

    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let started = self.started_at?;
        (now - started).to_std().ok()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed_at(Utc::now())
    }

    /// Estimated time left, from the average rate so far
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let size = self.task.size?;
        let elapsed = self.elapsed_at(now)?.as_secs_f64();
        if self.downloaded_bytes == 0 || elapsed <= 0.0 {
            return None;
        }
        let rate = self.downloaded_bytes as f64 / elapsed;
        let left = size.saturating_sub(self.downloaded_bytes) as f64;
        Some(Duration::from_secs_f64(left / rate))
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.remaining_at(Utc::now())
    }
}

/// A failed task with the error that ended it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTask {
    pub task: DownloadTask,
    pub error: Option<TaskError>,
}

/// Outcome of one version's download run, partitioned by terminal status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedResult {
    pub version_id: String,
    pub success: Vec<DownloadTask>,
    pub failed: Vec<FailedTask>,
    pub cancelled: Vec<DownloadTask>,
}

impl CompletedResult {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty()
    }

    pub fn total(&self) -> usize {
        self.success.len() + self.failed.len() + self.cancelled.len()
    }
}

/// Storage choices for one `start_download` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageOptions {
    /// Keep libraries and natives under the version's own folder
    pub isolate: bool,
}

/// When a mirrored task goes back to its origin URL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginFallback {
    Never,
    #[default]
    FinalAttempt,
}

// ============================================================================
// Version Types
// ============================================================================

/// Core mod loader a version is built on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreLoader {
    #[default]
    None,
    Forge,
    Fabric,
    Quilt,
    NeoForge,
    LiteLoader,
}

/// Optimization or shader mod installed on top of the core loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationMod {
    OptiFine,
    Sodium,
    Iris,
}

/// A loader combination that cannot work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConflict {
    pub subject: OptimizationMod,
    pub reason: String,
}

/// Mod-loader tag of a version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModLoaderProfile {
    pub loader: CoreLoader,
    #[serde(default)]
    pub optimizations: BTreeSet<OptimizationMod>,
}

impl ModLoaderProfile {
    pub fn new(loader: CoreLoader) -> Self {
        Self {
            loader,
            optimizations: BTreeSet::new(),
        }
    }

    pub fn with(mut self, optimization: OptimizationMod) -> Self {
        self.optimizations.insert(optimization);
        self
    }

    pub fn has(&self, optimization: OptimizationMod) -> bool {
        self.optimizations.contains(&optimization)
    }

    /// Every compatibility rule the combination breaks
    pub fn conflicts(&self) -> Vec<LoaderConflict> {
        let mut conflicts = Vec::new();
        let fabric_like = matches!(self.loader, CoreLoader::Fabric | CoreLoader::Quilt);

        if self.has(OptimizationMod::Iris) && !self.has(OptimizationMod::Sodium) {
            conflicts.push(LoaderConflict {
                subject: OptimizationMod::Iris,
                reason: "Iris requires Sodium".to_string(),
            });
        }
        for subject in [OptimizationMod::Sodium, OptimizationMod::Iris] {
            if self.has(subject) && !fabric_like {
                conflicts.push(LoaderConflict {
                    subject,
                    reason: format!("{:?} requires Fabric or Quilt", subject),
                });
            }
        }
        if self.has(OptimizationMod::OptiFine) {
            if !matches!(self.loader, CoreLoader::None | CoreLoader::Forge) {
                conflicts.push(LoaderConflict {
                    subject: OptimizationMod::OptiFine,
                    reason: format!("OptiFine cannot run on {:?}", self.loader),
                });
            }
            if self.has(OptimizationMod::Sodium) {
                conflicts.push(LoaderConflict {
                    subject: OptimizationMod::OptiFine,
                    reason: "OptiFine and Sodium are mutually exclusive".to_string(),
                });
            }
        }
        conflicts
    }

    pub fn is_compatible(&self) -> bool {
        self.conflicts().is_empty()
    }
}

/// Java runtime a version asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JavaRequirement {
    pub component: String,
    pub major_version: u32,
}

/// Flattened version descriptor after following `inheritsFrom`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfoDetail {
    /// Install id: the custom name when one was given
    pub id: String,
    /// Id of the descriptor the version was resolved from
    pub name: String,
    /// Root of the `inheritsFrom` chain, when there is one
    pub inherits_from: Option<String>,
    pub version_dir: PathBuf,
    pub assets_dir: PathBuf,
    pub libraries_dir: PathBuf,
    pub natives_dir: PathBuf,
    pub release_time: Option<DateTime<Utc>>,
    pub java_version: Option<JavaRequirement>,
    pub main_class: Option<String>,
    pub loader: ModLoaderProfile,
}

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by the download orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DownloadEvent {
    ProgressChanged {
        progress: DownloadProgress,
        error: Option<TaskError>,
    },
    DownloadCompleted(CompletedResult),
    CompletedInfo(VersionInfoDetail),
}

// ============================================================================
// Settings Types
// ============================================================================

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Game directory that holds `versions/`, `libraries/` and `assets/`
    pub game_dir: PathBuf,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub auth: AuthSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            game_dir: dirs::data_dir()
                .map(|p| p.join("lodestone").join(".minecraft"))
                .unwrap_or_else(|| PathBuf::from(".minecraft")),
            download: DownloadSettings::default(),
            auth: AuthSettings::default(),
        }
    }
}

/// Download engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Number of concurrent transfers
    pub parallelism: usize,
    /// Attempts per task before it is marked failed
    pub max_retries: u32,
    /// Delay before a failed task is re-queued
    pub retry_delay_ms: u64,
    /// Minimum gap between progress events of one task
    pub progress_interval_ms: u64,
    /// Base URL that replaces the host of every origin URL
    pub mirror_base: Option<String>,
    pub origin_fallback: OriginFallback,
    /// Keep libraries and natives per version
    pub isolate_versions: bool,
    pub asset_base_url: String,
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            parallelism: 8,
            max_retries: 3,
            retry_delay_ms: 500,
            progress_interval_ms: 300,
            mirror_base: None,
            origin_fallback: OriginFallback::FinalAttempt,
            isolate_versions: false,
            asset_base_url: "https://resources.download.minecraft.net".to_string(),
            connect_timeout_secs: 30,
            timeout_secs: 120,
        }
    }
}

/// Authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Azure application (client) id
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Check game ownership as part of every login
    pub verify_ownership: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            redirect_uri: "https://login.microsoftonline.com/common/oauth2/nativeclient"
                .to_string(),
            scopes: vec!["XboxLive.signin".to_string(), "offline_access".to_string()],
            verify_ownership: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn microsoft_account(issued_at: DateTime<Utc>, expires_in: u64) -> Account {
        let mut account = Account::new(
            AccountType::Microsoft,
            "Steve".to_string(),
            "uuid".to_string(),
        );
        account.microsoft = Some(MicrosoftAuthInfo {
            access_token: "ms".to_string(),
            refresh_token: Some("refresh".to_string()),
            issued_at,
            expires_in,
        });
        account
    }

    #[test]
    fn huge_lifetimes_saturate_instead_of_overflowing() {
        let account = microsoft_account(Utc::now(), u64::MAX);
        assert_eq!(
            account.microsoft.as_ref().unwrap().expires_at(),
            DateTime::<Utc>::MAX_UTC
        );
        assert!(!account.is_expired());
    }

    #[test]
    fn expiry_uses_only_the_authoritative_branch() {
        let now = Utc::now();
        let mut account = microsoft_account(now, 3600);
        // An expired Mojang branch must not expire a Microsoft account.
        account.mojang = Some(MojangAuthInfo {
            access_token: "mc".to_string(),
            refresh_token: None,
            client_token: None,
            issued_at: now - ChronoDuration::days(2),
            expires_in: 60,
        });
        assert!(!account.is_expired_at(now));
        assert!(account.is_expired_at(now + ChronoDuration::seconds(3600)));
    }

    #[test]
    fn account_without_its_branch_is_expired() {
        let account = Account::new(AccountType::Xbox, "Alex".to_string(), "u".to_string());
        assert!(account.is_expired());
    }

    #[test]
    fn offline_account_is_stable_and_never_expires() {
        let a = Account::offline("Notch");
        let b = Account::offline("Notch");
        assert_eq!(a.player_uuid, b.player_uuid);
        assert_eq!(a.account_type, AccountType::Offline);
        assert!(!a.is_expired_at(Utc::now() + ChronoDuration::days(3650)));
    }

    #[test]
    fn device_code_debug_hides_the_secret() {
        let result = DeviceCodeResult {
            device_code: "super-secret".to_string(),
            user_code: "ABCD-EFGH".to_string(),
            verification_uri: "https://microsoft.com/link".to_string(),
            expires_at: Utc::now(),
            interval: 5,
            message: "Go".to_string(),
        };
        let rendered = format!("{:?}", result);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("ABCD-EFGH"));
    }

    #[test]
    fn iris_without_sodium_is_rejected() {
        let profile = ModLoaderProfile::new(CoreLoader::Fabric).with(OptimizationMod::Iris);
        let conflicts = profile.conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].subject, OptimizationMod::Iris);

        let fixed = profile.with(OptimizationMod::Sodium);
        assert!(fixed.is_compatible());
    }

    #[test]
    fn sodium_on_forge_and_optifine_on_fabric_conflict() {
        let forge = ModLoaderProfile::new(CoreLoader::Forge).with(OptimizationMod::Sodium);
        assert!(!forge.is_compatible());

        let fabric = ModLoaderProfile::new(CoreLoader::Fabric).with(OptimizationMod::OptiFine);
        assert!(!fabric.is_compatible());

        let vanilla = ModLoaderProfile::new(CoreLoader::None).with(OptimizationMod::OptiFine);
        assert!(vanilla.is_compatible());
    }

    #[test]
    fn progress_percentage_and_partial_path() {
        let task = DownloadTask::new(
            "1.20.1",
            "https://example.com/a.jar".to_string(),
            PathBuf::from("/tmp/libs/a.jar"),
            DownloadCategory::Libraries,
            TaskPriority::Normal,
        )
        .with_integrity(Some(200), Some("ABC".to_string()));
        assert_eq!(task.sha1.as_deref(), Some("abc"));
        assert_eq!(task.partial_path(), PathBuf::from("/tmp/libs/a.jar.part"));

        let mut progress = DownloadProgress::new(task);
        progress.set_downloaded(50);
        assert!((progress.percentage - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn priority_orders_urgent_first() {
        assert!(TaskPriority::Urgent > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
    }

    #[test]
    fn settings_fill_missing_sections() {
        let settings: Settings =
            serde_json::from_str(r#"{"game_dir": "/games/mc"}"#).expect("settings");
        assert_eq!(settings.download.max_retries, 3);
        assert!(settings.auth.verify_ownership);
    }
}
