//! Login pipeline: Microsoft → Xbox Live → XSTS → Minecraft services
//!
//! Every login runs the same fixed chain and either returns a complete
//! `Account` or the first error. Each attempt broadcasts its state
//! transitions as `LoginProgress` events.

use crate::auth::microsoft::{DevicePoll, MicrosoftAuthConfig, MicrosoftToken, TokenExchangeClient};
use crate::auth::mojang::{MinecraftProfile, MinecraftToken, MojangAuthExchanger};
use crate::auth::transport::HttpTransport;
use crate::auth::xbox::{XboxAuthExchanger, XboxToken};
use crate::error::AuthError;
use chrono::Utc;
use lodestone_types::{
    Account, AccountType, AuthSettings, DeviceCodeResult, GameSession, LoginProgress,
    LoginStage, LoginState, MojangAuthInfo, XboxAuthInfo,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Extra wait added to the poll interval on `slow_down`
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// Check the game licence before returning an account
    pub verify_ownership: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            verify_ownership: true,
        }
    }
}

pub struct AuthOrchestrator {
    microsoft: TokenExchangeClient,
    xbox: XboxAuthExchanger,
    mojang: MojangAuthExchanger,
    options: AuthOptions,
    events: broadcast::Sender<LoginProgress>,
}

impl AuthOrchestrator {
    pub fn new(
        microsoft: TokenExchangeClient,
        xbox: XboxAuthExchanger,
        mojang: MojangAuthExchanger,
        options: AuthOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            microsoft,
            xbox,
            mojang,
            options,
            events,
        }
    }

    /// All three exchangers on one transport, configured from settings
    pub fn from_settings(
        settings: &AuthSettings,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, AuthError> {
        let microsoft = TokenExchangeClient::new(
            MicrosoftAuthConfig::from_settings(settings),
            Arc::clone(&transport),
        )?;
        Ok(Self::new(
            microsoft,
            XboxAuthExchanger::new(Arc::clone(&transport)),
            MojangAuthExchanger::new(transport),
            AuthOptions {
                verify_ownership: settings.verify_ownership,
            },
        ))
    }

    /// Subscribe to login state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<LoginProgress> {
        self.events.subscribe()
    }

    pub fn microsoft(&self) -> &TokenExchangeClient {
        &self.microsoft
    }

    pub async fn login_with_authorization_code(&self, code: &str) -> Result<Account, AuthError> {
        let mut attempt = Attempt::start(&self.events);
        let ms = stage(
            &mut attempt,
            LoginState::RequestingMicrosoftToken,
            self.microsoft.exchange_authorization_code(code),
        )
        .await?;
        self.complete_from_microsoft(&mut attempt, ms).await
    }

    pub async fn login_with_refresh_token(&self, refresh_token: &str) -> Result<Account, AuthError> {
        let mut attempt = Attempt::start(&self.events);
        let ms = stage(
            &mut attempt,
            LoginState::RequestingMicrosoftToken,
            self.microsoft.exchange_refresh_token(refresh_token),
        )
        .await?;
        self.complete_from_microsoft(&mut attempt, ms).await
    }

    /// Log in from an existing Xbox Live user token
    pub async fn login_with_xbox_token(&self, xbl_token: &str) -> Result<Account, AuthError> {
        let mut attempt = Attempt::start(&self.events);
        self.complete_from_xbox(&mut attempt, xbl_token, AccountType::Xbox)
            .await
    }

    /// Request a device code for the caller to display
    pub async fn request_device_code(&self, scopes: &[String]) -> Result<DeviceCodeResult, AuthError> {
        self.microsoft.request_device_code(scopes).await
    }

    /// Full device-code login: request a code, hand it to `on_code`, poll
    /// until the user finishes, then run the rest of the chain
    pub async fn login_with_device_code<F>(
        &self,
        scopes: &[String],
        on_code: F,
        cancel: &CancellationToken,
    ) -> Result<Account, AuthError>
    where
        F: FnOnce(&DeviceCodeResult) + Send,
    {
        let mut attempt = Attempt::start(&self.events);
        let code = stage(
            &mut attempt,
            LoginState::RequestingMicrosoftToken,
            self.microsoft.request_device_code(scopes),
        )
        .await?;
        on_code(&code);
        self.device_flow(&mut attempt, &code, cancel).await
    }

    /// Device-code login with a code the caller already requested
    pub async fn login_with_device_code_result(
        &self,
        code: &DeviceCodeResult,
        cancel: &CancellationToken,
    ) -> Result<Account, AuthError> {
        let mut attempt = Attempt::start(&self.events);
        self.device_flow(&mut attempt, code, cancel).await
    }

    /// Username/password login against a Yggdrasil server, for Mojang and
    /// third-party accounts
    pub async fn login_with_credentials(
        &self,
        username: &str,
        password: &str,
        account_type: AccountType,
    ) -> Result<Account, AuthError> {
        if !matches!(account_type, AccountType::Mojang | AccountType::ThirdParty) {
            return Err(AuthError::Unsupported(format!(
                "password login for {:?} accounts",
                account_type
            )));
        }

        let mut attempt = Attempt::start(&self.events);
        let client_token = Uuid::new_v4().simple().to_string();
        let session = stage(
            &mut attempt,
            LoginState::ExchangingMojang,
            self.mojang.authenticate(username, password, &client_token),
        )
        .await?;
        let Some(profile) = session.profile.clone() else {
            let err = AuthError::NotOwned;
            attempt.fail(&err);
            return Err(err);
        };

        let mut account = Account::new(account_type, profile.name, profile.id);
        account.mojang = Some(MojangAuthInfo {
            access_token: session.access_token.clone(),
            refresh_token: None,
            client_token: Some(session.client_token),
            issued_at: session.issued_at,
            expires_in: session.expires_in,
        });
        account.session = Some(GameSession {
            access_token: session.access_token,
            user_type: "mojang".to_string(),
            xuid: None,
        });
        account.properties = session.properties;

        attempt.enter(LoginState::Complete);
        info!("Logged in as {}", account.player_name);
        Ok(account)
    }

    /// Renew the tokens of `account`, returning the updated account.
    /// Microsoft accounts re-run the whole chain from their refresh token.
    pub async fn refresh(&self, account: &Account) -> Result<Account, AuthError> {
        let refreshed = match account.account_type {
            AccountType::Offline => account.clone(),
            AccountType::Microsoft => {
                let previous = account.microsoft.as_ref().and_then(|m| m.refresh_token.clone());
                let Some(refresh_token) = previous.clone() else {
                    return Err(AuthError::InvalidCredentials(
                        "the account has no Microsoft refresh token".to_string(),
                    ));
                };
                let mut attempt = Attempt::start(&self.events);
                let mut ms = stage(
                    &mut attempt,
                    LoginState::RequestingMicrosoftToken,
                    self.microsoft.exchange_refresh_token(&refresh_token),
                )
                .await?;
                if ms.refresh_token.is_none() {
                    ms.refresh_token = previous;
                }
                self.complete_from_microsoft(&mut attempt, ms).await?
            }
            AccountType::Xbox => {
                let Some(xbl_token) = account.xbox.as_ref().map(|x| x.xbl_token.clone()) else {
                    return Err(AuthError::InvalidCredentials(
                        "the account has no Xbox Live token".to_string(),
                    ));
                };
                let mut attempt = Attempt::start(&self.events);
                self.complete_from_xbox(&mut attempt, &xbl_token, AccountType::Xbox)
                    .await?
            }
            AccountType::Mojang | AccountType::ThirdParty => self.refresh_yggdrasil(account).await?,
        };

        let mut refreshed = refreshed;
        refreshed.id = account.id;
        refreshed.created_at = account.created_at;
        refreshed.touch();
        Ok(refreshed)
    }

    /// Whether the account's game token is still accepted
    pub async fn validate(&self, account: &Account) -> Result<bool, AuthError> {
        match account.account_type {
            AccountType::Offline => Ok(true),
            AccountType::Microsoft | AccountType::Xbox => match &account.session {
                Some(session) => self.mojang.validate_token(&session.access_token).await,
                None => Ok(false),
            },
            AccountType::Mojang | AccountType::ThirdParty => match &account.mojang {
                Some(mojang) => {
                    self.mojang
                        .validate_session(&mojang.access_token, mojang.client_token.as_deref())
                        .await
                }
                None => Ok(false),
            },
        }
    }

    /// Drop every token from the account, revoking Yggdrasil tokens
    /// remotely first. Local tokens are cleared even if revoking fails.
    pub async fn logout(&self, account: &mut Account) -> Result<(), AuthError> {
        let revoked = match (account.account_type, &account.mojang) {
            (AccountType::Mojang | AccountType::ThirdParty, Some(mojang)) => {
                self.mojang
                    .logout(&mojang.access_token, mojang.client_token.as_deref())
                    .await
            }
            _ => Ok(()),
        };

        account.microsoft = None;
        account.xbox = None;
        account.mojang = None;
        account.session = None;
        account.touch();
        info!("Logged out {}", account.player_name);
        revoked
    }

    async fn refresh_yggdrasil(&self, account: &Account) -> Result<Account, AuthError> {
        let Some(mojang) = &account.mojang else {
            return Err(AuthError::InvalidCredentials(
                "the account has no game token".to_string(),
            ));
        };
        let client_token = mojang.client_token.clone().unwrap_or_default();

        let mut attempt = Attempt::start(&self.events);
        let session = stage(
            &mut attempt,
            LoginState::ExchangingMojang,
            self.mojang.refresh_token(&mojang.access_token, &client_token),
        )
        .await?;

        let mut refreshed = account.clone();
        if let Some(profile) = session.profile {
            refreshed.player_name = profile.name;
            refreshed.player_uuid = profile.id;
        }
        if !session.properties.is_empty() {
            refreshed.properties = session.properties;
        }
        refreshed.mojang = Some(MojangAuthInfo {
            access_token: session.access_token.clone(),
            refresh_token: None,
            client_token: Some(session.client_token),
            issued_at: session.issued_at,
            expires_in: session.expires_in,
        });
        refreshed.session = Some(GameSession {
            access_token: session.access_token,
            user_type: "mojang".to_string(),
            xuid: None,
        });
        attempt.enter(LoginState::Complete);
        Ok(refreshed)
    }

    async fn device_flow(
        &self,
        attempt: &mut Attempt<'_>,
        code: &DeviceCodeResult,
        cancel: &CancellationToken,
    ) -> Result<Account, AuthError> {
        attempt.enter(LoginState::RequestingMicrosoftToken);
        let ms = match self.poll_until_authorized(code, cancel).await {
            Ok(ms) => ms,
            Err(e) => {
                attempt.fail(&e);
                return Err(e);
            }
        };
        self.complete_from_microsoft(attempt, ms).await
    }

    /// Poll at the server's cadence until the user signs in, the code
    /// expires, a terminal error arrives or `cancel` fires. No poll is sent
    /// at or after the expiry.
    async fn poll_until_authorized(
        &self,
        code: &DeviceCodeResult,
        cancel: &CancellationToken,
    ) -> Result<MicrosoftToken, AuthError> {
        let remaining = (code.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let deadline = Instant::now() + remaining;
        let mut interval = code.interval();

        loop {
            let next_poll = Instant::now() + interval;
            if next_poll >= deadline {
                warn!("Device code expired before the user signed in");
                return Err(AuthError::ExpiredToken);
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Device code login cancelled");
                    return Err(AuthError::Cancelled);
                }
                _ = tokio::time::sleep_until(next_poll) => {}
            }

            match self.microsoft.poll_device_code(&code.device_code).await? {
                DevicePoll::Pending => debug!("Waiting for the user to sign in"),
                DevicePoll::SlowDown => {
                    interval += SLOW_DOWN_STEP;
                    debug!("Slowing device code polling to {:?}", interval);
                }
                DevicePoll::Authorized(token) => return Ok(token),
            }
        }
    }

    async fn complete_from_microsoft(
        &self,
        attempt: &mut Attempt<'_>,
        ms: MicrosoftToken,
    ) -> Result<Account, AuthError> {
        let xbl = stage(
            attempt,
            LoginState::ExchangingXbox,
            self.xbox.exchange_xbox_live_token(&ms.access_token),
        )
        .await?;
        let mut account = self
            .complete_from_xbox(attempt, &xbl.token, AccountType::Microsoft)
            .await?;
        account.microsoft = Some(ms.into_auth_info());
        Ok(account)
    }

    async fn complete_from_xbox(
        &self,
        attempt: &mut Attempt<'_>,
        xbl_token: &str,
        account_type: AccountType,
    ) -> Result<Account, AuthError> {
        let xsts = stage(
            attempt,
            LoginState::ExchangingXsts,
            self.xbox.exchange_xsts_token(xbl_token),
        )
        .await?;

        let (game, profile) = stage(attempt, LoginState::ExchangingMojang, async {
            let game = self.mojang.login_with_xbox(&xsts.token, &xsts.user_hash).await?;
            let profile = self.mojang.fetch_profile(&game.access_token).await?;
            Ok((game, profile))
        })
        .await?;

        if self.options.verify_ownership {
            let owned = stage(
                attempt,
                LoginState::VerifyingOwnership,
                self.mojang.check_ownership(&game.access_token),
            )
            .await?;
            if !owned {
                let err = AuthError::NotOwned;
                attempt.fail(&err);
                return Err(err);
            }
        }

        let account = assemble(account_type, xbl_token, xsts, game, profile);
        attempt.enter(LoginState::Complete);
        info!("Logged in as {}", account.player_name);
        Ok(account)
    }
}

fn assemble(
    account_type: AccountType,
    xbl_token: &str,
    xsts: XboxToken,
    game: MinecraftToken,
    profile: MinecraftProfile,
) -> Account {
    let xuid = xsts.display_claims.get("xid").cloned();
    let mut account = Account::new(account_type, profile.name, profile.id);
    account.xbox = Some(XboxAuthInfo {
        user_hash: xsts.user_hash,
        access_token: xsts.token,
        xbl_token: xbl_token.to_string(),
        display_claims: xsts.display_claims,
        issued_at: xsts.issued_at,
        expires_at: xsts.not_after,
    });
    account.mojang = Some(MojangAuthInfo {
        access_token: game.access_token.clone(),
        refresh_token: None,
        client_token: None,
        issued_at: game.issued_at,
        expires_in: game.expires_in,
    });
    account.session = Some(GameSession {
        access_token: game.access_token,
        user_type: "msa".to_string(),
        xuid,
    });
    account
}

/// State of one login attempt
struct Attempt<'a> {
    id: Uuid,
    state: LoginState,
    events: &'a broadcast::Sender<LoginProgress>,
}

impl<'a> Attempt<'a> {
    fn start(events: &'a broadcast::Sender<LoginProgress>) -> Self {
        let attempt = Self {
            id: Uuid::new_v4(),
            state: LoginState::Idle,
            events,
        };
        attempt.emit();
        attempt
    }

    fn enter(&mut self, state: LoginState) {
        if self.state != state {
            self.state = state;
            self.emit();
        }
    }

    /// Attribute `error` to the stage that was running
    fn fail(&mut self, error: &AuthError) {
        let stage = self.state.stage().unwrap_or(LoginStage::Microsoft);
        warn!("Login failed during {:?}: {}", stage, error);
        self.enter(LoginState::Failed {
            stage,
            reason: error.to_string(),
        });
    }

    fn emit(&self) {
        let _ = self.events.send(LoginProgress {
            attempt: self.id,
            state: self.state.clone(),
        });
    }
}

async fn stage<T, F>(attempt: &mut Attempt<'_>, state: LoginState, work: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    attempt.enter(state);
    match work.await {
        Ok(value) => Ok(value),
        Err(e) => {
            attempt.fail(&e);
            Err(e)
        }
    }
}
