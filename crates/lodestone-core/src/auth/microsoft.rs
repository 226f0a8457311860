//! Microsoft identity platform: authorization code, refresh token and
//! device code grants

use crate::auth::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::AuthError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lodestone_types::{AuthSettings, DeviceCodeResult, MicrosoftAuthInfo};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub const AUTHORIZE_URL: &str = "https://login.microsoftonline.com/consumers/oauth2/v2.0/authorize";
pub const TOKEN_URL: &str = "https://login.microsoftonline.com/consumers/oauth2/v2.0/token";
pub const DEVICE_CODE_URL: &str =
    "https://login.microsoftonline.com/consumers/oauth2/v2.0/devicecode";

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Application registration used against the Microsoft endpoints
#[derive(Debug, Clone)]
pub struct MicrosoftAuthConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub device_code_url: String,
}

impl MicrosoftAuthConfig {
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            scopes: vec!["XboxLive.signin".to_string(), "offline_access".to_string()],
            authorize_url: AUTHORIZE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            device_code_url: DEVICE_CODE_URL.to_string(),
        }
    }

    pub fn from_settings(settings: &AuthSettings) -> Self {
        let mut config = Self::new(settings.client_id.clone(), settings.redirect_uri.clone());
        config.client_secret = settings.client_secret.clone();
        if !settings.scopes.is_empty() {
            config.scopes = settings.scopes.clone();
        }
        config
    }

    fn validate(&self) -> Result<Url, AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Configuration("client id is empty".to_string()));
        }
        Url::parse(&self.redirect_uri).map_err(|e| {
            AuthError::Configuration(format!("invalid redirect URI {:?}: {}", self.redirect_uri, e))
        })?;
        for url in [&self.token_url, &self.device_code_url] {
            Url::parse(url)
                .map_err(|e| AuthError::Configuration(format!("invalid endpoint {:?}: {}", url, e)))?;
        }
        Url::parse(&self.authorize_url).map_err(|e| {
            AuthError::Configuration(format!("invalid endpoint {:?}: {}", self.authorize_url, e))
        })
    }
}

/// Tokens returned by the token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicrosoftToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    pub issued_at: DateTime<Utc>,
}

impl MicrosoftToken {
    pub fn into_auth_info(self) -> MicrosoftAuthInfo {
        MicrosoftAuthInfo {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            issued_at: self.issued_at,
            expires_in: self.expires_in,
        }
    }
}

/// Outcome of one device-code poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevicePoll {
    Pending,
    /// Poll less often: add five seconds to the interval
    SlowDown,
    Authorized(MicrosoftToken),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    #[serde(default)]
    interval: Option<u64>,
    #[serde(default)]
    message: Option<String>,
}

/// Talks to the Microsoft OAuth endpoints
pub struct TokenExchangeClient {
    config: MicrosoftAuthConfig,
    authorize_url: Url,
    transport: Arc<dyn HttpTransport>,
}

impl TokenExchangeClient {
    /// Fails with `AuthError::Configuration` on an empty client id or a
    /// malformed URL
    pub fn new(
        config: MicrosoftAuthConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, AuthError> {
        let authorize_url = config.validate()?;
        Ok(Self {
            config,
            authorize_url,
            transport,
        })
    }

    pub fn config(&self) -> &MicrosoftAuthConfig {
        &self.config
    }

    /// URL to send the user to for the authorization-code flow.
    /// An empty `scopes` uses the configured scopes.
    pub fn authorization_url(&self, state: &str, scopes: &[String]) -> String {
        let scope = self.scope_string(scopes);
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", &scope)
            .append_pair("state", state);
        url.into()
    }

    pub async fn exchange_authorization_code(&self, code: &str) -> Result<MicrosoftToken, AuthError> {
        let mut form = self.base_form("authorization_code");
        form.push(("code".to_string(), code.to_string()));
        form.push(("redirect_uri".to_string(), self.config.redirect_uri.clone()));
        form.push(("scope".to_string(), self.scope_string(&[])));
        self.request_token(form).await
    }

    pub async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<MicrosoftToken, AuthError> {
        let mut form = self.base_form("refresh_token");
        form.push(("refresh_token".to_string(), refresh_token.to_string()));
        form.push(("redirect_uri".to_string(), self.config.redirect_uri.clone()));
        form.push(("scope".to_string(), self.scope_string(&[])));
        self.request_token(form).await
    }

    /// Start a device-code login. The expiry is fixed here, from the time
    /// the request was sent.
    pub async fn request_device_code(&self, scopes: &[String]) -> Result<DeviceCodeResult, AuthError> {
        let requested_at = Utc::now();
        let form = vec![
            ("client_id".to_string(), self.config.client_id.clone()),
            ("scope".to_string(), self.scope_string(scopes)),
        ];
        let response = self
            .transport
            .send(HttpRequest::post_form(&self.config.device_code_url, form))
            .await?;
        if !response.is_success() {
            return Err(oauth_error(response));
        }

        let body: DeviceCodeResponse = response.json()?;
        debug!("Device code issued, expires in {}s", body.expires_in);
        let expires_at = i64::try_from(body.expires_in)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|lifetime| requested_at.checked_add_signed(lifetime))
            .ok_or_else(|| {
                AuthError::InvalidResponse(format!(
                    "device code lifetime of {}s is out of range",
                    body.expires_in
                ))
            })?;
        let message = body.message.unwrap_or_else(|| {
            format!(
                "To sign in, open {} and enter the code {}",
                body.verification_uri, body.user_code
            )
        });
        Ok(DeviceCodeResult {
            device_code: body.device_code,
            user_code: body.user_code,
            verification_uri: body.verification_uri,
            expires_at,
            interval: body.interval.unwrap_or(5).max(1),
            message,
        })
    }

    /// Poll the token endpoint once for a device code
    pub async fn poll_device_code(&self, device_code: &str) -> Result<DevicePoll, AuthError> {
        let mut form = self.base_form(DEVICE_CODE_GRANT);
        form.push(("device_code".to_string(), device_code.to_string()));

        let issued_at = Utc::now();
        let response = self
            .transport
            .send(HttpRequest::post_form(&self.config.token_url, form))
            .await?;
        if response.is_success() {
            return Ok(DevicePoll::Authorized(parse_token(&response, issued_at)?));
        }

        let error: OAuthErrorResponse = match response.json() {
            Ok(error) => error,
            Err(_) => return Err(response.into_error()),
        };
        match error.error.as_str() {
            "authorization_pending" => Ok(DevicePoll::Pending),
            "slow_down" => Ok(DevicePoll::SlowDown),
            _ => Err(map_oauth_error(error)),
        }
    }

    fn base_form(&self, grant_type: &str) -> Vec<(String, String)> {
        let mut form = vec![
            ("client_id".to_string(), self.config.client_id.clone()),
            ("grant_type".to_string(), grant_type.to_string()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret".to_string(), secret.clone()));
        }
        form
    }

    fn scope_string(&self, scopes: &[String]) -> String {
        if scopes.is_empty() {
            self.config.scopes.join(" ")
        } else {
            scopes.join(" ")
        }
    }

    async fn request_token(&self, form: Vec<(String, String)>) -> Result<MicrosoftToken, AuthError> {
        let issued_at = Utc::now();
        let response = self
            .transport
            .send(HttpRequest::post_form(&self.config.token_url, form))
            .await?;
        if !response.is_success() {
            return Err(oauth_error(response));
        }
        parse_token(&response, issued_at)
    }
}

fn parse_token(response: &HttpResponse, issued_at: DateTime<Utc>) -> Result<MicrosoftToken, AuthError> {
    let body: TokenResponse = response.json()?;
    Ok(MicrosoftToken {
        access_token: body.access_token,
        refresh_token: body.refresh_token,
        expires_in: body.expires_in.unwrap_or(3600),
        issued_at,
    })
}

fn oauth_error(response: HttpResponse) -> AuthError {
    match response.json::<OAuthErrorResponse>() {
        Ok(error) => map_oauth_error(error),
        Err(_) => response.into_error(),
    }
}

fn map_oauth_error(error: OAuthErrorResponse) -> AuthError {
    let description = error.error_description.unwrap_or_default();
    match error.error.as_str() {
        "authorization_declined" | "access_denied" => AuthError::AuthorizationDeclined,
        "bad_verification_code" => AuthError::BadVerificationCode,
        "expired_token" => AuthError::ExpiredToken,
        "invalid_grant" => AuthError::InvalidCredentials(description),
        _ => AuthError::OAuth {
            error: error.error,
            description,
        },
    }
}
