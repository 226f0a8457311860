//! Minecraft services: Xbox login, profile, ownership, and the
//! Yggdrasil-compatible endpoints used by Mojang and third-party accounts

use crate::auth::transport::{error_detail, HttpRequest, HttpResponse, HttpTransport};
use crate::error::AuthError;
use chrono::{DateTime, Utc};
use lodestone_types::AccountProperty;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub const MINECRAFT_SERVICES_URL: &str = "https://api.minecraftservices.com";
pub const YGGDRASIL_URL: &str = "https://authserver.mojang.com";

/// Lifetime assumed for Yggdrasil tokens, which carry no expiry
const YGGDRASIL_TOKEN_LIFETIME: u64 = 24 * 60 * 60;

/// Game token from `login_with_xbox`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinecraftToken {
    pub access_token: String,
    pub expires_in: u64,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MinecraftProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub skins: Vec<ProfileTexture>,
    #[serde(default)]
    pub capes: Vec<ProfileTexture>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProfileTexture {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
}

/// Session returned by the Yggdrasil `authenticate` and `refresh` calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YggdrasilSession {
    pub access_token: String,
    pub client_token: String,
    pub profile: Option<YggdrasilProfile>,
    pub properties: Vec<AccountProperty>,
    pub issued_at: DateTime<Utc>,
    pub expires_in: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct YggdrasilProfile {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YggdrasilResponse {
    access_token: String,
    client_token: String,
    #[serde(default)]
    selected_profile: Option<YggdrasilProfile>,
    #[serde(default)]
    user: Option<YggdrasilUser>,
}

#[derive(Debug, Deserialize)]
struct YggdrasilUser {
    #[serde(default)]
    properties: Vec<YggdrasilProperty>,
}

#[derive(Debug, Deserialize)]
struct YggdrasilProperty {
    name: String,
    value: String,
    #[serde(default)]
    signature: Option<String>,
}

/// Talks to the Minecraft services API and a Yggdrasil auth server
pub struct MojangAuthExchanger {
    transport: Arc<dyn HttpTransport>,
    services_url: String,
    yggdrasil_url: String,
}

impl MojangAuthExchanger {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            services_url: MINECRAFT_SERVICES_URL.to_string(),
            yggdrasil_url: YGGDRASIL_URL.to_string(),
        }
    }

    pub fn with_services_url(mut self, url: &str) -> Self {
        self.services_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Point the Yggdrasil calls at a third-party auth server
    pub fn with_yggdrasil_url(mut self, url: &str) -> Self {
        self.yggdrasil_url = url.trim_end_matches('/').to_string();
        self
    }

    fn profile_url(&self) -> String {
        format!("{}/minecraft/profile", self.services_url)
    }

    /// Trade an XSTS token for a game token
    pub async fn login_with_xbox(&self, xsts_token: &str, user_hash: &str) -> Result<MinecraftToken, AuthError> {
        let issued_at = Utc::now();
        let body = json!({
            "identityToken": format!("XBL3.0 x={};{}", user_hash, xsts_token)
        });
        let response = self
            .transport
            .send(HttpRequest::post_json(
                format!("{}/authentication/login_with_xbox", self.services_url),
                body,
            ))
            .await?;
        if !response.is_success() {
            if error_detail(&response.body).contains("NOT_OWNED") {
                return Err(AuthError::NotOwned);
            }
            return Err(response.into_error());
        }

        let body: LoginResponse = response.json()?;
        debug!("Minecraft services token issued");
        Ok(MinecraftToken {
            access_token: body.access_token,
            expires_in: body.expires_in.unwrap_or(86_400),
            issued_at,
        })
    }

    /// Player name and UUID. A missing profile means the game is not owned.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<MinecraftProfile, AuthError> {
        let response = self
            .transport
            .send(HttpRequest::get(self.profile_url()).bearer(access_token))
            .await?;
        if response.status == 404 {
            Err(AuthError::NotOwned)
        } else if response.is_success() {
            response.json()
        } else {
            Err(response.into_error())
        }
    }

    /// Whether the account holds a game licence. An empty entitlement list
    /// (or an empty object) means it does not.
    pub async fn check_ownership(&self, access_token: &str) -> Result<bool, AuthError> {
        let response = self
            .transport
            .send(
                HttpRequest::get(format!("{}/entitlements/mcstore", self.services_url))
                    .bearer(access_token),
            )
            .await?;
        if !response.is_success() {
            return Err(response.into_error());
        }

        let body: Value = response.json()?;
        let owned = body
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items.iter().any(|item| {
                    matches!(
                        item.get("name").and_then(Value::as_str),
                        Some("product_minecraft") | Some("game_minecraft")
                    )
                })
            })
            .unwrap_or(false);
        Ok(owned)
    }

    /// A game token is valid while the profile endpoint accepts it
    pub async fn validate_token(&self, access_token: &str) -> Result<bool, AuthError> {
        let response = self
            .transport
            .send(HttpRequest::get(self.profile_url()).bearer(access_token))
            .await?;
        classify_validation(response)
    }

    /// Sign in to a Yggdrasil server with a username and password
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        client_token: &str,
    ) -> Result<YggdrasilSession, AuthError> {
        let body = json!({
            "agent": { "name": "Minecraft", "version": 1 },
            "username": username,
            "password": password,
            "clientToken": client_token,
            "requestUser": true
        });
        self.yggdrasil("authenticate", body).await
    }

    /// Refresh a Yggdrasil access token
    pub async fn refresh_token(&self, access_token: &str, client_token: &str) -> Result<YggdrasilSession, AuthError> {
        let body = json!({
            "accessToken": access_token,
            "clientToken": client_token,
            "requestUser": true
        });
        self.yggdrasil("refresh", body).await
    }

    /// Ask a Yggdrasil server whether a token is still usable
    pub async fn validate_session(&self, access_token: &str, client_token: Option<&str>) -> Result<bool, AuthError> {
        let mut body = json!({ "accessToken": access_token });
        if let Some(client_token) = client_token {
            body["clientToken"] = json!(client_token);
        }
        let response = self
            .transport
            .send(HttpRequest::post_json(format!("{}/validate", self.yggdrasil_url), body))
            .await?;
        classify_validation(response)
    }

    /// Invalidate a Yggdrasil access token
    pub async fn logout(&self, access_token: &str, client_token: Option<&str>) -> Result<(), AuthError> {
        let mut body = json!({ "accessToken": access_token });
        if let Some(client_token) = client_token {
            body["clientToken"] = json!(client_token);
        }
        let response = self
            .transport
            .send(HttpRequest::post_json(format!("{}/invalidate", self.yggdrasil_url), body))
            .await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(yggdrasil_error(response))
        }
    }

    async fn yggdrasil(&self, endpoint: &str, body: Value) -> Result<YggdrasilSession, AuthError> {
        let issued_at = Utc::now();
        let response = self
            .transport
            .send(HttpRequest::post_json(
                format!("{}/{}", self.yggdrasil_url, endpoint),
                body,
            ))
            .await?;
        if !response.is_success() {
            return Err(yggdrasil_error(response));
        }

        let body: YggdrasilResponse = response.json()?;
        Ok(YggdrasilSession {
            access_token: body.access_token,
            client_token: body.client_token,
            profile: body.selected_profile,
            properties: body
                .user
                .map(|user| {
                    user.properties
                        .into_iter()
                        .map(|p| AccountProperty {
                            name: p.name,
                            value: p.value,
                            signature: p.signature,
                        })
                        .collect()
                })
                .unwrap_or_default(),
            issued_at,
            expires_in: YGGDRASIL_TOKEN_LIFETIME,
        })
    }
}

fn classify_validation(response: HttpResponse) -> Result<bool, AuthError> {
    if response.is_success() {
        Ok(true)
    } else if response.status >= 500 {
        Err(response.into_error())
    } else {
        Ok(false)
    }
}

fn yggdrasil_error(response: HttpResponse) -> AuthError {
    if response.status == 401 || response.status == 403 {
        AuthError::InvalidCredentials(error_detail(&response.body))
    } else {
        response.into_error()
    }
}
