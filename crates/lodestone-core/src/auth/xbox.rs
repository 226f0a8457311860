//! Xbox Live user authentication and XSTS authorization

use crate::auth::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::error::{AuthError, XstsDenial};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const USER_AUTHENTICATE_URL: &str = "https://user.auth.xboxlive.com/user/authenticate";
pub const XSTS_AUTHORIZE_URL: &str = "https://xsts.auth.xboxlive.com/xsts/authorize";
/// Relying party of the Minecraft services API
pub const MINECRAFT_RELYING_PARTY: &str = "rp://api.minecraftservices.com/";

/// An Xbox Live or XSTS token with its user hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XboxToken {
    pub token: String,
    pub user_hash: String,
    pub issued_at: DateTime<Utc>,
    pub not_after: Option<DateTime<Utc>>,
    /// Claims of the first `xui` entry (`uhs`, `xid`, `gtg`, ...)
    pub display_claims: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct XboxAuthResponse {
    #[serde(default)]
    issue_instant: Option<String>,
    #[serde(default)]
    not_after: Option<String>,
    token: String,
    display_claims: DisplayClaims,
}

#[derive(Debug, Deserialize)]
struct DisplayClaims {
    #[serde(default)]
    xui: Vec<BTreeMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct XstsErrorResponse {
    #[serde(rename = "XErr")]
    xerr: Value,
}

/// Exchanges Microsoft tokens for Xbox Live and XSTS tokens
pub struct XboxAuthExchanger {
    transport: Arc<dyn HttpTransport>,
    user_authenticate_url: String,
    xsts_authorize_url: String,
    relying_party: String,
}

impl XboxAuthExchanger {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            user_authenticate_url: USER_AUTHENTICATE_URL.to_string(),
            xsts_authorize_url: XSTS_AUTHORIZE_URL.to_string(),
            relying_party: MINECRAFT_RELYING_PARTY.to_string(),
        }
    }

    pub fn with_endpoints(mut self, user_authenticate_url: &str, xsts_authorize_url: &str) -> Self {
        self.user_authenticate_url = user_authenticate_url.to_string();
        self.xsts_authorize_url = xsts_authorize_url.to_string();
        self
    }

    /// Authenticate with a Microsoft access token
    pub async fn exchange_xbox_live_token(&self, ms_access_token: &str) -> Result<XboxToken, AuthError> {
        let body = json!({
            "Properties": {
                "AuthMethod": "RPS",
                "SiteName": "user.auth.xboxlive.com",
                "RpsTicket": format!("d={}", ms_access_token)
            },
            "RelyingParty": "http://auth.xboxlive.com",
            "TokenType": "JWT"
        });
        let response = self
            .transport
            .send(HttpRequest::post_json(&self.user_authenticate_url, body))
            .await?;
        if !response.is_success() {
            return Err(response.into_error());
        }
        let token = parse_token(&response)?;
        debug!("Xbox Live user token issued");
        Ok(token)
    }

    /// Authorize an Xbox Live token for the Minecraft services relying party
    pub async fn exchange_xsts_token(&self, xbl_token: &str) -> Result<XboxToken, AuthError> {
        let body = json!({
            "Properties": {
                "SandboxId": "RETAIL",
                "UserTokens": [xbl_token]
            },
            "RelyingParty": self.relying_party,
            "TokenType": "JWT"
        });
        let response = self
            .transport
            .send(HttpRequest::post_json(&self.xsts_authorize_url, body))
            .await?;
        if !response.is_success() {
            return Err(xsts_error(response));
        }
        let token = parse_token(&response)?;
        debug!("XSTS token issued");
        Ok(token)
    }
}

fn parse_token(response: &HttpResponse) -> Result<XboxToken, AuthError> {
    let body: XboxAuthResponse = response.json()?;
    let claims: BTreeMap<String, String> = body
        .display_claims
        .xui
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect();
    let user_hash = claims
        .get("uhs")
        .cloned()
        .ok_or_else(|| AuthError::InvalidResponse("missing DisplayClaims.xui[0].uhs".to_string()))?;

    Ok(XboxToken {
        token: body.token,
        user_hash,
        issued_at: body
            .issue_instant
            .as_deref()
            .and_then(parse_instant)
            .unwrap_or_else(Utc::now),
        not_after: body.not_after.as_deref().and_then(parse_instant),
        display_claims: claims,
    })
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

fn xsts_error(response: HttpResponse) -> AuthError {
    if response.status == 401 {
        if let Ok(body) = response.json::<XstsErrorResponse>() {
            let code = match &body.xerr {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            };
            if let Some(code) = code {
                let denial = XstsDenial::from_code(code);
                warn!("XSTS authorization denied: {}", denial);
                return AuthError::XstsDenied(denial);
            }
        }
    }
    response.into_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::ScriptedTransport;
    use crate::auth::transport::RequestBody;

    const XBL_REPLY: &str = r#"{
        "IssueInstant": "2024-01-01T10:00:00.1234567Z",
        "NotAfter": "2024-01-15T10:00:00.1234567Z",
        "Token": "xbl-token",
        "DisplayClaims": { "xui": [ { "uhs": "1234" } ] }
    }"#;

    #[tokio::test]
    async fn rps_ticket_wraps_the_access_token() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(200, XBL_REPLY);
        let exchanger = XboxAuthExchanger::new(transport.clone());

        let token = exchanger.exchange_xbox_live_token("ms-at").await.unwrap();
        assert_eq!(token.token, "xbl-token");
        assert_eq!(token.user_hash, "1234");
        assert!(token.not_after.is_some());

        let request = &transport.requests()[0];
        let RequestBody::Json(body) = &request.body else {
            panic!("expected a JSON body");
        };
        assert_eq!(body["Properties"]["RpsTicket"], "d=ms-at");
    }

    #[tokio::test]
    async fn xsts_targets_minecraft_services() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            200,
            r#"{"Token":"xsts-token","DisplayClaims":{"xui":[{"uhs":"1234","xid":"2535"}]}}"#,
        );
        let exchanger = XboxAuthExchanger::new(transport.clone());

        let token = exchanger.exchange_xsts_token("xbl-token").await.unwrap();
        assert_eq!(token.display_claims.get("xid").map(String::as_str), Some("2535"));

        let RequestBody::Json(body) = &transport.requests()[0].body else {
            panic!("expected a JSON body");
        };
        assert_eq!(body["RelyingParty"], "rp://api.minecraftservices.com/");
        assert_eq!(body["Properties"]["UserTokens"][0], "xbl-token");
    }

    #[tokio::test]
    async fn xsts_denials_are_distinct() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(401, r#"{"Identity":"0","XErr":2148916233,"Message":"","Redirect":"https://start.ui.xboxlive.com/CreateAccount"}"#);
        transport.push(401, r#"{"Identity":"0","XErr":2148916238,"Message":""}"#);
        transport.push(500, "oops");
        let exchanger = XboxAuthExchanger::new(transport);

        assert!(matches!(
            exchanger.exchange_xsts_token("t").await,
            Err(AuthError::XstsDenied(XstsDenial::NoXboxAccount))
        ));
        assert!(matches!(
            exchanger.exchange_xsts_token("t").await,
            Err(AuthError::XstsDenied(XstsDenial::ChildAccount))
        ));
        assert!(matches!(
            exchanger.exchange_xsts_token("t").await,
            Err(AuthError::Http { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn missing_user_hash_is_rejected() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(200, r#"{"Token":"t","DisplayClaims":{"xui":[]}}"#);
        let exchanger = XboxAuthExchanger::new(transport);
        assert!(matches!(
            exchanger.exchange_xbox_live_token("ms").await,
            Err(AuthError::InvalidResponse(_))
        ));
    }
}
