//! OAuth credential channel for Anthropic.
//!
//! Runs alongside static API keys: when an OAuth session exists, the
//! pipeline asks [`OAuthManager::bearer`] for a fresh token before each
//! Anthropic request and the adapter sends `Authorization: Bearer …` plus
//! the `anthropic-beta` value instead of `x-api-key`.
//!
//! The manager owns the whole token lifecycle: PKCE authorize-URL
//! construction, code exchange, silent refresh (serialized behind one lock,
//! with a safety margin before expiry), and persistence under the user
//! config directory so a restart does not force re-authentication.

use std::path::PathBuf;

use anyhow::Context;
use base64::Engine as _;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::GatewayError;

/// `anthropic-beta` value required for OAuth-authenticated requests.
pub const OAUTH_BETA: &str = "oauth-2025-04-20";

const AUTHORIZE_URL: &str = "https://claude.ai/oauth/authorize";
const TOKEN_URL: &str = "https://console.anthropic.com/v1/oauth/token";
const REDIRECT_URI: &str = "https://console.anthropic.com/oauth/code/callback";
const SCOPES: &str = "org:create_api_key user:profile user:inference";

/// Refresh this long before the recorded expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTokens {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
}

impl StoredTokens {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

#[derive(Default)]
struct SessionState {
    tokens: Option<StoredTokens>,
    /// PKCE verifier for the in-flight authorize round, if any.
    pending_verifier: Option<String>,
}

pub struct OAuthManager {
    client_id: Option<String>,
    http: reqwest::Client,
    state: Mutex<SessionState>,
    token_path: PathBuf,
    authorize_url: String,
    token_url: String,
}

impl OAuthManager {
    /// Build the manager, loading any persisted tokens.
    ///
    /// `client_id` comes from `providers_auth.anthropic.oauth.client_id`;
    /// `None` disables the channel entirely.
    pub fn new(client_id: Option<String>) -> Self {
        Self::with_endpoints(
            client_id,
            default_token_path(),
            AUTHORIZE_URL.into(),
            TOKEN_URL.into(),
        )
    }

    /// Endpoint-injectable constructor, used by tests.
    pub fn with_endpoints(
        client_id: Option<String>,
        token_path: PathBuf,
        authorize_url: String,
        token_url: String,
    ) -> Self {
        let tokens = load_tokens(&token_path);
        Self {
            client_id,
            http: reqwest::Client::new(),
            state: Mutex::new(SessionState { tokens, pending_verifier: None }),
            token_path,
            authorize_url,
            token_url,
        }
    }

    pub fn enabled(&self) -> bool {
        self.client_id.is_some()
    }

    /// A bearer token valid for at least the expiry margin, refreshing if
    /// needed. `None` when the channel is disabled or no session exists.
    ///
    /// Refresh is serialized by the state lock; concurrent callers wait for
    /// one refresh rather than racing the token endpoint.
    pub async fn bearer(&self) -> Option<String> {
        let client_id = self.client_id.as_ref()?;
        let mut state = self.state.lock().await;
        let tokens = state.tokens.as_ref()?;

        if tokens.is_fresh(Utc::now()) {
            return Some(tokens.access_token.clone());
        }

        let refresh_token = tokens.refresh_token.clone()?;
        match self.grant(json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": client_id,
        }))
        .await
        {
            Ok(tokens) => {
                let access = tokens.access_token.clone();
                persist_tokens(&self.token_path, &tokens);
                state.tokens = Some(tokens);
                Some(access)
            }
            Err(e) => {
                tracing::warn!(error = %e, "OAuth token refresh failed");
                None
            }
        }
    }

    /// Build the authorization URL for a new PKCE round and remember the
    /// verifier for the matching callback.
    pub async fn authorize_url(&self) -> Result<String, GatewayError> {
        let client_id = self.require_client_id()?;

        let verifier = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(Sha256::digest(verifier.as_bytes()));

        self.state.lock().await.pending_verifier = Some(verifier.clone());

        Ok(format!(
            "{}?code=true&client_id={}&response_type=code&redirect_uri={}&scope={}&\
             code_challenge={}&code_challenge_method=S256&state={}",
            self.authorize_url,
            client_id,
            urlencode(REDIRECT_URI),
            urlencode(SCOPES),
            challenge,
            verifier,
        ))
    }

    /// Exchange an authorization code for tokens.
    ///
    /// Accepts the `code#state` form the hosted flow hands users.
    pub async fn handle_callback(&self, code: &str) -> Result<(), GatewayError> {
        let client_id = self.require_client_id()?.to_string();

        let (code, state_part) = match code.split_once('#') {
            Some((c, s)) => (c.to_string(), Some(s.to_string())),
            None => (code.to_string(), None),
        };

        let mut state = self.state.lock().await;
        let verifier = state.pending_verifier.take().ok_or_else(|| {
            GatewayError::BadRequest("no authorization round in progress; call /oauth/authorize first".into())
        })?;

        let mut body = json!({
            "grant_type": "authorization_code",
            "code": code,
            "client_id": client_id,
            "redirect_uri": REDIRECT_URI,
            "code_verifier": verifier,
        });
        if let Some(s) = state_part {
            body["state"] = json!(s);
        }

        let tokens = self.grant(body).await?;
        persist_tokens(&self.token_path, &tokens);
        state.tokens = Some(tokens);
        Ok(())
    }

    /// Force a refresh now. Returns the new expiry.
    pub async fn refresh(&self) -> Result<DateTime<Utc>, GatewayError> {
        let client_id = self.require_client_id()?.to_string();
        let mut state = self.state.lock().await;

        let refresh_token = state
            .tokens
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
            .ok_or_else(|| {
                GatewayError::BadRequest("no refresh token on record; authorize first".into())
            })?;

        let tokens = self
            .grant(json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
                "client_id": client_id,
            }))
            .await?;
        let expires_at = tokens.expires_at;
        persist_tokens(&self.token_path, &tokens);
        state.tokens = Some(tokens);
        Ok(expires_at)
    }

    /// Session status for `GET /oauth/status`.
    pub async fn status(&self) -> Value {
        let state = self.state.lock().await;
        match &state.tokens {
            Some(tokens) => json!({
                "enabled": self.enabled(),
                "authenticated": true,
                "expires_at": tokens.expires_at.to_rfc3339(),
                "fresh": tokens.is_fresh(Utc::now()),
            }),
            None => json!({ "enabled": self.enabled(), "authenticated": false }),
        }
    }

    /// Drop the session and delete the persisted tokens.
    pub async fn logout(&self) -> Result<(), GatewayError> {
        self.state.lock().await.tokens = None;
        if self.token_path.exists() {
            std::fs::remove_file(&self.token_path)
                .with_context(|| format!("removing {}", self.token_path.display()))
                .map_err(GatewayError::Internal)?;
        }
        Ok(())
    }

    fn require_client_id(&self) -> Result<&str, GatewayError> {
        self.client_id.as_deref().ok_or_else(|| {
            GatewayError::BadRequest(
                "OAuth is not configured; set providers_auth.anthropic.oauth.client_id".into(),
            )
        })
    }

    async fn grant(&self, body: Value) -> Result<StoredTokens, GatewayError> {
        let response = self
            .http
            .post(&self.token_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(GatewayError::AuthFailed(format!(
                "token endpoint returned HTTP {status}: {text}"
            )));
        }

        let parsed: Value = serde_json::from_str(&text).map_err(|e| {
            GatewayError::AuthFailed(format!("token endpoint returned invalid JSON: {e}"))
        })?;

        let access_token = parsed["access_token"]
            .as_str()
            .ok_or_else(|| GatewayError::AuthFailed("token response missing access_token".into()))?
            .to_string();
        let expires_in = parsed["expires_in"].as_i64().unwrap_or(3_600);

        Ok(StoredTokens {
            access_token,
            refresh_token: parsed["refresh_token"].as_str().map(String::from),
            expires_at: Utc::now() + ChronoDuration::seconds(expires_in),
        })
    }
}

fn default_token_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("inferswitch")
        .join("oauth.json")
}

fn load_tokens(path: &PathBuf) -> Option<StoredTokens> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn persist_tokens(path: &PathBuf, tokens: &StoredTokens) {
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(tokens).unwrap_or_default();
        std::fs::write(path, body)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    };
    if let Err(e) = write() {
        tracing::warn!(path = %path.display(), error = %e, "failed to persist OAuth tokens");
    }
}

/// Minimal percent-encoding for URL query components.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => {
                use std::fmt::Write as _;
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn temp_token_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("inferswitch-oauth-test-{tag}-{}.json", Uuid::new_v4()))
    }

    fn manager(server: &MockServer, tag: &str) -> OAuthManager {
        OAuthManager::with_endpoints(
            Some("client-123".into()),
            temp_token_path(tag),
            format!("{}/authorize", server.uri()),
            format!("{}/token", server.uri()),
        )
    }

    fn token_response(access: &str, expires_in: i64) -> Value {
        json!({
            "access_token": access,
            "refresh_token": "rt-1",
            "expires_in": expires_in,
        })
    }

    // -----------------------------------------------------------------------
    // Enablement & authorize URL
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn disabled_without_client_id() {
        let m = OAuthManager::with_endpoints(
            None,
            temp_token_path("disabled"),
            "http://x/a".into(),
            "http://x/t".into(),
        );
        assert!(!m.enabled());
        assert!(m.bearer().await.is_none());
        assert!(matches!(
            m.authorize_url().await,
            Err(GatewayError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn authorize_url_carries_pkce_challenge() {
        let server = MockServer::start().await;
        let m = manager(&server, "authorize");
        let url = m.authorize_url().await.unwrap();

        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("code_challenge="));
        assert!(url.contains("response_type=code"));
    }

    // -----------------------------------------------------------------------
    // Code exchange
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn callback_exchanges_code_and_stores_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_partial_json(json!({
                "grant_type": "authorization_code",
                "client_id": "client-123",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_response("at-1", 3600)))
            .mount(&server)
            .await;

        let m = manager(&server, "callback");
        m.authorize_url().await.unwrap();
        m.handle_callback("the-code").await.unwrap();

        assert_eq!(m.bearer().await.as_deref(), Some("at-1"));
        let status = m.status().await;
        assert_eq!(status["authenticated"], true);
    }

    #[tokio::test]
    async fn callback_without_authorize_round_is_rejected() {
        let server = MockServer::start().await;
        let m = manager(&server, "no-round");
        assert!(matches!(
            m.handle_callback("code").await,
            Err(GatewayError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn callback_splits_code_hash_state_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_partial_json(json!({ "code": "abc", "state": "xyz" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_response("at-2", 3600)))
            .mount(&server)
            .await;

        let m = manager(&server, "hash-state");
        m.authorize_url().await.unwrap();
        m.handle_callback("abc#xyz").await.unwrap();
        assert_eq!(m.bearer().await.as_deref(), Some("at-2"));
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn stale_token_is_refreshed_on_bearer() {
        let server = MockServer::start().await;
        // Exchange returns an already-stale token, then refresh returns a new one.
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_partial_json(json!({ "grant_type": "authorization_code" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_response("stale", 10)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_partial_json(json!({
                "grant_type": "refresh_token",
                "refresh_token": "rt-1",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_response("fresh", 3600)))
            .mount(&server)
            .await;

        let m = manager(&server, "refresh");
        m.authorize_url().await.unwrap();
        m.handle_callback("code").await.unwrap();

        // 10s expiry is inside the 60s margin, so bearer() must refresh.
        assert_eq!(m.bearer().await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn explicit_refresh_requires_a_session() {
        let server = MockServer::start().await;
        let m = manager(&server, "refresh-none");
        assert!(matches!(m.refresh().await, Err(GatewayError::BadRequest(_))));
    }

    // -----------------------------------------------------------------------
    // Persistence & logout
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn tokens_persist_across_manager_instances() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_response("at-p", 3600)))
            .mount(&server)
            .await;

        let token_path = temp_token_path("persist");
        let m = OAuthManager::with_endpoints(
            Some("client-123".into()),
            token_path.clone(),
            format!("{}/authorize", server.uri()),
            format!("{}/token", server.uri()),
        );
        m.authorize_url().await.unwrap();
        m.handle_callback("code").await.unwrap();

        let reloaded = OAuthManager::with_endpoints(
            Some("client-123".into()),
            token_path.clone(),
            format!("{}/authorize", server.uri()),
            format!("{}/token", server.uri()),
        );
        assert_eq!(reloaded.bearer().await.as_deref(), Some("at-p"));

        reloaded.logout().await.unwrap();
        assert!(!token_path.exists());
        assert!(reloaded.bearer().await.is_none());
    }

    #[test]
    fn urlencode_escapes_reserved_characters() {
        assert_eq!(urlencode("a b:c/d"), "a%20b%3Ac%2Fd");
        assert_eq!(urlencode("safe-chars_.~"), "safe-chars_.~");
    }
}
