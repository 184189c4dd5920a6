//! OAuth 2.0 authorization-server client.

use std::future::Future;
use std::pin::Pin;

use chrono::{Duration, Utc};
use recsync_protocol::Credential;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CredentialError;
use crate::{DEFAULT_CONSENT_TIMEOUT_SECS, DEFAULT_GRACE_SECS};

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// The authorization server as seen by the credential store.
///
/// Implemented over HTTP by [`OAuthClient`] and by fakes in tests.
pub trait TokenEndpoint: Send + Sync {
    /// Builds the browser URL for the consent screen.
    fn authorization_url(&self, state: &str, code_challenge: &str, redirect_uri: &str) -> String;

    /// Exchanges an authorization code (plus PKCE verifier) for a credential.
    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        code_verifier: &'a str,
        redirect_uri: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Credential, CredentialError>> + Send + 'a>>;

    /// Trades a refresh token for a new access token.
    ///
    /// The returned credential may carry no refresh token; callers keep the
    /// old one in that case.
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Credential, CredentialError>> + Send + 'a>>;
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// OAuth client registration and consent-flow tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Loopback port for the consent callback. 0 picks a free port.
    #[serde(default)]
    pub redirect_port: u16,
    #[serde(default = "default_consent_timeout_secs")]
    pub consent_timeout_secs: u64,
    #[serde(default = "default_grace_secs")]
    pub grace_secs: i64,
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".into()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".into()
}

fn default_scopes() -> Vec<String> {
    vec!["https://www.googleapis.com/auth/drive.file".into()]
}

fn default_consent_timeout_secs() -> u64 {
    DEFAULT_CONSENT_TIMEOUT_SECS
}

fn default_grace_secs() -> i64 {
    DEFAULT_GRACE_SECS
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            scopes: default_scopes(),
            redirect_port: 0,
            consent_timeout_secs: default_consent_timeout_secs(),
            grace_secs: default_grace_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Form-post token endpoint client.
pub struct OAuthClient {
    settings: OAuthSettings,
    http: reqwest::Client,
}

impl OAuthClient {
    /// Creates a client. Fails with `LibraryUnavailable` when no client id
    /// is configured, since no flow can succeed without one.
    pub fn new(settings: OAuthSettings) -> Result<Self, CredentialError> {
        if settings.client_id.trim().is_empty() {
            return Err(CredentialError::LibraryUnavailable(
                "no OAuth client id configured".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| CredentialError::LibraryUnavailable(e.to_string()))?;
        Ok(Self { settings, http })
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    async fn post_form(
        &self,
        params: &[(&str, &str)],
        rejected: fn(String) -> CredentialError,
    ) -> Result<Credential, CredentialError> {
        let resp = self
            .http
            .post(&self.settings.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| CredentialError::Unreachable(e.to_string()))?;

        let status = resp.status();
        let body: TokenResponse = resp.json().await.map_err(|e| {
            if status.is_server_error() {
                CredentialError::Unreachable(format!("token endpoint returned {status}"))
            } else {
                rejected(format!("unreadable token response ({status}): {e}"))
            }
        })?;

        if let Some(error) = body.error {
            let detail = match body.error_description {
                Some(desc) => format!("{error}: {desc}"),
                None => error,
            };
            return Err(if status.is_server_error() {
                CredentialError::Unreachable(detail)
            } else {
                rejected(detail)
            });
        }
        if status.is_server_error() {
            return Err(CredentialError::Unreachable(format!(
                "token endpoint returned {status}"
            )));
        }

        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| rejected("token response carried no access_token".into()))?;
        let expires_in = body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let scopes = match body.scope {
            Some(s) => s.split_whitespace().map(String::from).collect(),
            None => self.settings.scopes.clone(),
        };

        Ok(Credential {
            access_token,
            expires_at: Utc::now() + Duration::seconds(expires_in),
            refresh_token: body.refresh_token,
            scopes,
        })
    }
}

impl TokenEndpoint for OAuthClient {
    fn authorization_url(&self, state: &str, code_challenge: &str, redirect_uri: &str) -> String {
        let scopes = self.settings.scopes.join(" ");
        let mut url = match url::Url::parse(&self.settings.auth_url) {
            Ok(url) => url,
            // An unparsable base still yields a usable string for the user.
            Err(_) => return self.settings.auth_url.clone(),
        };
        url.query_pairs_mut()
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &scopes)
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent");
        url.into()
    }

    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        code_verifier: &'a str,
        redirect_uri: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Credential, CredentialError>> + Send + 'a>> {
        Box::pin(async move {
            debug!("exchanging authorization code");
            let params = [
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("code", code),
                ("code_verifier", code_verifier),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
            ];
            self.post_form(&params, CredentialError::ConsentDenied).await
        })
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Credential, CredentialError>> + Send + 'a>> {
        Box::pin(async move {
            debug!("refreshing access token");
            let params = [
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ];
            self.post_form(&params, CredentialError::RefreshFailed).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(server: &mockito::ServerGuard) -> OAuthSettings {
        OAuthSettings {
            client_id: "client-123".into(),
            client_secret: "shh".into(),
            token_url: format!("{}/token", server.url()),
            ..OAuthSettings::default()
        }
    }

    #[test]
    fn missing_client_id_is_library_unavailable() {
        let err = OAuthClient::new(OAuthSettings::default()).err().unwrap();
        assert!(matches!(err, CredentialError::LibraryUnavailable(_)));
    }

    #[test]
    fn authorization_url_carries_pkce_and_state() {
        let client = OAuthClient::new(OAuthSettings {
            client_id: "client-123".into(),
            ..OAuthSettings::default()
        })
        .unwrap();
        let url = client.authorization_url("st4te", "chall", "http://127.0.0.1:9999/callback");
        let parsed = url::Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["state"], "st4te");
        assert_eq!(pairs["code_challenge"], "chall");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:9999/callback");
        assert_eq!(pairs["client_id"], "client-123");
    }

    #[tokio::test]
    async fn refresh_parses_token_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::UrlEncoded(
                "grant_type".into(),
                "refresh_token".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"fresh","expires_in":3599,"scope":"a b"}"#)
            .create_async()
            .await;

        let client = OAuthClient::new(settings(&server)).unwrap();
        let cred = client.refresh("refresh-1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(cred.access_token, "fresh");
        assert!(cred.refresh_token.is_none());
        assert_eq!(cred.scopes, vec!["a".to_string(), "b".to_string()]);
        assert!(cred.expires_at > Utc::now() + Duration::seconds(3500));
    }

    #[tokio::test]
    async fn invalid_grant_is_refresh_failed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant","error_description":"Token has been revoked"}"#)
            .create_async()
            .await;

        let client = OAuthClient::new(settings(&server)).unwrap();
        let err = client.refresh("revoked").await.unwrap_err();
        assert_eq!(
            err,
            CredentialError::RefreshFailed("invalid_grant: Token has been revoked".into())
        );
    }

    #[tokio::test]
    async fn server_error_is_unreachable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(503)
            .with_body("down")
            .create_async()
            .await;

        let client = OAuthClient::new(settings(&server)).unwrap();
        let err = client.refresh("r").await.unwrap_err();
        assert!(matches!(err, CredentialError::Unreachable(_)));
    }

    #[tokio::test]
    async fn exchange_code_sends_verifier() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("code".into(), "the-code".into()),
                mockito::Matcher::UrlEncoded("code_verifier".into(), "the-verifier".into()),
                mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"a1","refresh_token":"r1","expires_in":60}"#)
            .create_async()
            .await;

        let client = OAuthClient::new(settings(&server)).unwrap();
        let cred = client
            .exchange_code("the-code", "the-verifier", "http://127.0.0.1:1/callback")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(cred.refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn rejected_code_is_consent_denied() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let client = OAuthClient::new(settings(&server)).unwrap();
        let err = client
            .exchange_code("stale", "v", "http://127.0.0.1:1/callback")
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::ConsentDenied(_)));
    }
}
