//! Interactive consent flow over a loopback callback listener.
//!
//! 1. Binds `127.0.0.1:<port>` (0 picks a free port)
//! 2. Hands the consent URL to a caller-supplied launcher
//! 3. Waits for `GET /callback?code=..&state=..`
//! 4. Returns the authorization code with its PKCE verifier

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::endpoint::TokenEndpoint;
use crate::error::CredentialError;

const SUCCESS_PAGE: &str = "<html><body><h2>recsync is authorized.</h2>\
<p>You can close this tab.</p><script>window.close()</script></body></html>";

const DENIED_PAGE: &str = "<html><body><h2>Authorization was not completed.</h2>\
<p>You can close this tab and try again.</p></body></html>";

/// Result of a completed consent round-trip, ready for code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
    pub code: String,
    pub code_verifier: String,
    pub redirect_uri: String,
}

/// One-shot loopback consent flow.
#[derive(Debug, Clone)]
pub struct ConsentFlow {
    redirect_port: u16,
    timeout: Duration,
}

impl ConsentFlow {
    pub fn new(redirect_port: u16, timeout: Duration) -> Self {
        Self {
            redirect_port,
            timeout,
        }
    }

    /// Hands the consent URL to `launcher` and waits for the callback.
    pub async fn run_with<F>(
        &self,
        endpoint: &dyn TokenEndpoint,
        launcher: F,
    ) -> Result<AuthorizationGrant, CredentialError>
    where
        F: FnOnce(&str) + Send,
    {
        let listener = TcpListener::bind(("127.0.0.1", self.redirect_port))
            .await
            .map_err(|e| CredentialError::CallbackFailed(format!("bind callback listener: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| CredentialError::CallbackFailed(e.to_string()))?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");

        let pkce = Pkce::generate();
        let state = random_token(16);
        let url = endpoint.authorization_url(&state, &pkce.challenge, &redirect_uri);

        info!(port, "waiting for consent callback");
        launcher(&url);

        let wait = accept_callback(&listener, &state);
        let code = match tokio::time::timeout(self.timeout, wait).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CredentialError::ConsentTimeout {
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        Ok(AuthorizationGrant {
            code,
            code_verifier: pkce.verifier,
            redirect_uri,
        })
    }
}

/// Accepts connections until one hits `/callback`, then answers it.
async fn accept_callback(listener: &TcpListener, expected_state: &str) -> Result<String, CredentialError> {
    loop {
        let (mut stream, peer) = listener
            .accept()
            .await
            .map_err(|e| CredentialError::CallbackFailed(e.to_string()))?;
        debug!(%peer, "callback connection");

        let Some(target) = read_request_target(&mut stream).await else {
            continue;
        };
        let Ok(url) = url::Url::parse(&format!("http://127.0.0.1{target}")) else {
            respond(&mut stream, "400 Bad Request", "").await;
            continue;
        };
        if url.path() != "/callback" {
            // Browsers also ask for /favicon.ico and friends.
            respond(&mut stream, "404 Not Found", "").await;
            continue;
        }

        let outcome = parse_callback(&url, expected_state);
        let page = if outcome.is_ok() { SUCCESS_PAGE } else { DENIED_PAGE };
        respond(&mut stream, "200 OK", page).await;
        return outcome;
    }
}

fn parse_callback(url: &url::Url, expected_state: &str) -> Result<String, CredentialError> {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (k, v) in url.query_pairs() {
        match k.as_ref() {
            "code" => code = Some(v.into_owned()),
            "state" => state = Some(v.into_owned()),
            "error" => error = Some(v.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(CredentialError::ConsentDenied(error));
    }
    if state.as_deref() != Some(expected_state) {
        return Err(CredentialError::ConsentDenied("state mismatch".into()));
    }
    code.filter(|c| !c.is_empty())
        .ok_or_else(|| CredentialError::ConsentDenied("callback carried no code".into()))
}

/// Reads the request head and returns the request target of a GET.
async fn read_request_target(stream: &mut TcpStream) -> Option<String> {
    let mut buf = vec![0u8; 8192];
    let mut len = 0;
    // The request line is all that matters; stop at the end of the head.
    while len < buf.len() {
        let n = stream.read(&mut buf[len..]).await.ok()?;
        if n == 0 {
            break;
        }
        len += n;
        if buf[..len].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let head = String::from_utf8_lossy(&buf[..len]);
    let mut parts = head.lines().next()?.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Some(target.to_string()),
        _ => None,
    }
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        debug!(error = %e, "failed to answer callback request");
    }
    let _ = stream.shutdown().await;
}

// ---------------------------------------------------------------------------
// PKCE
// ---------------------------------------------------------------------------

struct Pkce {
    verifier: String,
    challenge: String,
}

impl Pkce {
    fn generate() -> Self {
        let verifier = random_token(32);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
