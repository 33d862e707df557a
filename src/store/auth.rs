//! GoTrue auth client with reactive, file-persisted session state.
//!
//! Sign-in is either an email magic link or an OAuth redirect using PKCE.
//! Both finish in [`AuthClient::complete_callback`], which accepts the URL the
//! browser landed on. Every session change is written to the session file and
//! published on a `watch` channel, which `RestStore` and the realtime client
//! read for their bearer token.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use uuid::Uuid;

use crate::errors::AuthError;

/// Refresh when the access token expires within this many seconds.
const REFRESH_MARGIN_SECS: i64 = 60;

pub const DEFAULT_OAUTH_PROVIDER: &str = "github";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub user: Option<User>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Whether the token is expired (or about to be) at unix time `now`.
    pub fn needs_refresh(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|at| at - REFRESH_MARGIN_SECS <= now)
    }

    fn stamp_expiry(mut self) -> Self {
        if self.expires_at.is_none()
            && let Some(secs) = self.expires_in
        {
            self.expires_at = Some(chrono::Utc::now().timestamp() + secs);
        }
        self
    }
}

/// On-disk state: the session plus a pending PKCE verifier.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default)]
    session: Option<Session>,
    #[serde(default)]
    pkce_verifier: Option<String>,
}

/// Error body shapes GoTrue uses across endpoints.
#[derive(Debug, Deserialize)]
struct GoTrueError {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

/// Create a PKCE verifier and its S256 challenge.
pub fn pkce_pair() -> (String, String) {
    let verifier = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let challenge = pkce_challenge(&verifier);
    (verifier, challenge)
}

pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    session_path: Option<PathBuf>,
    state: watch::Sender<Option<Session>>,
}

impl AuthClient {
    /// Create a client, restoring the session persisted at `session_path`.
    pub fn new(
        base_url: &str,
        anon_key: &str,
        session_path: Option<PathBuf>,
    ) -> Result<Self, AuthError> {
        let restored = match session_path.as_deref() {
            Some(path) => read_session_file(path)?.session,
            None => None,
        };
        let (state, _) = watch::channel(restored);
        let client = reqwest::Client::builder()
            .user_agent(concat!("taskboard/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session_path,
            state,
        })
    }

    /// Receiver notified on every sign-in, refresh and sign-out.
    pub fn watch(&self) -> watch::Receiver<Option<Session>> {
        self.state.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        self.state.borrow().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().as_ref().and_then(|s| s.user.clone())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn set_session(&self, session: Option<Session>) -> Result<(), AuthError> {
        if let Some(path) = self.session_path.as_deref() {
            let mut file = read_session_file(path)?;
            file.session = session.clone();
            write_session_file(path, &file)?;
        }
        self.state.send_replace(session);
        Ok(())
    }

    fn set_verifier(&self, verifier: Option<String>) -> Result<(), AuthError> {
        if let Some(path) = self.session_path.as_deref() {
            let mut file = read_session_file(path)?;
            file.pkce_verifier = verifier;
            write_session_file(path, &file)?;
        }
        Ok(())
    }

    fn take_verifier(&self) -> Result<String, AuthError> {
        let path = self.session_path.as_deref().ok_or(AuthError::MissingVerifier)?;
        let mut file = read_session_file(path)?;
        let verifier = file.pkce_verifier.take().ok_or(AuthError::MissingVerifier)?;
        write_session_file(path, &file)?;
        Ok(verifier)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        body: serde_json::Value,
        bearer: Option<&str>,
    ) -> Result<Option<T>, AuthError> {
        let mut request = self
            .client
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(rejection(status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Email a magic link that signs the user in and redirects to `redirect_to`.
    pub async fn sign_in_with_otp(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), AuthError> {
        let mut url = parse_url(&self.endpoint("otp"))?;
        if let Some(redirect) = redirect_to {
            url.query_pairs_mut().append_pair("redirect_to", redirect);
        }
        tracing::debug!(email, "requesting magic link");
        self.post_json::<serde_json::Value>(
            url,
            serde_json::json!({ "email": email, "create_user": true }),
            None,
        )
        .await?;
        Ok(())
    }

    /// Build the provider authorize URL and remember the PKCE verifier for
    /// the callback.
    pub fn oauth_url(&self, provider: &str, redirect_to: Option<&str>) -> Result<Url, AuthError> {
        let (verifier, challenge) = pkce_pair();
        let mut url = parse_url(&self.endpoint("authorize"))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("provider", provider);
            if let Some(redirect) = redirect_to {
                q.append_pair("redirect_to", redirect);
            }
            q.append_pair("code_challenge", &challenge);
            q.append_pair("code_challenge_method", "s256");
        }
        self.set_verifier(Some(verifier))?;
        Ok(url)
    }

    /// Finish a sign-in from the URL the browser was redirected to.
    ///
    /// Accepts a PKCE `?code=` or implicit-flow `#access_token=...` URL.
    pub async fn complete_callback(&self, callback_url: &str) -> Result<Session, AuthError> {
        let url = parse_url(callback_url)?;
        let fragment: Vec<(String, String)> = url
            .fragment()
            .map(decode_form_pairs)
            .unwrap_or_default();
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let get = |key: &str| {
            query
                .iter()
                .chain(fragment.iter())
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        if let Some(description) = get("error_description").or_else(|| get("error")) {
            return Err(AuthError::Rejected {
                status: 400,
                message: description,
            });
        }
        if let Some(code) = get("code") {
            return self.exchange_code(&code).await;
        }
        match (get("access_token"), get("refresh_token")) {
            (Some(access_token), Some(refresh_token)) => {
                let mut session = Session {
                    access_token,
                    refresh_token,
                    token_type: get("token_type").unwrap_or_else(default_token_type),
                    expires_at: get("expires_at").and_then(|v| v.parse().ok()),
                    expires_in: get("expires_in").and_then(|v| v.parse().ok()),
                    user: None,
                }
                .stamp_expiry();
                session.user = Some(self.fetch_user(&session.access_token).await?);
                self.set_session(Some(session.clone()))?;
                Ok(session)
            }
            _ => Err(AuthError::MissingCallbackCredentials),
        }
    }

    /// Exchange a PKCE auth code for a session.
    pub async fn exchange_code(&self, code: &str) -> Result<Session, AuthError> {
        let verifier = self.take_verifier()?;
        let mut url = parse_url(&self.endpoint("token"))?;
        url.query_pairs_mut().append_pair("grant_type", "pkce");
        let session: Session = self
            .post_json(
                url,
                serde_json::json!({ "auth_code": code, "code_verifier": verifier }),
                None,
            )
            .await?
            .ok_or(AuthError::MissingCallbackCredentials)?;
        let session = session.stamp_expiry();
        self.set_session(Some(session.clone()))?;
        tracing::info!(user = ?session.user.as_ref().and_then(|u| u.email.clone()), "signed in");
        Ok(session)
    }

    pub async fn refresh(&self) -> Result<Session, AuthError> {
        let current = self.session().ok_or(AuthError::NotSignedIn)?;
        let mut url = parse_url(&self.endpoint("token"))?;
        url.query_pairs_mut()
            .append_pair("grant_type", "refresh_token");
        let session: Session = self
            .post_json(
                url,
                serde_json::json!({ "refresh_token": current.refresh_token }),
                None,
            )
            .await?
            .ok_or(AuthError::NotSignedIn)?;
        let session = session.stamp_expiry();
        self.set_session(Some(session.clone()))?;
        Ok(session)
    }

    /// Refresh the session if its token is about to expire.
    pub async fn ensure_fresh(&self) -> Result<Option<Session>, AuthError> {
        match self.session() {
            Some(s) if s.needs_refresh(chrono::Utc::now().timestamp()) => {
                tracing::debug!("access token near expiry, refreshing");
                self.refresh().await.map(Some)
            }
            other => Ok(other),
        }
    }

    async fn fetch_user(&self, access_token: &str) -> Result<User, AuthError> {
        let resp = self
            .client
            .get(self.endpoint("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(rejection(status.as_u16(), &text));
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Look up the signed-in user on the server.
    pub async fn get_user(&self) -> Result<User, AuthError> {
        let session = self.session().ok_or(AuthError::NotSignedIn)?;
        self.fetch_user(&session.access_token).await
    }

    /// Sign out. The local session is cleared even when the server call fails.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(session) = self.session() {
            let url = parse_url(&self.endpoint("logout"))?;
            if let Err(e) = self
                .post_json::<serde_json::Value>(url, serde_json::json!({}), Some(&session.access_token))
                .await
            {
                tracing::warn!(error = %e, "server sign-out failed; clearing local session");
            }
        }
        self.set_session(None)
    }
}

fn parse_url(raw: &str) -> Result<Url, AuthError> {
    Url::parse(raw).map_err(|e| AuthError::InvalidUrl(format!("{}: {}", raw, e)))
}

fn rejection(status: u16, body: &str) -> AuthError {
    let message = serde_json::from_str::<GoTrueError>(body)
        .ok()
        .and_then(|e| e.msg.or(e.error_description).or(e.message).or(e.error))
        .unwrap_or_else(|| {
            if body.is_empty() {
                format!("auth request failed with status {}", status)
            } else {
                body.to_string()
            }
        });
    AuthError::Rejected { status, message }
}

fn read_session_file(path: &Path) -> Result<SessionFile, AuthError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SessionFile::default()),
        Err(source) => Err(AuthError::Persist {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_session_file(path: &Path, file: &SessionFile) -> Result<(), AuthError> {
    let persist_err = |source| AuthError::Persist {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(persist_err)?;
    }
    let content = serde_json::to_string_pretty(file)?;
    std::fs::write(path, content).map_err(persist_err)
}

/// Decode a form-encoded string such as an implicit-flow URL fragment.
fn decode_form_pairs(input: &str) -> Vec<(String, String)> {
    match Url::parse(&format!("http://fragment/?{}", input)) {
        Ok(u) => u
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        Err(_) => Vec::new(),
    }
}
