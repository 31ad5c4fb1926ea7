//! OAuth token lifecycle: load, validate, refresh, and interactive PKCE sign-in.

use crate::callback::CallbackAcceptor;
use crate::credentials::CredentialStore;
use crate::error::SyncError;
use crate::http::{with_query, HttpResponse, HttpTransport};
use crate::pkce::PkcePair;
use crate::types::{Credential, CredentialStatus, SyncEvent};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// Refresh a little before the provider says the token dies.
const EXPIRY_SKEW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub authorize_url: String,
    pub token_url: String,
    /// Cheap authorized endpoint used to check an unverified token.
    pub validate_url: String,
}

/// Shows the sign-in URL to the user (browser, notification, log line).
pub trait AuthorizationPrompt: Send + Sync {
    fn present(&self, url: &str);
}

/// Logs the sign-in URL and hands it to the display as an event.
pub struct EventPrompt {
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl EventPrompt {
    pub fn new(events: mpsc::UnboundedSender<SyncEvent>) -> Self {
        Self { events }
    }
}

impl AuthorizationPrompt for EventPrompt {
    fn present(&self, url: &str) {
        info!("Open this URL to sign in: {}", url);
        let event = SyncEvent::AuthorizationRequired {
            url: url.to_string(),
        };
        if self.events.send(event).is_err() {
            warn!("No display attached to show the sign-in URL");
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OAuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

fn oauth_error(body: &str) -> String {
    let parsed: OAuthErrorBody = serde_json::from_str(body).unwrap_or_default();
    match (parsed.error, parsed.error_description) {
        (Some(error), Some(description)) => format!("{}: {}", error, description),
        (Some(error), None) => error,
        (None, _) if !body.trim().is_empty() => body.trim().to_string(),
        _ => "no details".to_string(),
    }
}

fn parse_token_response(response: &HttpResponse) -> Result<TokenResponse, SyncError> {
    serde_json::from_str(&response.body)
        .map_err(|e| SyncError::TransientNetwork(format!("malformed token response: {}", e)))
}

pub struct TokenManager {
    config: AuthConfig,
    transport: Arc<dyn HttpTransport>,
    store: Box<dyn CredentialStore>,
    acceptor: Arc<dyn CallbackAcceptor>,
    prompt: Arc<dyn AuthorizationPrompt>,
    state: AuthState,
    credential: Option<Credential>,
    expires_at: Option<Instant>,
    verified: bool,
}

impl TokenManager {
    pub fn new(
        config: AuthConfig,
        transport: Arc<dyn HttpTransport>,
        store: Box<dyn CredentialStore>,
        acceptor: Arc<dyn CallbackAcceptor>,
        prompt: Arc<dyn AuthorizationPrompt>,
    ) -> Self {
        Self {
            config,
            transport,
            store,
            acceptor,
            prompt,
            state: AuthState::Unauthenticated,
            credential: None,
            expires_at: None,
            verified: false,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn credential(&self) -> Option<Credential> {
        self.credential.clone()
    }

    /// Picks up tokens saved by a previous run. Both values must be present;
    /// the credential is trusted optimistically until the first
    /// `get_valid_token` validates it.
    pub fn load_persisted(&mut self) -> bool {
        match (self.store.access_token(), self.store.refresh_token()) {
            (Some(access), Some(refresh)) if !access.is_empty() && !refresh.is_empty() => {
                self.credential = Some(Credential {
                    access_token: access,
                    refresh_token: Some(refresh),
                    status: CredentialStatus::Valid,
                });
                self.expires_at = None;
                self.verified = false;
                self.state = AuthState::Authenticated;
                info!("Loaded persisted credentials");
                true
            }
            _ => {
                debug!("No persisted credentials found");
                false
            }
        }
    }

    /// One authorized request against the validation endpoint.
    ///
    /// `Ok(false)` means the provider rejected the token and the manager is
    /// now `Refreshing`. Other failures leave the state untouched.
    pub async fn validate(&mut self) -> Result<bool, SyncError> {
        let token = match &self.credential {
            Some(credential) => credential.access_token.clone(),
            None => return Err(SyncError::AuthRequired),
        };

        let response = self
            .transport
            .get(&self.config.validate_url, Some(&token))
            .await?;
        match response.status {
            _ if response.is_success() => {
                debug!("Access token validated");
                self.verified = true;
                Ok(true)
            }
            401 => {
                info!("Access token rejected, refresh needed");
                self.mark_unauthorized();
                Ok(false)
            }
            429 => Err(SyncError::RateLimited {
                retry_after: response.retry_after,
            }),
            status => Err(SyncError::TransientNetwork(format!(
                "token validation returned HTTP {}",
                status
            ))),
        }
    }

    /// Called when a data request came back 401.
    pub fn mark_unauthorized(&mut self) {
        self.verified = false;
        match self.credential.as_mut() {
            Some(credential) => {
                credential.status = CredentialStatus::Expired;
                self.state = AuthState::Refreshing;
            }
            None => self.state = AuthState::Unauthenticated,
        }
    }

    /// Trades the refresh token for a new access token.
    ///
    /// A rejected grant clears every stored token and returns
    /// `TokenRevoked`; the caller has to run `authenticate`. Network and
    /// server errors are returned as retryable and keep the credential.
    pub async fn refresh(&mut self) -> Result<String, SyncError> {
        let refresh_token = match self.credential.as_ref().and_then(|c| c.refresh_token.clone()) {
            Some(token) => token,
            None => {
                warn!("No refresh token available; sign-in required");
                self.clear_credentials();
                return Err(SyncError::AuthRequired);
            }
        };

        self.state = AuthState::Refreshing;
        debug!("Refreshing access token");

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        let response = match self.transport.post_form(&self.config.token_url, &form).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                return Err(e.into());
            }
        };

        match response.status {
            _ if response.is_success() => {
                let tokens = parse_token_response(&response)?;
                let access = tokens.access_token.clone();
                self.accept_tokens(tokens);
                info!("Access token refreshed");
                Ok(access)
            }
            400 | 401 => {
                error!(
                    "Refresh grant rejected ({}); clearing stored credentials",
                    oauth_error(&response.body)
                );
                if let Some(credential) = self.credential.as_mut() {
                    credential.status = CredentialStatus::Revoked;
                }
                self.clear_credentials();
                Err(SyncError::TokenRevoked)
            }
            429 => Err(SyncError::RateLimited {
                retry_after: response.retry_after,
            }),
            status => {
                warn!("Token refresh returned HTTP {}", status);
                Err(SyncError::TransientNetwork(format!(
                    "token refresh returned HTTP {}",
                    status
                )))
            }
        }
    }

    /// Interactive authorization-code flow with PKCE.
    ///
    /// Blocks until the redirect arrives, the acceptor times out, or `cancel`
    /// fires.
    pub async fn authenticate(&mut self, cancel: &CancellationToken) -> Result<String, SyncError> {
        let previous = self.state;
        self.state = AuthState::Authenticating;

        let pkce = PkcePair::generate();
        let csrf_state = Uuid::new_v4().to_string();
        let url = self.authorization_url(&pkce.challenge, &csrf_state);

        let prompt = Arc::clone(&self.prompt);
        let on_listening: Box<dyn FnOnce() + Send> = Box::new(move || prompt.present(&url));

        let callback = match self.acceptor.accept(on_listening, cancel).await {
            Ok(callback) => callback,
            Err(SyncError::AuthFlowInProgress) => {
                warn!("Sign-in already in progress; not starting another");
                self.state = previous;
                return Err(SyncError::AuthFlowInProgress);
            }
            Err(e) => return Err(self.fail_sign_in(e)),
        };

        if let Some(error) = callback.error {
            return Err(self.fail_sign_in(SyncError::AuthDenied(error)));
        }
        if callback.state.as_deref() != Some(csrf_state.as_str()) {
            return Err(self.fail_sign_in(SyncError::StateMismatch));
        }
        let code = match callback.code {
            Some(code) if !code.is_empty() => code,
            _ => {
                return Err(self.fail_sign_in(SyncError::AuthDenied(
                    "redirect carried no authorization code".into(),
                )))
            }
        };

        let form = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
        ];
        let response = match self.transport.post_form(&self.config.token_url, &form).await {
            Ok(response) => response,
            Err(e) => return Err(self.fail_sign_in(e.into())),
        };

        match response.status {
            _ if response.is_success() => {
                let tokens = match parse_token_response(&response) {
                    Ok(tokens) => tokens,
                    Err(e) => return Err(self.fail_sign_in(e)),
                };
                let access = tokens.access_token.clone();
                self.accept_tokens(tokens);
                info!("Signed in");
                Ok(access)
            }
            400 | 401 => {
                let reason = oauth_error(&response.body);
                Err(self.fail_sign_in(SyncError::AuthDenied(reason)))
            }
            429 => Err(self.fail_sign_in(SyncError::RateLimited {
                retry_after: response.retry_after,
            })),
            status => Err(self.fail_sign_in(SyncError::TransientNetwork(format!(
                "code exchange returned HTTP {}",
                status
            )))),
        }
    }

    /// A token that is valid right now, or `AuthRequired`.
    ///
    /// Validates a freshly loaded credential once and refreshes an expired
    /// or rejected one. Retryable failures are passed through so the caller
    /// can back off; a stale token is never handed out.
    pub async fn get_valid_token(&mut self) -> Result<String, SyncError> {
        if matches!(
            self.state,
            AuthState::Unauthenticated | AuthState::Authenticating
        ) {
            return Err(SyncError::AuthRequired);
        }
        let Some(credential) = self.credential.as_mut() else {
            self.state = AuthState::Unauthenticated;
            return Err(SyncError::AuthRequired);
        };

        let expiring = self
            .expires_at
            .map(|at| Instant::now() + EXPIRY_SKEW >= at)
            .unwrap_or(false);
        if expiring && credential.status == CredentialStatus::Valid {
            debug!("Access token is about to expire");
            credential.status = CredentialStatus::Expired;
        }

        if credential.status == CredentialStatus::Valid {
            let token = credential.access_token.clone();
            if self.verified || self.validate().await? {
                return Ok(token);
            }
        }

        self.refresh().await.map_err(|e| {
            if e.needs_sign_in() {
                SyncError::AuthRequired
            } else {
                e
            }
        })
    }

    fn authorization_url(&self, challenge: &str, csrf_state: &str) -> String {
        let scope = self.config.scopes.join(" ");
        with_query(
            &self.config.authorize_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("code_challenge_method", "S256"),
                ("code_challenge", challenge),
                ("scope", scope.as_str()),
                ("state", csrf_state),
            ],
        )
    }

    fn accept_tokens(&mut self, tokens: TokenResponse) {
        // Refresh tokens may rotate; keep the old one only if none came back.
        let refresh_token = tokens
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| self.credential.as_ref().and_then(|c| c.refresh_token.clone()));

        self.credential = Some(Credential {
            access_token: tokens.access_token,
            refresh_token,
            status: CredentialStatus::Valid,
        });
        // an expiry too far out to represent is treated as unknown
        self.expires_at = tokens
            .expires_in
            .and_then(|secs| Instant::now().checked_add(Duration::from_secs(secs)));
        self.verified = true;
        self.state = AuthState::Authenticated;
        self.persist();
    }

    fn persist(&mut self) {
        let Some(credential) = &self.credential else {
            return;
        };
        self.store
            .set_access_token(Some(credential.access_token.clone()));
        self.store
            .set_refresh_token(credential.refresh_token.clone());
        if let Err(e) = self.store.save() {
            error!("Failed to save credentials: {}", e);
        }
    }

    fn clear_credentials(&mut self) {
        self.credential = None;
        self.expires_at = None;
        self.verified = false;
        self.state = AuthState::Unauthenticated;
        self.store.set_access_token(None);
        self.store.set_refresh_token(None);
        if let Err(e) = self.store.save() {
            error!("Failed to clear stored credentials: {}", e);
        }
    }

    fn fail_sign_in(&mut self, err: SyncError) -> SyncError {
        warn!("Sign-in failed: {}", err);
        self.state = AuthState::Unauthenticated;
        err
    }
}
