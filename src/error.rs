use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong between the playback provider, its token
/// endpoint and the lyrics service.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No usable token; an interactive sign-in has to run.
    #[error("authorization required")]
    AuthRequired,

    #[error("timed out waiting for the authorization redirect")]
    AuthTimeout,

    /// The refresh grant was rejected. Stored credentials have been cleared.
    #[error("refresh token was revoked or is invalid")]
    TokenRevoked,

    #[error("authorization was denied: {0}")]
    AuthDenied(String),

    #[error("an interactive sign-in is already in progress")]
    AuthFlowInProgress,

    #[error("authorization redirect carried an unexpected state value")]
    StateMismatch,

    #[error("failed to bind callback listener on {addr}: {source}")]
    CallbackBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The provider answered 401 to a data request.
    #[error("request was not authorized")]
    Unauthorized,

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("network error: {0}")]
    TransientNetwork(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::RateLimited { .. } | SyncError::TransientNetwork(_)
        )
    }

    /// Conditions that can only be resolved by signing in again.
    pub fn needs_sign_in(&self) -> bool {
        matches!(self, SyncError::AuthRequired | SyncError::TokenRevoked)
    }
}

/// A transport-level failure (connection refused, DNS, body read).
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        SyncError::TransientNetwork(err.0)
    }
}

/// Failure reading or writing the persisted credential store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential store is corrupt: {0}")]
    Format(#[from] serde_json::Error),
}

/// A single LRC line that could not be understood. Recorded and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line_number}: {reason} ({line:?})")]
pub struct LineParseError {
    pub line_number: usize,
    pub line: String,
    pub reason: String,
}
