use crate::auth::AuthConfig;
use crate::poller::PollerConfig;
use crate::scroll::ScrollLayout;
use anyhow::{anyhow, Context, Result};
use dotenv::dotenv;
use log::warn;
use std::path::PathBuf;
use std::time::Duration;

const ENV_PREFIX: &str = "LYRISYNC_";

pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);

const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:5000/callback";
const DEFAULT_SCOPES: &str = "user-read-playback-state user-read-currently-playing";

#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub poll_interval: Duration,
    pub transient_delay: Duration,
    pub auth_timeout: Duration,
    /// First wait after a failed sign-in before the next attempt.
    pub sign_in_retry: Duration,
    pub http_timeout: Duration,
    pub credentials_path: PathBuf,
    pub api_base: String,
    pub accounts_base: String,
    pub lrclib_base: String,
    pub user_agent: String,
    pub layout: ScrollLayout,
}

impl Config {
    /// Reads `.env` (if any) and then the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `LYRISYNC_*` values supplied by `lookup`.
    /// Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let number = |name: &str, default: u64| -> Result<u64> {
            match get(name) {
                Some(value) => value.parse::<u64>().with_context(|| {
                    format!(
                        "{}{} must be a whole number, got {:?}",
                        ENV_PREFIX, name, value
                    )
                }),
                None => Ok(default),
            }
        };
        let length = |name: &str, default: f64| -> Result<f64> {
            match get(name) {
                Some(value) => {
                    let parsed = value.parse::<f64>().with_context(|| {
                        format!("{}{} must be a number, got {:?}", ENV_PREFIX, name, value)
                    })?;
                    if parsed.is_finite() && parsed > 0.0 {
                        Ok(parsed)
                    } else {
                        Err(anyhow!("{}{} must be positive, got {}", ENV_PREFIX, name, parsed))
                    }
                }
                None => Ok(default),
            }
        };

        let client_id = get("CLIENT_ID").ok_or_else(|| {
            anyhow!(
                "{}CLIENT_ID environment variable is required. Please check your .env file.",
                ENV_PREFIX
            )
        })?;

        let requested = Duration::from_millis(number("POLL_INTERVAL_MS", 250)?);
        let poll_interval = requested.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        if poll_interval != requested {
            warn!(
                "Poll interval {:?} out of range, using {:?}",
                requested, poll_interval
            );
        }

        let scopes: Vec<String> = get("SCOPES")
            .unwrap_or_else(|| DEFAULT_SCOPES.to_string())
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let defaults = ScrollLayout::default();

        Ok(Self {
            client_id,
            redirect_uri: get("REDIRECT_URI").unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
            scopes,
            poll_interval,
            transient_delay: Duration::from_millis(number("TRANSIENT_DELAY_MS", 1500)?),
            auth_timeout: Duration::from_secs(number("AUTH_TIMEOUT_SECS", 180)?),
            sign_in_retry: Duration::from_secs(number("SIGN_IN_RETRY_SECS", 60)?),
            http_timeout: Duration::from_secs(number("HTTP_TIMEOUT_SECS", 10)?),
            credentials_path: get("CREDENTIALS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("lyrisync_credentials.json")),
            api_base: base_url(get("API_BASE"), "https://api.spotify.com"),
            accounts_base: base_url(get("ACCOUNTS_BASE"), "https://accounts.spotify.com"),
            lrclib_base: base_url(get("LRCLIB_BASE"), "https://lrclib.net"),
            user_agent: get("USER_AGENT")
                .unwrap_or_else(|| format!("Lyrisync/{}", env!("CARGO_PKG_VERSION"))),
            layout: ScrollLayout {
                line_height: length("LINE_HEIGHT", defaults.line_height)?,
                viewport_height: length("VIEWPORT_HEIGHT", defaults.viewport_height)?,
            },
        })
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            client_id: self.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scopes: self.scopes.clone(),
            authorize_url: format!("{}/authorize", self.accounts_base),
            token_url: format!("{}/api/token", self.accounts_base),
            validate_url: format!("{}/v1/me", self.api_base),
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
            transient_delay: self.transient_delay,
            sign_in_retry: self.sign_in_retry,
            layout: self.layout,
            ..PollerConfig::default()
        }
    }
}

fn base_url(value: Option<String>, default: &str) -> String {
    value
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("LYRISYNC_{}", k), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_with_only_client_id() {
        let config = config(&[("CLIENT_ID", "abc")]).unwrap();
        assert_eq!(config.client_id, "abc");
        assert_eq!(config.redirect_uri, "http://127.0.0.1:5000/callback");
        assert_eq!(
            config.scopes,
            vec!["user-read-playback-state", "user-read-currently-playing"]
        );
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.transient_delay, Duration::from_millis(1500));
        assert_eq!(config.auth_timeout, Duration::from_secs(180));
        assert_eq!(config.sign_in_retry, Duration::from_secs(60));
        assert_eq!(config.credentials_path, PathBuf::from("lyrisync_credentials.json"));
        assert_eq!(config.layout, ScrollLayout::default());
        assert!(config.user_agent.starts_with("Lyrisync/"));
    }

    #[test]
    fn client_id_is_required() {
        let err = config(&[]).unwrap_err();
        assert!(err.to_string().contains("LYRISYNC_CLIENT_ID"));
        assert!(config(&[("CLIENT_ID", "   ")]).is_err());
    }

    #[test]
    fn poll_interval_is_clamped() {
        let fast = config(&[("CLIENT_ID", "a"), ("POLL_INTERVAL_MS", "10")]).unwrap();
        assert_eq!(fast.poll_interval, MIN_POLL_INTERVAL);
        let slow = config(&[("CLIENT_ID", "a"), ("POLL_INTERVAL_MS", "60000")]).unwrap();
        assert_eq!(slow.poll_interval, MAX_POLL_INTERVAL);
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert!(config(&[("CLIENT_ID", "a"), ("POLL_INTERVAL_MS", "fast")]).is_err());
        assert!(config(&[("CLIENT_ID", "a"), ("LINE_HEIGHT", "-4")]).is_err());
    }

    #[test]
    fn derives_endpoint_urls() {
        let config = config(&[
            ("CLIENT_ID", "a"),
            ("ACCOUNTS_BASE", "https://accounts.test/"),
            ("API_BASE", "https://api.test"),
            ("SCOPES", "one,two three"),
            ("SIGN_IN_RETRY_SECS", "30"),
        ])
        .unwrap();
        let auth = config.auth_config();
        assert_eq!(auth.authorize_url, "https://accounts.test/authorize");
        assert_eq!(auth.token_url, "https://accounts.test/api/token");
        assert_eq!(auth.validate_url, "https://api.test/v1/me");
        assert_eq!(auth.scopes, vec!["one", "two", "three"]);

        let poller = config.poller_config();
        assert_eq!(poller.interval, Duration::from_millis(250));
        assert_eq!(poller.min_rate_limit_delay, Duration::from_secs(1));
        assert_eq!(poller.sign_in_retry, Duration::from_secs(30));
        assert_eq!(poller.max_sign_in_retry, Duration::from_secs(15 * 60));
    }
}
