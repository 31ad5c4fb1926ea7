use crate::error::TransportError;
use futures_util::future::BoxFuture;
use log::debug;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The network capability the core talks through. Non-2xx statuses are
/// returned as responses, not errors.
pub trait HttpTransport: Send + Sync {
    fn get<'a>(
        &'a self,
        url: &'a str,
        bearer: Option<&'a str>,
    ) -> BoxFuture<'a, Result<HttpResponse, TransportError>>;

    fn post_form<'a>(
        &'a self,
        url: &'a str,
        form: &'a [(&'a str, &'a str)],
    ) -> BoxFuture<'a, Result<HttpResponse, TransportError>>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    user_agent: String,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }

    async fn finish(response: reqwest::Response) -> Result<HttpResponse, TransportError> {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(format!("Failed to read body: {}", e)))?;
        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get<'a>(
        &'a self,
        url: &'a str,
        bearer: Option<&'a str>,
    ) -> BoxFuture<'a, Result<HttpResponse, TransportError>> {
        Box::pin(async move {
            debug!("GET {}", url);
            let mut request = self
                .client
                .get(url)
                .header("User-Agent", self.user_agent.as_str());
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| TransportError(format!("Request failed: {}", e)))?;
            Self::finish(response).await
        })
    }

    fn post_form<'a>(
        &'a self,
        url: &'a str,
        form: &'a [(&'a str, &'a str)],
    ) -> BoxFuture<'a, Result<HttpResponse, TransportError>> {
        Box::pin(async move {
            debug!("POST {}", url);
            let response = self
                .client
                .post(url)
                .header("User-Agent", self.user_agent.as_str())
                .form(form)
                .send()
                .await
                .map_err(|e| TransportError(format!("Request failed: {}", e)))?;
            Self::finish(response).await
        })
    }
}

/// `Retry-After` as delay-seconds. HTTP-date values are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// `base?k=v&k=v` with percent-encoded values.
pub fn with_query(base: &str, params: &[(&str, &str)]) -> String {
    let mut url = base.to_string();
    for (i, (key, value)) in params.iter().enumerate() {
        url.push(if i == 0 { '?' } else { '&' });
        url.push_str(key);
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delay_seconds_only() {
        assert_eq!(parse_retry_after("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after(" 10 "), Some(Duration::from_secs(10)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[test]
    fn builds_encoded_query() {
        let url = with_query(
            "https://lrclib.net/api/search",
            &[("artist_name", "AC/DC"), ("track_name", "T.N.T & more")],
        );
        assert_eq!(
            url,
            "https://lrclib.net/api/search?artist_name=AC%2FDC&track_name=T.N.T%20%26%20more"
        );
    }

    #[test]
    fn success_range() {
        let ok = HttpResponse {
            status: 204,
            retry_after: None,
            body: String::new(),
        };
        assert!(ok.is_success());
        assert!(!HttpResponse { status: 401, ..ok }.is_success());
    }
}
