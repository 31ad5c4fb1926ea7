//! Loopback listener that receives the OAuth redirect.

use crate::error::SyncError;
use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

const MAX_REQUEST_HEAD: usize = 8 * 1024;
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

const SUCCESS_PAGE: &str = "<html><body><h1>Login successful!</h1><p>You can close this window.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h1>Login failed</h1><p>Return to the app and try again.</p></body></html>";

/// Query parameters carried by the redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl AuthorizationCallback {
    pub fn from_query(query: &str) -> Self {
        let mut callback = Self::default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = decode_component(value);
            match key {
                "code" => callback.code = Some(value),
                "state" => callback.state = Some(value),
                "error" => callback.error = Some(value),
                _ => {}
            }
        }
        callback
    }
}

fn decode_component(value: &str) -> String {
    let spaced = value.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|v| v.into_owned())
        .unwrap_or(spaced)
}

/// Waits for exactly one authorization redirect.
///
/// `on_listening` runs once the endpoint is ready, which is when the user
/// can be sent to the authorization page.
pub trait CallbackAcceptor: Send + Sync {
    fn accept<'a>(
        &'a self,
        on_listening: Box<dyn FnOnce() + Send>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<AuthorizationCallback, SyncError>>;
}

pub struct LoopbackAcceptor {
    bind_addr: String,
    path: String,
    timeout: Duration,
    in_flight: AtomicBool,
}

impl LoopbackAcceptor {
    pub fn new(bind_addr: impl Into<String>, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            path: path.into(),
            timeout,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Listens where the redirect URI points (`http://127.0.0.1:5000/callback`).
    pub fn for_redirect_uri(redirect_uri: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = reqwest::Url::parse(redirect_uri)?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("redirect URI has no host: {}", redirect_uri))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| anyhow::anyhow!("redirect URI has no port: {}", redirect_uri))?;
        Ok(Self::new(format!("{}:{}", host, port), url.path(), timeout))
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl CallbackAcceptor for LoopbackAcceptor {
    fn accept<'a>(
        &'a self,
        on_listening: Box<dyn FnOnce() + Send>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<AuthorizationCallback, SyncError>> {
        Box::pin(async move {
            let _guard =
                FlowGuard::acquire(&self.in_flight).ok_or(SyncError::AuthFlowInProgress)?;

            let listener = TcpListener::bind(&self.bind_addr)
                .await
                .map_err(|source| SyncError::CallbackBind {
                    addr: self.bind_addr.clone(),
                    source,
                })?;
            info!(
                "Waiting for authorization redirect on {}{}",
                self.bind_addr, self.path
            );
            on_listening();

            // listener is dropped on every return path below
            serve_one(listener, &self.path, self.timeout, cancel).await
        })
    }
}

/// Marks an interactive flow as running for as long as it lives.
pub(crate) struct FlowGuard<'a>(&'a AtomicBool);

impl<'a> FlowGuard<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlowGuard(flag))
    }
}

impl Drop for FlowGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub(crate) async fn serve_one(
    listener: TcpListener,
    path: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<AuthorizationCallback, SyncError> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        let (mut stream, peer) = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = &mut deadline => return Err(SyncError::AuthTimeout),
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept callback connection: {}", e);
                    continue;
                }
            },
        };

        let read = tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_target(&mut stream));
        let target = match read.await {
            Ok(Ok(target)) => target,
            Ok(Err(e)) => {
                warn!("Unreadable callback request from {}: {}", peer, e);
                continue;
            }
            Err(_) => {
                warn!("Callback request from {} timed out", peer);
                continue;
            }
        };

        let (request_path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
        if request_path != path {
            debug!("Ignoring request for {} from {}", request_path, peer);
            respond(&mut stream, "404 Not Found", "<html><body>Not found</body></html>").await;
            continue;
        }

        let callback = AuthorizationCallback::from_query(query);
        let page = if callback.code.is_some() {
            SUCCESS_PAGE
        } else {
            FAILURE_PAGE
        };
        respond(&mut stream, "200 OK", page).await;
        info!("Authorization redirect received from {}", peer);
        return Ok(callback);
    }
}

// Request target from the request line, e.g. "/callback?code=abc".
async fn read_request_target(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") || head.len() >= MAX_REQUEST_HEAD {
            break;
        }
    }

    let text = String::from_utf8_lossy(&head);
    let request_line = text.lines().next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(_method), Some(target)) => Ok(target.to_string()),
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("malformed request line: {:?}", request_line),
        )),
    }
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!("Failed to write callback response: {}", e);
    }
    let _ = stream.shutdown().await;
}
