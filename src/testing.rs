//! Scripted stand-ins for the network, the browser prompt and the redirect
//! listener.

use crate::auth::AuthorizationPrompt;
use crate::callback::{AuthorizationCallback, CallbackAcceptor};
use crate::error::{SyncError, TransportError};
use crate::http::{HttpResponse, HttpTransport};
use futures_util::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn ok(body: &str) -> Result<HttpResponse, TransportError> {
    status(200, body)
}

pub fn status(code: u16, body: &str) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse {
        status: code,
        retry_after: None,
        body: body.to_string(),
    })
}

pub fn rate_limited(seconds: Option<u64>) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse {
        status: 429,
        retry_after: seconds.map(Duration::from_secs),
        body: String::new(),
    })
}

pub fn network_down() -> Result<HttpResponse, TransportError> {
    Err(TransportError("connection refused".into()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub bearer: Option<String>,
    pub form: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Responses are queued per URL (query string ignored). The last queued
/// response for a URL repeats once the queue drains.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Result<HttpResponse, TransportError>>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: Result<HttpResponse, TransportError>) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| strip_query(&r.url) == url)
            .collect()
    }

    fn next(&self, request: RecordedRequest) -> Result<HttpResponse, TransportError> {
        let key = strip_query(&request.url).to_string();
        self.requests.lock().unwrap().push(request);
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if queue.len() == 1 => queue[0].clone(),
            _ => status(404, ""),
        }
    }
}

fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

impl HttpTransport for ScriptedTransport {
    fn get<'a>(
        &'a self,
        url: &'a str,
        bearer: Option<&'a str>,
    ) -> BoxFuture<'a, Result<HttpResponse, TransportError>> {
        let response = self.next(RecordedRequest {
            method: "GET",
            url: url.to_string(),
            bearer: bearer.map(str::to_string),
            form: Vec::new(),
        });
        Box::pin(async move { response })
    }

    fn post_form<'a>(
        &'a self,
        url: &'a str,
        form: &'a [(&'a str, &'a str)],
    ) -> BoxFuture<'a, Result<HttpResponse, TransportError>> {
        let response = self.next(RecordedRequest {
            method: "POST",
            url: url.to_string(),
            bearer: None,
            form: form
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        Box::pin(async move { response })
    }
}

#[derive(Default)]
pub struct RecordingPrompt {
    urls: Mutex<Vec<String>>,
}

impl RecordingPrompt {
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    fn last_state(&self) -> Option<String> {
        let urls = self.urls.lock().unwrap();
        let url = urls.last()?;
        let query = url.split_once('?')?.1;
        AuthorizationCallback::from_query(query).state
    }
}

impl AuthorizationPrompt for RecordingPrompt {
    fn present(&self, url: &str) {
        self.urls.lock().unwrap().push(url.to_string());
    }
}

pub enum AcceptorScript {
    /// Redirect with this code and the state from the last presented URL.
    Code(String),
    Denied(String),
    WrongState,
    Timeout,
    /// The redirect port is already taken.
    BindFailure,
}

/// Plays the browser side of the redirect.
pub struct ScriptedAcceptor {
    prompt: std::sync::Arc<RecordingPrompt>,
    script: Mutex<VecDeque<AcceptorScript>>,
    attempts: AtomicUsize,
}

impl ScriptedAcceptor {
    pub fn new(prompt: std::sync::Arc<RecordingPrompt>, script: Vec<AcceptorScript>) -> Self {
        Self {
            prompt,
            script: Mutex::new(script.into()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl CallbackAcceptor for ScriptedAcceptor {
    fn accept<'a>(
        &'a self,
        on_listening: Box<dyn FnOnce() + Send>,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<AuthorizationCallback, SyncError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        if let Some(AcceptorScript::BindFailure) = step {
            let source = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
            return Box::pin(async move {
                Err(SyncError::CallbackBind {
                    addr: "127.0.0.1:5000".into(),
                    source,
                })
            });
        }
        on_listening();
        let state = self.prompt.last_state();
        let result = match step {
            Some(AcceptorScript::Code(code)) => Ok(AuthorizationCallback {
                code: Some(code),
                state,
                error: None,
            }),
            Some(AcceptorScript::Denied(error)) => Ok(AuthorizationCallback {
                code: None,
                state,
                error: Some(error),
            }),
            Some(AcceptorScript::WrongState) => Ok(AuthorizationCallback {
                code: Some("code".into()),
                state: Some("forged".into()),
                error: None,
            }),
            Some(AcceptorScript::Timeout) | Some(AcceptorScript::BindFailure) | None => {
                Err(SyncError::AuthTimeout)
            }
        };
        Box::pin(async move { result })
    }
}
