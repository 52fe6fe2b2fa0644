//! HTTP transport seam.
//!
//! `Transport` performs one request and reports the status and body as-is;
//! only network-level failures are errors. Everything above it (credential
//! handling, status mapping) lives in `HttpClient` and the endpoint clients.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::config::AppConfig;
use common::Error;
use reqwest::cookie::Jar;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// A request as seen by the transport.
///
/// The URL never contains a query string; query pairs are kept separately.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Attach the session's bearer credential and renew it on 401.
    pub bearer: bool,
    /// Send the renewal cookie with this request.
    pub with_credentials: bool,
    /// Set once the request has been re-issued after a renewal.
    pub is_retry: bool,
    /// Stable across the retry.
    pub request_id: String,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            bearer: true,
            with_credentials: false,
            is_retry: false,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Authenticate with a static key header instead of the session credential.
    pub fn api_key(mut self, header: &str, key: &str) -> Self {
        self.bearer = false;
        self.header(header, key)
    }

    /// No bearer credential; send the renewal cookie.
    pub fn credentialed(mut self) -> Self {
        self.bearer = false;
        self.with_credentials = true;
        self
    }

    /// First value of a header, case-insensitive.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace (or add) a header.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }
}

/// Status and raw body of a completed request.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_str(&self.body).map_err(Error::from)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one request. HTTP error statuses are `Ok`.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, Error>;
}

pub(crate) fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

pub(crate) fn summarize_response_body(raw: &str) -> String {
    const MAX_CHARS: usize = 800;
    let compact = raw.replace(['\n', '\r'], " ");
    match compact.char_indices().nth(MAX_CHARS) {
        Some((cut, _)) => format!("{}…", &compact[..cut]),
        None => compact,
    }
}

fn format_reqwest_error(err: &reqwest::Error) -> String {
    // Keep chained causes so network failures (DNS/TLS/socket) are visible.
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !cause_msg.is_empty() && !message.contains(&cause_msg) {
            message.push_str(": ");
            message.push_str(&cause_msg);
        }
        source = cause.source();
    }

    message
}

/// `reqwest` transport with two pools: a plain one and a cookie-carrying
/// one used only for credentialed requests.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    credentialed: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &AppConfig) -> Result<Self, Error> {
        let timeout = Duration::from_secs(config.http.timeout_secs);

        let jar = Arc::new(Jar::default());
        let cookie = config.refresh_cookie.trim();
        if !cookie.is_empty() {
            let api_url = normalize_base_url(&config.api_base_url)
                .parse::<reqwest::Url>()
                .map_err(|e| Error::Config(format!("invalid api_base_url: {e}")))?;
            jar.add_cookie_str(cookie, &api_url);
        } else {
            warn!("No refresh_cookie configured; credential renewal will likely be rejected");
        }

        let client = reqwest::Client::builder()
            .user_agent("field-sync/0.1")
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format_reqwest_error(&e)))?;

        let credentialed = reqwest::Client::builder()
            .user_agent("field-sync/0.1")
            .cookie_provider(jar)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format_reqwest_error(&e)))?;

        Ok(Self {
            client,
            credentialed,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, Error> {
        let client = if request.with_credentials {
            &self.credentialed
        } else {
            &self.client
        };

        let mut req = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url),
        };
        if !request.query.is_empty() {
            req = req.query(&request.query);
        }
        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        req = req.header("X-Request-Id", request.request_id.as_str());
        if let Some(body) = &request.body {
            req = req.json(body);
        }

        debug!(
            "{} {} (request_id={}, retry={})",
            request.method.as_str(),
            request.url,
            request.request_id,
            request.is_retry
        );

        let resp = req
            .send()
            .await
            .map_err(|e| Error::Http(format_reqwest_error(&e)))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Http(format_reqwest_error(&e)))?;

        Ok(ApiResponse { status, body })
    }
}
