//! Scripted in-memory transport for tests.
//!
//! Routes are keyed by method and URL path (scheme and host stripped).
//! Every request is recorded, so tests can assert exact call counts and
//! inspect what was sent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::Error;

use crate::transport::{ApiRequest, ApiResponse, Method, Transport};

type Responder = Arc<dyn Fn(&ApiRequest) -> MockReply + Send + Sync>;

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct MockReply {
    result: Result<ApiResponse, Error>,
    delay: Option<Duration>,
}

impl MockReply {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            result: Ok(ApiResponse::new(status, body)),
            delay: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self::json(status, "")
    }

    pub fn network_error(message: &str) -> Self {
        Self {
            result: Err(Error::Http(message.to_string())),
            delay: None,
        }
    }

    /// Hold the reply for `delay` (tokio time, so paused clocks auto-advance).
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Path part of a URL without scheme, host, or query.
pub fn path_of(url: &str) -> &str {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let path = rest.find('/').map(|i| &rest[i..]).unwrap_or("/");
    path.split('?').next().unwrap_or(path)
}

#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), Responder>>,
    calls: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request on the route with `reply` (replaces any previous script).
    pub fn on(&self, method: Method, path: &str, reply: MockReply) {
        self.respond_with(method, path, move |_| reply.clone());
    }

    /// Answer successive requests with `replies`; the last one repeats.
    pub fn on_sequence(&self, method: Method, path: &str, replies: Vec<MockReply>) {
        let replies = Arc::new(replies);
        let next = Arc::new(Mutex::new(0usize));
        self.respond_with(method, path, move |_| {
            let mut idx = next.lock().unwrap_or_else(|p| p.into_inner());
            let reply = replies
                .get(*idx)
                .or_else(|| replies.last())
                .cloned()
                .unwrap_or_else(|| MockReply::status(500));
            *idx += 1;
            reply
        });
    }

    /// Answer based on the request itself.
    pub fn respond_with<F>(&self, method: Method, path: &str, responder: F)
    where
        F: Fn(&ApiRequest) -> MockReply + Send + Sync + 'static,
    {
        self.routes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert((method, path.to_string()), Arc::new(responder));
    }

    /// Requests received on a route, in arrival order.
    pub fn requests(&self, method: Method, path: &str) -> Vec<ApiRequest> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|r| r.method == method && path_of(&r.url) == path)
            .cloned()
            .collect()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests(method, path).len()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, Error> {
        let path = path_of(&request.url).to_string();
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request.clone());

        let responder = self
            .routes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(request.method, path.clone()))
            .cloned();

        let reply = match responder {
            Some(responder) => responder(request),
            None => MockReply::json(404, &format!("no mock route for {} {}", request.method.as_str(), path)),
        };

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        reply.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_of_strips_host_and_query() {
        assert_eq!(path_of("http://api.test/auth/refresh"), "/auth/refresh");
        assert_eq!(path_of("https://geo.test/agro/1.0/geometry?detail=false"), "/agro/1.0/geometry");
        assert_eq!(path_of("http://api.test"), "/");
    }

    #[tokio::test]
    async fn test_sequence_repeats_last_reply() {
        let transport = MockTransport::new();
        transport.on_sequence(
            Method::Get,
            "/x",
            vec![MockReply::status(500), MockReply::json(200, "ok")],
        );

        let req = ApiRequest::get("http://h/x");
        assert_eq!(transport.send(&req).await.unwrap().status, 500);
        assert_eq!(transport.send(&req).await.unwrap().status, 200);
        assert_eq!(transport.send(&req).await.unwrap().status, 200);
        assert_eq!(transport.count(Method::Get, "/x"), 3);
    }
}
