//! Authenticated HTTP client.
//!
//! Attaches the session's bearer credential to every bearer request. A 401
//! on such a request hands off to the `TokenRefreshCoordinator` and the
//! request is re-issued exactly once; a second 401 is terminal.

use std::sync::Arc;

use common::Error;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::rate_limit::RateLimiter;
use crate::refresh::TokenRefreshCoordinator;
use crate::session::Session;
use crate::transport::{summarize_response_body, ApiRequest, ApiResponse, Transport};

const UNAUTHORIZED: u16 = 401;

#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    refresher: Arc<TokenRefreshCoordinator>,
    limiter: RateLimiter,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("refresher", &self.refresher)
            .finish()
    }
}

impl HttpClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<Session>,
        refresher: Arc<TokenRefreshCoordinator>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            transport,
            session,
            refresher,
            limiter,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn refresher(&self) -> &Arc<TokenRefreshCoordinator> {
        &self.refresher
    }

    /// Perform a request. Non-401 statuses come back unchanged as `Ok`.
    pub async fn call(&self, mut request: ApiRequest) -> Result<ApiResponse, Error> {
        let token = if request.bearer {
            self.session.get().await
        } else {
            None
        };

        let resp = self.send(&mut request, token.as_deref()).await?;
        if resp.status != UNAUTHORIZED || !request.bearer {
            return Ok(resp);
        }

        if request.is_retry {
            warn!("{} still unauthorized after renewal", request.url);
            return Err(Error::AuthExpired { status: resp.status });
        }

        debug!("{} returned 401; renewing credential", request.url);
        let fresh = self.refresher.ensure_valid(token.as_deref()).await?;

        request.is_retry = true;
        let resp = self.send(&mut request, Some(&fresh)).await?;
        if resp.status == UNAUTHORIZED {
            warn!("{} still unauthorized after renewal", request.url);
            return Err(Error::AuthExpired { status: resp.status });
        }
        Ok(resp)
    }

    /// `call`, then require a 2xx.
    pub async fn call_ok(&self, request: ApiRequest) -> Result<ApiResponse, Error> {
        let resp = self.call(request).await?;
        ensure_success(resp)
    }

    /// `call`, require a 2xx and decode the body.
    pub async fn call_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, Error> {
        self.call_ok(request).await?.json()
    }

    async fn send(
        &self,
        request: &mut ApiRequest,
        token: Option<&str>,
    ) -> Result<ApiResponse, Error> {
        if request.bearer {
            match token {
                Some(t) => request.set_header("Authorization", format!("Bearer {t}")),
                None => request.headers.retain(|(k, _)| !k.eq_ignore_ascii_case("Authorization")),
            }
        }
        self.limiter.wait().await;
        self.transport.send(request).await
    }
}

/// Map a non-2xx response into `Error::Api`.
pub fn ensure_success(resp: ApiResponse) -> Result<ApiResponse, Error> {
    if resp.is_success() {
        Ok(resp)
    } else {
        Err(Error::Api {
            status: resp.status,
            message: summarize_response_body(&resp.body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use crate::testing::{MockReply, MockTransport};
    use crate::transport::Method;
    use std::time::Duration;

    const API: &str = "http://api.test";

    fn client(token: Option<&str>) -> (Arc<MockTransport>, HttpClient) {
        let transport = Arc::new(MockTransport::new());
        let session = Arc::new(Session::restore(Arc::new(MemorySessionStore::new(token))).unwrap());
        let refresher = Arc::new(TokenRefreshCoordinator::new(
            transport.clone(),
            session.clone(),
            API,
        ));
        let http = HttpClient::new(
            transport.clone(),
            session,
            refresher,
            RateLimiter::with_limit(1000),
        );
        (transport, http)
    }

    fn accept_only(token: &'static str) -> impl Fn(&ApiRequest) -> MockReply + Send + Sync {
        move |req: &ApiRequest| {
            let expected = format!("Bearer {token}");
            if req.header_value("Authorization") == Some(expected.as_str()) {
                MockReply::json(200, r#"{"ok":true}"#)
            } else {
                MockReply::status(401)
            }
        }
    }

    #[tokio::test]
    async fn test_attaches_bearer_credential() {
        let (transport, http) = client(Some("tok"));
        transport.on(Method::Get, "/fields", MockReply::json(200, "[]"));

        let resp = http.call(ApiRequest::get(format!("{API}/fields"))).await.unwrap();

        assert_eq!(resp.status, 200);
        let sent = transport.requests(Method::Get, "/fields");
        assert_eq!(sent[0].header_value("Authorization"), Some("Bearer tok"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_401s_trigger_single_renewal() {
        let (transport, http) = client(Some("old"));
        transport.respond_with(Method::Get, "/fields", accept_only("new"));
        transport.on(
            Method::Post,
            "/auth/refresh",
            MockReply::json(200, r#"{"accessToken":"new"}"#).delayed(Duration::from_millis(50)),
        );

        let calls = (0..6).map(|_| http.call(ApiRequest::get(format!("{API}/fields"))));
        let results = futures::future::join_all(calls).await;

        assert_eq!(transport.count(Method::Post, "/auth/refresh"), 1);
        for r in results {
            assert_eq!(r.unwrap().status, 200);
        }
        let retried: Vec<_> = transport
            .requests(Method::Get, "/fields")
            .into_iter()
            .filter(|r| r.is_retry)
            .collect();
        assert_eq!(retried.len(), 6);
        assert!(retried
            .iter()
            .all(|r| r.header_value("Authorization") == Some("Bearer new")));
    }

    #[tokio::test]
    async fn test_second_401_is_terminal() {
        let (transport, http) = client(Some("old"));
        transport.on(Method::Get, "/fields", MockReply::status(401));
        transport.on(Method::Post, "/auth/refresh", MockReply::json(200, r#"{"accessToken":"new"}"#));

        let err = http.call(ApiRequest::get(format!("{API}/fields"))).await.unwrap_err();

        assert!(err.is_auth_expired());
        assert_eq!(transport.count(Method::Get, "/fields"), 2);
        assert_eq!(transport.count(Method::Post, "/auth/refresh"), 1);
    }

    #[tokio::test]
    async fn test_request_marked_retry_is_not_retried() {
        let (transport, http) = client(Some("old"));
        transport.on(Method::Get, "/fields", MockReply::status(401));

        let mut req = ApiRequest::get(format!("{API}/fields"));
        req.is_retry = true;
        let err = http.call(req).await.unwrap_err();

        assert!(matches!(err, Error::AuthExpired { status: 401 }));
        assert_eq!(transport.count(Method::Post, "/auth/refresh"), 0);
    }

    #[tokio::test]
    async fn test_renewal_failure_propagates() {
        let (transport, http) = client(Some("old"));
        transport.on(Method::Get, "/fields", MockReply::status(401));
        transport.on(Method::Post, "/auth/refresh", MockReply::status(403));

        let err = http.call(ApiRequest::get(format!("{API}/fields"))).await.unwrap_err();

        assert!(err.is_renewal_failure());
        assert!(!http.session().is_authenticated().await);
        assert_eq!(transport.count(Method::Get, "/fields"), 1);
    }

    #[tokio::test]
    async fn test_other_failures_pass_through() {
        let (transport, http) = client(Some("tok"));
        transport.on(Method::Get, "/fields", MockReply::json(503, "maintenance"));

        let resp = http.call(ApiRequest::get(format!("{API}/fields"))).await.unwrap();
        assert_eq!(resp.status, 503);
        assert_eq!(resp.body, "maintenance");
        assert_eq!(transport.count(Method::Post, "/auth/refresh"), 0);

        let err = http
            .call_ok(ApiRequest::get(format!("{API}/fields")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_api_key_401_does_not_renew() {
        let (transport, http) = client(Some("tok"));
        transport.on(Method::Get, "/geometry", MockReply::status(401));

        let req = ApiRequest::get("http://geo.test/geometry").api_key("x-api-key", "bad");
        let resp = http.call(req).await.unwrap();

        assert_eq!(resp.status, 401);
        assert_eq!(transport.count(Method::Post, "/auth/refresh"), 0);
        let sent = transport.requests(Method::Get, "/geometry");
        assert!(sent[0].header_value("Authorization").is_none());
    }

    #[tokio::test]
    async fn test_network_error_surfaces_without_retry() {
        let (transport, http) = client(Some("tok"));
        transport.on(Method::Get, "/fields", MockReply::network_error("connection reset"));

        let err = http.call(ApiRequest::get(format!("{API}/fields"))).await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
        assert_eq!(transport.count(Method::Get, "/fields"), 1);
    }

    #[tokio::test]
    async fn test_request_id_preserved_across_retry() {
        let (transport, http) = client(Some("old"));
        transport.respond_with(Method::Get, "/fields", accept_only("new"));
        transport.on(Method::Post, "/auth/refresh", MockReply::json(200, r#"{"accessToken":"new"}"#));

        http.call(ApiRequest::get(format!("{API}/fields"))).await.unwrap();

        let sent = transport.requests(Method::Get, "/fields");
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].request_id, sent[1].request_id);
    }
}
