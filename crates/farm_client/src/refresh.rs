//! Single-flight renewal of the bearer credential.
//!
//! However many callers observe a 401 at the same moment, one
//! `POST /auth/refresh` is issued. Every caller that arrives while it is in
//! flight is queued and released with that renewal's outcome, in FIFO order.
//! A failed renewal logs the session out.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::{Error, RefreshResponse};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::session::Session;
use crate::transport::{normalize_base_url, summarize_response_body, ApiRequest, Transport};

type Waiter = oneshot::Sender<Result<String, Error>>;

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    waiters: VecDeque<Waiter>,
}

pub struct TokenRefreshCoordinator {
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    refresh_url: String,
    state: Mutex<RefreshState>,
    renewals_issued: AtomicU64,
}

impl std::fmt::Debug for TokenRefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRefreshCoordinator")
            .field("refresh_url", &self.refresh_url)
            .field("renewals_issued", &self.renewals_issued())
            .finish()
    }
}

impl TokenRefreshCoordinator {
    pub fn new(transport: Arc<dyn Transport>, session: Arc<Session>, api_base_url: &str) -> Self {
        Self {
            transport,
            session,
            refresh_url: format!("{}/auth/refresh", normalize_base_url(api_base_url)),
            state: Mutex::new(RefreshState::default()),
            renewals_issued: AtomicU64::new(0),
        }
    }

    /// Called after a request sent with `failed_token` came back 401.
    ///
    /// Returns a credential to retry with. If the session already holds a
    /// newer credential than the failed one, it is returned without renewing.
    pub async fn ensure_valid(self: &Arc<Self>, failed_token: Option<&str>) -> Result<String, Error> {
        self.join_renewal(failed_token, true).await
    }

    /// Renew unconditionally, sharing any renewal already in flight.
    pub async fn renew_now(self: &Arc<Self>) -> Result<String, Error> {
        self.join_renewal(None, false).await
    }

    /// Number of renewal requests sent to the auth service.
    pub fn renewals_issued(&self) -> u64 {
        self.renewals_issued.load(Ordering::SeqCst)
    }

    async fn join_renewal(
        self: &Arc<Self>,
        failed_token: Option<&str>,
        reuse_newer: bool,
    ) -> Result<String, Error> {
        let (rx, start) = {
            let mut state = self.state.lock().await;

            if !state.in_flight && reuse_newer {
                if let Some(current) = self.session.get().await {
                    if failed_token != Some(current.as_str()) {
                        debug!("Session already renewed; reusing current credential");
                        return Ok(current);
                    }
                }
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            let start = !state.in_flight;
            state.in_flight = true;
            (rx, start)
        };

        if start {
            // Runs detached so a dropped caller cannot strand the queue.
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_renewal().await });
        } else {
            debug!("Renewal in flight; queued behind it");
        }

        rx.await.unwrap_or_else(|_| {
            Err(Error::RenewalNetworkError(
                "renewal task ended without an outcome".into(),
            ))
        })
    }

    async fn run_renewal(&self) {
        self.renewals_issued.fetch_add(1, Ordering::SeqCst);
        let outcome = self.renew().await;

        match &outcome {
            Ok(token) => {
                self.session.set(token).await;
                info!("Credential renewed");
            }
            Err(e) => {
                warn!("Credential renewal failed, logging out: {}", e);
                self.session.invalidate().await;
            }
        }

        let waiters = {
            let mut state = self.state.lock().await;
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };

        debug!("Releasing {} renewal waiter(s)", waiters.len());
        for waiter in waiters {
            // A waiter whose caller went away is simply skipped.
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn renew(&self) -> Result<String, Error> {
        let request = ApiRequest::post(&self.refresh_url).credentialed();

        let resp = self
            .transport
            .send(&request)
            .await
            .map_err(|e| Error::RenewalNetworkError(e.to_string()))?;

        if !resp.is_success() {
            return Err(Error::RenewalFailed {
                status: resp.status,
                message: summarize_response_body(&resp.body),
            });
        }

        let body: RefreshResponse = resp.json().map_err(|e| Error::RenewalFailed {
            status: resp.status,
            message: format!("undecodable renewal response: {e}"),
        })?;

        if body.access_token.trim().is_empty() {
            return Err(Error::RenewalFailed {
                status: resp.status,
                message: "renewal response carried an empty accessToken".into(),
            });
        }

        Ok(body.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemorySessionStore, SessionStore};
    use crate::testing::{MockReply, MockTransport};
    use crate::transport::Method;
    use std::time::Duration;

    const API: &str = "http://api.test";

    fn setup(token: Option<&str>) -> (Arc<MockTransport>, Arc<MemorySessionStore>, Arc<Session>, Arc<TokenRefreshCoordinator>) {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemorySessionStore::new(token));
        let session = Arc::new(Session::restore(store.clone()).unwrap());
        let coordinator = Arc::new(TokenRefreshCoordinator::new(
            transport.clone(),
            session.clone(),
            API,
        ));
        (transport, store, session, coordinator)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_renewal() {
        let (transport, _store, session, coordinator) = setup(Some("old"));
        transport.on(
            Method::Post,
            "/auth/refresh",
            MockReply::json(200, r#"{"accessToken":"new"}"#).delayed(Duration::from_millis(50)),
        );

        let calls = (0..5).map(|_| {
            let c = coordinator.clone();
            async move { c.ensure_valid(Some("old")).await }
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(transport.count(Method::Post, "/auth/refresh"), 1);
        assert_eq!(coordinator.renewals_issued(), 1);
        for r in results {
            assert_eq!(r.unwrap(), "new");
        }
        assert_eq!(session.get().await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_refresh_request_is_credentialed_without_bearer() {
        let (transport, _store, _session, coordinator) = setup(Some("old"));
        transport.on(Method::Post, "/auth/refresh", MockReply::json(200, r#"{"accessToken":"new"}"#));

        coordinator.ensure_valid(Some("old")).await.unwrap();

        let sent = transport.requests(Method::Post, "/auth/refresh");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].with_credentials);
        assert!(sent[0].header_value("Authorization").is_none());
        assert!(sent[0].body.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_renewal_rejects_all_and_logs_out() {
        let (transport, store, session, coordinator) = setup(Some("old"));
        transport.on(
            Method::Post,
            "/auth/refresh",
            MockReply::json(401, r#"{"detail":"refresh token expired"}"#)
                .delayed(Duration::from_millis(20)),
        );

        let calls = (0..3).map(|_| {
            let c = coordinator.clone();
            async move { c.ensure_valid(Some("old")).await }
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(transport.count(Method::Post, "/auth/refresh"), 1);
        for r in &results {
            assert!(matches!(r, Err(Error::RenewalFailed { status: 401, .. })));
        }
        assert!(!session.is_authenticated().await);
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn test_network_failure_is_renewal_failure() {
        let (transport, _store, session, coordinator) = setup(Some("old"));
        transport.on(Method::Post, "/auth/refresh", MockReply::network_error("connection refused"));

        let err = coordinator.ensure_valid(Some("old")).await.unwrap_err();
        assert!(matches!(err, Error::RenewalNetworkError(_)));
        assert!(err.is_renewal_failure());
        assert!(!session.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_can_renew_again_after_failure() {
        let (transport, _store, session, coordinator) = setup(Some("old"));
        transport.on(Method::Post, "/auth/refresh", MockReply::json(500, "boom"));
        assert!(coordinator.ensure_valid(Some("old")).await.is_err());

        // Later login succeeds and the next expiry renews normally.
        session.set("relogged").await;
        transport.on(Method::Post, "/auth/refresh", MockReply::json(200, r#"{"accessToken":"fresh"}"#));
        let token = coordinator.ensure_valid(Some("relogged")).await.unwrap();

        assert_eq!(token, "fresh");
        assert_eq!(transport.count(Method::Post, "/auth/refresh"), 2);
    }

    #[tokio::test]
    async fn test_newer_credential_reused_without_renewal() {
        let (transport, _store, _session, coordinator) = setup(Some("already-new"));

        let token = coordinator.ensure_valid(Some("stale")).await.unwrap();

        assert_eq!(token, "already-new");
        assert_eq!(transport.count(Method::Post, "/auth/refresh"), 0);
    }

    #[tokio::test]
    async fn test_empty_access_token_rejected() {
        let (transport, _store, _session, coordinator) = setup(None);
        transport.on(Method::Post, "/auth/refresh", MockReply::json(200, r#"{"accessToken":""}"#));

        let err = coordinator.renew_now().await.unwrap_err();
        assert!(matches!(err, Error::RenewalFailed { status: 200, .. }));
    }
}
