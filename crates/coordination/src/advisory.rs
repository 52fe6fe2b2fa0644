//! Advisory watching for the selected field.
//!
//! Advisories are computed asynchronously server-side; an empty list means
//! not ready yet. Only one field is watched at a time, and results arriving
//! for a field that is no longer selected are dropped.

use std::sync::{Arc, Mutex};

use common::Advisory;
use dashmap::DashMap;
use farm_client::AdvisoryApi;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::poller::{BoundedPoller, PollConfig, PollOutcome};

pub struct AdvisoryWatcher {
    api: AdvisoryApi,
    poller: BoundedPoller,
    config: PollConfig,
    current: Arc<Mutex<Option<String>>>,
    results: Arc<DashMap<String, Vec<Advisory>>>,
}

impl AdvisoryWatcher {
    pub fn new(api: AdvisoryApi, config: PollConfig) -> Self {
        Self {
            api,
            poller: BoundedPoller::new(),
            config,
            current: Arc::new(Mutex::new(None)),
            results: Arc::new(DashMap::new()),
        }
    }

    /// Select `field_id` and poll until its advisories are available.
    ///
    /// Stops the poll of a previously selected field. Returns `None` if the
    /// field is already being polled.
    pub fn watch(&self, field_id: &str) -> Option<JoinHandle<PollOutcome<Vec<Advisory>>>> {
        let previous = self
            .current
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(field_id.to_string());
        if let Some(prev) = previous.filter(|p| p != field_id) {
            if self.poller.stop(&prev) {
                info!("Stopped advisory poll for {} (now watching {})", prev, field_id);
            }
        }

        let api = self.api.clone();
        let id = field_id.to_string();
        let rx = self.poller.start(field_id, self.config, move || {
            let api = api.clone();
            let id = id.clone();
            async move {
                let advisories = api.advisories(&id).await?;
                Ok((!advisories.is_empty()).then_some(advisories))
            }
        })?;

        let current = Arc::clone(&self.current);
        let results = Arc::clone(&self.results);
        let id = field_id.to_string();
        Some(tokio::spawn(async move {
            let outcome = rx
                .await
                .unwrap_or(PollOutcome::Cancelled { attempts: 0 });
            if let PollOutcome::Completed { value, .. } = &outcome {
                let still_current =
                    current.lock().unwrap_or_else(|p| p.into_inner()).as_deref() == Some(id.as_str());
                if still_current {
                    info!("Received {} advisories for {}", value.len(), id);
                    results.insert(id, value.clone());
                } else {
                    debug!("Dropping advisories for {}: no longer selected", id);
                }
            }
            outcome
        }))
    }

    pub fn advisories(&self, field_id: &str) -> Option<Vec<Advisory>> {
        self.results.get(field_id).map(|r| r.value().clone())
    }

    pub fn current(&self) -> Option<String> {
        self.current.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn is_polling(&self, field_id: &str) -> bool {
        self.poller.is_active(field_id)
    }

    /// Stop polling and clear the selection.
    pub fn teardown(&self) {
        self.current.lock().unwrap_or_else(|p| p.into_inner()).take();
        self.poller.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_client::testing::{MockReply, MockTransport};
    use farm_client::{HttpClient, MemorySessionStore, Method, RateLimiter, Session, TokenRefreshCoordinator};
    use std::time::Duration;

    const READY: &str = r#"{"advisories":[{"category":"irrigation","title":"Water soon","message":"Soil moisture low","severity":"medium"}]}"#;
    const PENDING: &str = r#"{"advisories":[]}"#;

    fn watcher() -> (Arc<MockTransport>, AdvisoryWatcher) {
        let transport = Arc::new(MockTransport::new());
        let session = Arc::new(Session::restore(Arc::new(MemorySessionStore::new(Some("tok")))).unwrap());
        let refresher = Arc::new(TokenRefreshCoordinator::new(transport.clone(), session.clone(), "http://api.test"));
        let http = HttpClient::new(transport.clone(), session, refresher, RateLimiter::with_limit(1000));
        let api = AdvisoryApi::new(http, "http://api.test");
        (transport, AdvisoryWatcher::new(api, PollConfig::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_advisories_arrive() {
        let (transport, watcher) = watcher();
        transport.on_sequence(
            Method::Get,
            "/farm-advisory/F1",
            vec![
                MockReply::json(200, PENDING),
                MockReply::json(200, PENDING),
                MockReply::json(200, READY),
            ],
        );

        let outcome = watcher.watch("F1").unwrap().await.unwrap();

        assert_eq!(outcome.attempts(), 3);
        let stored = watcher.advisories("F1").unwrap();
        assert_eq!(stored[0].message, "Soil moisture low");
        assert_eq!(transport.count(Method::Get, "/farm-advisory/F1"), 3);
        let sent = transport.requests(Method::Get, "/farm-advisory/F1");
        assert_eq!(sent[0].header_value("authorization"), Some("Bearer tok"));
        assert!(!watcher.is_polling("F1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_field_stops_previous_poll() {
        let (transport, watcher) = watcher();
        transport.on(Method::Get, "/farm-advisory/F1", MockReply::json(200, PENDING));
        transport.on(Method::Get, "/farm-advisory/F2", MockReply::json(200, READY));

        let first = watcher.watch("F1").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = watcher.watch("F2").unwrap();

        assert!(matches!(first.await.unwrap(), PollOutcome::Cancelled { attempts: 1 }));
        assert!(matches!(second.await.unwrap(), PollOutcome::Completed { .. }));
        assert_eq!(watcher.current().as_deref(), Some("F2"));
        assert!(watcher.advisories("F1").is_none());
        assert!(watcher.advisories("F2").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_result_for_superseded_field_dropped() {
        let (transport, watcher) = watcher();
        transport.on(
            Method::Get,
            "/farm-advisory/F1",
            MockReply::json(200, READY).delayed(Duration::from_millis(500)),
        );
        transport.on(Method::Get, "/farm-advisory/F2", MockReply::json(200, PENDING));

        let first = watcher.watch("F1").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        watcher.watch("F2");

        assert!(matches!(first.await.unwrap(), PollOutcome::Cancelled { .. }));
        assert!(watcher.advisories("F1").is_none());
        watcher.teardown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewatch_of_active_field_is_noop() {
        let (transport, watcher) = watcher();
        transport.on(Method::Get, "/farm-advisory/F1", MockReply::json(200, PENDING));

        assert!(watcher.watch("F1").is_some());
        assert!(watcher.watch("F1").is_none());
        assert!(watcher.is_polling("F1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_exhausts_quietly() {
        let (transport, watcher) = watcher();
        transport.on(Method::Get, "/farm-advisory/F1", MockReply::json(200, PENDING));

        let outcome = watcher.watch("F1").unwrap().await.unwrap();

        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 12 });
        assert!(watcher.advisories("F1").is_none());
        assert_eq!(transport.count(Method::Get, "/farm-advisory/F1"), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_clears_selection_and_stops() {
        let (transport, watcher) = watcher();
        transport.on(Method::Get, "/farm-advisory/F1", MockReply::json(200, PENDING));

        let handle = watcher.watch("F1").unwrap();
        watcher.teardown();

        assert!(watcher.current().is_none());
        assert!(!watcher.is_polling("F1"));
        assert!(matches!(handle.await.unwrap(), PollOutcome::Cancelled { .. }));
    }
}
