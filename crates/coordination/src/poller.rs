//! Bounded polling.
//!
//! Runs an async check immediately and then every `interval` until it
//! reports completion, `max_attempts` checks have been made, or the poll is
//! stopped. At most one poll runs per key.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::config::AdvisoryConfig;
use common::Error;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a poll ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Completed { value: T, attempts: u32 },
    /// Every attempt ran without completion. Not an error.
    Exhausted { attempts: u32 },
    Cancelled { attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Completed { attempts, .. }
            | PollOutcome::Exhausted { attempts }
            | PollOutcome::Cancelled { attempts } => *attempts,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            PollOutcome::Completed { value, .. } => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            max_attempts: 12,
        }
    }
}

impl From<&AdvisoryConfig> for PollConfig {
    fn from(cfg: &AdvisoryConfig) -> Self {
        Self {
            interval: Duration::from_millis(cfg.poll_interval_ms),
            max_attempts: cfg.max_attempts,
        }
    }
}

/// Snapshot of a running poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSession {
    pub target_key: String,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub interval: Duration,
    pub active: bool,
}

struct ActivePoll {
    generation: u64,
    cancel: CancellationToken,
    attempts: Arc<AtomicU32>,
    config: PollConfig,
}

#[derive(Default)]
pub struct BoundedPoller {
    polls: Arc<DashMap<String, ActivePoll>>,
    next_generation: AtomicU64,
}

impl BoundedPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start polling `key`.
    ///
    /// Returns `None` without side effects if a poll for `key` is already
    /// running. Must be called from within a Tokio runtime.
    pub fn start<T, F, Fut>(
        &self,
        key: &str,
        config: PollConfig,
        check: F,
    ) -> Option<oneshot::Receiver<PollOutcome<T>>>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, Error>> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));

        match self.polls.entry(key.to_string()) {
            Entry::Occupied(_) => {
                debug!("Poll for {} already running", key);
                return None;
            }
            Entry::Vacant(slot) => {
                slot.insert(ActivePoll {
                    generation,
                    cancel: cancel.clone(),
                    attempts: Arc::clone(&attempts),
                    config,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        let polls = Arc::clone(&self.polls);
        let key = key.to_string();
        tokio::spawn(async move {
            let outcome = run_poll(&key, config, &cancel, &attempts, check).await;
            polls.remove_if(&key, |_, p| p.generation == generation);
            match &outcome {
                PollOutcome::Completed { attempts, .. } => {
                    info!("Poll for {} completed after {} attempt(s)", key, attempts)
                }
                PollOutcome::Exhausted { attempts } => {
                    info!("Poll for {} gave up after {} attempt(s)", key, attempts)
                }
                PollOutcome::Cancelled { attempts } => {
                    debug!("Poll for {} cancelled after {} attempt(s)", key, attempts)
                }
            }
            let _ = tx.send(outcome);
        });
        Some(rx)
    }

    /// Stop the poll for `key`. A check already in flight finishes but its
    /// result is discarded.
    pub fn stop(&self, key: &str) -> bool {
        match self.polls.remove(key) {
            Some((_, poll)) => {
                poll.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        self.polls.retain(|_, poll| {
            poll.cancel.cancel();
            false
        });
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.polls.contains_key(key)
    }

    pub fn session(&self, key: &str) -> Option<PollSession> {
        self.polls.get(key).map(|poll| PollSession {
            target_key: key.to_string(),
            attempts_made: poll.attempts.load(Ordering::Relaxed),
            max_attempts: poll.config.max_attempts,
            interval: poll.config.interval,
            active: !poll.cancel.is_cancelled(),
        })
    }
}

impl Drop for BoundedPoller {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn run_poll<T, F, Fut>(
    key: &str,
    config: PollConfig,
    cancel: &CancellationToken,
    attempts: &AtomicU32,
    mut check: F,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, Error>>,
{
    if config.max_attempts == 0 {
        return PollOutcome::Exhausted { attempts: 0 };
    }

    loop {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled {
                attempts: attempts.load(Ordering::Relaxed),
            };
        }

        let result = check().await;
        let made = attempts.fetch_add(1, Ordering::Relaxed) + 1;

        if cancel.is_cancelled() {
            debug!("Discarding result of attempt {} for stopped poll {}", made, key);
            return PollOutcome::Cancelled { attempts: made };
        }

        match result {
            Ok(Some(value)) => {
                return PollOutcome::Completed {
                    value,
                    attempts: made,
                }
            }
            Ok(None) => debug!("Poll {} attempt {}/{}: not ready", key, made, config.max_attempts),
            Err(e) => warn!("Poll {} attempt {}/{} failed: {}", key, made, config.max_attempts, e),
        }

        if made >= config.max_attempts {
            return PollOutcome::Exhausted { attempts: made };
        }

        tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Cancelled { attempts: made },
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_stops_after_max_attempts() {
        let poller = BoundedPoller::new();
        let checks = counter();
        let c = Arc::clone(&checks);
        let started = tokio::time::Instant::now();

        let rx = poller
            .start("adv", PollConfig::default(), move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Ok::<Option<()>, Error>(None) }
            })
            .unwrap();

        assert_eq!(rx.await.unwrap(), PollOutcome::Exhausted { attempts: 12 });
        assert_eq!(checks.load(Ordering::SeqCst), 12);
        assert_eq!(started.elapsed(), Duration::from_millis(55_000));
        assert!(!poller.is_active("adv"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(checks.load(Ordering::SeqCst), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_check_stops() {
        let poller = BoundedPoller::new();
        let checks = counter();
        let c = Arc::clone(&checks);

        let rx = poller
            .start("adv", PollConfig::default(), move || {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok::<_, Error>((n == 3).then_some("done")) }
            })
            .unwrap();

        assert_eq!(
            rx.await.unwrap(),
            PollOutcome::Completed {
                value: "done",
                attempts: 3
            }
        );
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(checks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_check_counts_as_attempt() {
        let poller = BoundedPoller::new();
        let config = PollConfig {
            interval: Duration::from_millis(100),
            max_attempts: 3,
        };

        let rx = poller
            .start("adv", config, || async {
                Err::<Option<()>, _>(Error::Http("connection reset".into()))
            })
            .unwrap();

        assert_eq!(rx.await.unwrap(), PollOutcome::Exhausted { attempts: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_on_active_key_is_noop() {
        let poller = BoundedPoller::new();
        let first = poller.start("adv", PollConfig::default(), || async { Ok::<Option<()>, Error>(None) });
        assert!(first.is_some());

        let second = poller.start("adv", PollConfig::default(), || async { Ok::<Option<()>, Error>(Some(())) });
        assert!(second.is_none());

        let session = poller.session("adv").unwrap();
        assert_eq!(session.target_key, "adv");
        assert_eq!(session.max_attempts, 12);
        assert_eq!(session.interval, Duration::from_millis(5000));
        assert!(session.active);

        // Other keys are independent.
        assert!(poller
            .start("other", PollConfig::default(), || async { Ok::<Option<()>, Error>(None) })
            .is_some());
        poller.stop_all();
        assert!(!poller.is_active("adv") && !poller.is_active("other"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_result() {
        let poller = BoundedPoller::new();
        let rx = poller
            .start("adv", PollConfig::default(), || async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, Error>(Some(42))
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(poller.stop("adv"));
        assert!(poller.session("adv").is_none());

        assert_eq!(rx.await.unwrap(), PollOutcome::Cancelled { attempts: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_interval_cancels_promptly() {
        let poller = BoundedPoller::new();
        let checks = counter();
        let c = Arc::clone(&checks);
        let rx = poller
            .start("adv", PollConfig::default(), move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Ok::<Option<()>, Error>(None) }
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(6000)).await;
        assert_eq!(poller.session("adv").unwrap().attempts_made, 2);
        poller.stop("adv");

        assert_eq!(rx.await.unwrap(), PollOutcome::Cancelled { attempts: 2 });
        assert_eq!(checks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop_keeps_new_registration() {
        let poller = BoundedPoller::new();
        let old = poller
            .start("adv", PollConfig::default(), || async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<Option<()>, Error>(None)
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        poller.stop("adv");

        let _new = poller
            .start("adv", PollConfig::default(), || async { Ok::<Option<()>, Error>(None) })
            .unwrap();
        assert!(matches!(old.await.unwrap(), PollOutcome::Cancelled { .. }));
        // The finished old poll must not unregister the new one.
        assert!(poller.is_active("adv"));
    }

    #[test]
    fn test_config_from_advisory_settings() {
        let cfg = AdvisoryConfig {
            poll_interval_ms: 250,
            max_attempts: 4,
        };
        assert_eq!(
            PollConfig::from(&cfg),
            PollConfig {
                interval: Duration::from_millis(250),
                max_attempts: 4
            }
        );
    }
}
