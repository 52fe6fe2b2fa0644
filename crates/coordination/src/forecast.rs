//! Forecast cache controller.
//!
//! Serves the last fetched forecast for an AOI immediately and refreshes it
//! in the background when missing or stale. A refresh is scheduled at most
//! once per TTL window per AOI, including while one is still in flight.

use std::sync::Arc;
use std::time::Duration;

use common::{Error, Forecast};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use farm_client::WeatherApi;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::TtlCache;

/// Result of a non-blocking forecast read.
#[derive(Debug)]
pub struct ForecastLookup {
    pub value: Option<Forecast>,
    pub fetched_at: Option<Instant>,
    /// No value yet, or the value is stale.
    pub is_loading: bool,
    /// Background fetch started by this read, if any.
    pub refresh: Option<JoinHandle<()>>,
}

pub struct ForecastCacheController {
    weather: WeatherApi,
    cache: TtlCache<String, Forecast>,
    scheduled: DashMap<String, Instant>,
    errors: DashMap<String, String>,
}

impl ForecastCacheController {
    pub fn new(weather: WeatherApi, ttl: Duration) -> Self {
        Self {
            weather,
            cache: TtlCache::new(ttl),
            scheduled: DashMap::new(),
            errors: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.cache.ttl()
    }

    /// Cached forecast for `aoi_id`, scheduling a refresh when needed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn get(self: &Arc<Self>, aoi_id: &str) -> ForecastLookup {
        let entry = self.cache.get(&aoi_id.to_string());
        let is_loading = entry
            .as_ref()
            .map(|e| e.is_stale(self.ttl()))
            .unwrap_or(true);

        let refresh = if is_loading && self.try_schedule(aoi_id) {
            let this = Arc::clone(self);
            let id = aoi_id.to_string();
            Some(tokio::spawn(async move {
                if let Err(e) = this.fetch_and_store(&id).await {
                    warn!("Forecast refresh for AOI {} failed: {}", id, e);
                }
            }))
        } else {
            None
        };

        ForecastLookup {
            value: entry.as_ref().map(|e| e.value.clone()),
            fetched_at: entry.map(|e| e.fetched_at),
            is_loading,
            refresh,
        }
    }

    /// Fetch now, bypassing the schedule window, and store the result.
    pub async fn fetch(&self, aoi_id: &str) -> Result<Forecast, Error> {
        self.scheduled.insert(aoi_id.to_string(), Instant::now());
        self.fetch_and_store(aoi_id).await
    }

    /// Error of the most recent failed fetch, cleared by a successful one.
    pub fn last_error(&self, aoi_id: &str) -> Option<String> {
        self.errors.get(aoi_id).map(|e| e.value().clone())
    }

    /// Mark a fetch as scheduled unless one was scheduled within the TTL.
    fn try_schedule(&self, aoi_id: &str) -> bool {
        let now = Instant::now();
        match self.scheduled.entry(aoi_id.to_string()) {
            Entry::Occupied(mut slot) => {
                if now.duration_since(*slot.get()) <= self.ttl() {
                    debug!("Forecast for AOI {} already scheduled in this window", aoi_id);
                    false
                } else {
                    slot.insert(now);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    async fn fetch_and_store(&self, aoi_id: &str) -> Result<Forecast, Error> {
        match self.weather.forecast(aoi_id).await {
            Ok(forecast) => {
                self.cache.insert(aoi_id.to_string(), forecast.clone());
                self.errors.remove(aoi_id);
                Ok(forecast)
            }
            Err(e) => {
                self.errors.insert(aoi_id.to_string(), e.to_string());
                Err(e)
            }
        }
    }
}
