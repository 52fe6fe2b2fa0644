//! Resource coordination layer.
//!
//! Sits between the dashboard and the farm APIs: reconciles fields with
//! their remote AOIs, serves cached forecasts, and polls for advisories.

pub mod advisory;
pub mod cache;
pub mod forecast;
pub mod poller;
pub mod reconcile;

pub use advisory::AdvisoryWatcher;
pub use cache::{CacheEntry, TtlCache};
pub use forecast::{ForecastCacheController, ForecastLookup};
pub use poller::{BoundedPoller, PollConfig, PollOutcome, PollSession};
pub use reconcile::ResourceReconciler;
