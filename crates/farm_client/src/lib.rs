//! Farm API client library.
//!
//! Authenticated access to the primary API and the geospatial/weather
//! provider, with single-flight credential renewal.

pub mod advisory;
pub mod geometry;
pub mod rate_limit;
pub mod refresh;
pub mod rest;
pub mod session;
pub mod transport;
pub mod weather;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use advisory::AdvisoryApi;
pub use geometry::GeometryApi;
pub use rate_limit::RateLimiter;
pub use refresh::TokenRefreshCoordinator;
pub use rest::HttpClient;
pub use session::{FileSessionStore, MemorySessionStore, Session, SessionStore};
pub use transport::{ApiRequest, ApiResponse, Method, ReqwestTransport, Transport};
pub use weather::WeatherApi;
