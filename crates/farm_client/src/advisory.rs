//! Farm advisory endpoint of the primary API.

use common::{Advisory, AdvisoryResponse, Error};
use tracing::debug;

use crate::rest::HttpClient;
use crate::transport::{normalize_base_url, ApiRequest};

#[derive(Debug, Clone)]
pub struct AdvisoryApi {
    http: HttpClient,
    base_url: String,
}

impl AdvisoryApi {
    pub fn new(http: HttpClient, base_url: &str) -> Self {
        Self {
            http,
            base_url: normalize_base_url(base_url),
        }
    }

    /// Advisories computed for a field; empty while the computation is pending.
    pub async fn advisories(&self, field_id: &str) -> Result<Vec<Advisory>, Error> {
        let req = ApiRequest::get(format!("{}/farm-advisory/{}", self.base_url, field_id));
        let resp: AdvisoryResponse = self.http.call_json(req).await?;
        debug!("{} advisories for field {}", resp.advisories.len(), field_id);
        Ok(resp.advisories)
    }
}
