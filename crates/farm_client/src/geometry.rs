//! Geometry (AOI) endpoints of the geospatial provider.

use common::{CreateAoiRequest, CreateAoiResponse, Error, GeoPolygon, RemoteAoi};
use tracing::{debug, info};

use crate::rest::{ensure_success, HttpClient};
use crate::transport::{normalize_base_url, summarize_response_body, ApiRequest};

/// Whether a failed create means "an AOI with this name already exists".
///
/// The provider has no dedicated error code for this: it answers 409, or 400
/// with a message mentioning the duplicate. This match is a heuristic over
/// that behaviour, not an exhaustive contract.
pub fn is_duplicate_response(status: u16, body: &str) -> bool {
    if status == 409 {
        return true;
    }
    if status != 400 {
        return false;
    }
    let lowered = body.to_ascii_lowercase();
    lowered.contains("already exists") || lowered.contains("duplicate")
}

#[derive(Debug, Clone)]
pub struct GeometryApi {
    http: HttpClient,
    base_url: String,
    key_header: String,
    api_key: String,
}

impl GeometryApi {
    pub fn new(http: HttpClient, base_url: &str, key_header: &str, api_key: &str) -> Self {
        Self {
            http,
            base_url: normalize_base_url(base_url),
            key_header: key_header.to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// All AOIs known to the provider (summary form).
    pub async fn list(&self) -> Result<Vec<RemoteAoi>, Error> {
        let req = ApiRequest::get(self.url("/geometry"))
            .query("detail", "false")
            .api_key(&self.key_header, &self.api_key);

        let aois: Vec<RemoteAoi> = self.http.call_json(req).await?;
        debug!("Listed {} remote AOIs", aois.len());
        Ok(aois)
    }

    /// Create an AOI and return its id.
    pub async fn create(&self, name: &str, geometry: &GeoPolygon) -> Result<String, Error> {
        let body = serde_json::to_value(CreateAoiRequest { name, geometry })?;
        let req = ApiRequest::post(self.url("/geometry"))
            .api_key(&self.key_header, &self.api_key)
            .json(body);

        let resp = self.http.call(req).await?;
        if is_duplicate_response(resp.status, &resp.body) {
            return Err(Error::DuplicateResource(format!(
                "{} (status={}): {}",
                name,
                resp.status,
                summarize_response_body(&resp.body)
            )));
        }

        let created: CreateAoiResponse = ensure_success(resp)?.json()?;
        info!("Created AOI {} for {}", created.id, name);
        Ok(created.id)
    }
}
