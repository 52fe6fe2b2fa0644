//! Weather forecast endpoint of the geospatial provider.

use common::{Error, Forecast};
use tracing::debug;

use crate::rest::HttpClient;
use crate::transport::{normalize_base_url, ApiRequest};

#[derive(Debug, Clone)]
pub struct WeatherApi {
    http: HttpClient,
    base_url: String,
    key_header: String,
    api_key: String,
}

impl WeatherApi {
    pub fn new(http: HttpClient, base_url: &str, key_header: &str, api_key: &str) -> Self {
        Self {
            http,
            base_url: normalize_base_url(base_url),
            key_header: key_header.to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Forecast for one AOI.
    pub async fn forecast(&self, geometry_id: &str) -> Result<Forecast, Error> {
        let req = ApiRequest::get(format!("{}/weather/forecast", self.base_url))
            .query("geometry_id", geometry_id)
            .api_key(&self.key_header, &self.api_key);

        let forecast: Forecast = self.http.call_json(req).await?;
        debug!("Got {} forecast points for AOI {}", forecast.len(), geometry_id);
        Ok(forecast)
    }
}
