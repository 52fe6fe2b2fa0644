//! Domain and wire types shared across the workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// `[lng, lat]`, GeoJSON order.
pub type Position = [f64; 2];

/// Smallest closed ring: three distinct vertices plus the closing position.
pub const MIN_RING_POSITIONS: usize = 4;

// ── Fields & geometry ─────────────────────────────────────────────────

/// A logical farm field as selected by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Field identifier; also the name of its remote AOI.
    pub id: String,
    /// Raw boundary points, possibly unclosed, possibly empty while loading.
    #[serde(default)]
    pub boundary: Vec<Position>,
}

impl Field {
    pub fn new(id: impl Into<String>, boundary: Vec<Position>) -> Self {
        Self {
            id: id.into(),
            boundary,
        }
    }
}

/// GeoJSON polygon with a single outer ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPolygon {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<Position>>,
}

impl GeoPolygon {
    /// Build a polygon from a field boundary, closing the ring if needed.
    ///
    /// Rejects rings with fewer than [`MIN_RING_POSITIONS`] positions, fewer
    /// than three distinct vertices, or non-finite coordinates.
    pub fn from_boundary(field_id: &str, boundary: &[Position]) -> Result<Self, Error> {
        let invalid = |reason: String| Error::InvalidGeometry {
            field: field_id.to_string(),
            reason,
        };

        if boundary
            .iter()
            .any(|p| !p[0].is_finite() || !p[1].is_finite())
        {
            return Err(invalid("boundary contains a non-finite coordinate".into()));
        }

        let mut ring = boundary.to_vec();
        if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
            if first != last {
                ring.push(first);
            }
        }

        if ring.len() < MIN_RING_POSITIONS {
            return Err(invalid(format!(
                "closed ring has {} positions, need at least {}",
                ring.len(),
                MIN_RING_POSITIONS
            )));
        }

        let mut distinct: Vec<Position> = Vec::new();
        for p in &ring[..ring.len() - 1] {
            if !distinct.contains(p) {
                distinct.push(*p);
            }
        }
        if distinct.len() < 3 {
            return Err(invalid(format!(
                "ring has {} distinct vertices, need at least 3",
                distinct.len()
            )));
        }

        Ok(Self {
            kind: "Polygon".into(),
            coordinates: vec![ring],
        })
    }

    /// The outer ring.
    pub fn ring(&self) -> &[Position] {
        self.coordinates.first().map(Vec::as_slice).unwrap_or(&[])
    }
}

// ── AOI records ───────────────────────────────────────────────────────

/// Reconciliation state of one field's AOI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AoiStatus {
    Unknown,
    Listed,
    Missing,
    Creating,
    Ready,
    Failed,
}

impl AoiStatus {
    /// Transition guard for the per-field state machine.
    pub fn can_transition_to(self, next: AoiStatus) -> bool {
        use AoiStatus::*;
        matches!(
            (self, next),
            (Unknown, Listed)
                | (Unknown, Missing)
                | (Listed, Ready)
                | (Missing, Creating)
                | (Missing, Failed)
                | (Creating, Ready)
                | (Creating, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AoiStatus::Unknown => "unknown",
            AoiStatus::Listed => "listed",
            AoiStatus::Missing => "missing",
            AoiStatus::Creating => "creating",
            AoiStatus::Ready => "ready",
            AoiStatus::Failed => "failed",
        }
    }
}

/// One reconciled remote AOI, as seen by consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AoiRecord {
    pub local_key: String,
    pub remote_id: Option<String>,
    /// Submitted geometry; absent when the id was adopted from a listing.
    pub geometry: Option<GeoPolygon>,
    pub status: AoiStatus,
    /// Last failure, for display.
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AoiRecord {
    pub fn new(local_key: impl Into<String>) -> Self {
        Self {
            local_key: local_key.into(),
            remote_id: None,
            geometry: None,
            status: AoiStatus::Unknown,
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == AoiStatus::Ready
    }
}

// ── Geometry provider wire types ──────────────────────────────────────

/// Entry from `GET /geometry?detail=false`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteAoi {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Body of `POST /geometry`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateAoiRequest<'a> {
    pub name: &'a str,
    pub geometry: &'a GeoPolygon,
}

/// Response of `POST /geometry`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAoiResponse {
    pub id: String,
}

// ── Weather forecast ──────────────────────────────────────────────────

/// One forecast step from `GET /weather/forecast`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ForecastPoint {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub dt: DateTime<Utc>,
    #[serde(default)]
    pub main: Option<ForecastMain>,
    #[serde(default)]
    pub weather: Vec<WeatherCondition>,
    #[serde(default)]
    pub wind: Option<Wind>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ForecastMain {
    /// Kelvin, as returned by the provider.
    pub temp: f64,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub pressure: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WeatherCondition {
    #[serde(default)]
    pub main: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Wind {
    pub speed: f64,
    #[serde(default)]
    pub deg: Option<f64>,
}

/// Forecast payload for one AOI.
pub type Forecast = Vec<ForecastPoint>;

// ── Auth & advisory ───────────────────────────────────────────────────

/// Response of `POST /auth/refresh`.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
}

/// Response of `GET /farm-advisory/{fieldId}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdvisoryResponse {
    #[serde(default)]
    pub advisories: Vec<Advisory>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Advisory {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub severity: Option<String>,
}
