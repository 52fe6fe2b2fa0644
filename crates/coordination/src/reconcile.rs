//! AOI reconciliation.
//!
//! Each field must end up with exactly one remote AOI named after its id.
//! The remote store is listed once per session; a field missing from it is
//! created at most once per session, however many times and however
//! concurrently `ensure` runs for it.
//!
//! Per-field state lives in one arena behind a synchronous mutex. The
//! decision to create (check attempted, mark attempted, mark in progress)
//! happens inside a single critical section before the create call is
//! issued, so an interleaved `ensure` always observes the mark.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use common::{AoiRecord, AoiStatus, Error, Field, GeoPolygon};
use farm_client::GeometryApi;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct ReconcileState {
    /// Remote AOI name → id, from the session listing.
    remote_index: HashMap<String, String>,
    records: HashMap<String, AoiRecord>,
    /// Fields whose creation was attempted this session. Only grows.
    attempted: HashSet<String>,
    /// Fields with a create call in flight (cleared shortly after it settles).
    in_progress: HashSet<String>,
}

fn lock(state: &Mutex<ReconcileState>) -> MutexGuard<'_, ReconcileState> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

/// Move `record` to `next` if the transition is allowed.
fn advance(record: &mut AoiRecord, next: AoiStatus) -> bool {
    if !record.status.can_transition_to(next) {
        warn!(
            "Ignoring AOI transition {} -> {} for {}",
            record.status.as_str(),
            next.as_str(),
            record.local_key
        );
        return false;
    }
    record.status = next;
    record.updated_at = Utc::now();
    true
}

/// Adopt a known remote id for a record that has not started creating.
fn adopt(record: &mut AoiRecord, remote_id: &str) {
    if record.status == AoiStatus::Unknown {
        advance(record, AoiStatus::Listed);
    }
    if advance(record, AoiStatus::Ready) {
        record.remote_id = Some(remote_id.to_string());
        record.error = None;
    }
}

pub struct ResourceReconciler {
    geometry: GeometryApi,
    state: Arc<Mutex<ReconcileState>>,
    /// `true` once this session's listing succeeded. Held across the list
    /// call so concurrent first callers share one request.
    listed: tokio::sync::Mutex<bool>,
    in_progress_clear_delay: Duration,
}

impl ResourceReconciler {
    pub fn new(geometry: GeometryApi, in_progress_clear_delay: Duration) -> Self {
        Self {
            geometry,
            state: Arc::new(Mutex::new(ReconcileState::default())),
            listed: tokio::sync::Mutex::new(false),
            in_progress_clear_delay,
        }
    }

    /// Make sure `field` has a remote AOI.
    ///
    /// The call that performs a failing attempt returns the error. Any other
    /// call returns the field's current record; for an attempted field that
    /// may be `creating` or `failed` (with its error text).
    pub async fn ensure(&self, field: &Field) -> Result<AoiRecord, Error> {
        if let Some(record) = self.record(&field.id) {
            if record.is_ready() {
                return Ok(record);
            }
        }

        self.ensure_listed().await?;

        let polygon = {
            let mut guard = lock(&self.state);
            let ReconcileState {
                remote_index,
                records,
                attempted,
                in_progress,
            } = &mut *guard;

            let record = records
                .entry(field.id.clone())
                .or_insert_with(|| AoiRecord::new(field.id.clone()));

            if record.is_ready() {
                return Ok(record.clone());
            }

            if let Some(remote_id) = remote_index.get(&field.id) {
                if matches!(record.status, AoiStatus::Unknown | AoiStatus::Listed) {
                    adopt(record, remote_id);
                    info!("Field {} matched existing AOI {}", field.id, remote_id);
                }
                return Ok(record.clone());
            }

            if attempted.contains(&field.id) || in_progress.contains(&field.id) {
                debug!(
                    "Field {} already attempted ({}); not creating again",
                    field.id,
                    record.status.as_str()
                );
                return Ok(record.clone());
            }

            if record.status == AoiStatus::Failed {
                // Failed in an earlier pass; this pass gets one fresh attempt.
                *record = AoiRecord::new(field.id.clone());
            }
            if !advance(record, AoiStatus::Missing) {
                return Ok(record.clone());
            }
            attempted.insert(field.id.clone());

            match GeoPolygon::from_boundary(&field.id, &field.boundary) {
                Ok(polygon) => {
                    if !advance(record, AoiStatus::Creating) {
                        return Ok(record.clone());
                    }
                    in_progress.insert(field.id.clone());
                    record.geometry = Some(polygon.clone());
                    polygon
                }
                Err(e) => {
                    advance(record, AoiStatus::Failed);
                    record.error = Some(e.to_string());
                    warn!("{}", e);
                    return Err(e);
                }
            }
        };

        // Detached so the record settles and the marker clears even if this
        // caller is dropped mid-request.
        let task = tokio::spawn(create_and_settle(
            self.geometry.clone(),
            Arc::clone(&self.state),
            self.in_progress_clear_delay,
            field.id.clone(),
            polygon,
        ));
        task.await.unwrap_or_else(|e| {
            Err(Error::Other(format!(
                "AOI creation for {} ended abnormally: {}",
                field.id, e
            )))
        })
    }

    /// Snapshot of one field's record.
    pub fn record(&self, field_id: &str) -> Option<AoiRecord> {
        lock(&self.state).records.get(field_id).cloned()
    }

    /// Snapshot of every record, ordered by field id.
    pub fn records(&self) -> Vec<AoiRecord> {
        let mut all: Vec<AoiRecord> = lock(&self.state).records.values().cloned().collect();
        all.sort_by(|a, b| a.local_key.cmp(&b.local_key));
        all
    }

    /// Remote AOI id of a ready field.
    pub fn remote_id(&self, field_id: &str) -> Option<String> {
        self.record(field_id)
            .filter(AoiRecord::is_ready)
            .and_then(|r| r.remote_id)
    }

    pub fn was_attempted(&self, field_id: &str) -> bool {
        lock(&self.state).attempted.contains(field_id)
    }

    pub fn is_in_progress(&self, field_id: &str) -> bool {
        lock(&self.state).in_progress.contains(field_id)
    }

    /// Start a fresh reconciliation pass.
    ///
    /// Forgets the listing, the attempted set, and records that are neither
    /// ready nor creating. In-progress markers survive, so a create still in
    /// flight from the previous pass is not issued a second time.
    pub async fn begin_new_session(&self) {
        let mut listed = self.listed.lock().await;
        *listed = false;

        let mut guard = lock(&self.state);
        guard.remote_index.clear();
        guard.attempted.clear();
        guard
            .records
            .retain(|_, r| matches!(r.status, AoiStatus::Ready | AoiStatus::Creating));
        info!(
            "Started new reconciliation session ({} record(s) kept, {} in progress)",
            guard.records.len(),
            guard.in_progress.len()
        );
    }

    async fn ensure_listed(&self) -> Result<(), Error> {
        let mut listed = self.listed.lock().await;
        if *listed {
            return Ok(());
        }

        let remote = self.geometry.list().await?;
        let mut guard = lock(&self.state);
        for aoi in remote {
            guard.remote_index.insert(aoi.name, aoi.id);
        }
        *listed = true;
        debug!("Indexed {} remote AOI name(s)", guard.remote_index.len());
        Ok(())
    }
}

async fn create_and_settle(
    geometry: GeometryApi,
    state: Arc<Mutex<ReconcileState>>,
    in_progress_clear_delay: Duration,
    field_id: String,
    polygon: GeoPolygon,
) -> Result<AoiRecord, Error> {
    let result = match geometry.create(&field_id, &polygon).await {
        Err(Error::DuplicateResource(detail)) => {
            info!("AOI for {} already exists ({}); re-listing", field_id, detail);
            relist_for(&geometry, &state, &field_id).await
        }
        other => other,
    };

    schedule_in_progress_clear(&state, &field_id, in_progress_clear_delay);

    let mut guard = lock(&state);
    let ReconcileState {
        remote_index,
        records,
        ..
    } = &mut *guard;
    let record = records
        .entry(field_id.clone())
        .or_insert_with(|| AoiRecord::new(field_id.clone()));

    match result {
        Ok(remote_id) => {
            if advance(record, AoiStatus::Ready) {
                record.remote_id = Some(remote_id.clone());
                record.error = None;
            }
            remote_index.insert(field_id, remote_id);
            Ok(record.clone())
        }
        Err(e) => {
            advance(record, AoiStatus::Failed);
            record.error = Some(e.to_string());
            warn!("Creating AOI for {} failed: {}", field_id, e);
            Err(e)
        }
    }
}

/// Re-list after a duplicate response and return the existing id.
async fn relist_for(
    geometry: &GeometryApi,
    state: &Mutex<ReconcileState>,
    field_id: &str,
) -> Result<String, Error> {
    let remote = geometry.list().await?;
    let mut guard = lock(state);
    for aoi in remote {
        guard.remote_index.insert(aoi.name, aoi.id);
    }
    guard.remote_index.get(field_id).cloned().ok_or_else(|| {
        Error::DuplicateResource(format!(
            "provider reported {field_id} as duplicate but it is not in the listing"
        ))
    })
}

fn schedule_in_progress_clear(state: &Arc<Mutex<ReconcileState>>, field_id: &str, delay: Duration) {
    if delay.is_zero() {
        lock(state).in_progress.remove(field_id);
        return;
    }
    let state = Arc::clone(state);
    let id = field_id.to_string();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        lock(&state).in_progress.remove(&id);
    });
}
