//! field-sync: keeps configured farm fields in sync with the geospatial
//! provider and reports their forecasts and advisories.
//!
//! Single-binary Tokio application that:
//! 1. Restores the saved session (renewing it on demand)
//! 2. Reconciles each field with its remote AOI
//! 3. Fetches the AOI forecast through the TTL cache
//! 4. Polls the farm advisory endpoint until advisories are ready

mod config;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use common::{AoiRecord, Field, Forecast};
use coordination::{AdvisoryWatcher, ForecastCacheController, PollConfig, PollOutcome, ResourceReconciler};
use farm_client::{
    AdvisoryApi, FileSessionStore, GeometryApi, HttpClient, RateLimiter, ReqwestTransport, Session,
    TokenRefreshCoordinator, Transport, WeatherApi,
};

/// Farm field AOI/forecast/advisory sync
#[derive(Parser)]
#[command(name = "field-sync", about = "Sync farm fields with their remote AOIs")]
struct Cli {
    /// Force a credential renewal, report the result, then exit.
    #[arg(long)]
    check_session: bool,

    /// Only process the configured field with this id.
    #[arg(long, value_name = "ID")]
    field: Option<String>,

    /// Skip advisory polling.
    #[arg(long)]
    no_poll: bool,
}

fn summarize_forecast(forecast: &Forecast) -> String {
    let Some(first) = forecast.first() else {
        return "no forecast points".into();
    };
    let temp = first
        .main
        .as_ref()
        .map(|m| format!("{:.1}K", m.temp))
        .unwrap_or_else(|| "n/a".into());
    let sky = first
        .weather
        .first()
        .map(|w| w.description.clone())
        .unwrap_or_else(|| "n/a".into());
    format!(
        "{} point(s); next at {}: {}, {}",
        forecast.len(),
        first.dt.format("%Y-%m-%d %H:%M UTC"),
        temp,
        sky
    )
}

fn log_record(record: &AoiRecord) {
    match (&record.remote_id, &record.error) {
        (Some(id), _) => info!("{} -> {} ({})", record.local_key, id, record.status.as_str()),
        (None, Some(err)) => warn!("{} ({}): {}", record.local_key, record.status.as_str(), err),
        (None, None) => info!("{} ({})", record.local_key, record.status.as_str()),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "field_sync=info,farm_client=info,coordination=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    info!("field-sync starting up...");

    let cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!("Primary API: {}", cfg.api_base_url);
    info!("Geospatial API: {}", cfg.geo_base_url);
    info!(
        "Fields: {:?}",
        cfg.fields.iter().map(|f| &f.id).collect::<Vec<_>>()
    );

    let transport: Arc<dyn Transport> = match ReqwestTransport::new(&cfg) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            error!("Failed to build HTTP transport: {}", e);
            std::process::exit(1);
        }
    };
    let store = Arc::new(FileSessionStore::new(&cfg.session_path));
    let session_file = store.path().display().to_string();
    let session = match Session::restore(store) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to restore session from {}: {}", session_file, e);
            std::process::exit(1);
        }
    };
    if !session.is_authenticated().await {
        warn!("No saved credential; the first API call will trigger a renewal");
    }

    let refresher = Arc::new(TokenRefreshCoordinator::new(
        transport.clone(),
        session.clone(),
        &cfg.api_base_url,
    ));

    if cli.check_session {
        match refresher.renew_now().await {
            Ok(_) => {
                info!("Session renewed and saved to {}", session_file);
                return;
            }
            Err(e) => {
                error!("Session check failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let http = HttpClient::new(
        transport,
        session,
        refresher,
        RateLimiter::with_limit(cfg.http.requests_per_second),
    );

    let fields: Vec<Field> = cfg
        .fields
        .iter()
        .filter(|f| cli.field.as_deref().map_or(true, |id| f.id == id))
        .map(Field::from)
        .collect();
    if fields.is_empty() {
        error!(
            "No configured field matches {}",
            cli.field.as_deref().unwrap_or("(any)")
        );
        std::process::exit(1);
    }

    let reconciler = ResourceReconciler::new(
        GeometryApi::new(
            http.clone(),
            &cfg.geo_base_url,
            &cfg.geo_api_key_header,
            &cfg.geo_api_key,
        ),
        Duration::from_millis(cfg.reconcile.in_progress_clear_ms),
    );
    let forecasts = Arc::new(ForecastCacheController::new(
        WeatherApi::new(
            http.clone(),
            &cfg.geo_base_url,
            &cfg.geo_api_key_header,
            &cfg.geo_api_key,
        ),
        Duration::from_secs(cfg.forecast.ttl_secs),
    ));
    let watcher = AdvisoryWatcher::new(
        AdvisoryApi::new(http, &cfg.api_base_url),
        PollConfig::from(&cfg.advisory),
    );

    let mut ready: Vec<(String, String)> = Vec::new();
    for field in &fields {
        match reconciler.ensure(field).await {
            Ok(record) => {
                log_record(&record);
                if let (true, Some(remote_id)) = (record.is_ready(), record.remote_id) {
                    ready.push((field.id.clone(), remote_id));
                }
            }
            Err(e) if e.is_renewal_failure() => {
                error!("Session could not be renewed: {}", e);
                std::process::exit(1);
            }
            Err(e) => warn!("Field {} not reconciled: {}", field.id, e),
        }
    }

    for (field_id, aoi_id) in &ready {
        match forecasts.fetch(aoi_id).await {
            Ok(forecast) => info!("Forecast for {}: {}", field_id, summarize_forecast(&forecast)),
            Err(e) => warn!("Forecast for {} unavailable: {}", field_id, e),
        }
    }

    if cli.no_poll {
        info!("Advisory polling skipped");
        return;
    }

    for (field_id, _) in &ready {
        let Some(handle) = watcher.watch(field_id) else {
            continue;
        };
        tokio::select! {
            joined = handle => match joined {
                Ok(PollOutcome::Completed { value, attempts }) => {
                    info!("{} advisories for {} after {} attempt(s)", value.len(), field_id, attempts);
                    for advisory in value {
                        info!(
                            "  [{}] {}",
                            advisory.severity.as_deref().unwrap_or("info"),
                            advisory.title.as_deref().unwrap_or(&advisory.message)
                        );
                    }
                }
                Ok(PollOutcome::Exhausted { attempts }) => {
                    info!("Advisories for {} not ready after {} attempt(s)", field_id, attempts)
                }
                Ok(PollOutcome::Cancelled { .. }) => {}
                Err(e) => warn!("Advisory watch for {} ended abnormally: {}", field_id, e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping advisory polling");
                watcher.teardown();
                break;
            }
        }
    }
    watcher.teardown();

    for record in reconciler.records() {
        log_record(&record);
    }
    info!("field-sync finished");
}
