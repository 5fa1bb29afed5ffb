//! HTTP trigger surface. An external scheduler (cron + curl) drives the
//! pipeline through these GET endpoints; nothing here loops or schedules.

use crate::config::Config;
use anyhow::{bail, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::Ipv4Addr;
use subnet_scan::ScanOptions;
use telemetry_poll::PollOptions;
use telemetry_store::{Db, SampleRow};
use tracing::{error, info};

/// Runtime parameters the handlers run with, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub range: String,
    pub scan: ScanOptions,
    pub poll: PollOptions,
    pub recent_window_secs: i64,
    pub beacon_window_secs: i64,
}

impl Settings {
    /// Overlay config file sections on the built-in defaults.
    pub fn from_config(cfg: Option<&Config>) -> Self {
        let mut settings = Settings {
            range: crate::DEFAULT_RANGE.to_string(),
            scan: ScanOptions::default(),
            poll: PollOptions::default(),
            recent_window_secs: crate::DEFAULT_RECENT_WINDOW_SECS,
            beacon_window_secs: crate::DEFAULT_BEACON_WINDOW_SECS,
        };
        if let Some(cfg) = cfg {
            if let Some(s) = &cfg.scan {
                if let Some(v) = &s.range { settings.range = v.clone(); }
                if let Some(v) = s.port { settings.scan.port = v; }
                if let Some(v) = &s.path { settings.scan.telemetry_path = v.clone(); }
                if let Some(v) = s.connect_timeout_ms { settings.scan.connect_timeout_ms = v; }
                if let Some(v) = s.timeout_ms { settings.scan.timeout_ms = v; }
                if let Some(v) = s.concurrency { settings.scan.concurrency = v; }
                if let Some(v) = s.qps { settings.scan.qps = if v == 0 { None } else { Some(v) }; }
            }
            if let Some(p) = &cfg.poll {
                if let Some(v) = &p.path { settings.poll.telemetry_path = v.clone(); }
                if let Some(v) = p.connect_timeout_ms { settings.poll.connect_timeout_ms = v; }
                if let Some(v) = p.timeout_ms { settings.poll.timeout_ms = v; }
                if let Some(v) = p.concurrency { settings.poll.concurrency = v; }
                if let Some(v) = &p.log { settings.poll.log_path = v.clone(); }
            }
            if let Some(r) = &cfg.report {
                if let Some(v) = r.recent_window_secs { settings.recent_window_secs = v; }
                if let Some(v) = r.beacon_window_secs { settings.beacon_window_secs = v; }
            }
        }
        settings
    }
}

#[derive(Clone)]
struct AppState {
    db: Db,
    settings: Settings,
    addrs: Vec<Ipv4Addr>,
}

/// Bind and serve until the process is killed. The range and windows are
/// validated here so every later request runs with known-good parameters.
pub async fn serve(listen: &str, db: Db, settings: Settings) -> Result<()> {
    let addrs = subnet_scan::expand_cidr(&settings.range)?;
    if settings.recent_window_secs < 0 || settings.beacon_window_secs < 0 {
        bail!("aggregation windows must be non-negative");
    }
    let state = AppState { db, settings, addrs };
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/scan", get(scan_handler))
        .route("/poll", get(poll_handler))
        .route("/data", get(data_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

fn internal_error(e: anyhow::Error) -> (StatusCode, Json<Value>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() })))
}

async fn scan_handler(State(state): State<AppState>) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match subnet_scan::run(&state.db, state.addrs.clone(), &state.settings.scan).await {
        Ok(summary) => {
            info!(run_id = summary.run_id, probed = summary.probed, responsive = summary.responsive, "sweep finished");
            Ok(Json(json!({ "status": "success" })))
        }
        Err(e) => {
            error!(error = %e, "sweep failed");
            Err(internal_error(e))
        }
    }
}

async fn poll_handler(State(state): State<AppState>) -> Result<Json<Vec<SampleRow>>, (StatusCode, Json<Value>)> {
    let report = match telemetry_poll::run(&state.db, &state.settings.poll).await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "poll failed");
            return Err(internal_error(e));
        }
    };
    info!(polled = report.polled, ingested = report.ingested, skipped = report.skipped.len(), "poll finished");
    let samples = state.db.recent_samples(1000).map_err(|e| {
        error!(error = %e, "sample query failed");
        internal_error(e)
    })?;
    Ok(Json(samples))
}

/// The combined report. Each section degrades to an empty list on its own
/// query failure so one broken query never blanks the other three.
async fn data_handler(State(state): State<AppState>) -> Json<Value> {
    let now = crate::now_unix();
    let hosts = state.db.hosts().unwrap_or_else(|e| {
        error!(error = %e, "host query failed");
        Vec::new()
    });
    let runs = state.db.recent_scan_runs(10).unwrap_or_else(|e| {
        error!(error = %e, "run query failed");
        Vec::new()
    });
    let recent = state
        .db
        .recent_pair_averages(now, state.settings.recent_window_secs)
        .unwrap_or_else(|e| {
            error!(error = %e, "pair average query failed");
            Vec::new()
        });
    let beacons = state
        .db
        .beacon_pair_averages(now, state.settings.beacon_window_secs)
        .unwrap_or_else(|e| {
            error!(error = %e, "beacon average query failed");
            Vec::new()
        });
    Json(json!({
        "ipData": hosts,
        "runtimeData": runs,
        "avgDistanceData": recent,
        "beaconAvgDistanceData": beacons,
    }))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
