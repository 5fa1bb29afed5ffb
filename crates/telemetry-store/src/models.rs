use serde::Serialize;

pub type RunId = i64;

/// A device address the scanner has confirmed responsive at least once.
#[derive(Debug, Clone, Serialize)]
pub struct HostRow {
    pub address: String,
    pub last_seen: i64,
}

/// One completed sweep, as recorded in the run log.
#[derive(Debug, Clone, Serialize)]
pub struct ScanRunRow {
    pub run_id: RunId,
    pub started_at: i64,
    pub ended_at: i64,
    pub duration_secs: i64,
}

/// One beacon observation. `emitter_mac` is the radio identity the polled
/// device reports as its own; `observer_mac` is the identity of whatever it
/// detected. A physical device can appear in both roles across rows.
#[derive(Debug, Clone, Serialize)]
pub struct SampleRow {
    pub sample_id: i64,
    pub emitter_mac: String,
    pub observer_mac: String,
    pub rssi: i64,
    pub estimated_distance: f64,
    pub observed_at: i64,
}

/// Observation ready for ingestion, before the store assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSample {
    pub emitter_mac: String,
    pub observer_mac: String,
    pub rssi: i64,
    pub estimated_distance: f64,
    pub observed_at: i64,
}

/// Mean signal strength and distance for one (emitter, observer) pair.
#[derive(Debug, Clone, Serialize)]
pub struct PairAverage {
    pub emitter_mac: String,
    pub observer_mac: String,
    pub avg_rssi: f64,
    pub avg_distance: f64,
}
