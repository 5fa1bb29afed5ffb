pub const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE hosts (
  address         TEXT PRIMARY KEY,
  last_seen       INTEGER NOT NULL
);

CREATE TABLE scan_runs (
  run_id          INTEGER PRIMARY KEY AUTOINCREMENT,
  started_at      INTEGER NOT NULL,
  ended_at        INTEGER NOT NULL,
  duration_secs   INTEGER NOT NULL
);

CREATE TABLE samples (
  sample_id           INTEGER PRIMARY KEY AUTOINCREMENT,
  emitter_mac         TEXT NOT NULL,
  observer_mac        TEXT NOT NULL,
  rssi                INTEGER NOT NULL,
  estimated_distance  REAL NOT NULL,
  observed_at         INTEGER NOT NULL,
  UNIQUE (emitter_mac, observer_mac, observed_at)
);

CREATE INDEX idx_samples_observed ON samples(observed_at);

COMMIT;
"#;
