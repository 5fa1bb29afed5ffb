use crate::{Db, NewSample, RunId};
use anyhow::Result;
use rusqlite::params;

impl Db {
    /// Record that a host answered a probe. `last_seen` only moves forward,
    /// so overlapping sweeps cannot roll a host back in time.
    pub fn upsert_host(&self, address: &str, last_seen: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO hosts(address, last_seen) VALUES (?,?)
             ON CONFLICT(address) DO UPDATE SET last_seen = MAX(hosts.last_seen, excluded.last_seen)",
            params![address, last_seen],
        )?;
        Ok(())
    }

    pub fn append_scan_run(&self, started_at: i64, ended_at: i64) -> Result<RunId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scan_runs(started_at, ended_at, duration_secs) VALUES (?,?,?)",
            params![started_at, ended_at, ended_at - started_at],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Ingest one observation. Returns false when the store already holds a
    /// sample with the same (emitter, observer, observed_at) triple.
    pub fn insert_sample(&self, s: &NewSample) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO samples(emitter_mac, observer_mac, rssi, estimated_distance, observed_at)
             VALUES (?,?,?,?,?)",
            params![
                s.emitter_mac,
                s.observer_mac,
                s.rssi,
                s.estimated_distance,
                s.observed_at
            ],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(emitter: &str, observer: &str, at: i64) -> NewSample {
        NewSample {
            emitter_mac: emitter.to_string(),
            observer_mac: observer.to_string(),
            rssi: -61,
            estimated_distance: 2.4,
            observed_at: at,
        }
    }

    #[test]
    fn duplicate_sample_is_ignored() {
        let db = Db::open_in_memory().unwrap();
        let s = sample("aa:bb", "cc:dd", 1000);
        assert!(db.insert_sample(&s).unwrap());
        assert!(!db.insert_sample(&s).unwrap());
        assert_eq!(db.recent_samples(10).unwrap().len(), 1);
    }

    #[test]
    fn same_pair_different_time_is_new() {
        let db = Db::open_in_memory().unwrap();
        assert!(db.insert_sample(&sample("aa:bb", "cc:dd", 1000)).unwrap());
        assert!(db.insert_sample(&sample("aa:bb", "cc:dd", 1001)).unwrap());
        assert_eq!(db.recent_samples(10).unwrap().len(), 2);
    }

    #[test]
    fn last_seen_never_regresses() {
        let db = Db::open_in_memory().unwrap();
        db.upsert_host("192.168.1.31", 500).unwrap();
        db.upsert_host("192.168.1.31", 400).unwrap();
        let hosts = db.hosts().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].last_seen, 500);

        db.upsert_host("192.168.1.31", 600).unwrap();
        assert_eq!(db.hosts().unwrap()[0].last_seen, 600);
    }

    #[test]
    fn scan_run_duration_matches_bounds() {
        let db = Db::open_in_memory().unwrap();
        let id = db.append_scan_run(1_700_000_000, 1_700_000_042).unwrap();
        let runs = db.recent_scan_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, id);
        assert_eq!(runs[0].duration_secs, 42);
        assert_eq!(runs[0].duration_secs, runs[0].ended_at - runs[0].started_at);
    }
}
