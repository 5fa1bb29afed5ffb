use crate::{Db, HostRow, PairAverage, SampleRow, ScanRunRow};
use anyhow::{bail, Result};

/// Cutoff timestamp for a lookback window ending at `now`. A negative window
/// is a caller bug and is rejected before any SQL runs.
fn window_cutoff(now: i64, window_secs: i64) -> Result<i64> {
    if window_secs < 0 {
        bail!("window must be non-negative, got {window_secs}");
    }
    Ok(now - window_secs)
}

impl Db {
    pub fn hosts(&self) -> Result<Vec<HostRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT address, last_seen FROM hosts ORDER BY address")?;
        let rows = stmt.query_map([], |r| {
            Ok(HostRow {
                address: r.get(0)?,
                last_seen: r.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn recent_scan_runs(&self, limit: i64) -> Result<Vec<ScanRunRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, started_at, ended_at, duration_secs
             FROM scan_runs ORDER BY run_id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map([limit], |r| {
            Ok(ScanRunRow {
                run_id: r.get(0)?,
                started_at: r.get(1)?,
                ended_at: r.get(2)?,
                duration_secs: r.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn recent_samples(&self, limit: i64) -> Result<Vec<SampleRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT sample_id, emitter_mac, observer_mac, rssi, estimated_distance, observed_at
             FROM samples ORDER BY sample_id DESC LIMIT ?",
        )?;
        let rows = stmt.query_map([limit], |r| {
            Ok(SampleRow {
                sample_id: r.get(0)?,
                emitter_mac: r.get(1)?,
                observer_mac: r.get(2)?,
                rssi: r.get(3)?,
                estimated_distance: r.get(4)?,
                observed_at: r.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Average rssi and distance per (emitter, observer) pair over samples
    /// newer than `now - window_secs`. Pairs with no rows in the window are
    /// absent from the result, never zero-valued.
    pub fn recent_pair_averages(&self, now: i64, window_secs: i64) -> Result<Vec<PairAverage>> {
        let cutoff = window_cutoff(now, window_secs)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT emitter_mac, observer_mac, AVG(rssi), AVG(estimated_distance)
             FROM samples WHERE observed_at > ?
             GROUP BY emitter_mac, observer_mac
             ORDER BY emitter_mac, observer_mac",
        )?;
        let rows = stmt.query_map([cutoff], map_pair_average)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Like [`recent_pair_averages`], but restricted to pairs whose observer
    /// is itself a known emitter, so the result covers distance between two
    /// managed beacons rather than to every nearby foreign radio. Known-
    /// emitter membership is all-time, not bounded by the window.
    ///
    /// [`recent_pair_averages`]: Db::recent_pair_averages
    pub fn beacon_pair_averages(&self, now: i64, window_secs: i64) -> Result<Vec<PairAverage>> {
        let cutoff = window_cutoff(now, window_secs)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT emitter_mac, observer_mac, AVG(rssi), AVG(estimated_distance)
             FROM samples WHERE observed_at > ?
               AND observer_mac IN (SELECT DISTINCT emitter_mac FROM samples)
             GROUP BY emitter_mac, observer_mac
             ORDER BY emitter_mac, observer_mac",
        )?;
        let rows = stmt.query_map([cutoff], map_pair_average)?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

fn map_pair_average(r: &rusqlite::Row<'_>) -> rusqlite::Result<PairAverage> {
    Ok(PairAverage {
        emitter_mac: r.get(0)?,
        observer_mac: r.get(1)?,
        avg_rssi: r.get(2)?,
        avg_distance: r.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewSample;

    fn ingest(db: &Db, emitter: &str, observer: &str, rssi: i64, dist: f64, at: i64) {
        db.insert_sample(&NewSample {
            emitter_mac: emitter.to_string(),
            observer_mac: observer.to_string(),
            rssi,
            estimated_distance: dist,
            observed_at: at,
        })
        .unwrap();
    }

    #[test]
    fn pair_averages_match_hand_computed() {
        let db = Db::open_in_memory().unwrap();
        ingest(&db, "A", "B", -40, 1.0, 100);
        ingest(&db, "A", "B", -60, 3.0, 101);

        let rows = db.recent_pair_averages(101, 60).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].emitter_mac, "A");
        assert_eq!(rows[0].observer_mac, "B");
        assert_eq!(rows[0].avg_rssi, -50.0);
        assert_eq!(rows[0].avg_distance, 2.0);
    }

    #[test]
    fn window_excludes_older_samples() {
        let db = Db::open_in_memory().unwrap();
        ingest(&db, "A", "B", -40, 1.0, 100);
        ingest(&db, "A", "B", -80, 9.0, 150);

        // cutoff is 100; the sample at exactly 100 falls outside
        let rows = db.recent_pair_averages(200, 100).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].avg_rssi, -80.0);
        assert_eq!(rows[0].avg_distance, 9.0);

        let rows = db.recent_pair_averages(500, 100).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn zero_window_matches_nothing() {
        let db = Db::open_in_memory().unwrap();
        ingest(&db, "A", "B", -40, 1.0, 100);
        assert!(db.recent_pair_averages(100, 0).unwrap().is_empty());
    }

    #[test]
    fn negative_window_rejected() {
        let db = Db::open_in_memory().unwrap();
        assert!(db.recent_pair_averages(100, -1).is_err());
        assert!(db.beacon_pair_averages(100, -1).is_err());
    }

    #[test]
    fn beacon_filter_excludes_unknown_observers() {
        let db = Db::open_in_memory().unwrap();
        // B has never reported as an emitter, so (A,B) is pair-visible only
        ingest(&db, "A", "B", -40, 1.0, 100);

        assert_eq!(db.recent_pair_averages(100, 60).unwrap().len(), 1);
        assert!(db.beacon_pair_averages(100, 60).unwrap().is_empty());

        // once B reports its own snapshot it counts as a managed beacon,
        // even when that report is outside the window
        ingest(&db, "B", "C", -50, 2.0, 5);
        let rows = db.beacon_pair_averages(100, 60).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].emitter_mac, "A");
        assert_eq!(rows[0].observer_mac, "B");
    }

    #[test]
    fn empty_store_returns_empty_everywhere() {
        let db = Db::open_in_memory().unwrap();
        assert!(db.hosts().unwrap().is_empty());
        assert!(db.recent_scan_runs(10).unwrap().is_empty());
        assert!(db.recent_samples(1000).unwrap().is_empty());
        assert!(db.recent_pair_averages(100, 60).unwrap().is_empty());
        assert!(db.beacon_pair_averages(100, 60).unwrap().is_empty());
    }

    #[test]
    fn recent_samples_newest_first_and_limited() {
        let db = Db::open_in_memory().unwrap();
        ingest(&db, "A", "B", -40, 1.0, 100);
        ingest(&db, "A", "B", -41, 1.1, 101);
        ingest(&db, "A", "B", -42, 1.2, 102);

        let rows = db.recent_samples(2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].observed_at, 102);
        assert_eq!(rows[1].observed_at, 101);
    }

    #[test]
    fn runs_newest_first() {
        let db = Db::open_in_memory().unwrap();
        db.append_scan_run(100, 110).unwrap();
        db.append_scan_run(200, 230).unwrap();
        let runs = db.recent_scan_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs[0].run_id > runs[1].run_id);
        assert_eq!(runs[0].started_at, 200);
    }
}
