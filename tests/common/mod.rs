//! Shared fixtures for the integration suites: persisted visits, trips,
//! linked chains, and the cross-cutting invariant checks.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};

use trailkeeper::store::queries;
use trailkeeper::{
    ActivityType, Database, LocomotionSample, RecordingState, TimelineItemBase, TimelineItemTrip,
    TimelineItemVisit,
};

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// Persist a visit with samples parked on its center.
pub fn save_visit(
    db: &Database,
    start: i64,
    end: i64,
    lat: f64,
    lon: f64,
    radius: f64,
    sample_times: &[i64],
) -> String {
    let base = TimelineItemBase::new(true, at(start), at(end));
    db.write(|scope| {
        queries::save_base(scope, &base)?;
        queries::save_visit(
            scope,
            &TimelineItemVisit {
                item_id: base.id.clone(),
                latitude: lat,
                longitude: lon,
                radius,
            },
        )?;
        for t in sample_times {
            let sample = LocomotionSample::new(at(*t), RecordingState::Recording)
                .with_coordinate(lat, lon)
                .with_item(&base.id);
            queries::save_sample(scope, &sample)?;
        }
        Ok(())
    })
    .unwrap();
    base.id
}

/// Persist a trip with explicit samples.
pub fn save_trip(
    db: &Database,
    start: i64,
    end: i64,
    distance: Option<f64>,
    speed: Option<f64>,
    activity: Option<ActivityType>,
    samples: Vec<LocomotionSample>,
) -> String {
    let base = TimelineItemBase::new(false, at(start), at(end));
    db.write(|scope| {
        queries::save_base(scope, &base)?;
        queries::save_trip(
            scope,
            &TimelineItemTrip {
                item_id: base.id.clone(),
                distance,
                speed,
                classified_activity_type: activity,
                confirmed_activity_type: None,
            },
        )?;
        for sample in &samples {
            let mut sample = sample.clone();
            sample.timeline_item_id = Some(base.id.clone());
            queries::save_sample(scope, &sample)?;
        }
        Ok(())
    })
    .unwrap();
    base.id
}

/// Chain items left to right; the link triggers mirror the back pointers.
pub fn link_chain(db: &Database, ids: &[&str]) {
    db.write(|scope| {
        for pair in ids.windows(2) {
            let mut base = queries::get_base(scope.conn(), pair[0])?.unwrap();
            base.next_item_id = Some(pair[1].to_string());
            queries::save_base(scope, &base)?;
        }
        Ok(())
    })
    .unwrap();
}

pub fn live_item_count(db: &Database) -> i64 {
    db.read(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM timeline_item_base WHERE deleted = 0",
            [],
            |row| row.get::<_, i64>(0),
        )?)
    })
    .unwrap()
}

/// Route tracing output through the test harness when a test opts in.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn sample_owner(db: &Database, sample_id: &str) -> Option<String> {
    db.read(|conn| {
        Ok(conn.query_row(
            "SELECT timeline_item_id FROM samples WHERE id = ?1",
            [sample_id],
            |row| row.get(0),
        )?)
    })
    .unwrap()
}

struct BaseRow {
    id: String,
    start_date: String,
    end_date: String,
    source: String,
    previous_item_id: Option<String>,
    next_item_id: Option<String>,
    deleted: bool,
}

/// The cross-cutting structural invariants: every live sample has a live
/// owner, links are symmetric and same-source, and neighbours do not
/// overlap.
pub fn assert_invariants(db: &Database) {
    db.read(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, start_date, end_date, source, previous_item_id, next_item_id, deleted \
             FROM timeline_item_base",
        )?;
        let bases: Vec<BaseRow> = stmt
            .query_map([], |row| {
                Ok(BaseRow {
                    id: row.get(0)?,
                    start_date: row.get(1)?,
                    end_date: row.get(2)?,
                    source: row.get(3)?,
                    previous_item_id: row.get(4)?,
                    next_item_id: row.get(5)?,
                    deleted: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let by_id: std::collections::HashMap<&str, &BaseRow> =
            bases.iter().map(|b| (b.id.as_str(), b)).collect();

        // P1: every enabled sample refers to an existing, non-deleted base.
        let mut stmt =
            conn.prepare("SELECT id, timeline_item_id, disabled FROM samples")?;
        let samples: Vec<(String, Option<String>, bool)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (sample_id, owner, disabled) in &samples {
            if *disabled {
                continue;
            }
            let owner = owner
                .as_deref()
                .unwrap_or_else(|| panic!("sample {sample_id} has no owner"));
            let base = by_id
                .get(owner)
                .unwrap_or_else(|| panic!("sample {sample_id} owned by missing item {owner}"));
            assert!(!base.deleted, "sample {sample_id} owned by deleted item {owner}");
        }

        // P2 + P3 + P4 over live links.
        for base in bases.iter().filter(|b| !b.deleted) {
            if let Some(next_id) = &base.next_item_id {
                let next = by_id
                    .get(next_id.as_str())
                    .unwrap_or_else(|| panic!("{} links to missing {next_id}", base.id));
                assert!(!next.deleted, "{} links to deleted {next_id}", base.id);
                assert_eq!(base.source, next.source, "cross-source link at {}", base.id);
                assert_eq!(
                    next.previous_item_id.as_deref(),
                    Some(base.id.as_str()),
                    "asymmetric link {} -> {next_id}",
                    base.id
                );
                assert!(
                    base.end_date <= next.start_date,
                    "items {} and {next_id} overlap after processing",
                    base.id
                );
            }
            if let Some(previous_id) = &base.previous_item_id {
                let previous = by_id
                    .get(previous_id.as_str())
                    .unwrap_or_else(|| panic!("{} links to missing {previous_id}", base.id));
                assert!(!previous.deleted, "{} links to deleted {previous_id}", base.id);
                assert_eq!(
                    previous.next_item_id.as_deref(),
                    Some(base.id.as_str()),
                    "asymmetric link {} -> {previous_id}",
                    base.id
                );
            }
        }
        Ok(())
    })
    .unwrap();
}
