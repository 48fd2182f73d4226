//! Typed queries over the timeline schema.
//!
//! Dates persist as fixed-width RFC3339 UTC strings so string ordering
//! matches chronological ordering for the indexed range scans.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::models::{
    ActivityType, DateInterval, LocomotionSample, RecordingState, TimelineItem, TimelineItemBase,
    TimelineItemTrip, TimelineItemVisit,
};
use crate::store::{Database, WriteScope};

pub(crate) fn fmt_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_date(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_activity(raw: Option<String>) -> Option<ActivityType> {
    raw.as_deref().and_then(ActivityType::parse)
}

const BASE_COLUMNS: &str = "id, is_visit, start_date, end_date, source, previous_item_id, \
     next_item_id, disabled, deleted, samples_changed";

fn base_from_row(row: &Row<'_>) -> rusqlite::Result<TimelineItemBase> {
    Ok(TimelineItemBase {
        id: row.get(0)?,
        is_visit: row.get(1)?,
        start_date: parse_date(2, row.get(2)?)?,
        end_date: parse_date(3, row.get(3)?)?,
        source: row.get(4)?,
        previous_item_id: row.get(5)?,
        next_item_id: row.get(6)?,
        disabled: row.get(7)?,
        deleted: row.get(8)?,
        samples_changed: row.get(9)?,
    })
}

const SAMPLE_COLUMNS: &str = "id, date, latitude, longitude, horizontal_accuracy, speed, course, \
     altitude, recording_state, classified_activity_type, confirmed_activity_type, \
     timeline_item_id, disabled";

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<LocomotionSample> {
    let state: String = row.get(8)?;
    Ok(LocomotionSample {
        id: row.get(0)?,
        date: parse_date(1, row.get(1)?)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        horizontal_accuracy: row.get(4)?,
        speed: row.get(5)?,
        course: row.get(6)?,
        altitude: row.get(7)?,
        recording_state: RecordingState::parse(&state).unwrap_or(RecordingState::Off),
        classified_activity_type: parse_activity(row.get(9)?),
        confirmed_activity_type: parse_activity(row.get(10)?),
        timeline_item_id: row.get(11)?,
        disabled: row.get(12)?,
    })
}

pub fn get_base(conn: &Connection, id: &str) -> Result<Option<TimelineItemBase>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {BASE_COLUMNS} FROM timeline_item_base WHERE id = ?1"
    ))?;
    Ok(stmt.query_row(params![id], base_from_row).optional()?)
}

fn get_visit(conn: &Connection, item_id: &str) -> Result<Option<TimelineItemVisit>> {
    let mut stmt = conn.prepare_cached(
        "SELECT item_id, latitude, longitude, radius FROM timeline_item_visit WHERE item_id = ?1",
    )?;
    Ok(stmt
        .query_row(params![item_id], |row| {
            Ok(TimelineItemVisit {
                item_id: row.get(0)?,
                latitude: row.get(1)?,
                longitude: row.get(2)?,
                radius: row.get(3)?,
            })
        })
        .optional()?)
}

fn get_trip(conn: &Connection, item_id: &str) -> Result<Option<TimelineItemTrip>> {
    let mut stmt = conn.prepare_cached(
        "SELECT item_id, distance, speed, classified_activity_type, confirmed_activity_type \
         FROM timeline_item_trip WHERE item_id = ?1",
    )?;
    Ok(stmt
        .query_row(params![item_id], |row| {
            Ok(TimelineItemTrip {
                item_id: row.get(0)?,
                distance: row.get(1)?,
                speed: row.get(2)?,
                classified_activity_type: parse_activity(row.get(3)?),
                confirmed_activity_type: parse_activity(row.get(4)?),
            })
        })
        .optional()?)
}

/// Fetch an item with its visit/trip extension joined in. Samples stay
/// unhydrated.
pub fn get_item(conn: &Connection, id: &str) -> Result<Option<TimelineItem>> {
    let Some(base) = get_base(conn, id)? else {
        return Ok(None);
    };
    let visit = if base.is_visit { get_visit(conn, id)? } else { None };
    let trip = if base.is_visit { None } else { get_trip(conn, id)? };
    Ok(Some(TimelineItem {
        base,
        visit,
        trip,
        samples: None,
    }))
}

/// Live items whose date range overlaps the interval, ordered by
/// `end_date` descending.
pub fn items_overlapping(conn: &Connection, range: &DateInterval) -> Result<Vec<TimelineItem>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {BASE_COLUMNS} FROM timeline_item_base \
         WHERE deleted = 0 AND end_date >= ?1 AND start_date <= ?2 \
         ORDER BY end_date DESC"
    ))?;
    let bases = stmt
        .query_map(params![fmt_date(range.start), fmt_date(range.end)], base_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut items = Vec::with_capacity(bases.len());
    for base in bases {
        let visit = if base.is_visit { get_visit(conn, &base.id)? } else { None };
        let trip = if base.is_visit { None } else { get_trip(conn, &base.id)? };
        items.push(TimelineItem {
            base,
            visit,
            trip,
            samples: None,
        });
    }
    Ok(items)
}

/// Samples assigned to an item, ordered by date ascending.
pub fn samples_for_item(conn: &Connection, item_id: &str) -> Result<Vec<LocomotionSample>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SAMPLE_COLUMNS} FROM samples WHERE timeline_item_id = ?1 ORDER BY date ASC"
    ))?;
    let rows = stmt
        .query_map(params![item_id], sample_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Load samples into the item. When the item's samples changed since the
/// last hydration, derived state is recomputed and persisted before the
/// item is handed back.
pub fn hydrate_item(db: &Database, item: &mut TimelineItem) -> Result<()> {
    let samples = db.read(|conn| samples_for_item(conn, &item.base.id))?;
    item.samples = Some(samples);
    if item.base.samples_changed {
        item.update_from_samples()?;
        db.write(|scope| save_item(scope, item))?;
    }
    Ok(())
}

pub fn save_base(scope: &mut WriteScope<'_>, base: &TimelineItemBase) -> Result<()> {
    scope.conn().execute(
        "INSERT INTO timeline_item_base (id, is_visit, start_date, end_date, source, \
             previous_item_id, next_item_id, disabled, deleted, samples_changed) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
         ON CONFLICT(id) DO UPDATE SET \
             is_visit = excluded.is_visit, \
             start_date = excluded.start_date, \
             end_date = excluded.end_date, \
             source = excluded.source, \
             previous_item_id = excluded.previous_item_id, \
             next_item_id = excluded.next_item_id, \
             disabled = excluded.disabled, \
             deleted = excluded.deleted, \
             samples_changed = excluded.samples_changed",
        params![
            base.id,
            base.is_visit,
            fmt_date(base.start_date),
            fmt_date(base.end_date),
            base.source,
            base.previous_item_id,
            base.next_item_id,
            base.disabled,
            base.deleted,
            base.samples_changed,
        ],
    )?;
    scope.touch(base.date_range());
    Ok(())
}

pub fn save_visit(scope: &mut WriteScope<'_>, visit: &TimelineItemVisit) -> Result<()> {
    scope.conn().execute(
        "INSERT INTO timeline_item_visit (item_id, latitude, longitude, radius) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(item_id) DO UPDATE SET \
             latitude = excluded.latitude, \
             longitude = excluded.longitude, \
             radius = excluded.radius",
        params![visit.item_id, visit.latitude, visit.longitude, visit.radius],
    )?;
    Ok(())
}

pub fn save_trip(scope: &mut WriteScope<'_>, trip: &TimelineItemTrip) -> Result<()> {
    scope.conn().execute(
        "INSERT INTO timeline_item_trip (item_id, distance, speed, classified_activity_type, \
             confirmed_activity_type) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(item_id) DO UPDATE SET \
             distance = excluded.distance, \
             speed = excluded.speed, \
             classified_activity_type = excluded.classified_activity_type, \
             confirmed_activity_type = excluded.confirmed_activity_type",
        params![
            trip.item_id,
            trip.distance,
            trip.speed,
            trip.classified_activity_type.map(|t| t.as_str()),
            trip.confirmed_activity_type.map(|t| t.as_str()),
        ],
    )?;
    Ok(())
}

/// Persist base plus whichever extension row the item carries.
pub fn save_item(scope: &mut WriteScope<'_>, item: &TimelineItem) -> Result<()> {
    save_base(scope, &item.base)?;
    if let Some(visit) = &item.visit {
        save_visit(scope, visit)?;
    }
    if let Some(trip) = &item.trip {
        save_trip(scope, trip)?;
    }
    Ok(())
}

pub fn save_sample(scope: &mut WriteScope<'_>, sample: &LocomotionSample) -> Result<()> {
    scope.conn().execute(
        "INSERT INTO samples (id, date, latitude, longitude, horizontal_accuracy, speed, course, \
             altitude, recording_state, classified_activity_type, confirmed_activity_type, \
             timeline_item_id, disabled) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
         ON CONFLICT(id) DO UPDATE SET \
             date = excluded.date, \
             latitude = excluded.latitude, \
             longitude = excluded.longitude, \
             horizontal_accuracy = excluded.horizontal_accuracy, \
             speed = excluded.speed, \
             course = excluded.course, \
             altitude = excluded.altitude, \
             recording_state = excluded.recording_state, \
             classified_activity_type = excluded.classified_activity_type, \
             confirmed_activity_type = excluded.confirmed_activity_type, \
             timeline_item_id = excluded.timeline_item_id, \
             disabled = excluded.disabled",
        params![
            sample.id,
            fmt_date(sample.date),
            sample.latitude,
            sample.longitude,
            sample.horizontal_accuracy,
            sample.speed,
            sample.course,
            sample.altitude,
            sample.recording_state.as_str(),
            sample.classified_activity_type.map(|t| t.as_str()),
            sample.confirmed_activity_type.map(|t| t.as_str()),
            sample.timeline_item_id,
            sample.disabled,
        ],
    )?;
    scope.touch(DateInterval::instant(sample.date));
    Ok(())
}

/// Reassign a sample to another item.
pub fn assign_sample(scope: &mut WriteScope<'_>, sample: &LocomotionSample, item_id: &str) -> Result<()> {
    scope.conn().execute(
        "UPDATE samples SET timeline_item_id = ?1 WHERE id = ?2",
        params![item_id, sample.id],
    )?;
    scope.touch(DateInterval::instant(sample.date));
    Ok(())
}

/// Flag an item so the next hydration recomputes its derived state.
pub fn mark_samples_changed(scope: &mut WriteScope<'_>, item_id: &str, range: DateInterval) -> Result<()> {
    scope.conn().execute(
        "UPDATE timeline_item_base SET samples_changed = 1 WHERE id = ?1",
        params![item_id],
    )?;
    scope.touch(range);
    Ok(())
}
