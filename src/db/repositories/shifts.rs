use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{parse_datetime, parse_optional_datetime, to_bool},
    Database,
};
use crate::models::Shift;

fn row_to_shift(row: &Row) -> Result<Shift> {
    let start_timestamp: String = row.get("start_timestamp")?;
    let end_timestamp: Option<String> = row.get("end_timestamp")?;
    let is_in_geofence: i64 = row.get("is_in_geofence")?;

    Ok(Shift {
        id: row.get("id")?,
        start_timestamp: parse_datetime(&start_timestamp, "start_timestamp")?,
        end_timestamp: parse_optional_datetime(end_timestamp, "end_timestamp")?,
        total_distance: row.get("total_distance")?,
        is_in_geofence: to_bool(is_in_geofence),
    })
}

impl Database {
    /// Replaces the mirror of `shift` with the backend's version.
    pub async fn upsert_shift(&self, shift: &Shift) -> Result<()> {
        let record = shift.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO shifts (id, start_timestamp, end_timestamp, total_distance, is_in_geofence, synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     start_timestamp = excluded.start_timestamp,
                     end_timestamp = excluded.end_timestamp,
                     total_distance = excluded.total_distance,
                     is_in_geofence = excluded.is_in_geofence,
                     synced_at = excluded.synced_at",
                params![
                    record.id,
                    record.start_timestamp.to_rfc3339(),
                    record.end_timestamp.as_ref().map(|dt| dt.to_rfc3339()),
                    record.total_distance,
                    record.is_in_geofence as i64,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_shifts(&self, shifts: &[Shift]) -> Result<()> {
        let records = shifts.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO shifts (id, start_timestamp, end_timestamp, total_distance, is_in_geofence, synced_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                let synced_at = Utc::now().to_rfc3339();
                for record in &records {
                    stmt.execute(params![
                        record.id,
                        record.start_timestamp.to_rfc3339(),
                        record.end_timestamp.as_ref().map(|dt| dt.to_rfc3339()),
                        record.total_distance,
                        record.is_in_geofence as i64,
                        synced_at,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Most recent shift without an end timestamp.
    pub async fn get_open_shift(&self) -> Result<Option<Shift>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, start_timestamp, end_timestamp, total_distance, is_in_geofence
                 FROM shifts
                 WHERE end_timestamp IS NULL
                 ORDER BY start_timestamp DESC
                 LIMIT 1",
            )?;

            let mut rows = stmt.query([])?;
            let shift = match rows.next()? {
                Some(row) => Some(row_to_shift(row)?),
                None => None,
            };
            Ok(shift)
        })
        .await
    }

    pub async fn list_shifts_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Shift>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, start_timestamp, end_timestamp, total_distance, is_in_geofence
                 FROM shifts
                 WHERE start_timestamp >= ?1 AND start_timestamp <= ?2
                 ORDER BY start_timestamp DESC",
            )?;

            let mut rows = stmt.query(params![start.to_rfc3339(), end.to_rfc3339()])?;
            let mut shifts = Vec::new();
            while let Some(row) = rows.next()? {
                shifts.push(row_to_shift(row)?);
            }
            Ok(shifts)
        })
        .await
    }
}
