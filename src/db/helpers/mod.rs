use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

/// Stored as 0/1 since SQLite has no boolean type.
pub fn to_bool(value: i64) -> bool {
    value != 0
}
