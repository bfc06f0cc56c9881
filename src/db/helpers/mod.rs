use std::convert::TryFrom;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} contains out-of-range value {value}"))
}

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

pub fn parse_json(value: &str, field: &str) -> Result<Value> {
    serde_json::from_str(value).with_context(|| format!("failed to parse {field} as JSON"))
}

pub fn parse_json_object(value: &str, field: &str) -> Result<Map<String, Value>> {
    match parse_json(value, field)? {
        Value::Object(map) => Ok(map),
        other => bail!("{field} is not a JSON object: {other}"),
    }
}
