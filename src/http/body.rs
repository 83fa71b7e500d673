//! Lenient request-body handling. Browsers post whatever the form held, so
//! an unreadable body counts as `{}` and the required-field checks report it.

use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::model::{Ms, ReservationStatus};
use crate::timestamp::parse_timestamp;

use super::error::ApiError;

pub type Fields = Map<String, Value>;

pub fn json_fields(bytes: &[u8]) -> Fields {
    match serde_json::from_slice(bytes) {
        Ok(Value::Object(map)) => map,
        _ => Fields::new(),
    }
}

fn form_fields(bytes: &[u8]) -> Fields {
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(bytes)
        .map(|pairs| {
            pairs
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect()
        })
        .unwrap_or_default()
}

/// URL-encoded when the content type says so, otherwise JSON, falling back
/// to URL-encoded for bodies that are not JSON at all.
pub fn form_or_json_fields(headers: &HeaderMap, bytes: &[u8]) -> Fields {
    let is_form = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
    if is_form {
        return form_fields(bytes);
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Fields::new(),
        Err(_) => form_fields(bytes),
    }
}

/// Missing, `null`, `false`, `0` and `""` all count as absent.
pub fn is_blank(fields: &Fields, key: &str) -> bool {
    match fields.get(key) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Bool(b)) => !b,
        Some(Value::Number(n)) => n.as_f64() == Some(0.0),
        Some(_) => false,
    }
}

pub fn has_any(fields: &Fields, keys: &[&str]) -> bool {
    keys.iter().any(|k| fields.contains_key(*k))
}

pub fn str_field<'a>(fields: &'a Fields, key: &str) -> Result<Option<&'a str>, ApiError> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim())),
        Some(_) => Err(ApiError::bad_request(format!("{key} must be a string"))),
    }
}

/// Like `str_field` but verbatim: whitespace is kept and only `""` is absent.
pub fn raw_str_field<'a>(fields: &'a Fields, key: &str) -> Result<Option<&'a str>, ApiError> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ApiError::bad_request(format!("{key} must be a string"))),
    }
}

pub fn id_field(fields: &Fields, key: &str) -> Result<Option<Ulid>, ApiError> {
    let Some(text) = str_field(fields, key)? else {
        return Ok(None);
    };
    Ulid::from_string(text)
        .map(Some)
        .map_err(|_| ApiError::bad_request(format!("invalid {key}")))
}

/// Date strings or epoch milliseconds.
pub fn timestamp_field(fields: &Fields, key: &str) -> Result<Option<Ms>, ApiError> {
    let invalid = || ApiError::bad_request(format!("invalid {key}"));
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(invalid),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => parse_timestamp(s).map(Some).ok_or_else(invalid),
        Some(_) => Err(invalid()),
    }
}

pub fn year_field(fields: &Fields, key: &str) -> Result<Option<i32>, ApiError> {
    let invalid = || ApiError::bad_request(format!("{key} must be a number"));
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|y| i32::try_from(y).ok())
            .map(Some)
            .ok_or_else(invalid),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

pub fn bool_field(fields: &Fields, key: &str) -> Result<Option<bool>, ApiError> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) => match s.trim() {
            "true" | "on" | "1" => Ok(Some(true)),
            "false" | "off" | "0" => Ok(Some(false)),
            _ => Err(ApiError::bad_request(format!("{key} must be a boolean"))),
        },
        Some(_) => Err(ApiError::bad_request(format!("{key} must be a boolean"))),
    }
}

/// Numbers and booleans are stringified first, so they fail as unknown statuses.
pub fn status_field(fields: &Fields, key: &str) -> Result<Option<ReservationStatus>, ApiError> {
    let text = match fields.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s.clone(),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
        Some(_) => return Err(ApiError::bad_request("Status must be a string")),
    };
    ReservationStatus::parse(&text)
        .map(Some)
        .ok_or_else(|| ApiError::bad_request(format!("Invalid status: {}", text.trim())))
}
