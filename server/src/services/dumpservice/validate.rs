//! Turns a raw JSON body into a dump request, before anything touches the disk.

use super::response::ApiError;
use joblib::{JobOptions, PlaceId};
use serde::Deserialize;
use serde_json::{Map, Value};

pub const NO_CODE: &str = "No code provided";

#[derive(Debug, PartialEq)]
pub struct DumpRequest {
    pub code: String,
    pub options: JobOptions,
}

pub fn too_large(max_code_bytes: usize) -> ApiError {
    ApiError::bad_request(format!(
        "Code too large (max {}MB)",
        max_code_bytes / (1024 * 1024)
    ))
}

/// `code` must be a non-empty string no longer than `max_code_bytes`.
///
/// The size is the UTF-8 byte length of the decoded string, not of its JSON encoding, so
/// escapes count once they are unescaped: `"\n"` is two bytes on the wire but one here.
/// The transport body limit bounds the serialized form separately.
pub fn parse_request(body: Value, max_code_bytes: usize) -> Result<DumpRequest, ApiError> {
    let mut body = match body {
        Value::Object(body) => body,
        _ => return Err(ApiError::bad_request(NO_CODE)),
    };
    let code = match body.remove("code") {
        Some(Value::String(code)) if !code.is_empty() => code,
        _ => return Err(ApiError::bad_request(NO_CODE)),
    };
    if code.len() > max_code_bytes {
        return Err(too_large(max_code_bytes));
    }
    let options = match body.get("options") {
        Some(Value::Object(options)) => parse_options(options),
        _ => JobOptions::default(),
    };
    Ok(DumpRequest { code, options })
}

/// Unknown or oddly typed options are ignored rather than rejected.
fn parse_options(options: &Map<String, Value>) -> JobOptions {
    let key = match options.get("key") {
        Some(Value::String(key)) if !key.is_empty() => Some(key.clone()),
        Some(Value::Number(key)) => Some(key.to_string()),
        _ => None,
    };
    let place_id = options
        .get("placeId")
        .and_then(|value| PlaceId::deserialize(value).ok())
        .filter(PlaceId::is_set);
    JobOptions { key, place_id }
}
