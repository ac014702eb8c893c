use serde_json::{Map, Value};
use thiserror::Error;

use crate::record::RecordIdentity;

pub const RECORD_ID_KEY: &str = "RECORD_ID";
pub const DATA_SOURCE_KEY: &str = "DATA_SOURCE";

/// Why a line was rejected. Validation failures are never fatal to a run.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("line is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("line is valid JSON but not an object")]
    NotAnObject,
    #[error("required key {0} is missing")]
    MissingKey(&'static str),
    #[error("required key {0} must be a string")]
    NotAString(&'static str),
    #[error("required key {0} is empty")]
    EmptyKey(&'static str),
}

/// Check that `line` is a JSON object carrying non-empty string `RECORD_ID` and
/// `DATA_SOURCE` values, returning them on success.
pub fn validate(line: &str) -> Result<RecordIdentity, ValidationError> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(object) = value else {
        return Err(ValidationError::NotAnObject);
    };

    Ok(RecordIdentity {
        record_id: required_string(&object, RECORD_ID_KEY)?,
        data_source: required_string(&object, DATA_SOURCE_KEY)?,
    })
}

fn required_string(
    object: &Map<String, Value>,
    key: &'static str,
) -> Result<String, ValidationError> {
    match object.get(key) {
        None => Err(ValidationError::MissingKey(key)),
        Some(Value::String(s)) if s.is_empty() => Err(ValidationError::EmptyKey(key)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::NotAString(key)),
    }
}
