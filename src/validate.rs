use serde_json::Value;

use crate::error::{Error, Result};

/// Interpret `value` as a list of strings.
///
/// Any other JSON shape, or a list holding a non-string element, is a
/// validation error naming `field`.
pub fn string_list(value: &Value, field: &str) -> Result<Vec<String>> {
    let Value::Array(items) = value else {
        return Err(Error::Validation(format!(
            "{field} must be a list of strings"
        )));
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::String(s) => Ok(s.clone()),
            other => Err(Error::Validation(format!(
                "{field}[{i}] must be a string, got {}",
                json_type(other)
            ))),
        })
        .collect()
}

/// Like [`string_list`], also rejecting an empty list.
pub fn non_empty_string_list(value: &Value, field: &str) -> Result<Vec<String>> {
    let list = string_list(value, field)?;
    if list.is_empty() {
        return Err(Error::Validation(format!(
            "{field} must be a non-empty list"
        )));
    }
    Ok(list)
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
