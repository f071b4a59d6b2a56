//! Input schema checks for tool calls
//!
//! Inputs are first coerced into the shape tool declarations ask for (an
//! object), then checked against the full JSON Schema with `jsonschema`.

use serde_json::{Map, Value};
use tracing::warn;

/// Turn a loosely typed input into one that satisfies `schema`.
///
/// A string holding a JSON object is parsed. Any other non-object value is
/// wrapped as the single field the schema asks for; when the schema does
/// not name exactly one such field the input is rejected. Null fields are
/// treated as absent. Errors are phrased for the reasoning backend to
/// correct itself.
pub fn prepare_input(schema: &Value, raw: Value) -> Result<Value, String> {
    if !expects_object(schema) {
        validate(schema, &raw)?;
        return Ok(raw);
    }

    let input = match raw {
        Value::Object(map) => Value::Object(without_nulls(map)),
        Value::Null => Value::Object(Map::new()),
        Value::String(ref s) if looks_like_object(s) => match serde_json::from_str::<Value>(s.trim()) {
            Ok(Value::Object(map)) => Value::Object(without_nulls(map)),
            _ => coerce(schema, raw)?,
        },
        other => coerce(schema, other)?,
    };

    validate(schema, &input)?;
    Ok(input)
}

fn without_nulls(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter().filter(|(_, v)| !v.is_null()).collect()
}

fn expects_object(schema: &Value) -> bool {
    match schema.get("type") {
        Some(Value::String(t)) => t == "object",
        None => schema.get("properties").is_some(),
        _ => false,
    }
}

fn looks_like_object(s: &str) -> bool {
    let t = s.trim();
    t.starts_with('{') && t.ends_with('}')
}

/// The one field a bare value can stand for: the sole required field, or
/// the sole property when nothing is required.
fn single_field(schema: &Value) -> Option<String> {
    let required = required_fields(schema);
    match required.len() {
        1 => Some(required[0].clone()),
        0 => {
            let props = schema.get("properties").and_then(Value::as_object)?;
            if props.len() == 1 {
                props.keys().next().cloned()
            } else {
                None
            }
        }
        _ => None,
    }
}

fn coerce(schema: &Value, value: Value) -> Result<Value, String> {
    match single_field(schema) {
        Some(field) => {
            tracing::debug!("Coercing bare input into field '{}'", field);
            let mut map = Map::new();
            map.insert(field, value);
            Ok(Value::Object(map))
        }
        None => Err(format!(
            "expected a JSON object, got {}. {}",
            type_name(&value),
            describe(schema)
        )),
    }
}

fn required_fields(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Check an input against the schema.
///
/// A schema that does not compile is logged and skipped; the caller cannot
/// correct it.
pub fn validate(schema: &Value, input: &Value) -> Result<(), String> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(validator) => validator,
        Err(e) => {
            warn!("Skipping validation against an invalid tool schema: {}", e);
            return Ok(());
        }
    };

    let errors: Vec<String> = validator.iter_errors(input).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        return Ok(());
    }
    Err(format!("{}. {}", errors.join("; "), describe(schema)))
}

fn expected_name(expected: &Value) -> String {
    match expected {
        Value::String(t) => t.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One-line summary of the expected fields
fn describe(schema: &Value) -> String {
    let required = required_fields(schema);
    let fields: Vec<String> = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, prop)| {
                    let ty = prop.get("type").map(expected_name).unwrap_or_else(|| "any".to_string());
                    let marker = if required.contains(name) { "" } else { "?" };
                    format!("{}{}: {}", name, marker, ty)
                })
                .collect()
        })
        .unwrap_or_default();
    format!("Expected input: {{{}}}", fields.join(", "))
}
