//! Minimal JSON Schema validation for tool inputs.
//!
//! Tool descriptors arrive from the tool-execution process with a JSON
//! Schema per tool. Inputs are checked against that schema *before* the
//! process is contacted, so a shape mismatch fails locally and cheaply.
//!
//! This is deliberately a subset (`type`, `required`, `properties`,
//! `items`, `enum`): the keywords the discovered schemas actually use.
//! Anything the subset does not understand is accepted.

use serde_json::Value;

/// Validate `input` against `schema`. Returns the first violation found.
pub fn validate(schema: &Value, input: &Value) -> std::result::Result<(), String> {
    validate_at(schema, input, "$")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> std::result::Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema_obj.get("type") {
        check_type(expected, value, path)?;
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            return Err(format!("{path}: value not in enum"));
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema_obj.get("required").and_then(|r| r.as_array()) {
            for name in required.iter().filter_map(|n| n.as_str()) {
                if !obj.contains_key(name) {
                    return Err(format!("{path}: missing required field: {name}"));
                }
            }
        }
        if let Some(props) = schema_obj.get("properties").and_then(|p| p.as_object()) {
            for (name, subschema) in props {
                if let Some(field) = obj.get(name) {
                    validate_at(subschema, field, &format!("{path}.{name}"))?;
                }
            }
        }
    }

    if let (Some(items), Some(elements)) = (schema_obj.get("items"), value.as_array()) {
        for (i, element) in elements.iter().enumerate() {
            validate_at(items, element, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn check_type(expected: &Value, value: &Value, path: &str) -> std::result::Result<(), String> {
    // "type" may be a single name or a list of alternatives.
    let names: Vec<&str> = match expected {
        Value::String(s) => vec![s.as_str()],
        Value::Array(list) => list.iter().filter_map(|v| v.as_str()).collect(),
        _ => return Ok(()),
    };

    if names.is_empty() || names.iter().any(|n| matches_type(n, value)) {
        Ok(())
    } else {
        Err(format!(
            "{path}: expected {}, got {}",
            names.join(" or "),
            type_name(value)
        ))
    }
}

fn matches_type(name: &str, value: &Value) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "null" => value.is_null(),
        _ => true,
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
