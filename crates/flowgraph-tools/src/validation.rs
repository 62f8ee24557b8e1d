//! Validate tool call arguments against JSON Schema before execution.

use serde_json::Value;

/// Check call arguments against a tool's parameter schema.
///
/// Only the top level is inspected. All missing required fields are named in
/// one message; otherwise the first mistyped property is reported.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    if let Some(schema_type) = schema.get("type").and_then(|v| v.as_str()) {
        if schema_type == "object" && !args.is_object() {
            return Err(format!(
                "expected object arguments, got {}",
                json_type_name(args)
            ));
        }
    }

    let Some(obj) = args.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(|f| f.as_str())
            .filter(|name| !obj.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required field(s): {}", missing.join(", ")));
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
        for (key, value) in obj {
            let Some(prop_schema) = properties.get(key) else {
                continue;
            };
            if let Some(expected) = prop_schema.get("type") {
                if !type_matches(value, expected) {
                    return Err(format!(
                        "field '{}' expected type '{}', got {}",
                        key,
                        describe_type(expected),
                        json_type_name(value)
                    ));
                }
            }
        }
    }

    Ok(())
}

/// `type` may be a single name or a list of names.
fn type_matches(value: &Value, expected: &Value) -> bool {
    match expected {
        Value::String(name) => value_matches_type(value, name),
        Value::Array(names) => names
            .iter()
            .filter_map(|n| n.as_str())
            .any(|n| value_matches_type(value, n)),
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(name) => name.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(|n| n.as_str())
            .collect::<Vec<_>>()
            .join(" | "),
        other => other.to_string(),
    }
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string" },
                "days": { "type": "integer" },
                "units": { "type": ["string", "null"] }
            },
            "required": ["city"]
        })
    }

    #[test]
    fn test_valid_arguments() {
        assert!(validate_arguments(&json!({"city": "Oslo", "days": 3}), &schema()).is_ok());
        assert!(validate_arguments(&json!({"city": "Oslo", "units": null}), &schema()).is_ok());
    }

    #[test]
    fn test_missing_required() {
        let err = validate_arguments(&json!({"days": 3}), &schema()).unwrap_err();
        assert_eq!(err, "missing required field(s): city");
    }

    #[test]
    fn test_wrong_type() {
        let err = validate_arguments(&json!({"city": "Oslo", "days": 2.5}), &schema()).unwrap_err();
        assert!(err.contains("'days' expected type 'integer'"));
    }

    #[test]
    fn test_non_object() {
        let err = validate_arguments(&json!("Oslo"), &schema()).unwrap_err();
        assert!(err.contains("expected object arguments, got string"));
    }

    #[test]
    fn test_unknown_properties_pass() {
        assert!(validate_arguments(&json!({"city": "Oslo", "extra": true}), &schema()).is_ok());
    }
}
