use serde_json::Value;

use crate::error::FieldError;

/// A JSON field in a partial update: absent, explicitly cleared, or set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NullableValue {
    Omitted,
    Null,
    String(String),
}

impl NullableValue {
    /// `None` leaves the column alone, `Some(None)` clears it. Blank strings
    /// clear too.
    pub fn into_update(self) -> Option<Option<String>> {
        match self {
            NullableValue::Omitted => None,
            NullableValue::Null => Some(None),
            NullableValue::String(value) => {
                let trimmed = value.trim();
                Some((!trimmed.is_empty()).then(|| trimmed.to_string()))
            }
        }
    }
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<NullableValue, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::String(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

/// Reads `field` of a PATCH body as a nullable string column update.
pub fn nullable_field(body: &Value, field: &str) -> Result<Option<Option<String>>, FieldError> {
    classify_nullable(body.get(field))
        .map(NullableValue::into_update)
        .map_err(|message| FieldError::new(field, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn distinguishes_omitted_null_and_set() {
        let body = json!({"notes": null, "location": "  Dock 3 ", "category": ""});
        assert_eq!(nullable_field(&body, "missing"), Ok(None));
        assert_eq!(nullable_field(&body, "notes"), Ok(Some(None)));
        assert_eq!(
            nullable_field(&body, "location"),
            Ok(Some(Some("Dock 3".to_string())))
        );
        assert_eq!(nullable_field(&body, "category"), Ok(Some(None)));
    }

    #[test]
    fn rejects_non_strings() {
        let err = nullable_field(&json!({"notes": 5}), "notes").unwrap_err();
        assert_eq!(err.field, "notes");
    }
}
