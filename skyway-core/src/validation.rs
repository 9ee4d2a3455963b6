use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use validator::{Validate, ValidationErrors};

/// Per-field rejection messages, keyed by field name. Object-level checks
/// that involve several fields report under the field the caller should fix.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn merge(&mut self, other: FieldErrors) {
        for (field, messages) in other.0 {
            self.0.entry(field).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.fields().collect();
        write!(f, "invalid fields: {}", fields.join(", "))
    }
}

impl std::error::Error for FieldErrors {}

impl From<ValidationErrors> for FieldErrors {
    fn from(errors: ValidationErrors) -> Self {
        let mut out = FieldErrors::new();
        for (field, list) in errors.field_errors() {
            for err in list.iter() {
                let message = match &err.message {
                    Some(message) => message.to_string(),
                    None => format!("invalid value ({})", err.code),
                };
                out.add(&field.to_string(), message);
            }
        }
        out
    }
}

/// Runs the derived field rules of `value`, returning an empty set on success.
pub fn check<T: Validate>(value: &T) -> FieldErrors {
    match value.validate() {
        Ok(()) => FieldErrors::new(),
        Err(errors) => errors.into(),
    }
}

/// Trims and upper-cases code-like values (airline/destination codes,
/// flight codes, seat numbers).
pub fn normalize_code(value: &str) -> String {
    value.trim().to_uppercase()
}

pub fn normalize_text(value: &str) -> String {
    value.trim().to_string()
}

pub fn normalize_optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

/// Rejects values that are only whitespace. Used where the trimmed value must
/// still be non-empty after normalization.
pub fn not_blank(value: &str) -> Result<(), validator::ValidationError> {
    if value.trim().is_empty() {
        let mut err = validator::ValidationError::new("blank");
        err.message = Some("This field may not be blank.".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Validate)]
    struct Sample {
        #[validate(length(min = 3, message = "too short"))]
        name: String,
        #[validate(range(min = 1, max = 10))]
        count: i32,
    }

    #[test]
    fn collects_messages_per_field() {
        let errors = check(&Sample {
            name: "ab".into(),
            count: 11,
        });
        assert_eq!(errors.get("name"), Some(&["too short".to_string()][..]));
        assert!(errors.contains("count"));
    }

    #[test]
    fn merge_appends() {
        let mut a = FieldErrors::single("code", "taken");
        a.merge(FieldErrors::single("code", "too long"));
        a.merge(FieldErrors::single("name", "blank"));
        assert_eq!(a.get("code").map(|m| m.len()), Some(2));
        assert_eq!(a.fields().collect::<Vec<_>>(), vec!["code", "name"]);
    }

    #[test]
    fn serializes_as_plain_map() {
        let errors = FieldErrors::single("companions", "out of range");
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["companions"][0], "out of range");
    }

    #[test]
    fn code_normalization() {
        assert_eq!(normalize_code("  la "), "LA");
        assert!(not_blank("   ").is_err());
    }
}
