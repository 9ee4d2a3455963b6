use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation::{self, normalize_code, normalize_optional, normalize_text, FieldErrors};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Airline {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub logo_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// List shape.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AirlineSummary {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub logo_url: Option<String>,
}

impl From<&Airline> for AirlineSummary {
    fn from(a: &Airline) -> Self {
        Self {
            id: a.id,
            name: a.name.clone(),
            code: a.code.clone(),
            logo_url: a.logo_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AirlineInput {
    #[validate(
        length(min = 1, max = 10, message = "Ensure this field has between 1 and 10 characters."),
        custom(function = "validation::not_blank")
    )]
    pub code: String,
    #[validate(length(min = 3, max = 255, message = "Name must be at least 3 characters long."))]
    pub name: String,
    #[validate(length(max = 500, message = "Ensure this field has no more than 500 characters."))]
    #[serde(default)]
    pub logo_url: Option<String>,
}

impl AirlineInput {
    pub fn normalized(self) -> Self {
        Self {
            code: normalize_code(&self.code),
            name: normalize_text(&self.name),
            logo_url: normalize_optional(self.logo_url).filter(|u| !u.is_empty()),
        }
    }

    pub fn validate_fields(&self) -> FieldErrors {
        validation::check(self)
    }
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AirlinePatch {
    pub code: Option<String>,
    pub name: Option<String>,
    pub logo_url: Option<String>,
}

impl AirlinePatch {
    pub fn apply(self, current: &Airline) -> AirlineInput {
        AirlineInput {
            code: self.code.unwrap_or_else(|| current.code.clone()),
            name: self.name.unwrap_or_else(|| current.name.clone()),
            logo_url: self.logo_url.or_else(|| current.logo_url.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(code: &str, name: &str) -> AirlineInput {
        AirlineInput {
            code: code.into(),
            name: name.into(),
            logo_url: None,
        }
    }

    #[test]
    fn code_is_trimmed_and_uppercased() {
        let normalized = input("  la ", " LATAM ").normalized();
        assert_eq!(normalized.code, "LA");
        assert_eq!(normalized.name, "LATAM");
        assert!(normalized.validate_fields().is_empty());
    }

    #[test]
    fn short_names_are_rejected_after_trimming() {
        let errors = input("AV", "  ab  ").normalized().validate_fields();
        assert!(errors.contains("name"));
    }

    #[test]
    fn blank_code_is_rejected() {
        let errors = input("   ", "Avianca").normalized().validate_fields();
        assert!(errors.contains("code"));
    }

    #[test]
    fn patch_keeps_unset_fields() {
        let now = Utc::now();
        let current = Airline {
            id: 1,
            code: "AV".into(),
            name: "Avianca".into(),
            logo_url: Some("https://cdn/av.png".into()),
            created_at: now,
            updated_at: now,
        };
        let merged = AirlinePatch {
            name: Some("Avianca Ecuador".into()),
            ..Default::default()
        }
        .apply(&current);
        assert_eq!(merged.code, "AV");
        assert_eq!(merged.name, "Avianca Ecuador");
        assert_eq!(merged.logo_url.as_deref(), Some("https://cdn/av.png"));
    }
}
