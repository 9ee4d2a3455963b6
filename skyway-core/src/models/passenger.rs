use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

use crate::validation::{self, normalize_code, normalize_text, FieldErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassengerType {
    #[default]
    Main,
    Companion,
}

impl PassengerType {
    pub fn as_str(self) -> &'static str {
        match self {
            PassengerType::Main => "main",
            PassengerType::Companion => "companion",
        }
    }

    pub fn display(self) -> &'static str {
        match self {
            PassengerType::Main => "Main passenger",
            PassengerType::Companion => "Companion",
        }
    }
}

impl FromStr for PassengerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(PassengerType::Main),
            "companion" => Ok(PassengerType::Companion),
            other => Err(format!("\"{}\" is not a valid passenger type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassengerCategory {
    #[default]
    Adult,
    Child,
    Infant,
}

impl PassengerCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            PassengerCategory::Adult => "adult",
            PassengerCategory::Child => "child",
            PassengerCategory::Infant => "infant",
        }
    }

    pub fn display(self) -> &'static str {
        match self {
            PassengerCategory::Adult => "Adult",
            PassengerCategory::Child => "Child",
            PassengerCategory::Infant => "Infant",
        }
    }
}

impl FromStr for PassengerCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adult" => Ok(PassengerCategory::Adult),
            "child" => Ok(PassengerCategory::Child),
            "infant" => Ok(PassengerCategory::Infant),
            other => Err(format!(
                "Category must be one of: adult, child, infant (got \"{}\")",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    M,
    F,
    O,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::M => "M",
            Gender::F => "F",
            Gender::O => "O",
        }
    }

    pub fn display(self) -> &'static str {
        match self {
            Gender::M => "Male",
            Gender::F => "Female",
            Gender::O => "Other",
        }
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "M" => Ok(Gender::M),
            "F" => Ok(Gender::F),
            "O" => Ok(Gender::O),
            other => Err(format!("\"{}\" is not a valid gender", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReservationPassenger {
    pub id: i64,
    pub reservation_id: i64,
    pub passenger_type: PassengerType,
    pub passenger_category: PassengerCategory,
    pub first_name: String,
    pub last_name: String,
    pub country_of_residence: String,
    pub identity_document: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub seat_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReservationPassenger {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn has_seat(&self) -> bool {
        self.seat_number.as_deref().is_some_and(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PassengerSummary {
    pub id: i64,
    pub full_name: String,
    pub reservation: i64,
    pub reservation_code: String,
    pub passenger_type: PassengerType,
    pub passenger_category: PassengerCategory,
    pub seat_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PassengerSummary {
    pub fn new(p: &ReservationPassenger, reservation_code: &str) -> Self {
        Self {
            id: p.id,
            full_name: p.full_name(),
            reservation: p.reservation_id,
            reservation_code: reservation_code.to_string(),
            passenger_type: p.passenger_type,
            passenger_category: p.passenger_category,
            seat_number: p.seat_number.clone(),
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PassengerDetail {
    #[serde(flatten)]
    pub passenger: ReservationPassenger,
    #[serde(rename = "reservation")]
    pub reservation_ref: i64,
    pub reservation_code: String,
    pub full_name: String,
    pub passenger_type_display: &'static str,
    pub passenger_category_display: &'static str,
    pub gender_display: &'static str,
}

impl PassengerDetail {
    pub fn new(p: &ReservationPassenger, reservation_code: &str) -> Self {
        Self {
            reservation_ref: p.reservation_id,
            reservation_code: reservation_code.to_string(),
            full_name: p.full_name(),
            passenger_type_display: p.passenger_type.display(),
            passenger_category_display: p.passenger_category.display(),
            gender_display: p.gender.display(),
            passenger: p.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TypeCounts {
    pub main: i64,
    pub companion: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CategoryCounts {
    pub adult: i64,
    pub child: i64,
    pub infant: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct GenderCounts {
    pub male: i64,
    pub female: i64,
    pub other: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PassengerStatistics {
    pub total: i64,
    pub by_type: TypeCounts,
    pub by_category: CategoryCounts,
    pub by_gender: GenderCounts,
    pub with_seat_assigned: i64,
    pub without_seat_assigned: i64,
}

impl PassengerStatistics {
    pub fn record(&mut self, p: &ReservationPassenger) {
        self.total += 1;
        match p.passenger_type {
            PassengerType::Main => self.by_type.main += 1,
            PassengerType::Companion => self.by_type.companion += 1,
        }
        match p.passenger_category {
            PassengerCategory::Adult => self.by_category.adult += 1,
            PassengerCategory::Child => self.by_category.child += 1,
            PassengerCategory::Infant => self.by_category.infant += 1,
        }
        match p.gender {
            Gender::M => self.by_gender.male += 1,
            Gender::F => self.by_gender.female += 1,
            Gender::O => self.by_gender.other += 1,
        }
        if p.has_seat() {
            self.with_seat_assigned += 1;
        } else {
            self.without_seat_assigned += 1;
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PassengerInput {
    pub reservation: i64,
    #[serde(default)]
    pub passenger_type: PassengerType,
    #[serde(default)]
    pub passenger_category: PassengerCategory,
    #[validate(length(min = 1, max = 100, message = "Ensure this field has between 1 and 100 characters."))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "Ensure this field has between 1 and 100 characters."))]
    pub last_name: String,
    #[validate(length(min = 1, max = 100, message = "Ensure this field has between 1 and 100 characters."))]
    pub country_of_residence: String,
    #[validate(length(min = 1, max = 50, message = "Ensure this field has between 1 and 50 characters."))]
    pub identity_document: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    #[validate(length(min = 1, max = 10, message = "Ensure this field has between 1 and 10 characters."))]
    #[serde(default)]
    pub seat_number: Option<String>,
}

impl PassengerInput {
    pub fn normalized(self) -> Self {
        Self {
            first_name: normalize_text(&self.first_name),
            last_name: normalize_text(&self.last_name),
            country_of_residence: normalize_text(&self.country_of_residence),
            identity_document: normalize_text(&self.identity_document),
            seat_number: normalize_seat(self.seat_number),
            ..self
        }
    }

    pub fn validate_fields(&self, today: NaiveDate) -> FieldErrors {
        let mut errors = validation::check(self);
        if self.date_of_birth > today {
            errors.add("date_of_birth", "Date of birth cannot be in the future.");
        }
        errors
    }
}

/// Upper-cased seat, with blank values treated as unassigned.
pub fn normalize_seat(seat: Option<String>) -> Option<String> {
    seat.map(|s| normalize_code(&s)).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PassengerPatch {
    pub reservation: Option<i64>,
    pub passenger_type: Option<PassengerType>,
    pub passenger_category: Option<PassengerCategory>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub country_of_residence: Option<String>,
    pub identity_document: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub seat_number: Option<String>,
}

impl PassengerPatch {
    pub fn apply(self, current: &ReservationPassenger) -> PassengerInput {
        PassengerInput {
            reservation: self.reservation.unwrap_or(current.reservation_id),
            passenger_type: self.passenger_type.unwrap_or(current.passenger_type),
            passenger_category: self.passenger_category.unwrap_or(current.passenger_category),
            first_name: self.first_name.unwrap_or_else(|| current.first_name.clone()),
            last_name: self.last_name.unwrap_or_else(|| current.last_name.clone()),
            country_of_residence: self
                .country_of_residence
                .unwrap_or_else(|| current.country_of_residence.clone()),
            identity_document: self
                .identity_document
                .unwrap_or_else(|| current.identity_document.clone()),
            date_of_birth: self.date_of_birth.unwrap_or(current.date_of_birth),
            gender: self.gender.unwrap_or(current.gender),
            seat_number: self.seat_number.or_else(|| current.seat_number.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> PassengerInput {
        PassengerInput {
            reservation: 1,
            passenger_type: PassengerType::Main,
            passenger_category: PassengerCategory::Adult,
            first_name: " Ana ".into(),
            last_name: "Mora".into(),
            country_of_residence: "Ecuador".into(),
            identity_document: "1712345678".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 4, 2).unwrap(),
            gender: Gender::F,
            seat_number: Some(" 12a ".into()),
        }
    }

    #[test]
    fn seat_numbers_are_uppercased() {
        let p = input().normalized();
        assert_eq!(p.seat_number.as_deref(), Some("12A"));
        assert_eq!(p.first_name, "Ana");
        assert_eq!(normalize_seat(Some("  ".into())), None);
    }

    #[test]
    fn birth_date_in_future_is_rejected() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let mut p = input();
        assert!(p.validate_fields(today).is_empty());
        p.date_of_birth = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        assert!(p.validate_fields(today).contains("date_of_birth"));
    }

    #[test]
    fn defaults_apply_when_omitted() {
        let parsed: PassengerInput = serde_json::from_str(
            r#"{"reservation": 1, "first_name": "A", "last_name": "B",
                "country_of_residence": "EC", "identity_document": "X1",
                "date_of_birth": "2000-01-01", "gender": "O"}"#,
        )
        .unwrap();
        assert_eq!(parsed.passenger_type, PassengerType::Main);
        assert_eq!(parsed.passenger_category, PassengerCategory::Adult);
        assert_eq!(parsed.seat_number, None);
    }

    #[test]
    fn statistics_tally() {
        let now = Utc::now();
        let base = ReservationPassenger {
            id: 1,
            reservation_id: 1,
            passenger_type: PassengerType::Main,
            passenger_category: PassengerCategory::Adult,
            first_name: "Ana".into(),
            last_name: "Mora".into(),
            country_of_residence: "EC".into(),
            identity_document: "1".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            gender: Gender::F,
            seat_number: Some("1A".into()),
            created_at: now,
        };
        let child = ReservationPassenger {
            id: 2,
            passenger_type: PassengerType::Companion,
            passenger_category: PassengerCategory::Child,
            gender: Gender::M,
            seat_number: None,
            ..base.clone()
        };
        let mut stats = PassengerStatistics::default();
        stats.record(&base);
        stats.record(&child);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_type.companion, 1);
        assert_eq!(stats.by_category.child, 1);
        assert_eq!(stats.by_gender.female, 1);
        assert_eq!(stats.with_seat_assigned, 1);
        assert_eq!(stats.without_seat_assigned, 1);
    }
}
