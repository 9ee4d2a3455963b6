use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

use super::airline::{Airline, AirlineSummary};
use crate::validation::{self, normalize_code, normalize_optional, normalize_text, FieldErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightStatus {
    #[default]
    Scheduled,
    Delayed,
    Cancelled,
    Completed,
}

impl FlightStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FlightStatus::Scheduled => "scheduled",
            FlightStatus::Delayed => "delayed",
            FlightStatus::Cancelled => "cancelled",
            FlightStatus::Completed => "completed",
        }
    }
}

impl FromStr for FlightStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(FlightStatus::Scheduled),
            "delayed" => Ok(FlightStatus::Delayed),
            "cancelled" => Ok(FlightStatus::Cancelled),
            "completed" => Ok(FlightStatus::Completed),
            other => Err(format!("\"{}\" is not a valid flight status", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flight {
    pub id: i64,
    pub flight_code: String,
    pub airline_id: i64,
    pub origin: String,
    pub destination: String,
    pub departure_datetime: DateTime<Utc>,
    pub arrival_datetime: DateTime<Utc>,
    pub number_of_stops: i32,
    pub adult_price: Decimal,
    pub child_price: Option<Decimal>,
    pub special_price: Option<Decimal>,
    pub available_seats: i32,
    pub status: FlightStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flight {
    pub fn duration_minutes(&self) -> i64 {
        (self.arrival_datetime - self.departure_datetime).num_minutes()
    }

    /// Bookable: seats left and still scheduled.
    pub fn is_available(&self) -> bool {
        self.available_seats > 0 && self.status == FlightStatus::Scheduled
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FlightSummary {
    pub id: i64,
    pub flight_code: String,
    pub airline: AirlineSummary,
    pub origin: String,
    pub destination: String,
    pub departure_datetime: DateTime<Utc>,
    pub arrival_datetime: DateTime<Utc>,
    pub duration_minutes: i64,
    pub adult_price: Decimal,
    pub available_seats: i32,
    pub status: FlightStatus,
    pub is_available: bool,
}

impl FlightSummary {
    pub fn new(flight: &Flight, airline: &Airline) -> Self {
        Self {
            id: flight.id,
            flight_code: flight.flight_code.clone(),
            airline: airline.into(),
            origin: flight.origin.clone(),
            destination: flight.destination.clone(),
            departure_datetime: flight.departure_datetime,
            arrival_datetime: flight.arrival_datetime,
            duration_minutes: flight.duration_minutes(),
            adult_price: flight.adult_price,
            available_seats: flight.available_seats,
            status: flight.status,
            is_available: flight.is_available(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FlightDetail {
    pub id: i64,
    pub flight_code: String,
    pub airline: AirlineSummary,
    pub origin: String,
    pub destination: String,
    pub departure_datetime: DateTime<Utc>,
    pub arrival_datetime: DateTime<Utc>,
    pub duration_minutes: i64,
    pub number_of_stops: i32,
    pub adult_price: Decimal,
    pub child_price: Option<Decimal>,
    pub special_price: Option<Decimal>,
    pub available_seats: i32,
    pub status: FlightStatus,
    pub is_available: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlightDetail {
    pub fn new(flight: &Flight, airline: &Airline) -> Self {
        Self {
            id: flight.id,
            flight_code: flight.flight_code.clone(),
            airline: airline.into(),
            origin: flight.origin.clone(),
            destination: flight.destination.clone(),
            departure_datetime: flight.departure_datetime,
            arrival_datetime: flight.arrival_datetime,
            duration_minutes: flight.duration_minutes(),
            number_of_stops: flight.number_of_stops,
            adult_price: flight.adult_price,
            child_price: flight.child_price,
            special_price: flight.special_price,
            available_seats: flight.available_seats,
            status: flight.status,
            is_available: flight.is_available(),
            notes: flight.notes.clone(),
            created_at: flight.created_at,
            updated_at: flight.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FlightInput {
    #[validate(
        length(min = 1, max = 20, message = "Ensure this field has between 1 and 20 characters."),
        custom(function = "validation::not_blank")
    )]
    pub flight_code: String,
    pub airline: i64,
    #[validate(length(min = 1, max = 255, message = "Ensure this field has between 1 and 255 characters."))]
    pub origin: String,
    #[validate(length(min = 1, max = 255, message = "Ensure this field has between 1 and 255 characters."))]
    pub destination: String,
    pub departure_datetime: DateTime<Utc>,
    pub arrival_datetime: DateTime<Utc>,
    #[validate(range(min = 0, message = "Number of stops cannot be negative."))]
    #[serde(default)]
    pub number_of_stops: i32,
    pub adult_price: Decimal,
    #[serde(default)]
    pub child_price: Option<Decimal>,
    #[serde(default)]
    pub special_price: Option<Decimal>,
    #[validate(range(min = 0, message = "Available seats cannot be negative."))]
    pub available_seats: i32,
    #[serde(default)]
    pub status: FlightStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

impl FlightInput {
    pub fn normalized(self) -> Self {
        Self {
            flight_code: normalize_code(&self.flight_code),
            origin: normalize_text(&self.origin),
            destination: normalize_text(&self.destination),
            notes: normalize_optional(self.notes),
            ..self
        }
    }

    pub fn validate_fields(&self) -> FieldErrors {
        let mut errors = validation::check(self);
        if self.arrival_datetime <= self.departure_datetime {
            errors.add(
                "arrival_datetime",
                "Arrival datetime must be after departure datetime.",
            );
        }
        if self.origin.trim().to_lowercase() == self.destination.trim().to_lowercase() {
            errors.add("destination", "Origin and destination cannot be the same.");
        }
        let prices = [
            ("adult_price", Some(self.adult_price)),
            ("child_price", self.child_price),
            ("special_price", self.special_price),
        ];
        for (field, price) in prices {
            if matches!(price, Some(p) if p.is_sign_negative()) {
                errors.add(field, "Price cannot be negative.");
            }
        }
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlightPatch {
    pub flight_code: Option<String>,
    pub airline: Option<i64>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub departure_datetime: Option<DateTime<Utc>>,
    pub arrival_datetime: Option<DateTime<Utc>>,
    pub number_of_stops: Option<i32>,
    pub adult_price: Option<Decimal>,
    pub child_price: Option<Decimal>,
    pub special_price: Option<Decimal>,
    pub available_seats: Option<i32>,
    pub status: Option<FlightStatus>,
    pub notes: Option<String>,
}

impl FlightPatch {
    pub fn apply(self, current: &Flight) -> FlightInput {
        FlightInput {
            flight_code: self.flight_code.unwrap_or_else(|| current.flight_code.clone()),
            airline: self.airline.unwrap_or(current.airline_id),
            origin: self.origin.unwrap_or_else(|| current.origin.clone()),
            destination: self.destination.unwrap_or_else(|| current.destination.clone()),
            departure_datetime: self.departure_datetime.unwrap_or(current.departure_datetime),
            arrival_datetime: self.arrival_datetime.unwrap_or(current.arrival_datetime),
            number_of_stops: self.number_of_stops.unwrap_or(current.number_of_stops),
            adult_price: self.adult_price.unwrap_or(current.adult_price),
            child_price: self.child_price.or(current.child_price),
            special_price: self.special_price.or(current.special_price),
            available_seats: self.available_seats.unwrap_or(current.available_seats),
            status: self.status.unwrap_or(current.status),
            notes: self.notes.or_else(|| current.notes.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn input() -> FlightInput {
        let departure = Utc.with_ymd_and_hms(2026, 11, 2, 8, 0, 0).unwrap();
        FlightInput {
            flight_code: " la1441 ".into(),
            airline: 1,
            origin: "Quito".into(),
            destination: "Guayaquil".into(),
            departure_datetime: departure,
            arrival_datetime: departure + Duration::minutes(55),
            number_of_stops: 0,
            adult_price: Decimal::new(12000, 2),
            child_price: None,
            special_price: None,
            available_seats: 40,
            status: FlightStatus::Scheduled,
            notes: None,
        }
    }

    #[test]
    fn valid_flight_passes() {
        let flight = input().normalized();
        assert_eq!(flight.flight_code, "LA1441");
        assert!(flight.validate_fields().is_empty());
    }

    #[test]
    fn arrival_must_follow_departure() {
        let mut flight = input();
        flight.arrival_datetime = flight.departure_datetime;
        assert!(flight.validate_fields().contains("arrival_datetime"));
    }

    #[test]
    fn same_endpoints_ignore_case_and_padding() {
        let mut flight = input();
        flight.destination = " quito ".into();
        assert!(flight.validate_fields().contains("destination"));
    }

    #[test]
    fn negative_counts_are_rejected() {
        let mut flight = input();
        flight.available_seats = -1;
        flight.number_of_stops = -2;
        flight.child_price = Some(Decimal::new(-1, 0));
        let errors = flight.validate_fields();
        assert!(errors.contains("available_seats"));
        assert!(errors.contains("number_of_stops"));
        assert!(errors.contains("child_price"));
    }

    #[test]
    fn derived_fields() {
        let i = input();
        let now = Utc::now();
        let mut flight = Flight {
            id: 1,
            flight_code: i.flight_code,
            airline_id: 1,
            origin: i.origin,
            destination: i.destination,
            departure_datetime: i.departure_datetime,
            arrival_datetime: i.arrival_datetime,
            number_of_stops: 0,
            adult_price: i.adult_price,
            child_price: None,
            special_price: None,
            available_seats: 1,
            status: FlightStatus::Scheduled,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(flight.duration_minutes(), 55);
        assert!(flight.is_available());
        flight.status = FlightStatus::Delayed;
        assert!(!flight.is_available());
        flight.status = FlightStatus::Scheduled;
        flight.available_seats = 0;
        assert!(!flight.is_available());
    }
}
