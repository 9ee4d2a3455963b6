use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

use super::flight_request::FlightRequest;
use super::user::User;
use crate::validation::{self, FieldErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn display(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "Pending",
            ReservationStatus::Confirmed => "Confirmed",
            ReservationStatus::Cancelled => "Cancelled",
        }
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            other => Err(format!(
                "\"{}\" is not a valid status. Expected one of: pending, confirmed, cancelled",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("A cancelled reservation cannot be moved to {to}")]
    FromCancelled { to: &'static str },
    #[error("Reservation is already {0}")]
    Already(&'static str),
}

impl From<TransitionError> for FieldErrors {
    fn from(err: TransitionError) -> Self {
        FieldErrors::single("status", err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    pub id: i64,
    pub reservation_code: String,
    pub user_id: i64,
    pub flight_id: i64,
    pub reservation_date: DateTime<Utc>,
    pub total_passengers: i32,
    pub total_amount: Decimal,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Moves to `next`. Cancelled is terminal: re-cancelling is a no-op and any
    /// other move out of it is rejected. Returns whether the status changed.
    pub fn transition(&mut self, next: ReservationStatus) -> Result<bool, TransitionError> {
        if self.status == ReservationStatus::Cancelled {
            if next == ReservationStatus::Cancelled {
                return Ok(false);
            }
            return Err(TransitionError::FromCancelled { to: next.as_str() });
        }
        let changed = self.status != next;
        self.status = next;
        Ok(changed)
    }

    /// Pending → Confirmed only.
    pub fn confirm(&mut self) -> Result<(), TransitionError> {
        match self.status {
            ReservationStatus::Pending => {
                self.status = ReservationStatus::Confirmed;
                Ok(())
            }
            ReservationStatus::Confirmed => Err(TransitionError::Already("confirmed")),
            ReservationStatus::Cancelled => Err(TransitionError::FromCancelled { to: "confirmed" }),
        }
    }

    /// Returns false when the reservation was already cancelled.
    pub fn cancel(&mut self) -> bool {
        if self.status == ReservationStatus::Cancelled {
            return false;
        }
        self.status = ReservationStatus::Cancelled;
        true
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReservationSummary {
    pub id: i64,
    pub reservation_code: String,
    pub user: i64,
    pub user_username: String,
    pub flight: i64,
    pub flight_id: i64,
    pub reservation_date: DateTime<Utc>,
    pub total_passengers: i32,
    pub total_amount: Decimal,
    pub status: ReservationStatus,
    pub status_display: &'static str,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReservationSummary {
    pub fn new(r: &Reservation, username: &str) -> Self {
        Self {
            id: r.id,
            reservation_code: r.reservation_code.clone(),
            user: r.user_id,
            user_username: username.to_string(),
            flight: r.flight_id,
            flight_id: r.flight_id,
            reservation_date: r.reservation_date,
            total_passengers: r.total_passengers,
            total_amount: r.total_amount,
            status: r.status,
            status_display: r.status.display(),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: String,
}

impl From<&User> for UserInfo {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
            full_name: u.full_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FlightInfo {
    pub id: i64,
    pub status: &'static str,
    pub reservation_code: Option<String>,
    pub travel_date: NaiveDate,
    pub origin_id: Option<i64>,
    pub destination_id: i64,
    pub notes: Option<String>,
}

impl From<&FlightRequest> for FlightInfo {
    fn from(fr: &FlightRequest) -> Self {
        Self {
            id: fr.id,
            status: fr.status.as_str(),
            reservation_code: fr.reservation_code.clone(),
            travel_date: fr.travel_date,
            origin_id: fr.origin_id,
            destination_id: fr.destination_id,
            notes: fr.notes.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReservationDetail {
    pub id: i64,
    pub reservation_code: String,
    pub user: i64,
    pub flight: i64,
    pub reservation_date: DateTime<Utc>,
    pub total_passengers: i32,
    pub total_amount: Decimal,
    pub status: ReservationStatus,
    pub status_display: &'static str,
    pub user_info: Option<UserInfo>,
    pub flight_info: Option<FlightInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReservationDetail {
    pub fn new(r: &Reservation, user: Option<&User>, flight: Option<&FlightRequest>) -> Self {
        Self {
            id: r.id,
            reservation_code: r.reservation_code.clone(),
            user: r.user_id,
            flight: r.flight_id,
            reservation_date: r.reservation_date,
            total_passengers: r.total_passengers,
            total_amount: r.total_amount,
            status: r.status,
            status_display: r.status.display(),
            user_info: user.map(UserInfo::from),
            flight_info: flight.map(FlightInfo::from),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Counts over the caller's scope; amount and passengers sum confirmed rows only.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReservationStatistics {
    pub total: i64,
    pub pending: i64,
    pub confirmed: i64,
    pub cancelled: i64,
    pub total_amount: Decimal,
    pub total_passengers: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReservationInput {
    pub flight: i64,
    /// Only honoured for admins; owners always book for themselves.
    #[serde(default)]
    pub user: Option<i64>,
    #[serde(default)]
    pub reservation_date: Option<DateTime<Utc>>,
    #[validate(range(min = 1, message = "Total passengers must be at least 1."))]
    pub total_passengers: i32,
    pub total_amount: Decimal,
    #[serde(default)]
    pub status: Option<ReservationStatus>,
}

impl ReservationInput {
    pub fn validate_fields(&self) -> FieldErrors {
        let mut errors = validation::check(self);
        if let Some(err) = amount_error(self.total_amount) {
            errors.add("total_amount", err);
        }
        errors
    }
}

/// Message for a non-positive amount.
pub fn amount_error(amount: Decimal) -> Option<&'static str> {
    if amount <= Decimal::ZERO {
        Some("Total amount must be greater than 0.")
    } else {
        None
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReservationPatch {
    pub flight: Option<i64>,
    pub user: Option<i64>,
    pub reservation_date: Option<DateTime<Utc>>,
    pub total_passengers: Option<i32>,
    pub total_amount: Option<Decimal>,
    pub status: Option<ReservationStatus>,
}

impl ReservationPatch {
    pub fn apply(self, current: &Reservation) -> ReservationInput {
        ReservationInput {
            flight: self.flight.unwrap_or(current.flight_id),
            user: Some(self.user.unwrap_or(current.user_id)),
            reservation_date: Some(self.reservation_date.unwrap_or(current.reservation_date)),
            total_passengers: self.total_passengers.unwrap_or(current.total_passengers),
            total_amount: self.total_amount.unwrap_or(current.total_amount),
            status: self.status.or(Some(current.status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reservation(status: ReservationStatus) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: 1,
            reservation_code: "RES-ABC123".into(),
            user_id: 4,
            flight_id: 2,
            reservation_date: now,
            total_passengers: 2,
            total_amount: Decimal::new(25000, 2),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_reservation_lifecycle() {
        let mut r = reservation(ReservationStatus::Pending);
        assert!(r.confirm().is_ok());
        assert_eq!(r.status, ReservationStatus::Confirmed);
        assert_eq!(r.confirm(), Err(TransitionError::Already("confirmed")));
        assert!(r.cancel());
        assert_eq!(r.status, ReservationStatus::Cancelled);
    }

    #[test]
    fn cancelled_is_terminal() {
        let mut r = reservation(ReservationStatus::Cancelled);
        assert!(!r.cancel());
        assert_eq!(r.transition(ReservationStatus::Cancelled), Ok(false));
        assert!(r.transition(ReservationStatus::Pending).is_err());
        assert!(r.transition(ReservationStatus::Confirmed).is_err());
        assert!(r.confirm().is_err());
        assert_eq!(r.status, ReservationStatus::Cancelled);
    }

    #[test]
    fn open_statuses_move_freely() {
        let mut r = reservation(ReservationStatus::Confirmed);
        assert_eq!(r.transition(ReservationStatus::Pending), Ok(true));
        assert_eq!(r.transition(ReservationStatus::Pending), Ok(false));
    }

    #[test]
    fn amounts_and_passengers_must_be_positive() {
        let input = ReservationInput {
            flight: 1,
            user: None,
            reservation_date: None,
            total_passengers: 0,
            total_amount: Decimal::ZERO,
            status: None,
        };
        let errors = input.validate_fields();
        assert!(errors.contains("total_passengers"));
        assert!(errors.contains("total_amount"));
    }

    #[test]
    fn transition_errors_report_on_status() {
        let errors: FieldErrors = TransitionError::FromCancelled { to: "pending" }.into();
        assert!(errors.contains("status"));
    }
}
