use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

use super::RowRef;
use crate::validation::{self, normalize_optional, FieldErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    #[default]
    Pending,
    #[serde(alias = "RESERVED")]
    Confirmed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Confirmed => "CONFIRMED",
            RequestStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RequestStatus::Pending),
            "CONFIRMED" | "RESERVED" => Ok(RequestStatus::Confirmed),
            "CANCELLED" => Ok(RequestStatus::Cancelled),
            other => Err(format!("\"{}\" is not a valid request status", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlightRequest {
    pub id: i64,
    pub user_id: i64,
    pub destination_id: i64,
    pub origin_id: Option<i64>,
    pub travel_date: NaiveDate,
    pub status: RequestStatus,
    pub reservation_code: Option<String>,
    pub reserved_by: Option<i64>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub companions: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlightRequest {
    /// Marks the request as handled by an operator. Allowed from any status.
    pub fn confirm(&mut self, operator: i64, at: DateTime<Utc>) {
        self.status = RequestStatus::Confirmed;
        self.reserved_by = Some(operator);
        self.reserved_at = Some(at);
    }

    pub fn cancel(&mut self) {
        self.status = RequestStatus::Cancelled;
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FlightRequestSummary {
    pub id: i64,
    pub user: i64,
    pub user_username: String,
    pub destination: RowRef,
    pub origin: Option<RowRef>,
    pub travel_date: NaiveDate,
    pub status: RequestStatus,
    pub companions: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FlightRequestDetail {
    pub id: i64,
    pub user: i64,
    pub user_username: String,
    pub destination: RowRef,
    pub origin: Option<RowRef>,
    pub travel_date: NaiveDate,
    pub status: RequestStatus,
    pub reservation_code: Option<String>,
    pub reserved_by: Option<i64>,
    pub reserved_by_username: Option<String>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub companions: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Related rows needed to render a request.
pub struct RequestContext<'a> {
    pub username: &'a str,
    pub destination: RowRef,
    pub origin: Option<RowRef>,
    pub reserved_by_username: Option<&'a str>,
}

impl FlightRequestSummary {
    pub fn new(r: &FlightRequest, ctx: RequestContext<'_>) -> Self {
        Self {
            id: r.id,
            user: r.user_id,
            user_username: ctx.username.to_string(),
            destination: ctx.destination,
            origin: ctx.origin,
            travel_date: r.travel_date,
            status: r.status,
            companions: r.companions,
            created_at: r.created_at,
        }
    }
}

impl FlightRequestDetail {
    pub fn new(r: &FlightRequest, ctx: RequestContext<'_>) -> Self {
        Self {
            id: r.id,
            user: r.user_id,
            user_username: ctx.username.to_string(),
            destination: ctx.destination,
            origin: ctx.origin,
            travel_date: r.travel_date,
            status: r.status,
            reservation_code: r.reservation_code.clone(),
            reserved_by: r.reserved_by,
            reserved_by_username: ctx.reserved_by_username.map(str::to_string),
            reserved_at: r.reserved_at,
            notes: r.notes.clone(),
            companions: r.companions,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

fn default_companions() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FlightRequestInput {
    pub destination: i64,
    #[serde(default)]
    pub origin: Option<i64>,
    pub travel_date: NaiveDate,
    #[serde(default)]
    pub status: Option<RequestStatus>,
    #[validate(range(min = 1, max = 10, message = "Companions must be between 1 and 10."))]
    #[serde(default = "default_companions")]
    pub companions: i32,
    #[serde(default)]
    pub notes: Option<String>,
}

impl FlightRequestInput {
    pub fn normalized(self) -> Self {
        Self {
            notes: normalize_optional(self.notes),
            ..self
        }
    }

    pub fn validate_fields(&self) -> FieldErrors {
        let mut errors = validation::check(self);
        if self.origin == Some(self.destination) {
            errors.add("origin", "Origin and destination cannot be the same.");
        }
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlightRequestPatch {
    pub destination: Option<i64>,
    pub origin: Option<i64>,
    pub travel_date: Option<NaiveDate>,
    pub status: Option<RequestStatus>,
    pub companions: Option<i32>,
    pub notes: Option<String>,
}

impl FlightRequestPatch {
    pub fn apply(self, current: &FlightRequest) -> FlightRequestInput {
        FlightRequestInput {
            destination: self.destination.unwrap_or(current.destination_id),
            origin: self.origin.or(current.origin_id),
            travel_date: self.travel_date.unwrap_or(current.travel_date),
            status: Some(self.status.unwrap_or(current.status)),
            companions: self.companions.unwrap_or(current.companions),
            notes: self.notes.or_else(|| current.notes.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(companions: i32) -> FlightRequestInput {
        FlightRequestInput {
            destination: 2,
            origin: Some(1),
            travel_date: NaiveDate::from_ymd_opt(2026, 12, 20).unwrap(),
            status: None,
            companions,
            notes: None,
        }
    }

    #[test]
    fn companions_bounds() {
        assert!(input(1).validate_fields().is_empty());
        assert!(input(10).validate_fields().is_empty());
        assert!(input(0).validate_fields().contains("companions"));
        assert!(input(11).validate_fields().contains("companions"));
    }

    #[test]
    fn reserved_is_an_alias_of_confirmed() {
        let status: RequestStatus = serde_json::from_str("\"RESERVED\"").unwrap();
        assert_eq!(status, RequestStatus::Confirmed);
        assert_eq!("RESERVED".parse::<RequestStatus>(), Ok(RequestStatus::Confirmed));
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"CONFIRMED\"");
    }

    #[test]
    fn companions_default_to_one() {
        let parsed: FlightRequestInput =
            serde_json::from_str(r#"{"destination": 3, "travel_date": "2026-12-20"}"#).unwrap();
        assert_eq!(parsed.companions, 1);
        assert_eq!(parsed.origin, None);
    }

    #[test]
    fn confirm_records_operator() {
        let now = Utc::now();
        let mut request = FlightRequest {
            id: 1,
            user_id: 5,
            destination_id: 2,
            origin_id: None,
            travel_date: NaiveDate::from_ymd_opt(2026, 12, 20).unwrap(),
            status: RequestStatus::Cancelled,
            reservation_code: None,
            reserved_by: None,
            reserved_at: None,
            notes: None,
            companions: 1,
            created_at: now,
            updated_at: now,
        };
        request.confirm(9, now);
        assert_eq!(request.status, RequestStatus::Confirmed);
        assert_eq!(request.reserved_by, Some(9));
        assert_eq!(request.reserved_at, Some(now));
    }
}
