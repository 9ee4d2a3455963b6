use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation::{self, normalize_code, normalize_optional, normalize_text, FieldErrors};

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Destination {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub province: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_active: bool,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Great-circle distance in kilometres.
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

impl Destination {
    /// `None` unless both latitude and longitude are stored.
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DestinationSummary {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub province: String,
    pub is_active: bool,
    pub image_url: Option<String>,
}

impl From<&Destination> for DestinationSummary {
    fn from(d: &Destination) -> Self {
        Self {
            id: d.id,
            name: d.name.clone(),
            code: d.code.clone(),
            province: d.province.clone(),
            is_active: d.is_active,
            image_url: d.image_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DestinationDetail {
    #[serde(flatten)]
    pub destination: Destination,
    pub coordinates: Option<Coordinates>,
}

impl From<&Destination> for DestinationDetail {
    fn from(d: &Destination) -> Self {
        Self {
            coordinates: d.coordinates(),
            destination: d.clone(),
        }
    }
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DestinationInput {
    #[validate(
        length(min = 1, max = 10, message = "Ensure this field has between 1 and 10 characters."),
        custom(function = "validation::not_blank")
    )]
    pub code: String,
    #[validate(length(min = 3, max = 100, message = "Name must be at least 3 characters long."))]
    pub name: String,
    #[validate(
        length(max = 100, message = "Ensure this field has no more than 100 characters."),
        custom(function = "validation::not_blank")
    )]
    pub province: String,
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90."))]
    #[serde(default)]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180."))]
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[validate(length(max = 500, message = "Ensure this field has no more than 500 characters."))]
    #[serde(default)]
    pub image_url: Option<String>,
}

impl DestinationInput {
    pub fn normalized(self) -> Self {
        Self {
            code: normalize_code(&self.code),
            name: normalize_text(&self.name),
            province: normalize_text(&self.province),
            image_url: normalize_optional(self.image_url).filter(|u| !u.is_empty()),
            ..self
        }
    }

    pub fn validate_fields(&self) -> FieldErrors {
        let mut errors = validation::check(self);
        match (self.latitude, self.longitude) {
            (Some(_), None) => errors.add(
                "longitude",
                "Both latitude and longitude must be provided together.",
            ),
            (None, Some(_)) => errors.add(
                "latitude",
                "Both latitude and longitude must be provided together.",
            ),
            _ => {}
        }
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DestinationPatch {
    pub code: Option<String>,
    pub name: Option<String>,
    pub province: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_active: Option<bool>,
    pub image_url: Option<String>,
}

impl DestinationPatch {
    pub fn apply(self, current: &Destination) -> DestinationInput {
        DestinationInput {
            code: self.code.unwrap_or_else(|| current.code.clone()),
            name: self.name.unwrap_or_else(|| current.name.clone()),
            province: self.province.unwrap_or_else(|| current.province.clone()),
            latitude: self.latitude.or(current.latitude),
            longitude: self.longitude.or(current.longitude),
            is_active: self.is_active.unwrap_or(current.is_active),
            image_url: self.image_url.or_else(|| current.image_url.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> DestinationInput {
        DestinationInput {
            code: "uio".into(),
            name: "Quito".into(),
            province: "Pichincha".into(),
            latitude: Some(-0.1807),
            longitude: Some(-78.4678),
            is_active: true,
            image_url: None,
        }
    }

    #[test]
    fn coordinate_pair_boundaries() {
        let mut edge = input();
        edge.latitude = Some(90.0);
        edge.longitude = Some(-180.0);
        assert!(edge.validate_fields().is_empty());

        let mut over = input();
        over.latitude = Some(90.0001);
        assert!(over.validate_fields().contains("latitude"));

        let mut half = input();
        half.longitude = None;
        assert!(half.validate_fields().contains("longitude"));

        let mut neither = input();
        neither.latitude = None;
        neither.longitude = None;
        assert!(neither.validate_fields().is_empty());
    }

    #[test]
    fn normalizes_code() {
        assert_eq!(input().normalized().code, "UIO");
    }

    #[test]
    fn distance_between_quito_and_guayaquil() {
        let quito = Coordinates { lat: -0.1807, lng: -78.4678 };
        let guayaquil = Coordinates { lat: -2.1710, lng: -79.9224 };
        let km = quito.distance_km(&guayaquil);
        assert!((km - 273.0).abs() < 5.0, "got {}", km);
        assert_eq!(quito.distance_km(&quito), 0.0);
    }

    #[test]
    fn detail_carries_coordinates() {
        let now = Utc::now();
        let d = Destination {
            id: 1,
            code: "UIO".into(),
            name: "Quito".into(),
            province: "Pichincha".into(),
            latitude: Some(1.0),
            longitude: None,
            is_active: true,
            image_url: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(DestinationDetail::from(&d)).unwrap();
        assert!(json["coordinates"].is_null());
        assert_eq!(json["code"], "UIO");
    }
}
