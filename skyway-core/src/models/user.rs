use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation::{self, normalize_optional, normalize_text, FieldErrors};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub is_operator: bool,
    pub is_staff: bool,
    pub is_active: bool,
    pub date_of_birth: Option<NaiveDate>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub profile_image_url: Option<String>,
    pub date_joined: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Whole years lived as of `today`.
    pub fn age(&self, today: NaiveDate) -> Option<i32> {
        let dob = self.date_of_birth?;
        let mut years = today.year() - dob.year();
        if (today.month(), today.day()) < (dob.month(), dob.day()) {
            years -= 1;
        }
        Some(years.max(0))
    }
}

/// Full profile: admins, and users looking at themselves.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserDetail {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub age: Option<i32>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub profile_image_url: Option<String>,
    pub is_operator: bool,
    pub is_staff: bool,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserDetail {
    pub fn new(u: &User, today: NaiveDate) -> Self {
        Self {
            id: u.id,
            email: u.email.clone(),
            username: u.username.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            phone: u.phone.clone(),
            date_of_birth: u.date_of_birth,
            age: u.age(today),
            country: u.country.clone(),
            city: u.city.clone(),
            profile_image_url: u.profile_image_url.clone(),
            is_operator: u.is_operator,
            is_staff: u.is_staff,
            is_active: u.is_active,
            date_joined: u.date_joined,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

/// What a signed-in user may see about somebody else.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserPublic {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub profile_image_url: Option<String>,
}

impl From<&User> for UserPublic {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            country: u.country.clone(),
            city: u.city.clone(),
            profile_image_url: u.profile_image_url.clone(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UserInput {
    #[validate(email(message = "Enter a valid email address."))]
    pub email: String,
    #[validate(length(min = 1, max = 150, message = "Ensure this field has between 1 and 150 characters."))]
    pub username: String,
    #[validate(length(max = 150, message = "Ensure this field has no more than 150 characters."))]
    #[serde(default)]
    pub first_name: String,
    #[validate(length(max = 150, message = "Ensure this field has no more than 150 characters."))]
    #[serde(default)]
    pub last_name: String,
    #[validate(length(max = 15, message = "Ensure this field has no more than 15 characters."))]
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub is_operator: bool,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

impl UserInput {
    pub fn normalized(self) -> Self {
        Self {
            email: self.email.trim().to_lowercase(),
            username: normalize_text(&self.username),
            first_name: normalize_text(&self.first_name),
            last_name: normalize_text(&self.last_name),
            phone: normalize_optional(self.phone),
            country: normalize_optional(self.country),
            city: normalize_optional(self.city),
            profile_image_url: normalize_optional(self.profile_image_url),
            ..self
        }
    }

    pub fn validate_fields(&self, today: NaiveDate) -> FieldErrors {
        let mut errors = validation::check(self);
        if matches!(self.date_of_birth, Some(dob) if dob > today) {
            errors.add("date_of_birth", "Date of birth cannot be in the future.");
        }
        errors
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub email: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub is_operator: Option<bool>,
    pub is_staff: Option<bool>,
    pub is_active: Option<bool>,
    pub date_of_birth: Option<NaiveDate>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub profile_image_url: Option<String>,
}

impl UserPatch {
    pub fn apply(self, current: &User) -> UserInput {
        UserInput {
            email: self.email.unwrap_or_else(|| current.email.clone()),
            username: self.username.unwrap_or_else(|| current.username.clone()),
            first_name: self.first_name.unwrap_or_else(|| current.first_name.clone()),
            last_name: self.last_name.unwrap_or_else(|| current.last_name.clone()),
            phone: self.phone.or_else(|| current.phone.clone()),
            is_operator: self.is_operator.unwrap_or(current.is_operator),
            is_staff: self.is_staff.unwrap_or(current.is_staff),
            is_active: self.is_active.unwrap_or(current.is_active),
            date_of_birth: self.date_of_birth.or(current.date_of_birth),
            country: self.country.or_else(|| current.country.clone()),
            city: self.city.or_else(|| current.city.clone()),
            profile_image_url: self
                .profile_image_url
                .or_else(|| current.profile_image_url.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(dob: Option<NaiveDate>) -> User {
        let now = Utc::now();
        User {
            id: 3,
            username: "ana".into(),
            email: "ana@example.com".into(),
            first_name: "Ana".into(),
            last_name: "".into(),
            phone: None,
            is_operator: false,
            is_staff: false,
            is_active: true,
            date_of_birth: dob,
            country: None,
            city: None,
            profile_image_url: None,
            date_joined: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn age_counts_birthdays() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let u = user(NaiveDate::from_ymd_opt(2000, 10, 15));
        assert_eq!(u.age(today), Some(26));
        let u = user(NaiveDate::from_ymd_opt(2000, 10, 16));
        assert_eq!(u.age(today), Some(25));
        assert_eq!(user(None).age(today), None);
    }

    #[test]
    fn full_name_is_trimmed() {
        assert_eq!(user(None).full_name(), "Ana");
    }

    #[test]
    fn email_must_be_valid() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let input: UserInput =
            serde_json::from_str(r#"{"email": "not-an-email", "username": "x"}"#).unwrap();
        assert!(input.validate_fields(today).contains("email"));
        let input: UserInput =
            serde_json::from_str(r#"{"email": " Ana@Example.com ", "username": "x"}"#).unwrap();
        let input = input.normalized();
        assert_eq!(input.email, "ana@example.com");
        assert!(input.is_active);
        assert!(input.validate_fields(today).is_empty());
    }
}
