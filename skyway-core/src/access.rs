use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
            Role::SuperAdmin => "SUPER_ADMIN",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            "SUPER_ADMIN" => Ok(Role::SuperAdmin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// An authenticated caller as established from a verified bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: i64,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Any,
    Authenticated,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Airlines,
    Destinations,
    Flights,
    FlightRequests,
    Reservations,
    ReservationPassengers,
    Users,
}

impl Resource {
    pub const ALL: [Resource; 7] = [
        Resource::Airlines,
        Resource::Destinations,
        Resource::Flights,
        Resource::FlightRequests,
        Resource::Reservations,
        Resource::ReservationPassengers,
        Resource::Users,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Airlines => "airlines",
            Resource::Destinations => "destinations",
            Resource::Flights => "flights",
            Resource::FlightRequests => "flight_requests",
            Resource::Reservations => "reservations",
            Resource::ReservationPassengers => "reservation_passengers",
            Resource::Users => "users",
        }
    }

    /// Cached responses of these resources differ per caller.
    pub fn per_user(self) -> bool {
        matches!(
            self,
            Resource::FlightRequests
                | Resource::Reservations
                | Resource::ReservationPassengers
                | Resource::Users
        )
    }

    /// Resources whose serialized rows embed data from `self`.
    pub fn dependents(self) -> &'static [Resource] {
        match self {
            Resource::Airlines => &[Resource::Flights],
            Resource::Destinations => &[Resource::FlightRequests],
            Resource::FlightRequests => &[Resource::Reservations],
            Resource::Reservations => &[Resource::ReservationPassengers],
            Resource::Users => &[Resource::FlightRequests, Resource::Reservations],
            Resource::Flights | Resource::ReservationPassengers => &[],
        }
    }
}

const CRUD_READ: [&str; 2] = ["list", "retrieve"];

/// Role needed to run `action` on `resource`. Unknown actions require an admin.
pub fn requirement(resource: Resource, action: &str) -> Requirement {
    use Requirement::*;

    match resource {
        Resource::Airlines => {
            if CRUD_READ.contains(&action) {
                Authenticated
            } else {
                Admin
            }
        }
        Resource::Destinations => match action {
            "active" | "by_province" | "nearby" => Authenticated,
            a if CRUD_READ.contains(&a) => Authenticated,
            _ => Admin,
        },
        Resource::Flights => match action {
            "search_route" | "available" | "by_airline" => Any,
            a if CRUD_READ.contains(&a) => Any,
            _ => Admin,
        },
        Resource::FlightRequests => match action {
            "create" | "my_requests" | "pending" | "cancel" => Authenticated,
            a if CRUD_READ.contains(&a) => Authenticated,
            _ => Admin,
        },
        Resource::Reservations => match action {
            "create" | "my_reservations" | "pending" | "confirmed" | "recent" | "by_flight"
            | "statistics" | "cancel" => Authenticated,
            a if CRUD_READ.contains(&a) => Authenticated,
            _ => Admin,
        },
        Resource::ReservationPassengers => match action {
            "create" | "by_reservation" | "main_passengers" | "companions" | "adults"
            | "children" | "statistics" | "search_by_document" | "by_reservation_code"
            | "unassigned_seats" | "update_category" => Authenticated,
            a if CRUD_READ.contains(&a) => Authenticated,
            _ => Admin,
        },
        Resource::Users => match action {
            "me" => Authenticated,
            a if CRUD_READ.contains(&a) => Authenticated,
            _ => Admin,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("Authentication credentials were not provided")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
}

/// Checks the role requirement of an action. Anonymous callers hitting a
/// protected action get `Unauthenticated`; signed-in non-admins hitting an
/// admin action get `Forbidden`.
pub fn authorize(
    caller: Option<&Caller>,
    resource: Resource,
    action: &str,
) -> Result<(), AccessError> {
    match (requirement(resource, action), caller) {
        (Requirement::Any, _) => Ok(()),
        (_, None) => Err(AccessError::Unauthenticated),
        (Requirement::Authenticated, Some(_)) => Ok(()),
        (Requirement::Admin, Some(c)) if c.is_admin() => Ok(()),
        (Requirement::Admin, Some(_)) => Err(AccessError::Forbidden),
    }
}

/// Rows of an owned resource a caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    OwnedBy(i64),
    Nothing,
}

impl Scope {
    pub fn permits(&self, owner: i64) -> bool {
        match self {
            Scope::All => true,
            Scope::OwnedBy(user_id) => *user_id == owner,
            Scope::Nothing => false,
        }
    }

    pub fn owner(&self) -> Option<i64> {
        match self {
            Scope::OwnedBy(user_id) => Some(*user_id),
            _ => None,
        }
    }
}

pub fn scope(caller: Option<&Caller>) -> Scope {
    match caller {
        Some(c) if c.is_admin() => Scope::All,
        Some(c) => Scope::OwnedBy(c.user_id),
        None => Scope::Nothing,
    }
}

/// Object-level gate for an owned row: `Ok(())` when the row's owner is in
/// scope, `Forbidden` when it exists outside it.
pub fn check_owner(scope: Scope, owner: i64) -> Result<(), AccessError> {
    if scope.permits(owner) {
        Ok(())
    } else {
        Err(AccessError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: Caller = Caller {
        user_id: 7,
        role: Role::User,
    };
    const ADMIN: Caller = Caller {
        user_id: 1,
        role: Role::Admin,
    };

    #[test]
    fn flights_are_public_but_writes_need_admin() {
        assert!(authorize(None, Resource::Flights, "list").is_ok());
        assert!(authorize(None, Resource::Flights, "search_route").is_ok());
        assert_eq!(
            authorize(None, Resource::Flights, "create"),
            Err(AccessError::Unauthenticated)
        );
        assert_eq!(
            authorize(Some(&USER), Resource::Flights, "create"),
            Err(AccessError::Forbidden)
        );
        assert!(authorize(Some(&ADMIN), Resource::Flights, "create").is_ok());
    }

    #[test]
    fn owners_may_cancel_but_not_confirm() {
        assert!(authorize(Some(&USER), Resource::Reservations, "cancel").is_ok());
        assert_eq!(
            authorize(Some(&USER), Resource::Reservations, "confirm"),
            Err(AccessError::Forbidden)
        );
        assert_eq!(
            authorize(Some(&USER), Resource::FlightRequests, "confirm"),
            Err(AccessError::Forbidden)
        );
    }

    #[test]
    fn unknown_actions_fail_closed() {
        assert_eq!(requirement(Resource::Airlines, "export"), Requirement::Admin);
        assert_eq!(requirement(Resource::Flights, "reprice"), Requirement::Admin);
    }

    #[test]
    fn super_admin_is_admin() {
        let caller = Caller {
            user_id: 2,
            role: Role::SuperAdmin,
        };
        assert_eq!(scope(Some(&caller)), Scope::All);
        assert!(authorize(Some(&caller), Resource::Users, "destroy").is_ok());
    }

    #[test]
    fn scope_by_role() {
        assert_eq!(scope(Some(&ADMIN)), Scope::All);
        assert_eq!(scope(Some(&USER)), Scope::OwnedBy(7));
        assert_eq!(scope(None), Scope::Nothing);
        assert!(check_owner(Scope::OwnedBy(7), 7).is_ok());
        assert_eq!(check_owner(Scope::OwnedBy(7), 8), Err(AccessError::Forbidden));
        assert!(!Scope::Nothing.permits(7));
    }

    #[test]
    fn role_parsing() {
        assert_eq!("SUPER_ADMIN".parse::<Role>(), Ok(Role::SuperAdmin));
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn per_user_resources() {
        assert!(Resource::Reservations.per_user());
        assert!(!Resource::Airlines.per_user());
        assert_eq!(Resource::Airlines.dependents(), &[Resource::Flights]);
    }
}
