use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error};

use crate::models::Reservation;
use crate::repository::{NewReservation, ReservationRepository, StoreError};
use crate::CoreError;

pub const PREFIX: &str = "RES-";
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const LENGTH: usize = 6;
const MAX_ATTEMPTS: usize = 64;

pub fn generate() -> String {
    generate_with(&mut rand::thread_rng())
}

pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut code = String::with_capacity(PREFIX.len() + LENGTH);
    code.push_str(PREFIX);
    for _ in 0..LENGTH {
        let idx = rng.gen_range(0..ALPHABET.len());
        code.push(ALPHABET[idx] as char);
    }
    code
}

/// `RES-` followed by six upper-case letters or digits.
pub fn is_valid(code: &str) -> bool {
    code.strip_prefix(PREFIX).is_some_and(|rest| {
        rest.len() == LENGTH
            && rest
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    })
}

/// Inserts `draft` under a freshly generated code, retrying when the code is
/// already stored or loses a race on the unique constraint.
pub async fn insert_with_unique_code(
    repo: &dyn ReservationRepository,
    draft: NewReservation,
) -> Result<Reservation, CoreError> {
    let mut rng = StdRng::from_entropy();
    insert_with_rng(repo, draft, &mut rng).await
}

pub async fn insert_with_rng<R: Rng + Send>(
    repo: &dyn ReservationRepository,
    mut draft: NewReservation,
    rng: &mut R,
) -> Result<Reservation, CoreError> {
    for attempt in 1..=MAX_ATTEMPTS {
        let code = generate_with(rng);
        if repo.code_exists(&code).await? {
            debug!(attempt, code = %code, "reservation code already taken");
            continue;
        }
        draft.reservation_code = code;
        match repo.insert(&draft).await {
            Ok(reservation) => return Ok(reservation),
            Err(StoreError::UniqueViolation { field }) if field == "reservation_code" => {
                debug!(attempt, "reservation code collided on insert");
            }
            Err(e) => return Err(e.into()),
        }
    }
    error!(attempts = MAX_ATTEMPTS, "could not allocate a reservation code");
    Err(CoreError::Internal(
        "could not allocate a unique reservation code".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_have_the_expected_shape() {
        for _ in 0..100 {
            let code = generate();
            assert!(is_valid(&code), "{}", code);
        }
    }

    #[test]
    fn ten_thousand_codes_are_distinct() {
        let mut rng = StdRng::seed_from_u64(7);
        let codes: HashSet<String> = (0..10_000).map(|_| generate_with(&mut rng)).collect();
        assert_eq!(codes.len(), 10_000);
        assert!(codes.iter().all(|c| is_valid(c)));
    }

    #[test]
    fn validation_rejects_lookalikes() {
        assert!(is_valid("RES-A1B2C3"));
        assert!(!is_valid("RES-a1b2c3"));
        assert!(!is_valid("RES-A1B2C"));
        assert!(!is_valid("REX-A1B2C3"));
        assert!(!is_valid("RES-A1B2C3D"));
    }
}
