//! Salted password records for the evaluation gate
//!
//! Same KDF family as the envelope key, but every parameter is stored in
//! the record so verification needs nothing out of band.

use std::num::NonZeroU32;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::pbkdf2;
use serde::{Deserialize, Serialize};

use crate::cipher::{random_bytes, KEY_SIZE, SALT_SIZE};
use crate::Result;

/// Default PBKDF2 iteration count for new records
pub const DEFAULT_ITERATIONS: u32 = 200_000;

fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

/// A PBKDF2-HMAC-SHA256 password hash with its parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordRecord {
    /// Salt (base64)
    pub salt: String,
    /// Derived hash (base64, 32 bytes)
    pub hash: String,
    /// PBKDF2 iteration count
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

/// Hash a password with a fresh random salt and the default iteration count
pub fn hash_password(password: &str) -> Result<PasswordRecord> {
    let salt = random_bytes::<SALT_SIZE>()?;
    Ok(hash_password_with(password, &salt, DEFAULT_ITERATIONS))
}

/// Hash a password with explicit parameters
///
/// An iteration count of zero is raised to one.
pub fn hash_password_with(password: &str, salt: &[u8], iterations: u32) -> PasswordRecord {
    let rounds = NonZeroU32::new(iterations).unwrap_or(NonZeroU32::MIN);
    let mut hash = [0u8; KEY_SIZE];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        rounds,
        salt,
        password.as_bytes(),
        &mut hash,
    );
    PasswordRecord {
        salt: STANDARD.encode(salt),
        hash: STANDARD.encode(hash),
        iterations: rounds.get(),
    }
}

/// Check `password` against a stored record
///
/// The comparison runs inside `ring::pbkdf2::verify`, which is constant
/// time over the derived value. A malformed record never verifies.
pub fn verify_password(password: &str, record: &PasswordRecord) -> bool {
    let Some(rounds) = NonZeroU32::new(record.iterations) else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (STANDARD.decode(&record.salt), STANDARD.decode(&record.hash))
    else {
        return false;
    };
    if expected.is_empty() {
        return false;
    }
    pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        rounds,
        &salt,
        password.as_bytes(),
        &expected,
    )
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Low iteration count keeps the suite fast; the count travels with the record.
    const FAST: u32 = 1_000;

    #[test]
    fn test_hash_then_verify() {
        let record = hash_password_with("proctor-only", b"0123456789abcdef", FAST);
        assert!(verify_password("proctor-only", &record));
        assert!(!verify_password("proctor-Only", &record));
        assert!(!verify_password("", &record));
    }

    #[test]
    fn test_default_record_parameters() {
        let record = hash_password("eval").unwrap();
        assert_eq!(record.iterations, DEFAULT_ITERATIONS);
        assert_eq!(STANDARD.decode(&record.salt).unwrap().len(), SALT_SIZE);
        assert_eq!(STANDARD.decode(&record.hash).unwrap().len(), KEY_SIZE);
        assert!(verify_password("eval", &record));
    }

    #[test]
    fn test_fresh_salt_per_record() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_iterations_are_part_of_the_record() {
        let mut record = hash_password_with("pw", b"salt-salt-salt!!", FAST);
        record.iterations = FAST + 1;
        assert!(!verify_password("pw", &record));
    }

    #[test]
    fn test_missing_iterations_defaults() {
        let record = hash_password_with("pw", b"salt-salt-salt!!", DEFAULT_ITERATIONS);
        let json = format!(r#"{{"salt":"{}","hash":"{}"}}"#, record.salt, record.hash);
        let parsed: PasswordRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.iterations, DEFAULT_ITERATIONS);
        assert!(verify_password("pw", &parsed));
    }

    #[test]
    fn test_malformed_records_never_verify() {
        let good = hash_password_with("pw", b"salt-salt-salt!!", FAST);

        let mut zero = good.clone();
        zero.iterations = 0;
        assert!(!verify_password("pw", &zero));

        let mut garbage = good.clone();
        garbage.hash = "%%%".to_string();
        assert!(!verify_password("pw", &garbage));

        let mut empty = good;
        empty.hash = String::new();
        assert!(!verify_password("pw", &empty));
    }
}
