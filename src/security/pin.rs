//! SMS PIN hashing
//!
//! PINs are stored as Argon2id PHC strings. Verification goes through the
//! hasher's own comparison so matching never touches raw hash bytes.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::{Error, Result};

/// Shortest accepted PIN
const MIN_PIN_LENGTH: usize = 4;

/// Longest accepted PIN
const MAX_PIN_LENGTH: usize = 32;

/// Check that a PIN can be sent as the middle word of an SMS
///
/// # Errors
///
/// Returns `InvalidInput` if the PIN has the wrong length or contains whitespace
pub fn validate_pin(pin: &str) -> Result<()> {
    let len = pin.chars().count();
    if !(MIN_PIN_LENGTH..=MAX_PIN_LENGTH).contains(&len) {
        return Err(Error::InvalidInput(format!(
            "SMS PIN must be {MIN_PIN_LENGTH}-{MAX_PIN_LENGTH} characters"
        )));
    }
    if pin.chars().any(char::is_whitespace) {
        return Err(Error::InvalidInput(
            "SMS PIN must not contain whitespace".to_string(),
        ));
    }
    Ok(())
}

/// Hash a PIN with a fresh random salt
///
/// # Errors
///
/// Returns error if the hasher rejects its parameters
pub fn hash_pin(pin: &str) -> Result<String> {
    let salt_bytes: [u8; 16] = rand::random();
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| Error::Auth(format!("failed to encode salt: {e}")))?;

    Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Auth(format!("failed to hash PIN: {e}")))
}

/// Verify a PIN against a stored hash
///
/// An unparsable hash never matches.
#[must_use]
pub fn verify_pin(pin: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::warn!("stored SMS PIN hash is not a valid PHC string");
        return false;
    };

    Argon2::default()
        .verify_password(pin.as_bytes(), &parsed)
        .is_ok()
}
