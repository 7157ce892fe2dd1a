//! Security module for session identity and SMS PIN handling

pub mod pin;
pub mod session;
pub mod verifier;

pub use pin::{hash_pin, validate_pin, verify_pin};
pub use session::{IdentityGate, SessionManager};
pub use verifier::IdentityVerifier;
