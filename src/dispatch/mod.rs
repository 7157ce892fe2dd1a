//! Remote command dispatch
//!
//! A trigger never carries its payload to the device. The invocation context
//! is parked under a one-time token, the token is pushed to the device, and
//! the device trades the token back for the context exactly once.
//!
//! ```text
//! trigger ──► PendingInvocations::issue ──► PushNotifier::notify(token)
//!                                                   │
//!                  device: GET /invocation/{token} ◄┘
//!                          PendingInvocations::consume
//! ```

pub mod pending;
pub mod push;
pub mod service;
pub mod sms;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use pending::PendingInvocations;
pub use push::{DeliveryError, HttpPushNotifier, PushNotifier};
pub use service::CommandDispatcher;
pub use sms::{SmsMessage, SmsResolver};

/// Parameters of one command invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    pub command_id: i64,
    #[serde(default)]
    pub arguments: BTreeMap<String, bool>,
}

impl InvocationContext {
    /// Context with no arguments
    #[must_use]
    pub fn new(command_id: i64) -> Self {
        Self {
            command_id,
            arguments: BTreeMap::new(),
        }
    }
}

/// One-time handle for a pending invocation
///
/// Values are random and fit in 63 bits so they survive signed 64-bit
/// storage on the device side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationToken(u64);

impl InvocationToken {
    /// Draw a fresh random token
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random::<u64>() >> 1)
    }

    /// Raw token value
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for InvocationToken {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for InvocationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InvocationToken {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Errors from the dispatch core
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("device does not implement command {0}")]
    UnknownCommand(String),

    #[error("invalid arguments: {0}")]
    BadArguments(String),

    #[error("unknown or already retrieved invocation token")]
    UnknownToken,

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("no device matches the given PIN")]
    NoMatchingDevice,

    #[error("push delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("registry error: {0}")]
    Registry(#[from] crate::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_63_bit() {
        for _ in 0..1000 {
            assert!(InvocationToken::random().value() <= u64::MAX >> 1);
        }
    }

    #[test]
    fn test_token_text_form() {
        let token = InvocationToken::from(8_675_309);
        assert_eq!(token.to_string(), "8675309");
        assert_eq!("8675309".parse::<InvocationToken>().unwrap(), token);
        assert!("abc".parse::<InvocationToken>().is_err());
        assert!("-1".parse::<InvocationToken>().is_err());
    }

    #[test]
    fn test_context_json_shape() {
        let mut context = InvocationContext::new(3);
        context.arguments.insert("force".to_string(), true);

        let json = serde_json::to_value(&context).unwrap();
        assert_eq!(json, serde_json::json!({"commandId": 3, "arguments": {"force": true}}));

        let empty = serde_json::to_value(InvocationContext::new(0)).unwrap();
        assert_eq!(empty, serde_json::json!({"commandId": 0, "arguments": {}}));
    }
}
