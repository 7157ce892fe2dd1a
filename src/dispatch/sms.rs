//! Triggering commands from inbound SMS
//!
//! Message format: `<identity> <pin> <command-name>`. The PIN stands in for
//! a session, so the device is found by checking the PIN against every PIN
//! hash the claimed identity has registered.

use std::sync::Arc;

use super::{CommandDispatcher, DispatchError, InvocationToken};
use crate::catalog::Command;
use crate::db::Device;
use crate::security::verify_pin;

/// Fields of an inbound SMS command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmsMessage<'a> {
    pub identity: &'a str,
    pub pin: &'a str,
    pub command: &'a str,
}

impl<'a> SmsMessage<'a> {
    /// Split a message body on its first two whitespace boundaries
    ///
    /// # Errors
    ///
    /// Returns `MalformedMessage` unless all three fields are present and
    /// non-empty
    pub fn parse(body: &'a str) -> Result<Self, DispatchError> {
        let mut fields = body.trim().splitn(3, char::is_whitespace);
        let identity = fields.next().unwrap_or_default();
        let pin = fields.next().unwrap_or_default();
        let command = fields.next().unwrap_or_default().trim();

        if identity.is_empty() || pin.is_empty() || command.is_empty() {
            return Err(DispatchError::MalformedMessage(
                "expected \"<identity> <pin> <command>\"".to_string(),
            ));
        }

        Ok(Self {
            identity,
            pin,
            command,
        })
    }
}

/// Resolves SMS messages to a device and command, then triggers it
#[derive(Debug, Clone)]
pub struct SmsResolver {
    dispatcher: Arc<CommandDispatcher>,
}

impl SmsResolver {
    /// Create a resolver dispatching through `dispatcher`
    #[must_use]
    pub const fn new(dispatcher: Arc<CommandDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Parse, resolve and trigger an SMS command
    ///
    /// # Errors
    ///
    /// - `MalformedMessage` if the body does not have three fields
    /// - `NoMatchingDevice` if no device of the identity has this PIN
    /// - `UnknownCommand` if the matched device has no command of that name
    /// - any error of [`CommandDispatcher::trigger`]
    pub async fn handle(&self, body: &str) -> Result<InvocationToken, DispatchError> {
        let message = SmsMessage::parse(body)?;

        let device = self.resolve_device(message.identity, message.pin).await?;
        let command = self.resolve_command(&device, message.command)?;

        tracing::info!(
            identity = message.identity,
            device_id = device.id,
            command = %command.name,
            "resolved SMS command"
        );

        self.dispatcher.trigger(&device, command.id, None).await
    }

    /// First device of `identity`, in registry order, whose PIN hash matches
    ///
    /// # Errors
    ///
    /// Returns `NoMatchingDevice` if none match
    pub async fn resolve_device(&self, identity: &str, pin: &str) -> Result<Device, DispatchError> {
        let devices = self.dispatcher.devices().list_for_owner(identity)?;
        let pin = pin.to_string();

        // Argon2 verification is CPU-bound
        let matched = tokio::task::spawn_blocking(move || {
            devices.into_iter().find(|device| {
                device
                    .sms_pin_hash
                    .as_deref()
                    .is_some_and(|hash| verify_pin(&pin, hash))
            })
        })
        .await
        .map_err(|e| DispatchError::Internal(format!("PIN check task failed: {e}")))?;

        matched.ok_or_else(|| {
            tracing::info!(identity, "SMS PIN matched no device");
            DispatchError::NoMatchingDevice
        })
    }

    /// Command implemented by `device` whose name matches case-insensitively
    ///
    /// # Errors
    ///
    /// Returns `UnknownCommand` if the device implements no such command
    pub fn resolve_command(&self, device: &Device, name: &str) -> Result<Command, DispatchError> {
        let wanted = name.to_lowercase();
        self.dispatcher
            .commands_implemented_by(device)?
            .into_iter()
            .rev()
            .find(|command| command.name.to_lowercase() == wanted)
            .ok_or_else(|| DispatchError::UnknownCommand(name.to_string()))
    }
}
