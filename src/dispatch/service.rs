//! Command dispatch service

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{DispatchError, InvocationContext, InvocationToken, PendingInvocations, PushNotifier};
use crate::catalog::{Command, CommandCatalog};
use crate::db::{Device, DeviceRepo};

/// Validates triggers, parks their context and notifies the device
#[derive(Clone)]
pub struct CommandDispatcher {
    devices: DeviceRepo,
    catalog: Arc<CommandCatalog>,
    pending: Arc<PendingInvocations>,
    notifier: Arc<dyn PushNotifier>,
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("catalog", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

impl CommandDispatcher {
    /// Create a dispatcher over the given registry, catalog, store and notifier
    #[must_use]
    pub fn new(
        devices: DeviceRepo,
        catalog: Arc<CommandCatalog>,
        pending: Arc<PendingInvocations>,
        notifier: Arc<dyn PushNotifier>,
    ) -> Self {
        Self {
            devices,
            catalog,
            pending,
            notifier,
        }
    }

    /// Device registry backing this dispatcher
    #[must_use]
    pub const fn devices(&self) -> &DeviceRepo {
        &self.devices
    }

    /// Command catalog backing this dispatcher
    #[must_use]
    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }

    /// Pending invocation store
    #[must_use]
    pub const fn pending(&self) -> &Arc<PendingInvocations> {
        &self.pending
    }

    /// Catalog commands linked to `device`, ordered by id
    ///
    /// # Errors
    ///
    /// Returns `Registry` if the association lookup fails
    pub fn commands_implemented_by(&self, device: &Device) -> Result<Vec<Command>, DispatchError> {
        let ids = self.devices.command_ids(device.id)?;
        Ok(self.catalog.resolve(&ids))
    }

    /// Trigger `command_id` on `device`
    ///
    /// A non-empty `raw_arguments` body must be a JSON object of booleans.
    /// On delivery failure the issued token stays in the store and the error
    /// is returned.
    ///
    /// # Errors
    ///
    /// - `UnknownCommand` if the device is not linked to the command
    /// - `BadArguments` if the argument body does not parse
    /// - `Delivery` if the push endpoint cannot be reached or rejects the push
    pub async fn trigger(
        &self,
        device: &Device,
        command_id: i64,
        raw_arguments: Option<&[u8]>,
    ) -> Result<InvocationToken, DispatchError> {
        let implemented = self.commands_implemented_by(device)?;
        if !implemented.iter().any(|c| c.id == command_id) {
            tracing::info!(device_id = device.id, command_id, "command not linked to device");
            return Err(DispatchError::UnknownCommand(command_id.to_string()));
        }

        let context = InvocationContext {
            command_id,
            arguments: parse_arguments(raw_arguments)?,
        };

        let token = self.pending.issue(context).await;

        if let Err(e) = self.notifier.notify(device, token).await {
            tracing::warn!(device_id = device.id, command_id, error = %e, "command push failed");
            return Err(e.into());
        }

        tracing::info!(device_id = device.id, command_id, "command triggered");
        Ok(token)
    }

    /// Trade a token for its invocation context, exactly once
    ///
    /// # Errors
    ///
    /// Returns `UnknownToken` if the token is not outstanding
    pub async fn retrieve(&self, token: InvocationToken) -> Result<InvocationContext, DispatchError> {
        self.pending
            .consume(token)
            .await
            .ok_or(DispatchError::UnknownToken)
    }
}

/// Parse an optional JSON argument body
fn parse_arguments(raw: Option<&[u8]>) -> Result<BTreeMap<String, bool>, DispatchError> {
    match raw {
        Some(body) if !body.trim_ascii().is_empty() => serde_json::from_slice(body)
            .map_err(|e| DispatchError::BadArguments(e.to_string())),
        _ => Ok(BTreeMap::new()),
    }
}
