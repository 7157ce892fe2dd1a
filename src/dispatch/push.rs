//! Push delivery to device endpoints
//!
//! Only the token crosses the wire. The device fetches the context itself.

use std::time::Duration;

use async_trait::async_trait;

use super::InvocationToken;
use crate::db::Device;

/// Default timeout for a single push request
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure to hand a token to a device endpoint
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("push endpoint responded with {0}")]
    Status(reqwest::StatusCode),

    #[error("push request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Sends invocation tokens to devices
#[async_trait]
pub trait PushNotifier: Send + Sync {
    /// Deliver `token` to the device's push endpoint
    async fn notify(&self, device: &Device, token: InvocationToken) -> Result<(), DeliveryError>;
}

/// Simple-push style notifier: `PUT <endpoint>` with `version=<token>`
#[derive(Debug, Clone)]
pub struct HttpPushNotifier {
    client: reqwest::Client,
}

impl HttpPushNotifier {
    /// Create a notifier whose requests give up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PushNotifier for HttpPushNotifier {
    async fn notify(&self, device: &Device, token: InvocationToken) -> Result<(), DeliveryError> {
        let version = token.to_string();
        let response = self
            .client
            .put(&device.endpoint)
            .form(&[("version", version.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(device_id = device.id, %status, "push endpoint rejected notification");
            return Err(DeliveryError::Status(status));
        }

        tracing::info!(device_id = device.id, "push notification delivered");
        Ok(())
    }
}
