//! Shared test utilities

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::HeaderMap;
use whereis_gateway::api::{ApiServer, ApiServerBuilder};
use whereis_gateway::dispatch::DeliveryError;
use whereis_gateway::{
    CommandCatalog, DbPool, Device, DeviceRepo, IdentityGate, InvocationToken, NewDevice,
    PushNotifier, db,
};

/// Header the test identity gate trusts
pub const TEST_IDENTITY_HEADER: &str = "x-test-identity";

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Identity gate that takes the identity straight from a request header
pub struct HeaderIdentity;

impl IdentityGate for HeaderIdentity {
    fn identity(&self, headers: &HeaderMap) -> String {
        headers
            .get(TEST_IDENTITY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }
}

/// Push notifier that records every notification instead of sending it
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(i64, InvocationToken)>>,
    fail: bool,
}

impl RecordingNotifier {
    /// Notifier whose deliveries all fail
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// `(device_id, token)` pairs in delivery order
    pub fn sent(&self) -> Vec<(i64, InvocationToken)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushNotifier for RecordingNotifier {
    async fn notify(&self, device: &Device, token: InvocationToken) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push((device.id, token));
        if self.fail {
            Err(DeliveryError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE))
        } else {
            Ok(())
        }
    }
}

/// Builder with the test identity gate, the built-in catalog and `notifier`
pub fn test_builder(db: DbPool, notifier: Arc<RecordingNotifier>) -> ApiServerBuilder {
    ApiServerBuilder::new(db, Arc::new(CommandCatalog::builtin()), notifier)
        .identity_gate(Arc::new(HeaderIdentity))
}

/// Test server with default settings
pub fn test_server(db: DbPool, notifier: Arc<RecordingNotifier>) -> ApiServer {
    test_builder(db, notifier).build()
}

/// Register a device directly in the registry and link it to `commands`
pub fn create_test_device(
    db: &DbPool,
    owner: &str,
    name: &str,
    sms_pin: Option<&str>,
    commands: &[i64],
) -> Device {
    let repo = DeviceRepo::new(db.clone());
    let device = repo
        .create(NewDevice {
            owner: owner.to_string(),
            name: name.to_string(),
            endpoint: format!("https://push.example.com/{owner}/{name}"),
            sms_pin: sms_pin.map(str::to_string),
        })
        .expect("failed to create test device");
    repo.replace_commands(device.id, commands)
        .expect("failed to link test commands");
    device
}
