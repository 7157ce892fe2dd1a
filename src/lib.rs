//! Whereis Gateway - device registry and remote command dispatch
//!
//! Owners register their devices and link each one to commands from a fixed
//! catalog. Triggering a command parks its parameters under a one-time token
//! and pushes only that token to the device, which then fetches the
//! parameters itself. Commands can also arrive by SMS, authenticated by a
//! per-device PIN instead of a session.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     HTTP API                        │
//! │   /auth  │  /device  │  /invocation  │  /command/sms│
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Dispatch core                       │
//! │  CommandDispatcher │ PendingInvocations │ SmsResolver│
//! └──────────┬──────────────────────────────┬───────────┘
//!            │                              │
//! ┌──────────▼─────────────┐   ┌────────────▼───────────┐
//! │ DeviceRepo │ Catalog   │   │  PushNotifier (PUT)    │
//! └────────────────────────┘   └────────────────────────┘
//! ```

pub mod api;
pub mod catalog;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod security;

pub use catalog::{Command, CommandCatalog};
pub use config::Config;
pub use db::{DbPool, Device, DeviceRepo, NewDevice};
pub use dispatch::{
    CommandDispatcher, DispatchError, InvocationContext, InvocationToken, PendingInvocations,
    PushNotifier,
};
pub use error::{Error, Result};
pub use security::{IdentityGate, SessionManager};
