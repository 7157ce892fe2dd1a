//! Pending invocation store
//!
//! Holds invocation contexts between the trigger and the device's retrieval.
//! Process-local: a restart drops every outstanding invocation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{InvocationContext, InvocationToken};

/// Shortest interval between expiry sweeps
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct PendingEntry {
    context: InvocationContext,
    issued_at: Instant,
}

/// Single-use token to context map
#[derive(Debug, Default)]
pub struct PendingInvocations {
    entries: Mutex<HashMap<InvocationToken, PendingEntry>>,
}

impl PendingInvocations {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a context under a fresh token
    pub async fn issue(&self, context: InvocationContext) -> InvocationToken {
        let mut entries = self.entries.lock().await;

        let token = loop {
            let candidate = InvocationToken::random();
            if !entries.contains_key(&candidate) {
                break candidate;
            }
        };

        tracing::debug!(%token, command_id = context.command_id, "issued invocation token");
        entries.insert(
            token,
            PendingEntry {
                context,
                issued_at: Instant::now(),
            },
        );
        token
    }

    /// Remove and return the context for `token`
    ///
    /// Returns `None` if the token was never issued, already consumed, or
    /// expired.
    pub async fn consume(&self, token: InvocationToken) -> Option<InvocationContext> {
        let entry = self.entries.lock().await.remove(&token)?;
        tracing::debug!(%token, command_id = entry.context.command_id, "consumed invocation token");
        Some(entry.context)
    }

    /// Drop entries older than `ttl`, returning how many were removed
    pub async fn sweep_expired(&self, ttl: Duration) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.issued_at.elapsed() < ttl);
        before - entries.len()
    }

    /// Number of outstanding invocations
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether no invocations are outstanding
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Periodically drop entries older than `ttl` in a background task
    #[must_use]
    pub fn spawn_sweeper(self: Arc<Self>, ttl: Duration) -> JoinHandle<()> {
        let period = (ttl / 2).max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let removed = self.sweep_expired(ttl).await;
                if removed > 0 {
                    tracing::info!(removed, "expired pending invocations");
                }
            }
        })
    }
}
