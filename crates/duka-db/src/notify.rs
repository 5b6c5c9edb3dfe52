//! SMS notification collaborator.
//!
//! Fire-and-forget: a `false` from [`Notifier::notify`] is logged by the
//! caller and never undoes the state change that triggered it.

use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns whether the message was handed to the provider.
    async fn notify(&self, phone_number: &str, message: &str) -> bool;
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, phone_number: &str, message: &str) -> bool {
        info!(phone = %phone_number, message = %message, "SMS notification");
        true
    }
}
