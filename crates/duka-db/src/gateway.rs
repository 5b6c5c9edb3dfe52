//! # Payment Gateway Collaborator
//!
//! The settlement state machine asks a gateway for a control number and
//! later receives the gateway's webhook. Only the first half lives here.
//!
//! ```text
//! request_control_number ──► PaymentGateway::request_control_number
//!                                 │
//!                                 ├── Ok(grant)  → Payment WAITING_PAYMENT
//!                                 └── Err(e)     → Payment FAILED, e surfaced
//! ```

use async_trait::async_trait;
use chrono::{Duration, Utc};
use duka_core::payment::{ControlNumberGrant, ControlNumberRequest};
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tracing::debug;

use crate::error::DbError;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway answered and said no.
    #[error("gateway rejected the request: {0}")]
    Rejected(String),

    /// The gateway could not be reached or timed out.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl From<GatewayError> for DbError {
    fn from(err: GatewayError) -> Self {
        DbError::ExternalGateway(err.to_string())
    }
}

/// Issues control numbers. No retries happen behind this trait.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn request_control_number(
        &self,
        request: &ControlNumberRequest,
    ) -> Result<ControlNumberGrant, GatewayError>;
}

/// Offline gateway that issues numbers locally.
///
/// Control numbers look like `CN<yyyymmddHHMMSS><order digits><seq:03>`,
/// where the sequence keeps two requests in the same second apart.
#[derive(Debug)]
pub struct SimulatedGateway {
    validity: Duration,
    sequence: AtomicU32,
}

impl SimulatedGateway {
    pub fn new(validity_days: i64) -> Self {
        SimulatedGateway {
            validity: Duration::days(validity_days),
            sequence: AtomicU32::new(0),
        }
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        SimulatedGateway::new(7)
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn request_control_number(
        &self,
        request: &ControlNumberRequest,
    ) -> Result<ControlNumberGrant, GatewayError> {
        let now = Utc::now();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) % 1000;
        let order_digits: String = request
            .order_number
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();

        let control_number = format!("CN{}{}{:03}", now.format("%Y%m%d%H%M%S"), order_digits, seq);
        let expiry_time = now + self.validity;

        debug!(
            order_id = %request.order_id,
            control_number = %control_number,
            "Simulated gateway issued control number"
        );

        Ok(ControlNumberGrant {
            raw_response: serde_json::json!({
                "status": "success",
                "control_number": control_number,
                "expiry_time": expiry_time.to_rfc3339(),
            }),
            control_number,
            expiry_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duka_core::Money;

    fn request() -> ControlNumberRequest {
        ControlNumberRequest {
            order_id: "order-1".to_string(),
            order_number: "ORD-2026-000042".to_string(),
            amount: Money::from_cents(150_000),
            phone_number: "+255712345678".to_string(),
        }
    }

    #[tokio::test]
    async fn test_simulated_numbers_are_distinct_and_valid_for_a_week() {
        let gateway = SimulatedGateway::default();
        let a = gateway.request_control_number(&request()).await.unwrap();
        let b = gateway.request_control_number(&request()).await.unwrap();

        assert!(a.control_number.starts_with("CN"));
        assert!(a.control_number.contains("2026000042"));
        assert_ne!(a.control_number, b.control_number);

        let validity = a.expiry_time - Utc::now();
        assert!(validity > Duration::days(6) && validity <= Duration::days(7));
    }

    #[test]
    fn test_gateway_error_maps_to_external() {
        let err: DbError = GatewayError::Unavailable("timeout".into()).into();
        assert!(matches!(err, DbError::ExternalGateway(_)));
    }
}
