//! # Payment Settlement
//!
//! Control-number payments: the payment state machine, the gateway
//! request/grant shapes and the webhook outcome taxonomy.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   PENDING ──gateway ok──► WAITING_PAYMENT ──webhook ok──► SUCCESS ■    │
//! │      │                        │    │                                    │
//! │      │ gateway failure        │    └──expired──► EXPIRED               │
//! │      ▼                        ▼                                         │
//! │   FAILED ◄────────────────────┘ (gateway reports failure)              │
//! │                                                                         │
//! │   any state except SUCCESS ──order cancelled / superseded──► CANCELLED │
//! │                                                                         │
//! │   ■ SUCCESS is terminal and irreversible                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Webhook Outcomes
//! | Outcome          | HTTP | State change           |
//! |------------------|------|------------------------|
//! | Settled          | 200  | → SUCCESS, fulfillment |
//! | AlreadyProcessed | 200  | none (replay)          |
//! | AmountMismatch   | 200  | none, manual review    |
//! | InvalidPayload   | 400  | none                   |
//! | Expired          | 400  | → EXPIRED              |
//! | NotPayable       | 400  | none                   |
//! | NotFound         | 404  | none                   |
//! | InternalError    | 500  | rolled back            |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Payment Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Pending,
    WaitingPayment,
    Success,
    Failed,
    Expired,
    Cancelled,
}

impl PaymentStatus {
    /// Whether the state machine allows `self → next`.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match (self, next) {
            (Success, _) => false,
            (Cancelled, _) => false,
            (_, Cancelled) => true,
            (Pending, WaitingPayment) | (Pending, Failed) => true,
            (WaitingPayment, Success) | (WaitingPayment, Failed) | (WaitingPayment, Expired) => {
                true
            }
            _ => false,
        }
    }

    /// Still expecting money from the customer.
    pub fn is_open(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::WaitingPayment)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::WaitingPayment => "WAITING_PAYMENT",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Expired => "EXPIRED",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Rows
// =============================================================================

/// One attempt to collect an order's amount.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub amount_due_cents: i64,
    pub status: PaymentStatus,
    /// Gateway-assigned, set only on SUCCESS.
    pub transaction_id: Option<String>,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    #[inline]
    pub fn amount_due(&self) -> Money {
        Money::from_cents(self.amount_due_cents)
    }
}

/// Control-number details of a payment (1:1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LocalPaymentDetails {
    pub id: String,
    pub payment_id: String,
    pub control_number: String,
    pub expiry_time: DateTime<Utc>,
    /// JSON snapshot of what was sent to the gateway.
    pub gateway_request: Option<String>,
    /// JSON snapshot of what the gateway answered.
    pub gateway_response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalPaymentDetails {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry_time
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

// =============================================================================
// Gateway Contract Shapes
// =============================================================================

/// What the gateway needs to issue a control number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlNumberRequest {
    pub order_id: String,
    pub order_number: String,
    pub amount: Money,
    pub phone_number: String,
}

/// A control number issued by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlNumberGrant {
    pub control_number: String,
    pub expiry_time: DateTime<Utc>,
    /// Raw gateway response kept for reconciliation.
    #[serde(default)]
    pub raw_response: serde_json::Value,
}

// =============================================================================
// Webhook
// =============================================================================

/// Webhook body as delivered by the gateway. Every field may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub control_number: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Either a JSON string ("1500.00") or a JSON number (1500.0).
    #[serde(default)]
    pub amount: Option<serde_json::Value>,
}

/// A webhook with every field present and the amount parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookNotice {
    pub control_number: String,
    pub transaction_id: String,
    pub amount: Money,
}

impl WebhookPayload {
    pub fn new(
        control_number: impl Into<String>,
        transaction_id: impl Into<String>,
        amount: impl Into<String>,
    ) -> Self {
        WebhookPayload {
            control_number: Some(control_number.into()),
            transaction_id: Some(transaction_id.into()),
            amount: Some(serde_json::Value::String(amount.into())),
        }
    }

    /// Checks presence of every field and parses the amount.
    pub fn into_notice(self) -> Result<WebhookNotice, ValidationError> {
        fn present(value: Option<String>, field: &str) -> Result<String, ValidationError> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ValidationError::Required {
                    field: field.to_string(),
                })
        }

        let control_number = present(self.control_number, "control_number")?;
        let transaction_id = present(self.transaction_id, "transaction_id")?;

        let amount = match self.amount {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Money::parse_decimal(&s)?,
            Some(serde_json::Value::Number(n)) => Money::parse_decimal(&n.to_string())?,
            Some(serde_json::Value::Null) | None => {
                return Err(ValidationError::Required {
                    field: "amount".to_string(),
                })
            }
            Some(serde_json::Value::String(_)) => {
                return Err(ValidationError::Required {
                    field: "amount".to_string(),
                })
            }
            Some(_) => {
                return Err(ValidationError::InvalidFormat {
                    field: "amount".to_string(),
                    reason: "expected a string or number".to_string(),
                })
            }
        };

        Ok(WebhookNotice {
            control_number,
            transaction_id,
            amount,
        })
    }
}

/// Result of one webhook delivery.
///
/// Every variant is an answer for the gateway; none of them is an `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Payment moved to SUCCESS; fulfillment was triggered.
    Settled {
        payment_id: String,
        order_id: String,
        transaction_id: String,
    },
    /// Payment was already SUCCESS; nothing was done.
    AlreadyProcessed { payment_id: String },
    /// Paid amount differs from amount due; left for manual reconciliation.
    AmountMismatch {
        payment_id: String,
        expected: Money,
        received: Money,
    },
    /// Control number expired; payment moved to EXPIRED.
    Expired { payment_id: String },
    /// Payment is CANCELLED, FAILED or EXPIRED and cannot be settled.
    NotPayable {
        payment_id: String,
        status: PaymentStatus,
    },
    /// Missing fields or an unreadable amount.
    InvalidPayload { reason: String },
    /// Unknown control number.
    NotFound { control_number: String },
    /// Anything unexpected; the transaction was rolled back.
    InternalError { message: String },
}

impl WebhookOutcome {
    /// HTTP-equivalent status for the gateway.
    pub fn status_code(&self) -> u16 {
        match self {
            WebhookOutcome::Settled { .. }
            | WebhookOutcome::AlreadyProcessed { .. }
            | WebhookOutcome::AmountMismatch { .. } => 200,
            WebhookOutcome::InvalidPayload { .. }
            | WebhookOutcome::Expired { .. }
            | WebhookOutcome::NotPayable { .. } => 400,
            WebhookOutcome::NotFound { .. } => 404,
            WebhookOutcome::InternalError { .. } => 500,
        }
    }

    /// True for the 2xx answers.
    pub fn is_acknowledged(&self) -> bool {
        self.status_code() == 200
    }

    /// Human-readable detail for the response body.
    pub fn detail(&self) -> String {
        match self {
            WebhookOutcome::Settled { .. } => "Payment and fulfillment acknowledged.".to_string(),
            WebhookOutcome::AlreadyProcessed { .. } => "Payment already processed.".to_string(),
            WebhookOutcome::AmountMismatch { .. } => "Amount mismatch acknowledged.".to_string(),
            WebhookOutcome::Expired { .. } => "Control number expired.".to_string(),
            WebhookOutcome::NotPayable { status, .. } => {
                format!("Payment is {} and cannot be settled.", status)
            }
            WebhookOutcome::InvalidPayload { reason } => {
                format!("Invalid webhook data structure: {}", reason)
            }
            WebhookOutcome::NotFound { .. } => "Control Number not found.".to_string(),
            WebhookOutcome::InternalError { .. } => {
                "Internal Server Error during processing.".to_string()
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_success_is_terminal() {
        for next in [
            PaymentStatus::Pending,
            PaymentStatus::WaitingPayment,
            PaymentStatus::Failed,
            PaymentStatus::Expired,
            PaymentStatus::Cancelled,
        ] {
            assert!(!PaymentStatus::Success.can_transition_to(next));
        }
    }

    #[test]
    fn test_main_path_transitions() {
        use PaymentStatus::*;
        assert!(Pending.can_transition_to(WaitingPayment));
        assert!(Pending.can_transition_to(Failed));
        assert!(WaitingPayment.can_transition_to(Success));
        assert!(WaitingPayment.can_transition_to(Expired));
        assert!(Expired.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Success));
        assert!(!Expired.can_transition_to(Success));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let details = LocalPaymentDetails {
            id: "d".to_string(),
            payment_id: "p".to_string(),
            control_number: "CN1".to_string(),
            expiry_time: now,
            gateway_request: None,
            gateway_response: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!details.is_expired_at(now));
        assert!(details.is_expired_at(now + Duration::seconds(1)));
    }

    #[test]
    fn test_webhook_payload_parsing() {
        let notice = WebhookPayload::new("CN1", "TX1", "1500.00").into_notice().unwrap();
        assert_eq!(notice.amount.cents(), 150_000);

        let numeric: WebhookPayload = serde_json::from_str(
            r#"{"control_number":"CN1","transaction_id":"TX1","amount":1500.5}"#,
        )
        .unwrap();
        assert_eq!(numeric.into_notice().unwrap().amount.cents(), 150_050);

        let missing: WebhookPayload =
            serde_json::from_str(r#"{"control_number":"CN1","amount":"10"}"#).unwrap();
        assert_eq!(
            missing.into_notice().unwrap_err(),
            ValidationError::Required {
                field: "transaction_id".to_string()
            }
        );

        let blank = WebhookPayload::new("  ", "TX1", "10");
        assert!(blank.into_notice().is_err());
    }

    #[test]
    fn test_outcome_status_codes_are_distinct_where_it_matters() {
        let not_found = WebhookOutcome::NotFound {
            control_number: "CN".to_string(),
        };
        let mismatch = WebhookOutcome::AmountMismatch {
            payment_id: "p".to_string(),
            expected: Money::from_cents(100),
            received: Money::from_cents(90),
        };
        assert_eq!(not_found.status_code(), 404);
        assert_eq!(mismatch.status_code(), 200);
        assert!(mismatch.is_acknowledged());
        assert_eq!(
            WebhookOutcome::InternalError {
                message: "boom".to_string()
            }
            .status_code(),
            500
        );
    }
}
