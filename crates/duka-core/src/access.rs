//! Access control shapes: capability slugs, the user context a capability
//! check runs against, and one-time passwords.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability slugs guarding the core operations.
pub mod capabilities {
    pub const INVENTORY_ADJUST: &str = "inventory.adjust";
    pub const INVENTORY_VIEW: &str = "inventory.view";
    pub const PURCHASE_ORDER_MANAGE: &str = "purchase_order.manage";
    pub const STOCK_RECEIVE: &str = "stock.receive";
    pub const SALE_EXECUTE: &str = "sale.execute";
    pub const SALE_REFUND: &str = "sale.refund";
    pub const PAYMENT_REQUEST: &str = "payment.request";
    pub const LICENSE_MANAGE: &str = "license.manage";
    pub const SHIPMENT_MANAGE: &str = "shipment.manage";

    pub const ALL: &[&str] = &[
        INVENTORY_ADJUST,
        INVENTORY_VIEW,
        PURCHASE_ORDER_MANAGE,
        STOCK_RECEIVE,
        SALE_EXECUTE,
        SALE_REFUND,
        PAYMENT_REQUEST,
        LICENSE_MANAGE,
        SHIPMENT_MANAGE,
    ];
}

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub is_active: bool,
    /// Bypasses role grants.
    pub is_superuser: bool,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        UserContext {
            user_id: user_id.into(),
            is_active: true,
            is_superuser: false,
        }
    }

    pub fn superuser(user_id: impl Into<String>) -> Self {
        UserContext {
            is_superuser: true,
            ..UserContext::new(user_id)
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

// =============================================================================
// OTP
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    Registration,
    Login,
    PasswordReset,
}

impl OtpPurpose {
    /// Wording used in the SMS.
    pub fn label(&self) -> &'static str {
        match self {
            OtpPurpose::Registration => "registration",
            OtpPurpose::Login => "login",
            OtpPurpose::PasswordReset => "password reset",
        }
    }
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OtpCode {
    pub id: String,
    pub user_id: String,
    pub phone_number: String,
    pub code: String,
    pub purpose: OtpPurpose,
    pub is_used: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl OtpCode {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OtpVerification {
    Verified { user_id: String },
    Invalid,
    Expired,
}

impl OtpVerification {
    pub fn is_verified(&self) -> bool {
        matches!(self, OtpVerification::Verified { .. })
    }
}

/// The SMS body for a freshly generated code.
pub fn otp_message(purpose: OtpPurpose, code: &str, valid_minutes: i64) -> String {
    format!(
        "Your {} verification code is: {}. It is valid for {} minutes.",
        purpose.label(),
        code,
        valid_minutes
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otp_message() {
        assert_eq!(
            otp_message(OtpPurpose::PasswordReset, "123456", 5),
            "Your password reset verification code is: 123456. It is valid for 5 minutes."
        );
    }

    #[test]
    fn test_capability_slugs_are_unique() {
        let mut all = capabilities::ALL.to_vec();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), capabilities::ALL.len());
    }
}
