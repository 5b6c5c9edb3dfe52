//! # OTP Repository
//!
//! One-time passwords delivered by SMS. A code is single use, bound to a
//! phone number and purpose, and replaced whenever a new one is issued
//! for the same user and purpose.

use std::sync::Arc;

use chrono::{Duration, Utc};
use duka_core::access::{otp_message, OtpCode, OtpPurpose, OtpVerification};
use duka_core::validation::validate_phone;
use duka_core::ValidationError;
use rand::Rng;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use super::new_id;
use crate::config::OtpSettings;
use crate::error::DbResult;
use crate::notify::Notifier;

#[derive(Clone)]
pub struct OtpRepository {
    pool: SqlitePool,
    notifier: Arc<dyn Notifier>,
    settings: OtpSettings,
}

impl std::fmt::Debug for OtpRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpRepository")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl OtpRepository {
    pub fn new(pool: SqlitePool, notifier: Arc<dyn Notifier>, settings: OtpSettings) -> Self {
        OtpRepository {
            pool,
            notifier,
            settings,
        }
    }

    /// Issues a fresh code and sends it by SMS.
    ///
    /// Unused codes the user holds for the same purpose stop working.
    /// A failed SMS is logged; the code is still stored.
    pub async fn generate_code(
        &self,
        user_id: &str,
        phone_number: &str,
        purpose: OtpPurpose,
    ) -> DbResult<OtpCode> {
        if user_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "user_id".to_string(),
            }
            .into());
        }
        validate_phone(phone_number)?;

        let now = Utc::now();
        let otp = OtpCode {
            id: new_id(),
            user_id: user_id.to_string(),
            phone_number: phone_number.to_string(),
            code: random_digits(self.settings.code_length),
            purpose,
            is_used: false,
            expires_at: now + Duration::minutes(self.settings.expiry_minutes),
            created_at: now,
        };

        let mut tx = self.pool.begin().await?;

        let replaced = sqlx::query("DELETE FROM otp_codes WHERE user_id = ?1 AND purpose = ?2 AND is_used = 0")
            .bind(user_id)
            .bind(purpose)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            r#"
            INSERT INTO otp_codes (
                id, user_id, phone_number, code, purpose, is_used, expires_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)
            "#,
        )
        .bind(&otp.id)
        .bind(&otp.user_id)
        .bind(&otp.phone_number)
        .bind(&otp.code)
        .bind(otp.purpose)
        .bind(otp.expires_at)
        .bind(otp.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(user_id, purpose = %purpose, replaced, "OTP issued");

        let message = otp_message(purpose, &otp.code, self.settings.expiry_minutes);
        if !self.notifier.notify(phone_number, &message).await {
            warn!(user_id, purpose = %purpose, "OTP SMS not delivered");
        }

        Ok(otp)
    }

    /// Checks and consumes a code. A matching code is spent even when it
    /// turns out to be expired.
    pub async fn verify_code(
        &self,
        phone_number: &str,
        code: &str,
        purpose: OtpPurpose,
    ) -> DbResult<OtpVerification> {
        let consumed = sqlx::query_as::<_, OtpCode>(
            r#"
            UPDATE otp_codes SET is_used = 1
            WHERE id = (
                SELECT id FROM otp_codes
                WHERE phone_number = ?1 AND code = ?2 AND purpose = ?3 AND is_used = 0
                ORDER BY rowid DESC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(phone_number)
        .bind(code.trim())
        .bind(purpose)
        .fetch_optional(&self.pool)
        .await?;

        let Some(otp) = consumed else {
            warn!(purpose = %purpose, "OTP verification failed");
            return Ok(OtpVerification::Invalid);
        };

        if otp.is_expired_at(Utc::now()) {
            info!(user_id = %otp.user_id, purpose = %purpose, "Expired OTP presented");
            return Ok(OtpVerification::Expired);
        }

        info!(user_id = %otp.user_id, purpose = %purpose, "OTP verified");
        Ok(OtpVerification::Verified { user_id: otp.user_id })
    }

    /// Spends every outstanding code the user holds for `purpose`.
    pub async fn expire_codes(&self, user_id: &str, purpose: OtpPurpose) -> DbResult<u64> {
        let result = sqlx::query("UPDATE otp_codes SET is_used = 1 WHERE user_id = ?1 AND purpose = ?2 AND is_used = 0")
            .bind(user_id)
            .bind(purpose)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn random_digits(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}
