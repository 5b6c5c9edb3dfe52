//! # RBAC Repository
//!
//! Roles, permissions and the capability check that guards privileged
//! operations.
//!
//! ```text
//! has_capability(user, slug)
//!      │
//!      ├── inactive user        → false
//!      ├── superuser            → true
//!      └── user_roles ⋈ role_permissions ⋈ permissions (slug) → any row?
//! ```

use async_trait::async_trait;
use chrono::Utc;
use duka_core::access::UserContext;
use duka_core::ValidationError;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use super::new_id;
use crate::error::{DbError, DbResult};

/// The capability check other components depend on.
#[async_trait]
pub trait CapabilityCheck: Send + Sync {
    async fn has_capability(&self, user: &UserContext, capability: &str) -> DbResult<bool>;

    /// `Forbidden` unless the user holds `capability`.
    async fn require_capability(&self, user: &UserContext, capability: &str) -> DbResult<()> {
        if self.has_capability(user, capability).await? {
            Ok(())
        } else {
            warn!(user_id = %user.user_id, capability, "Capability denied");
            Err(DbError::Forbidden {
                capability: capability.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone)]
pub struct RbacRepository {
    pool: SqlitePool,
}

impl RbacRepository {
    pub fn new(pool: SqlitePool) -> Self {
        RbacRepository { pool }
    }

    /// Creates a role and returns its id.
    pub async fn create_role(&self, name: &str, description: Option<&str>) -> DbResult<String> {
        let name = required("name", name)?;
        let id = new_id();

        sqlx::query("INSERT INTO roles (id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&id)
            .bind(name)
            .bind(description)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                let err = DbError::from(e);
                if err.is_unique_violation() {
                    DbError::duplicate("role", name)
                } else {
                    err
                }
            })?;

        info!(role = %name, "Role created");
        Ok(id)
    }

    /// Registers a capability slug. Registering an existing slug is a no-op.
    pub async fn create_permission(&self, slug: &str, name: &str) -> DbResult<()> {
        let slug = required("slug", slug)?;

        sqlx::query(
            r#"
            INSERT INTO permissions (id, slug, name, created_at) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(slug) DO NOTHING
            "#,
        )
        .bind(new_id())
        .bind(slug)
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Grants a registered capability to a role.
    pub async fn grant_permission(&self, role_name: &str, slug: &str) -> DbResult<()> {
        let role_id = self.role_id(role_name).await?;
        let permission_id: String = sqlx::query_scalar("SELECT id FROM permissions WHERE slug = ?1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Permission", slug))?;

        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
        )
        .bind(&role_id)
        .bind(&permission_id)
        .execute(&self.pool)
        .await?;

        debug!(role = %role_name, capability = %slug, "Capability granted");
        Ok(())
    }

    pub async fn assign_role(&self, user_id: &str, role_name: &str) -> DbResult<()> {
        let user_id = required("user_id", user_id)?;
        let role_id = self.role_id(role_name).await?;

        sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES (?1, ?2) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .bind(&role_id)
            .execute(&self.pool)
            .await?;

        info!(user_id, role = %role_name, "Role assigned");
        Ok(())
    }

    pub async fn revoke_role(&self, user_id: &str, role_name: &str) -> DbResult<()> {
        let role_id = self.role_id(role_name).await?;
        sqlx::query("DELETE FROM user_roles WHERE user_id = ?1 AND role_id = ?2")
            .bind(user_id)
            .bind(&role_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Every capability slug the user holds through roles, sorted.
    pub async fn capabilities_for(&self, user_id: &str) -> DbResult<Vec<String>> {
        let slugs = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT p.slug FROM user_roles ur
            JOIN role_permissions rp ON rp.role_id = ur.role_id
            JOIN permissions p ON p.id = rp.permission_id
            WHERE ur.user_id = ?1
            ORDER BY p.slug
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(slugs)
    }

    async fn role_id(&self, role_name: &str) -> DbResult<String> {
        sqlx::query_scalar("SELECT id FROM roles WHERE name = ?1")
            .bind(role_name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Role", role_name))
    }
}

#[async_trait]
impl CapabilityCheck for RbacRepository {
    async fn has_capability(&self, user: &UserContext, capability: &str) -> DbResult<bool> {
        if !user.is_active {
            return Ok(false);
        }
        if user.is_superuser {
            return Ok(true);
        }

        let held: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM user_roles ur
                JOIN role_permissions rp ON rp.role_id = ur.role_id
                JOIN permissions p ON p.id = rp.permission_id
                WHERE ur.user_id = ?1 AND p.slug = ?2
            )
            "#,
        )
        .bind(&user.user_id)
        .bind(capability)
        .fetch_one(&self.pool)
        .await?;

        Ok(held == 1)
    }
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_db;
    use duka_core::access::capabilities;

    async fn cashier_setup(rbac: &RbacRepository) {
        rbac.create_permission(capabilities::SALE_EXECUTE, "Execute sales").await.unwrap();
        rbac.create_permission(capabilities::SALE_REFUND, "Refund sales").await.unwrap();
        rbac.create_role("cashier", Some("Front counter")).await.unwrap();
        rbac.grant_permission("cashier", capabilities::SALE_EXECUTE).await.unwrap();
        rbac.assign_role("user-1", "cashier").await.unwrap();
    }

    #[tokio::test]
    async fn test_capability_through_role() {
        let db = test_db().await;
        let rbac = db.rbac();
        cashier_setup(&rbac).await;

        let user = UserContext::new("user-1");
        assert!(rbac.has_capability(&user, capabilities::SALE_EXECUTE).await.unwrap());
        assert!(!rbac.has_capability(&user, capabilities::SALE_REFUND).await.unwrap());

        let err = rbac.require_capability(&user, capabilities::SALE_REFUND).await.unwrap_err();
        assert!(matches!(err, DbError::Forbidden { ref capability } if capability == "sale.refund"));

        assert_eq!(rbac.capabilities_for("user-1").await.unwrap(), vec!["sale.execute"]);
    }

    #[tokio::test]
    async fn test_superuser_and_inactive() {
        let db = test_db().await;
        let rbac = db.rbac();
        cashier_setup(&rbac).await;

        let root = UserContext::superuser("root");
        assert!(rbac.has_capability(&root, capabilities::LICENSE_MANAGE).await.unwrap());

        let disabled = UserContext::new("user-1").inactive();
        assert!(!rbac.has_capability(&disabled, capabilities::SALE_EXECUTE).await.unwrap());
        assert!(!rbac.has_capability(&root.inactive(), capabilities::SALE_EXECUTE).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_and_duplicates() {
        let db = test_db().await;
        let rbac = db.rbac();
        cashier_setup(&rbac).await;

        let dup = rbac.create_role("cashier", None).await.unwrap_err();
        assert!(dup.is_unique_violation());

        rbac.revoke_role("user-1", "cashier").await.unwrap();
        let user = UserContext::new("user-1");
        assert!(!rbac.has_capability(&user, capabilities::SALE_EXECUTE).await.unwrap());

        let missing = rbac.assign_role("user-1", "auditor").await.unwrap_err();
        assert!(matches!(missing, DbError::NotFound { .. }));
    }
}
