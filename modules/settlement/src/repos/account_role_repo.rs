use sqlx::{FromRow, PgPool};

use super::parse_column;
use crate::domain::{Account, AccountRole};
use crate::error::StoreResult;

/// Role → account binding for a tenant
#[derive(Debug, Clone, FromRow)]
pub struct AccountRoleRow {
    pub role: String,
    pub account_code: String,
    pub account_name: String,
    pub is_active: bool,
}

/// Find the active account bound to `role` for a tenant
///
/// Returns None when no binding exists or the binding is inactive.
pub async fn find_active_by_role(
    pool: &PgPool,
    tenant_id: &str,
    role: AccountRole,
) -> StoreResult<Option<Account>> {
    let row = sqlx::query_as::<_, AccountRoleRow>(
        r#"
        SELECT role, account_code, account_name, is_active
        FROM account_role_mappings
        WHERE tenant_id = $1 AND role = $2
        "#,
    )
    .bind(tenant_id)
    .bind(role.as_str())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) if row.is_active => Ok(Some(Account {
            role: parse_column(
                "account_role_mappings",
                &row.account_code,
                &row.role,
                AccountRole::from_str,
            )?,
            code: row.account_code,
            name: row.account_name,
        })),
        _ => Ok(None),
    }
}

/// Bind (or rebind) a role to an account code
pub async fn upsert(
    pool: &PgPool,
    tenant_id: &str,
    role: AccountRole,
    account_code: &str,
    account_name: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO account_role_mappings (tenant_id, role, account_code, account_name, is_active)
        VALUES ($1, $2, $3, $4, TRUE)
        ON CONFLICT (tenant_id, role) DO UPDATE SET
            account_code = EXCLUDED.account_code,
            account_name = EXCLUDED.account_name,
            is_active = TRUE
        "#,
    )
    .bind(tenant_id)
    .bind(role.as_str())
    .bind(account_code)
    .bind(account_name)
    .execute(pool)
    .await?;

    Ok(())
}
