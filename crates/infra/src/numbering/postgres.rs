use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use kontor_core::TenantId;
use kontor_invoicing::{NumberScheme, NumberingError, PeriodKey, ResetPeriod, SchemeUpdate};

use super::NumberSchemeStore;
use crate::error::{StoreError, map_sqlx_error};

/// Scheme rows in `invoice_number_schemes`, one per tenant.
///
/// Every read-modify-write runs in a transaction holding `FOR UPDATE` on the tenant's
/// row, so concurrent allocations for one tenant queue up in the database.
#[derive(Debug, Clone)]
pub struct PostgresNumberSchemeStore {
    pool: PgPool,
}

impl PostgresNumberSchemeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool.begin().await.map_err(|e| map_sqlx_error("begin", e))
    }

    /// Run `f` on the locked scheme and write the result back; the caller's value is
    /// returned only after commit.
    async fn locked<T: Send>(
        &self,
        tenant_id: TenantId,
        f: impl FnOnce(&mut NumberScheme) -> Result<T, StoreError> + Send,
    ) -> Result<T, StoreError> {
        let mut tx = self.begin().await?;
        let mut scheme = lock_scheme(&mut tx, tenant_id).await?;
        let out = f(&mut scheme)?;
        save_scheme(&mut tx, tenant_id, &scheme).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(out)
    }
}

async fn lock_scheme(tx: &mut Transaction<'_, Postgres>, tenant_id: TenantId) -> Result<NumberScheme, StoreError> {
    let default = NumberScheme::default();
    sqlx::query(
        r#"
        INSERT INTO invoice_number_schemes (tenant_id, pattern, reset_period)
        VALUES ($1, $2, $3)
        ON CONFLICT (tenant_id) DO NOTHING
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(default.pattern.as_str())
    .bind(default.reset_period.as_str())
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_default_scheme", e))?;

    let row = sqlx::query(
        r#"
        SELECT pattern, reset_period, counter, period_key
        FROM invoice_number_schemes
        WHERE tenant_id = $1
        FOR UPDATE
        "#,
    )
    .bind(tenant_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("lock_scheme", e))?;

    scheme_from_row(&row)
}

async fn save_scheme(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: TenantId,
    scheme: &NumberScheme,
) -> Result<(), StoreError> {
    let counter = i64::try_from(scheme.counter).map_err(|_| NumberingError::Overflow)?;
    sqlx::query(
        r#"
        UPDATE invoice_number_schemes
        SET pattern = $2, reset_period = $3, counter = $4, period_key = $5, updated_at = now()
        WHERE tenant_id = $1
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(scheme.pattern.as_str())
    .bind(scheme.reset_period.as_str())
    .bind(counter)
    .bind(scheme.period_key.map(|k| k.to_string()))
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("save_scheme", e))?;
    Ok(())
}

fn scheme_from_row(row: &sqlx::postgres::PgRow) -> Result<NumberScheme, StoreError> {
    let column = |e: sqlx::Error| map_sqlx_error("read_scheme", e);
    let pattern: String = row.try_get("pattern").map_err(column)?;
    let reset_period: String = row.try_get("reset_period").map_err(column)?;
    let counter: i64 = row.try_get("counter").map_err(column)?;
    let period_key: Option<String> = row.try_get("period_key").map_err(column)?;

    Ok(NumberScheme {
        pattern: pattern.parse()?,
        reset_period: reset_period.parse::<ResetPeriod>()?,
        counter: u64::try_from(counter).map_err(|_| NumberingError::Overflow)?,
        period_key: period_key.map(|k| k.parse::<PeriodKey>()).transpose()?,
    })
}

#[async_trait]
impl NumberSchemeStore for PostgresNumberSchemeStore {
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn scheme(&self, tenant_id: TenantId) -> Result<NumberScheme, StoreError> {
        self.locked(tenant_id, |s| Ok(s.clone())).await
    }

    #[instrument(skip(self, update), fields(tenant_id = %tenant_id))]
    async fn configure(&self, tenant_id: TenantId, update: SchemeUpdate) -> Result<NumberScheme, StoreError> {
        self.locked(tenant_id, |s| {
            s.configure(update)?;
            Ok(s.clone())
        })
        .await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn preview(&self, tenant_id: TenantId, date: NaiveDate) -> Result<String, StoreError> {
        let scheme = self.scheme(tenant_id).await?;
        Ok(scheme.preview(date)?)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn allocate(&self, tenant_id: TenantId, date: NaiveDate) -> Result<String, StoreError> {
        self.locked(tenant_id, |s| Ok(s.allocate(date)?)).await
    }
}
