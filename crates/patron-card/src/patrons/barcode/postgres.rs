use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use super::store::{BarcodeRecord, BarcodeStore, StoreError};
use super::BarcodeFamily;
use crate::patrons::domain::Barcode;

/// Postgres-backed barcode ledger.
#[derive(Debug, Clone)]
pub struct PgBarcodeStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct BarcodeRow {
    barcode: String,
    used: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BarcodeRow> for BarcodeRecord {
    fn from(row: BarcodeRow) -> Self {
        Self {
            barcode: Barcode(row.barcode),
            used: row.used,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl PgBarcodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Creates the ledger table when it does not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        const QUERY: &str = r#"
CREATE TABLE IF NOT EXISTS barcodes (
    barcode TEXT PRIMARY KEY,
    used BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
;"#;
        sqlx::query(QUERY)
            .execute(&self.pool)
            .await
            .map_err(|err| StoreError::Migration(err.to_string()))?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl BarcodeStore for PgBarcodeStore {
    async fn lowest_unused(&self, family: &BarcodeFamily) -> Result<Option<Barcode>, StoreError> {
        const QUERY: &str = r#"
SELECT barcode
FROM barcodes
WHERE used = FALSE
  AND barcode LIKE $1 || '%'
  AND char_length(barcode) = $2
ORDER BY barcode ASC
LIMIT 1
;"#;
        let barcode: Option<String> = sqlx::query_scalar(QUERY)
            .bind(&family.prefix)
            .bind(family.length as i32)
            .fetch_optional(&self.pool)
            .await?;
        Ok(barcode.map(Barcode))
    }

    async fn highest(&self, family: &BarcodeFamily) -> Result<Option<Barcode>, StoreError> {
        const QUERY: &str = r#"
SELECT barcode
FROM barcodes
WHERE barcode LIKE $1 || '%'
  AND char_length(barcode) = $2
ORDER BY barcode DESC
LIMIT 1
;"#;
        let barcode: Option<String> = sqlx::query_scalar(QUERY)
            .bind(&family.prefix)
            .bind(family.length as i32)
            .fetch_optional(&self.pool)
            .await?;
        Ok(barcode.map(Barcode))
    }

    async fn claim(&self, barcode: &Barcode) -> Result<bool, StoreError> {
        const QUERY: &str = r#"
UPDATE barcodes
SET used = TRUE, updated_at = now()
WHERE barcode = $1 AND used = FALSE
;"#;
        let result = sqlx::query(QUERY)
            .bind(barcode.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_used(&self, barcode: &Barcode) -> Result<bool, StoreError> {
        const QUERY: &str = r#"
INSERT INTO barcodes (barcode, used, created_at, updated_at)
VALUES ($1, TRUE, now(), now())
ON CONFLICT DO NOTHING
;"#;
        let result = sqlx::query(QUERY)
            .bind(barcode.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, barcode: &Barcode) -> Result<(), StoreError> {
        const QUERY: &str = r#"
UPDATE barcodes
SET used = FALSE, updated_at = now()
WHERE barcode = $1
;"#;
        sqlx::query(QUERY)
            .bind(barcode.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record(&self, barcode: &Barcode) -> Result<Option<BarcodeRecord>, StoreError> {
        const QUERY: &str = r#"
SELECT barcode, used, created_at, updated_at
FROM barcodes
WHERE barcode = $1
;"#;
        let row: Option<BarcodeRow> = sqlx::query_as(QUERY)
            .bind(barcode.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(BarcodeRecord::from))
    }
}
