//! PostgreSQL implementation of RemoteAuthority.

use async_trait::async_trait;
use kps_core::ports::RemoteAuthority;
use kps_core::{
    Error, LicenseRecord, MachineRegistration, OwnerDetails, RecordId, RecordStatus, Result,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};

const RECORD_COLUMNS: &str = "id, machine_id, key, plan, duration_days, status, created_at, \
     shop_name, owner_name, phone, address, transferred_to, price";

const REGISTRATION_COLUMNS: &str = "machine_id, shop_name, owner_name, phone, address, updated_at";

/// PostgreSQL implementation of RemoteAuthority.
pub struct PgLicenseAuthority {
    pool: PgPool,
}

impl PgLicenseAuthority {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn owner_from_row(r: &PgRow) -> OwnerDetails {
        OwnerDetails {
            shop_name: r.get::<Option<String>, _>("shop_name").unwrap_or_default(),
            owner_name: r.get::<Option<String>, _>("owner_name").unwrap_or_default(),
            phone: r.get::<Option<String>, _>("phone").unwrap_or_default(),
            address: r.get::<Option<String>, _>("address").unwrap_or_default(),
        }
    }

    fn row_to_record(r: &PgRow) -> LicenseRecord {
        let status: String = r.get("status");
        LicenseRecord {
            id: RecordId::from_uuid(r.get::<uuid::Uuid, _>("id")),
            machine_id: r.get("machine_id"),
            key: r.get("key"),
            plan: r.get("plan"),
            duration_days: r.get("duration_days"),
            status: RecordStatus::parse(&status),
            created_at: r.get("created_at"),
            owner: Self::owner_from_row(r),
            transferred_to: r.get("transferred_to"),
            price: r.get("price"),
        }
    }

    fn row_to_registration(r: &PgRow) -> MachineRegistration {
        MachineRegistration {
            machine_id: r.get("machine_id"),
            owner: Self::owner_from_row(r),
            updated_at: r.get("updated_at"),
        }
    }

    async fn insert_in(tx: &mut Transaction<'_, Postgres>, record: &LicenseRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO licenses (id, machine_id, key, plan, duration_days, status, created_at,
                   shop_name, owner_name, phone, address, transferred_to, price)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.machine_id)
        .bind(&record.key)
        .bind(&record.plan)
        .bind(record.duration_days)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(&record.owner.shop_name)
        .bind(&record.owner.owner_name)
        .bind(&record.owner.phone)
        .bind(&record.owner.address)
        .bind(&record.transferred_to)
        .bind(record.price)
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RemoteAuthority for PgLicenseAuthority {
    async fn find(&self, key: &str, machine_id: &str) -> Result<Option<LicenseRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM licenses WHERE key = $1 AND machine_id = $2 LIMIT 1",
            RECORD_COLUMNS
        ))
        .bind(key)
        .bind(machine_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.as_ref().map(Self::row_to_record))
    }

    async fn update_status(
        &self,
        id: RecordId,
        status: RecordStatus,
        transferred_to: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE licenses SET status = $2, transferred_to = COALESCE($3, transferred_to) WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(transferred_to)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::RecordNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn insert(&self, record: &LicenseRecord) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Self::insert_in(&mut tx, record).await?;
        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        debug!(record_id = %record.id, "Inserted license record");
        Ok(())
    }

    async fn upsert_registration(&self, registration: &MachineRegistration) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO registrations (machine_id, shop_name, owner_name, phone, address, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (machine_id) DO UPDATE SET
                   shop_name = EXCLUDED.shop_name,
                   owner_name = EXCLUDED.owner_name,
                   phone = EXCLUDED.phone,
                   address = EXCLUDED.address,
                   updated_at = EXCLUDED.updated_at"#,
        )
        .bind(&registration.machine_id)
        .bind(&registration.owner.shop_name)
        .bind(&registration.owner.owner_name)
        .bind(&registration.owner.phone)
        .bind(&registration.owner.address)
        .bind(registration.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn registration(&self, machine_id: &str) -> Result<Option<MachineRegistration>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM registrations WHERE machine_id = $1",
            REGISTRATION_COLUMNS
        ))
        .bind(machine_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.as_ref().map(Self::row_to_registration))
    }

    async fn list(&self) -> Result<Vec<LicenseRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM licenses ORDER BY created_at ASC, id ASC",
            RECORD_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows.iter().map(Self::row_to_record).collect())
    }

    async fn list_registrations(&self) -> Result<Vec<MachineRegistration>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM registrations ORDER BY machine_id ASC",
            REGISTRATION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows.iter().map(Self::row_to_registration).collect())
    }

    async fn restore(&self, records: &[LicenseRecord]) -> Result<usize> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        for record in records {
            sqlx::query("DELETE FROM licenses WHERE id = $1")
                .bind(record.id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::Database(e.to_string()))?;
            Self::insert_in(&mut tx, record).await?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        info!(count = records.len(), "Restored license records");
        Ok(records.len())
    }

    /// Retires `id` and inserts the replacement in one transaction. Fails
    /// with `Conflict` if `id` is no longer ACTIVE.
    async fn supersede(
        &self,
        id: RecordId,
        status: RecordStatus,
        transferred_to: Option<&str>,
        replacement: &LicenseRecord,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let updated = sqlx::query(
            "UPDATE licenses SET status = $2, transferred_to = COALESCE($3, transferred_to) \
             WHERE id = $1 AND status = 'ACTIVE'",
        )
        .bind(id.as_uuid())
        .bind(status.as_str())
        .bind(transferred_to)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if updated.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| Error::Database(e.to_string()))?;
            return Err(Error::Conflict(id));
        }

        Self::insert_in(&mut tx, replacement).await?;
        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        info!(from = %id, to = %replacement.id, status = %status, "Superseded license record");
        Ok(())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
