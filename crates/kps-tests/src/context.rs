//! Test context providing access to all test infrastructure.

use crate::containers::PostgresContainer;
use kps_db::{Database, PgLicenseAuthority};
use kps_licensing::{Issuer, LicenseValidator, SignatureScheme, TrustPolicy};
use std::sync::Arc;

/// Running PostgreSQL with migrations applied.
///
/// Drop this to stop the container.
pub struct TestContext {
    pub postgres: PostgresContainer,
    pub db: Database,
    pub authority: Arc<PgLicenseAuthority>,
}

impl TestContext {
    pub async fn new() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let postgres = PostgresContainer::start().await?;
        let db = Database::connect(postgres.connection_string()).await?;
        db.migrate().await?;
        let authority = Arc::new(db.authority());

        Ok(Self {
            postgres,
            db,
            authority,
        })
    }

    pub fn issuer(&self) -> Issuer {
        Issuer::new(self.authority.clone(), SignatureScheme::default())
    }

    /// Validator backed by this database, with the default trust policy.
    pub fn validator(&self) -> LicenseValidator {
        LicenseValidator::new(SignatureScheme::default(), TrustPolicy::default())
            .with_authority(self.authority.clone())
    }
}
