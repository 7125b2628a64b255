//! Repository implementations for PostgreSQL.

mod license;

pub use license::PgLicenseAuthority;
