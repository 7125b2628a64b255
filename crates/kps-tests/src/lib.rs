//! Integration test infrastructure for KPS.
//!
//! This crate provides testcontainers-based infrastructure for running
//! the license authority against a real PostgreSQL.
//!
//! # Usage
//!
//! ```ignore
//! use kps_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::new().await.unwrap();
//!     // Use ctx.authority, ctx.issuer(), ctx.validator(), etc.
//! }
//! ```

pub mod containers;
pub mod context;
pub mod fixtures;
pub mod helpers;

pub use context::TestContext;
pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,kps_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
