//! Shared test utilities for the FITS loader workspace.
//!
//! This crate provides:
//! - The VGT2 `e` fixture series as raw files and as typed values
//! - In-memory gateways seeded with GNSS reference data
//! - A skip macro for tests that need a live database
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod fixtures;

pub use fixtures::*;

/// Environment variable holding the connection URL for database tests.
pub const DATABASE_URL_ENV: &str = "FITS_DATABASE_URL";

/// Macro to skip a test when no test database is configured.
///
/// Evaluates to the database URL from `FITS_DATABASE_URL`. If the variable
/// is unset or empty, prints a skip message and returns early.
///
/// # Usage
///
/// ```ignore
/// use test_utils::require_database_url;
///
/// #[tokio::test]
/// async fn test_against_postgres() {
///     let url = require_database_url!();
///     // Test code using url...
/// }
/// ```
#[macro_export]
macro_rules! require_database_url {
    () => {{
        match std::env::var($crate::DATABASE_URL_ENV) {
            Ok(url) if !url.is_empty() => url,
            _ => {
                eprintln!(
                    "SKIPPED: {} not set. Point it at a database with the fits schema to run this test.",
                    $crate::DATABASE_URL_ENV
                );
                return;
            }
        }
    }};
}
