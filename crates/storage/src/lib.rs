//! Reference-data gateway for the FITS observation store.
//!
//! Provides:
//! - The [`ReferenceGateway`] trait: key lookups, site and observation
//!   upserts, and transactions for delete-then-insert resyncs
//! - [`PgGateway`] over the PostgreSQL `fits` schema
//! - [`MemoryGateway`] for offline runs and tests

pub mod error;
pub mod gateway;
pub mod memory;
pub mod postgres;

pub use error::{GatewayError, GatewayResult};
pub use gateway::{ObservationTx, ReferenceGateway, StorageKeys};
pub use memory::{GatewayCall, MemoryGateway, MemoryTx, ReferenceData};
pub use postgres::{PgGateway, PgGatewayOptions, PgObservationTx};
