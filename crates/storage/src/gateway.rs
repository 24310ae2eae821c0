//! The reference-data gateway: the only interface between the loader and
//! persistent storage.

use async_trait::async_trait;
use fits_common::{Observation, Site, SourceDescriptor};

use crate::error::GatewayResult;

/// Resolved primary keys addressing observation rows for one source.
///
/// Resolved fresh for each resync and never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageKeys {
    pub site_pk: i32,
    pub type_pk: i32,
    pub method_pk: i32,
    pub sample_pk: i32,
}

/// Lookups and writes against the FITS schema.
///
/// Each lookup is a single read. `resolve_type_pk` also checks that the
/// type is registered as valid for the method.
#[async_trait]
pub trait ReferenceGateway: Send + Sync {
    type Tx: ObservationTx;

    async fn resolve_site_pk(&self, site_id: &str) -> GatewayResult<i32>;

    async fn resolve_sample_pk(&self, sample_id: &str, system_id: &str) -> GatewayResult<i32>;

    async fn resolve_method_pk(&self, method_id: &str) -> GatewayResult<i32>;

    async fn resolve_type_pk(&self, type_id: &str, method_id: &str) -> GatewayResult<i32>;

    /// Create or update site metadata, keyed by site id.
    async fn upsert_site(&self, site: &Site) -> GatewayResult<()>;

    /// Insert the observation, or update value and error in place when a
    /// row already exists for the source at that time.
    async fn upsert_observation(
        &self,
        source: &SourceDescriptor,
        observation: &Observation,
    ) -> GatewayResult<()>;

    /// Open a transaction for a delete-then-insert resync.
    async fn begin(&self) -> GatewayResult<Self::Tx>;
}

/// Writes scoped to one open transaction.
///
/// Dropping a transaction without calling `commit` discards its writes.
#[async_trait]
pub trait ObservationTx: Send {
    /// Delete every observation for the site and type. Returns rows deleted.
    async fn delete_observations_for_source(
        &mut self,
        site_id: &str,
        type_id: &str,
    ) -> GatewayResult<u64>;

    /// Insert all observations under `keys`. Fails with a conflict if any
    /// two rows share a key, including two rows from this batch.
    async fn insert_observations_batch(
        &mut self,
        keys: &StorageKeys,
        observations: &[Observation],
    ) -> GatewayResult<u64>;

    async fn commit(self) -> GatewayResult<()>;

    async fn rollback(self) -> GatewayResult<()>;
}
