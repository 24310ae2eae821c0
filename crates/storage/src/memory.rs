//! In-memory reference-data gateway.
//!
//! Holds the same relations as the FITS schema (site, type, method,
//! type_method, sample/system, observation) with the observation unique
//! key on `(site, type, method, sample, time)`. Used for offline runs and
//! tests.
//!
//! A transaction takes the store lock for its whole lifetime and works on
//! a staged copy of the observation table, so transactions are serialized
//! and a dropped or rolled back transaction leaves no trace.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use fits_common::{Observation, Site, SourceDescriptor};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{ObservationTx, ReferenceGateway, StorageKeys};

/// Registered reference data.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    types: HashMap<String, i32>,
    methods: HashMap<String, i32>,
    type_methods: HashSet<(i32, i32)>,
    samples: HashMap<(String, String), i32>,
    sites: HashMap<String, (i32, Site)>,
    next_pk: i32,
}

impl ReferenceData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type as valid for a method, creating either if needed.
    pub fn with_type_method(mut self, type_id: &str, method_id: &str) -> Self {
        let type_pk = self.type_pk_or_insert(type_id);
        let method_pk = self.method_pk_or_insert(method_id);
        self.type_methods.insert((type_pk, method_pk));
        self
    }

    /// Register a method with no valid types.
    pub fn with_method(mut self, method_id: &str) -> Self {
        self.method_pk_or_insert(method_id);
        self
    }

    pub fn with_sample(mut self, sample_id: &str, system_id: &str) -> Self {
        let key = (sample_id.to_string(), system_id.to_string());
        if !self.samples.contains_key(&key) {
            let pk = self.allocate_pk();
            self.samples.insert(key, pk);
        }
        self
    }

    pub fn with_site(mut self, site: Site) -> Self {
        self.put_site(site);
        self
    }

    fn allocate_pk(&mut self) -> i32 {
        self.next_pk += 1;
        self.next_pk
    }

    fn type_pk_or_insert(&mut self, type_id: &str) -> i32 {
        if let Some(pk) = self.types.get(type_id) {
            return *pk;
        }
        let pk = self.allocate_pk();
        self.types.insert(type_id.to_string(), pk);
        pk
    }

    fn method_pk_or_insert(&mut self, method_id: &str) -> i32 {
        if let Some(pk) = self.methods.get(method_id) {
            return *pk;
        }
        let pk = self.allocate_pk();
        self.methods.insert(method_id.to_string(), pk);
        pk
    }

    fn put_site(&mut self, site: Site) {
        match self.sites.get_mut(&site.site_id) {
            Some(existing) => existing.1 = site,
            None => {
                let pk = self.allocate_pk();
                self.sites.insert(site.site_id.clone(), (pk, site));
            }
        }
    }

    fn site_pk(&self, site_id: &str) -> GatewayResult<i32> {
        self.sites
            .get(site_id)
            .map(|(pk, _)| *pk)
            .ok_or_else(|| GatewayError::not_found("siteID", site_id))
    }

    fn sample_pk(&self, sample_id: &str, system_id: &str) -> GatewayResult<i32> {
        self.samples
            .get(&(sample_id.to_string(), system_id.to_string()))
            .copied()
            .ok_or_else(|| {
                GatewayError::not_found("sampleID.systemID", format!("{}.{}", sample_id, system_id))
            })
    }

    fn method_pk(&self, method_id: &str) -> GatewayResult<i32> {
        self.methods
            .get(method_id)
            .copied()
            .ok_or_else(|| GatewayError::not_found("methodID", method_id))
    }

    fn type_pk(&self, type_id: &str, method_id: &str) -> GatewayResult<i32> {
        let not_found =
            || GatewayError::not_found("typeID.methodID", format!("{}.{}", type_id, method_id));

        let type_pk = self.types.get(type_id).copied().ok_or_else(not_found)?;
        let method_pk = self.methods.get(method_id).copied().ok_or_else(not_found)?;

        if self.type_methods.contains(&(type_pk, method_pk)) {
            Ok(type_pk)
        } else {
            Err(not_found())
        }
    }

    fn keys_for(&self, source: &SourceDescriptor) -> GatewayResult<StorageKeys> {
        Ok(StorageKeys {
            site_pk: self.site_pk(source.site_id())?,
            sample_pk: self.sample_pk(source.sample_id(), source.system_id())?,
            method_pk: self.method_pk(source.method_id())?,
            type_pk: self.type_pk(source.type_id(), source.method_id())?,
        })
    }
}

/// Unique key of an observation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct RowKey {
    site_pk: i32,
    type_pk: i32,
    method_pk: i32,
    sample_pk: i32,
    time: DateTime<Utc>,
}

impl RowKey {
    fn new(keys: &StorageKeys, time: DateTime<Utc>) -> Self {
        Self {
            site_pk: keys.site_pk,
            type_pk: keys.type_pk,
            method_pk: keys.method_pk,
            sample_pk: keys.sample_pk,
            // timestamptz resolution
            time: time.trunc_subsecs(6),
        }
    }
}

type ObservationTable = BTreeMap<RowKey, (f64, f64)>;

/// A mutating call made against the gateway, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    UpsertSite(String),
    UpsertObservation(DateTime<Utc>),
    Begin,
    Delete { site_id: String, type_id: String },
    Insert { records: usize },
    Commit,
    Rollback,
}

#[derive(Debug, Default)]
struct MemoryState {
    reference: ReferenceData,
    observations: ObservationTable,
    calls: Vec<GatewayCall>,
    /// Remaining successful observation upserts before a transport fault.
    upserts_before_fault: Option<usize>,
    fail_deletes: bool,
    reject_sites: bool,
}

/// Gateway over an in-memory store.
#[derive(Clone, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryGateway {
    pub fn new(reference: ReferenceData) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                reference,
                ..Default::default()
            })),
        }
    }

    /// Fail every observation upsert after the next `n` succeed.
    pub async fn fail_upserts_after(&self, n: usize) {
        self.state.lock().await.upserts_before_fault = Some(n);
    }

    /// Fail every delete inside a transaction with a transport fault.
    pub async fn fail_deletes(&self) {
        self.state.lock().await.fail_deletes = true;
    }

    /// Reject every site upsert as a constraint violation.
    pub async fn reject_sites(&self) {
        self.state.lock().await.reject_sites = true;
    }

    /// Mutating calls made so far.
    pub async fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn site(&self, site_id: &str) -> Option<Site> {
        let state = self.state.lock().await;
        state
            .reference
            .sites
            .get(site_id)
            .map(|(_, site)| site.clone())
    }

    pub async fn site_count(&self) -> usize {
        self.state.lock().await.reference.sites.len()
    }

    /// Count observation rows for a site and type, across methods and samples.
    pub async fn count_observations(&self, site_id: &str, type_id: &str) -> usize {
        self.observations(site_id, type_id).await.len()
    }

    /// Observation rows for a site and type, ordered by time.
    pub async fn observations(&self, site_id: &str, type_id: &str) -> Vec<Observation> {
        let state = self.state.lock().await;
        let (Some(site_pk), Some(type_pk)) = (
            state.reference.sites.get(site_id).map(|(pk, _)| *pk),
            state.reference.types.get(type_id).copied(),
        ) else {
            return Vec::new();
        };

        let mut rows: Vec<Observation> = state
            .observations
            .iter()
            .filter(|(k, _)| k.site_pk == site_pk && k.type_pk == type_pk)
            .map(|(k, (value, error))| Observation::new(k.time, *value, *error))
            .collect();
        rows.sort_by_key(|o| o.time);
        rows
    }
}

#[async_trait]
impl ReferenceGateway for MemoryGateway {
    type Tx = MemoryTx;

    async fn resolve_site_pk(&self, site_id: &str) -> GatewayResult<i32> {
        self.state.lock().await.reference.site_pk(site_id)
    }

    async fn resolve_sample_pk(&self, sample_id: &str, system_id: &str) -> GatewayResult<i32> {
        self.state
            .lock()
            .await
            .reference
            .sample_pk(sample_id, system_id)
    }

    async fn resolve_method_pk(&self, method_id: &str) -> GatewayResult<i32> {
        self.state.lock().await.reference.method_pk(method_id)
    }

    async fn resolve_type_pk(&self, type_id: &str, method_id: &str) -> GatewayResult<i32> {
        self.state.lock().await.reference.type_pk(type_id, method_id)
    }

    async fn upsert_site(&self, site: &Site) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.calls.push(GatewayCall::UpsertSite(site.site_id.clone()));

        if state.reject_sites {
            return Err(GatewayError::Conflict(format!(
                "site {} violates check constraint",
                site.site_id
            )));
        }

        state.reference.put_site(site.clone());
        Ok(())
    }

    async fn upsert_observation(
        &self,
        source: &SourceDescriptor,
        observation: &Observation,
    ) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(GatewayCall::UpsertObservation(observation.time));

        if let Some(remaining) = state.upserts_before_fault.as_mut() {
            if *remaining == 0 {
                return Err(GatewayError::Transport("injected fault".to_string()));
            }
            *remaining -= 1;
        }

        let keys = state.reference.keys_for(source)?;
        state.observations.insert(
            RowKey::new(&keys, observation.time),
            (observation.value, observation.error),
        );
        Ok(())
    }

    async fn begin(&self) -> GatewayResult<MemoryTx> {
        let mut guard = self.state.clone().lock_owned().await;
        guard.calls.push(GatewayCall::Begin);
        let staged = guard.observations.clone();
        Ok(MemoryTx { guard, staged })
    }
}

/// An open in-memory transaction.
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: ObservationTable,
}

#[async_trait]
impl ObservationTx for MemoryTx {
    async fn delete_observations_for_source(
        &mut self,
        site_id: &str,
        type_id: &str,
    ) -> GatewayResult<u64> {
        self.guard.calls.push(GatewayCall::Delete {
            site_id: site_id.to_string(),
            type_id: type_id.to_string(),
        });

        if self.guard.fail_deletes {
            return Err(GatewayError::Transport("injected fault".to_string()));
        }

        let site_pk = self.guard.reference.sites.get(site_id).map(|(pk, _)| *pk);
        let type_pk = self.guard.reference.types.get(type_id).copied();
        let (Some(site_pk), Some(type_pk)) = (site_pk, type_pk) else {
            return Ok(0);
        };

        let before = self.staged.len();
        self.staged
            .retain(|k, _| !(k.site_pk == site_pk && k.type_pk == type_pk));
        Ok((before - self.staged.len()) as u64)
    }

    async fn insert_observations_batch(
        &mut self,
        keys: &StorageKeys,
        observations: &[Observation],
    ) -> GatewayResult<u64> {
        self.guard.calls.push(GatewayCall::Insert {
            records: observations.len(),
        });

        // One statement: either every row goes in or none does.
        let mut rows = Vec::with_capacity(observations.len());
        let mut seen = HashSet::with_capacity(observations.len());
        for o in observations {
            let key = RowKey::new(keys, o.time);
            if self.staged.contains_key(&key) || !seen.insert(key) {
                return Err(GatewayError::Conflict(format!(
                    "duplicate key value violates unique constraint on observation at {}",
                    key.time.to_rfc3339()
                )));
            }
            rows.push((key, (o.value, o.error)));
        }

        let inserted = rows.len() as u64;
        self.staged.extend(rows);
        Ok(inserted)
    }

    async fn commit(mut self) -> GatewayResult<()> {
        self.guard.calls.push(GatewayCall::Commit);
        self.guard.observations = std::mem::take(&mut self.staged);
        Ok(())
    }

    async fn rollback(mut self) -> GatewayResult<()> {
        self.guard.calls.push(GatewayCall::Rollback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fits_common::SourceProperties;

    fn reference() -> ReferenceData {
        ReferenceData::new()
            .with_type_method("e", "bernese5")
            .with_method("gamit")
            .with_sample("none", "none")
            .with_site(Site {
                site_id: "VGT2".to_string(),
                name: "Te Maari".to_string(),
                longitude: 175.67,
                latitude: -39.11,
                height: 0.0,
                ground_relationship: 0.0,
            })
    }

    #[tokio::test]
    async fn test_type_must_be_valid_for_method() {
        let gw = MemoryGateway::new(reference());
        assert!(gw.resolve_type_pk("e", "bernese5").await.is_ok());
        // both exist, but are not linked
        let err = gw.resolve_type_pk("e", "gamit").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { field: "typeID.methodID", .. }));
    }

    #[tokio::test]
    async fn test_upsert_site_is_idempotent() {
        let gw = MemoryGateway::new(reference());
        let mut site = gw.site("VGT2").await.unwrap();
        let pk = gw.resolve_site_pk("VGT2").await.unwrap();

        site.name = "Renamed".to_string();
        gw.upsert_site(&site).await.unwrap();
        gw.upsert_site(&site).await.unwrap();

        assert_eq!(gw.site_count().await, 1);
        assert_eq!(gw.resolve_site_pk("VGT2").await.unwrap(), pk);
        assert_eq!(gw.site("VGT2").await.unwrap().name, "Renamed");
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let gw = MemoryGateway::new(reference());
        let source = SourceDescriptor::new(
            SourceProperties {
                site_id: "VGT2".to_string(),
                type_id: "e".to_string(),
                method_id: "bernese5".to_string(),
                ..Default::default()
            },
            0.0,
            0.0,
        )
        .unwrap();
        let t = Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap();
        gw.upsert_observation(&source, &Observation::new(t, 1.0, 0.1))
            .await
            .unwrap();

        {
            let mut tx = gw.begin().await.unwrap();
            assert_eq!(tx.delete_observations_for_source("VGT2", "e").await.unwrap(), 1);
        }

        assert_eq!(gw.count_observations("VGT2", "e").await, 1);
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let gw = MemoryGateway::new(reference());
        gw.fail_deletes().await;
        gw.reject_sites().await;

        let site = gw.site("VGT2").await.unwrap();
        let err = gw.upsert_site(&site).await.unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));

        let mut tx = gw.begin().await.unwrap();
        let err = tx.delete_observations_for_source("VGT2", "e").await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }
}
