//! The reconciliation engine.
//!
//! Takes one decoded unit (a source descriptor and its observation batch)
//! and writes it with one of two strategies:
//!
//! - **Merge** (`update_or_add`): upsert each record in turn. Not
//!   transactional; a failure part way leaves earlier records saved.
//! - **Resync** (`delete_then_save`): in one transaction, delete every
//!   stored observation for the site and type, then insert the batch.
//!   The store afterwards mirrors the batch exactly, or is unchanged.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use fits_common::{ObservationBatch, SourceDescriptor};
use storage::{GatewayError, ObservationTx, ReferenceGateway, StorageKeys};

use crate::error::{ReconcileError, Result, UnitError};
use crate::validate::{validate_reference, validate_source};

/// Write strategy for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Merge,
    Resync,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Merge => write!(f, "merge"),
            Strategy::Resync => write!(f, "resync"),
        }
    }
}

/// Progress of one reconciliation.
///
/// A resync moves `Parsed -> KeyResolution -> Deleting -> Inserting` and
/// ends in `Committed`, `RolledBack` (failed inside the transaction) or
/// `Aborted` (failed before a transaction was opened). A merge ends in
/// `Committed` or `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    Parsed,
    KeyResolution,
    Deleting,
    Inserting,
    Committed,
    RolledBack,
    Aborted,
}

impl fmt::Display for ReconcileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcileState::Parsed => "parsed",
            ReconcileState::KeyResolution => "resolving keys",
            ReconcileState::Deleting => "deleting",
            ReconcileState::Inserting => "inserting",
            ReconcileState::Committed => "committed",
            ReconcileState::RolledBack => "rolled back",
            ReconcileState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Mode flags for the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Skip validating the source against reference data.
    pub offline_validation: bool,
    /// Use the resync strategy instead of merge.
    pub resync: bool,
    /// Validate and check for duplicates only; never write.
    pub dry_run: bool,
}

impl ReconcileOptions {
    pub fn strategy(&self) -> Strategy {
        if self.resync {
            Strategy::Resync
        } else {
            Strategy::Merge
        }
    }
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub strategy: Strategy,
    pub state: ReconcileState,
    /// Records upserted (merge) or inserted (resync)
    pub records_written: usize,
    /// Rows removed by a resync before inserting
    pub records_deleted: u64,
    pub dry_run: bool,
}

/// Reconciles observation batches against a gateway.
pub struct Reconciler<G: ReferenceGateway> {
    gateway: Arc<G>,
    options: ReconcileOptions,
}

impl<G: ReferenceGateway> Reconciler<G> {
    pub fn new(gateway: Arc<G>, options: ReconcileOptions) -> Self {
        Self { gateway, options }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn options(&self) -> ReconcileOptions {
        self.options
    }

    /// Validate and write one batch with the configured strategy.
    pub async fn reconcile(
        &self,
        batch: &ObservationBatch,
    ) -> std::result::Result<ReconcileOutcome, UnitError> {
        self.check(batch).await?;
        self.write(batch).await
    }

    /// Every check that runs before a write: the source against reference
    /// data unless validation is offline, and duplicate timestamps under
    /// resync. Read-only.
    pub async fn check(&self, batch: &ObservationBatch) -> std::result::Result<(), UnitError> {
        self.preflight(batch, true).await
    }

    /// As [`check`](Self::check), but the source's site need not be
    /// registered yet.
    pub async fn check_without_site(
        &self,
        batch: &ObservationBatch,
    ) -> std::result::Result<(), UnitError> {
        self.preflight(batch, false).await
    }

    async fn preflight(
        &self,
        batch: &ObservationBatch,
        with_site: bool,
    ) -> std::result::Result<(), UnitError> {
        let source = batch.source();
        let fail = |err: ReconcileError| UnitError::for_source(source, ReconcileState::Aborted, err);

        if !self.options.offline_validation {
            let gw = self.gateway.as_ref();
            let validated = if with_site {
                validate_source(gw, source).await
            } else {
                validate_reference(gw, source).await
            };
            validated.map_err(fail)?;
        }

        if self.options.strategy() == Strategy::Resync {
            batch.check_duplicates().map_err(|e| fail(e.into()))?;
        }

        Ok(())
    }

    /// Write an already checked batch with the configured strategy.
    ///
    /// In dry-run mode nothing is written.
    pub async fn write(
        &self,
        batch: &ObservationBatch,
    ) -> std::result::Result<ReconcileOutcome, UnitError> {
        let source = batch.source();
        let strategy = self.options.strategy();

        if self.options.dry_run {
            info!(
                source = %source,
                strategy = %strategy,
                records = batch.len(),
                "Dry run: batch is valid, nothing written"
            );
            return Ok(ReconcileOutcome {
                strategy,
                state: ReconcileState::Parsed,
                records_written: 0,
                records_deleted: 0,
                dry_run: true,
            });
        }

        match strategy {
            Strategy::Merge => self.update_or_add(batch).await,
            Strategy::Resync => self.delete_then_save(batch).await,
        }
    }

    /// Upsert each record in order.
    ///
    /// Stops at the first failure. Records before the failing one stay
    /// saved; the error carries the failing index.
    pub async fn update_or_add(
        &self,
        batch: &ObservationBatch,
    ) -> std::result::Result<ReconcileOutcome, UnitError> {
        let source = batch.source();
        info!(source = %source, records = batch.len(), "Merging observations");

        for (index, observation) in batch.observations().iter().enumerate() {
            if let Err(e) = self.gateway.upsert_observation(source, observation).await {
                let err = ReconcileError::MergeAborted {
                    index,
                    committed: index,
                    source: Box::new(ReconcileError::at(ReconcileState::Inserting, e)),
                };
                return Err(UnitError::for_source(source, ReconcileState::Aborted, err));
            }
        }

        info!(source = %source, records = batch.len(), "Merge complete");
        Ok(ReconcileOutcome {
            strategy: Strategy::Merge,
            state: ReconcileState::Committed,
            records_written: batch.len(),
            records_deleted: 0,
            dry_run: false,
        })
    }

    /// Replace every stored observation for the source's site and type with
    /// the batch, in one transaction.
    ///
    /// Does not check for duplicate timestamps; a duplicate reaching the
    /// store fails the insert and rolls the transaction back.
    pub async fn delete_then_save(
        &self,
        batch: &ObservationBatch,
    ) -> std::result::Result<ReconcileOutcome, UnitError> {
        let source = batch.source();
        let fail = |state: ReconcileState, err: ReconcileError| {
            UnitError::for_source(source, state, err)
        };

        let keys = self
            .resolve_keys(source)
            .await
            .map_err(|e| fail(ReconcileState::Aborted, e))?;

        let mut tx = self.gateway.begin().await.map_err(|e| {
            fail(
                ReconcileState::Aborted,
                ReconcileError::at(ReconcileState::KeyResolution, e),
            )
        })?;

        info!(source = %source, records = batch.len(), "Resyncing observations");

        let deleted = match tx
            .delete_observations_for_source(source.site_id(), source.type_id())
            .await
        {
            Ok(n) => n,
            Err(e) => {
                let err = roll_back(tx, ReconcileState::Deleting, e).await;
                return Err(fail(ReconcileState::RolledBack, err));
            }
        };
        debug!(source = %source, deleted, "Deleted stored observations");

        let inserted = match tx
            .insert_observations_batch(&keys, batch.observations())
            .await
        {
            Ok(n) => n,
            Err(e) => {
                let err = roll_back(tx, ReconcileState::Inserting, e).await;
                return Err(fail(ReconcileState::RolledBack, err));
            }
        };

        // Deferred constraints surface here; the store discards the transaction.
        tx.commit().await.map_err(|e| {
            fail(
                ReconcileState::RolledBack,
                ReconcileError::at(ReconcileState::Inserting, e),
            )
        })?;

        info!(
            source = %source,
            deleted,
            inserted,
            state = %ReconcileState::Committed,
            "Resync complete"
        );

        Ok(ReconcileOutcome {
            strategy: Strategy::Resync,
            state: ReconcileState::Committed,
            records_written: inserted as usize,
            records_deleted: deleted,
            dry_run: false,
        })
    }

    /// Resolve the storage key tuple for a source, in the order site, sample,
    /// method, type. Never cached.
    pub async fn resolve_keys(&self, source: &SourceDescriptor) -> Result<StorageKeys> {
        let stage = ReconcileState::KeyResolution;
        let gw = self.gateway.as_ref();

        let site_pk = gw
            .resolve_site_pk(source.site_id())
            .await
            .map_err(|e| ReconcileError::at(stage, e))?;
        let sample_pk = gw
            .resolve_sample_pk(source.sample_id(), source.system_id())
            .await
            .map_err(|e| ReconcileError::at(stage, e))?;
        let method_pk = gw
            .resolve_method_pk(source.method_id())
            .await
            .map_err(|e| ReconcileError::at(stage, e))?;
        let type_pk = gw
            .resolve_type_pk(source.type_id(), source.method_id())
            .await
            .map_err(|e| ReconcileError::at(stage, e))?;

        let keys = StorageKeys {
            site_pk,
            type_pk,
            method_pk,
            sample_pk,
        };
        debug!(source = %source, ?keys, "Resolved storage keys");
        Ok(keys)
    }
}

/// Roll back after a failure at `stage` and return the original error.
async fn roll_back<T: ObservationTx>(
    tx: T,
    stage: ReconcileState,
    err: GatewayError,
) -> ReconcileError {
    warn!(stage = %stage, error = %err, "Resync failed, rolling back");

    if let Err(rollback_err) = tx.rollback().await {
        // The store drops an unfinished transaction with its connection.
        warn!(error = %rollback_err, "Rollback failed");
    }

    ReconcileError::at(stage, err)
}
