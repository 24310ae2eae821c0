//! Main Ingester struct: decodes units from disk and reconciles them.

use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use storage::ReferenceGateway;

use crate::decode::{load_unit, read_site_file};
use crate::discovery::{discover_units, IngestUnit};
use crate::error::{ReconcileError, Result, UnitError};
use crate::reconcile::{ReconcileOptions, ReconcileOutcome, ReconcileState, Reconciler};

/// Totals for a run over a data directory.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub units_ok: usize,
    pub records_written: usize,
    pub records_deleted: u64,
    pub failures: Vec<UnitError>,
}

impl IngestSummary {
    pub fn units_failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Loads source and observation files into the store.
pub struct Ingester<G: ReferenceGateway> {
    reconciler: Reconciler<G>,
}

impl<G: ReferenceGateway> Ingester<G> {
    pub fn new(gateway: Arc<G>, options: ReconcileOptions) -> Self {
        Self {
            reconciler: Reconciler::new(gateway, options),
        }
    }

    pub fn reconciler(&self) -> &Reconciler<G> {
        &self.reconciler
    }

    /// Upsert every site in a site file. Returns the number of sites read.
    ///
    /// Nothing is written in dry-run mode.
    pub async fn load_sites(&self, path: &Path) -> Result<usize> {
        let sites = read_site_file(path).await?;

        if self.reconciler.options().dry_run {
            info!(file = %path.display(), sites = sites.len(), "Dry run: site file is valid");
            return Ok(sites.len());
        }

        for site in &sites {
            self.reconciler
                .gateway()
                .upsert_site(site)
                .await
                .map_err(|e| ReconcileError::saving_site(&site.site_id, e))?;
        }

        info!(file = %path.display(), sites = sites.len(), "Saved sites");
        Ok(sites.len())
    }

    /// Decode and check one unit, save its site, then write its
    /// observations.
    ///
    /// A unit that fails its checks writes nothing, not even its site.
    pub async fn ingest_unit(
        &self,
        unit: &IngestUnit,
    ) -> std::result::Result<ReconcileOutcome, UnitError> {
        let batch = load_unit(unit)
            .await
            .map_err(|e| UnitError::for_file(&unit.observation_file, e).with_files(unit.files()))?;

        self.reconciler
            .check_without_site(&batch)
            .await
            .map_err(|e| e.with_files(unit.files()))?;

        if !self.reconciler.options().dry_run {
            let site = batch.source().site();
            self.reconciler
                .gateway()
                .upsert_site(&site)
                .await
                .map_err(|e| {
                    UnitError::for_source(
                        batch.source(),
                        ReconcileState::Aborted,
                        ReconcileError::saving_site(&site.site_id, e),
                    )
                    .with_files(unit.files())
                })?;
        }

        self.reconciler
            .write(&batch)
            .await
            .map_err(|e| e.with_files(unit.files()))
    }

    /// Ingest every unit in `dir` in order.
    ///
    /// A failed unit is logged and counted; the run continues with the next.
    /// Fails only if the directory cannot be listed.
    pub async fn ingest_dir(&self, dir: &Path) -> Result<IngestSummary> {
        let units = discover_units(dir)?;
        info!(dir = %dir.display(), units = units.len(), "Discovered units");

        let mut summary = IngestSummary::default();

        for unit in units {
            let result = match unit {
                Ok(unit) => self.ingest_unit(&unit).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(outcome) => {
                    summary.units_ok += 1;
                    summary.records_written += outcome.records_written;
                    summary.records_deleted += outcome.records_deleted;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(
                            unit = %e.unit,
                            state = %e.state,
                            error = %e.source,
                            "Unit failed, store unavailable"
                        );
                    } else {
                        error!(
                            unit = %e.unit,
                            state = %e.state,
                            error = %e.source,
                            "Unit failed"
                        );
                    }
                    summary.failures.push(e);
                }
            }
        }

        info!(
            units_ok = summary.units_ok,
            units_failed = summary.units_failed(),
            records_written = summary.records_written,
            "Ingest complete"
        );

        Ok(summary)
    }
}
