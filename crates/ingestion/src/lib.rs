//! FITS observation ingestion.
//!
//! Validates source descriptors against reference data and reconciles
//! observation batches into the store, by merge or by transactional resync.
//! Also decodes the on-disk unit files and discovers them in a directory.
//!
//! # Example
//!
//! ```ignore
//! use ingestion::{Ingester, ReconcileOptions};
//!
//! let ingester = Ingester::new(gateway, ReconcileOptions { resync: true, ..Default::default() });
//! let summary = ingester.ingest_dir(Path::new("/data/gnss")).await?;
//! ```

pub mod decode;
pub mod discovery;
pub mod error;
pub mod ingester;
pub mod reconcile;
pub mod validate;

pub use decode::{load_unit, read_observations, read_site_file, read_source_file};
pub use discovery::{discover_units, IngestUnit};
pub use error::{ReconcileError, Result, UnitError};
pub use ingester::{IngestSummary, Ingester};
pub use reconcile::{ReconcileOptions, ReconcileOutcome, ReconcileState, Reconciler, Strategy};
pub use validate::{validate_reference, validate_source};
