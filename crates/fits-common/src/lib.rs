//! Common types shared across the FITS loader crates.

pub mod error;
pub mod observation;
pub mod site;
pub mod source;

pub use error::{FitsError, FitsResult};
pub use observation::{Observation, ObservationBatch};
pub use site::Site;
pub use source::{SourceDescriptor, SourceProperties, NONE_ID};
