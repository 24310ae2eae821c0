//! Site metadata.

use serde::{Deserialize, Serialize};

/// A measurement site as stored in the site table.
///
/// `height` and `ground_relationship` are in metres; the metadata files
/// use -999.9 when unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub site_id: String,
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
    pub ground_relationship: f64,
}
