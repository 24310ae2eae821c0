//! Common test fixtures for FITS loader tests.
//!
//! The VGT2 `e` series is a GNSS east-displacement record at a single
//! site, processed with the `bernese5` method. Seven observations, no
//! duplicate timestamps.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use fits_common::{Observation, ObservationBatch, Site, SourceDescriptor};
use storage::{MemoryGateway, ReferenceData};

/// Raw file contents for the VGT2 `e` unit.
pub mod files {
    pub const VGT2_E_JSON: &str = r#"{
  "type": "Point",
  "coordinates": [175.673117, -39.107939],
  "properties": {
    "siteID": "VGT2",
    "name": "Te Maari 2",
    "typeID": "e",
    "methodID": "bernese5",
    "sampleID": "",
    "systemID": "",
    "height": 1360.4,
    "groundRelationship": -1.0
  }
}"#;

    pub const VGT2_E_CSV: &str = "date-time, e (mm), error (mm)\n\
2013-08-10T12:00:00.000000Z, -1.35, 1.42\n\
2013-08-11T12:00:00.000000Z, -0.83, 1.39\n\
2013-08-12T12:00:00.000000Z, 0.12, 1.51\n\
2013-08-13T12:00:00.000000Z, 0.47, 1.40\n\
2013-08-14T12:00:00.000000Z, 1.06, 1.38\n\
2013-08-15T12:00:00.000000Z, 1.61, 1.44\n\
2013-08-16T12:00:00.000000Z, 2.29, 1.47\n";

    /// Number of observations in [`VGT2_E_CSV`].
    pub const VGT2_E_RECORDS: usize = 7;

    /// Site file row for VGT2. The name contains a comma.
    pub const SITES_CSV: &str = "VGT2,\"Te Maari 2, Tongariro\",175.673117,-39.107939,1360.4,-1.0\n\
WGTN,Wellington,174.806,-41.323,26.0,0.0\n";
}

pub fn vgt2_site() -> Site {
    Site {
        site_id: "VGT2".to_string(),
        name: "Te Maari 2".to_string(),
        longitude: 175.673117,
        latitude: -39.107939,
        height: 1360.4,
        ground_relationship: -1.0,
    }
}

pub fn vgt2_e_source() -> SourceDescriptor {
    SourceDescriptor::from_geojson(files::VGT2_E_JSON.as_bytes())
        .expect("fixture source is valid")
}

/// The seven VGT2 `e` observations, in file order.
pub fn vgt2_e_observations() -> Vec<Observation> {
    [
        ("2013-08-10T12:00:00Z", -1.35, 1.42),
        ("2013-08-11T12:00:00Z", -0.83, 1.39),
        ("2013-08-12T12:00:00Z", 0.12, 1.51),
        ("2013-08-13T12:00:00Z", 0.47, 1.40),
        ("2013-08-14T12:00:00Z", 1.06, 1.38),
        ("2013-08-15T12:00:00Z", 1.61, 1.44),
        ("2013-08-16T12:00:00Z", 2.29, 1.47),
    ]
    .into_iter()
    .map(|(t, v, e)| Observation::new(time(t), v, e))
    .collect()
}

pub fn vgt2_e_batch() -> ObservationBatch {
    ObservationBatch::new(vgt2_e_source(), vgt2_e_observations())
}

/// A source for VGT2 with different identifiers.
pub fn vgt2_source_with(type_id: &str, method_id: &str, sample_id: &str) -> SourceDescriptor {
    let props = fits_common::SourceProperties {
        site_id: "VGT2".to_string(),
        name: "Te Maari 2".to_string(),
        type_id: type_id.to_string(),
        method_id: method_id.to_string(),
        sample_id: sample_id.to_string(),
        height: 1360.4,
        ground_relationship: -1.0,
        ..Default::default()
    };
    SourceDescriptor::new(props, 175.673117, -39.107939).expect("fixture source is valid")
}

/// Parse an RFC 3339 fixture time.
pub fn time(s: &str) -> DateTime<Utc> {
    Observation::parse_time(s).expect("fixture time is valid")
}

/// Reference data for the GNSS types with no sites registered.
pub fn gnss_reference() -> ReferenceData {
    ReferenceData::new()
        .with_type_method("e", "bernese5")
        .with_type_method("n", "bernese5")
        .with_type_method("u", "bernese5")
        .with_method("gamit")
        .with_sample("none", "none")
}

/// A gateway with GNSS reference data and the VGT2 site registered.
pub fn seeded_gateway() -> MemoryGateway {
    MemoryGateway::new(gnss_reference().with_site(vgt2_site()))
}

/// A gateway with GNSS reference data and no sites.
pub fn siteless_gateway() -> MemoryGateway {
    MemoryGateway::new(gnss_reference())
}

/// Write a unit's source and observation files into `dir`.
///
/// Returns `(source_file, observation_file)`.
pub fn write_unit(
    dir: &Path,
    stem: &str,
    source_json: &str,
    observations_csv: &str,
) -> (PathBuf, PathBuf) {
    let source_file = dir.join(format!("{}.json", stem));
    let observation_file = dir.join(format!("{}.csv", stem));
    std::fs::write(&source_file, source_json).expect("write source fixture");
    std::fs::write(&observation_file, observations_csv).expect("write observation fixture");
    (source_file, observation_file)
}

/// Write the VGT2 `e` unit into `dir`.
pub fn write_vgt2_e_unit(dir: &Path) -> (PathBuf, PathBuf) {
    write_unit(dir, "VGT2_e", files::VGT2_E_JSON, files::VGT2_E_CSV)
}
