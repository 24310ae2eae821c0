//! Decoding of source metadata and observation files.
//!
//! A unit is a pair of files sharing a stem:
//!
//! - `<stem>.json`: a GeoJSON point carrying the source properties
//! - `<stem>.csv`: a header line, then one `time,value,error` row per
//!   observation with RFC 3339 times

use csv::{ReaderBuilder, StringRecord, Trim};
use std::path::Path;
use tracing::debug;

use fits_common::{Observation, ObservationBatch, Site, SourceDescriptor};

use crate::discovery::IngestUnit;
use crate::error::{ReconcileError, Result};

/// Read and normalize a source metadata file.
pub async fn read_source_file(path: &Path) -> Result<SourceDescriptor> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| ReconcileError::io(path, e))?;

    Ok(SourceDescriptor::from_geojson(&data)?)
}

/// Read an observation file. The first line is a header and is ignored.
pub async fn read_observations(path: &Path) -> Result<Vec<Observation>> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| ReconcileError::io(path, e))?;

    parse_observations(path, &data)
}

/// Parse observation rows from CSV bytes. `path` is used in errors only.
pub fn parse_observations(path: &Path, data: &[u8]) -> Result<Vec<Observation>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(data);

    let mut observations = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| csv_error(path, e))?;
        let line = line_of(&record);

        if record.len() != 3 {
            return Err(decode_error(
                path,
                line,
                format!("expected 3 fields (time,value,error), found {}", record.len()),
            ));
        }

        let time = Observation::parse_time(&record[0])
            .map_err(|e| decode_error(path, line, e.to_string()))?;
        let value = parse_f64(path, line, "value", &record[1])?;
        let error = parse_f64(path, line, "error", &record[2])?;

        observations.push(Observation::new(time, value, error));
    }

    Ok(observations)
}

/// Decode both files of a unit into a batch.
pub async fn load_unit(unit: &IngestUnit) -> Result<ObservationBatch> {
    let source = read_source_file(&unit.source_file).await?;
    let observations = read_observations(&unit.observation_file).await?;

    debug!(
        source = %source,
        records = observations.len(),
        file = %unit.observation_file.display(),
        "Decoded unit"
    );

    Ok(ObservationBatch::new(source, observations))
}

/// Read a site file: no header, one
/// `siteID,name,longitude,latitude,height,ground_relationship` row per site.
pub async fn read_site_file(path: &Path) -> Result<Vec<Site>> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| ReconcileError::io(path, e))?;

    parse_sites(path, &data)
}

pub fn parse_sites(path: &Path, data: &[u8]) -> Result<Vec<Site>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(data);

    let mut sites = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| csv_error(path, e))?;
        let line = line_of(&record);

        if record.len() != 6 {
            return Err(decode_error(
                path,
                line,
                format!("expected 6 fields for a site, found {}", record.len()),
            ));
        }

        sites.push(Site {
            site_id: record[0].to_string(),
            name: record[1].to_string(),
            longitude: parse_f64(path, line, "longitude", &record[2])?,
            latitude: parse_f64(path, line, "latitude", &record[3])?,
            height: parse_f64(path, line, "height", &record[4])?,
            ground_relationship: parse_f64(path, line, "ground_relationship", &record[5])?,
        });
    }

    Ok(sites)
}

fn parse_f64(path: &Path, line: u64, field: &str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|_| decode_error(path, line, format!("invalid {} {:?}", field, raw)))
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn decode_error(path: &Path, line: u64, message: String) -> ReconcileError {
    ReconcileError::Decode {
        path: path.to_path_buf(),
        line,
        message,
    }
}

fn csv_error(path: &Path, err: csv::Error) -> ReconcileError {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    decode_error(path, line, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> &'static Path {
        Path::new("VGT2_e.csv")
    }

    #[test]
    fn test_header_is_skipped_and_space_trimmed() {
        let data = b"date-time, e (mm), error (mm)\n\
                     2002-03-22T12:00:00.000000Z, -18.86, 3.07\n\
                     2002-03-23T12:00:00.000000Z,-19.25,3.11\n";
        let obs = parse_observations(path(), data).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].value, -18.86);
        assert_eq!(obs[1].error, 3.11);
    }

    #[test]
    fn test_header_only_is_empty_batch() {
        let obs = parse_observations(path(), b"date-time, e (mm), error (mm)\n").unwrap();
        assert!(obs.is_empty());
    }

    #[test]
    fn test_wrong_field_count_names_line() {
        let data = b"h1,h2,h3\n2002-03-22T12:00:00Z,1.0,0.1\n2002-03-23T12:00:00Z,1.0\n";
        match parse_observations(path(), data) {
            Err(ReconcileError::Decode { line, message, .. }) => {
                assert_eq!(line, 3);
                assert!(message.contains("found 2"), "{}", message);
            }
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_value_names_field() {
        let data = b"h1,h2,h3\n2002-03-22T12:00:00Z,abc,0.1\n";
        let err = parse_observations(path(), data).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("VGT2_e.csv line 2"), "{}", msg);
        assert!(msg.contains("invalid value"), "{}", msg);
    }

    #[test]
    fn test_bad_time_is_decode_error() {
        let data = b"h1,h2,h3\n22/03/2002,1.0,0.1\n";
        assert!(matches!(
            parse_observations(path(), data),
            Err(ReconcileError::Decode { line: 2, .. })
        ));
    }

    #[test]
    fn test_parse_sites_allows_quoted_names() {
        let data = b"VGT2,\"Te Maari, Tongariro\",175.67,-39.11,1360.0,0.0\n";
        let sites = parse_sites(Path::new("sites.csv"), data).unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].name, "Te Maari, Tongariro");
        assert_eq!(sites[0].height, 1360.0);
    }

    #[test]
    fn test_parse_sites_rejects_short_rows() {
        let err = parse_sites(Path::new("sites.csv"), b"VGT2,Te Maari,175.67\n").unwrap_err();
        assert!(matches!(err, ReconcileError::Decode { line: 1, .. }));
    }
}
