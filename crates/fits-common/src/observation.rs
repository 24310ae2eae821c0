//! Observation records and batches.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{FitsError, FitsResult};
use crate::source::SourceDescriptor;

/// A single observation: a value and its uncertainty at an instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Observation time, normalized to UTC
    pub time: DateTime<Utc>,
    pub value: f64,
    /// Uncertainty of `value`; may be zero
    pub error: f64,
}

impl Observation {
    pub fn new(time: DateTime<Utc>, value: f64, error: f64) -> Self {
        Self { time, value, error }
    }

    /// Parse an RFC 3339 time with any offset and fractional precision.
    pub fn parse_time(s: &str) -> FitsResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| FitsError::InvalidTime(s.to_string()))
    }

    /// Canonical key for duplicate detection.
    ///
    /// UTC at microsecond precision, the resolution of the store's
    /// `timestamptz` column: two records that collapse to the same key here
    /// would collide on the observation unique key.
    pub fn timestamp_key(&self) -> String {
        self.time.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

/// An ordered sequence of observations sharing one source.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationBatch {
    source: SourceDescriptor,
    observations: Vec<Observation>,
}

impl ObservationBatch {
    pub fn new(source: SourceDescriptor, observations: Vec<Observation>) -> Self {
        Self {
            source,
            observations,
        }
    }

    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Append an observation. No duplicate check is made here.
    pub fn push(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    /// Number of records whose timestamp repeats an earlier record's.
    pub fn duplicate_count(&self) -> usize {
        let unique: HashSet<String> = self
            .observations
            .iter()
            .map(Observation::timestamp_key)
            .collect();

        self.observations.len() - unique.len()
    }

    /// Fail if any two records share a timestamp.
    ///
    /// Only the count is reported, not which timestamps collide.
    pub fn check_duplicates(&self) -> FitsResult<()> {
        match self.duplicate_count() {
            0 => Ok(()),
            count => Err(FitsError::DuplicateTimestamps { count }),
        }
    }
}
