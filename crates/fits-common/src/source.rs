//! Source descriptors: the site, type, method, sample and system an
//! observation series belongs to.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FitsError, FitsResult};
use crate::site::Site;

/// Identifier used when a source has no sample or system.
pub const NONE_ID: &str = "none";

/// Properties block of a source metadata file.
///
/// Key names follow the metadata files (`siteID`, `typeID`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceProperties {
    #[serde(rename = "siteID", alias = "SiteID")]
    pub site_id: String,
    #[serde(default, alias = "Name")]
    pub name: String,
    #[serde(rename = "typeID", alias = "TypeID")]
    pub type_id: String,
    #[serde(rename = "methodID", alias = "MethodID")]
    pub method_id: String,
    #[serde(rename = "sampleID", alias = "SampleID", default)]
    pub sample_id: String,
    #[serde(rename = "systemID", alias = "SystemID", default)]
    pub system_id: String,
    #[serde(default, alias = "Height")]
    pub height: f64,
    #[serde(
        rename = "groundRelationship",
        alias = "GroundRelationship",
        default
    )]
    pub ground_relationship: f64,
}

/// GeoJSON point feature as stored in source metadata files.
#[derive(Debug, Clone, Deserialize)]
struct SourceFeature {
    #[serde(rename = "type", alias = "Type")]
    geometry_type: String,
    #[serde(default, alias = "Coordinates")]
    coordinates: Option<Vec<f64>>,
    #[serde(alias = "Properties")]
    properties: SourceProperties,
}

/// Identifies the site + type + method + sample + system combination of
/// an observation series.
///
/// Immutable once built. `sample_id` and `system_id` are never empty: an
/// absent value is stored as [`NONE_ID`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceDescriptor {
    site_id: String,
    name: String,
    type_id: String,
    method_id: String,
    sample_id: String,
    system_id: String,
    longitude: f64,
    latitude: f64,
    height: f64,
    ground_relationship: f64,
}

impl SourceDescriptor {
    /// Build a descriptor from metadata properties and a point location.
    pub fn new(properties: SourceProperties, longitude: f64, latitude: f64) -> FitsResult<Self> {
        let SourceProperties {
            site_id,
            name,
            type_id,
            method_id,
            sample_id,
            system_id,
            height,
            ground_relationship,
        } = properties;

        if site_id.trim().is_empty() {
            return Err(FitsError::MissingProperty("siteID"));
        }
        if type_id.trim().is_empty() {
            return Err(FitsError::MissingProperty("typeID"));
        }
        if method_id.trim().is_empty() {
            return Err(FitsError::MissingProperty("methodID"));
        }

        Ok(Self {
            site_id,
            name,
            type_id,
            method_id,
            sample_id: or_none(sample_id),
            system_id: or_none(system_id),
            longitude,
            latitude,
            height,
            ground_relationship,
        })
    }

    /// Parse a source metadata file (a GeoJSON `Point` feature).
    pub fn from_geojson(bytes: &[u8]) -> FitsResult<Self> {
        let feature: SourceFeature = serde_json::from_slice(bytes)?;

        if feature.geometry_type != "Point" {
            return Err(FitsError::NotPoint(feature.geometry_type));
        }

        let coordinates = feature.coordinates.unwrap_or_default();
        if coordinates.len() != 2 {
            return Err(FitsError::Coordinates(coordinates.len()));
        }

        Self::new(feature.properties, coordinates[0], coordinates[1])
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn method_id(&self) -> &str {
        &self.method_id
    }

    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn ground_relationship(&self) -> f64 {
        self.ground_relationship
    }

    /// Site metadata carried by this descriptor.
    pub fn site(&self) -> Site {
        Site {
            site_id: self.site_id.clone(),
            name: self.name.clone(),
            longitude: self.longitude,
            latitude: self.latitude,
            height: self.height,
            ground_relationship: self.ground_relationship,
        }
    }
}

impl fmt::Display for SourceDescriptor {
    /// `siteID.typeID`, the pair a resync is scoped to.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.site_id, self.type_id)
    }
}

fn or_none(id: String) -> String {
    if id.trim().is_empty() {
        NONE_ID.to_string()
    } else {
        id
    }
}
