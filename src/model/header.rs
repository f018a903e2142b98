//! Element and relationship identity.
//!
//! Headers are compared and hashed by guid only. Two headers fetched through
//! different relationship paths are the same element when their guids match,
//! whatever the rest of the payload says.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{MetaviewError, Result};
use crate::repository::{RawElementRecord, RawRelationshipRecord};

/// Where a record was mastered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementOrigin {
    #[serde(default)]
    pub home_metadata_collection_id: Option<String>,
    #[serde(default)]
    pub metadata_collection_name: Option<String>,
    #[serde(default = "default_origin_category")]
    pub origin_category: String,
}

fn default_origin_category() -> String {
    "local-cohort".to_string()
}

impl Default for ElementOrigin {
    fn default() -> Self {
        Self {
            home_metadata_collection_id: None,
            metadata_collection_name: None,
            origin_category: default_origin_category(),
        }
    }
}

/// Audit trail and version token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementVersions {
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: i64,
}

/// A classification attached to an element (e.g. `Anchors`, `Confidentiality`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementClassification {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

/// Identity, type and provenance of one element.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementHeader {
    pub guid: String,
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classifications: Vec<ElementClassification>,
    #[serde(default)]
    pub origin: ElementOrigin,
    #[serde(default)]
    pub versions: ElementVersions,
}

impl ElementHeader {
    /// Build a header from a raw repository record.
    ///
    /// Fails with `MalformedRecord` when the guid or type name is absent or blank.
    pub fn from_record(record: &RawElementRecord) -> Result<Self> {
        let guid = required(record.guid.as_deref(), "element", "guid", None)?;
        let type_name =
            required(record.type_name.as_deref(), "element", "typeName", Some(&guid))?;

        Ok(Self {
            guid,
            type_name,
            classifications: record.classifications.clone(),
            origin: record.origin.clone().unwrap_or_default(),
            versions: record.versions.clone().unwrap_or_default(),
        })
    }

    /// Header with default provenance, mostly for fixtures.
    pub fn new(guid: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            type_name: type_name.into(),
            classifications: Vec::new(),
            origin: ElementOrigin::default(),
            versions: ElementVersions::default(),
        }
    }

    pub fn classification(&self, name: &str) -> Option<&ElementClassification> {
        self.classifications.iter().find(|c| c.name == name)
    }
}

impl PartialEq for ElementHeader {
    fn eq(&self, other: &Self) -> bool {
        self.guid == other.guid
    }
}

impl Eq for ElementHeader {}

impl Hash for ElementHeader {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.guid.hash(state);
    }
}

impl fmt::Display for ElementHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name, self.guid)
    }
}

/// Identity of a relationship instance. The relationship points from end1 to end2.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipHeader {
    pub guid: String,
    pub type_name: String,
    pub end1_guid: String,
    pub end2_guid: String,
    #[serde(default)]
    pub origin: ElementOrigin,
    #[serde(default)]
    pub versions: ElementVersions,
}

impl RelationshipHeader {
    /// Build a relationship header from a raw record; all four identity fields are required.
    pub fn from_record(record: &RawRelationshipRecord) -> Result<Self> {
        let guid = required(record.guid.as_deref(), "relationship", "guid", None)?;
        let type_name =
            required(record.type_name.as_deref(), "relationship", "typeName", Some(&guid))?;
        let end1_guid =
            required(record.end1_guid.as_deref(), "relationship", "end1Guid", Some(&guid))?;
        let end2_guid =
            required(record.end2_guid.as_deref(), "relationship", "end2Guid", Some(&guid))?;

        Ok(Self {
            guid,
            type_name,
            end1_guid,
            end2_guid,
            origin: record.origin.clone().unwrap_or_default(),
            versions: record.versions.clone().unwrap_or_default(),
        })
    }

    pub fn new(
        guid: impl Into<String>,
        type_name: impl Into<String>,
        end1_guid: impl Into<String>,
        end2_guid: impl Into<String>,
    ) -> Self {
        Self {
            guid: guid.into(),
            type_name: type_name.into(),
            end1_guid: end1_guid.into(),
            end2_guid: end2_guid.into(),
            origin: ElementOrigin::default(),
            versions: ElementVersions::default(),
        }
    }

    /// The end opposite `guid`, or `None` when the relationship does not touch it.
    pub fn other_end(&self, guid: &str) -> Option<&str> {
        if self.end1_guid == guid {
            Some(&self.end2_guid)
        } else if self.end2_guid == guid {
            Some(&self.end1_guid)
        } else {
            None
        }
    }
}

impl PartialEq for RelationshipHeader {
    fn eq(&self, other: &Self) -> bool {
        self.guid == other.guid
    }
}

impl Eq for RelationshipHeader {}

impl Hash for RelationshipHeader {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.guid.hash(state);
    }
}

impl fmt::Display for RelationshipHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({}: {} -> {})",
            self.type_name, self.guid, self.end1_guid, self.end2_guid
        )
    }
}

fn required(value: Option<&str>, what: &str, field: &str, guid: Option<&str>) -> Result<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(MetaviewError::MalformedRecord(match guid {
            Some(g) => format!("{} {} has no {}", what, g, field),
            None => format!("{} record has no {}", what, field),
        })),
    }
}
