//! Repository collaborator: where raw element and relationship records come from.
//!
//! The assembler never assumes the whole graph is in memory. Every call may be
//! slow, paginated or fail, and implementations decide how records are stored.

mod memory;
mod sqlite;

pub use memory::{FailureMode, InMemoryRepository};
pub use sqlite::SqliteRepository;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::model::header::{ElementClassification, ElementOrigin, ElementVersions};

/// An element exactly as the repository returned it.
///
/// Identity fields are optional here; `ElementHeader::from_record` decides
/// whether the record is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawElementRecord {
    pub guid: Option<String>,
    pub type_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classifications: Vec<ElementClassification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<ElementOrigin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions: Option<ElementVersions>,
    pub properties: Value,
}

impl RawElementRecord {
    pub fn new(guid: &str, type_name: &str, properties: Value) -> Self {
        Self {
            guid: Some(guid.to_string()),
            type_name: Some(type_name.to_string()),
            properties,
            ..Default::default()
        }
    }
}

/// A relationship exactly as the repository returned it; points from end1 to end2.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawRelationshipRecord {
    pub guid: Option<String>,
    pub type_name: Option<String>,
    pub end1_guid: Option<String>,
    pub end2_guid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<ElementOrigin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions: Option<ElementVersions>,
    pub properties: Value,
}

impl RawRelationshipRecord {
    pub fn new(guid: &str, type_name: &str, end1_guid: &str, end2_guid: &str) -> Self {
        Self {
            guid: Some(guid.to_string()),
            type_name: Some(type_name.to_string()),
            end1_guid: Some(end1_guid.to_string()),
            end2_guid: Some(end2_guid.to_string()),
            ..Default::default()
        }
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }

    /// Whether this relationship touches `guid` in the requested direction.
    pub fn matches(&self, guid: &str, direction: TraversalDirection) -> bool {
        let end1 = self.end1_guid.as_deref() == Some(guid);
        let end2 = self.end2_guid.as_deref() == Some(guid);
        match direction {
            TraversalDirection::Outgoing => end1,
            TraversalDirection::Incoming => end2,
            TraversalDirection::Both => end1 || end2,
        }
    }

    /// Guid at the opposite end from `guid`.
    pub fn far_end(&self, guid: &str) -> Option<&str> {
        if self.end1_guid.as_deref() == Some(guid) {
            self.end2_guid.as_deref()
        } else if self.end2_guid.as_deref() == Some(guid) {
            self.end1_guid.as_deref()
        } else {
            None
        }
    }
}

/// One relationship plus the far-end element, if the repository could resolve it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedRecord {
    pub relationship: RawRelationshipRecord,
    #[serde(default)]
    pub element: Option<RawElementRecord>,
}

/// Which relationships of an element to return, relative to that element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraversalDirection {
    /// Element is end1
    #[default]
    Outgoing,
    /// Element is end2
    Incoming,
    Both,
}

impl std::str::FromStr for TraversalDirection {
    type Err = crate::error::MetaviewError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "outgoing" | "out" => Ok(TraversalDirection::Outgoing),
            "incoming" | "in" => Ok(TraversalDirection::Incoming),
            "both" => Ok(TraversalDirection::Both),
            other => Err(crate::error::MetaviewError::InvalidInput(format!(
                "unknown direction: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub start_from: usize,
    pub page_size: usize,
}

impl PageRequest {
    pub fn first(page_size: usize) -> Self {
        Self {
            start_from: 0,
            page_size,
        }
    }

    pub fn next(&self) -> Self {
        Self {
            start_from: self.start_from + self.page_size,
            page_size: self.page_size,
        }
    }
}

/// Read access to a metadata repository.
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    /// Fetch one element; `NotFound` when it does not exist.
    async fn get_element(&self, guid: &str) -> Result<RawElementRecord>;

    /// One page of relationships of `guid` whose type is in `relationship_types`.
    ///
    /// Order is the repository's and is preserved by the assembler. A page
    /// shorter than `page.page_size` is the last one.
    async fn get_relationships(
        &self,
        guid: &str,
        relationship_types: &[String],
        direction: TraversalDirection,
        page: PageRequest,
    ) -> Result<Vec<RelatedRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_matching() {
        let rel = RawRelationshipRecord::new("r1", "T", "a", "b");
        assert!(rel.matches("a", TraversalDirection::Outgoing));
        assert!(!rel.matches("a", TraversalDirection::Incoming));
        assert!(rel.matches("b", TraversalDirection::Incoming));
        assert!(rel.matches("b", TraversalDirection::Both));
        assert!(!rel.matches("c", TraversalDirection::Both));
        assert_eq!(rel.far_end("a"), Some("b"));
        assert_eq!(rel.far_end("c"), None);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("in".parse::<TraversalDirection>().unwrap(), TraversalDirection::Incoming);
        assert!("sideways".parse::<TraversalDirection>().is_err());
    }

    #[test]
    fn test_raw_record_tolerates_unknown_fields() {
        let record: RawElementRecord = serde_json::from_str(
            r#"{"guid": "g1", "typeName": "Collection", "properties": {}, "effectiveTime": 12}"#,
        )
        .unwrap();
        assert_eq!(record.guid.as_deref(), Some("g1"));
    }

    #[test]
    fn test_page_request() {
        let page = PageRequest::first(50);
        assert_eq!(page.next().start_from, 50);
        assert_eq!(page.next().next().start_from, 100);
    }
}
