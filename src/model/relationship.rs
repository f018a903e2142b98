//! Relationship context: how a related element was reached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{MetaviewError, Result};
use crate::model::header::{ElementHeader, RelationshipHeader};
use crate::model::properties::{ElementProperties, PropertiesRegistry};
use crate::repository::{RawElementRecord, RawRelationshipRecord};

/// Relationship payload. Unknown properties land in `additional`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelationshipProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Strength of the relationship, 0-100 by repository convention
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<i32>,
    #[serde(flatten)]
    pub additional: BTreeMap<String, Value>,
}

impl RelationshipProperties {
    pub fn from_value(guid: &str, raw: &Value) -> Result<Self> {
        match raw {
            Value::Null => Ok(Self::default()),
            Value::Object(_) => serde_json::from_value(raw.clone()).map_err(|e| {
                MetaviewError::MalformedRecord(format!("relationship {} properties: {}", guid, e))
            }),
            _ => Err(MetaviewError::MalformedRecord(format!(
                "relationship {} properties must be an object",
                guid
            ))),
        }
    }
}

/// Which end of the relationship the related element occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipEnd {
    /// The related element is end1, i.e. the source of the relationship
    End1,
    /// The related element is end2, i.e. the target of the relationship
    End2,
}

/// The relationship that justified including an element, seen from the
/// element the traversal started at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipContext {
    pub relationship: RelationshipHeader,
    #[serde(default)]
    pub properties: RelationshipProperties,
    #[serde(rename = "startingElementGUID")]
    pub starting_element_guid: String,
    pub related_end: RelationshipEnd,
}

impl RelationshipContext {
    /// Anchor a relationship at `starting_guid`.
    ///
    /// Fails with `RelationshipIntegrity` when the relationship does not touch
    /// the starting element. A self-relationship puts the related element at end2.
    pub fn new(
        relationship: RelationshipHeader,
        properties: RelationshipProperties,
        starting_guid: &str,
    ) -> Result<Self> {
        let related_end = if relationship.end1_guid == starting_guid {
            RelationshipEnd::End2
        } else if relationship.end2_guid == starting_guid {
            RelationshipEnd::End1
        } else {
            return Err(MetaviewError::integrity(
                &relationship.guid,
                format!("does not reference starting element {}", starting_guid),
            ));
        };

        Ok(Self {
            relationship,
            properties,
            starting_element_guid: starting_guid.to_string(),
            related_end,
        })
    }

    /// Guid of the related (far-end) element.
    pub fn related_guid(&self) -> &str {
        match self.related_end {
            RelationshipEnd::End1 => &self.relationship.end1_guid,
            RelationshipEnd::End2 => &self.relationship.end2_guid,
        }
    }

    /// True when the related element is the source of the relationship.
    pub fn related_is_source(&self) -> bool {
        self.related_end == RelationshipEnd::End1
    }

    pub fn type_name(&self) -> &str {
        &self.relationship.type_name
    }
}

/// An element plus the relationship context that brought it into a result.
///
/// Equality covers the element guid and the relationship guid only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedElementSummary {
    pub header: ElementHeader,
    pub properties: ElementProperties,
    /// `None` when the element was fetched directly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_context: Option<RelationshipContext>,
}

impl RelatedElementSummary {
    /// Summary for an element fetched directly (no relationship context).
    pub fn direct(record: &RawElementRecord, registry: &PropertiesRegistry) -> Result<Self> {
        let header = ElementHeader::from_record(record)?;
        let properties = registry.resolve(&header.type_name, &record.properties)?;
        Ok(Self {
            header,
            properties,
            relationship_context: None,
        })
    }

    /// Summary for an element reached from `starting_guid` through `relationship`.
    ///
    /// The far-end record must be present and must be the relationship's other end.
    pub fn related(
        starting_guid: &str,
        relationship: &RawRelationshipRecord,
        far_end: Option<&RawElementRecord>,
        registry: &PropertiesRegistry,
    ) -> Result<Self> {
        let rel_header = RelationshipHeader::from_record(relationship)?;
        let rel_properties = RelationshipProperties::from_value(&rel_header.guid, &relationship.properties)?;
        let context = RelationshipContext::new(rel_header, rel_properties, starting_guid)?;

        let record = far_end.ok_or_else(|| {
            MetaviewError::integrity(
                &context.relationship.guid,
                format!("far end {} is not resolvable", context.related_guid()),
            )
        })?;
        let header = ElementHeader::from_record(record)?;
        if header.guid != context.related_guid() {
            return Err(MetaviewError::integrity(
                &context.relationship.guid,
                format!(
                    "far end {} does not match supplied element {}",
                    context.related_guid(),
                    header.guid
                ),
            ));
        }
        let properties = registry.resolve(&header.type_name, &record.properties)?;

        Ok(Self {
            header,
            properties,
            relationship_context: Some(context),
        })
    }

    pub fn guid(&self) -> &str {
        &self.header.guid
    }

    pub fn relationship_guid(&self) -> Option<&str> {
        self.relationship_context
            .as_ref()
            .map(|c| c.relationship.guid.as_str())
    }

    /// Label used by renderers: display name, else qualified name, else guid.
    pub fn label(&self) -> String {
        match (&self.properties, self.properties.display_name()) {
            (_, Some(name)) => name.to_string(),
            (ElementProperties::Unrecognized { .. }, None) => self
                .properties
                .qualified_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} (unrecognized)", self.header.type_name)),
            (_, None) => self.header.guid.clone(),
        }
    }
}

impl PartialEq for RelatedElementSummary {
    fn eq(&self, other: &Self) -> bool {
        self.header.guid == other.header.guid && self.relationship_guid() == other.relationship_guid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn member(guid: &str) -> RawElementRecord {
        RawElementRecord::new(guid, "Asset", json!({"displayName": format!("Asset {}", guid)}))
    }

    #[test]
    fn test_related_target() {
        let registry = PropertiesRegistry::new();
        let rel = RawRelationshipRecord::new("r1", "CollectionMembership", "c1", "m1");
        let summary = RelatedElementSummary::related("c1", &rel, Some(&member("m1")), &registry).unwrap();
        let ctx = summary.relationship_context.as_ref().unwrap();
        assert_eq!(ctx.starting_element_guid, "c1");
        assert_eq!(ctx.related_end, RelationshipEnd::End2);
        assert!(!ctx.related_is_source());
        assert_eq!(summary.label(), "Asset m1");
    }

    #[test]
    fn test_related_source() {
        let registry = PropertiesRegistry::new();
        let rel = RawRelationshipRecord::new("r1", "CollectionMembership", "c1", "m1");
        let collection = RawElementRecord::new("c1", "Collection", json!({}));
        let summary = RelatedElementSummary::related("m1", &rel, Some(&collection), &registry).unwrap();
        assert!(summary.relationship_context.unwrap().related_is_source());
    }

    #[test]
    fn test_relationship_not_touching_start() {
        let registry = PropertiesRegistry::new();
        let rel = RawRelationshipRecord::new("r1", "CollectionMembership", "c1", "m1");
        let err = RelatedElementSummary::related("zz", &rel, Some(&member("m1")), &registry).unwrap_err();
        assert!(matches!(err, MetaviewError::RelationshipIntegrity { .. }));
    }

    #[test]
    fn test_missing_far_end() {
        let registry = PropertiesRegistry::new();
        let rel = RawRelationshipRecord::new("r1", "CollectionMembership", "c1", "m1");
        let err = RelatedElementSummary::related("c1", &rel, None, &registry).unwrap_err();
        assert!(err.to_string().contains("not resolvable"));
    }

    #[test]
    fn test_far_end_mismatch() {
        let registry = PropertiesRegistry::new();
        let rel = RawRelationshipRecord::new("r1", "CollectionMembership", "c1", "m1");
        let err = RelatedElementSummary::related("c1", &rel, Some(&member("m2")), &registry).unwrap_err();
        assert!(matches!(err, MetaviewError::RelationshipIntegrity { .. }));
    }

    #[test]
    fn test_equality_needs_both_identities() {
        let registry = PropertiesRegistry::new();
        let r1 = RawRelationshipRecord::new("r1", "CollectionMembership", "c1", "m1");
        let r2 = RawRelationshipRecord::new("r2", "CollectionMembership", "c2", "m1");
        let a = RelatedElementSummary::related("c1", &r1, Some(&member("m1")), &registry).unwrap();
        let b = RelatedElementSummary::related("c2", &r2, Some(&member("m1")), &registry).unwrap();
        let a_again = RelatedElementSummary::related("c1", &r1, Some(&member("m1")), &registry).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a_again);

        let direct = RelatedElementSummary::direct(&member("m1"), &registry).unwrap();
        assert!(direct.relationship_context.is_none());
        assert_ne!(direct, a);
    }

    #[test]
    fn test_relationship_properties() {
        let props = RelationshipProperties::from_value(
            "r1",
            &json!({"effectiveFrom": "2024-03-01T00:00:00Z", "confidence": 80, "expectedUsage": "daily"}),
        )
        .unwrap();
        assert_eq!(props.confidence, Some(80));
        assert!(props.effective_from.is_some());
        assert_eq!(props.additional.get("expectedUsage"), Some(&json!("daily")));
    }

    #[test]
    fn test_unrecognized_label() {
        let registry = PropertiesRegistry::new();
        let record = RawElementRecord::new("g9", "QuantumLedger", json!({}));
        let summary = RelatedElementSummary::direct(&record, &registry).unwrap();
        assert_eq!(summary.label(), "QuantumLedger (unrecognized)");
    }

    #[test]
    fn test_context_wire_name() {
        let ctx = RelationshipContext::new(
            RelationshipHeader::new("r1", "T", "a", "b"),
            RelationshipProperties::default(),
            "a",
        )
        .unwrap();
        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(value["startingElementGUID"], json!("a"));
        assert_eq!(value["relatedEnd"], json!("end2"));
    }
}
