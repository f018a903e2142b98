//! Value types for elements, relationships and assembled structures.

pub mod header;
pub mod node;
pub mod properties;
pub mod relationship;

pub use header::{ElementClassification, ElementHeader, ElementOrigin, ElementVersions, RelationshipHeader};
pub use node::{
    AssembledGraph, AssemblyStats, Completeness, GraphNode, IssueKind, NodeIssue, NodeMarker, NodeStatus,
};
pub use properties::{resolve_properties, ElementKind, ElementProperties, PropertiesRegistry};
pub use relationship::{RelatedElementSummary, RelationshipContext, RelationshipEnd, RelationshipProperties};
