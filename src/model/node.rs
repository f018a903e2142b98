//! Assembled tree/graph nodes and the result envelope.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{MetaviewError, Result};
use crate::model::properties::PropertiesRegistry;
use crate::model::relationship::RelatedElementSummary;

/// How a node came to be in the structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeMarker {
    /// Expanded (or a frontier leaf at the depth limit)
    #[default]
    Expanded,
    /// Already on the root-to-node path; never expanded again
    VisitedStub,
    /// Already expanded elsewhere in the structure; back-reference only
    SharedStub,
}

impl NodeMarker {
    pub fn is_stub(&self) -> bool {
        !matches!(self, NodeMarker::Expanded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    MalformedRecord,
    NotFound,
    RelationshipIntegrity,
    FetchFailed,
    Timeout,
    Cancelled,
}

/// A branch-local failure captured on the node it affected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeIssue {
    pub kind: IssueKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_guid: Option<String>,
}

impl NodeIssue {
    pub fn from_error(err: &MetaviewError, relationship_guid: Option<&str>) -> Self {
        let kind = match err {
            MetaviewError::MalformedRecord(_) => IssueKind::MalformedRecord,
            MetaviewError::NotFound(_) => IssueKind::NotFound,
            MetaviewError::RelationshipIntegrity { .. } => IssueKind::RelationshipIntegrity,
            MetaviewError::Timeout { .. } => IssueKind::Timeout,
            _ => IssueKind::FetchFailed,
        };
        let relationship_guid = match err {
            MetaviewError::RelationshipIntegrity {
                relationship_guid, ..
            } => Some(relationship_guid.clone()),
            _ => relationship_guid.map(str::to_string),
        };
        Self {
            kind,
            message: err.to_string(),
            relationship_guid,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: IssueKind::Cancelled,
            message: "expansion cancelled before this level".to_string(),
            relationship_guid: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeStatus {
    pub marker: NodeMarker,
    /// Frontier node with unexplored relationships beyond the depth limit
    pub depth_exceeded: bool,
    /// This branch could not be (fully) expanded
    pub partial: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<NodeIssue>,
}

/// One node of an assembled hierarchy or graph.
///
/// `children` holds the primary relationship group; each secondary group
/// lands in `links` under its group name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    #[serde(flatten)]
    pub element: RelatedElementSummary,
    #[serde(default)]
    pub children: Vec<GraphNode>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, Vec<GraphNode>>,
    #[serde(default)]
    pub status: NodeStatus,
}

impl GraphNode {
    pub fn new(element: RelatedElementSummary) -> Self {
        Self {
            element,
            children: Vec::new(),
            links: BTreeMap::new(),
            status: NodeStatus::default(),
        }
    }

    pub fn guid(&self) -> &str {
        self.element.guid()
    }

    pub fn is_stub(&self) -> bool {
        self.status.marker.is_stub()
    }

    /// Children first, then link groups in name order.
    pub fn edges(&self) -> impl Iterator<Item = (Option<&str>, &GraphNode)> {
        self.children.iter().map(|c| (None, c)).chain(
            self.links
                .iter()
                .flat_map(|(name, nodes)| nodes.iter().map(move |n| (Some(name.as_str()), n))),
        )
    }

    /// Pre-order walk over this node and every descendant.
    pub fn iter(&self) -> NodeIter<'_> {
        NodeIter { stack: vec![self] }
    }

    /// First expanded (non-stub) node with this guid, in pre-order.
    pub fn find(&self, guid: &str) -> Option<&GraphNode> {
        self.iter().find(|n| n.guid() == guid && !n.is_stub())
    }

    /// Every root-to-leaf path as guid lists.
    pub fn paths(&self) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        collect_paths(self, &mut path, &mut out);
        out
    }

    /// Check every variant against its header type name.
    pub fn validate(&self, registry: &PropertiesRegistry) -> Result<()> {
        for node in self.iter() {
            registry.validate(&node.element.header, &node.element.properties)?;
        }
        Ok(())
    }
}

fn collect_paths(node: &GraphNode, path: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
    path.push(node.guid().to_string());
    let mut leaf = true;
    for (_, child) in node.edges() {
        leaf = false;
        collect_paths(child, path, out);
    }
    if leaf {
        out.push(path.clone());
    }
    path.pop();
}

pub struct NodeIter<'a> {
    stack: Vec<&'a GraphNode>,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = &'a GraphNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        let edges: Vec<&GraphNode> = node.edges().map(|(_, n)| n).collect();
        self.stack.extend(edges.into_iter().rev());
        Some(node)
    }
}

/// Whether the caller got everything that was asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum Completeness {
    Complete,
    #[serde(rename_all = "camelCase")]
    Partial { failed_branches: usize },
    #[serde(rename_all = "camelCase")]
    Cancelled {
        completed_levels: usize,
        failed_branches: usize,
    },
}

impl Completeness {
    pub fn is_complete(&self) -> bool {
        matches!(self, Completeness::Complete)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssemblyStats {
    pub levels: usize,
    pub fetches: usize,
    pub nodes: usize,
    pub stubs: usize,
    pub skipped_edges: usize,
}

/// Result of one assembly: the tree plus how complete it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledGraph {
    pub root: GraphNode,
    pub policy: crate::graph::ExpansionPolicy,
    pub max_depth: usize,
    pub primary_group: String,
    pub completeness: Completeness,
    #[serde(default)]
    pub stats: AssemblyStats,
}

impl AssembledGraph {
    /// True when any branch failed or the traversal was cancelled.
    pub fn partial_result_warning(&self) -> bool {
        !self.completeness.is_complete()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Read the wire shape back, rejecting variant/type-name mismatches.
    pub fn from_json(text: &str, registry: &PropertiesRegistry) -> Result<Self> {
        let graph: AssembledGraph = serde_json::from_str(text)?;
        graph.root.validate(registry)?;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RawElementRecord;
    use serde_json::json;

    fn node(guid: &str) -> GraphNode {
        let registry = PropertiesRegistry::new();
        let record = RawElementRecord::new(guid, "Collection", json!({"displayName": guid}));
        GraphNode::new(RelatedElementSummary::direct(&record, &registry).unwrap())
    }

    #[test]
    fn test_preorder_iteration() {
        let mut root = node("a");
        let mut b = node("b");
        b.children.push(node("c"));
        root.children.push(b);
        root.links.insert("links".to_string(), vec![node("d")]);

        let order: Vec<&str> = root.iter().map(|n| n.guid()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        assert_eq!(root.paths(), vec![vec!["a", "b", "c"], vec!["a", "d"]]);
    }

    #[test]
    fn test_find_skips_stubs() {
        let mut root = node("a");
        let mut stub = node("b");
        stub.status.marker = NodeMarker::SharedStub;
        root.children.push(stub);
        assert!(root.find("b").is_none());
        assert!(root.find("a").is_some());
    }

    #[test]
    fn test_issue_from_error() {
        let issue = NodeIssue::from_error(
            &MetaviewError::integrity("r7", "far end missing"),
            None,
        );
        assert_eq!(issue.kind, IssueKind::RelationshipIntegrity);
        assert_eq!(issue.relationship_guid.as_deref(), Some("r7"));

        let issue = NodeIssue::from_error(&MetaviewError::Repository("503".into()), None);
        assert_eq!(issue.kind, IssueKind::FetchFailed);
    }

    #[test]
    fn test_wire_shape() {
        let mut root = node("a");
        root.children.push(node("b"));
        let value = serde_json::to_value(&root).unwrap();
        assert!(value.get("header").is_some());
        assert!(value.get("properties").is_some());
        assert!(value.get("relationshipContext").is_none());
        assert_eq!(value["children"][0]["header"]["guid"], json!("b"));
        assert!(value.get("links").is_none());
    }

    #[test]
    fn test_wire_tolerates_unknown_fields() {
        let text = r#"{
            "header": {"guid": "a", "typeName": "Collection", "futureHeaderField": 1},
            "properties": {"kind": "collection", "displayName": "A"},
            "children": [],
            "renderHints": {"colour": "blue"}
        }"#;
        let parsed: GraphNode = serde_json::from_str(text).unwrap();
        assert_eq!(parsed.guid(), "a");
        assert_eq!(parsed.status, NodeStatus::default());
    }

    #[test]
    fn test_completeness_wire() {
        let value = serde_json::to_value(Completeness::Partial { failed_branches: 2 }).unwrap();
        assert_eq!(value, json!({"state": "partial", "failedBranches": 2}));
    }
}
