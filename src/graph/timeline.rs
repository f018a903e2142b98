//! Project timeline derived from an assembled project hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::node::{AssembledGraph, GraphNode};
use crate::model::properties::ElementProperties;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub guid: String,
    pub name: String,
    pub depth: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
}

/// Dated projects in hierarchy pre-order, plus the ones without a start date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectTimeline {
    pub root_guid: String,
    pub entries: Vec<TimelineEntry>,
    pub undated: Vec<TimelineEntry>,
}

impl ProjectTimeline {
    /// Walk the primary children of `graph`; stubs and non-project nodes are skipped,
    /// but their expanded descendants are still visited.
    pub fn from_graph(graph: &AssembledGraph) -> Self {
        let mut timeline = ProjectTimeline {
            root_guid: graph.root.guid().to_string(),
            ..Default::default()
        };
        collect(&graph.root, 0, None, &mut timeline);
        timeline
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.undated.is_empty()
    }

    /// Earliest start and latest planned end over the dated entries.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.entries.iter().filter_map(|e| e.start).min()?;
        let end = self
            .entries
            .iter()
            .filter_map(|e| e.planned_end.or(e.start))
            .max()
            .unwrap_or(start);
        Some((start, end))
    }
}

fn collect(node: &GraphNode, depth: usize, parent: Option<&str>, timeline: &mut ProjectTimeline) {
    if node.is_stub() {
        return;
    }
    if let ElementProperties::Project(project) = &node.element.properties {
        let entry = TimelineEntry {
            guid: node.guid().to_string(),
            name: node.element.label(),
            depth,
            parent_guid: parent.map(str::to_string),
            start: project.start_date,
            planned_end: project.planned_end_date,
            status: project.project_status.clone(),
            health: project.project_health.clone(),
        };
        if entry.start.is_some() {
            timeline.entries.push(entry);
        } else {
            timeline.undated.push(entry);
        }
    }
    for child in &node.children {
        collect(child, depth + 1, Some(node.guid()), timeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{build_graph, ExpansionPolicy, GraphAssembler, ViewPreset};
    use crate::repository::InMemoryRepository;
    use serde_json::json;
    use std::sync::Arc;

    fn projects() -> InMemoryRepository {
        InMemoryRepository::new()
            .with_element(
                "p0",
                "Project",
                json!({"displayName": "Migration", "startDate": "2025-01-06T00:00:00Z",
                       "plannedEndDate": "2025-06-30T00:00:00Z", "projectStatus": "ACTIVE"}),
            )
            .with_element(
                "p1",
                "Task",
                json!({"displayName": "Inventory", "startDate": "2025-01-06T00:00:00Z",
                       "plannedEndDate": "2025-02-14T00:00:00Z"}),
            )
            .with_element("p2", "Campaign", json!({"displayName": "Comms"}))
            .with_element("a1", "Asset", json!({}))
            .with_relationship("h1", "ProjectHierarchy", "p0", "p1")
            .with_relationship("h2", "ProjectHierarchy", "p0", "p2")
            .with_relationship("h3", "ProjectHierarchy", "p0", "a1")
            .with_relationship("d1", "ProjectDependency", "p2", "p1")
    }

    #[tokio::test]
    async fn test_timeline_from_hierarchy() {
        let assembler = GraphAssembler::new(Arc::new(projects()));
        let graph = build_graph(&assembler, "p0", ViewPreset::ProjectHierarchy.groups(), 3, ExpansionPolicy::DagWithSharing)
            .await
            .unwrap();
        let timeline = ProjectTimeline::from_graph(&graph);

        let dated: Vec<&str> = timeline.entries.iter().map(|e| e.guid.as_str()).collect();
        assert_eq!(dated, vec!["p0", "p1"]);
        assert_eq!(timeline.entries[1].depth, 1);
        assert_eq!(timeline.entries[1].parent_guid.as_deref(), Some("p0"));
        assert_eq!(timeline.undated.len(), 1);
        assert_eq!(timeline.undated[0].name, "Comms");

        let (start, end) = timeline.span().unwrap();
        assert_eq!(start.to_rfc3339(), "2025-01-06T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2025-06-30T00:00:00+00:00");
    }

    #[test]
    fn test_empty_timeline() {
        let timeline = ProjectTimeline::default();
        assert!(timeline.is_empty());
        assert!(timeline.span().is_none());
    }
}
