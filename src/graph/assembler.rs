//! Level-by-level graph assembly over a [`MetadataRepository`].

use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use super::{AssemblyOptions, AssemblyRequest, CancelSignal, ExpansionPolicy, RelationshipGroup};
use crate::error::{MetaviewError, Result};
use crate::model::node::{AssembledGraph, AssemblyStats, Completeness, GraphNode, NodeIssue, NodeMarker, NodeStatus};
use crate::model::properties::{ElementKind, PropertiesRegistry};
use crate::model::relationship::RelatedElementSummary;
use crate::repository::{MetadataRepository, PageRequest, RelatedRecord};

/// Builds bounded structures rooted at one element.
///
/// Each call owns its arena and visited set; nothing is shared between calls.
#[derive(Clone)]
pub struct GraphAssembler {
    repository: Arc<dyn MetadataRepository>,
    registry: Arc<PropertiesRegistry>,
    options: AssemblyOptions,
}

/// Relationships of one group, deduplicated, in repository order.
pub(crate) struct GroupFetch {
    pub records: Vec<RelatedRecord>,
    /// Returned by the repository but outside the group's types
    pub ignored: usize,
}

struct NodeFetch {
    edges: Vec<(usize, RelatedRecord)>,
    ignored: usize,
}

struct Slot {
    summary: RelatedElementSummary,
    status: NodeStatus,
    parent: Option<usize>,
    /// Group of the edge that reached this slot
    group: usize,
    depth: usize,
    /// (group index, slot index) in attach order
    edges: Vec<(usize, usize)>,
}

/// Mutable state of one assembly; only the single writer touches it.
struct Walk<'a> {
    request: &'a AssemblyRequest,
    registry: &'a PropertiesRegistry,
    root_kind: ElementKind,
    slots: Vec<Slot>,
    expanded: HashSet<String>,
    frontier_leaves: Vec<usize>,
    failed_branches: usize,
    stats: AssemblyStats,
    trace: Uuid,
}

impl<'a> Walk<'a> {
    fn new(request: &'a AssemblyRequest, registry: &'a PropertiesRegistry, root: RelatedElementSummary, trace: Uuid) -> Self {
        let root_kind = root.properties.kind();
        let mut expanded = HashSet::new();
        expanded.insert(root.guid().to_string());
        Self {
            request,
            registry,
            root_kind,
            slots: vec![Slot {
                summary: root,
                status: NodeStatus::default(),
                parent: None,
                group: 0,
                depth: 0,
                edges: Vec::new(),
            }],
            expanded,
            frontier_leaves: Vec::new(),
            failed_branches: 0,
            stats: AssemblyStats::default(),
            trace,
        }
    }

    fn guid(&self, idx: usize) -> &str {
        self.slots[idx].summary.guid()
    }

    fn on_path(&self, idx: usize, guid: &str) -> bool {
        let mut cursor = Some(idx);
        while let Some(i) = cursor {
            if self.guid(i) == guid {
                return true;
            }
            cursor = self.slots[i].parent;
        }
        false
    }

    fn fail(&mut self, idx: usize, err: &MetaviewError) {
        log::warn!("[{}] branch {} failed: {}", self.trace, self.guid(idx), err);
        let status = &mut self.slots[idx].status;
        status.partial = true;
        status.issues.push(NodeIssue::from_error(err, None));
        self.failed_branches += 1;
    }

    /// Attach fetched edges under `idx`; returns the new slots to expand next.
    fn attach(&mut self, idx: usize, fetch: NodeFetch) -> Vec<usize> {
        let request = self.request;
        let registry = self.registry;
        let parent_guid = self.guid(idx).to_string();
        let depth = self.slots[idx].depth + 1;
        self.stats.skipped_edges += fetch.ignored;

        let mut next = Vec::new();
        for (group_idx, record) in fetch.edges {
            let group = &request.groups[group_idx];
            let summary = match RelatedElementSummary::related(
                &parent_guid,
                &record.relationship,
                record.element.as_ref(),
                registry,
            ) {
                Ok(summary) => summary,
                Err(err) => {
                    log::warn!("[{}] skipping edge of {}: {}", self.trace, parent_guid, err);
                    let issue = NodeIssue::from_error(&err, record.relationship.guid.as_deref());
                    self.slots[idx].status.issues.push(issue);
                    self.stats.skipped_edges += 1;
                    continue;
                }
            };

            if group.same_kind_only && summary.properties.kind() != self.root_kind {
                log::debug!(
                    "[{}] {} is {} not {}, left out of {}",
                    self.trace,
                    summary.header,
                    summary.properties.kind(),
                    self.root_kind,
                    group.name
                );
                self.stats.skipped_edges += 1;
                continue;
            }

            let guid = summary.guid().to_string();
            let marker = if self.on_path(idx, &guid) {
                NodeMarker::VisitedStub
            } else if request.policy == ExpansionPolicy::DagWithSharing && self.expanded.contains(&guid) {
                NodeMarker::SharedStub
            } else {
                NodeMarker::Expanded
            };

            let child = self.slots.len();
            self.slots.push(Slot {
                summary,
                status: NodeStatus {
                    marker,
                    ..NodeStatus::default()
                },
                parent: Some(idx),
                group: group_idx,
                depth,
                edges: Vec::new(),
            });
            self.slots[idx].edges.push((group_idx, child));

            if marker.is_stub() {
                self.stats.stubs += 1;
            } else {
                self.expanded.insert(guid);
                if depth < request.max_depth {
                    next.push(child);
                } else {
                    self.frontier_leaves.push(child);
                }
            }
        }
        next
    }

    fn ancestors(&self, idx: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cursor = self.slots[idx].parent;
        while let Some(i) = cursor {
            out.push(i);
            cursor = self.slots[i].parent;
        }
        out
    }

    /// `idx` and everything below it.
    fn subtree(&self, idx: usize) -> Vec<usize> {
        let mut out = vec![idx];
        let mut i = 0;
        while i < out.len() {
            out.extend(self.slots[out[i]].edges.iter().map(|&(_, child)| child));
            i += 1;
        }
        out
    }

    fn on_primary_path(&self, idx: usize) -> bool {
        let mut cursor = Some(idx);
        while let Some(i) = cursor {
            if self.slots[i].group != 0 {
                return false;
            }
            cursor = self.slots[i].parent;
        }
        true
    }

    /// Under sharing, hand each expansion to its deepest occurrence in the primary group.
    ///
    /// Breadth-first order expands the shallowest occurrence first. A primary
    /// path that meets the same element further down takes the subtree over
    /// when it still fits the depth bound and no path repeats an element.
    fn settle_shared(&mut self) {
        if self.request.policy != ExpansionPolicy::DagWithSharing {
            return;
        }
        let mut expanded_at = Vec::new();
        let mut stubs: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, slot) in self.slots.iter().enumerate().skip(1) {
            match slot.status.marker {
                NodeMarker::Expanded => expanded_at.push(idx),
                NodeMarker::SharedStub => stubs.entry(slot.summary.guid().to_string()).or_default().push(idx),
                NodeMarker::VisitedStub => {}
            }
        }

        for from in expanded_at {
            let Some(candidates) = stubs.get(self.guid(from)) else {
                continue;
            };
            let deepest = candidates
                .iter()
                .copied()
                .filter(|&idx| self.on_primary_path(idx))
                .fold(None, |best: Option<usize>, idx| match best {
                    Some(b) if self.slots[b].depth >= self.slots[idx].depth => Some(b),
                    _ => Some(idx),
                });
            if let Some(to) = deepest {
                if self.can_move(from, to) {
                    self.move_expansion(from, to);
                }
            }
        }
    }

    fn can_move(&self, from: usize, to: usize) -> bool {
        let (from_depth, to_depth) = (self.slots[from].depth, self.slots[to].depth);
        if to_depth <= from_depth {
            return false;
        }
        let subtree = self.subtree(from);
        let height = subtree
            .iter()
            .map(|&i| self.slots[i].depth - from_depth)
            .max()
            .unwrap_or(0);
        if to_depth + height > self.request.max_depth {
            return false;
        }

        let outer: HashSet<&str> = self.ancestors(to).into_iter().map(|i| self.guid(i)).collect();
        // Visited stubs below `from` must still find their ancestor.
        let keeps_ancestors = self.ancestors(from).into_iter().all(|i| outer.contains(self.guid(i)));
        keeps_ancestors
            && subtree
                .iter()
                .all(|&i| self.slots[i].status.marker == NodeMarker::VisitedStub || !outer.contains(self.guid(i)))
    }

    fn move_expansion(&mut self, from: usize, to: usize) {
        let delta = self.slots[to].depth - self.slots[from].depth;
        for idx in self.subtree(from).into_iter().skip(1) {
            self.slots[idx].depth += delta;
        }
        let edges = std::mem::take(&mut self.slots[from].edges);
        for &(_, child) in &edges {
            self.slots[child].parent = Some(to);
        }
        let status = std::mem::replace(
            &mut self.slots[from].status,
            NodeStatus {
                marker: NodeMarker::SharedStub,
                ..NodeStatus::default()
            },
        );
        self.slots[to].status = NodeStatus {
            marker: NodeMarker::Expanded,
            ..status
        };
        self.slots[to].edges = edges;
        log::debug!(
            "[{}] {} expanded at depth {} instead of {}",
            self.trace,
            self.guid(to),
            self.slots[to].depth,
            self.slots[from].depth
        );
    }

    /// Turn the arena into nested nodes.
    fn into_tree(self) -> Result<(GraphNode, AssemblyStats, usize)> {
        let Walk {
            request,
            slots,
            mut stats,
            failed_branches,
            ..
        } = self;
        stats.nodes = slots.len();

        let mut slots: Vec<Option<Slot>> = slots.into_iter().map(Some).collect();
        let root = build_node(&mut slots, 0, &request.groups)
            .ok_or_else(|| MetaviewError::InvalidInput("assembly produced no root".to_string()))?;
        Ok((root, stats, failed_branches))
    }
}

fn build_node(slots: &mut [Option<Slot>], idx: usize, groups: &[RelationshipGroup]) -> Option<GraphNode> {
    let slot = slots.get_mut(idx)?.take()?;
    let mut node = GraphNode::new(slot.summary);
    node.status = slot.status;
    for (group_idx, child_idx) in slot.edges {
        let Some(child) = build_node(slots, child_idx, groups) else {
            continue;
        };
        if group_idx == 0 {
            node.children.push(child);
        } else {
            node.links.entry(groups[group_idx].name.clone()).or_default().push(child);
        }
    }
    Some(node)
}

impl GraphAssembler {
    pub fn new(repository: Arc<dyn MetadataRepository>) -> Self {
        Self {
            repository,
            registry: Arc::new(PropertiesRegistry::new()),
            options: AssemblyOptions::default(),
        }
    }

    pub fn with_registry(mut self, registry: PropertiesRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_options(mut self, options: AssemblyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &AssemblyOptions {
        &self.options
    }

    pub fn registry(&self) -> &PropertiesRegistry {
        &self.registry
    }

    pub async fn assemble(&self, request: &AssemblyRequest) -> Result<AssembledGraph> {
        self.assemble_with_cancel(request, &CancelSignal::none()).await
    }

    /// Assemble, checking `cancel` before each level.
    ///
    /// Root failures and invalid requests are errors; everything below the
    /// root degrades to node issues and a partial result.
    pub async fn assemble_with_cancel(&self, request: &AssemblyRequest, cancel: &CancelSignal) -> Result<AssembledGraph> {
        request.validate(&self.options)?;
        let trace = Uuid::new_v4();
        log::debug!(
            "[{}] assembling {} depth={} policy={} groups={}",
            trace,
            request.root_guid,
            request.max_depth,
            request.policy,
            request.groups.len()
        );

        let root = self.fetch_summary(&request.root_guid).await?;
        let mut walk = Walk::new(request, &self.registry, root, trace);
        let limit = self.options.concurrency_limit.max(1);

        let mut frontier = vec![0usize];
        let mut levels = 0;
        let mut cancelled = false;

        while !frontier.is_empty() {
            if cancel.is_cancelled() {
                log::info!("[{}] cancelled after {} levels, {} nodes left unexpanded", trace, levels, frontier.len());
                for &idx in &frontier {
                    let status = &mut walk.slots[idx].status;
                    status.partial = true;
                    status.issues.push(NodeIssue::cancelled());
                }
                cancelled = true;
                break;
            }

            log::debug!("[{}] level {}: fetching {} nodes", trace, levels, frontier.len());
            let guids: Vec<String> = frontier.iter().map(|&i| walk.guid(i).to_string()).collect();
            let results: Vec<Result<NodeFetch>> = stream::iter(guids)
                .map(|guid| self.fetch_node(guid, &request.groups))
                .buffered(limit)
                .collect()
                .await;
            walk.stats.fetches += results.len();

            let mut next = Vec::new();
            for (&idx, result) in frontier.iter().zip(results) {
                match result {
                    Ok(fetch) => next.extend(walk.attach(idx, fetch)),
                    Err(err) if idx == 0 => return Err(err),
                    Err(err) => walk.fail(idx, &err),
                }
            }
            levels += 1;
            frontier = next;
        }
        walk.stats.levels = levels;

        if !cancelled && self.options.probe_frontier && !walk.frontier_leaves.is_empty() {
            self.probe_frontier(&mut walk, limit).await;
        }
        if !cancelled {
            walk.settle_shared();
        }

        let (root, stats, failed_branches) = walk.into_tree()?;
        let completeness = if cancelled {
            Completeness::Cancelled {
                completed_levels: levels,
                failed_branches,
            }
        } else if failed_branches > 0 {
            Completeness::Partial { failed_branches }
        } else {
            Completeness::Complete
        };

        log::info!(
            "[{}] assembled {}: {} nodes, {} stubs, {} levels, {} fetches, {:?}",
            trace,
            request.root_guid,
            stats.nodes,
            stats.stubs,
            stats.levels,
            stats.fetches,
            completeness
        );

        Ok(AssembledGraph {
            root,
            policy: request.policy,
            max_depth: request.max_depth,
            primary_group: request.groups[0].name.clone(),
            completeness,
            stats,
        })
    }

    /// Flag frontier leaves that have relationships beyond the one that reached them.
    async fn probe_frontier(&self, walk: &mut Walk<'_>, limit: usize) {
        let request = walk.request;
        let groups = &request.groups;
        let targets: Vec<(usize, String, Option<String>)> = walk
            .frontier_leaves
            .iter()
            .map(|&idx| {
                let summary = &walk.slots[idx].summary;
                (idx, summary.guid().to_string(), summary.relationship_guid().map(str::to_string))
            })
            .collect();

        let results: Vec<Result<bool>> = stream::iter(targets.iter())
            .map(|(_, guid, reached_by)| self.probe(guid, reached_by.as_deref(), groups))
            .buffered(limit)
            .collect()
            .await;
        walk.stats.fetches += results.len();

        for ((idx, guid, _), result) in targets.iter().zip(results) {
            match result {
                Ok(more) => walk.slots[*idx].status.depth_exceeded = more,
                Err(err) => log::warn!("[{}] frontier probe for {} failed: {}", walk.trace, guid, err),
            }
        }
    }

    async fn probe(&self, guid: &str, reached_by: Option<&str>, groups: &[RelationshipGroup]) -> Result<bool> {
        self.timed(guid, async {
            for group in groups {
                let page = self
                    .repository
                    .get_relationships(guid, &group.relationship_types, group.direction, PageRequest::first(2))
                    .await?;
                let beyond = page.iter().any(|r| {
                    group.accepts(r.relationship.type_name.as_deref()) && r.relationship.guid.as_deref() != reached_by
                });
                if beyond {
                    return Ok(true);
                }
            }
            Ok(false)
        })
        .await
    }

    async fn fetch_node(&self, guid: String, groups: &[RelationshipGroup]) -> Result<NodeFetch> {
        self.timed(&guid, async {
            let mut taken: HashSet<String> = HashSet::new();
            let mut fetch = NodeFetch {
                edges: Vec::new(),
                ignored: 0,
            };
            for (group_idx, group) in groups.iter().enumerate() {
                let group_fetch = self.fetch_group(&guid, group).await?;
                fetch.ignored += group_fetch.ignored;
                for record in group_fetch.records {
                    if let Some(rel_guid) = &record.relationship.guid {
                        if !taken.insert(rel_guid.clone()) {
                            continue;
                        }
                    }
                    fetch.edges.push((group_idx, record));
                }
            }
            Ok(fetch)
        })
        .await
    }

    /// Read every page of one group, dropping repeated relationship guids.
    pub(crate) async fn fetch_group(&self, guid: &str, group: &RelationshipGroup) -> Result<GroupFetch> {
        let page_size = self.options.page_size.max(1);
        let mut page = PageRequest::first(page_size);
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = GroupFetch {
            records: Vec::new(),
            ignored: 0,
        };

        loop {
            let records = self
                .repository
                .get_relationships(guid, &group.relationship_types, group.direction, page)
                .await?;
            let returned = records.len();
            let mut fresh = 0;

            for record in records {
                if let Some(rel_guid) = &record.relationship.guid {
                    if !seen.insert(rel_guid.clone()) {
                        continue;
                    }
                }
                fresh += 1;
                if !group.accepts(record.relationship.type_name.as_deref()) {
                    out.ignored += 1;
                    continue;
                }
                out.records.push(record);
            }

            // A full page with nothing new means the repository is not advancing.
            if returned < page_size || fresh == 0 {
                break;
            }
            page = page.next();
        }
        Ok(out)
    }

    /// Fetch and resolve one element directly.
    pub(crate) async fn fetch_summary(&self, guid: &str) -> Result<RelatedElementSummary> {
        let record = self.timed(guid, self.repository.get_element(guid)).await?;
        RelatedElementSummary::direct(&record, &self.registry)
    }

    pub(crate) async fn timed<T, F>(&self, guid: &str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.options.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| MetaviewError::Timeout {
                guid: guid.to_string(),
                timeout_ms: limit.as_millis() as u64,
            })?,
            None => work.await,
        }
    }
}
