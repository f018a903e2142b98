use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{MetadataRepository, PageRequest, RawElementRecord, RawRelationshipRecord, RelatedRecord, TraversalDirection};
use crate::error::{MetaviewError, Result};

/// Injected behaviour for relationship fetches of one element.
#[derive(Debug, Clone)]
pub enum FailureMode {
    /// Fail with a transient repository error
    Transient(String),
    /// Behave as if the element vanished
    NotFound,
    /// Answer, but only after this delay
    Delay(Duration),
}

/// In-memory repository for tests, demos and embedding callers.
///
/// Relationships are returned in insertion order. Fault injection, latency and
/// page overlap make it possible to exercise partial-failure and pagination paths.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    elements: HashMap<String, RawElementRecord>,
    relationships: Vec<RawRelationshipRecord>,
    failures: HashMap<String, FailureMode>,
    latency: Option<Duration>,
    overlap_pages: bool,
    ignore_type_filter: bool,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    relationship_calls: AtomicUsize,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_element(mut self, guid: &str, type_name: &str, properties: Value) -> Self {
        self.elements
            .insert(guid.to_string(), RawElementRecord::new(guid, type_name, properties));
        self
    }

    /// Store a record under `key` as-is, even if it is malformed.
    pub fn with_element_record(mut self, key: &str, record: RawElementRecord) -> Self {
        self.elements.insert(key.to_string(), record);
        self
    }

    pub fn with_relationship(mut self, guid: &str, type_name: &str, end1: &str, end2: &str) -> Self {
        self.relationships
            .push(RawRelationshipRecord::new(guid, type_name, end1, end2));
        self
    }

    pub fn with_relationship_record(mut self, record: RawRelationshipRecord) -> Self {
        self.relationships.push(record);
        self
    }

    pub fn with_failure(mut self, guid: &str, mode: FailureMode) -> Self {
        self.failures.insert(guid.to_string(), mode);
        self
    }

    /// Delay every relationship fetch.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Repeat the last record of the previous page at the start of each page.
    pub fn with_overlapping_pages(mut self) -> Self {
        self.overlap_pages = true;
        self
    }

    /// Return relationships of every type, whatever the caller asked for.
    pub fn ignoring_type_filter(mut self) -> Self {
        self.ignore_type_filter = true;
        self
    }

    /// Highest number of relationship fetches that were running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn relationship_calls(&self) -> usize {
        self.relationship_calls.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataRepository for InMemoryRepository {
    async fn get_element(&self, guid: &str) -> Result<RawElementRecord> {
        if let Some(FailureMode::NotFound) = self.failures.get(guid) {
            return Err(MetaviewError::NotFound(guid.to_string()));
        }
        self.elements
            .get(guid)
            .cloned()
            .ok_or_else(|| MetaviewError::NotFound(guid.to_string()))
    }

    async fn get_relationships(
        &self,
        guid: &str,
        relationship_types: &[String],
        direction: TraversalDirection,
        page: PageRequest,
    ) -> Result<Vec<RelatedRecord>> {
        self.relationship_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.failures.get(guid) {
            Some(FailureMode::Transient(message)) => {
                return Err(MetaviewError::Repository(message.clone()))
            }
            Some(FailureMode::NotFound) => return Err(MetaviewError::NotFound(guid.to_string())),
            Some(FailureMode::Delay(delay)) => tokio::time::sleep(*delay).await,
            None => {}
        }

        if !self.elements.contains_key(guid) {
            return Err(MetaviewError::NotFound(guid.to_string()));
        }

        let matching: Vec<&RawRelationshipRecord> = self
            .relationships
            .iter()
            .filter(|r| r.matches(guid, direction))
            .filter(|r| {
                self.ignore_type_filter
                    || r.type_name
                        .as_ref()
                        .map(|t| relationship_types.contains(t))
                        .unwrap_or(false)
            })
            .collect();

        let mut selected: Vec<&RawRelationshipRecord> = Vec::new();
        if self.overlap_pages && page.start_from > 0 {
            if let Some(previous) = matching.get(page.start_from - 1) {
                selected.push(previous);
            }
        }
        selected.extend(matching.iter().skip(page.start_from).take(page.page_size));

        Ok(selected
            .into_iter()
            .map(|r| RelatedRecord {
                relationship: r.clone(),
                element: r.far_end(guid).and_then(|g| self.elements.get(g)).cloned(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repo() -> InMemoryRepository {
        InMemoryRepository::new()
            .with_element("c1", "Collection", json!({}))
            .with_element("m1", "Asset", json!({}))
            .with_element("m2", "Asset", json!({}))
            .with_element("m3", "Asset", json!({}))
            .with_relationship("r1", "CollectionMembership", "c1", "m1")
            .with_relationship("r2", "CollectionMembership", "c1", "m2")
            .with_relationship("r3", "CollectionMembership", "c1", "m3")
            .with_relationship("r4", "ResourceList", "c1", "m1")
    }

    fn types(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_filter_and_order() {
        let repo = repo();
        let page = repo
            .get_relationships("c1", &types(&["CollectionMembership"]), TraversalDirection::Outgoing, PageRequest::first(10))
            .await
            .unwrap();
        let guids: Vec<_> = page.iter().map(|r| r.relationship.guid.clone().unwrap()).collect();
        assert_eq!(guids, vec!["r1", "r2", "r3"]);
        assert_eq!(page[0].element.as_ref().unwrap().guid.as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn test_paging() {
        let repo = repo();
        let t = types(&["CollectionMembership"]);
        let first = repo
            .get_relationships("c1", &t, TraversalDirection::Outgoing, PageRequest::first(2))
            .await
            .unwrap();
        let second = repo
            .get_relationships("c1", &t, TraversalDirection::Outgoing, PageRequest::first(2).next())
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert_eq!(repo.relationship_calls(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_pages() {
        let repo = repo().with_overlapping_pages();
        let t = types(&["CollectionMembership"]);
        let second = repo
            .get_relationships("c1", &t, TraversalDirection::Outgoing, PageRequest::first(2).next())
            .await
            .unwrap();
        let guids: Vec<_> = second.iter().map(|r| r.relationship.guid.clone().unwrap()).collect();
        assert_eq!(guids, vec!["r2", "r3"]);
    }

    #[tokio::test]
    async fn test_incoming_direction() {
        let repo = repo();
        let page = repo
            .get_relationships("m2", &types(&["CollectionMembership"]), TraversalDirection::Incoming, PageRequest::first(10))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].element.as_ref().unwrap().guid.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let repo = repo().with_failure("m1", FailureMode::Transient("connection reset".into()));
        let err = repo
            .get_relationships("m1", &types(&["CollectionMembership"]), TraversalDirection::Both, PageRequest::first(10))
            .await
            .unwrap_err();
        assert!(matches!(err, MetaviewError::Repository(_)));
        assert!(matches!(repo.get_element("nope").await, Err(MetaviewError::NotFound(_))));
    }
}
