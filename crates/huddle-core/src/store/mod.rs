//! Client for the hosted document database.
//!
//! The backend stores hierarchical collections of JSON documents and
//! serves live queries. [`DocumentStore`] captures the slice of that
//! contract this client relies on: point writes, merges, conditional
//! creates, deletes, auto-id appends, and ordered change
//! subscriptions. [`rest::RestStore`] talks to the hosted service;
//! [`memory::MemoryStore`] implements the same contract in-process
//! and backs the test-suite.

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::errors::StoreError;

fn assert_segment(segment: &str) {
    debug_assert!(
        !segment.is_empty() && !segment.contains('/'),
        "path segment must be non-empty and slash-free: {segment:?}"
    );
}

/// Path to a collection, e.g. `rooms/ABCDE/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn root(name: &str) -> Self {
        assert_segment(name);
        Self(name.to_string())
    }

    pub fn doc(&self, id: &str) -> DocumentPath {
        assert_segment(id);
        DocumentPath(format!("{}/{id}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Path to a single document, e.g. `rooms/ABCDE/calls/room-call`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn collection(&self, name: &str) -> CollectionPath {
        assert_segment(name);
        CollectionPath(format!("{}/{name}", self.0))
    }

    /// The document id (last path segment).
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn parent(&self) -> Option<CollectionPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| CollectionPath(parent.to_string()))
    }

    pub(crate) fn from_raw(path: String) -> Self {
        Self(path)
    }
}

/// A document snapshot as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    /// Server-assigned creation timestamp. Collection subscriptions
    /// deliver documents ordered ascending by this field.
    pub create_time: DateTime<Utc>,
    pub fields: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One change notification from a live query.
#[derive(Debug, Clone)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub doc: Document,
}

/// Handle to a live query. Changes arrive on [`Subscription::next`];
/// dropping the handle is the unsubscription — there is no implicit
/// teardown beyond it.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<DocumentChange>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<DocumentChange>,
        task: Option<tokio::task::JoinHandle<()>>,
    ) -> Self {
        Self { rx, task }
    }

    /// Next change, or `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<DocumentChange> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The document-database operations this client depends on.
///
/// All write failures map to [`StoreError`] once, at the implementing
/// boundary. Callers log and surface them; nothing here retries.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read. `Ok(None)` when the document does not exist.
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError>;

    /// Full write: replaces the document, creating it if absent.
    async fn set(&self, path: &DocumentPath, fields: Value) -> Result<(), StoreError>;

    /// Create-if-absent. Fails with [`StoreError::AlreadyExists`] when
    /// the document is already present.
    async fn create(&self, path: &DocumentPath, fields: Value) -> Result<(), StoreError>;

    /// Partial update: merges top-level fields into an existing
    /// document. Fails with [`StoreError::NotFound`] when absent.
    async fn update(&self, path: &DocumentPath, fields: Value) -> Result<(), StoreError>;

    /// Delete. Deleting an absent document is a no-op.
    async fn delete(&self, path: &DocumentPath) -> Result<(), StoreError>;

    /// Append a document with a server-generated id; returns the id.
    async fn add(&self, collection: &CollectionPath, fields: Value) -> Result<String, StoreError>;

    /// Watch a single document. Emits Added when it (first) exists,
    /// Modified on every subsequent write, Removed on delete.
    async fn watch_document(&self, path: &DocumentPath) -> Subscription;

    /// Watch a collection ordered by creation time ascending. Replays
    /// every existing document as Added before live changes — there is
    /// no pagination and no backfill limit.
    async fn watch_collection(&self, collection: &CollectionPath) -> Subscription;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_compose() {
        let rooms = CollectionPath::root("rooms");
        let room = rooms.doc("ABCDE");
        assert_eq!(room.as_str(), "rooms/ABCDE");
        assert_eq!(room.id(), "ABCDE");

        let call = room.collection("calls").doc("room-call");
        assert_eq!(call.as_str(), "rooms/ABCDE/calls/room-call");
        assert_eq!(call.id(), "room-call");
    }

    #[test]
    fn document_parent_is_its_collection() {
        let msg = CollectionPath::root("rooms").doc("ABCDE").collection("messages").doc("m1");
        assert_eq!(msg.parent().unwrap().as_str(), "rooms/ABCDE/messages");
    }
}
