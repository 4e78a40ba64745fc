//! In-process [`DocumentStore`] with the same observable contract as
//! the hosted backend. Backs the test-suite and headless embedders.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{
    ChangeKind, CollectionPath, Document, DocumentChange, DocumentPath, DocumentStore,
    Subscription,
};
use crate::errors::StoreError;

#[derive(Debug, Clone)]
struct StoredDoc {
    fields: Value,
    create_time: chrono::DateTime<Utc>,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<String, StoredDoc>,
    doc_watchers: HashMap<String, Vec<mpsc::UnboundedSender<DocumentChange>>>,
    col_watchers: HashMap<String, Vec<mpsc::UnboundedSender<DocumentChange>>>,
    seq: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(path: &DocumentPath, doc: &StoredDoc) -> Document {
        Document {
            id: path.id().to_string(),
            create_time: doc.create_time,
            fields: doc.fields.clone(),
        }
    }

    fn notify(inner: &mut Inner, path: &DocumentPath, change: DocumentChange) {
        if let Some(watchers) = inner.doc_watchers.get_mut(path.as_str()) {
            watchers.retain(|tx| tx.send(change.clone()).is_ok());
        }
        if let Some(parent) = path.parent() {
            if let Some(watchers) = inner.col_watchers.get_mut(parent.as_str()) {
                watchers.retain(|tx| tx.send(change.clone()).is_ok());
            }
        }
    }

    fn require_object(fields: &Value) -> Result<(), StoreError> {
        if fields.is_object() {
            Ok(())
        } else {
            Err(StoreError::InvalidData("document fields must be an object".into()))
        }
    }

    fn write(
        inner: &mut Inner,
        path: &DocumentPath,
        fields: Value,
        if_absent: bool,
    ) -> Result<(), StoreError> {
        match inner.docs.get_mut(path.as_str()) {
            Some(existing) => {
                if if_absent {
                    return Err(StoreError::AlreadyExists);
                }
                existing.fields = fields;
                let change = DocumentChange {
                    kind: ChangeKind::Modified,
                    doc: Self::snapshot(path, existing),
                };
                Self::notify(inner, path, change);
            }
            None => {
                inner.seq += 1;
                let doc = StoredDoc {
                    fields,
                    create_time: Utc::now(),
                    seq: inner.seq,
                };
                let change = DocumentChange {
                    kind: ChangeKind::Added,
                    doc: Self::snapshot(path, &doc),
                };
                inner.docs.insert(path.as_str().to_string(), doc);
                Self::notify(inner, path, change);
            }
        }
        Ok(())
    }

    /// Documents directly inside `collection`, ordered by creation.
    fn collection_docs(inner: &Inner, collection: &CollectionPath) -> Vec<(String, StoredDoc)> {
        let prefix = format!("{}/", collection.as_str());
        let mut docs: Vec<(String, StoredDoc)> = inner
            .docs
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/'))
            .map(|(path, doc)| (path.clone(), doc.clone()))
            .collect();
        docs.sort_by_key(|(_, doc)| (doc.create_time, doc.seq));
        docs
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.docs.get(path.as_str()).map(|doc| Self::snapshot(path, doc)))
    }

    async fn set(&self, path: &DocumentPath, fields: Value) -> Result<(), StoreError> {
        Self::require_object(&fields)?;
        let mut inner = self.inner.lock().unwrap();
        Self::write(&mut inner, path, fields, false)
    }

    async fn create(&self, path: &DocumentPath, fields: Value) -> Result<(), StoreError> {
        Self::require_object(&fields)?;
        let mut inner = self.inner.lock().unwrap();
        Self::write(&mut inner, path, fields, true)
    }

    async fn update(&self, path: &DocumentPath, fields: Value) -> Result<(), StoreError> {
        Self::require_object(&fields)?;
        let mut inner = self.inner.lock().unwrap();
        let Some(existing) = inner.docs.get_mut(path.as_str()) else {
            return Err(StoreError::NotFound);
        };
        let (Some(target), Some(patch)) = (existing.fields.as_object_mut(), fields.as_object())
        else {
            return Err(StoreError::InvalidData("merge requires objects".into()));
        };
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
        let change = DocumentChange {
            kind: ChangeKind::Modified,
            doc: Self::snapshot(path, existing),
        };
        Self::notify(&mut inner, path, change);
        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(doc) = inner.docs.remove(path.as_str()) {
            let change = DocumentChange {
                kind: ChangeKind::Removed,
                doc: Self::snapshot(path, &doc),
            };
            Self::notify(&mut inner, path, change);
        }
        Ok(())
    }

    async fn add(&self, collection: &CollectionPath, fields: Value) -> Result<String, StoreError> {
        Self::require_object(&fields)?;
        let id = uuid::Uuid::new_v4().to_string();
        let path = collection.doc(&id);
        let mut inner = self.inner.lock().unwrap();
        Self::write(&mut inner, &path, fields, true)?;
        Ok(id)
    }

    async fn watch_document(&self, path: &DocumentPath) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        // Initial snapshot: a live query starts with the current state.
        if let Some(doc) = inner.docs.get(path.as_str()) {
            let _ = tx.send(DocumentChange {
                kind: ChangeKind::Added,
                doc: Self::snapshot(path, doc),
            });
        }
        inner
            .doc_watchers
            .entry(path.as_str().to_string())
            .or_default()
            .push(tx);
        Subscription::new(rx, None)
    }

    async fn watch_collection(&self, collection: &CollectionPath) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        for (path, doc) in Self::collection_docs(&inner, collection) {
            let path = DocumentPath::from_raw(path);
            let _ = tx.send(DocumentChange {
                kind: ChangeKind::Added,
                doc: Self::snapshot(&path, &doc),
            });
        }
        inner
            .col_watchers
            .entry(collection.as_str().to_string())
            .or_default()
            .push(tx);
        Subscription::new(rx, None)
    }
}
