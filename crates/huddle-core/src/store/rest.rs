//! REST-backed [`DocumentStore`].
//!
//! Point operations map onto the backend's document endpoints; live
//! queries are polling tasks that diff consecutive ordered snapshots
//! into Added/Modified/Removed notifications. Poll failures are
//! logged and the next tick proceeds — nothing here retries a failed
//! write, and no request carries a timeout beyond the transport's
//! own, so a hung call hangs that operation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::{
    ChangeKind, CollectionPath, Document, DocumentChange, DocumentPath, DocumentStore,
    Subscription,
};
use crate::config::ServiceConfig;
use crate::errors::StoreError;

use async_trait::async_trait;

#[derive(Debug, Deserialize)]
struct WireDocument {
    name: String,
    #[serde(rename = "createTime")]
    create_time: DateTime<Utc>,
    fields: Value,
}

#[derive(Debug, Deserialize)]
struct WireList {
    #[serde(default)]
    documents: Vec<WireDocument>,
}

impl WireDocument {
    fn into_document(self) -> Document {
        let id = self.name.rsplit('/').next().unwrap_or(&self.name).to_string();
        Document {
            id,
            create_time: self.create_time,
            fields: self.fields,
        }
    }
}

pub struct RestStore {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    poll_interval: Duration,
}

impl RestStore {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!(
                "{}/v1/projects/{}/documents",
                config.store_url.trim_end_matches('/'),
                config.project_id
            ),
            api_key: config.api_key.clone(),
            poll_interval: config.poll_interval,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}?key={}", self.base_url, path, self.api_key)
    }

    fn map_transport(err: reqwest::Error) -> StoreError {
        StoreError::Unavailable(err.to_string())
    }

    async fn map_status(resp: reqwest::Response) -> StoreError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        match status {
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => StoreError::PermissionDenied,
            StatusCode::NOT_FOUND => StoreError::NotFound,
            StatusCode::PRECONDITION_FAILED => StoreError::AlreadyExists,
            StatusCode::BAD_REQUEST if body.contains("FAILED_PRECONDITION") => {
                StoreError::MissingIndex(body)
            }
            _ => StoreError::Unavailable(format!("status {status}: {body}")),
        }
    }

    async fn fetch_document(
        http: &reqwest::Client,
        url: &str,
    ) -> Result<Option<Document>, StoreError> {
        let resp = http.get(url).send().await.map_err(Self::map_transport)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::map_status(resp).await);
        }
        let wire: WireDocument = resp
            .json()
            .await
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;
        Ok(Some(wire.into_document()))
    }

    async fn fetch_collection(
        http: &reqwest::Client,
        url: &str,
    ) -> Result<Vec<Document>, StoreError> {
        let resp = http.get(url).send().await.map_err(Self::map_transport)?;
        if !resp.status().is_success() {
            return Err(Self::map_status(resp).await);
        }
        let wire: WireList = resp
            .json()
            .await
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;
        let mut docs: Vec<Document> = wire.documents.into_iter().map(WireDocument::into_document).collect();
        docs.sort_by_key(|d| d.create_time);
        Ok(docs)
    }
}

#[async_trait]
impl DocumentStore for RestStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        Self::fetch_document(&self.http, &self.url(path.as_str())).await
    }

    async fn set(&self, path: &DocumentPath, fields: Value) -> Result<(), StoreError> {
        let resp = self
            .http
            .put(self.url(path.as_str()))
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .map_err(Self::map_transport)?;
        if !resp.status().is_success() {
            return Err(Self::map_status(resp).await);
        }
        Ok(())
    }

    async fn create(&self, path: &DocumentPath, fields: Value) -> Result<(), StoreError> {
        let resp = self
            .http
            .put(self.url(path.as_str()))
            .header(reqwest::header::IF_NONE_MATCH, "*")
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .map_err(Self::map_transport)?;
        if !resp.status().is_success() {
            return Err(Self::map_status(resp).await);
        }
        Ok(())
    }

    async fn update(&self, path: &DocumentPath, fields: Value) -> Result<(), StoreError> {
        let resp = self
            .http
            .patch(self.url(path.as_str()))
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .map_err(Self::map_transport)?;
        if !resp.status().is_success() {
            return Err(Self::map_status(resp).await);
        }
        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> Result<(), StoreError> {
        let resp = self
            .http
            .delete(self.url(path.as_str()))
            .send()
            .await
            .map_err(Self::map_transport)?;
        // Deleting an absent document is a no-op.
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(Self::map_status(resp).await);
        }
        Ok(())
    }

    async fn add(&self, collection: &CollectionPath, fields: Value) -> Result<String, StoreError> {
        let resp = self
            .http
            .post(self.url(collection.as_str()))
            .json(&json!({ "fields": fields }))
            .send()
            .await
            .map_err(Self::map_transport)?;
        if !resp.status().is_success() {
            return Err(Self::map_status(resp).await);
        }
        #[derive(Deserialize)]
        struct Created {
            name: String,
        }
        let created: Created = resp
            .json()
            .await
            .map_err(|e| StoreError::InvalidData(e.to_string()))?;
        Ok(created.name.rsplit('/').next().unwrap_or(&created.name).to_string())
    }

    async fn watch_document(&self, path: &DocumentPath) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let http = self.http.clone();
        let url = self.url(path.as_str());
        let poll = self.poll_interval;
        let path = path.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll);
            let mut last: Option<Document> = None;
            loop {
                interval.tick().await;
                let current = match Self::fetch_document(&http, &url).await {
                    Ok(doc) => doc,
                    Err(e) => {
                        tracing::warn!("document poll failed for {}: {e}", path.as_str());
                        continue;
                    }
                };
                let change = match (&last, &current) {
                    (None, Some(doc)) => Some(DocumentChange {
                        kind: ChangeKind::Added,
                        doc: doc.clone(),
                    }),
                    (Some(prev), Some(doc)) if prev.fields != doc.fields => {
                        Some(DocumentChange {
                            kind: ChangeKind::Modified,
                            doc: doc.clone(),
                        })
                    }
                    (Some(prev), None) => Some(DocumentChange {
                        kind: ChangeKind::Removed,
                        doc: prev.clone(),
                    }),
                    _ => None,
                };
                last = current;
                if let Some(change) = change {
                    if tx.send(change).is_err() {
                        break;
                    }
                }
            }
        });

        Subscription::new(rx, Some(task))
    }

    async fn watch_collection(&self, collection: &CollectionPath) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let http = self.http.clone();
        let url = format!("{}&orderBy=createTime", self.url(collection.as_str()));
        let poll = self.poll_interval;
        let collection = collection.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll);
            let mut known: HashMap<String, Document> = HashMap::new();
            loop {
                interval.tick().await;
                let docs = match Self::fetch_collection(&http, &url).await {
                    Ok(docs) => docs,
                    Err(e) => {
                        tracing::warn!("collection poll failed for {}: {e}", collection.as_str());
                        continue;
                    }
                };

                let mut seen: HashMap<String, ()> = HashMap::new();
                for doc in &docs {
                    seen.insert(doc.id.clone(), ());
                    let change = match known.get(&doc.id) {
                        None => Some(ChangeKind::Added),
                        Some(prev) if prev.fields != doc.fields => Some(ChangeKind::Modified),
                        Some(_) => None,
                    };
                    if let Some(kind) = change {
                        known.insert(doc.id.clone(), doc.clone());
                        if tx.send(DocumentChange { kind, doc: doc.clone() }).is_err() {
                            return;
                        }
                    }
                }

                let removed: Vec<String> =
                    known.keys().filter(|id| !seen.contains_key(*id)).cloned().collect();
                for id in removed {
                    if let Some(doc) = known.remove(&id) {
                        if tx.send(DocumentChange { kind: ChangeKind::Removed, doc }).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Subscription::new(rx, Some(task))
    }
}
