//! Storage interface: the contract the registries, interval-stats
//! stores, session folds, and summaries use to persist and rehydrate.
//!
//! Grounded on `original_source/storage/storage.go`'s single `Op`/`Result`
//! operation type and on `data/files/filesystem.rs` for the sharded,
//! atomic-write directory-of-blobs idiom — adapted here from
//! content-addressed file blobs to one-JSON-file-per-record-per-resource
//! directory. `Interactions` is write-only, appended as CSV rows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which persisted collection an `Op` addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resource {
    Interactions,
    Endpoints,
    EndpointStats,
    Origins,
    OriginStats,
    Entities,
    EntityStats,
    Properties,
    PropertyStats,
    Summaries,
    Settings,
}

impl Resource {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Resource::Interactions => "interactions",
            Resource::Endpoints => "endpoints",
            Resource::EndpointStats => "endpoint_stats",
            Resource::Origins => "origins",
            Resource::OriginStats => "origin_stats",
            Resource::Entities => "entities",
            Resource::EntityStats => "entity_stats",
            Resource::Properties => "properties",
            Resource::PropertyStats => "property_stats",
            Resource::Summaries => "summaries",
            Resource::Settings => "settings",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Create,
    Read,
    Update,
    Delete,
    List,
    Count,
}

/// A `Where` clause addresses a record by natural key (unordered map) or,
/// for operations where field order matters to the backend, an ordered
/// list of pairs. The filesystem implementation only ever looks at the
/// `"id"` key; richer backends can interpret the rest.
#[derive(Debug, Clone)]
pub enum Where {
    Map(HashMap<String, serde_json::Value>),
    List(Vec<(String, serde_json::Value)>),
}

impl Where {
    pub fn id(id: impl Into<String>) -> Self {
        let mut map = HashMap::new();
        map.insert("id".to_string(), serde_json::Value::String(id.into()));
        Where::Map(map)
    }

    fn get(&self, key: &str) -> Option<&serde_json::Value> {
        match self {
            Where::Map(m) => m.get(key),
            Where::List(l) => l.iter().find(|(k, _)| k == key).map(|(_, v)| v),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Op {
    pub resource: Resource,
    pub kind: OpKind,
    pub item: Option<serde_json::Value>,
    pub r#where: Option<Where>,
    pub upsert: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Op {
    pub fn create(resource: Resource, item: serde_json::Value) -> Self {
        Self {
            resource,
            kind: OpKind::Create,
            item: Some(item),
            r#where: None,
            upsert: false,
            limit: None,
            offset: None,
        }
    }

    pub fn upsert(resource: Resource, item: serde_json::Value) -> Self {
        Self {
            resource,
            kind: OpKind::Update,
            item: Some(item),
            r#where: None,
            upsert: true,
            limit: None,
            offset: None,
        }
    }

    pub fn read(resource: Resource, id: impl Into<String>) -> Self {
        Self {
            resource,
            kind: OpKind::Read,
            item: None,
            r#where: Some(Where::id(id)),
            upsert: false,
            limit: None,
            offset: None,
        }
    }

    pub fn list(resource: Resource, limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            resource,
            kind: OpKind::List,
            item: None,
            r#where: None,
            upsert: false,
            limit,
            offset,
        }
    }

    pub fn count(resource: Resource) -> Self {
        Self {
            resource,
            kind: OpKind::Count,
            item: None,
            r#where: None,
            upsert: false,
            limit: None,
            offset: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct OpResult {
    pub item: Option<serde_json::Value>,
    pub items: Vec<serde_json::Value>,
    pub count: usize,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("does not exist")]
    DoesNotExist,
    #[error("invalid resource type for this operation")]
    InvalidResourceType,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn do_op(&self, op: Op) -> Result<OpResult, StorageError>;

    /// Append a raw CSV row for `Resource::Interactions`. Kept as a
    /// separate method (rather than `Op`) because interactions are
    /// write-only and never addressed by id.
    async fn append_interaction_csv(&self, day: &str, row: &str) -> Result<(), StorageError>;
}

/// Minimal conformant implementation: one directory per resource
/// under `root`, one JSON file per record named after its natural id.
/// Grounded on `data/files/filesystem.rs`'s `write_atomic` (write to a
/// `.tmp` sibling, then rename) so a crash mid-write never leaves a
/// half-written record behind.
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resource_dir(&self, resource: Resource) -> PathBuf {
        self.root.join(resource.dir_name())
    }

    fn record_path(&self, resource: Resource, id: &str) -> PathBuf {
        self.resource_dir(resource).join(format!("{id}.json"))
    }

    async fn ensure_dir(dir: &Path) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(dir).await?;
        Ok(())
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_all(&self, resource: Resource) -> Result<Vec<serde_json::Value>, StorageError> {
        let dir = self.resource_dir(resource);
        let mut items = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(items),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            items.push(serde_json::from_slice(&bytes)?);
        }
        Ok(items)
    }
}

#[async_trait]
impl Storage for FilesystemStorage {
    async fn do_op(&self, op: Op) -> Result<OpResult, StorageError> {
        match op.kind {
            OpKind::Create | OpKind::Update => {
                let item = op.item.ok_or(StorageError::InvalidResourceType)?;
                let id = item
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .ok_or(StorageError::InvalidResourceType)?;
                let dir = self.resource_dir(op.resource);
                Self::ensure_dir(&dir).await?;
                let path = self.record_path(op.resource, &id);
                let bytes = serde_json::to_vec_pretty(&item)?;
                Self::write_atomic(&path, &bytes).await?;
                Ok(OpResult {
                    item: Some(item),
                    ..Default::default()
                })
            }
            OpKind::Read => {
                let id = op
                    .r#where
                    .as_ref()
                    .and_then(|w| w.get("id"))
                    .and_then(|v| v.as_str())
                    .ok_or(StorageError::InvalidResourceType)?;
                let path = self.record_path(op.resource, id);
                let bytes = match tokio::fs::read(&path).await {
                    Ok(b) => b,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(StorageError::DoesNotExist);
                    }
                    Err(e) => return Err(e.into()),
                };
                let item: serde_json::Value = serde_json::from_slice(&bytes)?;
                Ok(OpResult {
                    item: Some(item),
                    ..Default::default()
                })
            }
            OpKind::Delete => {
                let id = op
                    .r#where
                    .as_ref()
                    .and_then(|w| w.get("id"))
                    .and_then(|v| v.as_str())
                    .ok_or(StorageError::InvalidResourceType)?;
                let path = self.record_path(op.resource, id);
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(StorageError::DoesNotExist);
                    }
                    Err(e) => return Err(e.into()),
                }
                Ok(OpResult::default())
            }
            OpKind::List => {
                let mut items = self.read_all(op.resource).await?;
                if let Some(offset) = op.offset {
                    items = items.into_iter().skip(offset.max(0) as usize).collect();
                }
                if let Some(limit) = op.limit {
                    items.truncate(limit.max(0) as usize);
                }
                Ok(OpResult {
                    items,
                    ..Default::default()
                })
            }
            OpKind::Count => {
                let items = self.read_all(op.resource).await?;
                Ok(OpResult {
                    count: items.len(),
                    ..Default::default()
                })
            }
        }
    }

    async fn append_interaction_csv(&self, day: &str, row: &str) -> Result<(), StorageError> {
        let dir = self.resource_dir(Resource::Interactions);
        Self::ensure_dir(&dir).await?;
        let path = dir.join(format!("{day}.csv"));
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        use tokio::io::AsyncWriteExt;
        file.write_all(row.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path());
        let item = json!({"id": "abc", "name": "checkout"});
        storage
            .do_op(Op::create(Resource::Endpoints, item.clone()))
            .await
            .unwrap();

        let result = storage.do_op(Op::read(Resource::Endpoints, "abc")).await.unwrap();
        assert_eq!(result.item.unwrap(), item);
    }

    #[tokio::test]
    async fn read_missing_returns_does_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path());
        let err = storage
            .do_op(Op::read(Resource::Endpoints, "nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DoesNotExist));
    }

    #[tokio::test]
    async fn list_honors_limit_and_offset() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path());
        for i in 0..5 {
            storage
                .do_op(Op::create(
                    Resource::Origins,
                    json!({"id": format!("o{i}"), "n": i}),
                ))
                .await
                .unwrap();
        }
        let result = storage
            .do_op(Op::list(Resource::Origins, Some(2), Some(1)))
            .await
            .unwrap();
        assert_eq!(result.items.len(), 2);
    }

    #[tokio::test]
    async fn interactions_csv_appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FilesystemStorage::new(dir.path());
        storage.append_interaction_csv("2024-3-15", "a,b,c").await.unwrap();
        storage.append_interaction_csv("2024-3-15", "d,e,f").await.unwrap();
        let contents = tokio::fs::read_to_string(dir.path().join("interactions/2024-3-15.csv"))
            .await
            .unwrap();
        assert_eq!(contents, "a,b,c\nd,e,f\n");
    }
}
