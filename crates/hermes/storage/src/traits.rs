//! Storage capability traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttrs {
    pub bucket: String,
    pub name: String,
    pub size: u64,
    pub updated: DateTime<Utc>,
}

/// Filter for object listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Only objects whose name starts with this prefix are returned.
    pub prefix: String,
}

impl ListQuery {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

/// Streaming upload of a single object.
///
/// Nothing is visible in the bucket until [`ObjectWriter::close`] succeeds.
#[async_trait]
pub trait ObjectWriter: Send {
    /// Append bytes to the pending object.
    async fn write(&mut self, buf: &[u8]) -> StorageResult<usize>;

    /// Commit the object. Calling it twice is an error.
    async fn close(&mut self) -> StorageResult<ObjectAttrs>;
}

/// Streaming download of a single object.
#[async_trait]
pub trait ObjectReader: Send {
    /// Fill `buf` with the next bytes; `Ok(0)` means end of object.
    async fn read(&mut self, buf: &mut [u8]) -> StorageResult<usize>;

    /// Total object size in bytes.
    fn size(&self) -> u64;
}

/// The capability Hermes requires of a storage backend.
///
/// Implementations must be safe for concurrent use: every probe target
/// shares the same backend instance.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    async fn create_bucket(&self, bucket: &str, project: Option<&str>) -> StorageResult<()>;

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    /// Start an upload. Errors (including a missing bucket) surface from
    /// `write` or `close`.
    fn new_writer(&self, bucket: &str, object: &str) -> Box<dyn ObjectWriter>;

    async fn new_reader(&self, bucket: &str, object: &str)
        -> StorageResult<Box<dyn ObjectReader>>;

    async fn delete(&self, bucket: &str, object: &str) -> StorageResult<()>;

    /// Objects matching `query`, sorted by name.
    async fn list(&self, bucket: &str, query: &ListQuery) -> StorageResult<Vec<ObjectAttrs>>;
}
