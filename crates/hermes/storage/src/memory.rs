//! In-memory reference backend.
//!
//! This adapter is deterministic and test-friendly. Besides the capability
//! itself it exposes out-of-band helpers used to stage failures: queued
//! faults per operation, byte corruption, and raw object access that bypasses
//! fault injection.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::buffer::BufferedReader;
use crate::error::{StorageError, StorageResult};
use crate::traits::{ListQuery, ObjectAttrs, ObjectReader, ObjectStore, ObjectWriter};

/// Capability operations that can carry an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    CreateBucket,
    Write,
    Close,
    Read,
    Delete,
    List,
}

/// A staged failure, consumed by the next matching operation.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail with this error.
    Error(StorageError),
    /// Stall before running the operation normally.
    Delay(Duration),
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    updated: DateTime<Utc>,
}

type Bucket = BTreeMap<String, StoredObject>;

#[derive(Debug, Default)]
struct MemoryState {
    buckets: RwLock<BTreeMap<String, Bucket>>,
    faults: Mutex<HashMap<StoreOp, VecDeque<Fault>>>,
    calls: Mutex<HashMap<StoreOp, usize>>,
}

impl MemoryState {
    async fn enter(&self, op: StoreOp) -> StorageResult<()> {
        let fault = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| StorageError::Backend("call counter lock poisoned".to_string()))?;
            *calls.entry(op).or_insert(0) += 1;

            let mut faults = self
                .faults
                .lock()
                .map_err(|_| StorageError::Backend("fault lock poisoned".to_string()))?;
            faults.get_mut(&op).and_then(VecDeque::pop_front)
        };

        match fault {
            Some(Fault::Error(err)) => Err(err),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn read_buckets(
        &self,
    ) -> StorageResult<std::sync::RwLockReadGuard<'_, BTreeMap<String, Bucket>>> {
        self.buckets
            .read()
            .map_err(|_| StorageError::Backend("bucket lock poisoned".to_string()))
    }

    fn write_buckets(
        &self,
    ) -> StorageResult<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Bucket>>> {
        self.buckets
            .write()
            .map_err(|_| StorageError::Backend("bucket lock poisoned".to_string()))
    }

    fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        Ok(self.read_buckets()?.contains_key(bucket))
    }

    fn insert(&self, bucket: &str, name: &str, data: Vec<u8>) -> StorageResult<ObjectAttrs> {
        let mut buckets = self.write_buckets()?;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::BucketNotExist(bucket.to_string()))?;
        let updated = Utc::now();
        let size = data.len() as u64;
        objects.insert(name.to_string(), StoredObject { data, updated });
        Ok(ObjectAttrs {
            bucket: bucket.to_string(),
            name: name.to_string(),
            size,
            updated,
        })
    }
}

/// In-memory object store.
///
/// Clones share state, so a test can keep one handle for inspection while the
/// engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the given buckets already created.
    pub fn with_buckets<I, S>(buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        if let Ok(mut guard) = store.state.write_buckets() {
            for bucket in buckets {
                guard.insert(bucket.into(), Bucket::new());
            }
        }
        store
    }

    /// Queue a fault for the next call of `op`. Faults for the same
    /// operation fire in the order they were queued.
    pub fn inject_fault(&self, op: StoreOp, fault: Fault) {
        if let Ok(mut faults) = self.state.faults.lock() {
            faults.entry(op).or_default().push_back(fault);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.state.faults.lock() {
            faults.clear();
        }
    }

    /// Number of times `op` has been invoked through the capability.
    pub fn call_count(&self, op: StoreOp) -> usize {
        self.state
            .calls
            .lock()
            .map(|calls| calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Write an object directly, bypassing fault injection.
    pub fn put_object(
        &self,
        bucket: &str,
        name: &str,
        data: impl Into<Vec<u8>>,
    ) -> StorageResult<ObjectAttrs> {
        self.state.insert(bucket, name, data.into())
    }

    /// Remove an object directly. Returns whether it existed.
    pub fn remove_object(&self, bucket: &str, name: &str) -> bool {
        self.state
            .write_buckets()
            .map(|mut buckets| {
                buckets
                    .get_mut(bucket)
                    .map(|objects| objects.remove(name).is_some())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Contents of an object, if present.
    pub fn object_bytes(&self, bucket: &str, name: &str) -> Option<Vec<u8>> {
        let buckets = self.state.read_buckets().ok()?;
        buckets
            .get(bucket)?
            .get(name)
            .map(|object| object.data.clone())
    }

    /// Sorted names of every object in `bucket`.
    pub fn object_names(&self, bucket: &str) -> Vec<String> {
        self.state
            .read_buckets()
            .ok()
            .and_then(|buckets| buckets.get(bucket).map(|b| b.keys().cloned().collect()))
            .unwrap_or_default()
    }

    /// Flip every bit of the byte at `index`.
    pub fn corrupt_object(&self, bucket: &str, name: &str, index: usize) -> StorageResult<()> {
        let mut buckets = self.state.write_buckets()?;
        let object = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::BucketNotExist(bucket.to_string()))?
            .get_mut(name)
            .ok_or_else(|| StorageError::object_not_exist(bucket, name))?;
        let len = object.data.len();
        let byte = object.data.get_mut(index).ok_or_else(|| {
            StorageError::InvalidArgument(format!("offset {index} beyond object of {len} bytes"))
        })?;
        *byte = !*byte;
        Ok(())
    }

    /// Drop a bucket and everything in it.
    pub fn remove_bucket(&self, bucket: &str) -> bool {
        self.state
            .write_buckets()
            .map(|mut buckets| buckets.remove(bucket).is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create_bucket(&self, bucket: &str, _project: Option<&str>) -> StorageResult<()> {
        self.state.enter(StoreOp::CreateBucket).await?;
        if bucket.is_empty() {
            return Err(StorageError::InvalidArgument(
                "bucket name must not be empty".to_string(),
            ));
        }
        let mut buckets = self.state.write_buckets()?;
        buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        self.state.bucket_exists(bucket)
    }

    fn new_writer(&self, bucket: &str, object: &str) -> Box<dyn ObjectWriter> {
        Box::new(MemoryWriter {
            state: self.state.clone(),
            bucket: bucket.to_string(),
            name: object.to_string(),
            buf: Vec::new(),
            closed: false,
        })
    }

    async fn new_reader(
        &self,
        bucket: &str,
        object: &str,
    ) -> StorageResult<Box<dyn ObjectReader>> {
        self.state.enter(StoreOp::Read).await?;
        let buckets = self.state.read_buckets()?;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotExist(bucket.to_string()))?;
        let stored = objects
            .get(object)
            .ok_or_else(|| StorageError::object_not_exist(bucket, object))?;
        Ok(Box::new(BufferedReader::new(stored.data.clone())))
    }

    async fn delete(&self, bucket: &str, object: &str) -> StorageResult<()> {
        self.state.enter(StoreOp::Delete).await?;
        let mut buckets = self.state.write_buckets()?;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StorageError::BucketNotExist(bucket.to_string()))?;
        objects
            .remove(object)
            .map(|_| ())
            .ok_or_else(|| StorageError::object_not_exist(bucket, object))
    }

    async fn list(&self, bucket: &str, query: &ListQuery) -> StorageResult<Vec<ObjectAttrs>> {
        self.state.enter(StoreOp::List).await?;
        let buckets = self.state.read_buckets()?;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::BucketNotExist(bucket.to_string()))?;
        Ok(objects
            .range(query.prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&query.prefix))
            .map(|(name, object)| ObjectAttrs {
                bucket: bucket.to_string(),
                name: name.clone(),
                size: object.data.len() as u64,
                updated: object.updated,
            })
            .collect())
    }
}

struct MemoryWriter {
    state: Arc<MemoryState>,
    bucket: String,
    name: String,
    buf: Vec<u8>,
    closed: bool,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    async fn write(&mut self, buf: &[u8]) -> StorageResult<usize> {
        self.state.enter(StoreOp::Write).await?;
        if self.closed {
            return Err(StorageError::InvalidArgument(format!(
                "write after close on {}",
                self.name
            )));
        }
        if !self.state.bucket_exists(&self.bucket)? {
            return Err(StorageError::BucketNotExist(self.bucket.clone()));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn close(&mut self) -> StorageResult<ObjectAttrs> {
        self.state.enter(StoreOp::Close).await?;
        if self.closed {
            return Err(StorageError::InvalidArgument(format!(
                "writer for {} already closed",
                self.name
            )));
        }
        self.closed = true;
        self.state
            .insert(&self.bucket, &self.name, std::mem::take(&mut self.buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_visible_after_close() {
        let store = MemoryStore::with_buckets(["b"]);
        let mut writer = store.new_writer("b", "obj");
        writer.write(b"abc").await.unwrap();
        assert!(store.object_bytes("b", "obj").is_none());

        let attrs = writer.close().await.unwrap();
        assert_eq!(attrs.size, 3);
        assert_eq!(store.object_bytes("b", "obj").unwrap(), b"abc");
        assert!(writer.close().await.is_err());
    }

    #[tokio::test]
    async fn test_missing_bucket_sentinels() {
        let store = MemoryStore::new();
        let mut writer = store.new_writer("nope", "obj");
        assert!(writer.write(b"x").await.unwrap_err().is_bucket_not_exist());
        assert!(store
            .delete("nope", "obj")
            .await
            .unwrap_err()
            .is_bucket_not_exist());
        assert!(store
            .list("nope", &ListQuery::default())
            .await
            .unwrap_err()
            .is_bucket_not_exist());

        store.create_bucket("nope", None).await.unwrap();
        assert!(store
            .delete("nope", "obj")
            .await
            .unwrap_err()
            .is_object_not_exist());
    }

    #[test]
    fn test_corrupt_object_flips_one_byte() {
        let store = MemoryStore::with_buckets(["b"]);
        store.put_object("b", "obj", vec![0x0f, 0x00]).unwrap();

        store.corrupt_object("b", "obj", 1).unwrap();
        assert_eq!(store.object_bytes("b", "obj").unwrap(), vec![0x0f, 0xff]);

        let err = store.corrupt_object("b", "obj", 2).unwrap_err();
        assert!(err.to_string().contains("2 bytes"));
        assert!(store.corrupt_object("b", "missing", 0).unwrap_err().is_object_not_exist());
    }

    #[tokio::test]
    async fn test_faults_fire_in_order_until_cleared() {
        let store = MemoryStore::with_buckets(["b"]);
        store.inject_fault(StoreOp::List, Fault::Delay(Duration::ZERO));
        store.inject_fault(StoreOp::List, Fault::Error(StorageError::Io("boom".into())));
        store.inject_fault(StoreOp::List, Fault::Error(StorageError::Io("again".into())));

        assert!(store.list("b", &ListQuery::default()).await.is_ok());
        assert!(store.list("b", &ListQuery::default()).await.is_err());

        store.clear_faults();
        assert!(store.list("b", &ListQuery::default()).await.is_ok());
        assert_eq!(store.call_count(StoreOp::List), 3);
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let store = MemoryStore::with_buckets(["b"]);
        store.put_object("b", "Hermes_01_a", "1").unwrap();
        store.put_object("b", "Hermes_02_b", "2").unwrap();
        store.put_object("b", "Hermes_Journal_c", "j").unwrap();
        store.put_object("b", "other", "o").unwrap();

        let names: Vec<_> = store
            .list("b", &ListQuery::prefix("Hermes_0"))
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["Hermes_01_a", "Hermes_02_b"]);

        let all = store.list("b", &ListQuery::default()).await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_fault_injection_is_one_shot() {
        let store = MemoryStore::with_buckets(["b"]);
        store.inject_fault(
            StoreOp::List,
            Fault::Error(StorageError::Backend("boom".to_string())),
        );
        assert!(store.list("b", &ListQuery::default()).await.is_err());
        assert!(store.list("b", &ListQuery::default()).await.is_ok());
        assert_eq!(store.call_count(StoreOp::List), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_fault() {
        let store = MemoryStore::with_buckets(["b"]);
        store.inject_fault(StoreOp::List, Fault::Delay(Duration::from_secs(30)));
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            store.list("b", &ListQuery::default()),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_object() {
        let store = MemoryStore::with_buckets(["b"]);
        store.put_object("b", "obj", vec![0x0f, 0x00]).unwrap();
        store.corrupt_object("b", "obj", 1).unwrap();
        assert_eq!(store.object_bytes("b", "obj").unwrap(), vec![0x0f, 0xff]);
        assert!(store.corrupt_object("b", "obj", 2).is_err());
    }
}
