//! Bucket and object handles over an [`ObjectStore`].

use std::fmt;
use std::sync::Arc;

use crate::error::StorageResult;
use crate::traits::{ListQuery, ObjectAttrs, ObjectReader, ObjectStore, ObjectWriter};

/// Entry point: `client.bucket("b").object("o").new_reader().await`.
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
}

impl StorageClient {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn bucket(&self, name: impl Into<String>) -> BucketHandle {
        BucketHandle {
            store: self.store.clone(),
            name: name.into(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }
}

impl fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageClient")
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

/// A bucket in a backend.
#[derive(Clone)]
pub struct BucketHandle {
    store: Arc<dyn ObjectStore>,
    name: String,
}

impl BucketHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn create(&self, project: Option<&str>) -> StorageResult<()> {
        self.store.create_bucket(&self.name, project).await
    }

    pub async fn exists(&self) -> StorageResult<bool> {
        self.store.bucket_exists(&self.name).await
    }

    pub fn object(&self, name: impl Into<String>) -> ObjectHandle {
        ObjectHandle {
            store: self.store.clone(),
            bucket: self.name.clone(),
            name: name.into(),
        }
    }

    pub async fn objects(&self, query: &ListQuery) -> StorageResult<Vec<ObjectAttrs>> {
        self.store.list(&self.name, query).await
    }
}

impl fmt::Debug for BucketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketHandle")
            .field("backend", &self.store.backend_name())
            .field("name", &self.name)
            .finish()
    }
}

/// An object (existing or not) in a bucket.
#[derive(Clone)]
pub struct ObjectHandle {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    name: String,
}

impl ObjectHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn new_writer(&self) -> Box<dyn ObjectWriter> {
        self.store.new_writer(&self.bucket, &self.name)
    }

    pub async fn new_reader(&self) -> StorageResult<Box<dyn ObjectReader>> {
        self.store.new_reader(&self.bucket, &self.name).await
    }

    pub async fn delete(&self) -> StorageResult<()> {
        self.store.delete(&self.bucket, &self.name).await
    }

    /// Upload `data` in one write and close.
    pub async fn put(&self, data: &[u8]) -> StorageResult<ObjectAttrs> {
        let mut writer = self.new_writer();
        writer.write(data).await?;
        writer.close().await
    }

    /// Download the whole object.
    pub async fn read_all(&self) -> StorageResult<Vec<u8>> {
        let mut reader = self.new_reader().await?;
        let mut out = Vec::with_capacity(reader.size() as usize);
        let mut buf = [0u8; 4096];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("bucket", &self.bucket)
            .field("name", &self.name)
            .finish()
    }
}
