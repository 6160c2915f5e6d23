//! Local-directory backend.
//!
//! Each bucket is a directory under `root` and each object a regular file in
//! it. Uploads land in a hidden temp file and are renamed into place on close,
//! so readers and listings never observe a partial object.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::buffer::BufferedReader;
use crate::error::{StorageError, StorageResult};
use crate::traits::{ListQuery, ObjectAttrs, ObjectReader, ObjectStore, ObjectWriter};

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, bucket: &str) -> StorageResult<PathBuf> {
        validate_component("bucket", bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, object: &str) -> StorageResult<PathBuf> {
        validate_component("object", object)?;
        Ok(self.bucket_path(bucket)?.join(object))
    }

    async fn require_bucket(&self, bucket: &str) -> StorageResult<PathBuf> {
        let path = self.bucket_path(bucket)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(path),
            Ok(_) => Err(StorageError::BucketNotExist(bucket.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::BucketNotExist(bucket.to_string()))
            }
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

/// Names become single path components: no separators, no dot-files.
fn validate_component(kind: &str, name: &str) -> StorageResult<()> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\', '\0']) {
        return Err(StorageError::InvalidArgument(format!(
            "invalid {kind} name {name:?}"
        )));
    }
    Ok(())
}

fn io_error(path: &Path, err: std::io::Error) -> StorageError {
    StorageError::Io(format!("{}: {err}", path.display()))
}

fn modified(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    async fn create_bucket(&self, bucket: &str, _project: Option<&str>) -> StorageResult<()> {
        let path = self.bucket_path(bucket)?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        debug!(bucket, path = %path.display(), "Bucket directory ready");
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.require_bucket(bucket).await {
            Ok(_) => Ok(true),
            Err(StorageError::BucketNotExist(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn new_writer(&self, bucket: &str, object: &str) -> Box<dyn ObjectWriter> {
        Box::new(FilesystemWriter {
            store: self.clone(),
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
        self.require_bucket(bucket).await?;
        let path = self.object_path(bucket, object)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Box::new(BufferedReader::new(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::object_not_exist(bucket, object))
            }
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn delete(&self, bucket: &str, object: &str) -> StorageResult<()> {
        self.require_bucket(bucket).await?;
        let path = self.object_path(bucket, object)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::object_not_exist(bucket, object))
            }
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn list(&self, bucket: &str, query: &ListQuery) -> StorageResult<Vec<ObjectAttrs>> {
        let dir = self.require_bucket(bucket).await?;
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || !name.starts_with(&query.prefix) {
                continue;
            }
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                // Deleted between read_dir and stat.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(&entry.path(), e)),
            };
            if !meta.is_file() {
                continue;
            }
            out.push(ObjectAttrs {
                bucket: bucket.to_string(),
                name,
                size: meta.len(),
                updated: modified(&meta),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

struct FilesystemWriter {
    store: FilesystemStore,
    bucket: String,
    name: String,
    buf: Vec<u8>,
    closed: bool,
}

impl FilesystemWriter {
    async fn commit(&self) -> StorageResult<ObjectAttrs> {
        let dir = self.store.require_bucket(&self.bucket).await?;
        let target = self.store.object_path(&self.bucket, &self.name)?;
        let tmp = dir.join(format!(".{}.{}.tmp", self.name, uuid::Uuid::new_v4()));

        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&self.buf).await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp, &target).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error(&target, e));
        }

        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| io_error(&target, e))?;
        Ok(ObjectAttrs {
            bucket: self.bucket.clone(),
            name: self.name.clone(),
            size: meta.len(),
            updated: modified(&meta),
        })
    }
}

#[async_trait]
impl ObjectWriter for FilesystemWriter {
    async fn write(&mut self, buf: &[u8]) -> StorageResult<usize> {
        if self.closed {
            return Err(StorageError::InvalidArgument(format!(
                "write after close on {}",
                self.name
            )));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn close(&mut self) -> StorageResult<ObjectAttrs> {
        if self.closed {
            return Err(StorageError::InvalidArgument(format!(
                "writer for {} already closed",
                self.name
            )));
        }
        self.closed = true;
        self.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_filesystem_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        assert!(!store.bucket_exists("b").await.unwrap());
        store.create_bucket("b", None).await.unwrap();
        assert!(store.bucket_exists("b").await.unwrap());

        let mut writer = store.new_writer("b", "Hermes_01_abc");
        writer.write(b"hello ").await.unwrap();
        writer.write(b"world").await.unwrap();
        let attrs = writer.close().await.unwrap();
        assert_eq!(attrs.size, 11);

        let mut reader = store.new_reader("b", "Hermes_01_abc").await.unwrap();
        assert_eq!(reader.size(), 11);
        let mut buf = [0u8; 32];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello world");

        store.delete("b", "Hermes_01_abc").await.unwrap();
        assert!(store
            .delete("b", "Hermes_01_abc")
            .await
            .unwrap_err()
            .is_object_not_exist());
    }

    #[tokio::test]
    async fn test_filesystem_list_skips_hidden_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        store.create_bucket("b", None).await.unwrap();
        for name in ["Hermes_02_b", "Hermes_01_a", "zzz"] {
            let mut w = store.new_writer("b", name);
            w.write(b"x").await.unwrap();
            w.close().await.unwrap();
        }
        std::fs::write(dir.path().join("b").join(".Hermes_03_c.tmp"), b"x").unwrap();

        let names: Vec<_> = store
            .list("b", &ListQuery::prefix("Hermes_"))
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["Hermes_01_a", "Hermes_02_b"]);
    }

    #[tokio::test]
    async fn test_filesystem_missing_bucket_and_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        assert!(store
            .new_reader("nope", "obj")
            .await
            .err()
            .unwrap()
            .is_bucket_not_exist());

        let mut w = store.new_writer("nope", "obj");
        w.write(b"x").await.unwrap();
        assert!(w.close().await.unwrap_err().is_bucket_not_exist());

        store.create_bucket("b", None).await.unwrap();
        assert!(matches!(
            store.delete("b", "../escape").await,
            Err(StorageError::InvalidArgument(_))
        ));
    }
}
