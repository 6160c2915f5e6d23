//! Hermes object-storage capability.
//!
//! The probe engine never talks to a storage SDK directly. It consumes the
//! small capability defined by [`ObjectStore`]: create a bucket, stream an
//! object in, stream an object out, delete an object, list by prefix. Any
//! backend that implements the trait can be probed.
//!
//! Backends:
//! - [`MemoryStore`]: deterministic in-process fake with fault injection,
//!   used by the end-to-end scenarios
//! - [`FilesystemStore`]: buckets as directories under a root (local runs,
//!   CephFS mounts)
//! - [`GcsStore`]: Google Cloud Storage JSON API
//!
//! [`StorageClient`] wraps a backend and offers the familiar
//! `client.bucket(name).object(name)` call shape.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod buffer;
mod error;
pub mod filesystem;
pub mod gcs;
mod handle;
pub mod memory;
mod traits;

pub use buffer::BufferedReader;
pub use error::{StorageError, StorageResult};
pub use filesystem::FilesystemStore;
pub use gcs::{GcsConfig, GcsStore};
pub use handle::{BucketHandle, ObjectHandle, StorageClient};
pub use memory::{Fault, MemoryStore, StoreOp};
pub use traits::{ListQuery, ObjectAttrs, ObjectReader, ObjectStore, ObjectWriter};
