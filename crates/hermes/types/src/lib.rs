//! Hermes Types - Core types for the object-storage probe
//!
//! Hermes continuously exercises a bucket through its public data-plane API
//! (create, read, delete small files) and records latency per operation and
//! exit status. This crate holds the pieces every other Hermes crate agrees
//! on:
//!
//! - **File identity**: deterministic file contents derived from a file id,
//!   and the canonical `Hermes_<DD>_<sha1>` naming that binds id and content
//! - **Status taxonomy**: probe operations, API calls and exit statuses used
//!   as metric labels
//! - **Configuration**: the typed probe configuration consumed by the engine
//!
//! ## File ids
//!
//! | Range | Meaning |
//! |---|---|
//! | `0` | reserved for the journal object |
//! | `1..=10` | persistent files, never deleted |
//! | `11..=50` | churn files, eligible for deletion |

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod file;
pub mod status;

pub use config::{
    DistributionConfig, HermesProbeConfig, StorageSystemTag, TargetConfig, TargetSystem,
};
pub use error::{TypesError, TypesResult};
pub use file::{
    journal_name, parse_file_name, parse_journal_name, FileId, RandomFile, RandomFileReader,
    FILE_NAME_PREFIX, JOURNAL_NAME_PREFIX, MAX_FILE_ID, MAX_FILE_SIZE_BYTES,
    MAX_PERSISTENT_FILE_ID, MIN_CHURN_FILE_ID, MIN_FILE_ID,
};
pub use status::{ApiCall, ExitStatus, ProbeOperation};
