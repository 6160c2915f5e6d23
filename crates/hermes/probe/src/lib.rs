//! Hermes probe engine
//!
//! Hermes probes an object-storage bucket the way a client would: on every
//! tick it checks its journal, performs one file operation (create, read or
//! delete) and commits the journal, timing each step.
//!
//! ## Crash safety
//!
//! Every create and delete is preceded by a journal write carrying the
//! operation's intent. If the process dies between the intent and the
//! commit, the next [`Target::check_journal`] finds the intent and finishes
//! the operation before anything else happens.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let options = ProbeOptions::new(config)
//!     .with_backend(TargetSystem::GoogleCloudStorage, Arc::new(store));
//! let mut engine = ProbeEngine::init("hermes-gcs", options).await?;
//! engine.start(shutdown_rx, metric_tx).await;
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod engine;
mod error;
pub mod journal;
mod ops;
mod pb;
pub mod policy;
pub mod target;

pub use engine::{ProbeEngine, ProbeOptions};
pub use error::{ConfigError, ProbeError, ProbeResult};
pub use journal::{Intent, IntentOp, Journal};
pub use policy::{BandPolicy, PlannedOp, SelectionPolicy};
pub use target::Target;
