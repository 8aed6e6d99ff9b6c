//! Application layer - the backup pipeline.
//!
//! This layer composes history collection, rendering, attachment
//! downloads and structure snapshots into runs, and schedules them.

pub mod archive_store;
pub mod collector;
pub mod materializer;
pub mod normalizer;
pub mod orchestrator;
pub mod renderer;
pub mod scheduler;
pub mod snapshot;

pub use archive_store::ArchiveStore;
pub use orchestrator::{Orchestrator, RunOptions};
pub use scheduler::{run_worker, BackupTrigger, Scheduler};
