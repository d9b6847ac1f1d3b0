//! Workers and periodic jobs.
//!
//! - [`vectorize`]: broker consumer turning pending messages into vectors.
//! - [`rescan`]: republishes messages stuck in `pending`.
//! - [`consolidate`]: folds new events into per-subject facts.

pub mod consolidate;
pub mod control;
pub mod rescan;
pub mod vectorize;

pub use consolidate::{Consolidation, RunSummary, SubjectOutcome};
pub use control::{JobRun, run_every};
pub use rescan::PendingRescan;
pub use vectorize::{Outcome, VectorizeDeps, VectorizeWorker};
