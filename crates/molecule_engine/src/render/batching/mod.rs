//! # Batching
//!
//! The container that owns every render molecule, the deferred edit queue
//! feeding it, the global batch order and the commit statistics.
//!
//! ## Architecture
//!
//! - **container**: find-or-create, pending queues and the commit phase
//! - **ordering**: global order, partition chains and neighbor splicing
//! - **edits**: cross-thread producer queue drained at commit
//! - **stats**: per-commit reports, cumulative and per-frame counters

pub mod container;
pub mod edits;
pub mod ordering;
pub mod stats;

#[cfg(test)]
mod tests;

pub use container::MoleculeContainer;
pub use edits::{EditSender, SceneEdit};
pub use stats::{BatchStats, CommitReport, FrameStats};
