//! # Render Molecules
//!
//! Batches of render atoms that share one GPU state, and the atoms
//! themselves.
//!
//! ## Architecture
//!
//! - **atom**: drawable primitive instances and their intrusive pending links
//! - **batch**: equivalence test, pending queues and the apply phase
//! - **draw**: attribute loading, display-list compilation and drawing

pub mod atom;
pub mod batch;
pub mod draw;

pub use atom::{AtomFlags, ListBucket, RenderAtom, RenderAtomDesc, RenderAtomListInfo};
pub use batch::{ListEntry, MatchOutcome, PrimaryMode, RenderMolecule};
pub use draw::{DrawContext, RenderPass};
