//! # Render Batching System
//!
//! Groups the drawable primitives of a retained scene graph into render
//! molecules that share one GPU state, keeps the molecules in an order that
//! minimizes state reloads, and walks that order once per frame.
//!
//! ## Architecture
//!
//! - **Attributes**: live appearance components and per-batch bindings
//! - **Scene**: transforms, switches and locales batches are partitioned by
//! - **Molecule**: render atoms and the batches holding them
//! - **Batching**: the owning container, its commit phase and global order
//! - **Batch Renderer**: the per-frame walk over the committed order
//! - **Backend**: the outbound interface to the native graphics binding
//!
//! ## Threading
//!
//! Scene edits may be queued from any thread through an
//! [`EditSender`]. Everything else runs on the thread owning the
//! [`MoleculeContainer`]: commit and render never overlap because both take
//! the container by exclusive reference.

pub mod attributes;
pub mod backend;
pub mod batch_renderer;
pub mod batching;
pub mod display_list;
pub mod error;
pub mod geometry;
pub mod molecule;
pub mod scene;
pub mod transparency;

pub use attributes::{AttributeKind, AttributeStore, DirtyAttrs, MaterialBlock, Sharing};
pub use backend::{BackendCall, RecordingBackend, RenderBackend};
pub use batch_renderer::{BatchRenderer, ViewState};
pub use batching::{BatchStats, CommitReport, EditSender, FrameStats, MoleculeContainer, SceneEdit};
pub use display_list::{ContextId, DisplayListAllocator, DisplayListId};
pub use error::{BatchError, BatchResult};
pub use geometry::{GeometryDesc, GeometryType, RenderCategory, VertexFormat};
pub use molecule::{AtomFlags, RenderAtom, RenderAtomDesc, RenderMolecule, RenderPass};
pub use scene::{AtomKey, LocaleId, SceneState, WhichChild};
pub use transparency::{TransparentEntry, TransparentSortIndex};
