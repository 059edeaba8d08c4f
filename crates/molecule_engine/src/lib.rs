//! # Molecule Engine
//!
//! A render-batching engine for retained scene graphs. Drawable primitives
//! (render atoms) are grouped into render molecules whose members share one
//! GPU state, and the molecules are kept in a global order that clusters
//! equal state so a single walk per frame reloads as little as possible.
//!
//! ## Features
//!
//! - **Attribute Bucketing**: batches keyed by structural partition and six
//!   appearance components, bound by live reference or by snapshot
//! - **Two-Phase Commit**: edits queue up (also from other threads) and are
//!   applied at one synchronization point per frame
//! - **Self-Ordering**: batches splice themselves next to equal materials
//! - **Display Lists**: a bounded pool of native list ids, released per
//!   rendering context exactly once
//! - **Transparency**: per-atom back-to-front sorting on demand
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use molecule_engine::prelude::*;
//!
//! fn main() -> Result<(), BatchError> {
//!     let mut scene = SceneState::new();
//!     let transform = scene.transforms.create(Mat4::identity());
//!     let material = scene.attributes.create_attribute(MaterialAttrs::new(), false);
//!     let appearance = scene.attributes.create_appearance();
//!     scene.attributes.set_component(appearance, AttributeKind::Material, Some(material))?;
//!
//!     let mut container = MoleculeContainer::new(&BatchingConfig::default());
//!     let geometry = GeometryDesc::surface(36, Aabb::default());
//!     let key = AtomKey::new(transform, LocaleId::default());
//!     let atom = container.spawn_atom(RenderAtomDesc::new(geometry, Some(appearance), key))?;
//!     container.resolve_and_insert(atom, &scene)?;
//!     container.commit(&mut scene);
//!
//!     let mut backend = RecordingBackend::new();
//!     let mut renderer = BatchRenderer::new();
//!     renderer.render_frame(&mut container, &scene, ContextId(0), &ViewState::default(), &mut backend)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        core::config::{ApplicationConfig, BatchingConfig, DisplayListConfig, EngineConfig, TransparencySortPolicy},
        config::{Config, ConfigError, ConfigFormat},
        foundation::{
            collections::{AppearanceHandle, AtomHandle, AttributeHandle, MoleculeHandle, TransformHandle},
            math::{Aabb, Mat4, Point3, Vec3},
        },
        render::{
            attributes::{
                AttributeKind, ColoringAttrs, DirtyAttrs, MaterialAttrs, PolygonAttrs, PolygonMode,
                TransparencyAttrs, TransparencyMode,
            },
            AtomFlags, AtomKey, BatchError, BatchRenderer, BatchResult, CommitReport, ContextId, EditSender,
            FrameStats, GeometryDesc, GeometryType, LocaleId, MoleculeContainer, RecordingBackend, RenderAtomDesc,
            RenderBackend, SceneState, VertexFormat, ViewState, WhichChild,
        },
    };
}
