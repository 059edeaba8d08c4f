//! # Appearance Attributes
//!
//! The six appearance attribute components a batch is bucketed by, the live
//! store they are edited in, and the per-batch bindings that either reference
//! a live component or hold a cloned snapshot of it.
//!
//! ## Architecture
//!
//! - **values**: plain attribute values with structural equality
//! - **store**: live components, change counters and appearances
//! - **binding**: `LiveRef` / `Snapshot` tagged union and the per-batch set
//! - **gpu_block**: packed scalar state handed to the backend

pub mod values;
pub mod store;
pub mod binding;
pub mod gpu_block;

pub use values::*;
pub use store::{AttributeStore, LiveAttribute, Appearance};
pub use binding::{AttributeBinding, AttributeSet, BindingMatch, Sharing};
pub use gpu_block::{CachedScalars, MaterialBlock};

use bitflags::bitflags;

/// Attribute component kinds a batch is keyed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    /// Lighting material
    Material,
    /// Per-object base color and shade model
    Coloring,
    /// Transparency mode and blending
    Transparency,
    /// Polygon rasterization
    Polygon,
    /// Line rasterization
    Line,
    /// Point rasterization
    Point,
}

impl AttributeKind {
    /// Every kind, in slot order
    pub const ALL: [AttributeKind; 6] = [
        AttributeKind::Material,
        AttributeKind::Coloring,
        AttributeKind::Transparency,
        AttributeKind::Polygon,
        AttributeKind::Line,
        AttributeKind::Point,
    ];

    /// Slot index of this kind
    pub const fn index(self) -> usize {
        match self {
            AttributeKind::Material => 0,
            AttributeKind::Coloring => 1,
            AttributeKind::Transparency => 2,
            AttributeKind::Polygon => 3,
            AttributeKind::Line => 4,
            AttributeKind::Point => 5,
        }
    }

    /// Dirty bit of this kind
    pub const fn flag(self) -> DirtyAttrs {
        match self {
            AttributeKind::Material => DirtyAttrs::MATERIAL,
            AttributeKind::Coloring => DirtyAttrs::COLORING,
            AttributeKind::Transparency => DirtyAttrs::TRANSPARENCY,
            AttributeKind::Polygon => DirtyAttrs::POLYGON,
            AttributeKind::Line => DirtyAttrs::LINE,
            AttributeKind::Point => DirtyAttrs::POINT,
        }
    }
}

bitflags! {
    /// Attribute kinds that changed or differ between neighbors
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DirtyAttrs: u8 {
        /// Material differs
        const MATERIAL = 1 << 0;
        /// Coloring differs
        const COLORING = 1 << 1;
        /// Transparency differs
        const TRANSPARENCY = 1 << 2;
        /// Polygon attributes differ
        const POLYGON = 1 << 3;
        /// Line attributes differ
        const LINE = 1 << 4;
        /// Point attributes differ
        const POINT = 1 << 5;
    }
}

impl DirtyAttrs {
    /// Every component a batch keys on
    pub const RM_COMPONENTS: DirtyAttrs = DirtyAttrs::all();

    /// Kinds contained in this mask
    pub fn kinds(self) -> impl Iterator<Item = AttributeKind> {
        AttributeKind::ALL.into_iter().filter(move |kind| self.contains(kind.flag()))
    }
}
