//! Error types of the batching engine

use crate::render::attributes::AttributeKind;
use crate::render::display_list::DisplayListId;

/// Result type for batching operations
pub type BatchResult<T> = Result<T, BatchError>;

/// Errors that can occur while batching or rendering
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The atom handle is stale or was never issued
    #[error("Unknown render atom")]
    UnknownAtom,

    /// The batch handle is stale or was never issued
    #[error("Unknown render molecule")]
    UnknownMolecule,

    /// The appearance handle is stale or was never issued
    #[error("Unknown appearance")]
    UnknownAppearance,

    /// The attribute handle is stale or was never issued
    #[error("Unknown attribute component")]
    UnknownAttribute,

    /// The transform handle is stale or was never issued
    #[error("Unknown transform array")]
    UnknownTransform,

    /// The switch handle is stale or was never issued
    #[error("Unknown switch")]
    UnknownSwitch,

    /// An attribute value of the wrong kind was bound or written
    #[error("Attribute kind mismatch: expected {expected:?}, found {found:?}")]
    AttributeKindMismatch {
        /// Kind of the slot or component
        expected: AttributeKind,
        /// Kind of the value supplied
        found: AttributeKind,
    },

    /// A render atom was described without any geometry
    #[error("Render atom has no geometry")]
    EmptyGeometry,

    /// A geometry differs in primitive class or vertex layout from the
    /// first geometry of its atom
    #[error("Geometry {index} is incompatible with the first geometry of its atom")]
    IncompatibleGeometry {
        /// Position of the offending geometry
        index: usize,
    },

    /// No display-list id is left in the budget
    #[error("Display list budget exhausted ({capacity} ids)")]
    DisplayListsExhausted {
        /// Configured budget
        capacity: u32,
    },

    /// A display-list id was returned twice
    #[error("Display list {0:?} freed twice")]
    DisplayListDoubleFree(DisplayListId),

    /// A display-list id that the allocator never issued
    #[error("Unknown display list {0:?}")]
    UnknownDisplayList(DisplayListId),

    /// The context id is outside the configured context range
    #[error("Invalid rendering context {0}")]
    InvalidContext(u8),

    /// The consumer side of the edit queue is gone
    #[error("Edit queue closed")]
    EditQueueClosed,
}
