//! Handle types and arenas
//!
//! Every cross reference inside the batching engine is a generational
//! [`slotmap`] key. Batches, atoms and live attributes are owned by their
//! arena; links between them (ordering, pending queues, owner pointers) are
//! plain keys, so splicing and unlinking never fight the borrow checker.

pub use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Handle of a batch (render molecule) in the container arena
    pub struct MoleculeHandle;

    /// Handle of a render atom in the container arena
    pub struct AtomHandle;

    /// Handle of a live appearance in the attribute store
    pub struct AppearanceHandle;

    /// Handle of a live attribute component in the attribute store
    pub struct AttributeHandle;

    /// Handle of a shared transform array
    pub struct TransformHandle;

    /// Handle of a switch node controlling child visibility
    pub struct SwitchHandle;
}

/// Handle-based map using slot map for stable references
pub type HandleMap<K, T> = SlotMap<K, T>;
