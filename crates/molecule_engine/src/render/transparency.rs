//! # Transparent Sort Index
//!
//! Global index of transparent render atoms that are depth-sorted one by one
//! instead of being drawn batch by batch. Batches register and unregister
//! their atoms as they are added and removed; the renderer asks for the
//! entries sorted back-to-front for the current eye position.

use crate::foundation::collections::{AtomHandle, MoleculeHandle};
use crate::foundation::math::Point3;
use std::collections::HashMap;

/// One registered transparent atom
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransparentEntry {
    /// Registered atom
    pub atom: AtomHandle,
    /// Batch owning the atom
    pub molecule: MoleculeHandle,
    /// World-space centroid used as depth key
    pub centroid: Point3,
}

/// Index of depth-sorted transparent atoms
#[derive(Debug, Default)]
pub struct TransparentSortIndex {
    entries: HashMap<AtomHandle, TransparentEntry>,
}

impl TransparentSortIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `atom` (or move it to `molecule`)
    pub fn register(&mut self, atom: AtomHandle, molecule: MoleculeHandle, centroid: Point3) {
        self.entries.insert(atom, TransparentEntry { atom, molecule, centroid });
    }

    /// Unregister `atom`; returns whether it was registered
    pub fn unregister(&mut self, atom: AtomHandle) -> bool {
        self.entries.remove(&atom).is_some()
    }

    /// Whether `atom` is registered
    pub fn contains(&self, atom: AtomHandle) -> bool {
        self.entries.contains_key(&atom)
    }

    /// Registered entry of `atom`
    pub fn get(&self, atom: AtomHandle) -> Option<&TransparentEntry> {
        self.entries.get(&atom)
    }

    /// Number of registered atoms
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recompute every centroid; entries for which `centroid_of` yields
    /// `None` keep their previous depth key
    pub fn update_centroids(&mut self, mut centroid_of: impl FnMut(AtomHandle) -> Option<Point3>) {
        for entry in self.entries.values_mut() {
            if let Some(centroid) = centroid_of(entry.atom) {
                entry.centroid = centroid;
            }
        }
    }

    /// Entries ordered far-to-near from `eye`
    pub fn sorted_back_to_front(&self, eye: &Point3) -> Vec<TransparentEntry> {
        let mut sorted: Vec<(f32, TransparentEntry)> = self
            .entries
            .values()
            .map(|entry| (nalgebra::distance_squared(eye, &entry.centroid), *entry))
            .collect();
        // Far to near for correct alpha blending
        sorted.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        sorted.into_iter().map(|(_, entry)| entry).collect()
    }
}
