//! Global batch order and neighbor equivalence
//!
//! Batches are kept in one doubly linked order (handles in `prev`/`next`)
//! that the renderer walks once per frame. Each batch records which attribute
//! kinds differ from its left neighbor, so the walk reloads only those.
//! When a batch's material changes it looks for a batch with an equal
//! material and splices itself next to it; the first match wins, searching
//! left before right.
//!
//! Batches sharing a structural key are additionally chained through
//! `prev_map`/`next_map`, which is all find-or-create ever walks.

use super::container::MoleculeContainer;
use crate::foundation::collections::MoleculeHandle;
use crate::foundation::logging::debug;
use crate::render::attributes::{AttributeKind, DirtyAttrs};
use crate::render::scene::{AtomKey, SceneState};

impl MoleculeContainer {
    /// Insert `handle` right after `anchor`, or at the head when `anchor`
    /// is `None`
    pub(crate) fn link_after(&mut self, handle: MoleculeHandle, anchor: Option<MoleculeHandle>) {
        let next = match anchor {
            Some(anchor) => self.molecules.get(anchor).and_then(|m| m.next),
            None => self.head,
        };
        if let Some(molecule) = self.molecules.get_mut(handle) {
            molecule.prev = anchor;
            molecule.next = next;
            molecule.linked = true;
        }
        match anchor.and_then(|anchor| self.molecules.get_mut(anchor)) {
            Some(prev) => prev.next = Some(handle),
            None => self.head = Some(handle),
        }
        match next.and_then(|next| self.molecules.get_mut(next)) {
            Some(next) => next.prev = Some(handle),
            None => self.tail = Some(handle),
        }
    }

    /// Insert `handle` right before `anchor`
    pub(crate) fn link_before(&mut self, handle: MoleculeHandle, anchor: MoleculeHandle) {
        let prev = self.molecules.get(anchor).and_then(|m| m.prev);
        self.link_after(handle, prev);
    }

    /// Take `handle` out of the global order
    ///
    /// The old right neighbor gets a new left neighbor and is queued for a
    /// mask recomputation.
    pub(crate) fn unlink_order(&mut self, handle: MoleculeHandle) {
        let Some(molecule) = self.molecules.get_mut(handle) else {
            return;
        };
        if !molecule.linked {
            return;
        }
        let (prev, next) = (molecule.prev, molecule.next);
        molecule.prev = None;
        molecule.next = None;
        molecule.linked = false;

        match prev.and_then(|prev| self.molecules.get_mut(prev)) {
            Some(prev) => prev.next = next,
            None => self.head = next,
        }
        match next.and_then(|next| self.molecules.get_mut(next)) {
            Some(next) => next.prev = prev,
            None => self.tail = prev,
        }
        if let Some(next) = next {
            self.push_across(next);
        }
    }

    /// Put a new batch at the head of its partition chain
    pub(crate) fn link_chain(&mut self, handle: MoleculeHandle, key: AtomKey) {
        let old_head = self.chain_heads.insert(key, handle);
        if let Some(molecule) = self.molecules.get_mut(handle) {
            molecule.prev_map = None;
            molecule.next_map = old_head;
        }
        if let Some(old) = old_head.and_then(|old| self.molecules.get_mut(old)) {
            old.prev_map = Some(handle);
        }
    }

    /// Take `handle` out of its partition chain
    pub(crate) fn unlink_chain(&mut self, handle: MoleculeHandle) {
        let Some(molecule) = self.molecules.get_mut(handle) else {
            return;
        };
        let key = *molecule.key();
        let (prev, next) = (molecule.prev_map.take(), molecule.next_map.take());

        match prev.and_then(|prev| self.molecules.get_mut(prev)) {
            Some(prev) => prev.next_map = next,
            None => match next {
                Some(next) => {
                    self.chain_heads.insert(key, next);
                }
                None => {
                    self.chain_heads.remove(&key);
                }
            },
        }
        if let Some(next) = next.and_then(|next| self.molecules.get_mut(next)) {
            next.prev_map = prev;
        }
    }

    /// Link a batch created since the last commit into the global order
    ///
    /// With reordering enabled the batch lands right after the nearest
    /// material-equivalent batch searching left from the tail; otherwise, or
    /// when none exists, it is appended.
    pub(crate) fn link_new_molecule(&mut self, handle: MoleculeHandle, scene: &SceneState) {
        let mut anchor = self.tail;
        if self.config.reorder_on_material_change {
            let mut cursor = self.tail;
            while let Some(candidate) = cursor {
                if self.materials_equal(candidate, handle, scene) {
                    anchor = Some(candidate);
                    break;
                }
                cursor = self.molecules.get(candidate).and_then(|m| m.prev);
            }
        }
        self.link_after(handle, anchor);
        self.push_across(handle);
        if let Some(next) = self.molecules.get(handle).and_then(|m| m.next) {
            self.push_across(next);
        }
    }

    /// Attribute kinds whose value differs between `handle` and its left
    /// neighbor; empty for the head of the order
    pub fn check_equivalence_with_left_neighbor(&self, handle: MoleculeHandle, scene: &SceneState) -> DirtyAttrs {
        let Some(molecule) = self.molecules.get(handle) else {
            return DirtyAttrs::empty();
        };
        match molecule.prev.and_then(|prev| self.molecules.get(prev)) {
            Some(prev) => molecule.attributes().differences(prev.attributes(), &scene.attributes),
            None => DirtyAttrs::empty(),
        }
    }

    /// Splice `handle` next to a batch with an equal material
    ///
    /// Nothing moves when an immediate neighbor already has an equal
    /// material. Otherwise the order is searched left beyond the left
    /// neighbor, then right beyond the right neighbor, and the batch is
    /// re-inserted after a left match or before a right match. Returns
    /// whether the batch moved.
    pub(crate) fn handle_material_equivalence(&mut self, handle: MoleculeHandle, scene: &SceneState) -> bool {
        let Some(molecule) = self.molecules.get(handle) else {
            return false;
        };
        if !molecule.linked {
            return false;
        }
        let (prev, next) = (molecule.prev, molecule.next);
        if prev.is_some_and(|p| self.materials_equal(p, handle, scene))
            || next.is_some_and(|n| self.materials_equal(n, handle, scene))
        {
            return false;
        }

        let mut cursor = prev.and_then(|p| self.molecules.get(p)).and_then(|m| m.prev);
        while let Some(candidate) = cursor {
            if self.materials_equal(candidate, handle, scene) {
                self.unlink_order(handle);
                self.link_after(handle, Some(candidate));
                self.finish_splice(handle, candidate);
                return true;
            }
            cursor = self.molecules.get(candidate).and_then(|m| m.prev);
        }

        let mut cursor = next.and_then(|n| self.molecules.get(n)).and_then(|m| m.next);
        while let Some(candidate) = cursor {
            if self.materials_equal(candidate, handle, scene) {
                self.unlink_order(handle);
                self.link_before(handle, candidate);
                self.finish_splice(handle, candidate);
                return true;
            }
            cursor = self.molecules.get(candidate).and_then(|m| m.next);
        }
        false
    }

    fn finish_splice(&mut self, handle: MoleculeHandle, matched: MoleculeHandle) {
        self.push_across(handle);
        if let Some(next) = self.molecules.get(handle).and_then(|m| m.next) {
            self.push_across(next);
        }
        self.report.splices += 1;
        debug!("Spliced render molecule {:?} next to {:?}", handle, matched);
    }

    fn materials_equal(&self, a: MoleculeHandle, b: MoleculeHandle, scene: &SceneState) -> bool {
        match (self.molecules.get(a), self.molecules.get(b)) {
            (Some(a), Some(b)) => {
                let store = &scene.attributes;
                a.attributes().resolve(AttributeKind::Material, store)
                    == b.attributes().resolve(AttributeKind::Material, store)
            }
            _ => false,
        }
    }

    /// Queue a neighbor-mask recomputation for `handle`, once
    pub(crate) fn push_across(&mut self, handle: MoleculeHandle) {
        if let Some(molecule) = self.molecules.get_mut(handle) {
            if !molecule.queued_across {
                molecule.queued_across = true;
                self.across_worklist.push_back(handle);
            }
        }
    }

    /// Recompute the neighbor mask of every queued batch
    ///
    /// Each batch is queued at most once, so the worklist is bounded by the
    /// number of batches.
    pub(crate) fn drain_across_worklist(&mut self, scene: &SceneState) {
        while let Some(handle) = self.across_worklist.pop_front() {
            let across = self.check_equivalence_with_left_neighbor(handle, scene);
            if let Some(molecule) = self.molecules.get_mut(handle) {
                molecule.queued_across = false;
                molecule.dirty_attrs_across = across;
            }
        }
    }
}
