//! # Molecule Container
//!
//! Owns every batch and atom, the global batch order, the partition chains
//! and the pending work queues, and drives the two-phase commit.
//!
//! ## Commit sequence
//!
//! 1. Drain producer edits
//! 2. Publish transform back buffers
//! 3. Re-bucket atoms whose stable attributes changed
//! 4. Re-evaluate sole-user batches (fallback, category change)
//! 5. Apply removals, then additions, of every queued batch
//! 6. Destroy batches left without atoms, free released atoms
//! 7. Link new batches into the global order
//! 8. Reprocess dirty batches and reorder them on material changes
//! 9. Recompute neighbor masks from the worklist

use super::edits::{EditQueue, EditSender, SceneEdit};
use super::stats::{BatchStats, CommitReport};
use crate::core::config::BatchingConfig;
use crate::foundation::collections::{AppearanceHandle, AtomHandle, MoleculeHandle, SlotMap};
use crate::foundation::logging::{debug, trace, warn};
use crate::render::attributes::{DirtyAttrs, Sharing};
use crate::render::display_list::DisplayListAllocator;
use crate::render::error::{BatchError, BatchResult};
use crate::render::molecule::atom::{RenderAtom, RenderAtomDesc};
use crate::render::molecule::batch::{CommitContext, MatchOutcome, RenderMolecule};
use crate::render::scene::{AtomKey, SceneState};
use crate::render::transparency::TransparentSortIndex;
use std::collections::{HashMap, VecDeque};

/// Borrowed view of the container used by the renderer walk
pub(crate) struct DrawParts<'a> {
    pub molecules: &'a SlotMap<MoleculeHandle, RenderMolecule>,
    pub atoms: &'a SlotMap<AtomHandle, RenderAtom>,
    pub display_lists: &'a mut DisplayListAllocator,
    pub transparent: &'a TransparentSortIndex,
    pub head: Option<MoleculeHandle>,
    pub sort_geometry: bool,
}

/// Owner of all batches and render atoms
pub struct MoleculeContainer {
    pub(crate) molecules: SlotMap<MoleculeHandle, RenderMolecule>,
    pub(crate) atoms: SlotMap<AtomHandle, RenderAtom>,

    pub(crate) head: Option<MoleculeHandle>,
    pub(crate) tail: Option<MoleculeHandle>,
    pub(crate) chain_heads: HashMap<AtomKey, MoleculeHandle>,

    needs_update: Vec<MoleculeHandle>,
    new_molecules: Vec<MoleculeHandle>,
    dirty_list: Vec<MoleculeHandle>,
    pub(crate) across_worklist: VecDeque<MoleculeHandle>,
    changed_appearances: Vec<(AppearanceHandle, DirtyAttrs)>,
    /// Unreleased atoms per appearance
    users: HashMap<AppearanceHandle, Vec<AtomHandle>>,
    released: Vec<AtomHandle>,

    pub(crate) display_lists: DisplayListAllocator,
    pub(crate) transparent: TransparentSortIndex,
    edits: EditQueue,
    pub(crate) config: BatchingConfig,
    pub(crate) report: CommitReport,
    stats: BatchStats,
}

impl MoleculeContainer {
    /// Create an empty container
    pub fn new(config: &BatchingConfig) -> Self {
        Self {
            molecules: SlotMap::with_capacity_and_key(config.initial_molecule_capacity),
            atoms: SlotMap::with_capacity_and_key(config.initial_atom_capacity),
            head: None,
            tail: None,
            chain_heads: HashMap::new(),
            needs_update: Vec::new(),
            new_molecules: Vec::new(),
            dirty_list: Vec::new(),
            across_worklist: VecDeque::new(),
            changed_appearances: Vec::new(),
            users: HashMap::new(),
            released: Vec::new(),
            display_lists: DisplayListAllocator::new(&config.display_lists),
            transparent: TransparentSortIndex::new(),
            edits: EditQueue::new(),
            config: config.clone(),
            report: CommitReport::default(),
            stats: BatchStats::default(),
        }
    }

    /// Register a render atom; it joins a batch once inserted
    pub fn spawn_atom(&mut self, desc: RenderAtomDesc) -> BatchResult<AtomHandle> {
        let atom = RenderAtom::from_desc(desc)?;
        let appearance = atom.appearance;
        let handle = self.atoms.insert(atom);
        if let Some(app) = appearance {
            self.users.entry(app).or_default().push(handle);
        }
        Ok(handle)
    }

    /// Producer handle for deferred edits
    pub fn edit_sender(&self) -> EditSender {
        self.edits.sender()
    }

    /// Edits waiting for the next commit
    pub fn pending_edits(&self) -> usize {
        self.edits.pending_count()
    }

    /// Find or create the batch `atom` belongs to and queue it there
    ///
    /// The batch the atom is already in (or on its way to) is tried first,
    /// so re-inserting an atom with unchanged attributes cancels a pending
    /// removal instead of moving it. Otherwise only the atom's partition
    /// chain is searched; a new batch is created when nothing matches.
    pub fn resolve_and_insert(&mut self, atom: AtomHandle, scene: &SceneState) -> BatchResult<MoleculeHandle> {
        let store = &scene.attributes;
        let entry = self.atoms.get(atom).filter(|e| !e.released).ok_or(BatchError::UnknownAtom)?;
        if let Some(app) = entry.appearance {
            if store.appearance(app).is_none() {
                return Err(BatchError::UnknownAppearance);
            }
        }
        if scene.transforms.current(entry.key.transform).is_none() {
            return Err(BatchError::UnknownTransform);
        }
        let key = entry.key;
        let owner = entry.owner;
        let pending = entry.added;

        if let Some(owner) = owner {
            if let Some(reload) = self.try_match(owner, atom, scene) {
                if let Some(pending) = pending.filter(|p| *p != owner) {
                    self.queue_remove(pending, atom);
                }
                self.queue_add(owner, atom);
                self.note_reload(owner, reload);
                return Ok(owner);
            }
        }
        if let Some(pending) = pending {
            if let Some(reload) = self.try_match(pending, atom, scene) {
                self.note_reload(pending, reload);
                return Ok(pending);
            }
            self.queue_remove(pending, atom);
        }
        if let Some(owner) = owner {
            self.queue_remove(owner, atom);
        }

        let mut cursor = self.chain_heads.get(&key).copied();
        while let Some(candidate) = cursor {
            if Some(candidate) != owner && Some(candidate) != pending {
                if let Some(reload) = self.try_match(candidate, atom, scene) {
                    self.queue_add(candidate, atom);
                    self.note_reload(candidate, reload);
                    return Ok(candidate);
                }
            }
            cursor = self.molecules.get(candidate).and_then(|m| m.next_map);
        }

        let created = self.create_molecule(atom, scene)?;
        self.queue_add(created, atom);
        Ok(created)
    }

    /// Queue `atom` for removal from its batch
    pub fn remove_render_atom(&mut self, atom: AtomHandle) -> BatchResult<()> {
        let entry = self.atoms.get(atom).ok_or(BatchError::UnknownAtom)?;
        let (owner, pending) = (entry.owner, entry.added);
        if let Some(pending) = pending {
            self.queue_remove(pending, atom);
        }
        if let Some(owner) = owner {
            self.queue_remove(owner, atom);
        }
        Ok(())
    }

    /// Remove `atom` and free it once it left its batch
    pub fn release_atom(&mut self, atom: AtomHandle) -> BatchResult<()> {
        self.remove_render_atom(atom)?;
        let Some(entry) = self.atoms.get_mut(atom) else {
            return Err(BatchError::UnknownAtom);
        };
        entry.released = true;
        let appearance = entry.appearance;
        let settled = entry.owner.is_none() && entry.added.is_none();
        if let Some(app) = appearance {
            if let Some(users) = self.users.get_mut(&app) {
                users.retain(|user| *user != atom);
                if users.is_empty() {
                    self.users.remove(&app);
                }
            }
        }
        if settled {
            self.atoms.remove(atom);
        } else {
            self.released.push(atom);
        }
        Ok(())
    }

    /// Record that the components in `mask` of `appearance` changed
    ///
    /// Batches bound to the changed components by reference are marked
    /// dirty at the next commit; atoms whose batch holds a snapshot of a
    /// changed component are re-bucketed.
    pub fn attribute_changed(&mut self, appearance: AppearanceHandle, mask: DirtyAttrs) {
        if !mask.is_empty() {
            self.changed_appearances.push((appearance, mask));
        }
    }

    /// Run the commit phase
    pub fn commit(&mut self, scene: &mut SceneState) -> CommitReport {
        self.drain_edits(scene);
        scene.transforms.swap();
        let scene: &SceneState = scene;

        self.process_attribute_changes(scene);
        self.reevaluate_sole_users(scene);
        self.apply_pending(scene);
        self.sweep_released();
        self.link_new_molecules(scene);
        self.process_dirty(scene);
        self.drain_across_worklist(scene);

        let atoms = &self.atoms;
        self.transparent.update_centroids(|handle| {
            let atom = atoms.get(handle)?;
            let model = scene.transforms.current(atom.key.transform)?;
            Some(atom.centroid(model))
        });

        let report = std::mem::take(&mut self.report);
        self.stats.accumulate(&report);
        if !report.is_quiet() {
            trace!("Commit: {:?}", report);
        }
        report
    }

    fn drain_edits(&mut self, scene: &SceneState) {
        for edit in self.edits.drain() {
            self.report.edits_drained += 1;
            let result = match edit {
                SceneEdit::Insert(atom) => self.resolve_and_insert(atom, scene).map(|_| ()),
                SceneEdit::Remove(atom) => self.remove_render_atom(atom),
                SceneEdit::Release(atom) => self.release_atom(atom),
                SceneEdit::AttributeChanged { appearance, mask } => {
                    self.attribute_changed(appearance, mask);
                    Ok(())
                }
            };
            if let Err(err) = result {
                warn!("Dropping scene edit {:?}: {}", edit, err);
                self.report.dropped_atoms += 1;
            }
        }
    }

    fn process_attribute_changes(&mut self, scene: &SceneState) {
        for (appearance, mask) in std::mem::take(&mut self.changed_appearances) {
            let users: Vec<(AtomHandle, MoleculeHandle)> = self
                .users
                .get(&appearance)
                .into_iter()
                .flatten()
                .filter_map(|handle| {
                    let batch = self.atoms.get(*handle)?.target_batch()?;
                    Some((*handle, batch))
                })
                .collect();

            for (atom, batch) in users {
                let Some(molecule) = self.molecules.get(batch) else {
                    continue;
                };
                let exclusive = molecule.sharing == Sharing::Exclusive(appearance);
                let snapshot_kinds = mask & !molecule.attrs.live_mask();
                if exclusive || snapshot_kinds.is_empty() {
                    self.note_reload(batch, mask);
                } else {
                    self.rebucket_atom(atom, scene);
                }
            }
        }
    }

    fn reevaluate_sole_users(&mut self, scene: &SceneState) {
        let store = &scene.attributes;
        let candidates: Vec<MoleculeHandle> = self.dirty_list.clone();
        for handle in candidates {
            let Some(molecule) = self.molecules.get_mut(handle) else {
                continue;
            };
            let Sharing::Exclusive(app) = molecule.sharing else {
                continue;
            };

            if store.appearance(app).is_none() || store.frequent_mask(Some(app)).is_empty() {
                molecule.fall_back_to_shared(store);
                self.report.sole_user_fallbacks += 1;
                debug!("Render molecule {:?} is no longer a sole user", handle);
                self.migrate_to_equivalent(handle, scene);
            } else if molecule.current_category(store) != molecule.category() {
                debug!("Render molecule {:?} changed render category, re-bucketing", handle);
                for atom in self.members(handle) {
                    self.rebucket_atom(atom, scene);
                }
            }
        }
    }

    /// Move every member of a former sole-user batch into an equivalent
    /// shared batch of the same partition chain, if one exists
    fn migrate_to_equivalent(&mut self, handle: MoleculeHandle, scene: &SceneState) {
        let members = self.members(handle);
        let Some(&representative) = members.first() else {
            return;
        };
        let Some(key) = self.molecules.get(handle).map(|m| *m.key()) else {
            return;
        };

        let mut cursor = self.chain_heads.get(&key).copied();
        let mut target = None;
        while let Some(candidate) = cursor {
            let shared = self.molecules.get(candidate).is_some_and(|m| m.sharing == Sharing::Shared);
            if candidate != handle && shared && self.try_match(candidate, representative, scene).is_some() {
                target = Some(candidate);
                break;
            }
            cursor = self.molecules.get(candidate).and_then(|m| m.next_map);
        }

        if let Some(target) = target {
            for atom in members {
                self.queue_remove(handle, atom);
                self.queue_add(target, atom);
                self.report.rebucketed_atoms += 1;
            }
            debug!("Migrated atoms of {:?} into equivalent molecule {:?}", handle, target);
        }
    }

    fn apply_pending(&mut self, scene: &SceneState) {
        let queued = std::mem::take(&mut self.needs_update);
        {
            let mut cx = CommitContext {
                atoms: &mut self.atoms,
                scene,
                display_lists: &mut self.display_lists,
                transparent: &mut self.transparent,
                report: &mut self.report,
                sort_geometry: self.config.sorts_geometry(),
            };
            for handle in &queued {
                if let Some(molecule) = self.molecules.get_mut(*handle) {
                    molecule.apply_removals(*handle, &mut cx);
                }
            }
            for handle in &queued {
                if let Some(molecule) = self.molecules.get_mut(*handle) {
                    molecule.apply_additions(*handle, &mut cx);
                    molecule.queued_update = false;
                }
            }
        }

        for handle in queued {
            let empty = self
                .molecules
                .get(handle)
                .is_some_and(|m| m.num_render_atoms() == 0 && !m.has_pending());
            if empty {
                self.destroy_molecule(handle, scene);
            }
        }
    }

    fn destroy_molecule(&mut self, handle: MoleculeHandle, scene: &SceneState) {
        self.unlink_order(handle);
        self.unlink_chain(handle);
        let Some(mut molecule) = self.molecules.remove(handle) else {
            return;
        };
        let mut cx = CommitContext {
            atoms: &mut self.atoms,
            scene,
            display_lists: &mut self.display_lists,
            transparent: &mut self.transparent,
            report: &mut self.report,
            sort_geometry: self.config.sorts_geometry(),
        };
        molecule.release_display_lists(&mut cx);
        self.report.molecules_destroyed += 1;
        debug!("Destroyed render molecule {:?}", handle);
    }

    fn sweep_released(&mut self) {
        let atoms = &mut self.atoms;
        self.released.retain(|handle| {
            let settled = atoms
                .get(*handle)
                .map(|atom| atom.owner.is_none() && atom.added.is_none());
            match settled {
                Some(true) => {
                    atoms.remove(*handle);
                    false
                }
                Some(false) => true,
                None => false,
            }
        });
    }

    fn link_new_molecules(&mut self, scene: &SceneState) {
        for handle in std::mem::take(&mut self.new_molecules) {
            if self.molecules.get(handle).is_some_and(|m| !m.linked) {
                self.link_new_molecule(handle, scene);
            }
        }
    }

    fn process_dirty(&mut self, scene: &SceneState) {
        let reorder = self.config.reorder_on_material_change;
        for handle in std::mem::take(&mut self.dirty_list) {
            let changed = {
                let Some(molecule) = self.molecules.get_mut(handle) else {
                    continue;
                };
                molecule.queued_dirty = false;
                let changed = molecule.refresh_attributes(&scene.attributes);
                let mut cx = CommitContext {
                    atoms: &mut self.atoms,
                    scene,
                    display_lists: &mut self.display_lists,
                    transparent: &mut self.transparent,
                    report: &mut self.report,
                    sort_geometry: self.config.sorts_geometry(),
                };
                molecule.update_transparency(handle, &mut cx);
                changed
            };
            self.report.dirty_processed += 1;
            if changed.is_empty() {
                continue;
            }

            self.push_across(handle);
            if let Some(next) = self.molecules.get(handle).and_then(|m| m.next) {
                self.push_across(next);
            }
            if reorder && changed.contains(DirtyAttrs::MATERIAL) {
                self.handle_material_equivalence(handle, scene);
            }
        }
    }

    fn create_molecule(&mut self, atom: AtomHandle, scene: &SceneState) -> BatchResult<MoleculeHandle> {
        let entry = self.atoms.get(atom).ok_or(BatchError::UnknownAtom)?;
        let molecule = RenderMolecule::new(entry, &scene.attributes);
        debug!(
            "Creating render molecule: {:?} {:?} ({} kinds by reference)",
            molecule.category(),
            molecule.sharing(),
            molecule.attributes().live_mask().bits().count_ones()
        );
        let key = *molecule.key();
        let handle = self.molecules.insert(molecule);
        self.link_chain(handle, key);
        self.new_molecules.push(handle);
        self.report.molecules_created += 1;
        Ok(handle)
    }

    fn rebucket_atom(&mut self, atom: AtomHandle, scene: &SceneState) {
        let before = self.atoms.get(atom).and_then(RenderAtom::target_batch);
        match self.resolve_and_insert(atom, scene) {
            Ok(after) if Some(after) != before => self.report.rebucketed_atoms += 1,
            Ok(_) => {}
            Err(err) => {
                warn!("Dropping atom {:?} during re-bucketing: {}", atom, err);
                let _ = self.remove_render_atom(atom);
                self.report.dropped_atoms += 1;
            }
        }
    }

    fn try_match(&self, molecule: MoleculeHandle, atom: AtomHandle, scene: &SceneState) -> Option<DirtyAttrs> {
        let molecule = self.molecules.get(molecule)?;
        let atom = self.atoms.get(atom)?;
        match molecule.matches(atom, &scene.attributes) {
            MatchOutcome::Match { reload } => Some(reload),
            MatchOutcome::NoMatch => None,
        }
    }

    fn members(&self, handle: MoleculeHandle) -> Vec<AtomHandle> {
        let Some(molecule) = self.molecules.get(handle) else {
            return Vec::new();
        };
        let mut members = molecule.owned_atoms();
        members.extend(molecule.pending_additions(&self.atoms));
        members
    }

    fn queue_add(&mut self, handle: MoleculeHandle, atom: AtomHandle) {
        let Some(molecule) = self.molecules.get_mut(handle) else {
            return;
        };
        if molecule.add_render_atom(handle, &mut self.atoms, atom) {
            self.queue_update(handle);
        }
    }

    fn queue_remove(&mut self, handle: MoleculeHandle, atom: AtomHandle) {
        let Some(molecule) = self.molecules.get_mut(handle) else {
            return;
        };
        if molecule.remove_render_atom(handle, &mut self.atoms, atom) {
            self.queue_update(handle);
        }
    }

    fn queue_update(&mut self, handle: MoleculeHandle) {
        if let Some(molecule) = self.molecules.get_mut(handle) {
            if !molecule.queued_update {
                molecule.queued_update = true;
                self.needs_update.push(handle);
            }
        }
    }

    fn note_reload(&mut self, handle: MoleculeHandle, reload: DirtyAttrs) {
        if reload.is_empty() {
            return;
        }
        if let Some(molecule) = self.molecules.get_mut(handle) {
            molecule.dirty |= reload;
            if !molecule.queued_dirty {
                molecule.queued_dirty = true;
                self.dirty_list.push(handle);
            }
        }
    }

    pub(crate) fn draw_parts(&mut self) -> DrawParts<'_> {
        DrawParts {
            molecules: &self.molecules,
            atoms: &self.atoms,
            display_lists: &mut self.display_lists,
            transparent: &self.transparent,
            head: self.head,
            sort_geometry: self.config.sorts_geometry(),
        }
    }

    /// Batch by handle
    pub fn molecule(&self, handle: MoleculeHandle) -> Option<&RenderMolecule> {
        self.molecules.get(handle)
    }

    /// Atom by handle
    pub fn atom(&self, handle: AtomHandle) -> Option<&RenderAtom> {
        self.atoms.get(handle)
    }

    /// Batch the atom will belong to after the next commit
    pub fn batch_of(&self, atom: AtomHandle) -> Option<MoleculeHandle> {
        self.atoms.get(atom).and_then(RenderAtom::target_batch)
    }

    /// Unreleased atoms bound to `appearance`
    pub fn appearance_users(&self, appearance: AppearanceHandle) -> &[AtomHandle] {
        self.users.get(&appearance).map_or(&[], Vec::as_slice)
    }

    /// Number of live batches, zombies included
    pub fn molecule_count(&self) -> usize {
        self.molecules.len()
    }

    /// Number of registered atoms
    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    /// Every batch with its handle, in arena order
    pub fn molecules(&self) -> impl Iterator<Item = (MoleculeHandle, &RenderMolecule)> {
        self.molecules.iter()
    }

    /// Batches in global render order
    pub fn iter_ordered(&self) -> impl Iterator<Item = (MoleculeHandle, &RenderMolecule)> {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let handle = cursor?;
            let molecule = self.molecules.get(handle)?;
            cursor = molecule.next;
            Some((handle, molecule))
        })
    }

    /// Handles in global render order
    pub fn ordered_handles(&self) -> Vec<MoleculeHandle> {
        self.iter_ordered().map(|(handle, _)| handle).collect()
    }

    /// Display-list allocator
    pub fn display_lists(&self) -> &DisplayListAllocator {
        &self.display_lists
    }

    /// Transparent sort index
    pub fn transparent_index(&self) -> &TransparentSortIndex {
        &self.transparent
    }

    /// Batching configuration
    pub fn config(&self) -> &BatchingConfig {
        &self.config
    }

    /// Enable or disable neighbor reordering on material changes
    pub fn set_reordering(&mut self, enabled: bool) {
        self.config.reorder_on_material_change = enabled;
    }

    /// Cumulative statistics
    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }
}
