//! # Render Molecule
//!
//! A render molecule (batch) groups render atoms that can be drawn with one
//! GPU state. It owns the defining attribute bindings of that state, three
//! sublists of atom geometries and the intrusive pending add/remove lists
//! that decouple scene edits from the authoritative sublists.
//!
//! ## Lifecycle
//!
//! - Created by the container when no batch of the atom's partition chain
//!   matches the atom
//! - Edited only through [`RenderMolecule::add_render_atom`] and
//!   [`RenderMolecule::remove_render_atom`], which queue
//! - Mutated only at commit, by [`RenderMolecule::apply_removals`] followed by
//!   [`RenderMolecule::apply_additions`]
//! - Destroyed by the container when it holds no atom after a commit
//!
//! ## Sublists
//!
//! Shareable geometries go to the primary sublist and are replayed through a
//! single display list. Under geometry sorting, transparent batches compile
//! one display list per geometry instead (separate sublist). Everything that
//! cannot be compiled (billboards, shared-group instances, geometry edited in
//! place, dynamically indexed colors under blending) is replayed from vertex
//! arrays.

use super::atom::{AtomFlags, ListBucket, PendingList, PendingQueue, RenderAtom};
use crate::foundation::collections::{AppearanceHandle, AtomHandle, MoleculeHandle, SlotMap};
use crate::foundation::logging::{debug, warn};
use crate::foundation::math::Aabb;
use crate::render::attributes::{
    AttributeKind, AttributeSet, AttributeStore, BindingMatch, CachedScalars, DirtyAttrs, Sharing,
};
use crate::render::batching::stats::CommitReport;
use crate::render::display_list::{DisplayListAllocator, DisplayListId, ListOwner};
use crate::render::geometry::{GeometryDesc, GeometryType, RenderCategory, VertexFormat};
use crate::render::scene::{AtomKey, SceneState};
use crate::render::transparency::TransparentSortIndex;
use std::collections::HashSet;

/// Result of testing an atom against a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The atom can join; `reload` lists kinds the batch must reload first
    Match {
        /// Deferred live edits detected while matching
        reload: DirtyAttrs,
    },
    /// The atom belongs to another batch
    NoMatch,
}

/// How the primary sublist of a batch is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryMode {
    /// One display list for the whole primary sublist
    SharedDisplayList,
    /// One display list per atom geometry
    SeparatePerAtom,
    /// No display list; vertex arrays are replayed every frame
    VertexArray,
}

/// One geometry of one atom in a batch sublist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListEntry {
    /// Atom
    pub atom: AtomHandle,
    /// Index into the atom's geometries
    pub geometry: usize,
}

/// Mutable state the apply phase works on
pub(crate) struct CommitContext<'a> {
    pub atoms: &'a mut SlotMap<AtomHandle, RenderAtom>,
    pub scene: &'a SceneState,
    pub display_lists: &'a mut DisplayListAllocator,
    pub transparent: &'a mut TransparentSortIndex,
    pub report: &'a mut CommitReport,
    pub sort_geometry: bool,
}

/// A batch of render atoms sharing one GPU state
#[derive(Debug)]
pub struct RenderMolecule {
    key: AtomKey,
    category: RenderCategory,
    vertex_format: VertexFormat,
    tex_coord_set_len: u32,
    pub(crate) attrs: AttributeSet,
    pub(crate) sharing: Sharing,
    pub(crate) cached: CachedScalars,

    /// Kinds with a deferred live edit to pick up at the next commit
    pub(crate) dirty: DirtyAttrs,
    /// Kinds whose value differs from the left neighbor
    pub(crate) dirty_attrs_across: DirtyAttrs,

    num_render_atoms: usize,
    num_editing_render_atoms: usize,
    pub(crate) primary: Vec<ListEntry>,
    pub(crate) separate: Vec<ListEntry>,
    pub(crate) vertex_array: Vec<ListEntry>,
    pending_add: PendingList,
    pending_remove: PendingList,

    pub(crate) prev: Option<MoleculeHandle>,
    pub(crate) next: Option<MoleculeHandle>,
    pub(crate) prev_map: Option<MoleculeHandle>,
    pub(crate) next_map: Option<MoleculeHandle>,
    pub(crate) linked: bool,

    primary_mode: PrimaryMode,
    primary_changed: bool,
    pub(crate) display_list: Option<DisplayListId>,
    bounds: Option<Aabb>,
    opaque_or_in_og: bool,
    blending: bool,

    pub(crate) queued_update: bool,
    pub(crate) queued_dirty: bool,
    pub(crate) queued_across: bool,
}

impl RenderMolecule {
    /// Create an empty batch whose signature is taken from `atom`
    pub fn new(atom: &RenderAtom, store: &AttributeStore) -> Self {
        let attrs = AttributeSet::capture(store, atom.appearance);
        let cached = CachedScalars::from_attributes(&attrs, store);
        let blending = blending_enabled(&attrs, store);
        Self {
            key: atom.key,
            category: atom.category(store),
            vertex_format: atom.vertex_format,
            tex_coord_set_len: atom.tex_coord_set_len,
            sharing: Sharing::decide(store, atom.appearance),
            cached,
            attrs,
            dirty: DirtyAttrs::empty(),
            dirty_attrs_across: DirtyAttrs::empty(),
            num_render_atoms: 0,
            num_editing_render_atoms: 0,
            primary: Vec::new(),
            separate: Vec::new(),
            vertex_array: Vec::new(),
            pending_add: PendingList::default(),
            pending_remove: PendingList::default(),
            prev: None,
            next: None,
            prev_map: None,
            next_map: None,
            linked: false,
            primary_mode: PrimaryMode::SharedDisplayList,
            primary_changed: false,
            display_list: None,
            bounds: None,
            opaque_or_in_og: atom.key.in_ordered_group || !blending,
            blending,
            queued_update: false,
            queued_dirty: false,
            queued_across: false,
        }
    }

    /// Test whether `atom` can join this batch
    ///
    /// Structural keys, render category and vertex layout must match exactly.
    /// A sole-user batch accepts only atoms of its own appearance; any
    /// divergence of that appearance is a deferred edit reported as `reload`.
    /// Shared batches compare every attribute kind through its binding.
    pub fn matches(&self, atom: &RenderAtom, store: &AttributeStore) -> MatchOutcome {
        if self.key != atom.key
            || self.vertex_format != atom.vertex_format
            || self.tex_coord_set_len != atom.tex_coord_set_len
            || self.category != atom.category(store)
        {
            return MatchOutcome::NoMatch;
        }

        let frequent = !store.frequent_mask(atom.appearance).is_empty();
        match self.sharing {
            Sharing::Exclusive(app) => {
                if atom.appearance == Some(app) {
                    MatchOutcome::Match { reload: self.attrs.staleness(store, Some(app)) }
                } else {
                    MatchOutcome::NoMatch
                }
            }
            Sharing::Shared if frequent => MatchOutcome::NoMatch,
            Sharing::Shared => {
                let mut reload = DirtyAttrs::empty();
                for kind in AttributeKind::ALL {
                    match self.attrs.compare(kind, store, store.component_of(atom.appearance, kind)) {
                        BindingMatch::Equal => {}
                        BindingMatch::Stale => reload |= kind.flag(),
                        BindingMatch::Mismatch => return MatchOutcome::NoMatch,
                    }
                }
                MatchOutcome::Match { reload }
            }
        }
    }

    /// Queue `atom` for addition; returns whether anything was queued
    ///
    /// An atom pending removal from this batch has its removal cancelled
    /// instead, so a remove followed by a re-add is a no-op.
    pub(crate) fn add_render_atom(
        &mut self,
        this: MoleculeHandle,
        atoms: &mut SlotMap<AtomHandle, RenderAtom>,
        atom: AtomHandle,
    ) -> bool {
        let Some(entry) = atoms.get(atom) else {
            return false;
        };
        if entry.removed == Some(this) {
            self.pending_remove.unlink(atoms, PendingQueue::Remove, atom);
            if let Some(entry) = atoms.get_mut(atom) {
                entry.removed = None;
            }
            return true;
        }
        if entry.added == Some(this) || entry.owner == Some(this) {
            return false;
        }
        self.pending_add.push(atoms, PendingQueue::Add, atom);
        if let Some(entry) = atoms.get_mut(atom) {
            entry.added = Some(this);
        }
        true
    }

    /// Queue `atom` for removal; returns whether anything was queued
    ///
    /// An atom still pending addition is simply dequeued.
    pub(crate) fn remove_render_atom(
        &mut self,
        this: MoleculeHandle,
        atoms: &mut SlotMap<AtomHandle, RenderAtom>,
        atom: AtomHandle,
    ) -> bool {
        let Some(entry) = atoms.get(atom) else {
            return false;
        };
        if entry.added == Some(this) {
            self.pending_add.unlink(atoms, PendingQueue::Add, atom);
            if let Some(entry) = atoms.get_mut(atom) {
                entry.added = None;
            }
            return true;
        }
        if entry.owner == Some(this) && entry.removed.is_none() {
            self.pending_remove.push(atoms, PendingQueue::Remove, atom);
            if let Some(entry) = atoms.get_mut(atom) {
                entry.removed = Some(this);
            }
            return true;
        }
        false
    }

    /// Take the pending removals out of the sublists
    pub(crate) fn apply_removals(&mut self, this: MoleculeHandle, cx: &mut CommitContext<'_>) {
        let removed = self.pending_remove.drain(cx.atoms, PendingQueue::Remove);
        if removed.is_empty() {
            return;
        }

        let mut gone = HashSet::with_capacity(removed.len());
        for atom in removed {
            let Some(entry) = cx.atoms.get_mut(atom) else {
                continue;
            };
            entry.removed = None;
            if entry.owner != Some(this) {
                continue;
            }
            entry.owner = None;
            if entry.is_editing() {
                self.num_editing_render_atoms = self.num_editing_render_atoms.saturating_sub(1);
            }
            for info in &mut entry.geometries {
                if let Some(id) = info.separate_dl.take() {
                    release_list(cx.display_lists, id);
                }
                info.bucket = None;
            }
            cx.transparent.unregister(atom);
            self.num_render_atoms = self.num_render_atoms.saturating_sub(1);
            cx.report.atoms_removed += 1;
            gone.insert(atom);
        }

        let before = self.primary.len();
        self.primary.retain(|entry| !gone.contains(&entry.atom));
        self.primary_changed |= self.primary.len() != before;
        self.separate.retain(|entry| !gone.contains(&entry.atom));
        self.vertex_array.retain(|entry| !gone.contains(&entry.atom));
        self.recompute_bounds(cx.atoms);
    }

    /// Move the pending additions into the sublists
    ///
    /// Runs for every queued batch, even without additions, so display-list
    /// ownership is settled after the removals.
    pub(crate) fn apply_additions(&mut self, this: MoleculeHandle, cx: &mut CommitContext<'_>) {
        let added = self.pending_add.drain(cx.atoms, PendingQueue::Add);
        let mut placed = Vec::with_capacity(added.len());
        for atom in added {
            let Some(entry) = cx.atoms.get_mut(atom) else {
                continue;
            };
            entry.added = None;
            if entry.owner.is_some() {
                // Still owned elsewhere; the edit was superseded
                continue;
            }
            entry.owner = Some(this);
            if entry.is_editing() {
                self.num_editing_render_atoms += 1;
            }
            self.num_render_atoms += 1;
            cx.report.atoms_added += 1;
            placed.push(atom);
        }

        if !placed.is_empty() {
            let mode = self.select_mode(cx);
            let mode_changed = mode != self.primary_mode;
            self.primary_mode = mode;
            for atom in &placed {
                let count = cx.atoms.get(*atom).map_or(0, |entry| entry.geometries.len());
                for geometry in 0..count {
                    self.place_entry(ListEntry { atom: *atom, geometry }, cx);
                }
            }
            if mode_changed {
                self.rebucket_entries(cx);
            }
            if cx.sort_geometry && !self.opaque_or_in_og {
                self.register_transparent(this, &placed, cx);
            }
            self.recompute_bounds(cx.atoms);
        }
        self.sync_display_list(cx);
    }

    /// Pick up deferred live edits; returns the kinds whose value changed
    pub(crate) fn refresh_attributes(&mut self, store: &AttributeStore) -> DirtyAttrs {
        let changed = match self.sharing {
            Sharing::Exclusive(app) => self.attrs.refresh(store, Some(app)),
            Sharing::Shared => DirtyAttrs::empty(),
        };
        self.cached = CachedScalars::from_attributes(&self.attrs, store);
        self.dirty = DirtyAttrs::empty();
        changed
    }

    /// Re-derive the opaque/transparent classification
    ///
    /// On a transition every owned atom moves into or out of the transparent
    /// sort index and the sublists are re-bucketed. Returns whether the
    /// batch changed passes.
    pub(crate) fn update_transparency(&mut self, this: MoleculeHandle, cx: &mut CommitContext<'_>) -> bool {
        let scene = cx.scene;
        let blending = blending_enabled(&self.attrs, &scene.attributes);
        let opaque = self.key.in_ordered_group || !blending;
        let blending_changed = blending != self.blending;
        let transition = opaque != self.opaque_or_in_og;
        self.blending = blending;
        self.opaque_or_in_og = opaque;

        if transition && cx.sort_geometry {
            let owned = self.owned_atoms();
            if opaque {
                for atom in &owned {
                    cx.transparent.unregister(*atom);
                }
            } else {
                self.register_transparent(this, &owned, cx);
            }
        }
        if transition || blending_changed {
            self.primary_mode = self.select_mode(cx);
            self.rebucket_entries(cx);
            self.sync_display_list(cx);
        }
        if transition {
            cx.report.transparency_transitions += 1;
        }
        transition
    }

    /// Render category the batch's appearance derives right now
    ///
    /// Differs from [`category`](Self::category) once a sole-user batch's
    /// polygon mode switched between points, lines and fill.
    pub(crate) fn current_category(&self, store: &AttributeStore) -> RenderCategory {
        let polygon = match self.sharing {
            Sharing::Exclusive(app) => store.resolve(Some(app), AttributeKind::Polygon),
            Sharing::Shared => self.attrs.resolve(AttributeKind::Polygon, store),
        };
        let polygon_mode = polygon.and_then(|value| value.as_polygon()).map(|polygon| polygon.mode);
        RenderCategory::derive(self.category.geometry, polygon_mode)
    }

    /// Give up sole-user status, keeping the current values as snapshots
    pub(crate) fn fall_back_to_shared(&mut self, store: &AttributeStore) {
        self.attrs.detach(store);
        self.sharing = Sharing::Shared;
    }

    /// Release every display list of the batch
    pub(crate) fn release_display_lists(&mut self, cx: &mut CommitContext<'_>) {
        if let Some(id) = self.display_list.take() {
            release_list(cx.display_lists, id);
        }
        for entry in self.separate.drain(..) {
            if let Some(info) = cx.atoms.get_mut(entry.atom).and_then(|a| a.geometries.get_mut(entry.geometry)) {
                if let Some(id) = info.separate_dl.take() {
                    release_list(cx.display_lists, id);
                }
                info.bucket = None;
            }
        }
    }

    fn select_mode(&self, cx: &CommitContext<'_>) -> PrimaryMode {
        if cx.display_lists.capacity() == 0 {
            PrimaryMode::VertexArray
        } else if cx.sort_geometry && !self.opaque_or_in_og {
            PrimaryMode::SeparatePerAtom
        } else {
            PrimaryMode::SharedDisplayList
        }
    }

    fn is_shareable(&self, flags: AtomFlags, geometry: &GeometryDesc) -> bool {
        !flags.intersects(AtomFlags::UNDER_SHARED_GROUP | AtomFlags::BILLBOARD)
            && !geometry.is_by_reference()
            && !(geometry.dynamic_color_index && self.blending)
    }

    fn bucket_for(&self, flags: AtomFlags, geometry: &GeometryDesc) -> ListBucket {
        if self.primary_mode == PrimaryMode::VertexArray || !self.is_shareable(flags, geometry) {
            ListBucket::VertexArray
        } else if self.primary_mode == PrimaryMode::SeparatePerAtom {
            ListBucket::Separate
        } else {
            ListBucket::Primary
        }
    }

    fn place_entry(&mut self, entry: ListEntry, cx: &mut CommitContext<'_>) {
        let Some(atom) = cx.atoms.get_mut(entry.atom) else {
            return;
        };
        let flags = atom.flags;
        let Some(info) = atom.geometries.get_mut(entry.geometry) else {
            return;
        };

        let mut bucket = self.bucket_for(flags, &info.geometry);
        if bucket == ListBucket::Separate {
            if info.separate_dl.is_none() {
                match cx.display_lists.allocate(ListOwner::Atom) {
                    Ok(id) => info.separate_dl = Some(id),
                    Err(err) => {
                        warn!("Per-atom display list unavailable, using vertex arrays: {}", err);
                        cx.report.display_list_failures += 1;
                        bucket = ListBucket::VertexArray;
                    }
                }
            }
        } else if let Some(id) = info.separate_dl.take() {
            release_list(cx.display_lists, id);
        }
        info.bucket = Some(bucket);

        match bucket {
            ListBucket::Primary => {
                self.primary.push(entry);
                self.primary_changed = true;
            }
            ListBucket::Separate => self.separate.push(entry),
            ListBucket::VertexArray => self.vertex_array.push(entry),
        }
    }

    fn rebucket_entries(&mut self, cx: &mut CommitContext<'_>) {
        let before = self.primary.len();
        let entries: Vec<ListEntry> = self
            .primary
            .drain(..)
            .chain(self.separate.drain(..))
            .chain(self.vertex_array.drain(..))
            .collect();
        for entry in entries {
            self.place_entry(entry, cx);
        }
        if self.primary.len() != before {
            self.primary_changed = true;
        }
    }

    fn sync_display_list(&mut self, cx: &mut CommitContext<'_>) {
        let eligible = self.primary_mode == PrimaryMode::SharedDisplayList && !self.primary.is_empty();
        match (eligible, self.display_list) {
            (true, None) => match cx.display_lists.allocate(ListOwner::Batch) {
                Ok(id) => self.display_list = Some(id),
                Err(err) => {
                    warn!("Display list unavailable, demoting batch to vertex arrays: {}", err);
                    cx.report.display_list_failures += 1;
                    self.primary_mode = PrimaryMode::VertexArray;
                    self.rebucket_entries(cx);
                }
            },
            (true, Some(id)) if self.primary_changed => cx.display_lists.invalidate(id),
            (false, Some(id)) => {
                release_list(cx.display_lists, id);
                self.display_list = None;
            }
            _ => {}
        }
        self.primary_changed = false;
    }

    fn register_transparent(&self, this: MoleculeHandle, atoms: &[AtomHandle], cx: &mut CommitContext<'_>) {
        let scene = cx.scene;
        let Some(model) = scene.transforms.current(self.key.transform) else {
            return;
        };
        for atom in atoms {
            if let Some(entry) = cx.atoms.get(*atom) {
                cx.transparent.register(*atom, this, entry.centroid(model));
            }
        }
    }

    fn recompute_bounds(&mut self, atoms: &SlotMap<AtomHandle, RenderAtom>) {
        self.bounds = self
            .owned_atoms()
            .into_iter()
            .filter_map(|atom| atoms.get(atom).map(|entry| *entry.local_bounds()))
            .reduce(|acc, bounds| acc.union(&bounds));
    }

    /// Atoms held in the sublists, each once
    pub fn owned_atoms(&self) -> Vec<AtomHandle> {
        let mut owned: Vec<AtomHandle> = self
            .primary
            .iter()
            .chain(&self.separate)
            .chain(&self.vertex_array)
            .map(|entry| entry.atom)
            .collect();
        owned.sort_unstable();
        owned.dedup();
        owned
    }

    /// Atoms waiting to be added
    pub fn pending_additions(&self, atoms: &SlotMap<AtomHandle, RenderAtom>) -> Vec<AtomHandle> {
        self.pending_add.iter(atoms, PendingQueue::Add).collect()
    }

    /// Atoms waiting to be removed
    pub fn pending_removals(&self, atoms: &SlotMap<AtomHandle, RenderAtom>) -> Vec<AtomHandle> {
        self.pending_remove.iter(atoms, PendingQueue::Remove).collect()
    }

    /// Whether nothing is queued
    pub fn has_pending(&self) -> bool {
        !self.pending_add.is_empty() || !self.pending_remove.is_empty()
    }

    /// Whether the batch is drawn in the opaque pass
    ///
    /// True under an ordered group (drawn in group order) or when the
    /// transparency attribute is absent, `None` or screen-door.
    pub fn is_opaque_or_in_og(&self) -> bool {
        self.opaque_or_in_og
    }

    /// Structural partition key
    pub fn key(&self) -> &AtomKey {
        &self.key
    }

    /// Exact-match render category
    pub fn category(&self) -> RenderCategory {
        self.category
    }

    /// Geometry-type flags of the batch
    pub fn geometry_type(&self) -> GeometryType {
        self.category.geometry
    }

    /// Defining attribute bindings
    pub fn attributes(&self) -> &AttributeSet {
        &self.attrs
    }

    /// Sole-user status
    pub fn sharing(&self) -> Sharing {
        self.sharing
    }

    /// Appearance owned by a sole-user batch
    pub fn app_handle(&self) -> Option<AppearanceHandle> {
        self.sharing.app_handle()
    }

    /// Cached scalar state
    pub fn cached(&self) -> &CachedScalars {
        &self.cached
    }

    /// Kinds differing from the left neighbor in the global order
    pub fn dirty_attrs_across(&self) -> DirtyAttrs {
        self.dirty_attrs_across
    }

    /// Kinds with a deferred edit awaiting the next commit
    pub fn pending_reload(&self) -> DirtyAttrs {
        self.dirty
    }

    /// Atoms held in the sublists
    pub fn num_render_atoms(&self) -> usize {
        self.num_render_atoms
    }

    /// Held atoms whose geometry is edited in place
    pub fn num_editing_render_atoms(&self) -> usize {
        self.num_editing_render_atoms
    }

    /// How the primary sublist is drawn
    pub fn primary_mode(&self) -> PrimaryMode {
        self.primary_mode
    }

    /// Batch-level display list, if allocated
    pub fn display_list(&self) -> Option<DisplayListId> {
        self.display_list
    }

    /// Whether the batch currently owns a batch-level display list slot
    pub fn is_display_list_eligible(&self) -> bool {
        self.primary_mode == PrimaryMode::SharedDisplayList && !self.primary.is_empty()
    }

    /// Geometries in the primary sublist
    pub fn primary_entries(&self) -> &[ListEntry] {
        &self.primary
    }

    /// Geometries with their own display list
    pub fn separate_entries(&self) -> &[ListEntry] {
        &self.separate
    }

    /// Geometries replayed from vertex arrays
    pub fn vertex_array_entries(&self) -> &[ListEntry] {
        &self.vertex_array
    }

    /// Local-space bounds of the held atoms
    pub fn bounds(&self) -> Option<&Aabb> {
        self.bounds.as_ref()
    }

    /// Previous batch in the global order
    pub fn prev(&self) -> Option<MoleculeHandle> {
        self.prev
    }

    /// Next batch in the global order
    pub fn next(&self) -> Option<MoleculeHandle> {
        self.next
    }

    /// Whether the batch is linked into the global order
    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

fn blending_enabled(attrs: &AttributeSet, store: &AttributeStore) -> bool {
    attrs
        .resolve(AttributeKind::Transparency, store)
        .and_then(|value| value.as_transparency())
        .is_some_and(|transparency| !transparency.is_opaque())
}

fn release_list(display_lists: &mut DisplayListAllocator, id: DisplayListId) {
    if let Err(err) = display_lists.free(id) {
        warn!("Failed to release display list {}: {}", id.get(), err);
    } else {
        debug!("Released display list {}", id.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DisplayListConfig;
    use crate::foundation::collections::{AttributeHandle, TransformHandle};
    use crate::foundation::math::{Mat4, Vec3};
    use crate::render::attributes::{MaterialAttrs, TransparencyAttrs, TransparencyMode};
    use crate::render::molecule::atom::RenderAtomDesc;
    use crate::render::scene::LocaleId;

    struct Fixture {
        scene: SceneState,
        atoms: SlotMap<AtomHandle, RenderAtom>,
        molecules: SlotMap<MoleculeHandle, ()>,
        display_lists: DisplayListAllocator,
        transparent: TransparentSortIndex,
        report: CommitReport,
        transform: TransformHandle,
    }

    impl Fixture {
        fn new() -> Self {
            let mut scene = SceneState::new();
            let transform = scene.transforms.create(Mat4::identity());
            Self {
                scene,
                atoms: SlotMap::with_key(),
                molecules: SlotMap::with_key(),
                display_lists: DisplayListAllocator::new(&DisplayListConfig::new()),
                transparent: TransparentSortIndex::new(),
                report: CommitReport::default(),
                transform,
            }
        }

        fn appearance(&mut self, diffuse: f32, frequent: bool) -> AppearanceHandle {
            let store = &mut self.scene.attributes;
            let material = store.create_attribute(MaterialAttrs::new().with_diffuse(diffuse, 0.0, 0.0), frequent);
            let app = store.create_appearance();
            store.set_component(app, AttributeKind::Material, Some(material)).unwrap();
            app
        }

        fn atom(&mut self, app: AppearanceHandle, geometry: GeometryDesc, flags: AtomFlags) -> AtomHandle {
            let key = AtomKey::new(self.transform, LocaleId(0));
            let desc = RenderAtomDesc::new(geometry, Some(app), key).with_flags(flags);
            self.atoms.insert(RenderAtom::from_desc(desc).unwrap())
        }

        fn glass(&mut self, mode: TransparencyMode, frequent: bool) -> (AppearanceHandle, AttributeHandle) {
            let store = &mut self.scene.attributes;
            let transparency = store.create_attribute(TransparencyAttrs::new(mode, 0.5), frequent);
            let app = store.create_appearance();
            store.set_component(app, AttributeKind::Transparency, Some(transparency)).unwrap();
            (app, transparency)
        }

        fn ordered_atom(&mut self, app: AppearanceHandle, geometry: GeometryDesc) -> AtomHandle {
            let key = AtomKey::new(self.transform, LocaleId(0)).in_ordered_group();
            self.atoms.insert(RenderAtom::from_desc(RenderAtomDesc::new(geometry, Some(app), key)).unwrap())
        }

        fn context(&mut self, sort_geometry: bool) -> CommitContext<'_> {
            CommitContext {
                atoms: &mut self.atoms,
                scene: &self.scene,
                display_lists: &mut self.display_lists,
                transparent: &mut self.transparent,
                report: &mut self.report,
                sort_geometry,
            }
        }

        fn commit(&mut self, molecule: &mut RenderMolecule, this: MoleculeHandle) {
            self.commit_with(molecule, this, false);
        }

        fn commit_with(&mut self, molecule: &mut RenderMolecule, this: MoleculeHandle, sort_geometry: bool) {
            let mut cx = self.context(sort_geometry);
            molecule.apply_removals(this, &mut cx);
            molecule.apply_additions(this, &mut cx);
        }

        fn retint(
            &mut self,
            molecule: &mut RenderMolecule,
            this: MoleculeHandle,
            transparency: AttributeHandle,
            mode: TransparencyMode,
        ) -> bool {
            self.scene.attributes.set_attribute(transparency, TransparencyAttrs::new(mode, 0.5)).unwrap();
            molecule.refresh_attributes(&self.scene.attributes);
            let mut cx = self.context(false);
            molecule.update_transparency(this, &mut cx)
        }
    }

    fn surface() -> GeometryDesc {
        GeometryDesc::surface(36, Aabb::from_center_extents(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0)))
    }

    #[test]
    fn test_matches_equal_values_across_appearances() {
        let mut fx = Fixture::new();
        let app_a = fx.appearance(0.5, false);
        let app_b = fx.appearance(0.5, false);
        let app_c = fx.appearance(0.9, false);
        let a = fx.atom(app_a, surface(), AtomFlags::empty());
        let b = fx.atom(app_b, surface(), AtomFlags::empty());
        let c = fx.atom(app_c, surface(), AtomFlags::empty());

        let molecule = RenderMolecule::new(&fx.atoms[a], &fx.scene.attributes);
        assert_eq!(molecule.sharing(), Sharing::Shared);
        assert_eq!(
            molecule.matches(&fx.atoms[b], &fx.scene.attributes),
            MatchOutcome::Match { reload: DirtyAttrs::empty() }
        );
        assert_eq!(molecule.matches(&fx.atoms[c], &fx.scene.attributes), MatchOutcome::NoMatch);
    }

    #[test]
    fn test_matches_rejects_layout_and_category() {
        let mut fx = Fixture::new();
        let app = fx.appearance(0.5, false);
        let a = fx.atom(app, surface(), AtomFlags::empty());
        let textured = fx.atom(app, surface().with_tex_coord_sets(1), AtomFlags::empty());
        let lines = fx.atom(
            app,
            GeometryDesc::new(GeometryType::LINE, VertexFormat::COORDINATES | VertexFormat::NORMALS, 2, Aabb::default()),
            AtomFlags::empty(),
        );

        let molecule = RenderMolecule::new(&fx.atoms[a], &fx.scene.attributes);
        assert_eq!(molecule.matches(&fx.atoms[textured], &fx.scene.attributes), MatchOutcome::NoMatch);
        assert_eq!(molecule.matches(&fx.atoms[lines], &fx.scene.attributes), MatchOutcome::NoMatch);
    }

    #[test]
    fn test_sole_user_matches_only_its_appearance() {
        let mut fx = Fixture::new();
        let app = fx.appearance(0.5, true);
        let twin = fx.appearance(0.5, true);
        let a = fx.atom(app, surface(), AtomFlags::empty());
        let b = fx.atom(app, surface(), AtomFlags::empty());
        let c = fx.atom(twin, surface(), AtomFlags::empty());

        let molecule = RenderMolecule::new(&fx.atoms[a], &fx.scene.attributes);
        assert_eq!(molecule.sharing(), Sharing::Exclusive(app));
        assert_eq!(molecule.matches(&fx.atoms[c], &fx.scene.attributes), MatchOutcome::NoMatch);

        // A live edit is a deferred reload, not a mismatch
        let material = fx.scene.attributes.component_of(Some(app), AttributeKind::Material).unwrap();
        fx.scene.attributes.set_attribute(material, MaterialAttrs::new().with_diffuse(0.1, 0.1, 0.1)).unwrap();
        assert_eq!(
            molecule.matches(&fx.atoms[b], &fx.scene.attributes),
            MatchOutcome::Match { reload: DirtyAttrs::MATERIAL }
        );
    }

    #[test]
    fn test_two_phase_add_and_remove() {
        let mut fx = Fixture::new();
        let app = fx.appearance(0.5, false);
        let a = fx.atom(app, surface(), AtomFlags::empty());
        let b = fx.atom(app, surface(), AtomFlags::empty());
        let this = fx.molecules.insert(());
        let mut molecule = RenderMolecule::new(&fx.atoms[a], &fx.scene.attributes);

        molecule.add_render_atom(this, &mut fx.atoms, a);
        molecule.add_render_atom(this, &mut fx.atoms, b);
        molecule.add_render_atom(this, &mut fx.atoms, b);
        assert_eq!(molecule.num_render_atoms(), 0);
        assert_eq!(molecule.pending_additions(&fx.atoms), vec![a, b]);

        fx.commit(&mut molecule, this);
        assert_eq!(molecule.num_render_atoms(), 2);
        assert_eq!(molecule.primary_entries().len(), 2);
        assert!(molecule.display_list().is_some());
        assert_eq!(fx.atoms[a].owner(), Some(this));

        molecule.remove_render_atom(this, &mut fx.atoms, a);
        assert_eq!(molecule.num_render_atoms(), 2);
        fx.commit(&mut molecule, this);
        assert_eq!(molecule.num_render_atoms(), 1);
        assert_eq!(fx.atoms[a].owner(), None);

        molecule.remove_render_atom(this, &mut fx.atoms, b);
        fx.commit(&mut molecule, this);
        assert_eq!(molecule.num_render_atoms(), 0);
        assert!(molecule.display_list().is_none());
        assert_eq!(fx.display_lists.outstanding_batch_lists(), 0);
    }

    #[test]
    fn test_remove_then_add_cancels() {
        let mut fx = Fixture::new();
        let app = fx.appearance(0.5, false);
        let a = fx.atom(app, surface(), AtomFlags::empty());
        let this = fx.molecules.insert(());
        let mut molecule = RenderMolecule::new(&fx.atoms[a], &fx.scene.attributes);
        molecule.add_render_atom(this, &mut fx.atoms, a);
        fx.commit(&mut molecule, this);
        let id = molecule.display_list();

        molecule.remove_render_atom(this, &mut fx.atoms, a);
        molecule.add_render_atom(this, &mut fx.atoms, a);
        assert!(!molecule.has_pending());
        fx.commit(&mut molecule, this);
        assert_eq!(molecule.num_render_atoms(), 1);
        assert_eq!(molecule.display_list(), id);
    }

    #[test]
    fn test_unshareable_atoms_use_vertex_arrays() {
        let mut fx = Fixture::new();
        let app = fx.appearance(0.5, false);
        let plain = fx.atom(app, surface(), AtomFlags::empty());
        let billboard = fx.atom(app, surface(), AtomFlags::BILLBOARD);
        let instanced = fx.atom(app, surface(), AtomFlags::UNDER_SHARED_GROUP);
        let mut by_ref = surface();
        by_ref.vertex_format |= VertexFormat::BY_REFERENCE;
        let editing = fx.atom(app, by_ref, AtomFlags::empty());

        let this = fx.molecules.insert(());
        let mut molecule = RenderMolecule::new(&fx.atoms[plain], &fx.scene.attributes);
        for atom in [plain, billboard, instanced] {
            molecule.add_render_atom(this, &mut fx.atoms, atom);
        }
        fx.commit(&mut molecule, this);
        assert_eq!(molecule.primary_entries().len(), 1);
        assert_eq!(molecule.vertex_array_entries().len(), 2);
        assert_eq!(molecule.num_editing_render_atoms(), 0);

        // Editing geometry has a different vertex format and never matches
        assert_eq!(molecule.matches(&fx.atoms[editing], &fx.scene.attributes), MatchOutcome::NoMatch);
    }

    #[test]
    fn test_display_list_exhaustion_demotes_batch() {
        let mut fx = Fixture::new();
        fx.display_lists = DisplayListAllocator::new(&DisplayListConfig::new().with_max_display_lists(1));
        let app = fx.appearance(0.5, false);
        let other = fx.appearance(0.7, false);
        let a = fx.atom(app, surface(), AtomFlags::empty());
        let b = fx.atom(other, surface(), AtomFlags::empty());

        let first = fx.molecules.insert(());
        let second = fx.molecules.insert(());
        let mut m1 = RenderMolecule::new(&fx.atoms[a], &fx.scene.attributes);
        let mut m2 = RenderMolecule::new(&fx.atoms[b], &fx.scene.attributes);
        m1.add_render_atom(first, &mut fx.atoms, a);
        m2.add_render_atom(second, &mut fx.atoms, b);
        fx.commit(&mut m1, first);
        fx.commit(&mut m2, second);

        assert!(m1.display_list().is_some());
        assert_eq!(m2.primary_mode(), PrimaryMode::VertexArray);
        assert!(m2.display_list().is_none());
        assert_eq!(m2.vertex_array_entries().len(), 1);
        assert_eq!(fx.report.display_list_failures, 1);
    }

    #[test]
    fn test_transparency_transition_moves_atoms() {
        let mut fx = Fixture::new();
        let store = &mut fx.scene.attributes;
        let transparency = store.create_attribute(TransparencyAttrs::new(TransparencyMode::None, 0.0), true);
        let app = store.create_appearance();
        store.set_component(app, AttributeKind::Transparency, Some(transparency)).unwrap();
        let a = fx.atom(app, surface(), AtomFlags::empty());

        let this = fx.molecules.insert(());
        let mut molecule = RenderMolecule::new(&fx.atoms[a], &fx.scene.attributes);
        assert!(molecule.is_opaque_or_in_og());
        molecule.add_render_atom(this, &mut fx.atoms, a);

        let mut cx = CommitContext {
            atoms: &mut fx.atoms,
            scene: &fx.scene,
            display_lists: &mut fx.display_lists,
            transparent: &mut fx.transparent,
            report: &mut fx.report,
            sort_geometry: true,
        };
        molecule.apply_removals(this, &mut cx);
        molecule.apply_additions(this, &mut cx);
        assert!(cx.transparent.is_empty());

        fx.scene
            .attributes
            .set_attribute(transparency, TransparencyAttrs::new(TransparencyMode::Blended, 0.5))
            .unwrap();
        assert_eq!(molecule.refresh_attributes(&fx.scene.attributes), DirtyAttrs::TRANSPARENCY);

        let mut cx = CommitContext {
            atoms: &mut fx.atoms,
            scene: &fx.scene,
            display_lists: &mut fx.display_lists,
            transparent: &mut fx.transparent,
            report: &mut fx.report,
            sort_geometry: true,
        };
        assert!(molecule.update_transparency(this, &mut cx));
        assert!(!molecule.is_opaque_or_in_og());
        assert!(cx.transparent.contains(a));
        assert_eq!(molecule.primary_mode(), PrimaryMode::SeparatePerAtom);
        assert_eq!(molecule.separate_entries().len(), 1);
        assert!(molecule.display_list().is_none());
        assert_eq!(cx.display_lists.outstanding_atom_lists(), 1);
        assert_eq!(cx.display_lists.outstanding_batch_lists(), 0);
    }

    #[test]
    fn test_dynamic_colors_under_blending_use_vertex_arrays() {
        let mut fx = Fixture::new();
        let (glass, _) = fx.glass(TransparencyMode::Blended, false);
        let plain = fx.atom(glass, surface(), AtomFlags::empty());
        let tinted = fx.atom(glass, surface().with_dynamic_color_index(true), AtomFlags::empty());

        let this = fx.molecules.insert(());
        let mut molecule = RenderMolecule::new(&fx.atoms[plain], &fx.scene.attributes);
        assert_eq!(
            molecule.matches(&fx.atoms[tinted], &fx.scene.attributes),
            MatchOutcome::Match { reload: DirtyAttrs::empty() }
        );
        molecule.add_render_atom(this, &mut fx.atoms, plain);
        molecule.add_render_atom(this, &mut fx.atoms, tinted);
        fx.commit(&mut molecule, this);

        assert_eq!(molecule.primary_entries(), &[ListEntry { atom: plain, geometry: 0 }]);
        assert_eq!(molecule.vertex_array_entries(), &[ListEntry { atom: tinted, geometry: 0 }]);
        assert!(molecule.display_list().is_some());
    }

    #[test]
    fn test_blending_toggle_rebuckets_dynamic_colors() {
        let mut fx = Fixture::new();
        let (app, transparency) = fx.glass(TransparencyMode::None, true);
        let plain = fx.ordered_atom(app, surface());
        let tinted = fx.ordered_atom(app, surface().with_dynamic_color_index(true));

        let this = fx.molecules.insert(());
        let mut molecule = RenderMolecule::new(&fx.atoms[plain], &fx.scene.attributes);
        molecule.add_render_atom(this, &mut fx.atoms, plain);
        molecule.add_render_atom(this, &mut fx.atoms, tinted);
        fx.commit(&mut molecule, this);
        assert_eq!(molecule.primary_entries().len(), 2);
        assert!(molecule.vertex_array_entries().is_empty());
        let id = molecule.display_list();
        assert!(id.is_some());

        // Blending turns on without leaving the opaque pass
        assert!(!fx.retint(&mut molecule, this, transparency, TransparencyMode::Blended));
        assert!(molecule.is_opaque_or_in_og());
        assert_eq!(molecule.primary_entries(), &[ListEntry { atom: plain, geometry: 0 }]);
        assert_eq!(molecule.vertex_array_entries(), &[ListEntry { atom: tinted, geometry: 0 }]);
        assert_eq!(molecule.display_list(), id);

        assert!(!fx.retint(&mut molecule, this, transparency, TransparencyMode::None));
        assert_eq!(molecule.primary_entries().len(), 2);
        assert!(molecule.vertex_array_entries().is_empty());
        assert_eq!(fx.report.transparency_transitions, 0);
    }

    #[test]
    fn test_ordered_group_blending_stays_opaque() {
        let mut fx = Fixture::new();
        let (glass, _) = fx.glass(TransparencyMode::Blended, false);
        let ordered = fx.ordered_atom(glass, surface());
        let loose = fx.atom(glass, surface(), AtomFlags::empty());

        let in_group = fx.molecules.insert(());
        let mut grouped = RenderMolecule::new(&fx.atoms[ordered], &fx.scene.attributes);
        assert!(grouped.is_opaque_or_in_og());
        assert_eq!(grouped.matches(&fx.atoms[loose], &fx.scene.attributes), MatchOutcome::NoMatch);
        grouped.add_render_atom(in_group, &mut fx.atoms, ordered);
        fx.commit_with(&mut grouped, in_group, true);
        assert_eq!(grouped.primary_mode(), PrimaryMode::SharedDisplayList);
        assert!(!fx.transparent.contains(ordered));

        let free = fx.molecules.insert(());
        let mut sorted = RenderMolecule::new(&fx.atoms[loose], &fx.scene.attributes);
        assert!(!sorted.is_opaque_or_in_og());
        sorted.add_render_atom(free, &mut fx.atoms, loose);
        fx.commit_with(&mut sorted, free, true);
        assert_eq!(sorted.primary_mode(), PrimaryMode::SeparatePerAtom);
        assert!(fx.transparent.contains(loose));
    }

    #[test]
    fn test_editing_atoms_are_counted() {
        let mut fx = Fixture::new();
        let app = fx.appearance(0.5, false);
        let mut by_ref = surface();
        by_ref.vertex_format |= VertexFormat::BY_REFERENCE;
        let a = fx.atom(app, by_ref.clone(), AtomFlags::empty());
        let b = fx.atom(app, by_ref, AtomFlags::empty());

        let this = fx.molecules.insert(());
        let mut molecule = RenderMolecule::new(&fx.atoms[a], &fx.scene.attributes);
        molecule.add_render_atom(this, &mut fx.atoms, a);
        molecule.add_render_atom(this, &mut fx.atoms, b);
        fx.commit(&mut molecule, this);
        assert_eq!(molecule.num_render_atoms(), 2);
        assert_eq!(molecule.num_editing_render_atoms(), 2);
        assert_eq!(molecule.vertex_array_entries().len(), 2);
        assert!(molecule.display_list().is_none());

        molecule.remove_render_atom(this, &mut fx.atoms, a);
        fx.commit(&mut molecule, this);
        assert_eq!(molecule.num_editing_render_atoms(), 1);
    }
}
