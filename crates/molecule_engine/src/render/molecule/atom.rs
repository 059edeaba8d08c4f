//! Render atoms
//!
//! A render atom is one drawable primitive instance: its geometries, the
//! appearance they are drawn with and the structural key of the subgraph it
//! lives in. Atoms are owned by the container arena; batches only hold
//! handles to them.

use crate::foundation::collections::{AppearanceHandle, AtomHandle, MoleculeHandle, SlotMap};
use crate::foundation::math::{Aabb, Mat4, Point3};
use crate::render::attributes::{AttributeKind, AttributeStore};
use crate::render::display_list::DisplayListId;
use crate::render::error::{BatchError, BatchResult};
use crate::render::geometry::{GeometryDesc, GeometryType, RenderCategory, VertexFormat};
use crate::render::scene::AtomKey;
use bitflags::bitflags;

bitflags! {
    /// Scene-graph context of an atom that affects how it can be drawn
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AtomFlags: u8 {
        /// Instanced through a shared subgraph; needs per-instance transforms
        const UNDER_SHARED_GROUP = 1 << 0;
        /// Oriented towards the viewer every frame
        const BILLBOARD = 1 << 1;
    }
}

/// Sublist a geometry of an atom is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListBucket {
    /// Compiled into the batch's shared display list
    Primary,
    /// Compiled into a display list of its own
    Separate,
    /// Replayed from vertex arrays every frame
    VertexArray,
}

/// One geometry of an atom and the sublist it currently sits in
#[derive(Debug, Clone)]
pub struct RenderAtomListInfo {
    /// Geometry drawn
    pub geometry: GeometryDesc,
    /// Sublist membership while the atom is owned by a batch
    pub bucket: Option<ListBucket>,
    /// Own display list when the bucket is [`ListBucket::Separate`]
    pub separate_dl: Option<DisplayListId>,
}

/// Construction parameters of a render atom
#[derive(Debug, Clone)]
pub struct RenderAtomDesc {
    /// Geometries, all of one primitive class and vertex layout
    pub geometries: Vec<GeometryDesc>,
    /// Appearance the geometries are drawn with
    pub appearance: Option<AppearanceHandle>,
    /// Structural partition key
    pub key: AtomKey,
    /// Scene-graph context flags
    pub flags: AtomFlags,
}

impl RenderAtomDesc {
    /// Describe an atom with a single geometry
    pub fn new(geometry: GeometryDesc, appearance: Option<AppearanceHandle>, key: AtomKey) -> Self {
        Self { geometries: vec![geometry], appearance, key, flags: AtomFlags::empty() }
    }

    /// Attach another geometry
    pub fn with_geometry(mut self, geometry: GeometryDesc) -> Self {
        self.geometries.push(geometry);
        self
    }

    /// Set the scene-graph context flags
    pub fn with_flags(mut self, flags: AtomFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Links of an atom in one intrusive pending list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingLink {
    prev: Option<AtomHandle>,
    next: Option<AtomHandle>,
}

/// Which intrusive pending list of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingQueue {
    /// Pending additions
    Add,
    /// Pending removals
    Remove,
}

/// One drawable primitive instance
#[derive(Debug, Clone)]
pub struct RenderAtom {
    pub(crate) geometries: Vec<RenderAtomListInfo>,
    pub(crate) geo_type: GeometryType,
    pub(crate) vertex_format: VertexFormat,
    pub(crate) tex_coord_set_len: u32,
    pub(crate) appearance: Option<AppearanceHandle>,
    pub(crate) key: AtomKey,
    pub(crate) flags: AtomFlags,
    pub(crate) local_bounds: Aabb,
    /// Batch whose sublists hold this atom
    pub(crate) owner: Option<MoleculeHandle>,
    /// Batch this atom is pending addition to
    pub(crate) added: Option<MoleculeHandle>,
    /// Batch this atom is pending removal from
    pub(crate) removed: Option<MoleculeHandle>,
    pub(crate) add_link: PendingLink,
    pub(crate) remove_link: PendingLink,
    pub(crate) released: bool,
}

impl RenderAtom {
    /// Build an atom from its description
    ///
    /// Every geometry must share the primitive class and vertex layout of
    /// the first one, since an atom is drawn through a single batch.
    pub fn from_desc(desc: RenderAtomDesc) -> BatchResult<Self> {
        let first = desc.geometries.first().ok_or(BatchError::EmptyGeometry)?;
        if let Some(index) = desc
            .geometries
            .iter()
            .position(|g| g.geo_type != first.geo_type || !g.same_layout(first))
        {
            return Err(BatchError::IncompatibleGeometry { index });
        }

        let geo_type = first.geo_type;
        let vertex_format = first.vertex_format;
        let tex_coord_set_len = first.tex_coord_set_len;
        let local_bounds = desc
            .geometries
            .iter()
            .skip(1)
            .fold(first.bounds, |acc, g| acc.union(&g.bounds));

        Ok(Self {
            geometries: desc
                .geometries
                .into_iter()
                .map(|geometry| RenderAtomListInfo { geometry, bucket: None, separate_dl: None })
                .collect(),
            geo_type,
            vertex_format,
            tex_coord_set_len,
            appearance: desc.appearance,
            key: desc.key,
            flags: desc.flags,
            local_bounds,
            owner: None,
            added: None,
            removed: None,
            add_link: PendingLink::default(),
            remove_link: PendingLink::default(),
            released: false,
        })
    }

    /// Category the atom renders in with its current polygon mode
    pub fn category(&self, store: &AttributeStore) -> RenderCategory {
        let polygon_mode = store
            .resolve(self.appearance, AttributeKind::Polygon)
            .and_then(|value| value.as_polygon())
            .map(|polygon| polygon.mode);
        RenderCategory::derive(self.geo_type, polygon_mode)
    }

    /// Geometries and their sublist membership
    pub fn geometries(&self) -> &[RenderAtomListInfo] {
        &self.geometries
    }

    /// Appearance the atom is drawn with
    pub fn appearance(&self) -> Option<AppearanceHandle> {
        self.appearance
    }

    /// Structural partition key
    pub fn key(&self) -> &AtomKey {
        &self.key
    }

    /// Scene-graph context flags
    pub fn flags(&self) -> AtomFlags {
        self.flags
    }

    /// Batch whose sublists hold this atom
    pub fn owner(&self) -> Option<MoleculeHandle> {
        self.owner
    }

    /// Batch the atom is waiting to join
    pub fn pending_batch(&self) -> Option<MoleculeHandle> {
        self.added
    }

    /// Batch the atom will belong to after the next commit
    pub fn target_batch(&self) -> Option<MoleculeHandle> {
        self.added.or(match self.removed {
            Some(_) => None,
            None => self.owner,
        })
    }

    /// Whether any geometry is edited in place by the application
    pub fn is_editing(&self) -> bool {
        self.geometries.iter().any(|info| info.geometry.is_by_reference())
    }

    /// Local-space bounds of all geometries
    pub fn local_bounds(&self) -> &Aabb {
        &self.local_bounds
    }

    /// World-space centroid under `model`
    pub fn centroid(&self, model: &Mat4) -> Point3 {
        model.transform_point(&Point3::from(self.local_bounds.center()))
    }

    fn link(&self, queue: PendingQueue) -> &PendingLink {
        match queue {
            PendingQueue::Add => &self.add_link,
            PendingQueue::Remove => &self.remove_link,
        }
    }

    fn link_mut(&mut self, queue: PendingQueue) -> &mut PendingLink {
        match queue {
            PendingQueue::Add => &mut self.add_link,
            PendingQueue::Remove => &mut self.remove_link,
        }
    }
}

/// Intrusive doubly linked list threaded through atom links
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingList {
    head: Option<AtomHandle>,
    tail: Option<AtomHandle>,
    len: usize,
}

impl PendingList {
    /// Number of queued atoms
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `atom`
    pub fn push(&mut self, atoms: &mut SlotMap<AtomHandle, RenderAtom>, queue: PendingQueue, atom: AtomHandle) {
        let old_tail = self.tail;
        if let Some(entry) = atoms.get_mut(atom) {
            *entry.link_mut(queue) = PendingLink { prev: old_tail, next: None };
        } else {
            return;
        }
        match old_tail.and_then(|tail| atoms.get_mut(tail)) {
            Some(tail) => tail.link_mut(queue).next = Some(atom),
            None => self.head = Some(atom),
        }
        self.tail = Some(atom);
        self.len += 1;
    }

    /// Unlink `atom`, which must be on this list
    pub fn unlink(&mut self, atoms: &mut SlotMap<AtomHandle, RenderAtom>, queue: PendingQueue, atom: AtomHandle) {
        let Some(link) = atoms.get(atom).map(|entry| *entry.link(queue)) else {
            return;
        };
        match link.prev.and_then(|prev| atoms.get_mut(prev)) {
            Some(prev) => prev.link_mut(queue).next = link.next,
            None => self.head = link.next,
        }
        match link.next.and_then(|next| atoms.get_mut(next)) {
            Some(next) => next.link_mut(queue).prev = link.prev,
            None => self.tail = link.prev,
        }
        if let Some(entry) = atoms.get_mut(atom) {
            *entry.link_mut(queue) = PendingLink::default();
        }
        self.len = self.len.saturating_sub(1);
    }

    /// Queued atoms in insertion order
    pub fn iter<'a>(
        &self,
        atoms: &'a SlotMap<AtomHandle, RenderAtom>,
        queue: PendingQueue,
    ) -> impl Iterator<Item = AtomHandle> + 'a {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let current = cursor?;
            cursor = atoms.get(current).and_then(|entry| entry.link(queue).next);
            Some(current)
        })
    }

    /// Empty the list, returning the atoms in insertion order
    pub fn drain(&mut self, atoms: &mut SlotMap<AtomHandle, RenderAtom>, queue: PendingQueue) -> Vec<AtomHandle> {
        let drained: Vec<AtomHandle> = self.iter(atoms, queue).collect();
        for atom in &drained {
            if let Some(entry) = atoms.get_mut(*atom) {
                *entry.link_mut(queue) = PendingLink::default();
            }
        }
        *self = Self::default();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::collections::TransformHandle;
    use crate::foundation::math::Vec3;
    use crate::render::scene::LocaleId;

    fn desc() -> RenderAtomDesc {
        let bounds = Aabb::from_center_extents(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        RenderAtomDesc::new(
            GeometryDesc::surface(3, bounds),
            None,
            AtomKey::new(TransformHandle::default(), LocaleId(0)),
        )
    }

    #[test]
    fn test_atom_requires_geometry() {
        let mut empty = desc();
        empty.geometries.clear();
        assert!(matches!(RenderAtom::from_desc(empty), Err(BatchError::EmptyGeometry)));
    }

    #[test]
    fn test_atom_rejects_mixed_layouts() {
        let bounds = Aabb::default();
        let mixed = desc().with_geometry(GeometryDesc::surface(3, bounds).with_tex_coord_sets(1));
        assert!(matches!(
            RenderAtom::from_desc(mixed),
            Err(BatchError::IncompatibleGeometry { .. })
        ));
    }

    #[test]
    fn test_pending_list_unlink_middle() {
        let mut atoms: SlotMap<AtomHandle, RenderAtom> = SlotMap::with_key();
        let a = atoms.insert(RenderAtom::from_desc(desc()).unwrap());
        let b = atoms.insert(RenderAtom::from_desc(desc()).unwrap());
        let c = atoms.insert(RenderAtom::from_desc(desc()).unwrap());

        let mut list = PendingList::default();
        for atom in [a, b, c] {
            list.push(&mut atoms, PendingQueue::Add, atom);
        }
        assert_eq!(list.len(), 3);

        list.unlink(&mut atoms, PendingQueue::Add, b);
        assert_eq!(list.iter(&atoms, PendingQueue::Add).collect::<Vec<_>>(), vec![a, c]);

        // The removal list threads through separate links
        let mut removals = PendingList::default();
        removals.push(&mut atoms, PendingQueue::Remove, a);
        assert_eq!(list.iter(&atoms, PendingQueue::Add).collect::<Vec<_>>(), vec![a, c]);

        assert_eq!(list.drain(&mut atoms, PendingQueue::Add), vec![a, c]);
        assert!(list.is_empty());
        assert_eq!(removals.drain(&mut atoms, PendingQueue::Remove), vec![a]);
    }

    #[test]
    fn test_centroid_follows_transform() {
        let atom = RenderAtom::from_desc(desc()).unwrap();
        let model = crate::foundation::math::translation(&Vec3::new(0.0, 0.0, -5.0));
        assert_eq!(atom.centroid(&model), Point3::new(0.0, 0.0, -5.0));
    }
}
