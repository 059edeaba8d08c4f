//! Whole-engine tests of the batching container
//!
//! These drive the public container API through full commits, the way the
//! scene side and the renderer use it.

use super::*;
use approx::assert_relative_eq;
use crate::core::config::{BatchingConfig, DisplayListConfig, TransparencySortPolicy};
use crate::foundation::collections::{AppearanceHandle, AtomHandle, AttributeHandle, MoleculeHandle, TransformHandle};
use crate::foundation::math::{translation, Aabb, Mat4, Point3, Vec3};
use crate::render::attributes::{
    AttributeKind, DirtyAttrs, MaterialAttrs, Sharing, TransparencyAttrs, TransparencyMode,
};
use crate::render::geometry::GeometryDesc;
use crate::render::molecule::RenderAtomDesc;
use crate::render::scene::{AtomKey, LocaleId, SceneState, WhichChild};

struct Harness {
    container: MoleculeContainer,
    scene: SceneState,
    transform: TransformHandle,
}

impl Harness {
    fn new(config: BatchingConfig) -> Self {
        let mut scene = SceneState::new();
        let transform = scene.transforms.create(Mat4::identity());
        Self {
            container: MoleculeContainer::new(&config),
            scene,
            transform,
        }
    }

    fn material(&mut self, diffuse: f32, frequent: bool) -> (AppearanceHandle, AttributeHandle) {
        let store = &mut self.scene.attributes;
        let material = store.create_attribute(MaterialAttrs::new().with_diffuse(diffuse, 0.0, 0.0), frequent);
        let app = store.create_appearance();
        store.set_component(app, AttributeKind::Material, Some(material)).unwrap();
        (app, material)
    }

    fn spawn(&mut self, app: AppearanceHandle, key: AtomKey) -> AtomHandle {
        let desc = RenderAtomDesc::new(surface(), Some(app), key);
        self.container.spawn_atom(desc).unwrap()
    }

    fn insert(&mut self, app: AppearanceHandle) -> AtomHandle {
        let key = AtomKey::new(self.transform, LocaleId(0));
        let atom = self.spawn(app, key);
        self.container.resolve_and_insert(atom, &self.scene).unwrap();
        atom
    }

    fn commit(&mut self) -> CommitReport {
        self.container.commit(&mut self.scene)
    }

    fn across(&self, handle: MoleculeHandle) -> DirtyAttrs {
        self.container.molecule(handle).unwrap().dirty_attrs_across()
    }

    fn set_diffuse(&mut self, app: AppearanceHandle, material: AttributeHandle, diffuse: f32) {
        self.scene
            .attributes
            .set_attribute(material, MaterialAttrs::new().with_diffuse(diffuse, 0.0, 0.0))
            .unwrap();
        self.container.attribute_changed(app, DirtyAttrs::MATERIAL);
    }
}

fn surface() -> GeometryDesc {
    GeometryDesc::surface(36, Aabb::from_center_extents(Vec3::zeros(), Vec3::new(0.5, 0.5, 0.5)))
}

#[test]
fn test_identical_atoms_share_one_batch() {
    let mut h = Harness::new(BatchingConfig::new());
    let (app, _) = h.material(0.5, false);
    let atoms: Vec<AtomHandle> = (0..3).map(|_| h.insert(app)).collect();
    let report = h.commit();

    assert_eq!(report.molecules_created, 1);
    assert_eq!(report.atoms_added, 3);
    assert_eq!(h.container.molecule_count(), 1);
    let batch = h.container.batch_of(atoms[0]).unwrap();
    assert!(atoms.iter().all(|atom| h.container.batch_of(*atom) == Some(batch)));
    assert_eq!(h.container.molecule(batch).unwrap().num_render_atoms(), 3);

    h.container.remove_render_atom(atoms[0]).unwrap();
    h.container.remove_render_atom(atoms[1]).unwrap();
    h.commit();
    assert_eq!(h.container.molecule(batch).unwrap().num_render_atoms(), 1);

    h.container.remove_render_atom(atoms[2]).unwrap();
    let report = h.commit();
    assert_eq!(report.molecules_destroyed, 1);
    assert!(h.container.molecule(batch).is_none());
    assert_eq!(h.container.molecule_count(), 0);
    assert!(h.container.ordered_handles().is_empty());
}

#[test]
fn test_switch_scopes_partition_batches() {
    let mut h = Harness::new(BatchingConfig::new());
    let (app, _) = h.material(0.5, false);
    let switch = h.scene.switches.create(WhichChild::All);
    let base = AtomKey::new(h.transform, LocaleId(0));

    let first = h.spawn(app, base.with_switch(switch, 0));
    let second = h.spawn(app, base.with_switch(switch, 1));
    h.container.resolve_and_insert(first, &h.scene).unwrap();
    h.container.resolve_and_insert(second, &h.scene).unwrap();
    h.commit();

    assert_eq!(h.container.molecule_count(), 2);
    assert_ne!(h.container.batch_of(first), h.container.batch_of(second));
}

#[test]
fn test_reinsertion_restores_original_batch() {
    let mut h = Harness::new(BatchingConfig::new());
    let (app, _) = h.material(0.5, false);
    let atoms: Vec<AtomHandle> = (0..3).map(|_| h.insert(app)).collect();
    h.commit();
    let batch = h.container.batch_of(atoms[1]).unwrap();
    let id = h.container.molecule(batch).unwrap().display_list();

    h.container.remove_render_atom(atoms[1]).unwrap();
    let again = h.container.resolve_and_insert(atoms[1], &h.scene).unwrap();
    assert_eq!(again, batch);
    let report = h.commit();

    assert_eq!(report.atoms_removed, 0);
    assert_eq!(report.molecules_created, 0);
    let molecule = h.container.molecule(batch).unwrap();
    assert_eq!(molecule.num_render_atoms(), 3);
    assert_eq!(molecule.display_list(), id);
}

#[test]
fn test_emptied_and_refilled_batch_survives() {
    let mut h = Harness::new(BatchingConfig::new());
    let (app, _) = h.material(0.5, false);
    let first = h.insert(app);
    h.commit();
    let batch = h.container.batch_of(first).unwrap();
    let id = h.container.molecule(batch).unwrap().display_list();
    assert!(id.is_some());

    h.container.remove_render_atom(first).unwrap();
    let second = h.insert(app);
    let report = h.commit();

    assert_eq!(report.molecules_destroyed, 0);
    assert_eq!(h.container.batch_of(second), Some(batch));
    assert_eq!(h.container.molecule(batch).unwrap().display_list(), id);
}

#[test]
fn test_order_is_stable_without_changes() {
    let mut h = Harness::new(BatchingConfig::new());
    for diffuse in [0.1, 0.2, 0.3, 0.4] {
        let (app, _) = h.material(diffuse, false);
        h.insert(app);
    }
    h.commit();
    let order = h.container.ordered_handles();
    assert_eq!(order.len(), 4);

    let report = h.commit();
    assert!(report.is_quiet());
    assert_eq!(h.container.ordered_handles(), order);

    // The head never reloads relative to a neighbor
    assert!(h.across(order[0]).is_empty());
    assert!(order[1..].iter().all(|handle| h.across(*handle) == DirtyAttrs::MATERIAL));
}

#[test]
fn test_material_change_clears_neighbor_masks() {
    let mut h = Harness::new(BatchingConfig::new().with_reordering(false));
    let (app1, _) = h.material(0.5, true);
    let (app2, material2) = h.material(0.9, true);
    let (app3, _) = h.material(0.5, true);
    let a1 = h.insert(app1);
    let a2 = h.insert(app2);
    let a3 = h.insert(app3);
    h.commit();

    let b1 = h.container.batch_of(a1).unwrap();
    let b2 = h.container.batch_of(a2).unwrap();
    let b3 = h.container.batch_of(a3).unwrap();
    assert_eq!(h.container.ordered_handles(), vec![b1, b2, b3]);
    assert_eq!(h.container.molecule(b2).unwrap().sharing(), Sharing::Exclusive(app2));
    assert!(h.across(b2).contains(DirtyAttrs::MATERIAL));
    assert!(h.across(b3).contains(DirtyAttrs::MATERIAL));

    h.container.set_reordering(true);
    h.set_diffuse(app2, material2, 0.5);
    let report = h.commit();

    // Already adjacent to equal materials, so nothing moves
    assert_eq!(report.splices, 0);
    assert_eq!(h.container.ordered_handles(), vec![b1, b2, b3]);
    for batch in [b1, b2, b3] {
        assert!(!h.across(batch).contains(DirtyAttrs::MATERIAL));
    }
}

#[test]
fn test_material_change_splices_next_to_equal_batch() {
    let mut h = Harness::new(BatchingConfig::new().with_reordering(false));
    let (app1, _) = h.material(0.5, true);
    let (app2, _) = h.material(0.6, true);
    let (app3, _) = h.material(0.7, true);
    let (app4, material4) = h.material(0.8, true);
    let batches: Vec<MoleculeHandle> = [app1, app2, app3, app4]
        .into_iter()
        .map(|app| h.insert(app))
        .collect::<Vec<_>>()
        .into_iter()
        .map(|atom| h.container.batch_of(atom).unwrap())
        .collect();
    h.commit();
    assert_eq!(h.container.ordered_handles(), batches);

    h.container.set_reordering(true);
    h.set_diffuse(app4, material4, 0.5);
    let report = h.commit();

    assert_eq!(report.splices, 1);
    let (b1, b2, b3, b4) = (batches[0], batches[1], batches[2], batches[3]);
    assert_eq!(h.container.ordered_handles(), vec![b1, b4, b2, b3]);
    assert!(h.across(b1).is_empty());
    assert!(h.across(b4).is_empty());
    assert_eq!(h.across(b2), DirtyAttrs::MATERIAL);
    assert_eq!(h.across(b3), DirtyAttrs::MATERIAL);
}

#[test]
fn test_new_batch_lands_after_equal_material() {
    let mut h = Harness::new(BatchingConfig::new());
    let (app1, _) = h.material(0.5, true);
    let (app2, _) = h.material(0.9, true);
    let (app3, _) = h.material(0.5, true);
    let a1 = h.insert(app1);
    let a2 = h.insert(app2);
    let a3 = h.insert(app3);
    h.commit();

    let order = h.container.ordered_handles();
    let expected: Vec<MoleculeHandle> = [a1, a3, a2]
        .iter()
        .map(|atom| h.container.batch_of(*atom).unwrap())
        .collect();
    assert_eq!(order, expected);
}

#[test]
fn test_display_lists_are_conserved() {
    let config = BatchingConfig::new().with_display_lists(DisplayListConfig::new().with_max_display_lists(3));
    let mut h = Harness::new(config);
    let mut atoms = Vec::new();
    for diffuse in [0.1, 0.2, 0.3, 0.4, 0.5] {
        let (app, _) = h.material(diffuse, false);
        atoms.push(h.insert(app));
        atoms.push(h.insert(app));
    }
    let report = h.commit();

    let eligible = h.container.molecules().filter(|(_, m)| m.is_display_list_eligible()).count();
    assert_eq!(h.container.molecule_count(), 5);
    assert_eq!(h.container.display_lists().outstanding_batch_lists(), 3);
    assert!(h.container.display_lists().outstanding_batch_lists() <= eligible);
    assert_eq!(report.display_list_failures, 2);

    for atom in &atoms {
        h.container.release_atom(*atom).unwrap();
    }
    let report = h.commit();
    assert_eq!(report.molecules_destroyed, 5);
    assert_eq!(h.container.atom_count(), 0);
    assert_eq!(h.container.display_lists().outstanding_batch_lists(), 0);
    assert_eq!(h.container.display_lists().double_frees(), 0);
}

#[test]
fn test_edits_from_producer_thread() {
    let mut h = Harness::new(BatchingConfig::new());
    let (app, _) = h.material(0.5, false);
    let key = AtomKey::new(h.transform, LocaleId(0));
    let atoms: Vec<AtomHandle> = (0..4).map(|_| h.spawn(app, key)).collect();

    let stale = h.spawn(app, key);
    h.container.release_atom(stale).unwrap();

    let sender = h.container.edit_sender();
    let producer = std::thread::spawn(move || {
        for atom in atoms {
            sender.insert(atom).unwrap();
        }
        sender.insert(stale).unwrap();
    });
    producer.join().unwrap();
    assert_eq!(h.container.pending_edits(), 5);

    let report = h.commit();
    assert_eq!(report.edits_drained, 5);
    assert_eq!(report.dropped_atoms, 1);
    assert_eq!(report.atoms_added, 4);
    assert_eq!(h.container.molecule_count(), 1);
    assert_eq!(h.container.pending_edits(), 0);
}

#[test]
fn test_snapshot_change_rebuckets_atom() {
    let mut h = Harness::new(BatchingConfig::new());
    let (app1, _) = h.material(0.5, false);
    let (app2, material2) = h.material(0.5, false);
    let a = h.insert(app1);
    let b = h.insert(app2);
    h.commit();
    let batch = h.container.batch_of(a).unwrap();
    assert_eq!(h.container.batch_of(b), Some(batch));

    h.set_diffuse(app2, material2, 0.9);
    let report = h.commit();

    assert_eq!(report.rebucketed_atoms, 1);
    assert_eq!(report.molecules_created, 1);
    assert_eq!(h.container.molecule_count(), 2);
    assert_eq!(h.container.batch_of(a), Some(batch));
    assert_ne!(h.container.batch_of(b), Some(batch));
    assert_eq!(h.container.molecule(batch).unwrap().num_render_atoms(), 1);
}

#[test]
fn test_attribute_change_touches_only_its_users() {
    let mut h = Harness::new(BatchingConfig::new());
    let (app1, _) = h.material(0.5, false);
    let (app2, material2) = h.material(0.5, false);
    let a = h.insert(app1);
    let b = h.insert(app2);
    let c = h.insert(app2);
    h.commit();
    assert_eq!(h.container.appearance_users(app2), &[b, c]);

    h.container.release_atom(c).unwrap();
    assert_eq!(h.container.appearance_users(app2), &[b]);
    h.set_diffuse(app2, material2, 0.9);
    let report = h.commit();
    assert_eq!(report.rebucketed_atoms, 1);
    assert_ne!(h.container.batch_of(b), h.container.batch_of(a));

    h.container.release_atom(b).unwrap();
    assert!(h.container.appearance_users(app2).is_empty());
    assert_eq!(h.container.appearance_users(app1), &[a]);
}

#[test]
fn test_live_change_marks_sole_user_dirty() {
    let mut h = Harness::new(BatchingConfig::new());
    let (app, material) = h.material(0.5, true);
    let a = h.insert(app);
    h.commit();
    let batch = h.container.batch_of(a).unwrap();

    h.set_diffuse(app, material, 0.2);
    let report = h.commit();
    assert_eq!(report.rebucketed_atoms, 0);
    assert_eq!(report.dirty_processed, 1);
    assert_eq!(h.container.batch_of(a), Some(batch));
    assert_relative_eq!(h.container.molecule(batch).unwrap().cached().color[0], 0.2);
}

#[test]
fn test_sole_user_falls_back_and_migrates() {
    let mut h = Harness::new(BatchingConfig::new());
    let (shared_app, _) = h.material(0.5, false);
    let (live_app, live_material) = h.material(0.5, true);
    let shared_atom = h.insert(shared_app);
    let live_atom = h.insert(live_app);
    h.commit();
    let shared = h.container.batch_of(shared_atom).unwrap();
    let exclusive = h.container.batch_of(live_atom).unwrap();
    assert_ne!(shared, exclusive);

    h.scene.attributes.set_changed_frequent(live_material, false).unwrap();
    h.container.attribute_changed(live_app, DirtyAttrs::MATERIAL);
    let report = h.commit();

    assert_eq!(report.sole_user_fallbacks, 1);
    assert_eq!(report.molecules_destroyed, 1);
    assert!(h.container.molecule(exclusive).is_none());
    assert_eq!(h.container.batch_of(live_atom), Some(shared));
    assert_eq!(h.container.molecule(shared).unwrap().num_render_atoms(), 2);
}

#[test]
fn test_transparent_atoms_sort_back_to_front() {
    let config = BatchingConfig::new().with_transparency_sort(TransparencySortPolicy::Geometry);
    let mut h = Harness::new(config);
    let store = &mut h.scene.attributes;
    let transparency = store.create_attribute(TransparencyAttrs::new(TransparencyMode::Blended, 0.5), false);
    let app = store.create_appearance();
    store.set_component(app, AttributeKind::Transparency, Some(transparency)).unwrap();

    let near_transform = h.scene.transforms.create(translation(&Vec3::new(0.0, 0.0, -2.0)));
    let far_transform = h.scene.transforms.create(translation(&Vec3::new(0.0, 0.0, -10.0)));
    let near = h.spawn(app, AtomKey::new(near_transform, LocaleId(0)));
    let far = h.spawn(app, AtomKey::new(far_transform, LocaleId(0)));
    h.container.resolve_and_insert(near, &h.scene).unwrap();
    h.container.resolve_and_insert(far, &h.scene).unwrap();
    h.commit();

    let index = h.container.transparent_index();
    assert_eq!(index.len(), 2);
    let sorted: Vec<AtomHandle> = index
        .sorted_back_to_front(&Point3::origin())
        .into_iter()
        .map(|entry| entry.atom)
        .collect();
    assert_eq!(sorted, vec![far, near]);

    h.container.remove_render_atom(far).unwrap();
    h.commit();
    assert!(!h.container.transparent_index().contains(far));
}

#[test]
fn test_unknown_appearance_is_rejected() {
    let mut h = Harness::new(BatchingConfig::new());
    let (app, _) = h.material(0.5, false);
    let key = AtomKey::new(h.transform, LocaleId(0));
    let atom = h.spawn(app, key);
    h.scene.attributes.remove_appearance(app);

    assert!(h.container.resolve_and_insert(atom, &h.scene).is_err());
    assert_eq!(h.container.molecule_count(), 0);
}
