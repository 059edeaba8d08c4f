//! Live attribute store
//!
//! Scene-side attribute components and the appearances bundling them. Every
//! mutation bumps the component's version so batches holding a live reference
//! can tell that their cached GPU state is stale.

use super::{AttributeKind, AttributeValue, DirtyAttrs};
use crate::foundation::collections::{AppearanceHandle, AttributeHandle, SlotMap};
use crate::render::error::{BatchError, BatchResult};

/// A live, mutable attribute component
#[derive(Debug, Clone)]
pub struct LiveAttribute {
    value: AttributeValue,
    changed_frequent: bool,
    version: u64,
}

impl LiveAttribute {
    /// Current value
    pub fn value(&self) -> &AttributeValue {
        &self.value
    }

    /// Kind of this component
    pub fn kind(&self) -> AttributeKind {
        self.value.kind()
    }

    /// Whether the component is mutated often enough to be bound by reference
    pub fn changed_frequent(&self) -> bool {
        self.changed_frequent
    }

    /// Change counter, bumped on every mutation
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Bundle of optional attribute components applied to a shape
#[derive(Debug, Clone, Default)]
pub struct Appearance {
    components: [Option<AttributeHandle>; 6],
}

impl Appearance {
    /// Component bound for `kind`
    pub fn component(&self, kind: AttributeKind) -> Option<AttributeHandle> {
        self.components[kind.index()]
    }
}

/// Owner of every live attribute component and appearance
#[derive(Debug, Default)]
pub struct AttributeStore {
    components: SlotMap<AttributeHandle, LiveAttribute>,
    appearances: SlotMap<AppearanceHandle, Appearance>,
}

impl AttributeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new attribute component
    pub fn create_attribute(&mut self, value: impl Into<AttributeValue>, changed_frequent: bool) -> AttributeHandle {
        self.components.insert(LiveAttribute {
            value: value.into(),
            changed_frequent,
            version: 0,
        })
    }

    /// Overwrite a component's value in place
    ///
    /// The new value must be of the component's kind. Callers notify the
    /// batching container through `attribute_changed` for every appearance
    /// using the component.
    pub fn set_attribute(&mut self, handle: AttributeHandle, value: impl Into<AttributeValue>) -> BatchResult<()> {
        let value = value.into();
        let live = self.components.get_mut(handle).ok_or(BatchError::UnknownAttribute)?;
        if live.value.kind() != value.kind() {
            return Err(BatchError::AttributeKindMismatch {
                expected: live.value.kind(),
                found: value.kind(),
            });
        }
        live.value = value;
        live.version += 1;
        Ok(())
    }

    /// Change the mutation-frequency class of a component
    pub fn set_changed_frequent(&mut self, handle: AttributeHandle, changed_frequent: bool) -> BatchResult<()> {
        let live = self.components.get_mut(handle).ok_or(BatchError::UnknownAttribute)?;
        if live.changed_frequent != changed_frequent {
            live.changed_frequent = changed_frequent;
            live.version += 1;
        }
        Ok(())
    }

    /// Look up a component
    pub fn attribute(&self, handle: AttributeHandle) -> Option<&LiveAttribute> {
        self.components.get(handle)
    }

    /// Create an appearance with no components bound
    pub fn create_appearance(&mut self) -> AppearanceHandle {
        self.appearances.insert(Appearance::default())
    }

    /// Bind (or clear) the component of one kind on an appearance
    pub fn set_component(
        &mut self,
        appearance: AppearanceHandle,
        kind: AttributeKind,
        component: Option<AttributeHandle>,
    ) -> BatchResult<()> {
        if let Some(handle) = component {
            let found = self.components.get(handle).ok_or(BatchError::UnknownAttribute)?.kind();
            if found != kind {
                return Err(BatchError::AttributeKindMismatch { expected: kind, found });
            }
        }
        let app = self.appearances.get_mut(appearance).ok_or(BatchError::UnknownAppearance)?;
        app.components[kind.index()] = component;
        Ok(())
    }

    /// Look up an appearance
    pub fn appearance(&self, handle: AppearanceHandle) -> Option<&Appearance> {
        self.appearances.get(handle)
    }

    /// Drop an appearance; its components stay alive
    pub fn remove_appearance(&mut self, handle: AppearanceHandle) -> Option<Appearance> {
        self.appearances.remove(handle)
    }

    /// Component handle bound on `appearance` for `kind`
    pub fn component_of(&self, appearance: Option<AppearanceHandle>, kind: AttributeKind) -> Option<AttributeHandle> {
        appearance
            .and_then(|app| self.appearances.get(app))
            .and_then(|app| app.component(kind))
    }

    /// Current value bound on `appearance` for `kind`
    pub fn resolve(&self, appearance: Option<AppearanceHandle>, kind: AttributeKind) -> Option<&AttributeValue> {
        self.component_of(appearance, kind)
            .and_then(|handle| self.components.get(handle))
            .map(LiveAttribute::value)
    }

    /// Kinds whose bound component on `appearance` is mutated often
    pub fn frequent_mask(&self, appearance: Option<AppearanceHandle>) -> DirtyAttrs {
        AttributeKind::ALL
            .into_iter()
            .filter(|kind| {
                self.component_of(appearance, *kind)
                    .and_then(|handle| self.components.get(handle))
                    .is_some_and(LiveAttribute::changed_frequent)
            })
            .fold(DirtyAttrs::empty(), |mask, kind| mask | kind.flag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::attributes::{ColoringAttrs, MaterialAttrs};

    #[test]
    fn test_set_attribute_bumps_version() {
        let mut store = AttributeStore::new();
        let material = store.create_attribute(MaterialAttrs::new(), false);
        assert_eq!(store.attribute(material).unwrap().version(), 0);

        store.set_attribute(material, MaterialAttrs::new().with_diffuse(1.0, 0.0, 0.0)).unwrap();
        let live = store.attribute(material).unwrap();
        assert_eq!(live.version(), 1);
        assert_eq!(live.value().as_material().unwrap().diffuse, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_set_attribute_rejects_wrong_kind() {
        let mut store = AttributeStore::new();
        let material = store.create_attribute(MaterialAttrs::new(), false);
        let result = store.set_attribute(material, ColoringAttrs::default());
        assert!(matches!(result, Err(BatchError::AttributeKindMismatch { .. })));
    }

    #[test]
    fn test_component_binding_is_kind_checked() {
        let mut store = AttributeStore::new();
        let coloring = store.create_attribute(ColoringAttrs::default(), false);
        let app = store.create_appearance();
        assert!(store.set_component(app, AttributeKind::Material, Some(coloring)).is_err());
        assert!(store.set_component(app, AttributeKind::Coloring, Some(coloring)).is_ok());
        assert!(store.resolve(Some(app), AttributeKind::Coloring).is_some());
        assert!(store.resolve(Some(app), AttributeKind::Material).is_none());
    }

    #[test]
    fn test_frequent_mask() {
        let mut store = AttributeStore::new();
        let material = store.create_attribute(MaterialAttrs::new(), true);
        let coloring = store.create_attribute(ColoringAttrs::default(), false);
        let app = store.create_appearance();
        store.set_component(app, AttributeKind::Material, Some(material)).unwrap();
        store.set_component(app, AttributeKind::Coloring, Some(coloring)).unwrap();

        assert_eq!(store.frequent_mask(Some(app)), DirtyAttrs::MATERIAL);
        assert_eq!(store.frequent_mask(None), DirtyAttrs::empty());

        store.set_changed_frequent(material, false).unwrap();
        assert!(store.frequent_mask(Some(app)).is_empty());
    }
}
