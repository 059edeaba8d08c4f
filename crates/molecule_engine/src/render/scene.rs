//! Scene-side collaborators
//!
//! Transforms, switches, locales and live attributes are owned by the scene
//! graph. Batches only hold their handles: transform and switch handles are
//! structural partition keys (compared by identity), and the stores are read
//! at commit and render time.

use crate::foundation::collections::{SlotMap, SwitchHandle, TransformHandle};
use crate::foundation::math::{translation, Mat4, Vec3};
use crate::render::attributes::AttributeStore;
use crate::render::error::{BatchError, BatchResult};
use std::collections::HashMap;

/// Identity of a locale (a high-resolution coordinate origin)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LocaleId(pub u32);

/// Closest enclosing switch node and the child index leading to the shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwitchScope {
    /// Switch node
    pub switch: SwitchHandle,
    /// Child of the switch the shape lives under
    pub child_index: u32,
}

/// Structural partition key of a render atom
///
/// Every field is compared exactly; atoms with different keys never share a
/// batch regardless of their attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomKey {
    /// Shared transform array
    pub transform: TransformHandle,
    /// Locale of the owning subgraph
    pub locale: LocaleId,
    /// Enclosing switch scope, if any
    pub switch_scope: Option<SwitchScope>,
    /// Whether the shape is under an ordered group
    pub in_ordered_group: bool,
}

impl AtomKey {
    /// Key for a shape outside any switch or ordered group
    pub fn new(transform: TransformHandle, locale: LocaleId) -> Self {
        Self { transform, locale, switch_scope: None, in_ordered_group: false }
    }

    /// Place the shape under a switch child
    pub fn with_switch(mut self, switch: SwitchHandle, child_index: u32) -> Self {
        self.switch_scope = Some(SwitchScope { switch, child_index });
        self
    }

    /// Mark the shape as living under an ordered group
    pub fn in_ordered_group(mut self) -> Self {
        self.in_ordered_group = true;
        self
    }
}

/// Double-buffered local-to-world transforms
#[derive(Debug, Clone)]
struct TransformArray {
    matrices: [Mat4; 2],
    current: usize,
}

/// Owner of the shared transform arrays
#[derive(Debug, Default)]
pub struct TransformStore {
    arrays: SlotMap<TransformHandle, TransformArray>,
}

impl TransformStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform array initialised to `matrix`
    pub fn create(&mut self, matrix: Mat4) -> TransformHandle {
        self.arrays.insert(TransformArray { matrices: [matrix, matrix], current: 0 })
    }

    /// Write the back buffer; visible after the next [`swap`](Self::swap)
    pub fn set(&mut self, handle: TransformHandle, matrix: Mat4) -> BatchResult<()> {
        let array = self.arrays.get_mut(handle).ok_or(BatchError::UnknownTransform)?;
        array.matrices[1 - array.current] = matrix;
        Ok(())
    }

    /// Publish every back buffer
    pub fn swap(&mut self) {
        for array in self.arrays.values_mut() {
            let back = array.matrices[1 - array.current];
            array.current = 1 - array.current;
            array.matrices[1 - array.current] = back;
        }
    }

    /// Current matrix of `handle`
    pub fn current(&self, handle: TransformHandle) -> Option<&Mat4> {
        self.arrays.get(handle).map(|array| &array.matrices[array.current])
    }

    /// Index of the current buffer of `handle`
    pub fn current_index(&self, handle: TransformHandle) -> Option<usize> {
        self.arrays.get(handle).map(|array| array.current)
    }
}

/// Which children of a switch are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhichChild {
    /// No child
    None,
    /// Every child
    All,
    /// A single child
    Child(u32),
    /// Children whose bit is set (first 64 children)
    Mask(u64),
}

impl WhichChild {
    /// Whether `child_index` is rendered
    pub fn includes(self, child_index: u32) -> bool {
        match self {
            WhichChild::None => false,
            WhichChild::All => true,
            WhichChild::Child(child) => child == child_index,
            WhichChild::Mask(mask) => child_index < 64 && mask & (1u64 << child_index) != 0,
        }
    }
}

/// Owner of switch visibility state
#[derive(Debug, Default)]
pub struct SwitchStore {
    switches: SlotMap<SwitchHandle, WhichChild>,
}

impl SwitchStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a switch node
    pub fn create(&mut self, which: WhichChild) -> SwitchHandle {
        self.switches.insert(which)
    }

    /// Change which children are rendered
    pub fn set(&mut self, handle: SwitchHandle, which: WhichChild) -> BatchResult<()> {
        let slot = self.switches.get_mut(handle).ok_or(BatchError::UnknownSwitch)?;
        *slot = which;
        Ok(())
    }

    /// Whether shapes in `scope` are rendered; unscoped shapes always are
    pub fn is_visible(&self, scope: Option<SwitchScope>) -> bool {
        match scope {
            None => true,
            Some(scope) => self
                .switches
                .get(scope.switch)
                .is_some_and(|which| which.includes(scope.child_index)),
        }
    }
}

/// Coordinate origins of locales
#[derive(Debug, Default)]
pub struct LocaleTable {
    origins: HashMap<LocaleId, Vec3>,
}

impl LocaleTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the origin of a locale
    pub fn set_origin(&mut self, locale: LocaleId, origin: Vec3) {
        self.origins.insert(locale, origin);
    }

    /// Origin of a locale; unknown locales sit at the world origin
    pub fn origin(&self, locale: LocaleId) -> Vec3 {
        self.origins.get(&locale).copied().unwrap_or_else(Vec3::zeros)
    }

    /// Translation from `locale` into the coordinates of `view_locale`
    ///
    /// `None` when both share an origin and no translation is needed.
    pub fn relative_translation(&self, locale: LocaleId, view_locale: LocaleId) -> Option<Mat4> {
        if locale == view_locale {
            return None;
        }
        let offset = self.origin(locale) - self.origin(view_locale);
        if offset == Vec3::zeros() {
            None
        } else {
            Some(translation(&offset))
        }
    }
}

/// Scene-side stores the batching engine reads
#[derive(Debug, Default)]
pub struct SceneState {
    /// Shared transform arrays
    pub transforms: TransformStore,
    /// Switch visibility
    pub switches: SwitchStore,
    /// Locale origins
    pub locales: LocaleTable,
    /// Live appearance attributes
    pub attributes: AttributeStore,
}

impl SceneState {
    /// Create empty scene stores
    pub fn new() -> Self {
        Self::default()
    }
}
