//! # Display List Allocator
//!
//! Issues and recycles native display-list identifiers. Identifiers are a
//! scarce, budgeted resource shared by every rendering context; a context
//! records which lists it has compiled in a per-list [`ContextMask`].
//!
//! Freeing an id that some context compiled does not recycle it right away:
//! the id is queued on every such context, and the context deletes its native
//! object the next time it drains [`DisplayListAllocator::take_pending_frees`].
//! The id returns to the free pool once the last context has released it.

use crate::core::config::{DisplayListConfig, MAX_CONTEXTS};
use crate::foundation::logging::warn;
use crate::render::error::{BatchError, BatchResult};
use std::collections::HashMap;
use std::num::NonZeroU32;

/// Native display-list identifier (never zero)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayListId(NonZeroU32);

impl DisplayListId {
    /// Wrap a raw identifier; zero means "unassigned" and yields `None`
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// Raw identifier as handed to the backend
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// Rendering context (canvas) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u8);

/// Set of rendering contexts, one bit per [`ContextId`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContextMask(pub u64);

impl ContextMask {
    /// Mask with no context set
    pub const EMPTY: ContextMask = ContextMask(0);

    /// Whether `ctx` is in the mask
    pub fn contains(self, ctx: ContextId) -> bool {
        ctx.0 < MAX_CONTEXTS && self.0 & (1u64 << ctx.0) != 0
    }

    /// Add `ctx`
    pub fn insert(&mut self, ctx: ContextId) {
        if ctx.0 < MAX_CONTEXTS {
            self.0 |= 1u64 << ctx.0;
        }
    }

    /// Remove `ctx`
    pub fn remove(&mut self, ctx: ContextId) {
        if ctx.0 < MAX_CONTEXTS {
            self.0 &= !(1u64 << ctx.0);
        }
    }

    /// Whether no context is set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Contexts in the mask, lowest first
    pub fn iter(self) -> impl Iterator<Item = ContextId> {
        (0..MAX_CONTEXTS)
            .filter(move |bit| self.0 & (1u64 << bit) != 0)
            .map(ContextId)
    }
}

/// What a display list compiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOwner {
    /// The shared primary list of a whole batch
    Batch,
    /// The separate list of a single atom geometry
    Atom,
}

#[derive(Debug, Clone, Copy)]
struct LiveList {
    owner: ListOwner,
    /// Contexts whose compilation is current
    built: ContextMask,
    /// Contexts holding a native object for the id, current or stale
    compiled: ContextMask,
}

/// Budgeted allocator of display-list identifiers
#[derive(Debug)]
pub struct DisplayListAllocator {
    capacity: u32,
    max_contexts: u8,
    next_unused: u64,
    free: Vec<DisplayListId>,
    live: HashMap<DisplayListId, LiveList>,
    releasing: HashMap<DisplayListId, ContextMask>,
    pending_frees: Vec<Vec<DisplayListId>>,
    double_frees: u64,
}

impl DisplayListAllocator {
    /// Create an allocator with the budget from `config`
    ///
    /// A disabled configuration yields an empty budget.
    pub fn new(config: &DisplayListConfig) -> Self {
        let capacity = if config.enabled { config.max_display_lists } else { 0 };
        let max_contexts = config.max_contexts.clamp(1, MAX_CONTEXTS);
        Self {
            capacity,
            max_contexts,
            next_unused: 1,
            free: Vec::new(),
            live: HashMap::new(),
            releasing: HashMap::new(),
            pending_frees: vec![Vec::new(); max_contexts as usize],
            double_frees: 0,
        }
    }

    /// Configured budget
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of configured contexts
    pub fn max_contexts(&self) -> u8 {
        self.max_contexts
    }

    /// Check that `ctx` is a configured context
    pub fn check_context(&self, ctx: ContextId) -> BatchResult<()> {
        if ctx.0 < self.max_contexts {
            Ok(())
        } else {
            Err(BatchError::InvalidContext(ctx.0))
        }
    }

    /// Issue an id, recycling released ids first
    pub fn allocate(&mut self, owner: ListOwner) -> BatchResult<DisplayListId> {
        let id = match self.free.pop() {
            Some(id) => id,
            None if self.next_unused <= u64::from(self.capacity) => {
                let id = u32::try_from(self.next_unused)
                    .ok()
                    .and_then(DisplayListId::new)
                    .ok_or(BatchError::DisplayListsExhausted { capacity: self.capacity })?;
                self.next_unused += 1;
                id
            }
            None => return Err(BatchError::DisplayListsExhausted { capacity: self.capacity }),
        };
        self.live.insert(
            id,
            LiveList { owner, built: ContextMask::EMPTY, compiled: ContextMask::EMPTY },
        );
        Ok(id)
    }

    /// Return an id
    ///
    /// Contexts that ever compiled the list receive it on their pending-free
    /// queue, stale compilations included; an id nobody compiled is recycled
    /// immediately.
    pub fn free(&mut self, id: DisplayListId) -> BatchResult<()> {
        let Some(list) = self.live.remove(&id) else {
            if self.releasing.contains_key(&id) || self.free.contains(&id) {
                self.double_frees += 1;
                warn!("Display list {} freed twice", id.get());
                return Err(BatchError::DisplayListDoubleFree(id));
            }
            return Err(BatchError::UnknownDisplayList(id));
        };

        if list.compiled.is_empty() {
            self.free.push(id);
        } else {
            for ctx in list.compiled.iter() {
                if let Some(queue) = self.pending_frees.get_mut(ctx.0 as usize) {
                    queue.push(id);
                }
            }
            self.releasing.insert(id, list.compiled);
        }
        Ok(())
    }

    /// Record that `ctx` compiled `id`
    pub fn mark_built(&mut self, id: DisplayListId, ctx: ContextId) -> BatchResult<()> {
        self.check_context(ctx)?;
        let list = self.live.get_mut(&id).ok_or(BatchError::UnknownDisplayList(id))?;
        list.built.insert(ctx);
        list.compiled.insert(ctx);
        Ok(())
    }

    /// Whether `ctx` holds an up-to-date compilation of `id`
    pub fn is_built(&self, id: DisplayListId, ctx: ContextId) -> bool {
        self.live.get(&id).is_some_and(|list| list.built.contains(ctx))
    }

    /// Contexts holding a compilation of `id`
    pub fn built_mask(&self, id: DisplayListId) -> ContextMask {
        self.live.get(&id).map(|list| list.built).unwrap_or_default()
    }

    /// Force every context to recompile `id` before its next replay
    ///
    /// Contexts keep their native object, so a later free still reaches them.
    pub fn invalidate(&mut self, id: DisplayListId) {
        if let Some(list) = self.live.get_mut(&id) {
            list.built = ContextMask::EMPTY;
        }
    }

    /// Drain the ids `ctx` must delete natively
    ///
    /// Ids released by their last context go back to the free pool.
    pub fn take_pending_frees(&mut self, ctx: ContextId) -> BatchResult<Vec<DisplayListId>> {
        self.check_context(ctx)?;
        let drained = std::mem::take(&mut self.pending_frees[ctx.0 as usize]);
        for id in &drained {
            if let Some(mask) = self.releasing.get_mut(id) {
                mask.remove(ctx);
                if mask.is_empty() {
                    self.releasing.remove(id);
                    self.free.push(*id);
                }
            }
        }
        Ok(drained)
    }

    /// Whether `id` is currently issued
    pub fn is_live(&self, id: DisplayListId) -> bool {
        self.live.contains_key(&id)
    }

    /// Issued batch-level ids
    pub fn outstanding_batch_lists(&self) -> usize {
        self.live.values().filter(|list| list.owner == ListOwner::Batch).count()
    }

    /// Issued per-atom ids
    pub fn outstanding_atom_lists(&self) -> usize {
        self.live.values().filter(|list| list.owner == ListOwner::Atom).count()
    }

    /// Freed ids still waiting for a context to release them
    pub fn releasing_count(&self) -> usize {
        self.releasing.len()
    }

    /// Rejected double frees so far
    pub fn double_frees(&self) -> u64 {
        self.double_frees
    }
}
