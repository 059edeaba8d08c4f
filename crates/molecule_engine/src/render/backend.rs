//! Backend abstraction for the native graphics binding
//!
//! The batching engine decides *what* state to load and *which* lists to
//! replay; a [`RenderBackend`] turns those decisions into native calls.
//! [`RecordingBackend`] records every call and stands in for the native
//! binding in tests and in the demo application.

use crate::foundation::math::Mat4;
use crate::render::attributes::{DirtyAttrs, MaterialBlock};
use crate::render::display_list::{ContextId, DisplayListId};
use crate::render::geometry::GeometryDesc;

/// Outbound interface of the batching engine
pub trait RenderBackend {
    /// Load the attribute kinds in `dirty` from the packed block
    fn load_attributes(&mut self, ctx: ContextId, dirty: DirtyAttrs, block: &MaterialBlock);

    /// Set the model matrix for the following draws
    fn set_model_matrix(&mut self, ctx: ContextId, model: &Mat4);

    /// Compile `geometries` into the display list `id`
    fn compile_display_list(&mut self, ctx: ContextId, id: DisplayListId, geometries: &[&GeometryDesc]);

    /// Replay a compiled display list
    fn call_display_list(&mut self, ctx: ContextId, id: DisplayListId);

    /// Draw one geometry straight from its vertex arrays
    fn draw_vertex_array(&mut self, ctx: ContextId, geometry: &GeometryDesc);

    /// Delete the native object behind a released display list
    fn delete_display_list(&mut self, ctx: ContextId, id: DisplayListId);
}

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    /// [`RenderBackend::load_attributes`]
    LoadAttributes {
        /// Context
        ctx: ContextId,
        /// Kinds loaded
        dirty: DirtyAttrs,
        /// Packed state
        block: MaterialBlock,
    },
    /// [`RenderBackend::set_model_matrix`]
    SetModelMatrix {
        /// Context
        ctx: ContextId,
        /// Matrix
        model: Mat4,
    },
    /// [`RenderBackend::compile_display_list`]
    CompileDisplayList {
        /// Context
        ctx: ContextId,
        /// List compiled
        id: DisplayListId,
        /// Number of geometries compiled into it
        geometry_count: usize,
    },
    /// [`RenderBackend::call_display_list`]
    CallDisplayList {
        /// Context
        ctx: ContextId,
        /// List replayed
        id: DisplayListId,
    },
    /// [`RenderBackend::draw_vertex_array`]
    DrawVertexArray {
        /// Context
        ctx: ContextId,
        /// Vertices drawn
        vertex_count: u32,
    },
    /// [`RenderBackend::delete_display_list`]
    DeleteDisplayList {
        /// Context
        ctx: ContextId,
        /// List deleted
        id: DisplayListId,
    },
}

/// Backend that records every call instead of issuing it
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Vec<BackendCall>,
}

impl RecordingBackend {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls recorded so far
    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    /// Take the recorded calls, leaving the recorder empty
    pub fn take_calls(&mut self) -> Vec<BackendCall> {
        std::mem::take(&mut self.calls)
    }

    /// Forget every recorded call
    pub fn clear(&mut self) {
        self.calls.clear();
    }

    /// Number of attribute loads recorded
    pub fn attribute_loads(&self) -> usize {
        self.calls.iter().filter(|c| matches!(c, BackendCall::LoadAttributes { .. })).count()
    }

    /// Number of draw calls (display-list replays and vertex-array draws)
    pub fn draw_calls(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, BackendCall::CallDisplayList { .. } | BackendCall::DrawVertexArray { .. }))
            .count()
    }
}

impl RenderBackend for RecordingBackend {
    fn load_attributes(&mut self, ctx: ContextId, dirty: DirtyAttrs, block: &MaterialBlock) {
        self.calls.push(BackendCall::LoadAttributes { ctx, dirty, block: *block });
    }

    fn set_model_matrix(&mut self, ctx: ContextId, model: &Mat4) {
        self.calls.push(BackendCall::SetModelMatrix { ctx, model: *model });
    }

    fn compile_display_list(&mut self, ctx: ContextId, id: DisplayListId, geometries: &[&GeometryDesc]) {
        self.calls.push(BackendCall::CompileDisplayList { ctx, id, geometry_count: geometries.len() });
    }

    fn call_display_list(&mut self, ctx: ContextId, id: DisplayListId) {
        self.calls.push(BackendCall::CallDisplayList { ctx, id });
    }

    fn draw_vertex_array(&mut self, ctx: ContextId, geometry: &GeometryDesc) {
        self.calls.push(BackendCall::DrawVertexArray { ctx, vertex_count: geometry.vertex_count });
    }

    fn delete_display_list(&mut self, ctx: ContextId, id: DisplayListId) {
        self.calls.push(BackendCall::DeleteDisplayList { ctx, id });
    }
}
