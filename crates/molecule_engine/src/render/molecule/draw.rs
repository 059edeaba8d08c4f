//! Per-batch draw operations
//!
//! Invoked by the renderer walk once per batch per frame, in global order:
//! [`RenderMolecule::update_attributes`] and
//! [`RenderMolecule::update_display_list`] when GPU state must be (re)loaded,
//! then [`RenderMolecule::render`].

use super::atom::{ListBucket, RenderAtom};
use super::batch::{ListEntry, RenderMolecule};
use crate::foundation::collections::{AtomHandle, SlotMap};
use crate::foundation::math::Mat4;
use crate::render::attributes::{DirtyAttrs, MaterialBlock};
use crate::render::backend::RenderBackend;
use crate::render::batching::stats::FrameStats;
use crate::render::display_list::{ContextId, DisplayListAllocator};
use crate::render::error::BatchResult;
use crate::render::geometry::GeometryDesc;
use crate::render::scene::{LocaleId, SceneState};

/// Pass of the renderer walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPass {
    /// Opaque batches and batches under ordered groups
    Opaque,
    /// Blended batches
    Transparent,
}

/// Everything a batch needs to draw itself into one context
pub struct DrawContext<'a> {
    /// Target context
    pub ctx: ContextId,
    /// Scene stores
    pub scene: &'a SceneState,
    /// Atom arena
    pub atoms: &'a SlotMap<AtomHandle, RenderAtom>,
    /// Display-list allocator
    pub display_lists: &'a mut DisplayListAllocator,
    /// Native binding
    pub backend: &'a mut dyn RenderBackend,
    /// Locale the view is expressed in
    pub view_locale: LocaleId,
    /// Counters of the current walk
    pub frame: &'a mut FrameStats,
}

impl RenderMolecule {
    /// Whether the batch draws in `pass`
    pub fn renders_in(&self, pass: RenderPass) -> bool {
        match pass {
            RenderPass::Opaque => self.is_opaque_or_in_og(),
            RenderPass::Transparent => !self.is_opaque_or_in_og(),
        }
    }

    /// Whether the batch has atoms and its switch scope is on
    pub fn is_visible(&self, scene: &SceneState) -> bool {
        self.num_render_atoms() > 0 && scene.switches.is_visible(self.key().switch_scope)
    }

    /// Model matrix, translated into the view locale when they differ
    pub fn model_matrix(&self, scene: &SceneState, view_locale: LocaleId) -> Option<Mat4> {
        let model = *scene.transforms.current(self.key().transform)?;
        Some(match scene.locales.relative_translation(self.key().locale, view_locale) {
            Some(translation) => translation * model,
            None => model,
        })
    }

    /// Load the attribute kinds in `dirty`
    pub fn update_attributes(&self, draw: &mut DrawContext<'_>, dirty: DirtyAttrs) {
        if dirty.is_empty() {
            return;
        }
        let block = MaterialBlock::pack(&self.attrs, &draw.scene.attributes, &self.cached);
        draw.backend.load_attributes(draw.ctx, dirty, &block);
        draw.frame.attribute_loads += 1;
        if dirty == DirtyAttrs::RM_COMPONENTS {
            draw.frame.full_reloads += 1;
        }
    }

    /// Compile every display list of the batch not yet built in the context
    ///
    /// Returns the number of lists compiled.
    pub fn update_display_list(&self, draw: &mut DrawContext<'_>) -> BatchResult<usize> {
        draw.display_lists.check_context(draw.ctx)?;
        let mut compiled = 0;

        if let Some(id) = self.display_list {
            if !draw.display_lists.is_built(id, draw.ctx) {
                let geometries: Vec<&GeometryDesc> = self
                    .primary
                    .iter()
                    .filter_map(|entry| geometry_of(draw.atoms, entry))
                    .collect();
                draw.backend.compile_display_list(draw.ctx, id, &geometries);
                draw.display_lists.mark_built(id, draw.ctx)?;
                compiled += 1;
            }
        }

        for entry in &self.separate {
            let Some(info) = draw.atoms.get(entry.atom).and_then(|a| a.geometries.get(entry.geometry)) else {
                continue;
            };
            if let Some(id) = info.separate_dl {
                if !draw.display_lists.is_built(id, draw.ctx) {
                    draw.backend.compile_display_list(draw.ctx, id, &[&info.geometry]);
                    draw.display_lists.mark_built(id, draw.ctx)?;
                    compiled += 1;
                }
            }
        }

        draw.frame.display_list_compiles += compiled;
        Ok(compiled)
    }

    /// Draw every held atom; returns whether anything was drawn
    ///
    /// Attributes and display lists must already be loaded for the context.
    pub fn render(&self, draw: &mut DrawContext<'_>, pass: RenderPass) -> bool {
        if !self.renders_in(pass) || !self.is_visible(draw.scene) {
            return false;
        }
        let Some(model) = self.model_matrix(draw.scene, draw.view_locale) else {
            return false;
        };
        draw.backend.set_model_matrix(draw.ctx, &model);

        let mut drawn = false;
        if let Some(id) = self.display_list {
            draw.backend.call_display_list(draw.ctx, id);
            draw.frame.display_list_calls += 1;
            drawn = true;
        }
        for entry in self.separate.iter().chain(&self.vertex_array) {
            drawn |= draw_entry(draw, entry);
        }
        drawn
    }

    /// Draw the geometries of a single atom, as the depth-sorted
    /// transparent pass does
    pub fn render_atom(&self, draw: &mut DrawContext<'_>, atom: AtomHandle) -> bool {
        if !self.is_visible(draw.scene) {
            return false;
        }
        let Some(model) = self.model_matrix(draw.scene, draw.view_locale) else {
            return false;
        };
        draw.backend.set_model_matrix(draw.ctx, &model);

        let mut drawn = false;
        let entries = self
            .primary
            .iter()
            .chain(&self.separate)
            .chain(&self.vertex_array)
            .filter(|entry| entry.atom == atom);
        for entry in entries {
            drawn |= draw_entry(draw, entry);
        }
        drawn
    }
}

fn geometry_of<'a>(atoms: &'a SlotMap<AtomHandle, RenderAtom>, entry: &ListEntry) -> Option<&'a GeometryDesc> {
    atoms
        .get(entry.atom)
        .and_then(|atom| atom.geometries.get(entry.geometry))
        .map(|info| &info.geometry)
}

fn draw_entry(draw: &mut DrawContext<'_>, entry: &ListEntry) -> bool {
    let Some(info) = draw.atoms.get(entry.atom).and_then(|atom| atom.geometries.get(entry.geometry)) else {
        return false;
    };
    match (info.bucket, info.separate_dl) {
        (Some(ListBucket::Separate), Some(id)) => {
            draw.backend.call_display_list(draw.ctx, id);
            draw.frame.display_list_calls += 1;
        }
        _ => {
            // Primary geometries drawn one at a time fall back to vertex arrays
            draw.backend.draw_vertex_array(draw.ctx, &info.geometry);
            draw.frame.vertex_array_draws += 1;
        }
    }
    true
}
