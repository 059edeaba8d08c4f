//! # Batch Renderer
//!
//! Walks the committed batch order once per frame and turns it into backend
//! calls with as few state reloads as the order allows.
//!
//! ## Architecture
//!
//! - **Opaque pass**: every opaque batch in global order. The first drawn
//!   batch and any batch following a skipped one reload every attribute
//!   kind; the rest reload only what differs from their left neighbor.
//! - **Transparent pass**: blended batches in global order, or, with
//!   geometry sorting enabled, every transparent atom back-to-front with a
//!   full reload whenever the owning batch changes.
//!
//! Native display lists released since the last frame are deleted in the
//! rendering context before anything is drawn.

use crate::foundation::collections::{MoleculeHandle, SlotMap};
use crate::foundation::logging::trace;
use crate::foundation::math::Point3;
use crate::render::attributes::DirtyAttrs;
use crate::render::backend::RenderBackend;
use crate::render::batching::container::MoleculeContainer;
use crate::render::batching::stats::FrameStats;
use crate::render::display_list::ContextId;
use crate::render::error::BatchResult;
use crate::render::molecule::{DrawContext, RenderMolecule, RenderPass};
use crate::render::scene::{LocaleId, SceneState};

/// Viewer position for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    /// Eye position, used as depth reference for transparent sorting
    pub eye: Point3,
    /// Locale the eye is expressed in
    pub locale: LocaleId,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            eye: Point3::origin(),
            locale: LocaleId::default(),
        }
    }
}

/// Per-frame walker of the batch order
#[derive(Debug, Default)]
pub struct BatchRenderer {
    /// Statistics of the last frame
    last_frame: FrameStats,

    /// Frames rendered so far
    frames_rendered: u64,
}

impl BatchRenderer {
    /// Create a new batch renderer
    pub fn new() -> Self {
        Self::default()
    }

    /// Render every committed batch into `ctx`
    ///
    /// Must not run concurrently with [`MoleculeContainer::commit`]; the
    /// exclusive borrow of the container enforces that.
    pub fn render_frame(
        &mut self,
        container: &mut MoleculeContainer,
        scene: &SceneState,
        ctx: ContextId,
        view: &ViewState,
        backend: &mut dyn RenderBackend,
    ) -> BatchResult<FrameStats> {
        let parts = container.draw_parts();
        let mut frame = FrameStats::default();

        for id in parts.display_lists.take_pending_frees(ctx)? {
            backend.delete_display_list(ctx, id);
            frame.display_list_deletes += 1;
        }

        let mut draw = DrawContext {
            ctx,
            scene,
            atoms: parts.atoms,
            display_lists: parts.display_lists,
            backend: &mut *backend,
            view_locale: view.locale,
            frame: &mut frame,
        };

        walk_in_order(parts.molecules, parts.head, &mut draw, RenderPass::Opaque)?;
        if parts.sort_geometry {
            let sorted = parts.transparent.sorted_back_to_front(&view.eye);
            let mut current: Option<MoleculeHandle> = None;
            for entry in sorted {
                let Some(molecule) = parts.molecules.get(entry.molecule) else {
                    continue;
                };
                if !molecule.is_visible(scene) {
                    continue;
                }
                if current != Some(entry.molecule) {
                    current = Some(entry.molecule);
                    draw.frame.batches_visited += 1;
                    molecule.update_attributes(&mut draw, DirtyAttrs::RM_COMPONENTS);
                    molecule.update_display_list(&mut draw)?;
                    draw.frame.batches_drawn += 1;
                }
                molecule.render_atom(&mut draw, entry.atom);
            }
        } else {
            walk_in_order(parts.molecules, parts.head, &mut draw, RenderPass::Transparent)?;
        }

        self.frames_rendered += 1;
        trace!(
            "Frame {}: {} batches drawn, {} draw calls, {} attribute loads",
            self.frames_rendered,
            frame.batches_drawn,
            frame.draw_calls(),
            frame.attribute_loads
        );
        self.last_frame = frame.clone();
        Ok(frame)
    }

    /// Statistics of the last frame
    pub fn last_frame(&self) -> &FrameStats {
        &self.last_frame
    }

    /// Frames rendered so far
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }
}

fn walk_in_order(
    molecules: &SlotMap<MoleculeHandle, RenderMolecule>,
    head: Option<MoleculeHandle>,
    draw: &mut DrawContext<'_>,
    pass: RenderPass,
) -> BatchResult<()> {
    // The neighbor mask is only valid when the left neighbor was just drawn
    let mut reload_all = true;
    let mut cursor = head;
    while let Some(handle) = cursor {
        let Some(molecule) = molecules.get(handle) else {
            break;
        };
        cursor = molecule.next;
        if !molecule.renders_in(pass) {
            reload_all = true;
            continue;
        }
        draw.frame.batches_visited += 1;
        if !molecule.is_visible(draw.scene) {
            draw.frame.batches_skipped += 1;
            reload_all = true;
            continue;
        }

        let dirty = if reload_all {
            DirtyAttrs::RM_COMPONENTS
        } else {
            molecule.dirty_attrs_across() | molecule.pending_reload()
        };
        molecule.update_attributes(draw, dirty);
        molecule.update_display_list(draw)?;
        if molecule.render(draw, pass) {
            draw.frame.batches_drawn += 1;
            reload_all = false;
        } else {
            draw.frame.batches_skipped += 1;
            reload_all = true;
        }
    }
    Ok(())
}
