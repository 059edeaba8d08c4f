//! Cached GPU state
//!
//! Scalar copies of a batch's attributes the renderer reads without going
//! through the bindings, plus the packed block uploaded to the backend.
//! Layout of [`MaterialBlock`] must match the backend's uniform block.

use super::{AttributeKind, AttributeSet, AttributeStore, PolygonMode};
use bytemuck::{Pod, Zeroable};

/// Scalar state cached per batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedScalars {
    /// Effective base color (material diffuse or coloring color)
    pub color: [f32; 3],
    /// Opacity derived from the transparency attribute
    pub alpha: f32,
    /// Whether lighting is evaluated
    pub lighting_enabled: bool,
    /// Polygon rasterization mode
    pub polygon_mode: PolygonMode,
    /// Line antialiasing
    pub line_antialiasing: bool,
    /// Point antialiasing
    pub point_antialiasing: bool,
    /// Line width in pixels
    pub line_width: f32,
    /// Point size in pixels
    pub point_size: f32,
}

impl Default for CachedScalars {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0],
            alpha: 1.0,
            lighting_enabled: false,
            polygon_mode: PolygonMode::Fill,
            line_antialiasing: false,
            point_antialiasing: false,
            line_width: 1.0,
            point_size: 1.0,
        }
    }
}

impl CachedScalars {
    /// Derive the cached scalars from a batch's bindings
    pub fn from_attributes(attrs: &AttributeSet, store: &AttributeStore) -> Self {
        let mut cached = Self::default();

        let material = attrs.resolve(AttributeKind::Material, store).and_then(|v| v.as_material());
        let coloring = attrs.resolve(AttributeKind::Coloring, store).and_then(|v| v.as_coloring());
        match (material, coloring) {
            (Some(material), _) if material.lighting_enabled => {
                cached.color = material.diffuse;
                cached.lighting_enabled = true;
            }
            (_, Some(coloring)) => cached.color = coloring.color,
            (Some(material), None) => cached.color = material.diffuse,
            (None, None) => {}
        }

        if let Some(t) = attrs.resolve(AttributeKind::Transparency, store).and_then(|v| v.as_transparency()) {
            if !t.is_opaque() {
                cached.alpha = 1.0 - t.transparency.clamp(0.0, 1.0);
            }
        }
        if let Some(p) = attrs.resolve(AttributeKind::Polygon, store).and_then(|v| v.as_polygon()) {
            cached.polygon_mode = p.mode;
        }
        if let Some(l) = attrs.resolve(AttributeKind::Line, store).and_then(|v| v.as_line()) {
            cached.line_antialiasing = l.antialiasing;
            cached.line_width = l.width;
        }
        if let Some(p) = attrs.resolve(AttributeKind::Point, store).and_then(|v| v.as_point()) {
            cached.point_antialiasing = p.antialiasing;
            cached.point_size = p.size;
        }
        cached
    }
}

/// Packed material state for the backend
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialBlock {
    /// Base color RGB + alpha
    pub color: [f32; 4],
    /// Ambient RGB, unused
    pub ambient: [f32; 4],
    /// Emissive RGB, unused
    pub emissive: [f32; 4],
    /// Specular RGB + shininess
    pub specular: [f32; 4],
    /// Lighting, polygon mode, line AA, point AA
    pub flags: [u32; 4],
}

impl MaterialBlock {
    /// Pack the material of a batch together with its cached scalars
    pub fn pack(attrs: &AttributeSet, store: &AttributeStore, cached: &CachedScalars) -> Self {
        let [r, g, b] = cached.color;
        let mut block = Self {
            color: [r, g, b, cached.alpha],
            ambient: [0.0; 4],
            emissive: [0.0; 4],
            specular: [0.0; 4],
            flags: [
                u32::from(cached.lighting_enabled),
                match cached.polygon_mode {
                    PolygonMode::Point => 0,
                    PolygonMode::Line => 1,
                    PolygonMode::Fill => 2,
                },
                u32::from(cached.line_antialiasing),
                u32::from(cached.point_antialiasing),
            ],
        };
        if let Some(material) = attrs.resolve(AttributeKind::Material, store).and_then(|v| v.as_material()) {
            let [ar, ag, ab] = material.ambient;
            let [er, eg, eb] = material.emissive;
            let [sr, sg, sb] = material.specular;
            block.ambient = [ar, ag, ab, 0.0];
            block.emissive = [er, eg, eb, 0.0];
            block.specular = [sr, sg, sb, material.shininess];
        }
        block
    }

    /// Raw bytes for upload
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}
