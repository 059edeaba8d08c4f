//! Geometry descriptors
//!
//! The batching engine never touches vertex data. It only needs to know what
//! kind of primitive a geometry draws, how its vertices are laid out and
//! where it sits in space.

use crate::foundation::math::Aabb;
use crate::render::attributes::PolygonMode;
use bitflags::bitflags;

bitflags! {
    /// Primitive class of a geometry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GeometryType: u8 {
        /// Point primitives
        const POINT = 1 << 0;
        /// Line primitives
        const LINE = 1 << 1;
        /// Triangles and quads
        const SURFACE = 1 << 2;
        /// Screen-aligned raster images
        const RASTER = 1 << 3;
        /// Compressed geometry streams
        const COMPRESSED = 1 << 4;
    }
}

bitflags! {
    /// Vertex layout of a geometry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VertexFormat: u32 {
        /// Positions
        const COORDINATES = 1 << 0;
        /// Normals
        const NORMALS = 1 << 1;
        /// RGB vertex colors
        const COLOR_3 = 1 << 2;
        /// RGBA vertex colors
        const COLOR_4 = 1 << 3;
        /// 2D texture coordinates
        const TEXTURE_COORDINATE_2 = 1 << 4;
        /// 3D texture coordinates
        const TEXTURE_COORDINATE_3 = 1 << 5;
        /// 4D texture coordinates
        const TEXTURE_COORDINATE_4 = 1 << 6;
        /// Generic vertex attributes
        const VERTEX_ATTRIBUTES = 1 << 7;
        /// Data is referenced from application buffers and edited in place
        const BY_REFERENCE = 1 << 8;
        /// Interleaved vertex buffer
        const INTERLEAVED = 1 << 9;
    }
}

/// Primitive actually rasterized once polygon mode is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RasterMode {
    /// Drawn as points
    Points,
    /// Drawn as lines
    Lines,
    /// Drawn filled
    Fill,
}

/// Geometry category used as an exact-match batching key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderCategory {
    /// Primitive class
    pub geometry: GeometryType,
    /// Effective rasterization
    pub raster: RasterMode,
}

impl RenderCategory {
    /// Derive the category of `geometry` drawn with `polygon_mode`
    ///
    /// Surfaces rendered in point or line polygon mode batch with other
    /// point or line renderings of surfaces, never with filled ones.
    pub fn derive(geometry: GeometryType, polygon_mode: Option<PolygonMode>) -> Self {
        let raster = if geometry.contains(GeometryType::POINT) {
            RasterMode::Points
        } else if geometry.contains(GeometryType::LINE) {
            RasterMode::Lines
        } else if geometry.intersects(GeometryType::SURFACE | GeometryType::COMPRESSED) {
            match polygon_mode.unwrap_or_default() {
                PolygonMode::Point => RasterMode::Points,
                PolygonMode::Line => RasterMode::Lines,
                PolygonMode::Fill => RasterMode::Fill,
            }
        } else {
            RasterMode::Fill
        };
        Self { geometry, raster }
    }
}

/// Description of one geometry attached to a render atom
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryDesc {
    /// Primitive class
    pub geo_type: GeometryType,
    /// Vertex layout
    pub vertex_format: VertexFormat,
    /// Number of texture coordinate sets
    pub tex_coord_set_len: u32,
    /// Vertex count
    pub vertex_count: u32,
    /// Local-space bounds
    pub bounds: Aabb,
    /// Colors are looked up through an index that changes at runtime
    pub dynamic_color_index: bool,
}

impl GeometryDesc {
    /// Create a geometry descriptor
    pub fn new(geo_type: GeometryType, vertex_format: VertexFormat, vertex_count: u32, bounds: Aabb) -> Self {
        Self {
            geo_type,
            vertex_format,
            tex_coord_set_len: 0,
            vertex_count,
            bounds,
            dynamic_color_index: false,
        }
    }

    /// Triangle geometry with positions and normals
    pub fn surface(vertex_count: u32, bounds: Aabb) -> Self {
        Self::new(
            GeometryType::SURFACE,
            VertexFormat::COORDINATES | VertexFormat::NORMALS,
            vertex_count,
            bounds,
        )
    }

    /// Set the number of texture coordinate sets
    pub fn with_tex_coord_sets(mut self, count: u32) -> Self {
        self.tex_coord_set_len = count;
        self
    }

    /// Mark colors as dynamically indexed
    pub fn with_dynamic_color_index(mut self, dynamic: bool) -> Self {
        self.dynamic_color_index = dynamic;
        self
    }

    /// Whether vertex data is edited in place by the application
    pub fn is_by_reference(&self) -> bool {
        self.vertex_format.contains(VertexFormat::BY_REFERENCE)
    }

    /// Whether this geometry can share a draw path with `other`
    pub fn same_layout(&self, other: &GeometryDesc) -> bool {
        self.vertex_format == other.vertex_format && self.tex_coord_set_len == other.tex_coord_set_len
    }
}
