//! Attribute values
//!
//! Plain, cloneable values of the six attribute components. Equality is
//! structural: two snapshots are equivalent exactly when every field matches.

use super::AttributeKind;

/// Which vertex color the material tracks when lighting is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorTarget {
    /// Vertex colors replace the ambient term
    Ambient,
    /// Vertex colors replace the emissive term
    Emissive,
    /// Vertex colors replace the diffuse term
    #[default]
    Diffuse,
    /// Vertex colors replace the specular term
    Specular,
    /// Vertex colors replace ambient and diffuse
    AmbientAndDiffuse,
}

/// Lighting material
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialAttrs {
    /// Ambient reflectance
    pub ambient: [f32; 3],
    /// Emitted color
    pub emissive: [f32; 3],
    /// Diffuse reflectance
    pub diffuse: [f32; 3],
    /// Specular reflectance
    pub specular: [f32; 3],
    /// Specular exponent
    pub shininess: f32,
    /// Whether lighting is evaluated at all
    pub lighting_enabled: bool,
    /// Vertex color tracking target
    pub color_target: ColorTarget,
}

impl MaterialAttrs {
    /// Create a lit white material
    pub fn new() -> Self {
        Self {
            ambient: [0.2, 0.2, 0.2],
            emissive: [0.0, 0.0, 0.0],
            diffuse: [1.0, 1.0, 1.0],
            specular: [1.0, 1.0, 1.0],
            shininess: 64.0,
            lighting_enabled: true,
            color_target: ColorTarget::Diffuse,
        }
    }

    /// Set the diffuse color
    pub fn with_diffuse(mut self, r: f32, g: f32, b: f32) -> Self {
        self.diffuse = [r, g, b];
        self
    }

    /// Set the emissive color
    pub fn with_emissive(mut self, r: f32, g: f32, b: f32) -> Self {
        self.emissive = [r, g, b];
        self
    }

    /// Set the specular exponent
    pub fn with_shininess(mut self, shininess: f32) -> Self {
        self.shininess = shininess;
        self
    }

    /// Enable or disable lighting
    pub fn with_lighting(mut self, enabled: bool) -> Self {
        self.lighting_enabled = enabled;
        self
    }
}

impl Default for MaterialAttrs {
    fn default() -> Self {
        Self::new()
    }
}

/// Shading interpolation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadeModel {
    /// One color per primitive
    Flat,
    /// Interpolated colors
    #[default]
    Gouraud,
}

/// Unlit base color
#[derive(Debug, Clone, PartialEq)]
pub struct ColoringAttrs {
    /// Base color
    pub color: [f32; 3],
    /// Shading interpolation
    pub shade_model: ShadeModel,
}

impl ColoringAttrs {
    /// Create a coloring with the given color
    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { color: [r, g, b], shade_model: ShadeModel::Gouraud }
    }
}

impl Default for ColoringAttrs {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

/// Transparency rendering modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransparencyMode {
    /// Fully opaque
    #[default]
    None,
    /// Implementation picks the fastest method
    Fastest,
    /// Implementation picks the best method
    Nicest,
    /// Stipple pattern, no blending
    ScreenDoor,
    /// Alpha blending
    Blended,
}

/// Blend factors for blended transparency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFunction {
    /// Factor 0
    Zero,
    /// Factor 1
    One,
    /// Source alpha
    SrcAlpha,
    /// One minus source alpha
    OneMinusSrcAlpha,
}

/// Transparency state
#[derive(Debug, Clone, PartialEq)]
pub struct TransparencyAttrs {
    /// Rendering mode
    pub mode: TransparencyMode,
    /// Transparency in `[0, 1]`, 0 meaning opaque
    pub transparency: f32,
    /// Source blend factor
    pub src_blend: BlendFunction,
    /// Destination blend factor
    pub dst_blend: BlendFunction,
}

impl TransparencyAttrs {
    /// Create a transparency state with default blend factors
    pub fn new(mode: TransparencyMode, transparency: f32) -> Self {
        Self {
            mode,
            transparency,
            src_blend: BlendFunction::SrcAlpha,
            dst_blend: BlendFunction::OneMinusSrcAlpha,
        }
    }

    /// Whether this state draws without blending
    pub fn is_opaque(&self) -> bool {
        matches!(self.mode, TransparencyMode::None | TransparencyMode::ScreenDoor)
    }
}

impl Default for TransparencyAttrs {
    fn default() -> Self {
        Self::new(TransparencyMode::None, 0.0)
    }
}

/// How polygons are rasterized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PolygonMode {
    /// Vertices only
    Point,
    /// Edges only
    Line,
    /// Filled
    #[default]
    Fill,
}

/// Which faces are culled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullFace {
    /// No culling
    None,
    /// Back faces culled
    #[default]
    Back,
    /// Front faces culled
    Front,
}

/// Polygon rasterization state
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonAttrs {
    /// Rasterization mode
    pub mode: PolygonMode,
    /// Culled faces
    pub cull_face: CullFace,
    /// Flip normals of back faces
    pub back_face_normal_flip: bool,
    /// Depth offset bias
    pub offset: f32,
    /// Depth offset slope factor
    pub offset_factor: f32,
}

impl PolygonAttrs {
    /// Create a polygon state with the given mode
    pub fn new(mode: PolygonMode) -> Self {
        Self {
            mode,
            cull_face: CullFace::Back,
            back_face_normal_flip: false,
            offset: 0.0,
            offset_factor: 0.0,
        }
    }
}

impl Default for PolygonAttrs {
    fn default() -> Self {
        Self::new(PolygonMode::Fill)
    }
}

/// Line stipple pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinePattern {
    /// Continuous line
    #[default]
    Solid,
    /// Dashed
    Dash,
    /// Dotted
    Dot,
    /// Alternating dash and dot
    DashDot,
}

/// Line rasterization state
#[derive(Debug, Clone, PartialEq)]
pub struct LineAttrs {
    /// Width in pixels
    pub width: f32,
    /// Stipple pattern
    pub pattern: LinePattern,
    /// Line antialiasing
    pub antialiasing: bool,
}

impl Default for LineAttrs {
    fn default() -> Self {
        Self { width: 1.0, pattern: LinePattern::Solid, antialiasing: false }
    }
}

/// Point rasterization state
#[derive(Debug, Clone, PartialEq)]
pub struct PointAttrs {
    /// Size in pixels
    pub size: f32,
    /// Point antialiasing
    pub antialiasing: bool,
}

impl Default for PointAttrs {
    fn default() -> Self {
        Self { size: 1.0, antialiasing: false }
    }
}

/// Value of any attribute component
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Material value
    Material(MaterialAttrs),
    /// Coloring value
    Coloring(ColoringAttrs),
    /// Transparency value
    Transparency(TransparencyAttrs),
    /// Polygon value
    Polygon(PolygonAttrs),
    /// Line value
    Line(LineAttrs),
    /// Point value
    Point(PointAttrs),
}

impl AttributeValue {
    /// Kind of this value
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Material(_) => AttributeKind::Material,
            AttributeValue::Coloring(_) => AttributeKind::Coloring,
            AttributeValue::Transparency(_) => AttributeKind::Transparency,
            AttributeValue::Polygon(_) => AttributeKind::Polygon,
            AttributeValue::Line(_) => AttributeKind::Line,
            AttributeValue::Point(_) => AttributeKind::Point,
        }
    }

    /// Material payload, if this is a material
    pub fn as_material(&self) -> Option<&MaterialAttrs> {
        match self {
            AttributeValue::Material(m) => Some(m),
            _ => None,
        }
    }

    /// Coloring payload, if this is a coloring
    pub fn as_coloring(&self) -> Option<&ColoringAttrs> {
        match self {
            AttributeValue::Coloring(c) => Some(c),
            _ => None,
        }
    }

    /// Transparency payload, if this is a transparency
    pub fn as_transparency(&self) -> Option<&TransparencyAttrs> {
        match self {
            AttributeValue::Transparency(t) => Some(t),
            _ => None,
        }
    }

    /// Polygon payload, if this is a polygon state
    pub fn as_polygon(&self) -> Option<&PolygonAttrs> {
        match self {
            AttributeValue::Polygon(p) => Some(p),
            _ => None,
        }
    }

    /// Line payload, if this is a line state
    pub fn as_line(&self) -> Option<&LineAttrs> {
        match self {
            AttributeValue::Line(l) => Some(l),
            _ => None,
        }
    }

    /// Point payload, if this is a point state
    pub fn as_point(&self) -> Option<&PointAttrs> {
        match self {
            AttributeValue::Point(p) => Some(p),
            _ => None,
        }
    }
}

impl From<MaterialAttrs> for AttributeValue {
    fn from(value: MaterialAttrs) -> Self {
        AttributeValue::Material(value)
    }
}

impl From<ColoringAttrs> for AttributeValue {
    fn from(value: ColoringAttrs) -> Self {
        AttributeValue::Coloring(value)
    }
}

impl From<TransparencyAttrs> for AttributeValue {
    fn from(value: TransparencyAttrs) -> Self {
        AttributeValue::Transparency(value)
    }
}

impl From<PolygonAttrs> for AttributeValue {
    fn from(value: PolygonAttrs) -> Self {
        AttributeValue::Polygon(value)
    }
}

impl From<LineAttrs> for AttributeValue {
    fn from(value: LineAttrs) -> Self {
        AttributeValue::Line(value)
    }
}

impl From<PointAttrs> for AttributeValue {
    fn from(value: PointAttrs) -> Self {
        AttributeValue::Point(value)
    }
}
