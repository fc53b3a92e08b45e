//! Graphics device contract consumed by batch preparation and drawing
//!
//! The batching layer never talks to a graphics API directly. Everything it
//! needs from the device (render state, shader binding, the shader parameter
//! cache, buffer binding and draw submission) goes through [`GraphicsDevice`].
//! Implementations are expected to make redundant calls cheap: the parameter
//! cache answers [`GraphicsDevice::need_parameter_update`] by comparing the
//! scope of the last value written for a parameter.

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::foundation::collections::Handle;
use crate::foundation::math::{Mat3, Mat3x4, Mat4, Vec3, Vec4};
use crate::render::registry::{Camera, LightContext, Material, TransformKey};

/// Identifier of a compiled shader variation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

/// Identifier of a texture resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Identifier of a vertex or index buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// Framebuffer blending mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// No blending, source replaces destination
    #[default]
    Replace,
    /// Additive blending
    Add,
    /// Multiplicative blending
    Multiply,
    /// Standard alpha blending
    Alpha,
    /// Additive blending weighted by source alpha
    AddAlpha,
}

impl BlendMode {
    /// Whether the mode reads the framebuffer and therefore depends on draw order
    pub const fn is_blending(self) -> bool {
        !matches!(self, Self::Replace)
    }
}

/// Comparison function for depth and alpha tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareMode {
    /// Always pass
    Always,
    /// Pass when equal
    Equal,
    /// Pass when not equal
    NotEqual,
    /// Pass when less
    Less,
    /// Pass when less or equal
    #[default]
    LessEqual,
    /// Pass when greater
    Greater,
    /// Pass when greater or equal
    GreaterEqual,
}

/// Face culling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    /// No culling
    None,
    /// Cull counter-clockwise faces
    #[default]
    Ccw,
    /// Cull clockwise faces
    Cw,
}

/// Primitive topology of a draw call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveType {
    /// Independent triangles
    #[default]
    TriangleList,
    /// Independent lines
    LineList,
    /// Points
    PointList,
}

/// Texture binding slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureUnit {
    /// Diffuse / albedo map
    Diffuse,
    /// Normal map
    Normal,
    /// Detail map
    Detail,
    /// Environment cube map
    Environment,
    /// Shadow map of the active light
    ShadowMap,
    /// Light attenuation ramp
    LightRamp,
    /// Spot light shape
    LightShape,
}

impl TextureUnit {
    /// Units bound from material textures, in binding order
    pub const MATERIAL_UNITS: [Self; 4] =
        [Self::Diffuse, Self::Normal, Self::Detail, Self::Environment];
}

bitflags! {
    /// Vertex elements present in a vertex stream
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VertexElements: u32 {
        /// Position
        const POSITION = 1 << 0;
        /// Normal
        const NORMAL = 1 << 1;
        /// Vertex color
        const COLOR = 1 << 2;
        /// First texture coordinate set
        const TEXCOORD1 = 1 << 3;
        /// Second texture coordinate set
        const TEXCOORD2 = 1 << 4;
        /// Tangent
        const TANGENT = 1 << 5;
        /// Skinning weights
        const BLEND_WEIGHTS = 1 << 6;
        /// Skinning bone indices
        const BLEND_INDICES = 1 << 7;
        /// First row of the per-instance transform
        const INSTANCE_MATRIX1 = 1 << 8;
        /// Second row of the per-instance transform
        const INSTANCE_MATRIX2 = 1 << 9;
        /// Third row of the per-instance transform
        const INSTANCE_MATRIX3 = 1 << 10;
        /// All per-instance transform rows
        const INSTANCE_TRANSFORM = Self::INSTANCE_MATRIX1.bits()
            | Self::INSTANCE_MATRIX2.bits()
            | Self::INSTANCE_MATRIX3.bits();
    }
}

/// A vertex buffer bound to a stream slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexStream {
    /// Buffer providing the data
    pub buffer: BufferId,
    /// Elements the buffer provides
    pub elements: VertexElements,
}

impl VertexStream {
    /// Create a new stream binding
    pub const fn new(buffer: BufferId, elements: VertexElements) -> Self {
        Self { buffer, elements }
    }
}

/// Index and vertex range submitted by one draw call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawRange {
    /// Primitive topology
    pub primitive: PrimitiveType,
    /// First index
    pub index_start: u32,
    /// Number of indices
    pub index_count: u32,
    /// First vertex referenced
    pub vertex_start: u32,
    /// Number of vertices referenced
    pub vertex_count: u32,
}

/// Shader-visible parameter names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderParameter {
    /// Camera world position
    CameraPos,
    /// Camera world rotation
    CameraRot,
    /// View-projection matrix
    ViewProj,
    /// Camera right vector
    ViewRightVector,
    /// Camera up vector
    ViewUpVector,
    /// Model (world) transform
    Model,
    /// Skinning matrices
    SkinMatrices,
    /// Shadow map texel offsets
    ShadowSampleOffsets,
    /// Any other parameter, identified by the hash of its name
    Named(u32),
}

impl ShaderParameter {
    /// Parameter identified by name
    pub const fn named(name: &str) -> Self {
        Self::Named(name_hash(name))
    }
}

/// FNV-1a hash of a parameter name
const fn name_hash(name: &str) -> u32 {
    let bytes = name.as_bytes();
    let mut hash: u32 = 0x811c_9dc5;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(0x0100_0193);
        i += 1;
    }
    hash
}

/// Value uploaded for a shader parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    /// Scalar
    Float(f32),
    /// 3-component vector
    Vec3(Vec3),
    /// 4-component vector
    Vec4(Vec4),
    /// 3x3 matrix
    Mat3(Mat3),
    /// Affine 3x4 matrix
    Mat3x4(Mat3x4),
    /// 4x4 matrix
    Mat4(Mat4),
    /// Raw float array, e.g. skinning or cascade matrices
    Floats(Vec<f32>),
}

/// Ordered map of shader parameter values
pub type ShaderParameterMap = BTreeMap<ShaderParameter, ParameterValue>;

/// Identity of the source a parameter value was derived from
///
/// The device parameter cache re-uploads a parameter only when the scope it
/// was last written from differs from the one presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterScope {
    /// Frame-global parameters
    Globals,
    /// Values derived from a camera
    Camera(Handle<Camera>),
    /// Values derived from a camera whose view transform is overridden
    CameraOverride(Handle<Camera>),
    /// A world transform
    Transform(TransformKey),
    /// Per-instance shader data such as skinning matrices
    ShaderData(u64),
    /// Values derived from a light context
    Light(Handle<LightContext>),
    /// Values derived from a shadow map texture
    ShadowMap(TextureId),
    /// Material parameters
    Material(Handle<Material>),
}

/// Graphics device operations used by batches
pub trait GraphicsDevice {
    /// Set the framebuffer blend mode
    fn set_blend_mode(&mut self, mode: BlendMode);

    /// Set the face culling mode
    fn set_cull_mode(&mut self, mode: CullMode);

    /// Set the depth test comparison
    fn set_depth_test(&mut self, mode: CompareMode);

    /// Enable or disable depth writes
    fn set_depth_write(&mut self, enable: bool);

    /// Enable or disable alpha testing
    fn set_alpha_test(&mut self, enable: bool, mode: CompareMode, reference: f32);

    /// Bind a vertex and pixel shader pair
    fn set_shaders(&mut self, vertex_shader: ShaderId, pixel_shader: ShaderId);

    /// Whether `param` must be uploaded again for values derived from `scope`
    fn need_parameter_update(&mut self, param: ShaderParameter, scope: ParameterScope) -> bool;

    /// Upload a shader parameter
    fn set_shader_parameter(&mut self, param: ShaderParameter, value: &ParameterValue);

    /// Whether the bound shaders sample from `unit`
    fn need_texture_unit(&self, unit: TextureUnit) -> bool;

    /// Bind a texture, or unbind with `None`
    fn set_texture(&mut self, unit: TextureUnit, texture: Option<TextureId>);

    /// Bind an index buffer
    fn set_index_buffer(&mut self, buffer: Option<BufferId>);

    /// Bind vertex streams; `instance_offset` is the first element read from
    /// per-instance streams
    fn set_vertex_buffers(&mut self, streams: &[VertexStream], instance_offset: usize);

    /// Issue a non-instanced draw
    fn draw(&mut self, range: &DrawRange);

    /// Issue an instanced draw of `instance_count` instances
    fn draw_instanced(&mut self, range: &DrawRange, instance_count: usize);

    /// Forget cached transform scopes so the next batch re-uploads its model transform
    fn clear_transform_sources(&mut self);
}
