//! Render resource registry
//!
//! Geometries, materials, passes, cameras and light contexts live in typed
//! arenas. Their [`Handle`]s are dense small integers, which is what the sort
//! key packs into its fields, so draw ordering never depends on where a
//! resource happens to be allocated.
//!
//! World transforms belong to the scene and are stored in a [`TransformStore`]
//! keyed by [`TransformKey`]; batches reference them and never copy them.

use slotmap::{new_key_type, SlotMap};

use crate::foundation::collections::{Arena, Handle};
use crate::foundation::math::{Mat3, Mat4, Mat4Ext, Vec3};
use crate::render::device::{
    BlendMode, BufferId, CompareMode, CullMode, DrawRange, ParameterValue, PrimitiveType,
    ShaderId, ShaderParameter, ShaderParameterMap, TextureId, TextureUnit, VertexStream,
};
use crate::render::sort_key::{
    GEOMETRY_FIELD_MASK, LIGHT_CONTEXT_FIELD_MASK, MATERIAL_FIELD_MASK, PASS_FIELD_MASK,
};

new_key_type! {
    /// Key of a world transform owned by the scene
    pub struct TransformKey;
}

/// Scene-owned world transforms
pub type TransformStore = SlotMap<TransformKey, Mat4>;

/// Mesh range and buffers drawn by a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    /// Index buffer, if the geometry is indexed
    pub index_buffer: Option<BufferId>,
    /// Vertex streams in binding order
    pub vertex_streams: Vec<VertexStream>,
    /// Submitted index and vertex range
    pub range: DrawRange,
}

impl Geometry {
    /// Create an indexed triangle-list geometry
    pub fn indexed(
        index_buffer: BufferId,
        vertex_streams: Vec<VertexStream>,
        index_count: u32,
        vertex_count: u32,
    ) -> Self {
        Self {
            index_buffer: Some(index_buffer),
            vertex_streams,
            range: DrawRange {
                primitive: PrimitiveType::TriangleList,
                index_start: 0,
                index_count,
                vertex_start: 0,
                vertex_count,
            },
        }
    }

    /// Number of indices drawn
    pub const fn index_count(&self) -> u32 {
        self.range.index_count
    }
}

/// Shading stage kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassType {
    /// Unlit or ambient base pass
    Base,
    /// Base pass combined with the first per-pixel light
    LitBase,
    /// Additive per-light pass
    Light,
    /// Deferred or light pre-pass G-buffer fill
    PrePass,
    /// Shadow map rendering
    Shadow,
    /// Anything else
    Custom,
}

impl PassType {
    /// Whether the pass carries separate vertex shader variations per light type
    pub const fn has_light_variations(self) -> bool {
        matches!(self, Self::Light | Self::LitBase)
    }
}

/// Render state and shader variation tables of a shading pass
#[derive(Debug, Clone, PartialEq)]
pub struct Pass {
    /// Kind of pass
    pub pass_type: PassType,
    /// Blend mode
    pub blend_mode: BlendMode,
    /// Depth comparison
    pub depth_test: CompareMode,
    /// Whether depth is written
    pub depth_write: bool,
    /// Whether alpha testing is enabled
    pub alpha_test: bool,
    /// Vertex shader variations, indexed by permutation
    pub vertex_shaders: Vec<Option<ShaderId>>,
    /// Pixel shader variations, indexed by permutation
    pub pixel_shaders: Vec<Option<ShaderId>>,
}

impl Pass {
    /// Create a pass with default opaque render state
    pub fn new(pass_type: PassType) -> Self {
        Self {
            pass_type,
            blend_mode: BlendMode::Replace,
            depth_test: CompareMode::LessEqual,
            depth_write: true,
            alpha_test: false,
            vertex_shaders: Vec::new(),
            pixel_shaders: Vec::new(),
        }
    }

    /// Set the blend mode
    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    /// Enable or disable depth writes
    pub fn with_depth_write(mut self, depth_write: bool) -> Self {
        self.depth_write = depth_write;
        self
    }

    /// Enable or disable alpha testing
    pub fn with_alpha_test(mut self, alpha_test: bool) -> Self {
        self.alpha_test = alpha_test;
        self
    }

    /// Set the shader variation tables
    pub fn with_shaders(
        mut self,
        vertex_shaders: Vec<Option<ShaderId>>,
        pixel_shaders: Vec<Option<ShaderId>>,
    ) -> Self {
        self.vertex_shaders = vertex_shaders;
        self.pixel_shaders = pixel_shaders;
        self
    }

    /// Vertex shader variation at `index`
    pub fn vertex_shader(&self, index: usize) -> Option<ShaderId> {
        self.vertex_shaders.get(index).copied().flatten()
    }
}

/// Surface description shared by many batches
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Material {
    /// Culling in regular passes
    pub cull_mode: CullMode,
    /// Culling in shadow passes
    pub shadow_cull_mode: CullMode,
    /// Material shader parameters
    pub parameters: ShaderParameterMap,
    /// Textures by unit
    pub textures: Vec<(TextureUnit, TextureId)>,
}

impl Material {
    /// Create a material with default culling and no parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a shader parameter
    pub fn with_parameter(mut self, param: ShaderParameter, value: ParameterValue) -> Self {
        self.parameters.insert(param, value);
        self
    }

    /// Bind a texture to a unit
    pub fn with_texture(mut self, unit: TextureUnit, texture: TextureId) -> Self {
        self.textures.retain(|(u, _)| *u != unit);
        self.textures.push((unit, texture));
        self
    }

    /// Set culling for regular and shadow passes
    pub fn with_cull_modes(mut self, cull_mode: CullMode, shadow_cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self.shadow_cull_mode = shadow_cull_mode;
        self
    }

    /// Texture bound to `unit`, if any
    pub fn texture(&self, unit: TextureUnit) -> Option<TextureId> {
        self.textures.iter().find(|(u, _)| *u == unit).map(|(_, t)| *t)
    }
}

/// Rendering camera
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// World position
    pub position: Vec3,
    /// World rotation
    pub rotation: Mat3,
    /// Inverse world transform
    pub view: Mat4,
    /// Projection matrix
    pub projection: Mat4,
}

impl Camera {
    /// Create a camera from its world transform and projection
    pub fn new(world: &Mat4, projection: Mat4) -> Self {
        Self {
            position: Vec3::new(world[(0, 3)], world[(1, 3)], world[(2, 3)]),
            rotation: world.rotation_part(),
            view: world.try_inverse().unwrap_or_else(Mat4::identity),
            projection,
        }
    }

    /// Combined view-projection matrix
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// World-space right vector
    pub fn right(&self) -> Vec3 {
        self.rotation.column(0).into_owned()
    }

    /// World-space up vector
    pub fn up(&self) -> Vec3 {
        self.rotation.column(1).into_owned()
    }

    /// Distance from the camera to a world-space point
    pub fn distance_to(&self, point: &Vec3) -> f32 {
        (point - self.position).norm()
    }
}

/// Light source kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightType {
    /// Directional light
    Directional,
    /// Spot light
    Spot,
    /// Point light
    Point,
}

/// Shadow map bound while drawing a lit batch
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowMapBinding {
    /// Shadow map texture
    pub texture: TextureId,
    /// Texture width in texels
    pub width: u32,
    /// Texture height in texels
    pub height: u32,
    /// Shadow parameters derived by the renderer (projection, fade, splits)
    pub parameters: Vec<(ShaderParameter, ParameterValue)>,
}

/// Light and shadow state shared by every batch lit by one light
///
/// The parameter values are computed upstream; this layer only decides when
/// they have to be uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct LightContext {
    /// Kind of light
    pub light_type: LightType,
    /// Light parameters (attenuation, direction, position, color)
    pub parameters: Vec<(ShaderParameter, ParameterValue)>,
    /// Shadow map, when the light casts shadows
    pub shadow: Option<ShadowMapBinding>,
    /// Custom attenuation ramp
    pub ramp_texture: Option<TextureId>,
    /// Custom spot shape
    pub shape_texture: Option<TextureId>,
}

impl LightContext {
    /// Create a light context without shadows or custom textures
    pub const fn new(light_type: LightType) -> Self {
        Self {
            light_type,
            parameters: Vec::new(),
            shadow: None,
            ramp_texture: None,
            shape_texture: None,
        }
    }

    /// Add a light parameter
    pub fn with_parameter(mut self, param: ShaderParameter, value: ParameterValue) -> Self {
        self.parameters.push((param, value));
        self
    }

    /// Attach a shadow map
    pub fn with_shadow(mut self, shadow: ShadowMapBinding) -> Self {
        self.shadow = Some(shadow);
        self
    }
}

/// Fallback textures used when a light has none of its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DefaultLightTextures {
    /// Attenuation ramp
    pub light_ramp: Option<TextureId>,
    /// Spot light shape
    pub light_spot: Option<TextureId>,
}

/// Storage for every resource a batch refers to
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    geometries: Arena<Geometry>,
    materials: Arena<Material>,
    passes: Arena<Pass>,
    cameras: Arena<Camera>,
    light_contexts: Arena<LightContext>,
    /// Fallback light textures
    pub default_textures: DefaultLightTextures,
}

impl ResourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a geometry
    pub fn add_geometry(&mut self, geometry: Geometry) -> Handle<Geometry> {
        let handle = self.geometries.insert(geometry);
        warn_on_key_overflow("geometry", handle.index(), GEOMETRY_FIELD_MASK);
        handle
    }

    /// Register a material
    pub fn add_material(&mut self, material: Material) -> Handle<Material> {
        let handle = self.materials.insert(material);
        warn_on_key_overflow("material", handle.index(), MATERIAL_FIELD_MASK);
        handle
    }

    /// Register a pass
    pub fn add_pass(&mut self, pass: Pass) -> Handle<Pass> {
        let handle = self.passes.insert(pass);
        warn_on_key_overflow("pass", handle.index(), PASS_FIELD_MASK);
        handle
    }

    /// Register a camera
    pub fn add_camera(&mut self, camera: Camera) -> Handle<Camera> {
        self.cameras.insert(camera)
    }

    /// Register a per-frame light context
    pub fn add_light_context(&mut self, light: LightContext) -> Handle<LightContext> {
        let handle = self.light_contexts.insert(light);
        // Light context fields are offset by one so "no light" stays distinct.
        warn_on_key_overflow("light context", handle.index() + 1, LIGHT_CONTEXT_FIELD_MASK);
        handle
    }

    /// Drop every light context at the end of a frame
    pub fn clear_light_contexts(&mut self) {
        self.light_contexts.clear();
    }

    /// Look up a geometry
    pub fn geometry(&self, handle: Handle<Geometry>) -> Option<&Geometry> {
        self.geometries.get(handle)
    }

    /// Look up a material
    pub fn material(&self, handle: Handle<Material>) -> Option<&Material> {
        self.materials.get(handle)
    }

    /// Look up a pass
    pub fn pass(&self, handle: Handle<Pass>) -> Option<&Pass> {
        self.passes.get(handle)
    }

    /// Look up a camera
    pub fn camera(&self, handle: Handle<Camera>) -> Option<&Camera> {
        self.cameras.get(handle)
    }

    /// Look up a light context
    pub fn light_context(&self, handle: Handle<LightContext>) -> Option<&LightContext> {
        self.light_contexts.get(handle)
    }
}

fn warn_on_key_overflow(kind: &str, field_value: u32, mask: u64) {
    if u64::from(field_value) == mask + 1 {
        log::warn!(
            "Registered more than {} {} resources; sort key fields will alias from here on",
            mask + 1,
            kind
        );
    }
}
