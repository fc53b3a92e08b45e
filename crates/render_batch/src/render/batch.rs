//! # Batch
//!
//! One drawable unit for one pass: which geometry to draw with which material,
//! pass and shaders, from which camera, under which light, at which world
//! transform. Batches are built fresh every frame from culling results and
//! are read-only afterwards; the only derived value is the sort key, computed
//! once when the batch enters a [`BatchQueue`](crate::render::BatchQueue).

use std::sync::Arc;

use crate::foundation::collections::Handle;
use crate::foundation::math::{Mat4, Mat4Ext, Vec4};
use crate::render::context::DrawContext;
use crate::render::device::{
    CompareMode, ParameterScope, ParameterValue, ShaderId, ShaderParameter, TextureUnit,
};
use crate::render::registry::{
    Camera, Geometry, LightContext, LightType, Material, Pass, PassType, TransformKey,
};
use crate::render::sort_key::SortKey;

/// How a geometry's vertices are transformed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GeometryType {
    /// Rigid geometry with a single world transform
    #[default]
    Static,
    /// Skinned geometry driven by bone matrices
    Skinned,
    /// Camera-facing billboards
    Billboard,
}

/// Per-instance shader data attached to a batch, such as skinning matrices
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderData {
    /// Identity of the data for the parameter cache
    pub id: u64,
    /// Float values uploaded as-is
    pub values: Arc<[f32]>,
}

/// Render descriptor of one drawable unit
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Geometry to draw
    pub geometry: Handle<Geometry>,
    /// Material to draw with
    pub material: Handle<Material>,
    /// Shading pass
    pub pass: Handle<Pass>,
    /// Camera the batch is rendered from
    pub camera: Handle<Camera>,
    /// Active light context, absent for unlit passes
    pub light_context: Option<Handle<LightContext>>,
    /// World transform owned by the scene
    pub transform: TransformKey,
    /// Vertex shader
    pub vertex_shader: Option<ShaderId>,
    /// Pixel shader
    pub pixel_shader: Option<ShaderId>,
    /// Base index of the vertex shader in the pass's variation table
    pub vertex_shader_index: usize,
    /// Vertex transform kind
    pub geometry_type: GeometryType,
    /// Draw with the camera projection only, ignoring the view transform
    pub override_view: bool,
    /// Per-instance shader data
    pub shader_data: Option<ShaderData>,
    /// Distance from the camera
    pub distance: f32,
    /// Draw before every non-priority batch
    pub has_priority: bool,
    sort_key: SortKey,
}

impl Batch {
    /// Create a static, unlit, non-priority batch
    pub fn new(
        geometry: Handle<Geometry>,
        material: Handle<Material>,
        pass: Handle<Pass>,
        camera: Handle<Camera>,
        transform: TransformKey,
    ) -> Self {
        Self {
            geometry,
            material,
            pass,
            camera,
            light_context: None,
            transform,
            vertex_shader: None,
            pixel_shader: None,
            vertex_shader_index: 0,
            geometry_type: GeometryType::Static,
            override_view: false,
            shader_data: None,
            distance: 0.0,
            has_priority: false,
            sort_key: SortKey::default(),
        }
    }

    /// Set the shader pair and the vertex shader's variation index
    pub fn with_shaders(
        mut self,
        vertex_shader: ShaderId,
        pixel_shader: ShaderId,
        vertex_shader_index: usize,
    ) -> Self {
        self.vertex_shader = Some(vertex_shader);
        self.pixel_shader = Some(pixel_shader);
        self.vertex_shader_index = vertex_shader_index;
        self
    }

    /// Set the light context
    pub fn with_light_context(mut self, light_context: Handle<LightContext>) -> Self {
        self.light_context = Some(light_context);
        self
    }

    /// Set the camera distance
    pub fn with_distance(mut self, distance: f32) -> Self {
        self.distance = distance;
        self
    }

    /// Mark the batch as priority
    pub fn with_priority(mut self, has_priority: bool) -> Self {
        self.has_priority = has_priority;
        self
    }

    /// Set the geometry type
    pub fn with_geometry_type(mut self, geometry_type: GeometryType) -> Self {
        self.geometry_type = geometry_type;
        self
    }

    /// Render with the camera projection only
    pub fn with_override_view(mut self, override_view: bool) -> Self {
        self.override_view = override_view;
        self
    }

    /// Attach per-instance shader data
    pub fn with_shader_data(mut self, shader_data: ShaderData) -> Self {
        self.shader_data = Some(shader_data);
        self
    }

    /// Recompute the sort key from the batch's state identities
    pub fn calculate_sort_key(&mut self) {
        self.sort_key = SortKey::new(
            self.has_priority,
            self.light_context,
            self.pass,
            self.material,
            self.geometry,
        );
    }

    /// The packed sort key
    pub const fn sort_key(&self) -> SortKey {
        self.sort_key
    }

    /// Whether the batch may be merged into an instanced group
    pub const fn is_instancing_eligible(&self) -> bool {
        matches!(self.geometry_type, GeometryType::Static)
            && !self.override_view
            && self.shader_data.is_none()
    }

    /// Set render state, bind shaders and upload every parameter and texture
    /// whose cached value is stale
    ///
    /// With `set_model_transform == false` the world transform is left for the
    /// caller to supply. Returns `false` without touching the device when the
    /// shader pair or a referenced resource is missing.
    pub fn prepare(&self, ctx: &mut DrawContext<'_>, set_model_transform: bool) -> bool {
        let (Some(vertex_shader), Some(pixel_shader)) = (self.vertex_shader, self.pixel_shader)
        else {
            return false;
        };

        let resources = ctx.resources;
        let (Some(pass), Some(material), Some(camera)) = (
            resources.pass(self.pass),
            resources.material(self.material),
            resources.camera(self.camera),
        ) else {
            log::warn!("Skipping batch with unknown pass, material or camera");
            return false;
        };
        let light = self.light_context.and_then(|handle| {
            let light = resources.light_context(handle);
            if light.is_none() {
                log::warn!("Batch references stale light context {:?}", handle);
            }
            light.map(|l| (handle, l))
        });

        let device = &mut *ctx.device;

        if pass.alpha_test {
            device.set_alpha_test(true, CompareMode::GreaterEqual, 0.5);
        } else {
            device.set_alpha_test(false, CompareMode::Always, 0.0);
        }
        device.set_blend_mode(pass.blend_mode);
        device.set_cull_mode(if pass.pass_type == PassType::Shadow {
            material.shadow_cull_mode
        } else {
            material.cull_mode
        });
        device.set_depth_test(pass.depth_test);
        device.set_depth_write(pass.depth_write);

        device.set_shaders(vertex_shader, pixel_shader);

        for (param, value) in ctx.shader_parameters {
            if device.need_parameter_update(*param, ParameterScope::Globals) {
                device.set_shader_parameter(*param, value);
            }
        }

        let camera_scope = ParameterScope::Camera(self.camera);
        if device.need_parameter_update(ShaderParameter::CameraPos, camera_scope) {
            let position = ParameterValue::Vec3(camera.position);
            device.set_shader_parameter(ShaderParameter::CameraPos, &position);
        }
        if device.need_parameter_update(ShaderParameter::CameraRot, camera_scope) {
            let rotation = ParameterValue::Mat3(camera.rotation);
            device.set_shader_parameter(ShaderParameter::CameraRot, &rotation);
        }
        if self.override_view {
            let override_scope = ParameterScope::CameraOverride(self.camera);
            if device.need_parameter_update(ShaderParameter::ViewProj, override_scope) {
                let projection = ParameterValue::Mat4(camera.projection);
                device.set_shader_parameter(ShaderParameter::ViewProj, &projection);
            }
        } else if device.need_parameter_update(ShaderParameter::ViewProj, camera_scope) {
            let view_projection = ParameterValue::Mat4(camera.view_projection());
            device.set_shader_parameter(ShaderParameter::ViewProj, &view_projection);
        }
        if device.need_parameter_update(ShaderParameter::ViewRightVector, camera_scope) {
            let right = ParameterValue::Vec3(camera.right());
            device.set_shader_parameter(ShaderParameter::ViewRightVector, &right);
        }
        if device.need_parameter_update(ShaderParameter::ViewUpVector, camera_scope) {
            let up = ParameterValue::Vec3(camera.up());
            device.set_shader_parameter(ShaderParameter::ViewUpVector, &up);
        }

        if set_model_transform
            && device.need_parameter_update(
                ShaderParameter::Model,
                ParameterScope::Transform(self.transform),
            )
        {
            let world = ctx.transforms.get(self.transform).copied().unwrap_or_else(Mat4::identity);
            let model = ParameterValue::Mat3x4(world.to_affine_rows());
            device.set_shader_parameter(ShaderParameter::Model, &model);
        }

        if let Some(data) = self.shader_data.as_ref().filter(|d| !d.values.is_empty()) {
            let data_scope = ParameterScope::ShaderData(data.id);
            if device.need_parameter_update(ShaderParameter::SkinMatrices, data_scope) {
                let matrices = ParameterValue::Floats(data.values.to_vec());
                device.set_shader_parameter(ShaderParameter::SkinMatrices, &matrices);
            }
        }

        if let Some((handle, light)) = light {
            let light_scope = ParameterScope::Light(handle);
            for (param, value) in &light.parameters {
                if device.need_parameter_update(*param, light_scope) {
                    device.set_shader_parameter(*param, value);
                }
            }

            if let Some(shadow) = &light.shadow {
                for (param, value) in &shadow.parameters {
                    if device.need_parameter_update(*param, light_scope) {
                        device.set_shader_parameter(*param, value);
                    }
                }
                let shadow_scope = ParameterScope::ShadowMap(shadow.texture);
                let offsets_param = ShaderParameter::ShadowSampleOffsets;
                if device.need_parameter_update(offsets_param, shadow_scope) {
                    let offsets = Vec4::new(
                        1.0 / shadow.width.max(1) as f32,
                        1.0 / shadow.height.max(1) as f32,
                        0.0,
                        0.0,
                    );
                    let offsets = ParameterValue::Vec4(offsets);
                    device.set_shader_parameter(offsets_param, &offsets);
                }
            }
        }

        let material_scope = ParameterScope::Material(self.material);
        for (param, value) in &material.parameters {
            if device.need_parameter_update(*param, material_scope) {
                device.set_shader_parameter(*param, value);
            }
        }
        for unit in TextureUnit::MATERIAL_UNITS {
            if device.need_texture_unit(unit) {
                device.set_texture(unit, material.texture(unit));
            }
        }

        if let Some((_, light)) = light {
            if let Some(shadow) = &light.shadow {
                if device.need_texture_unit(TextureUnit::ShadowMap) {
                    device.set_texture(TextureUnit::ShadowMap, Some(shadow.texture));
                }
            }
            let defaults = resources.default_textures;
            if device.need_texture_unit(TextureUnit::LightRamp) {
                let ramp = light.ramp_texture.or(defaults.light_ramp);
                device.set_texture(TextureUnit::LightRamp, ramp);
            }
            if device.need_texture_unit(TextureUnit::LightShape) {
                let shape = light.shape_texture.or(match light.light_type {
                    LightType::Spot => defaults.light_spot,
                    _ => None,
                });
                device.set_texture(TextureUnit::LightShape, shape);
            }
        }

        true
    }

    /// Prepare and issue one non-instanced draw of the batch's geometry
    pub fn draw(&self, ctx: &mut DrawContext<'_>) {
        let Some(geometry) = ctx.resources.geometry(self.geometry) else {
            log::warn!("Skipping batch with unknown geometry {:?}", self.geometry);
            ctx.stats.skipped_batches += 1;
            return;
        };
        if !self.prepare(ctx, true) {
            ctx.stats.skipped_batches += 1;
            return;
        }

        ctx.device.set_index_buffer(geometry.index_buffer);
        ctx.device.set_vertex_buffers(&geometry.vertex_streams, 0);
        ctx.device.draw(&geometry.range);
        ctx.stats.draw_calls += 1;
    }
}
