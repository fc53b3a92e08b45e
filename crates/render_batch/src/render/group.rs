//! # Batch Groups
//!
//! Batches that share light context, pass, material and geometry differ only
//! in their world transform and can be drawn with one instanced draw call. A
//! [`BatchGroup`] keeps the shared state once and a list of per-instance
//! transforms and distances.
//!
//! A group is drawn instanced only when it is large enough and its geometry is
//! small enough to be worth it (see [`InstancingConfig::allows_instancing`]).
//! Otherwise it falls back to one regular draw per instance.

use crate::config::InstancingConfig;
use crate::foundation::collections::Handle;
use crate::foundation::math::{Mat4, Mat4Ext};
use crate::render::batch::Batch;
use crate::render::context::DrawContext;
use crate::render::device::{ParameterValue, ShaderId, ShaderParameter};
use crate::render::instancing::{
    InstanceAllocator, InstanceTransform, GEOMETRY_INSTANCED, MAX_LIGHT_VS_VARIATIONS,
};
use crate::render::registry::{
    Camera, Geometry, LightContext, Material, Pass, TransformKey, TransformStore,
};

/// State shared by every batch of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchGroupKey {
    /// Light context
    pub light_context: Option<Handle<LightContext>>,
    /// Shading pass
    pub pass: Handle<Pass>,
    /// Material
    pub material: Handle<Material>,
    /// Geometry
    pub geometry: Handle<Geometry>,
}

impl From<&Batch> for BatchGroupKey {
    fn from(batch: &Batch) -> Self {
        Self {
            light_context: batch.light_context,
            pass: batch.pass,
            material: batch.material,
            geometry: batch.geometry,
        }
    }
}

/// Transform and distance of one group member
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceData {
    /// World transform owned by the scene
    pub transform: TransformKey,
    /// Distance from the camera
    pub distance: f32,
}

/// Batches merged for instanced drawing
#[derive(Debug, Clone, PartialEq)]
pub struct BatchGroup {
    /// Geometry shared by all instances
    pub geometry: Handle<Geometry>,
    /// Material shared by all instances
    pub material: Handle<Material>,
    /// Pass shared by all instances
    pub pass: Handle<Pass>,
    /// Camera shared by all instances
    pub camera: Handle<Camera>,
    /// Light context shared by all instances
    pub light_context: Option<Handle<LightContext>>,
    /// Vertex shader of the non-instanced variation
    pub vertex_shader: Option<ShaderId>,
    /// Pixel shader
    pub pixel_shader: Option<ShaderId>,
    /// Base index of the vertex shader in the pass's variation table
    pub vertex_shader_index: usize,
    /// Index count of the geometry, fixed when the group is created
    pub index_count: u32,
    /// Members in insertion order until sorted
    pub instances: Vec<InstanceData>,
    /// First slot in the shared instancing buffer, once transforms are written
    pub start_index: Option<usize>,
}

impl BatchGroup {
    /// Create a group seeded from its first batch
    pub fn new(batch: &Batch, index_count: u32) -> Self {
        Self {
            geometry: batch.geometry,
            material: batch.material,
            pass: batch.pass,
            camera: batch.camera,
            light_context: batch.light_context,
            vertex_shader: batch.vertex_shader,
            pixel_shader: batch.pixel_shader,
            vertex_shader_index: batch.vertex_shader_index,
            index_count,
            instances: vec![InstanceData {
                transform: batch.transform,
                distance: batch.distance,
            }],
            start_index: None,
        }
    }

    /// Append a member
    pub fn push(&mut self, transform: TransformKey, distance: f32) {
        self.instances.push(InstanceData { transform, distance });
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the group has no members
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Whether the group qualifies for an instanced draw under `config`
    pub fn is_instanced(&self, config: &InstancingConfig) -> bool {
        config.allows_instancing(self.instances.len(), self.index_count)
    }

    /// Sort members nearest first
    pub fn sort_front_to_back(&mut self) {
        self.instances.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    }

    /// Distance of the first member
    pub fn first_distance(&self) -> f32 {
        self.instances.first().map_or(0.0, |i| i.distance)
    }

    /// Write member transforms into the shared instancing buffer
    ///
    /// Does nothing for groups that will not be drawn instanced, so they use
    /// no buffer space. Otherwise records the current cursor as the group's
    /// start index and writes one transform per member in member order.
    pub fn assign_instance_slots(
        &mut self,
        config: &InstancingConfig,
        transforms: &TransformStore,
        allocator: &mut InstanceAllocator<'_>,
    ) {
        if !self.is_instanced(config) {
            return;
        }

        let Some((start, slots)) = allocator.allocate(self.instances.len()) else {
            log::warn!(
                "Instancing buffer exhausted: {} instances requested, {} free",
                self.instances.len(),
                allocator.remaining()
            );
            return;
        };
        for (slot, instance) in slots.iter_mut().zip(&self.instances) {
            *slot = instance_transform(transforms, instance.transform);
        }
        self.start_index = Some(start);
        log::trace!("Group assigned instance slots {}..{}", start, start + self.instances.len());
    }

    /// Batch carrying the group's shared state
    fn shared_batch(&self) -> Option<Batch> {
        let first = self.instances.first()?;
        let mut batch =
            Batch::new(self.geometry, self.material, self.pass, self.camera, first.transform);
        batch.light_context = self.light_context;
        batch.vertex_shader = self.vertex_shader;
        batch.pixel_shader = self.pixel_shader;
        batch.vertex_shader_index = self.vertex_shader_index;
        Some(batch)
    }

    /// Draw all members, instanced when possible
    pub fn draw(&self, ctx: &mut DrawContext<'_>, config: &InstancingConfig) {
        let Some(mut batch) = self.shared_batch() else {
            return;
        };
        let resources = ctx.resources;
        let (Some(geometry), Some(pass)) =
            (resources.geometry(self.geometry), resources.pass(self.pass))
        else {
            log::warn!("Skipping group with unknown geometry or pass");
            ctx.stats.skipped_groups += 1;
            return;
        };

        if ctx.instancing_buffer.is_none() || !self.is_instanced(config) {
            if !batch.prepare(ctx, false) {
                ctx.stats.skipped_batches += self.instances.len();
                return;
            }

            ctx.device.set_index_buffer(geometry.index_buffer);
            ctx.device.set_vertex_buffers(&geometry.vertex_streams, 0);
            for instance in &self.instances {
                let world =
                    ctx.transforms.get(instance.transform).copied().unwrap_or_else(Mat4::identity);
                let model = ParameterValue::Mat3x4(world.to_affine_rows());
                ctx.device.set_shader_parameter(ShaderParameter::Model, &model);
                ctx.device.draw(&geometry.range);
                ctx.stats.draw_calls += 1;
            }
            ctx.device.clear_transform_sources();
            return;
        }

        let stride = if pass.pass_type.has_light_variations() {
            MAX_LIGHT_VS_VARIATIONS
        } else {
            1
        };
        let instanced_index = self.vertex_shader_index + GEOMETRY_INSTANCED * stride;
        batch.vertex_shader = pass.vertex_shader(instanced_index);
        if !batch.prepare(ctx, false) {
            ctx.stats.skipped_batches += self.instances.len();
            return;
        }

        let DrawContext {
            device,
            transforms,
            instancing_buffer,
            stats,
            scratch_streams,
            ..
        } = ctx;
        let Some(buffer) = instancing_buffer.as_deref_mut() else {
            return;
        };

        scratch_streams.clear();
        scratch_streams.extend_from_slice(&geometry.vertex_streams);
        scratch_streams.push(buffer.stream());

        if let Some(start_index) = self.start_index {
            device.set_index_buffer(geometry.index_buffer);
            device.set_vertex_buffers(scratch_streams, start_index);
            device.draw_instanced(&geometry.range, self.instances.len());
            stats.instanced_draw_calls += 1;
            stats.instances += self.instances.len();
        } else {
            // No slots from the frame upload: fill and draw in chunks that
            // fit past the elements other groups still draw from.
            let reserved = buffer.reserved();
            let mut free = buffer.capacity().saturating_sub(reserved);
            if free == 0 && buffer.ensure_capacity(reserved + self.instances.len()) {
                free = buffer.capacity().saturating_sub(reserved);
            }
            if free == 0 {
                log::warn!("Instancing buffer has no free capacity; skipping group");
                stats.skipped_groups += 1;
                scratch_streams.clear();
                return;
            }
            for chunk in self.instances.chunks(free) {
                let slots = match buffer.lock(reserved, chunk.len(), reserved == 0) {
                    Ok(slots) => slots,
                    Err(err) => {
                        log::warn!("Skipping instanced group draw: {}", err);
                        stats.skipped_groups += 1;
                        scratch_streams.clear();
                        return;
                    }
                };
                for (slot, instance) in slots.iter_mut().zip(chunk) {
                    *slot = instance_transform(transforms, instance.transform);
                }
                buffer.unlock();

                device.set_index_buffer(geometry.index_buffer);
                device.set_vertex_buffers(scratch_streams, reserved);
                device.draw_instanced(&geometry.range, chunk.len());
                stats.instanced_draw_calls += 1;
                stats.instances += chunk.len();
            }
        }

        scratch_streams.clear();
    }
}

fn instance_transform(transforms: &TransformStore, key: TransformKey) -> InstanceTransform {
    transforms.get(key).map_or(InstanceTransform::IDENTITY, InstanceTransform::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::render::backends::recording::{CpuInstancingBuffer, DeviceCommand, RecordingDevice};
    use crate::render::device::{BufferId, ShaderParameterMap, VertexElements, VertexStream};
    use crate::render::registry::{PassType, ResourceRegistry};

    const BASE_VS: ShaderId = ShaderId(1);
    const INSTANCED_VS: ShaderId = ShaderId(3);
    const LIT_INSTANCED_VS: ShaderId = ShaderId(13);
    const PS: ShaderId = ShaderId(100);

    struct Fixture {
        registry: ResourceRegistry,
        transforms: TransformStore,
        globals: ShaderParameterMap,
        keys: Vec<TransformKey>,
        base: Handle<Pass>,
        light: Handle<Pass>,
        geometry: Handle<Geometry>,
        material: Handle<Material>,
        camera: Handle<Camera>,
    }

    fn fixture(count: usize) -> Fixture {
        let mut registry = ResourceRegistry::new();
        let geometry = registry.add_geometry(Geometry::indexed(
            BufferId(1),
            vec![VertexStream::new(BufferId(2), VertexElements::POSITION)],
            36,
            24,
        ));
        let material = registry.add_material(Material::new());

        let mut base_vs = vec![None; GEOMETRY_INSTANCED + 1];
        base_vs[0] = Some(BASE_VS);
        base_vs[GEOMETRY_INSTANCED] = Some(INSTANCED_VS);
        let base =
            registry.add_pass(Pass::new(PassType::Base).with_shaders(base_vs, vec![Some(PS)]));

        let mut light_vs = vec![None; GEOMETRY_INSTANCED * MAX_LIGHT_VS_VARIATIONS + 1];
        light_vs[0] = Some(BASE_VS);
        light_vs[GEOMETRY_INSTANCED * MAX_LIGHT_VS_VARIATIONS] = Some(LIT_INSTANCED_VS);
        let light =
            registry.add_pass(Pass::new(PassType::Light).with_shaders(light_vs, vec![Some(PS)]));

        let camera = registry.add_camera(Camera::new(&Mat4::identity(), Mat4::identity()));

        let mut transforms = TransformStore::with_key();
        let keys = (0..count)
            .map(|i| transforms.insert(Mat4::new_translation(&Vec3::new(i as f32, 0.0, 0.0))))
            .collect();

        Fixture {
            registry,
            transforms,
            globals: ShaderParameterMap::new(),
            keys,
            base,
            light,
            geometry,
            material,
            camera,
        }
    }

    fn group(f: &Fixture, pass: Handle<Pass>) -> BatchGroup {
        let first = Batch::new(f.geometry, f.material, pass, f.camera, f.keys[0])
            .with_shaders(BASE_VS, PS, 0)
            .with_distance(0.0);
        let mut group = BatchGroup::new(&first, 36);
        for (i, key) in f.keys.iter().enumerate().skip(1) {
            group.push(*key, i as f32);
        }
        group
    }

    #[test]
    fn test_key_ignores_transform_and_distance() {
        let f = fixture(2);
        let a = Batch::new(f.geometry, f.material, f.base, f.camera, f.keys[0]).with_distance(1.0);
        let b = Batch::new(f.geometry, f.material, f.base, f.camera, f.keys[1]).with_distance(9.0);
        assert_eq!(BatchGroupKey::from(&a), BatchGroupKey::from(&b));
    }

    #[test]
    fn test_front_to_back_instance_order() {
        let f = fixture(3);
        let first =
            Batch::new(f.geometry, f.material, f.base, f.camera, f.keys[0]).with_distance(5.0);
        let mut group = BatchGroup::new(&first, 36);
        group.push(f.keys[1], 1.0);
        group.push(f.keys[2], 3.0);
        group.sort_front_to_back();
        let distances: Vec<f32> = group.instances.iter().map(|i| i.distance).collect();
        assert_eq!(distances, vec![1.0, 3.0, 5.0]);
        assert_eq!(group.first_distance(), 1.0);
    }

    #[test]
    fn test_assign_slots_writes_consecutive_transforms() {
        let f = fixture(3);
        let mut group = group(&f, f.base);
        let config = InstancingConfig::new(2, 100);
        let mut storage = vec![InstanceTransform::IDENTITY; 8];
        let mut allocator = InstanceAllocator::new(&mut storage);
        allocator.allocate(1).unwrap();

        group.assign_instance_slots(&config, &f.transforms, &mut allocator);

        assert_eq!(group.start_index, Some(1));
        assert_eq!(allocator.cursor(), 4);
        assert_eq!(storage[1].rows[0][3], 0.0);
        assert_eq!(storage[2].rows[0][3], 1.0);
        assert_eq!(storage[3].rows[0][3], 2.0);
    }

    #[test]
    fn test_small_group_uses_no_buffer_space() {
        let f = fixture(3);
        let mut group = group(&f, f.base);
        let config = InstancingConfig::new(4, 100);
        let mut storage = vec![InstanceTransform::IDENTITY; 8];
        let mut allocator = InstanceAllocator::new(&mut storage);
        group.assign_instance_slots(&config, &f.transforms, &mut allocator);
        assert_eq!(group.start_index, None);
        assert_eq!(allocator.cursor(), 0);
    }

    #[test]
    fn test_oversized_geometry_uses_no_buffer_space() {
        let f = fixture(3);
        let mut group = group(&f, f.base);
        let config = InstancingConfig::new(2, 11);
        let mut storage = vec![InstanceTransform::IDENTITY; 8];
        let mut allocator = InstanceAllocator::new(&mut storage);
        group.assign_instance_slots(&config, &f.transforms, &mut allocator);
        assert_eq!(group.start_index, None);
    }

    #[test]
    fn test_fallback_draws_each_instance() {
        let f = fixture(3);
        let group = group(&f, f.base);
        let config = InstancingConfig::new(4, 100);
        let mut device = RecordingDevice::new();
        let mut buffer = CpuInstancingBuffer::new(BufferId(9), 16);
        let mut ctx = DrawContext::new(&mut device, &f.registry, &f.transforms, &f.globals)
            .with_instancing_buffer(&mut buffer);
        group.draw(&mut ctx, &config);

        assert_eq!(ctx.stats.draw_calls, 3);
        assert_eq!(device.draw_count(), 3);
        assert_eq!(device.uploads_of(ShaderParameter::Model), 3);
        assert!(device.instanced_draws().is_empty());
        assert!(device.commands().contains(&DeviceCommand::Shaders(BASE_VS, PS)));
        assert_eq!(device.commands().last(), Some(&DeviceCommand::ClearTransformSources));
    }

    #[test]
    fn test_no_buffer_forces_fallback() {
        let f = fixture(5);
        let group = group(&f, f.base);
        let config = InstancingConfig::new(2, 100);
        let mut device = RecordingDevice::new();
        let mut ctx = DrawContext::new(&mut device, &f.registry, &f.transforms, &f.globals);
        group.draw(&mut ctx, &config);
        assert_eq!(device.draw_count(), 5);
        assert!(device.instanced_draws().is_empty());
    }

    #[test]
    fn test_prefilled_group_draws_once_at_its_offset() {
        let f = fixture(4);
        let mut group = group(&f, f.base);
        group.start_index = Some(6);
        let config = InstancingConfig::new(2, 100);
        let mut device = RecordingDevice::new();
        let mut buffer = CpuInstancingBuffer::new(BufferId(9), 16);
        let mut ctx = DrawContext::new(&mut device, &f.registry, &f.transforms, &f.globals)
            .with_instancing_buffer(&mut buffer);
        group.draw(&mut ctx, &config);

        assert_eq!(device.instanced_draws(), vec![4]);
        assert!(device.commands().contains(&DeviceCommand::Shaders(INSTANCED_VS, PS)));
        let streams = device.commands().iter().find_map(|c| match c {
            DeviceCommand::VertexBuffers(streams, offset) => Some((streams.clone(), *offset)),
            _ => None,
        });
        let (streams, offset) = streams.unwrap();
        assert_eq!(offset, 6);
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[1].buffer, BufferId(9));
        assert!(buffer.uploads().is_empty());
    }

    #[test]
    fn test_unfilled_group_draws_in_capacity_chunks() {
        let f = fixture(5);
        let group = group(&f, f.base);
        let config = InstancingConfig::new(2, 100);
        let mut device = RecordingDevice::new();
        let mut buffer = CpuInstancingBuffer::new(BufferId(9), 2);
        let mut ctx = DrawContext::new(&mut device, &f.registry, &f.transforms, &f.globals)
            .with_instancing_buffer(&mut buffer);
        group.draw(&mut ctx, &config);

        assert_eq!(ctx.stats.instanced_draw_calls, 3);
        assert_eq!(device.instanced_draws(), vec![2, 2, 1]);
        let uploads = buffer.uploads();
        assert_eq!(uploads.len(), 3);
        assert_eq!(uploads[1][0].rows[0][3], 2.0);
        assert_eq!(uploads[2][0].rows[0][3], 4.0);
    }

    #[test]
    fn test_lock_failure_abandons_group() {
        let f = fixture(5);
        let group = group(&f, f.base);
        let config = InstancingConfig::new(2, 100);
        let mut device = RecordingDevice::new();
        let mut buffer = CpuInstancingBuffer::new(BufferId(9), 2);
        buffer.set_fail_locks(true);
        let mut ctx = DrawContext::new(&mut device, &f.registry, &f.transforms, &f.globals)
            .with_instancing_buffer(&mut buffer);
        group.draw(&mut ctx, &config);

        assert_eq!(ctx.stats.skipped_groups, 1);
        assert!(device.instanced_draws().is_empty());
        assert_eq!(device.draw_count(), 0);
    }

    #[test]
    fn test_lit_pass_uses_per_light_instanced_variation() {
        let f = fixture(3);
        let mut group = group(&f, f.light);
        group.start_index = Some(0);
        let config = InstancingConfig::new(2, 100);
        let mut device = RecordingDevice::new();
        let mut buffer = CpuInstancingBuffer::new(BufferId(9), 16);
        let mut ctx = DrawContext::new(&mut device, &f.registry, &f.transforms, &f.globals)
            .with_instancing_buffer(&mut buffer);
        group.draw(&mut ctx, &config);
        assert!(device.commands().contains(&DeviceCommand::Shaders(LIT_INSTANCED_VS, PS)));
        assert_eq!(device.instanced_draws(), vec![3]);
    }

    #[test]
    fn test_missing_instanced_variation_skips_group() {
        let mut f = fixture(3);
        let without_instanced = Pass::new(PassType::Base)
            .with_shaders(vec![Some(BASE_VS)], vec![Some(PS)]);
        f.base = f.registry.add_pass(without_instanced);
        let group = group(&f, f.base);
        let config = InstancingConfig::new(2, 100);
        let mut device = RecordingDevice::new();
        let mut buffer = CpuInstancingBuffer::new(BufferId(9), 16);
        let mut ctx = DrawContext::new(&mut device, &f.registry, &f.transforms, &f.globals)
            .with_instancing_buffer(&mut buffer);
        group.draw(&mut ctx, &config);
        assert_eq!(ctx.stats.skipped_batches, 3);
        assert!(device.commands().is_empty());
    }
}
