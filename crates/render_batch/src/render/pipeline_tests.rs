//! Tests for the collect, sort, allocate and draw frame flow

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::InstancingConfig;
    use crate::foundation::collections::Handle;
    use crate::foundation::logging;
    use crate::render::backends::{CpuInstancingBuffer, DeviceCommand, RecordingDevice};
    use crate::foundation::math::{Mat4, Vec3};

    const VS: ShaderId = ShaderId(1);
    const INSTANCED_VS: ShaderId = ShaderId(3);
    const PS: ShaderId = ShaderId(100);
    const PRIORITY_PS: ShaderId = ShaderId(101);

    /// A small scene: a cube and a dense mesh, two materials, opaque and alpha passes
    struct World {
        registry: ResourceRegistry,
        transforms: TransformStore,
        globals: ShaderParameterMap,
        cube: Handle<Geometry>,
        dense: Handle<Geometry>,
        stone: Handle<Material>,
        glass: Handle<Material>,
        opaque: Handle<Pass>,
        alpha: Handle<Pass>,
        camera: Handle<Camera>,
    }

    impl World {
        fn new() -> Self {
            logging::init_for_tests();

            let mut registry = ResourceRegistry::new();
            let elements = VertexElements::POSITION | VertexElements::NORMAL;
            let streams = vec![VertexStream::new(BufferId(2), elements)];
            let cube = Geometry::indexed(BufferId(1), streams.clone(), 36, 24);
            let cube = registry.add_geometry(cube);
            let dense = registry.add_geometry(Geometry::indexed(BufferId(3), streams, 3000, 1200));
            let textured = |texture| Material::new().with_texture(TextureUnit::Diffuse, texture);
            let stone = registry.add_material(textured(TextureId(1)));
            let glass = registry.add_material(textured(TextureId(2)));

            let mut vertex_shaders = vec![None; GEOMETRY_INSTANCED + 1];
            vertex_shaders[0] = Some(VS);
            vertex_shaders[GEOMETRY_INSTANCED] = Some(INSTANCED_VS);
            let opaque = registry.add_pass(
                Pass::new(PassType::Base).with_shaders(vertex_shaders.clone(), vec![Some(PS)]),
            );
            let alpha = registry.add_pass(
                Pass::new(PassType::Base)
                    .with_blend_mode(BlendMode::Alpha)
                    .with_depth_write(false)
                    .with_shaders(vertex_shaders, vec![Some(PS)]),
            );
            let camera = registry.add_camera(Camera::new(&Mat4::identity(), Mat4::identity()));

            Self {
                registry,
                transforms: TransformStore::with_key(),
                globals: ShaderParameterMap::new(),
                cube,
                dense,
                stone,
                glass,
                opaque,
                alpha,
                camera,
            }
        }

        fn batch(
            &mut self,
            geometry: Handle<Geometry>,
            material: Handle<Material>,
            pass: Handle<Pass>,
            x: f32,
        ) -> Batch {
            let transform = self.transforms.insert(Mat4::new_translation(&Vec3::new(x, 0.0, 0.0)));
            Batch::new(geometry, material, pass, self.camera, transform)
                .with_shaders(VS, PS, 0)
                .with_distance(x.abs())
        }
    }

    fn prepare(
        world: &World,
        queues: &mut [&mut BatchQueue],
        buffer: &mut CpuInstancingBuffer,
    ) -> Result<usize, InstancingError> {
        prepare_instancing(queues, &world.transforms, Some(buffer))
    }

    fn draw_queues(
        world: &World,
        queues: &[&BatchQueue],
        buffer: &mut CpuInstancingBuffer,
    ) -> (RecordingDevice, DrawStats) {
        let mut device = RecordingDevice::new();
        let stats = {
            let mut ctx =
                DrawContext::new(&mut device, &world.registry, &world.transforms, &world.globals)
                    .with_instancing_buffer(buffer);
            for queue in queues {
                queue.draw(&mut ctx);
            }
            ctx.stats
        };
        (device, stats)
    }

    #[test]
    fn test_full_frame_with_shared_instancing_buffer() {
        let mut world = World::new();
        let config = InstancingConfig::new(2, 500);
        let mut opaque = BatchQueue::new(config);
        let mut transparent = BatchQueue::new(config);

        for x in [4.0, 1.0, 3.0, 2.0] {
            let batch = world.batch(world.cube, world.stone, world.opaque, x);
            opaque.add_batch(batch, &world.registry, false);
        }
        let skinned = world
            .batch(world.cube, world.stone, world.opaque, 6.0)
            .with_geometry_type(GeometryType::Skinned);
        opaque.add_batch(skinned, &world.registry, false);
        for x in [10.0, 20.0] {
            let batch = world.batch(world.cube, world.glass, world.alpha, x);
            transparent.add_batch(batch, &world.registry, true);
        }

        let blend_mode = |pass| world.registry.pass(pass).map(|p| p.blend_mode).unwrap_or_default();
        opaque.sort(SortOrder::from_blend_mode(blend_mode(world.opaque)));
        transparent.sort(SortOrder::from_blend_mode(blend_mode(world.alpha)));

        let mut buffer = CpuInstancingBuffer::new(BufferId(9), 1);
        let written = prepare(&world, &mut [&mut opaque, &mut transparent], &mut buffer).unwrap();
        assert_eq!(written, 4);

        let (device, stats) = draw_queues(&world, &[&opaque, &transparent], &mut buffer);

        assert_eq!(stats.instanced_draw_calls, 1);
        assert_eq!(stats.instances, 4);
        assert_eq!(stats.draw_calls, 3);
        assert_eq!(stats.skipped_batches, 0);
        assert_eq!(device.instanced_draws(), vec![4]);
        assert_eq!(device.draw_count(), 3);

        // Transparent batches are drawn farthest first.
        let transforms: Vec<f32> = device
            .uploaded_values(ShaderParameter::Model)
            .into_iter()
            .filter_map(|value| match value {
                ParameterValue::Mat3x4(rows) => Some(rows[0][3]),
                _ => None,
            })
            .collect();
        assert_eq!(transforms, vec![6.0, 20.0, 10.0]);

        // Instances were written nearest first.
        let written: Vec<f32> = buffer.data()[..4].iter().map(|t| t.rows[0][3]).collect();
        assert_eq!(written, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_priority_batches_drawn_first() {
        let mut world = World::new();
        let mut queue = BatchQueue::new(InstancingConfig::new(2, 500));
        for x in [1.0, 2.0, 3.0] {
            let batch = world.batch(world.cube, world.stone, world.opaque, x);
            queue.add_batch(batch, &world.registry, true);
        }
        let priority = world
            .batch(world.cube, world.glass, world.opaque, 300.0)
            .with_shaders(VS, PRIORITY_PS, 0)
            .with_priority(true);
        queue.add_batch(priority, &world.registry, true);

        for order in [SortOrder::FrontToBack, SortOrder::BackToFront] {
            queue.sort(order);
            let mut buffer = CpuInstancingBuffer::new(BufferId(9), 16);
            let (device, _) = draw_queues(&world, &[&queue], &mut buffer);
            let first_shaders = device.commands().iter().find_map(|c| match c {
                DeviceCommand::Shaders(vs, ps) => Some((*vs, *ps)),
                _ => None,
            });
            assert_eq!(first_shaders, Some((VS, PRIORITY_PS)));
        }
    }

    #[test]
    fn test_dense_geometry_drawn_individually() {
        let mut world = World::new();
        let mut queue = BatchQueue::new(InstancingConfig::new(2, 500));
        for i in 0..100 {
            let batch = world.batch(world.dense, world.stone, world.opaque, i as f32);
            queue.add_batch(batch, &world.registry, false);
        }
        queue.sort_front_to_back();

        let mut buffer = CpuInstancingBuffer::new(BufferId(9), 16);
        assert_eq!(prepare(&world, &mut [&mut queue], &mut buffer), Ok(0));
        let (device, stats) = draw_queues(&world, &[&queue], &mut buffer);

        assert_eq!(queue.loose_batches().len(), 100);
        assert_eq!(stats.draw_calls, 100);
        assert_eq!(device.draw_count(), 100);
        assert!(device.instanced_draws().is_empty());
    }

    #[test]
    fn test_group_without_offset_drawn_in_chunks() {
        let mut world = World::new();
        let mut queue = BatchQueue::new(InstancingConfig::new(2, 500));
        for x in [1.0, 2.0, 3.0, 4.0, 5.0] {
            let batch = world.batch(world.cube, world.stone, world.opaque, x);
            queue.add_batch(batch, &world.registry, false);
        }
        queue.sort_front_to_back();

        let mut buffer = CpuInstancingBuffer::new(BufferId(9), 2)
            .with_stream_offset(false)
            .with_max_capacity(2);
        assert_eq!(prepare(&world, &mut [&mut queue], &mut buffer), Ok(0));
        let (device, stats) = draw_queues(&world, &[&queue], &mut buffer);

        assert_eq!(device.instanced_draws(), vec![2, 2, 1]);
        assert_eq!(stats.instances, 5);
        assert_eq!(buffer.uploads().len(), 3);
    }

    #[test]
    fn test_resorted_queue_keeps_other_queue_instances() {
        let mut world = World::new();
        let config = InstancingConfig::new(2, 500);
        let mut near = BatchQueue::new(config);
        let mut far = BatchQueue::new(config);
        for x in [1.0, 2.0] {
            let batch = world.batch(world.cube, world.stone, world.opaque, x);
            near.add_batch(batch, &world.registry, false);
        }
        for x in [100.0, 200.0] {
            let batch = world.batch(world.cube, world.stone, world.opaque, x);
            far.add_batch(batch, &world.registry, false);
        }
        near.sort_front_to_back();
        far.sort_front_to_back();

        let mut buffer = CpuInstancingBuffer::new(BufferId(9), 4);
        assert_eq!(prepare(&world, &mut [&mut near, &mut far], &mut buffer), Ok(4));

        // Sorting again drops the offsets of this queue only.
        far.sort_front_to_back();
        assert!(far.groups().all(|g| g.start_index.is_none()));
        let (device, stats) = draw_queues(&world, &[&near, &far], &mut buffer);

        let near_slots: Vec<f32> = buffer.data()[..2].iter().map(|t| t.rows[0][3]).collect();
        assert_eq!(near_slots, vec![1.0, 2.0]);
        let far_slots: Vec<f32> = buffer.data()[4..6].iter().map(|t| t.rows[0][3]).collect();
        assert_eq!(far_slots, vec![100.0, 200.0]);

        let offsets: Vec<usize> = device
            .commands()
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::VertexBuffers(_, offset) => Some(*offset),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![0, 4]);
        assert_eq!(device.instanced_draws(), vec![2, 2]);
        assert_eq!(stats.skipped_groups, 0);
    }

    #[test]
    fn test_shared_camera_uploaded_once() {
        let mut world = World::new();
        let mut queue = BatchQueue::default();
        for x in [1.0, 2.0, 3.0] {
            let batch = world.batch(world.cube, world.stone, world.opaque, x);
            queue.add_batch(batch, &world.registry, true);
        }
        queue.sort_front_to_back();

        let mut buffer = CpuInstancingBuffer::new(BufferId(9), 16);
        let (device, _) = draw_queues(&world, &[&queue], &mut buffer);

        assert_eq!(device.uploads_of(ShaderParameter::ViewProj), 1);
        assert_eq!(device.uploads_of(ShaderParameter::CameraPos), 1);
        assert_eq!(device.uploads_of(ShaderParameter::Model), 3);
        assert_eq!(device.draw_count(), 3);
    }

    #[test]
    fn test_unsorted_queue_draws_nothing() {
        let mut world = World::new();
        let mut queue = BatchQueue::default();
        let batch = world.batch(world.cube, world.stone, world.opaque, 1.0);
        queue.add_batch(batch, &world.registry, true);

        let mut buffer = CpuInstancingBuffer::new(BufferId(9), 16);
        let (device, stats) = draw_queues(&world, &[&queue], &mut buffer);
        assert_eq!(stats.total_draw_calls(), 0);
        assert!(device.commands().is_empty());
    }
}
