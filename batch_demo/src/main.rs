//! Batching demo application
//!
//! Builds a synthetic asteroid field and runs a few frames through the
//! collect, sort, allocate and draw phases using the recording backend, then
//! logs what each frame would have submitted to the GPU.
//!
//! Usage: `batch_demo [config.toml|config.ron]`

use rand::Rng;
use render_batch::config::{Config, ConfigError, InstancingConfig};
use render_batch::foundation::collections::Handle;
use render_batch::foundation::logging;
use render_batch::foundation::math::{Mat4, Vec3};
use render_batch::render::backends::{CpuInstancingBuffer, RecordingDevice};
use render_batch::render::{
    prepare_instancing, Batch, BatchQueue, BlendMode, BufferId, Camera, DrawContext, DrawStats,
    Geometry, GeometryType, LightContext, LightType, Material, ParameterValue, Pass, PassType,
    ResourceRegistry, ShaderId, ShaderParameter, ShaderParameterMap, SortOrder, TextureId,
    TextureUnit, TransformKey, TransformStore, VertexElements, VertexStream, GEOMETRY_INSTANCED,
    MAX_LIGHT_VS_VARIATIONS,
};

const ASTEROID_COUNT: usize = 400;
const BOULDER_COUNT: usize = 12;
const SHIP_COUNT: usize = 3;
const SHIELD_COUNT: usize = 8;
const FRAME_COUNT: usize = 3;

/// Demo failures
#[derive(thiserror::Error, Debug)]
enum DemoError {
    /// Configuration could not be loaded
    #[error("Failed to load configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Static scene content
struct Scene {
    registry: ResourceRegistry,
    transforms: TransformStore,
    camera: Handle<Camera>,
    base: Handle<Pass>,
    light: Handle<Pass>,
    alpha: Handle<Pass>,
    rock: Handle<Material>,
    hull: Handle<Material>,
    shield: Handle<Material>,
    asteroid: Handle<Geometry>,
    boulder: Handle<Geometry>,
    ship: Handle<Geometry>,
    asteroids: Vec<TransformKey>,
    boulders: Vec<TransformKey>,
    ships: Vec<TransformKey>,
    shields: Vec<TransformKey>,
}

/// Vertex shader table with the static and instanced variations of each light permutation
fn vertex_shader_table(first: u32, stride: usize) -> Vec<Option<ShaderId>> {
    let instanced = GEOMETRY_INSTANCED * stride;
    (0..instanced + stride)
        .map(|index| u32::try_from(index).ok().map(|index| ShaderId(first + index)))
        .collect()
}

impl Scene {
    fn build(rng: &mut impl Rng) -> Self {
        let mut registry = ResourceRegistry::new();
        let streams = vec![VertexStream::new(
            BufferId(1),
            VertexElements::POSITION | VertexElements::NORMAL | VertexElements::TEXCOORD1,
        )];
        let mut mesh = |buffer: u32, index_count: u32, vertex_count: u32| {
            let geometry =
                Geometry::indexed(BufferId(buffer), streams.clone(), index_count, vertex_count);
            registry.add_geometry(geometry)
        };
        let asteroid = mesh(10, 240, 80);
        let boulder = mesh(11, 6000, 2100);
        let ship = mesh(12, 900, 420);

        let rock = registry.add_material(
            Material::new()
                .with_parameter(
                    ShaderParameter::named("MatDiffColor"),
                    ParameterValue::Vec4([0.5, 0.45, 0.4, 1.0].into()),
                )
                .with_texture(TextureUnit::Diffuse, TextureId(100))
                .with_texture(TextureUnit::Normal, TextureId(101)),
        );
        let hull = registry
            .add_material(Material::new().with_texture(TextureUnit::Diffuse, TextureId(102)));
        let shield = registry.add_material(Material::new().with_parameter(
            ShaderParameter::named("MatDiffColor"),
            ParameterValue::Vec4([0.2, 0.6, 1.0, 0.4].into()),
        ));

        let base = registry.add_pass(
            Pass::new(PassType::Base)
                .with_shaders(vertex_shader_table(1, 1), vec![Some(ShaderId(500))]),
        );
        let light = registry.add_pass(
            Pass::new(PassType::Light)
                .with_blend_mode(BlendMode::Add)
                .with_depth_write(false)
                .with_shaders(
                    vertex_shader_table(100, MAX_LIGHT_VS_VARIATIONS),
                    vec![Some(ShaderId(501))],
                ),
        );
        let alpha = registry.add_pass(
            Pass::new(PassType::Base)
                .with_blend_mode(BlendMode::Alpha)
                .with_depth_write(false)
                .with_shaders(vertex_shader_table(1, 1), vec![Some(ShaderId(502))]),
        );

        let eye = Mat4::new_translation(&Vec3::new(0.0, 0.0, -60.0));
        let projection = Mat4::new_perspective(16.0 / 9.0, 45f32.to_radians(), 0.1, 500.0);
        let camera = registry.add_camera(Camera::new(&eye, projection));

        let mut transforms = TransformStore::with_key();
        let mut scatter = |count: usize, radius: f32| -> Vec<TransformKey> {
            (0..count)
                .map(|_| {
                    let position = Vec3::new(
                        rng.gen_range(-radius..radius),
                        rng.gen_range(-radius..radius),
                        rng.gen_range(-radius..radius),
                    );
                    transforms.insert(Mat4::new_translation(&position))
                })
                .collect()
        };
        let asteroids = scatter(ASTEROID_COUNT, 50.0);
        let boulders = scatter(BOULDER_COUNT, 40.0);
        let ships = scatter(SHIP_COUNT, 20.0);
        let shields = scatter(SHIELD_COUNT, 20.0);

        Self {
            registry,
            transforms,
            camera,
            base,
            light,
            alpha,
            rock,
            hull,
            shield,
            asteroid,
            boulder,
            ship,
            asteroids,
            boulders,
            ships,
            shields,
        }
    }

    fn distance(&self, key: TransformKey) -> f32 {
        let Some(camera) = self.registry.camera(self.camera) else {
            return 0.0;
        };
        self.transforms.get(key).map_or(0.0, |world| {
            camera.distance_to(&Vec3::new(world[(0, 3)], world[(1, 3)], world[(2, 3)]))
        })
    }

    fn batch(
        &self,
        geometry: Handle<Geometry>,
        material: Handle<Material>,
        pass: Handle<Pass>,
        key: TransformKey,
    ) -> Batch {
        let (vertex_shader, pixel_shader) = self.registry.pass(pass).map_or((None, None), |p| {
            (p.vertex_shader(0), p.pixel_shaders.first().copied().flatten())
        });
        let mut batch = Batch::new(geometry, material, pass, self.camera, key)
            .with_distance(self.distance(key));
        batch.vertex_shader = vertex_shader;
        batch.pixel_shader = pixel_shader;
        batch
    }
}

/// Per-pass queues rebuilt every frame
struct FrameQueues {
    base: BatchQueue,
    light: BatchQueue,
    alpha: BatchQueue,
}

impl FrameQueues {
    fn new(config: InstancingConfig) -> Self {
        Self {
            base: BatchQueue::new(config),
            light: BatchQueue::new(config),
            alpha: BatchQueue::new(config),
        }
    }

    fn collect(&mut self, scene: &mut Scene, frame: usize) {
        self.base.clear();
        self.light.clear();
        self.alpha.clear();

        scene.registry.clear_light_contexts();
        let sun = scene.registry.add_light_context(
            LightContext::new(LightType::Directional).with_parameter(
                ShaderParameter::named("LightDir"),
                ParameterValue::Vec3(Vec3::new(0.0, -1.0, 0.3)),
            ),
        );

        let registry = &scene.registry;
        for &key in &scene.asteroids {
            let unlit = scene.batch(scene.asteroid, scene.rock, scene.base, key);
            self.base.add_batch(unlit, registry, false);
            let lit = scene
                .batch(scene.asteroid, scene.rock, scene.light, key)
                .with_light_context(sun);
            self.light.add_batch(lit, registry, false);
        }
        for &key in &scene.boulders {
            let boulder = scene.batch(scene.boulder, scene.rock, scene.base, key);
            self.base.add_batch(boulder, registry, false);
        }
        for (i, &key) in scene.ships.iter().enumerate() {
            // The player ship is drawn first so its depth rejects what it covers.
            let ship = scene
                .batch(scene.ship, scene.hull, scene.base, key)
                .with_geometry_type(GeometryType::Skinned)
                .with_priority(i == 0);
            self.base.add_batch(ship, registry, false);
        }
        for &key in &scene.shields {
            let shield = scene.batch(scene.asteroid, scene.shield, scene.alpha, key);
            self.alpha.add_batch(shield, registry, frame % 2 == 1);
        }
    }

    fn sort(&mut self, scene: &Scene) {
        for (queue, pass) in [
            (&mut self.base, scene.base),
            (&mut self.light, scene.light),
            (&mut self.alpha, scene.alpha),
        ] {
            let blend_mode = scene.registry.pass(pass).map(|p| p.blend_mode).unwrap_or_default();
            queue.sort(SortOrder::from_blend_mode(blend_mode));
        }
    }
}

fn run(config: InstancingConfig) {
    let mut rng = rand::thread_rng();
    let mut scene = Scene::build(&mut rng);
    let mut queues = FrameQueues::new(config);
    let mut buffer = CpuInstancingBuffer::new(BufferId(2), config.instancing_buffer_size);
    let mut globals = ShaderParameterMap::new();
    let mut totals = DrawStats::default();

    for frame in 0..FRAME_COUNT {
        queues.collect(&mut scene, frame);
        queues.sort(&scene);

        // Alternate frames emulate a buffer without stream offsets, which must
        // be filled per group at draw time.
        let offsets = frame != 1;
        buffer = buffer.with_stream_offset(offsets);
        match prepare_instancing(
            &mut [&mut queues.base, &mut queues.light, &mut queues.alpha],
            &scene.transforms,
            Some(&mut buffer),
        ) {
            Ok(written) => {
                log::info!("Frame {}: {} instance transforms written up front", frame, written);
            }
            Err(err) => log::warn!("Frame {}: instancing buffer not filled: {}", frame, err),
        }

        let elapsed = ParameterValue::Float(frame as f32 / 60.0);
        globals.insert(ShaderParameter::named("ElapsedTime"), elapsed);

        let mut device = RecordingDevice::new();
        let stats = {
            let mut ctx =
                DrawContext::new(&mut device, &scene.registry, &scene.transforms, &globals)
                    .with_instancing_buffer(&mut buffer);
            queues.base.draw(&mut ctx);
            queues.light.draw(&mut ctx);
            queues.alpha.draw(&mut ctx);
            ctx.stats
        };

        log::info!(
            "Frame {}: {} batches -> {} draw calls ({} instanced, {} instances), \
             {} device commands, {} skipped",
            frame,
            queues.base.len() + queues.light.len() + queues.alpha.len(),
            stats.total_draw_calls(),
            stats.instanced_draw_calls,
            stats.instances,
            device.commands().len(),
            stats.skipped_batches + stats.skipped_groups
        );

        totals.draw_calls += stats.draw_calls;
        totals.instanced_draw_calls += stats.instanced_draw_calls;
        totals.instances += stats.instances;
        totals.skipped_batches += stats.skipped_batches;
        totals.skipped_groups += stats.skipped_groups;
    }

    log::info!(
        "{} frames: {} draw calls, {} instanced draws covering {} instances",
        FRAME_COUNT,
        totals.total_draw_calls(),
        totals.instanced_draw_calls,
        totals.instances
    );
}

fn load_config() -> Result<InstancingConfig, DemoError> {
    let Some(path) = std::env::args().nth(1) else {
        log::info!("No configuration file given, using defaults");
        return Ok(InstancingConfig::default());
    };
    let config = InstancingConfig::load_from_file(&path)?;
    config.validate()?;
    log::info!("Loaded configuration from {}", path);
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    log::info!("Starting batching demo");

    let config = load_config()?;
    log::info!(
        "Instancing: groups of {}+ with at most {} triangles, buffer of {} instances",
        config.min_instance_group_size,
        config.max_instance_triangles,
        config.instancing_buffer_size
    );

    run(config);

    log::info!("Batching demo finished successfully");
    Ok(())
}
