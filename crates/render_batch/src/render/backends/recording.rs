//! Recording backend
//!
//! A [`GraphicsDevice`] that records every call instead of talking to a GPU,
//! and a CPU-side [`InstancingBuffer`]. Used by the demo to report what a frame
//! would submit, and by tests to inspect draw order and state changes.

use std::collections::HashMap;

use crate::render::device::{
    BlendMode, BufferId, CompareMode, CullMode, DrawRange, GraphicsDevice, ParameterScope,
    ParameterValue, ShaderId, ShaderParameter, TextureId, TextureUnit, VertexElements, VertexStream,
};
use crate::render::instancing::{InstanceTransform, InstancingBuffer, InstancingError};

/// One recorded device call
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    /// Blend mode change
    BlendMode(BlendMode),
    /// Cull mode change
    CullMode(CullMode),
    /// Depth test change
    DepthTest(CompareMode),
    /// Depth write change
    DepthWrite(bool),
    /// Alpha test change
    AlphaTest(bool),
    /// Shader pair bound
    Shaders(ShaderId, ShaderId),
    /// Shader parameter uploaded
    Parameter(ShaderParameter, ParameterValue),
    /// Texture bound
    Texture(TextureUnit, Option<TextureId>),
    /// Index buffer bound
    IndexBuffer(Option<BufferId>),
    /// Vertex streams bound at an instance offset
    VertexBuffers(Vec<VertexStream>, usize),
    /// Non-instanced draw
    Draw(DrawRange),
    /// Instanced draw with instance count
    DrawInstanced(DrawRange, usize),
    /// Transform parameter sources forgotten
    ClearTransformSources,
}

/// Device that records calls and emulates the parameter cache
#[derive(Debug, Default)]
pub struct RecordingDevice {
    commands: Vec<DeviceCommand>,
    parameter_sources: HashMap<ShaderParameter, ParameterScope>,
    unused_texture_units: Vec<TextureUnit>,
}

impl RecordingDevice {
    /// Create a device whose shaders sample every texture unit
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `unit` as unused by the bound shaders
    pub fn without_texture_unit(mut self, unit: TextureUnit) -> Self {
        self.unused_texture_units.push(unit);
        self
    }

    /// Recorded calls in submission order
    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    /// Number of non-instanced draws
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DeviceCommand::Draw(_)))
            .count()
    }

    /// Instance counts of every instanced draw, in order
    pub fn instanced_draws(&self) -> Vec<usize> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::DrawInstanced(_, count) => Some(*count),
                _ => None,
            })
            .collect()
    }

    /// Number of uploads of `param`
    pub fn uploads_of(&self, param: ShaderParameter) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DeviceCommand::Parameter(p, _) if *p == param))
            .count()
    }

    /// Values uploaded for `param`, in order
    pub fn uploaded_values(&self, param: ShaderParameter) -> Vec<&ParameterValue> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::Parameter(p, value) if *p == param => Some(value),
                _ => None,
            })
            .collect()
    }
}

impl GraphicsDevice for RecordingDevice {
    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.commands.push(DeviceCommand::BlendMode(mode));
    }

    fn set_cull_mode(&mut self, mode: CullMode) {
        self.commands.push(DeviceCommand::CullMode(mode));
    }

    fn set_depth_test(&mut self, mode: CompareMode) {
        self.commands.push(DeviceCommand::DepthTest(mode));
    }

    fn set_depth_write(&mut self, enable: bool) {
        self.commands.push(DeviceCommand::DepthWrite(enable));
    }

    fn set_alpha_test(&mut self, enable: bool, _mode: CompareMode, _reference: f32) {
        self.commands.push(DeviceCommand::AlphaTest(enable));
    }

    fn set_shaders(&mut self, vertex_shader: ShaderId, pixel_shader: ShaderId) {
        self.commands.push(DeviceCommand::Shaders(vertex_shader, pixel_shader));
    }

    fn need_parameter_update(&mut self, param: ShaderParameter, scope: ParameterScope) -> bool {
        if self.parameter_sources.get(&param) == Some(&scope) {
            return false;
        }
        self.parameter_sources.insert(param, scope);
        true
    }

    fn set_shader_parameter(&mut self, param: ShaderParameter, value: &ParameterValue) {
        self.commands.push(DeviceCommand::Parameter(param, value.clone()));
    }

    fn need_texture_unit(&self, unit: TextureUnit) -> bool {
        !self.unused_texture_units.contains(&unit)
    }

    fn set_texture(&mut self, unit: TextureUnit, texture: Option<TextureId>) {
        self.commands.push(DeviceCommand::Texture(unit, texture));
    }

    fn set_index_buffer(&mut self, buffer: Option<BufferId>) {
        self.commands.push(DeviceCommand::IndexBuffer(buffer));
    }

    fn set_vertex_buffers(&mut self, streams: &[VertexStream], instance_offset: usize) {
        self.commands.push(DeviceCommand::VertexBuffers(streams.to_vec(), instance_offset));
    }

    fn draw(&mut self, range: &DrawRange) {
        self.commands.push(DeviceCommand::Draw(*range));
    }

    fn draw_instanced(&mut self, range: &DrawRange, instance_count: usize) {
        self.commands.push(DeviceCommand::DrawInstanced(*range, instance_count));
    }

    fn clear_transform_sources(&mut self) {
        self.parameter_sources.remove(&ShaderParameter::Model);
        self.commands.push(DeviceCommand::ClearTransformSources);
    }
}

/// Instancing buffer backed by CPU memory
#[derive(Debug)]
pub struct CpuInstancingBuffer {
    data: Vec<InstanceTransform>,
    max_capacity: usize,
    stream_offset: bool,
    fail_locks: bool,
    locked: Option<(usize, usize)>,
    reserved: usize,
    uploads: Vec<Vec<InstanceTransform>>,
    buffer: BufferId,
}

impl CpuInstancingBuffer {
    /// Create a buffer holding `capacity` instances that supports stream offsets
    pub fn new(buffer: BufferId, capacity: usize) -> Self {
        Self {
            data: vec![InstanceTransform::IDENTITY; capacity],
            max_capacity: usize::MAX,
            stream_offset: true,
            fail_locks: false,
            locked: None,
            reserved: 0,
            uploads: Vec::new(),
            buffer,
        }
    }

    /// Enable or disable stream offset support
    pub fn with_stream_offset(mut self, supported: bool) -> Self {
        self.stream_offset = supported;
        self
    }

    /// Refuse to grow beyond `max_capacity` instances
    pub fn with_max_capacity(mut self, max_capacity: usize) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Make every lock fail, emulating a lost device
    pub fn set_fail_locks(&mut self, fail: bool) {
        self.fail_locks = fail;
    }

    /// Contents of every committed lock, in order
    pub fn uploads(&self) -> &[Vec<InstanceTransform>] {
        &self.uploads
    }

    /// Current contents
    pub fn data(&self) -> &[InstanceTransform] {
        &self.data
    }
}

impl InstancingBuffer for CpuInstancingBuffer {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn ensure_capacity(&mut self, count: usize) -> bool {
        if count <= self.data.len() {
            return true;
        }
        if count > self.max_capacity {
            return false;
        }
        let mut size = self.data.len().max(1);
        while size < count {
            size *= 2;
        }
        self.data.resize(size.min(self.max_capacity), InstanceTransform::IDENTITY);
        log::debug!("Resized instancing buffer to {} instances", self.data.len());
        true
    }

    fn reserved(&self) -> usize {
        self.reserved
    }

    fn set_reserved(&mut self, count: usize) {
        self.reserved = count;
    }

    fn supports_stream_offset(&self) -> bool {
        self.stream_offset
    }

    fn stream(&self) -> VertexStream {
        VertexStream::new(self.buffer, VertexElements::INSTANCE_TRANSFORM)
    }

    fn lock(
        &mut self,
        start: usize,
        count: usize,
        _discard: bool,
    ) -> Result<&mut [InstanceTransform], InstancingError> {
        let end = start + count;
        if self.fail_locks {
            return Err(InstancingError::LockFailed { start, end });
        }
        if self.data.is_empty() {
            return Err(InstancingError::Unavailable);
        }
        if end > self.data.len() {
            return Err(InstancingError::CapacityExceeded {
                required: end,
                capacity: self.data.len(),
            });
        }
        self.locked = Some((start, end));
        Ok(&mut self.data[start..end])
    }

    fn unlock(&mut self) {
        if let Some((start, end)) = self.locked.take() {
            self.uploads.push(self.data[start..end].to_vec());
        }
    }
}
