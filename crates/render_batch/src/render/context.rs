//! Per-pass draw context
//!
//! Bundles the collaborators a batch needs while drawing. Everything is passed
//! in explicitly; batches and groups hold no references of their own.

use crate::render::device::{GraphicsDevice, ShaderParameterMap, VertexStream};
use crate::render::instancing::InstancingBuffer;
use crate::render::registry::{ResourceRegistry, TransformStore};

/// Counters collected while drawing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    /// Non-instanced draw calls issued
    pub draw_calls: usize,
    /// Instanced draw calls issued
    pub instanced_draw_calls: usize,
    /// Instances submitted through instanced draw calls
    pub instances: usize,
    /// Batches skipped because a shader or resource was missing
    pub skipped_batches: usize,
    /// Groups whose instanced draw was abandoned
    pub skipped_groups: usize,
}

impl DrawStats {
    /// Total draw calls of either kind
    pub const fn total_draw_calls(&self) -> usize {
        self.draw_calls + self.instanced_draw_calls
    }
}

/// Everything a batch draw needs besides the batch itself
pub struct DrawContext<'a> {
    /// Graphics device and its parameter cache
    pub device: &'a mut dyn GraphicsDevice,
    /// Resource lookups
    pub resources: &'a ResourceRegistry,
    /// Scene world transforms
    pub transforms: &'a TransformStore,
    /// Frame-global shader parameters
    pub shader_parameters: &'a ShaderParameterMap,
    /// Shared instancing buffer; `None` disables instanced drawing
    pub instancing_buffer: Option<&'a mut dyn InstancingBuffer>,
    /// Counters for this context
    pub stats: DrawStats,
    pub(crate) scratch_streams: Vec<VertexStream>,
}

impl<'a> DrawContext<'a> {
    /// Create a context without an instancing buffer
    pub fn new(
        device: &'a mut dyn GraphicsDevice,
        resources: &'a ResourceRegistry,
        transforms: &'a TransformStore,
        shader_parameters: &'a ShaderParameterMap,
    ) -> Self {
        Self {
            device,
            resources,
            transforms,
            shader_parameters,
            instancing_buffer: None,
            stats: DrawStats::default(),
            scratch_streams: Vec::new(),
        }
    }

    /// Enable instanced drawing through `buffer`
    pub fn with_instancing_buffer(mut self, buffer: &'a mut dyn InstancingBuffer) -> Self {
        self.instancing_buffer = Some(buffer);
        self
    }
}
