//! # Batch Rendering
//!
//! Turns the visible objects of a frame into as few draw calls as possible.
//!
//! ## Architecture
//!
//! - **Batch**: one draw of one geometry with one material and pass
//! - **BatchGroup**: batches differing only in transform, drawn instanced
//! - **BatchQueue**: all batches of one pass, sorted for that pass
//! - **SortKey**: 64-bit state key ordering batches to minimise state changes
//! - **Instancing**: shared per-frame transform buffer and its bump allocator
//! - **Device**: the graphics device contract batches draw through
//!
//! ## Frame Flow
//!
//! Collect batches into queues, sort each queue, fill the instancing buffer
//! once with [`prepare_instancing`], then draw every queue through a
//! [`DrawContext`].

pub mod batch;
pub mod context;
pub mod device;
pub mod frame;
pub mod group;
pub mod instancing;
pub mod queue;
pub mod registry;
pub mod sort_key;

/// Device and buffer implementations
pub mod backends;

#[cfg(test)]
mod pipeline_tests;

pub use batch::{Batch, GeometryType, ShaderData};
pub use context::{DrawContext, DrawStats};
pub use device::{
    BlendMode, BufferId, CompareMode, CullMode, DrawRange, GraphicsDevice, ParameterScope,
    ParameterValue, PrimitiveType, ShaderId, ShaderParameter, ShaderParameterMap, TextureId,
    TextureUnit, VertexElements, VertexStream,
};
pub use frame::prepare_instancing;
pub use group::{BatchGroup, BatchGroupKey, InstanceData};
pub use instancing::{
    InstanceAllocator, InstanceTransform, InstancingBuffer, InstancingError, GEOMETRY_INSTANCED,
    MAX_LIGHT_VS_VARIATIONS,
};
pub use queue::{BatchQueue, QueuePhase, SortOrder};
pub use registry::{
    Camera, DefaultLightTextures, Geometry, LightContext, LightType, Material, Pass, PassType,
    ResourceRegistry, ShadowMapBinding, TransformKey, TransformStore,
};
pub use sort_key::SortKey;
