//! # Render Batch
//!
//! Draw-call batching for a real-time 3D renderer.
//!
//! ## Features
//!
//! - **State Sorting**: 64-bit sort keys order draws to minimise state changes
//! - **Instancing**: batches sharing state are merged and drawn with one call
//! - **Shared Instance Buffer**: one lock per frame for every pass
//! - **Parameter Caching**: uploads are skipped when their source is unchanged
//! - **Backend Agnostic**: draws through the [`render::GraphicsDevice`] trait
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_batch::prelude::*;
//!
//! fn draw_frame(
//!     registry: &ResourceRegistry,
//!     transforms: &TransformStore,
//!     batches: Vec<Batch>,
//!     device: &mut dyn GraphicsDevice,
//!     buffer: &mut dyn InstancingBuffer,
//! ) -> DrawStats {
//!     let mut queue = BatchQueue::new(InstancingConfig::default());
//!     for batch in batches {
//!         queue.add_batch(batch, registry, false);
//!     }
//!     queue.sort(SortOrder::FrontToBack);
//!
//!     if let Err(err) = prepare_instancing(&mut [&mut queue], transforms, Some(&mut *buffer)) {
//!         log::warn!("Instancing buffer not filled: {}", err);
//!     }
//!
//!     let globals = ShaderParameterMap::new();
//!     let mut ctx = DrawContext::new(device, registry, transforms, &globals)
//!         .with_instancing_buffer(buffer);
//!     queue.draw(&mut ctx);
//!     ctx.stats
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for library users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, InstancingConfig},
        foundation::{
            collections::{Arena, Handle},
            math::{Mat4, Vec3},
        },
        render::{
            prepare_instancing, Batch, BatchGroup, BatchQueue, Camera, DrawContext, DrawStats,
            Geometry, GraphicsDevice, InstancingBuffer, InstancingError, Material, Pass, PassType,
            ResourceRegistry, ShaderParameterMap, SortKey, SortOrder, TransformKey, TransformStore,
        },
    };
}
