//! Shared instancing buffer protocol
//!
//! One GPU-visible buffer of per-instance transforms is shared by every batch
//! queue of a frame. Space in it is handed out by bump allocation: the caller
//! first sums the instance counts of all queues, locks that many elements
//! once, and then each queue writes its groups at the current cursor. Nothing
//! is reused or compacted; the contents are valid for a single frame.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{Mat4, Mat4Ext, Mat3x4};
use crate::render::device::VertexStream;

/// Offset of the instanced permutation in a pass's vertex shader table
pub const GEOMETRY_INSTANCED: usize = 2;

/// Vertex shader variations per light type in lit passes
pub const MAX_LIGHT_VS_VARIATIONS: usize = 6;

/// Per-instance world transform as laid out in the instancing stream
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceTransform {
    /// Upper three rows of the world matrix, row-major
    pub rows: Mat3x4,
}

impl InstanceTransform {
    /// Identity transform
    pub const IDENTITY: Self = Self {
        rows: [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]],
    };
}

impl From<&Mat4> for InstanceTransform {
    fn from(world: &Mat4) -> Self {
        Self { rows: world.to_affine_rows() }
    }
}

impl Default for InstanceTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Errors raised by the instancing buffer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InstancingError {
    /// The buffer could not be mapped for writing
    #[error("Failed to lock instancing buffer range {start}..{end}")]
    LockFailed {
        /// First element of the requested range
        start: usize,
        /// One past the last element of the requested range
        end: usize,
    },

    /// The buffer cannot hold the requested number of instances
    #[error("Instancing buffer too small: {required} > {capacity}")]
    CapacityExceeded {
        /// Instances that had to fit
        required: usize,
        /// Instances the buffer holds
        capacity: usize,
    },

    /// Hardware instancing is not available
    #[error("Instancing buffer unavailable")]
    Unavailable,
}

/// GPU buffer of per-instance transforms
pub trait InstancingBuffer {
    /// Number of instances the buffer holds
    fn capacity(&self) -> usize;

    /// Grow the buffer to hold at least `count` instances
    ///
    /// Returns `false` if the buffer could not be resized. The first
    /// [`reserved`](Self::reserved) elements survive a resize.
    fn ensure_capacity(&mut self, count: usize) -> bool;

    /// Elements written up front for the current frame
    ///
    /// Draw-time uploads start after these so groups drawing at a recorded
    /// offset keep their transforms.
    fn reserved(&self) -> usize;

    /// Record how many elements were written up front for the current frame
    fn set_reserved(&mut self, count: usize);

    /// Whether vertex streams can be bound at an instance offset, allowing
    /// the buffer to be filled once for the whole frame
    fn supports_stream_offset(&self) -> bool;

    /// Stream binding appended to a geometry's streams for instanced draws
    fn stream(&self) -> VertexStream;

    /// Map `count` elements starting at `start` for writing
    fn lock(
        &mut self,
        start: usize,
        count: usize,
        discard: bool,
    ) -> Result<&mut [InstanceTransform], InstancingError>;

    /// Commit the mapped range
    fn unlock(&mut self);
}

/// Bump allocator over a locked region of the instancing buffer
#[derive(Debug)]
pub struct InstanceAllocator<'a> {
    data: &'a mut [InstanceTransform],
    cursor: usize,
}

impl<'a> InstanceAllocator<'a> {
    /// Start allocating at the beginning of `data`
    pub fn new(data: &'a mut [InstanceTransform]) -> Self {
        Self { data, cursor: 0 }
    }

    /// Reserve `count` consecutive slots
    ///
    /// Returns the buffer index of the first slot and the slots themselves,
    /// or `None` if the locked region is exhausted.
    pub fn allocate(&mut self, count: usize) -> Option<(usize, &mut [InstanceTransform])> {
        let start = self.cursor;
        let end = start.checked_add(count)?;
        if end > self.data.len() {
            return None;
        }
        self.cursor = end;
        Some((start, &mut self.data[start..end]))
    }

    /// Number of slots handed out so far
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of slots still free
    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }
}
