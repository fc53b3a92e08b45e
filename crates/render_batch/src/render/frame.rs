//! # Frame Instancing
//!
//! Fills the shared instancing buffer once per frame, before any queue draws.
//!
//! Every queue that draws through the same buffer reports how many instances
//! it needs, the buffer is grown and locked once, and each queue writes its
//! group transforms through one shared [`InstanceAllocator`]. Groups then draw
//! with a single instanced call at their recorded offset.
//!
//! When the buffer cannot bind streams at an offset, or anything here fails,
//! groups keep no offset and lock the buffer themselves at draw time. Those
//! draw-time uploads go past the elements written here, which the buffer
//! remembers through [`InstancingBuffer::set_reserved`].

use crate::render::instancing::{InstanceAllocator, InstancingBuffer, InstancingError};
use crate::render::queue::BatchQueue;
use crate::render::registry::TransformStore;

/// Write the transforms of every instanced group in `queues` to `buffer`
///
/// Returns the number of transforms written. Queues must already be sorted.
///
/// # Errors
///
/// Returns [`InstancingError::CapacityExceeded`] if the buffer cannot grow to
/// the required size, or the buffer's error if locking fails. No group is
/// assigned an offset in either case.
pub fn prepare_instancing(
    queues: &mut [&mut BatchQueue],
    transforms: &TransformStore,
    buffer: Option<&mut dyn InstancingBuffer>,
) -> Result<usize, InstancingError> {
    let Some(buffer) = buffer else {
        return Ok(0);
    };
    buffer.set_reserved(0);
    if !buffer.supports_stream_offset() {
        log::debug!("Instancing buffer lacks stream offsets; groups will fill it at draw time");
        return Ok(0);
    }

    let total: usize = queues.iter().map(|queue| queue.num_instances()).sum();
    if total == 0 {
        return Ok(0);
    }

    if !buffer.ensure_capacity(total) {
        return Err(InstancingError::CapacityExceeded {
            required: total,
            capacity: buffer.capacity(),
        });
    }

    let data = buffer.lock(0, total, true)?;
    let mut allocator = InstanceAllocator::new(data);
    for queue in queues.iter_mut() {
        queue.set_transforms(transforms, &mut allocator);
    }
    let written = allocator.cursor();
    buffer.unlock();
    buffer.set_reserved(written);

    log::debug!("Wrote {} instance transforms for {} queues", written, queues.len());
    Ok(written)
}
