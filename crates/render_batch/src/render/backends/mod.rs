//! Graphics backend implementations
//!
//! Only the recording backend lives here; GPU backends implement
//! [`GraphicsDevice`](crate::render::device::GraphicsDevice) and
//! [`InstancingBuffer`](crate::render::instancing::InstancingBuffer) outside
//! this crate.

pub mod recording;

pub use recording::{CpuInstancingBuffer, DeviceCommand, RecordingDevice};
