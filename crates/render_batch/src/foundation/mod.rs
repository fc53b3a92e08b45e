//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the crate:
//! - Math type aliases
//! - Typed handles and arenas
//! - Logging utilities

pub mod math;
pub mod collections;
pub mod logging;
