//! Packed state-ordering key
//!
//! Layout, most significant bit first:
//!
//! ```text
//! [priority:1][light context:15][pass:16][material:16][geometry:16]
//! ```
//!
//! Sorting keys in descending order keeps batches that share expensive state
//! (light and shadow context, then pass) adjacent, and puts every priority
//! batch ahead of every non-priority one.

use crate::foundation::collections::Handle;
use crate::render::registry::{Geometry, LightContext, Material, Pass};

/// Mask of the light context field
pub const LIGHT_CONTEXT_FIELD_MASK: u64 = 0x7fff;
/// Mask of the pass field
pub const PASS_FIELD_MASK: u64 = 0xffff;
/// Mask of the material field
pub const MATERIAL_FIELD_MASK: u64 = 0xffff;
/// Mask of the geometry field
pub const GEOMETRY_FIELD_MASK: u64 = 0xffff;

const PRIORITY_BIT: u64 = 1 << 63;
const LIGHT_CONTEXT_SHIFT: u32 = 48;
const PASS_SHIFT: u32 = 32;
const MATERIAL_SHIFT: u32 = 16;

/// Packed 64-bit ordering key of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SortKey(pub u64);

impl SortKey {
    /// Pack a key from the state identities of a batch
    ///
    /// The light context field stores `index + 1` so that unlit batches
    /// (field value 0) never share a value with the first light context.
    pub fn new(
        priority: bool,
        light_context: Option<Handle<LightContext>>,
        pass: Handle<Pass>,
        material: Handle<Material>,
        geometry: Handle<Geometry>,
    ) -> Self {
        let light =
            light_context.map_or(0, |h| u64::from(h.index()) + 1) & LIGHT_CONTEXT_FIELD_MASK;
        let pass = u64::from(pass.index()) & PASS_FIELD_MASK;
        let material = u64::from(material.index()) & MATERIAL_FIELD_MASK;
        let geometry = u64::from(geometry.index()) & GEOMETRY_FIELD_MASK;

        let mut key = (light << LIGHT_CONTEXT_SHIFT)
            | (pass << PASS_SHIFT)
            | (material << MATERIAL_SHIFT)
            | geometry;
        if priority {
            key |= PRIORITY_BIT;
        }
        Self(key)
    }

    /// Whether the priority bit is set
    pub const fn has_priority(self) -> bool {
        self.0 & PRIORITY_BIT != 0
    }

    /// Light context field
    pub const fn light_context_field(self) -> u64 {
        (self.0 >> LIGHT_CONTEXT_SHIFT) & LIGHT_CONTEXT_FIELD_MASK
    }

    /// Pass field
    pub const fn pass_field(self) -> u64 {
        (self.0 >> PASS_SHIFT) & PASS_FIELD_MASK
    }

    /// Material field
    pub const fn material_field(self) -> u64 {
        (self.0 >> MATERIAL_SHIFT) & MATERIAL_FIELD_MASK
    }

    /// Geometry field
    pub const fn geometry_field(self) -> u64 {
        self.0 & GEOMETRY_FIELD_MASK
    }
}
