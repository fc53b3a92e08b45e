//! Specialized collection types

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Typed handle for type-safe resource references
///
/// A handle is the dense insertion index of a value in its [`Arena`]. It stays
/// valid for as long as the arena is not cleared and is small enough to be
/// packed directly into ordering keys.
pub struct Handle<T> {
    index: u32,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Create a handle from a raw index
    pub const fn from_index(index: u32) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Get the underlying index
    pub const fn index(self) -> u32 {
        self.index
    }
}

// Manual impls so the bounds do not leak onto `T`.
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.index)
    }
}

/// Append-only storage handing out dense [`Handle`]s
#[derive(Debug, Clone)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Arena<T> {
    /// Create a new empty arena
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Insert a value and return its handle
    pub fn insert(&mut self, item: T) -> Handle<T> {
        let index = u32::try_from(self.items.len()).unwrap_or(u32::MAX);
        self.items.push(item);
        Handle::from_index(index)
    }

    /// Get a value by handle
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.items.get(handle.index as usize)
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the arena is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every value; previously issued handles become invalid
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}
