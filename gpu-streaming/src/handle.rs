//! Value-typed, generation-checked handles.
//!
//! A [`Handle`] never dereferences memory directly; it is a
//! `(kind, index, generation)` triple validated against a
//! [`crate::pool::StablePool`] slot. See `gpu_streaming::pool` for the
//! allocator these are minted by.

use std::fmt;

/// The 12-bit generation counter tag, stored widened to `u16` for alignment
/// convenience. Wraps modulo 4096 on every `Retired -> Free` transition.
pub const GENERATION_BITS: u32 = 12;
pub const GENERATION_MASK: u16 = (1u16 << GENERATION_BITS) - 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    Buffer,
    Mesh,
    Pipeline,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Texture => "texture",
            ResourceKind::Buffer => "buffer",
            ResourceKind::Mesh => "mesh",
            ResourceKind::Pipeline => "pipeline",
        };
        f.write_str(s)
    }
}

/// A cheap, `Copy` reference to a slot in one of the resource manager's
/// typed pools. Handles are value types: copying one is free, and neither
/// holding one nor dropping one touches the pool's structural state — only
/// a [`crate::smart_handle::SmartHandle`] wrapping one does that.
#[derive(Clone, Copy, Eq, Hash)]
pub struct Handle {
    pub kind: ResourceKind,
    pub index: u32,
    pub generation: u16,
}

impl Handle {
    pub(crate) fn new(kind: ResourceKind, index: u32, generation: u16) -> Self {
        debug_assert!(generation <= GENERATION_MASK);
        Self {
            kind,
            index,
            generation,
        }
    }

    /// A handle that can never validate against a real pool slot; used for
    /// placeholder/sentinel fields before a real handle is assigned.
    pub const fn invalid(kind: ResourceKind) -> Self {
        Self {
            kind,
            index: u32::MAX,
            generation: GENERATION_MASK,
        }
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.index == other.index && self.generation == other.generation
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Handle({}, index={}, gen={})",
            self.kind, self.index, self.generation
        )
    }
}
