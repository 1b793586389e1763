//! Abstract render hardware interface.
//!
//! The streaming core in `gpu-streaming` is written entirely against the
//! traits and descriptor types in this crate. No concrete graphics API is
//! implemented here beyond the optional [`null`] backend, which keeps
//! everything in host memory and exists so the streaming core can be tested
//! and driven without a real GPU.

mod error;
mod traits;
mod types;

#[cfg(feature = "null-backend")]
pub mod null;

pub use error::RhiError;
pub use traits::{
    BindlessManager, Buffer, CommandList, CommandPool, Device, Fence, QueueFamilyIndices,
    Sampler, Semaphore, SubmitQueue, Texture, TextureView,
};
pub use types::{
    BindlessArrayStats, BindlessSlotInfo, BindlessStatistics, BlockInfo, BufferDescriptor,
    BufferTextureCopyRegion, BufferUsage, CommandPoolDescriptor, CommandPoolFlags, Extent3d,
    Format, MemoryBarrier, MemoryUsage, ResourceLayout, SamplerDescriptor, ShaderStage,
    TextureBindlessHandle, TextureDescriptor, TextureType, TextureUsage, TextureViewDescriptor,
};
