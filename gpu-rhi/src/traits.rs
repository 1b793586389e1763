use std::any::Any;
use std::fmt;

use crate::error::RhiError;
use crate::types::{
    BufferDescriptor, BufferTextureCopyRegion, CommandPoolDescriptor, Extent3d, Format,
    MemoryBarrier, SamplerDescriptor, TextureDescriptor, TextureViewDescriptor,
};

/// An opaque, backend-owned GPU buffer. The streaming core never looks
/// inside one; it only ever holds a `Box<dyn Buffer>` handed back by
/// [`Device::create_buffer`].
pub trait Buffer: fmt::Debug + Send + Sync {
    /// Host-visible mapped pointer, set for buffers created with a
    /// CPU-visible [`crate::types::MemoryUsage`]. `None` for device-local
    /// buffers that are never meant to be written from the host.
    fn mapped_ptr(&self) -> Option<*mut u8>;
    fn size(&self) -> u64;
    fn as_any(&self) -> &dyn Any;
}

pub trait Texture: fmt::Debug + Send + Sync {
    fn extent(&self) -> Extent3d;
    fn format(&self) -> Format;
    fn mip_levels(&self) -> u32;
    fn array_layers(&self) -> u32;
    fn as_any(&self) -> &dyn Any;
}

pub trait TextureView: fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

pub trait Sampler: fmt::Debug + Send + Sync {}

pub trait CommandPool: fmt::Debug + Send + Sync {}

/// A GPU-side synchronization point used to order a graphics-queue
/// submission against a transfer-queue submission it depends on (the
/// cross-queue mipmap handoff of `gpu_streaming::transfer_worker`).
pub trait Semaphore: fmt::Debug + Send + Sync {}

pub trait Fence: fmt::Debug + Send + Sync {
    /// Non-blocking poll; the transfer worker never waits on a fence, only
    /// checks it once per reclaim pass.
    fn is_signaled(&self) -> Result<bool, RhiError>;
    fn reset(&self) -> Result<(), RhiError>;
    /// Blocking wait with a timeout in nanoseconds, used only at shutdown
    /// (`wait_idle` callers that need a final drain).
    fn wait(&self, timeout_ns: u64) -> Result<bool, RhiError>;
    fn as_any(&self) -> &dyn Any;
}

/// One recorded stream of GPU commands. `begin`/`end` bracket recording;
/// everything between is backend-specific but must at minimum support the
/// copy and barrier operations the transfer worker and mipmap chain need.
pub trait CommandList: fmt::Debug + Send {
    fn begin(&mut self) -> Result<(), RhiError>;
    fn end(&mut self) -> Result<(), RhiError>;
    fn pipeline_barrier(&mut self, texture: &dyn Texture, barrier: MemoryBarrier);
    fn copy_buffer_to_texture(
        &mut self,
        buffer: &dyn Buffer,
        texture: &dyn Texture,
        regions: &[BufferTextureCopyRegion],
    );
    /// Generates every mip below `base_level` from `base_level`'s current
    /// contents, in place, on whichever queue this command list targets.
    fn generate_mipmaps(&mut self, texture: &dyn Texture, base_level: u32);
}

/// The eight independently-indexed descriptor arrays the bindless registry
/// (`gpu_streaming::bindless`) allocates slots from. Each `write_*` call
/// rewrites the descriptor at `slot` in place; slot lifetime (free lists,
/// frame-delayed release, capacity) is entirely the registry's concern, not
/// this trait's.
pub trait BindlessManager: fmt::Debug + Send + Sync {
    fn write_sampled_texture(&self, slot: u32, view: &dyn TextureView);
    fn write_cubemap(&self, slot: u32, view: &dyn TextureView);
    fn write_storage_image(&self, slot: u32, view: &dyn TextureView);
    fn write_msaa_texture(&self, slot: u32, view: &dyn TextureView);
    fn write_shadow_texture2d(&self, slot: u32, view: &dyn TextureView);
    fn write_sampler(&self, slot: u32, sampler: &dyn Sampler);
    fn write_shadow_sampler(&self, slot: u32, sampler: &dyn Sampler);
    fn write_buffer(&self, slot: u32, buffer: &dyn Buffer);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitQueue {
    Graphics,
    Transfer,
}

/// The device-level surface the streaming core is written against. A real
/// backend (Vulkan/ash, WebGPU/wgpu, ...) implements this once; everything
/// in `gpu_streaming` is generic over `Arc<dyn Device>`.
pub trait Device: fmt::Debug + Send + Sync {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<Box<dyn Buffer>, RhiError>;
    fn create_texture(&self, descriptor: &TextureDescriptor)
        -> Result<Box<dyn Texture>, RhiError>;
    fn create_texture_view(
        &self,
        parent: &dyn Texture,
        descriptor: &TextureViewDescriptor,
    ) -> Result<Box<dyn TextureView>, RhiError>;
    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<Box<dyn Sampler>, RhiError>;
    fn create_command_pool(
        &self,
        descriptor: &CommandPoolDescriptor,
    ) -> Result<Box<dyn CommandPool>, RhiError>;
    fn create_command_list(&self, pool: &dyn CommandPool) -> Result<Box<dyn CommandList>, RhiError>;
    fn create_fence(&self, signaled: bool) -> Result<Box<dyn Fence>, RhiError>;
    fn create_semaphore(&self) -> Result<Box<dyn Semaphore>, RhiError>;
    fn bindless_manager(&self) -> &dyn BindlessManager;
    fn submit_commands(
        &self,
        queue: SubmitQueue,
        list: &dyn CommandList,
        fence: Option<&dyn Fence>,
        waits: &[&dyn Semaphore],
        signals: &[&dyn Semaphore],
    ) -> Result<(), RhiError>;
    fn wait_idle(&self) -> Result<(), RhiError>;
    fn queue_family_indices(&self) -> QueueFamilyIndices;
    /// Informs the backend which logical frame is about to be recorded, for
    /// backends that keep their own per-frame ring state (descriptor pools,
    /// upload heaps, ...). The streaming core calls this once per
    /// `sync_to_gpu` tick.
    fn set_frame_index(&self, frame_index: u64);
}
