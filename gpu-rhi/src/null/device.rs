use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::RhiError;
use crate::null::bindless::NullBindlessManager;
use crate::null::command::NullCommandList;
use crate::null::resources::{NullBuffer, NullCommandPool, NullSampler, NullTexture, NullTextureView};
use crate::traits::{
    BindlessManager, Buffer, CommandList, CommandPool, Device, Fence, QueueFamilyIndices,
    Sampler, Semaphore, SubmitQueue, Texture, TextureView,
};
use crate::types::{
    BufferDescriptor, CommandPoolDescriptor, SamplerDescriptor, TextureDescriptor,
    TextureViewDescriptor,
};

#[derive(Debug)]
pub struct NullFence {
    signaled: AtomicBool,
}

impl NullFence {
    pub fn new(signaled: bool) -> Self {
        Self {
            signaled: AtomicBool::new(signaled),
        }
    }
}

impl Fence for NullFence {
    fn is_signaled(&self) -> Result<bool, RhiError> {
        Ok(self.signaled.load(Ordering::Acquire))
    }

    fn reset(&self) -> Result<(), RhiError> {
        self.signaled.store(false, Ordering::Release);
        Ok(())
    }

    fn wait(&self, _timeout_ns: u64) -> Result<bool, RhiError> {
        // The null backend executes submissions synchronously, so by the
        // time `wait` is callable the fence is already signaled.
        Ok(self.signaled.load(Ordering::Acquire))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct NullSemaphore;

impl Semaphore for NullSemaphore {}

/// In-memory [`Device`] implementation. Every submission executes
/// synchronously on the calling thread and signals its fence before
/// `submit_commands` returns; this is sufficient to drive and test
/// `gpu_streaming`'s pools, staging ring, and transfer worker without a real
/// GPU, mirroring the engine's own `rhi/null` mock-device test backend.
#[derive(Debug)]
pub struct NullDevice {
    bindless: NullBindlessManager,
    frame_index: AtomicU64,
    queue_families: QueueFamilyIndices,
}

impl NullDevice {
    pub fn new() -> Self {
        Self {
            bindless: NullBindlessManager::new(),
            frame_index: AtomicU64::new(0),
            queue_families: QueueFamilyIndices {
                graphics: 0,
                compute: 0,
                transfer: 0,
            },
        }
    }

    /// Builds a device reporting distinct transfer/graphics queue families,
    /// so tests can exercise the cross-queue ownership transfer path.
    pub fn with_distinct_transfer_queue() -> Self {
        Self {
            bindless: NullBindlessManager::new(),
            frame_index: AtomicU64::new(0),
            queue_families: QueueFamilyIndices {
                graphics: 0,
                compute: 0,
                transfer: 1,
            },
        }
    }

    pub fn current_frame_index(&self) -> u64 {
        self.frame_index.load(Ordering::Acquire)
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for NullDevice {
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<Box<dyn Buffer>, RhiError> {
        Ok(Box::new(NullBuffer::new(descriptor.size, &descriptor.debug_name)))
    }

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<Box<dyn Texture>, RhiError> {
        Ok(Box::new(NullTexture::new(descriptor.clone())))
    }

    fn create_texture_view(
        &self,
        _parent: &dyn Texture,
        descriptor: &TextureViewDescriptor,
    ) -> Result<Box<dyn TextureView>, RhiError> {
        Ok(Box::new(NullTextureView {
            descriptor: *descriptor,
        }))
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<Box<dyn Sampler>, RhiError> {
        Ok(Box::new(NullSampler {
            descriptor: *descriptor,
        }))
    }

    fn create_command_pool(
        &self,
        descriptor: &CommandPoolDescriptor,
    ) -> Result<Box<dyn CommandPool>, RhiError> {
        Ok(Box::new(NullCommandPool {
            queue_family_index: descriptor.queue_family_index,
        }))
    }

    fn create_command_list(&self, _pool: &dyn CommandPool) -> Result<Box<dyn CommandList>, RhiError> {
        Ok(Box::new(NullCommandList::new()))
    }

    fn create_fence(&self, signaled: bool) -> Result<Box<dyn Fence>, RhiError> {
        Ok(Box::new(NullFence::new(signaled)))
    }

    fn create_semaphore(&self) -> Result<Box<dyn Semaphore>, RhiError> {
        Ok(Box::new(NullSemaphore))
    }

    fn bindless_manager(&self) -> &dyn BindlessManager {
        &self.bindless
    }

    fn submit_commands(
        &self,
        _queue: SubmitQueue,
        _list: &dyn CommandList,
        fence: Option<&dyn Fence>,
        _waits: &[&dyn Semaphore],
        _signals: &[&dyn Semaphore],
    ) -> Result<(), RhiError> {
        // Recording already executed the work (see `NullCommandList`); all
        // that remains is to report completion.
        if let Some(fence) = fence {
            fence.reset()?;
            let fence = fence
                .as_any()
                .downcast_ref::<NullFence>()
                .expect("null device used with a foreign fence");
            fence.signaled.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), RhiError> {
        Ok(())
    }

    fn queue_family_indices(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    fn set_frame_index(&self, frame_index: u64) {
        self.frame_index.store(frame_index, Ordering::Release);
    }
}
