use std::any::Any;
use std::cell::UnsafeCell;

use crate::traits::{Buffer, CommandPool, Sampler, TextureView};
use crate::types::{Extent3d, Format, SamplerDescriptor, TextureDescriptor, TextureViewDescriptor};

/// Host-memory stand-in for a GPU buffer. For CPU-visible usages the backing
/// storage is exposed as a stable mapped pointer; nothing here is safe for
/// concurrent unsynchronized writers, which matches the mapped-pointer
/// contract real backends give too (callers are expected to serialize
/// through the staging ring's own locking, not this type's).
pub struct NullBuffer {
    size: u64,
    storage: UnsafeCell<Box<[u8]>>,
    debug_name: String,
}

// SAFETY: `storage` is only mutated through the raw pointer handed out by
// `mapped_ptr`, under the same external synchronization a real mapped GPU
// buffer would require.
unsafe impl Sync for NullBuffer {}

impl NullBuffer {
    pub fn new(size: u64, debug_name: &str) -> Self {
        Self {
            size,
            storage: UnsafeCell::new(vec![0u8; size as usize].into_boxed_slice()),
            debug_name: debug_name.to_string(),
        }
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// Test/debug-only snapshot of the buffer's current bytes.
    pub fn snapshot(&self) -> Vec<u8> {
        unsafe { (*self.storage.get()).to_vec() }
    }
}

impl std::fmt::Debug for NullBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullBuffer")
            .field("debug_name", &self.debug_name)
            .field("size", &self.size)
            .finish()
    }
}

impl Buffer for NullBuffer {
    fn mapped_ptr(&self) -> Option<*mut u8> {
        Some(unsafe { (*self.storage.get()).as_mut_ptr() })
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Host-memory stand-in for a GPU texture. Backing storage is one flat byte
/// buffer holding every mip/layer/face's texels, tightly packed in
/// mip-major order, so `NullCommandList::copy_buffer_to_texture` and
/// `generate_mipmaps` can address subresources deterministically and tests
/// can checksum the whole thing.
pub struct NullTexture {
    descriptor: TextureDescriptor,
    storage: parking_lot::Mutex<Vec<u8>>,
}

impl NullTexture {
    pub fn new(descriptor: TextureDescriptor) -> Self {
        let total = Self::total_bytes(&descriptor);
        Self {
            descriptor,
            storage: parking_lot::Mutex::new(vec![0u8; total]),
        }
    }

    fn total_bytes(descriptor: &TextureDescriptor) -> usize {
        let block = descriptor.format.block_info();
        let mut total = 0usize;
        for mip in 0..descriptor.mip_levels {
            total += Self::mip_bytes(descriptor.extent, block, mip) as usize
                * descriptor.array_layers as usize;
        }
        total
    }

    fn mip_bytes(extent: Extent3d, block: crate::types::BlockInfo, mip: u32) -> u64 {
        let mip_extent = extent.mip_level(mip);
        let blocks_x = mip_extent.width.div_ceil(block.block_width) as u64;
        let blocks_y = mip_extent.height.div_ceil(block.block_height) as u64;
        blocks_x * blocks_y * block.bytes_per_block as u64 * mip_extent.depth as u64
    }

    /// Byte offset of `(mip, layer)`'s subresource within the flat buffer.
    pub fn subresource_offset(&self, mip: u32, layer: u32) -> u64 {
        let block = self.descriptor.format.block_info();
        let mut offset = 0u64;
        for m in 0..mip {
            offset += Self::mip_bytes(self.descriptor.extent, block, m) * self.descriptor.array_layers as u64;
        }
        offset + Self::mip_bytes(self.descriptor.extent, block, mip) * layer as u64
    }

    pub fn subresource_size(&self, mip: u32) -> u64 {
        Self::mip_bytes(self.descriptor.extent, self.descriptor.format.block_info(), mip)
    }

    pub fn write_subresource(&self, mip: u32, layer: u32, bytes: &[u8]) {
        let offset = self.subresource_offset(mip, layer) as usize;
        let mut storage = self.storage.lock();
        storage[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn read_subresource(&self, mip: u32, layer: u32) -> Vec<u8> {
        let offset = self.subresource_offset(mip, layer) as usize;
        let size = self.subresource_size(mip) as usize;
        self.storage.lock()[offset..offset + size].to_vec()
    }

    /// Test-only: the whole resource's bytes, for end-to-end checksums.
    pub fn download(&self) -> Vec<u8> {
        self.storage.lock().clone()
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }
}

impl std::fmt::Debug for NullTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullTexture")
            .field("debug_name", &self.descriptor.debug_name)
            .field("extent", &self.descriptor.extent)
            .field("format", &self.descriptor.format)
            .field("mip_levels", &self.descriptor.mip_levels)
            .finish()
    }
}

impl crate::traits::Texture for NullTexture {
    fn extent(&self) -> Extent3d {
        self.descriptor.extent
    }

    fn format(&self) -> Format {
        self.descriptor.format
    }

    fn mip_levels(&self) -> u32 {
        self.descriptor.mip_levels
    }

    fn array_layers(&self) -> u32 {
        self.descriptor.array_layers
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct NullTextureView {
    pub descriptor: TextureViewDescriptor,
}

impl TextureView for NullTextureView {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct NullSampler {
    pub descriptor: SamplerDescriptor,
}

impl Sampler for NullSampler {}

#[derive(Debug)]
pub struct NullCommandPool {
    pub queue_family_index: u32,
}

impl CommandPool for NullCommandPool {}
