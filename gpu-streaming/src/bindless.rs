//! The bindless descriptor registry: eight independently typed
//! slot arrays layered on top of the RHI's low-level
//! [`gpu_rhi::BindlessManager`], which only ever writes a descriptor at a
//! slot index the caller already owns. Capacity, free lists, high-water
//! marks and frame-delayed release are this module's concern, not the RHI's.

use std::sync::Arc;

use gpu_rhi::{BindlessArrayStats, BindlessStatistics, Buffer, Device, Sampler, TextureView};
use log::warn;
use parking_lot::Mutex;

use crate::error::{StreamError, StreamResult};

/// Default capacities, matching the source lineage's constants.
const TEXTURE_ARRAY_CAPACITY: u32 = 100_000;
const BUFFER_ARRAY_CAPACITY: u32 = 100_000;
const SAMPLER_ARRAY_CAPACITY: u32 = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindlessArrayKind {
    Sampled2D,
    Cubemap,
    StorageImage,
    MsaaTexture,
    ShadowTexture2D,
    Sampler,
    ShadowSampler,
    Buffer,
}

impl BindlessArrayKind {
    fn name(self) -> &'static str {
        match self {
            BindlessArrayKind::Sampled2D => "sampled2D",
            BindlessArrayKind::Cubemap => "cubemap",
            BindlessArrayKind::StorageImage => "storageImage",
            BindlessArrayKind::MsaaTexture => "msaaTexture",
            BindlessArrayKind::ShadowTexture2D => "shadowTexture2D",
            BindlessArrayKind::Sampler => "sampler",
            BindlessArrayKind::ShadowSampler => "shadowSampler",
            BindlessArrayKind::Buffer => "buffer",
        }
    }
}

/// A resolved slot in one of the registry's eight arrays. Stored on the
/// owning resource's pool payload so `replace_texture`/destroy know where to
/// write or release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindlessSlot {
    pub array: BindlessArrayKind,
    pub index: u32,
}

struct SlotArray {
    capacity: u32,
    high_water: u32,
    free_list: Vec<u32>,
    pending_release: Vec<(u32, u64)>,
}

impl SlotArray {
    fn new(capacity: u32) -> Self {
        Self {
            capacity,
            high_water: 0,
            free_list: Vec::new(),
            pending_release: Vec::new(),
        }
    }

    fn allocate(&mut self, array: BindlessArrayKind) -> StreamResult<u32> {
        if let Some(slot) = self.free_list.pop() {
            return Ok(slot);
        }
        if self.high_water >= self.capacity {
            return Err(StreamError::BindlessExhausted(array.name()));
        }
        let slot = self.high_water;
        self.high_water += 1;
        Ok(slot)
    }

    fn release(&mut self, slot: u32, frame_index: u64) {
        self.pending_release.push((slot, frame_index));
    }

    /// Moves every pending release whose frame-delay window has elapsed
    /// (`released_frame + frames_in_flight <= completed_frame`) onto the
    /// free list.
    fn reclaim(&mut self, completed_frame: u64, frames_in_flight: u64) {
        let mut i = 0;
        while i < self.pending_release.len() {
            if self.pending_release[i].1 + frames_in_flight <= completed_frame {
                let (slot, _) = self.pending_release.remove(i);
                self.free_list.push(slot);
            } else {
                i += 1;
            }
        }
    }

    fn stats(&self, name: &str) -> BindlessArrayStats {
        BindlessArrayStats {
            name: name.to_string(),
            capacity: self.capacity,
            occupied: self.high_water - self.free_list.len() as u32 - self.pending_release.len() as u32,
            free_list_size: self.free_list.len() as u32,
            slots: Vec::new(),
        }
    }
}

/// The eight-array bindless registry. All arrays share one mutex per array
/// (not one mutex for the whole registry split across fields, but each
/// array independently locked — registration bursts on unrelated arrays
/// don't serialize against each other); see module docs for why capacity
/// bookkeeping lives here rather than in the RHI trait.
#[derive(Debug)]
pub struct BindlessRegistry {
    device: Arc<dyn Device>,
    frames_in_flight: u64,
    sampled2d: Mutex<SlotArray>,
    cubemap: Mutex<SlotArray>,
    storage_image: Mutex<SlotArray>,
    msaa_texture: Mutex<SlotArray>,
    shadow_texture2d: Mutex<SlotArray>,
    sampler: Mutex<SlotArray>,
    shadow_sampler: Mutex<SlotArray>,
    buffer: Mutex<SlotArray>,
}

impl std::fmt::Debug for BindlessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindlessRegistry")
            .field("frames_in_flight", &self.frames_in_flight)
            .finish_non_exhaustive()
    }
}

impl BindlessRegistry {
    pub fn new(device: Arc<dyn Device>, frames_in_flight: u64) -> Self {
        Self {
            device,
            frames_in_flight,
            sampled2d: Mutex::new(SlotArray::new(TEXTURE_ARRAY_CAPACITY)),
            cubemap: Mutex::new(SlotArray::new(TEXTURE_ARRAY_CAPACITY)),
            storage_image: Mutex::new(SlotArray::new(TEXTURE_ARRAY_CAPACITY)),
            msaa_texture: Mutex::new(SlotArray::new(TEXTURE_ARRAY_CAPACITY)),
            shadow_texture2d: Mutex::new(SlotArray::new(TEXTURE_ARRAY_CAPACITY)),
            sampler: Mutex::new(SlotArray::new(SAMPLER_ARRAY_CAPACITY)),
            shadow_sampler: Mutex::new(SlotArray::new(SAMPLER_ARRAY_CAPACITY)),
            buffer: Mutex::new(SlotArray::new(BUFFER_ARRAY_CAPACITY)),
        }
    }

    fn array(&self, kind: BindlessArrayKind) -> &Mutex<SlotArray> {
        match kind {
            BindlessArrayKind::Sampled2D => &self.sampled2d,
            BindlessArrayKind::Cubemap => &self.cubemap,
            BindlessArrayKind::StorageImage => &self.storage_image,
            BindlessArrayKind::MsaaTexture => &self.msaa_texture,
            BindlessArrayKind::ShadowTexture2D => &self.shadow_texture2d,
            BindlessArrayKind::Sampler => &self.sampler,
            BindlessArrayKind::ShadowSampler => &self.shadow_sampler,
            BindlessArrayKind::Buffer => &self.buffer,
        }
    }

    pub fn register_texture_view(&self, kind: BindlessArrayKind, view: &dyn TextureView) -> StreamResult<BindlessSlot> {
        let index = self.array(kind).lock().allocate(kind)?;
        let manager = self.device.bindless_manager();
        match kind {
            BindlessArrayKind::Sampled2D => manager.write_sampled_texture(index, view),
            BindlessArrayKind::Cubemap => manager.write_cubemap(index, view),
            BindlessArrayKind::StorageImage => manager.write_storage_image(index, view),
            BindlessArrayKind::MsaaTexture => manager.write_msaa_texture(index, view),
            BindlessArrayKind::ShadowTexture2D => manager.write_shadow_texture2d(index, view),
            _ => unreachable!("register_texture_view called with a non-texture array kind"),
        }
        Ok(BindlessSlot { array: kind, index })
    }

    pub fn register_sampler(&self, shadow: bool, sampler: &dyn Sampler) -> StreamResult<BindlessSlot> {
        let kind = if shadow {
            BindlessArrayKind::ShadowSampler
        } else {
            BindlessArrayKind::Sampler
        };
        let index = self.array(kind).lock().allocate(kind)?;
        let manager = self.device.bindless_manager();
        if shadow {
            manager.write_shadow_sampler(index, sampler);
        } else {
            manager.write_sampler(index, sampler);
        }
        Ok(BindlessSlot { array: kind, index })
    }

    pub fn register_buffer(&self, buffer: &dyn Buffer) -> StreamResult<BindlessSlot> {
        let index = self.array(BindlessArrayKind::Buffer).lock().allocate(BindlessArrayKind::Buffer)?;
        self.device.bindless_manager().write_buffer(index, buffer);
        Ok(BindlessSlot {
            array: BindlessArrayKind::Buffer,
            index,
        })
    }

    /// Rewrites `slot`'s descriptor in place without reallocating. Used by
    /// `resource_manager::replace_texture` when the old and new textures
    /// share the same array kind.
    pub fn update_texture(&self, slot: BindlessSlot, view: &dyn TextureView) {
        let manager = self.device.bindless_manager();
        match slot.array {
            BindlessArrayKind::Sampled2D => manager.write_sampled_texture(slot.index, view),
            BindlessArrayKind::Cubemap => manager.write_cubemap(slot.index, view),
            BindlessArrayKind::StorageImage => manager.write_storage_image(slot.index, view),
            BindlessArrayKind::MsaaTexture => manager.write_msaa_texture(slot.index, view),
            BindlessArrayKind::ShadowTexture2D => manager.write_shadow_texture2d(slot.index, view),
            other => {
                warn!(target: "stream", "update_texture called on non-texture array {:?}", other);
            }
        }
    }

    /// Queues `slot` for release; it re-enters the free list only after the
    /// registry has observed `frames_in_flight` more completed frames.
    pub fn release(&self, slot: BindlessSlot, frame_index: u64) {
        self.array(slot.array).lock().release(slot.index, frame_index);
    }

    /// Advances every array's pending-release window against `completed_frame`.
    pub fn update(&self, completed_frame: u64) {
        for kind in [
            BindlessArrayKind::Sampled2D,
            BindlessArrayKind::Cubemap,
            BindlessArrayKind::StorageImage,
            BindlessArrayKind::MsaaTexture,
            BindlessArrayKind::ShadowTexture2D,
            BindlessArrayKind::Sampler,
            BindlessArrayKind::ShadowSampler,
            BindlessArrayKind::Buffer,
        ] {
            self.array(kind).lock().reclaim(completed_frame, self.frames_in_flight);
        }
    }

    pub fn statistics(&self) -> BindlessStatistics {
        BindlessStatistics {
            arrays: vec![
                self.sampled2d.lock().stats(BindlessArrayKind::Sampled2D.name()),
                self.cubemap.lock().stats(BindlessArrayKind::Cubemap.name()),
                self.storage_image.lock().stats(BindlessArrayKind::StorageImage.name()),
                self.msaa_texture.lock().stats(BindlessArrayKind::MsaaTexture.name()),
                self.shadow_texture2d.lock().stats(BindlessArrayKind::ShadowTexture2D.name()),
                self.sampler.lock().stats(BindlessArrayKind::Sampler.name()),
                self.shadow_sampler.lock().stats(BindlessArrayKind::ShadowSampler.name()),
                self.buffer.lock().stats(BindlessArrayKind::Buffer.name()),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_rhi::null::NullDevice;

    fn registry(frames_in_flight: u64) -> BindlessRegistry {
        let device: Arc<dyn Device> = Arc::new(NullDevice::new());
        BindlessRegistry::new(device, frames_in_flight)
    }

    #[test]
    fn release_then_reuse_respects_frame_delay() {
        let reg = registry(3);
        let arr = BindlessArrayKind::Sampled2D;
        reg.array(arr).lock().high_water = 0;
        let slot = reg.array(arr).lock().allocate(arr).unwrap();
        reg.release(BindlessSlot { array: arr, index: slot }, 10);

        reg.update(11);
        assert!(reg.array(arr).lock().free_list.is_empty(), "released too early");
        reg.update(12);
        assert!(reg.array(arr).lock().free_list.is_empty(), "released too early");
        reg.update(13);
        assert_eq!(reg.array(arr).lock().free_list, vec![slot]);
    }

    #[test]
    fn exhausted_capacity_errors_by_array_name() {
        let mut arr = SlotArray::new(1);
        assert!(arr.allocate(BindlessArrayKind::Sampler).is_ok());
        let err = arr.allocate(BindlessArrayKind::Sampler).unwrap_err();
        match err {
            StreamError::BindlessExhausted(name) => assert_eq!(name, "sampler"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
