//! Typed resource pools, smart-handle plumbing, and deferred destruction
//! Owns one [`StablePool`] per resource kind plus the
//! lock-free destroy-event queue smart-handles feed into on their last
//! release.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use gpu_rhi::{
    BufferDescriptor, Device, TextureDescriptor, TextureType, TextureViewDescriptor,
};
use log::{trace, warn};
use parking_lot::RwLock;

use crate::bindless::{BindlessArrayKind, BindlessRegistry, BindlessSlot};
use crate::error::{StreamError, StreamResult};
use crate::handle::{Handle, ResourceKind};
use crate::pool::StablePool;
use crate::smart_handle::SmartHandle;

pub struct TextureData {
    pub native_texture: Arc<dyn gpu_rhi::Texture>,
    pub native_view: Box<dyn gpu_rhi::TextureView>,
    pub bindless_index: Option<BindlessSlot>,
    pub texture_type: TextureType,
    pub debug_name: String,
}

pub struct BufferData {
    pub native_buffer: Box<dyn gpu_rhi::Buffer>,
    pub bindless_index: Option<BindlessSlot>,
    pub debug_name: String,
}

pub struct MeshData {
    pub vertex_buffer: SmartHandle,
    pub index_buffer: SmartHandle,
    pub vertex_count: u32,
    pub index_count: u32,
    pub uses_vertex_pulling: bool,
}

/// Native pipeline objects are opaque to this crate: shader compilation and
/// pipeline-state construction are out of scope (see crate docs), so unlike
/// the other three pools this one is never populated by a `Device` call —
/// only `ResourceManager::adopt_pipeline` inserts a caller-built native
/// pipeline so it participates in the same handle/refcount/deferred-destroy
/// machinery as everything else.
pub struct PipelineData {
    pub native_pipeline: Box<dyn Any + Send + Sync>,
    pub debug_name: String,
}

/// One payload stolen out of a freed slot, held in a deferred-destruction
/// bucket until its `frames_in_flight` window has elapsed. Dropping this
/// drops the boxed native resource, which is the entire "release" action —
/// there is no separate async GPU-side free in this abstraction.
enum NativeResource {
    Texture(TextureData),
    Buffer(BufferData),
    Mesh(MeshData),
    Pipeline(PipelineData),
}

fn texture_array_kind(ty: TextureType) -> BindlessArrayKind {
    match ty {
        TextureType::TextureCube => BindlessArrayKind::Cubemap,
        _ => BindlessArrayKind::Sampled2D,
    }
}

/// Owns every typed pool, the bindless registry, and the deferred
/// destruction ring. Shared via `Arc` so smart-handles on any thread can
/// reach `incr_ref`/`decr_ref`/`enqueue_destroy`; structural operations
/// (`create_*`, `destroy_*`, `replace_texture`, `process_destroy_events`,
/// `flush`) are render-thread only, enforced the same way `StablePool`
/// enforces it on each underlying pool.
pub struct ResourceManager {
    device: Arc<dyn Device>,
    bindless: Arc<BindlessRegistry>,
    textures: StablePool<TextureData>,
    buffers: StablePool<BufferData>,
    meshes: StablePool<MeshData>,
    pipelines: StablePool<PipelineData>,
    destroy_queue: SegQueue<Handle>,
    /// Rare compound operations (replace_texture's swap-then-release
    /// sequence) take this for the duration of the op; pool-internal
    /// atomics handle everything else without it.
    compound_op_lock: RwLock<()>,
    deferred: parking_lot::Mutex<Vec<VecDeque<NativeResource>>>,
    frames_in_flight: u64,
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("frames_in_flight", &self.frames_in_flight)
            .finish_non_exhaustive()
    }
}

impl ResourceManager {
    pub fn new(device: Arc<dyn Device>, bindless: Arc<BindlessRegistry>, frames_in_flight: u64) -> Self {
        let deferred = (0..frames_in_flight.max(1)).map(|_| VecDeque::new()).collect();
        Self {
            device,
            bindless,
            textures: StablePool::new(ResourceKind::Texture),
            buffers: StablePool::new(ResourceKind::Buffer),
            meshes: StablePool::new(ResourceKind::Mesh),
            pipelines: StablePool::new(ResourceKind::Pipeline),
            destroy_queue: SegQueue::new(),
            compound_op_lock: RwLock::new(()),
            deferred: parking_lot::Mutex::new(deferred),
            frames_in_flight,
        }
    }

    pub fn bindless(&self) -> &Arc<BindlessRegistry> {
        &self.bindless
    }

    // -- generic handle plumbing, usable from any thread --------------

    pub fn validate(&self, h: Handle) -> bool {
        match h.kind {
            ResourceKind::Texture => self.textures.validate(h),
            ResourceKind::Buffer => self.buffers.validate(h),
            ResourceKind::Mesh => self.meshes.validate(h),
            ResourceKind::Pipeline => self.pipelines.validate(h),
        }
    }

    pub(crate) fn incr_ref(&self, h: Handle) -> bool {
        match h.kind {
            ResourceKind::Texture => self.textures.incr_ref(h),
            ResourceKind::Buffer => self.buffers.incr_ref(h),
            ResourceKind::Mesh => self.meshes.incr_ref(h),
            ResourceKind::Pipeline => self.pipelines.incr_ref(h),
        }
    }

    pub(crate) fn decr_ref(&self, h: Handle) -> crate::pool::RefDrop {
        match h.kind {
            ResourceKind::Texture => self.textures.decr_ref(h),
            ResourceKind::Buffer => self.buffers.decr_ref(h),
            ResourceKind::Mesh => self.meshes.decr_ref(h),
            ResourceKind::Pipeline => self.pipelines.decr_ref(h),
        }
    }

    pub(crate) fn enqueue_destroy(&self, h: Handle) {
        self.destroy_queue.push(h);
    }

    pub fn texture(&self, h: Handle) -> Option<&TextureData> {
        self.textures.get(h)
    }

    pub fn buffer(&self, h: Handle) -> Option<&BufferData> {
        self.buffers.get(h)
    }

    pub fn mesh(&self, h: Handle) -> Option<&MeshData> {
        self.meshes.get(h)
    }

    pub fn pipeline(&self, h: Handle) -> Option<&PipelineData> {
        self.pipelines.get(h)
    }

    // -- creation (render thread) --------------------------------------

    pub fn create_texture(
        self: &Arc<Self>,
        debug_name: impl Into<String>,
        descriptor: &TextureDescriptor,
    ) -> StreamResult<SmartHandle> {
        let native_texture: Arc<dyn gpu_rhi::Texture> = self.device.create_texture(descriptor)?.into();
        let native_view = self.device.create_texture_view(
            native_texture.as_ref(),
            &TextureViewDescriptor {
                base_mip_level: 0,
                mip_level_count: descriptor.mip_levels,
                base_array_layer: 0,
                array_layer_count: descriptor.array_layers,
            },
        )?;
        let bindless_index = if descriptor.skip_bindless {
            None
        } else {
            let kind = texture_array_kind(descriptor.ty);
            match self.bindless.register_texture_view(kind, native_view.as_ref()) {
                Ok(slot) => Some(slot),
                Err(StreamError::BindlessExhausted(array)) => {
                    warn!(target: "stream", "bindless array `{array}` exhausted, texture `{}` created without a slot", descriptor.debug_name);
                    None
                }
                Err(other) => return Err(other),
            }
        };
        let payload = TextureData {
            native_texture,
            native_view,
            bindless_index,
            texture_type: descriptor.ty,
            debug_name: debug_name.into(),
        };
        let handle = self.textures.emplace(payload);
        Ok(SmartHandle::new_owning(self.clone(), handle))
    }

    pub fn create_buffer(
        self: &Arc<Self>,
        debug_name: impl Into<String>,
        descriptor: &BufferDescriptor,
        use_bindless: bool,
    ) -> StreamResult<SmartHandle> {
        let native_buffer = self.device.create_buffer(descriptor)?;
        let bindless_index = if use_bindless {
            match self.bindless.register_buffer(native_buffer.as_ref()) {
                Ok(slot) => Some(slot),
                Err(StreamError::BindlessExhausted(array)) => {
                    warn!(target: "stream", "bindless array `{array}` exhausted, buffer created without a slot");
                    None
                }
                Err(other) => return Err(other),
            }
        } else {
            None
        };
        let payload = BufferData {
            native_buffer,
            bindless_index,
            debug_name: debug_name.into(),
        };
        let handle = self.buffers.emplace(payload);
        Ok(SmartHandle::new_owning(self.clone(), handle))
    }

    pub fn create_mesh(
        self: &Arc<Self>,
        vertex_buffer: SmartHandle,
        index_buffer: SmartHandle,
        vertex_count: u32,
        index_count: u32,
        uses_vertex_pulling: bool,
    ) -> SmartHandle {
        let payload = MeshData {
            vertex_buffer,
            index_buffer,
            vertex_count,
            index_count,
            uses_vertex_pulling,
        };
        let handle = self.meshes.emplace(payload);
        SmartHandle::new_owning(self.clone(), handle)
    }

    /// Inserts a caller-built native pipeline object into the pipeline
    /// pool. See [`PipelineData`] docs for why this crate never builds one
    /// itself.
    pub fn adopt_pipeline(
        self: &Arc<Self>,
        debug_name: impl Into<String>,
        native_pipeline: Box<dyn Any + Send + Sync>,
    ) -> SmartHandle {
        let payload = PipelineData {
            native_pipeline,
            debug_name: debug_name.into(),
        };
        let handle = self.pipelines.emplace(payload);
        SmartHandle::new_owning(self.clone(), handle)
    }

    // -- replacement / destruction (render thread) ----------------------

    /// Swaps `dst`'s backing texture for `src`'s, deferring destruction of
    /// the old one to bucket `frame_index mod N` and either updating the
    /// bindless slot in place (same array kind) or releasing the old slot
    /// and allocating a fresh one.
    pub fn replace_texture(&self, dst: Handle, src: Handle, frame_index: u64) -> StreamResult<()> {
        let _guard = self.compound_op_lock.write();
        if !self.textures.validate(dst) || !self.textures.validate(src) {
            return Err(StreamError::InvalidHandle);
        }

        // `src` is consumed: retire it immediately (its own smart-handle,
        // if any, is the caller's problem) and steal its payload.
        self.textures.retire(src);
        let mut new_data = self
            .textures
            .free_slot(src.index)
            .expect("src validated Alive above, free_slot must succeed");

        let old_bindless = self.texture(dst).and_then(|t| t.bindless_index);
        let new_kind = texture_array_kind(new_data.texture_type);

        match old_bindless {
            Some(old_slot) if old_slot.array == new_kind => {
                self.bindless.update_texture(old_slot, new_data.native_view.as_ref());
                new_data.bindless_index = Some(old_slot);
            }
            Some(old_slot) => {
                self.bindless.release(old_slot, frame_index);
                new_data.bindless_index = self
                    .bindless
                    .register_texture_view(new_kind, new_data.native_view.as_ref())
                    .ok();
            }
            None => {
                new_data.bindless_index = self
                    .bindless
                    .register_texture_view(new_kind, new_data.native_view.as_ref())
                    .ok();
            }
        }

        // In-place swap: `dst`'s handle (index *and* generation) is
        // preserved, satisfying spec inv. 7 (a loading proxy and its final
        // replacement share one external handle).
        let old_data = self
            .textures
            .replace_payload(dst, new_data)
            .expect("dst validated Alive above, replace_payload must succeed");

        self.defer_destroy(frame_index, NativeResource::Texture(old_data));
        Ok(())
    }

    /// Render-thread only. Steals the texture's native resource into the
    /// deferred ring, releases its bindless slot, and retires+frees the
    /// pool slot.
    pub fn destroy_texture(&self, h: Handle, frame_index: u64) {
        if !self.textures.validate(h) {
            trace!(target: "stream", "destroy_texture on invalid handle {:?}, no-op", h);
            return;
        }
        self.textures.retire(h);
        let Some(data) = self.textures.free_slot(h.index) else {
            return;
        };
        if let Some(slot) = data.bindless_index {
            self.bindless.release(slot, frame_index);
        }
        self.defer_destroy(frame_index, NativeResource::Texture(data));
    }

    pub fn destroy_buffer(&self, h: Handle, frame_index: u64) {
        if !self.buffers.validate(h) {
            trace!(target: "stream", "destroy_buffer on invalid handle {:?}, no-op", h);
            return;
        }
        self.buffers.retire(h);
        let Some(data) = self.buffers.free_slot(h.index) else {
            return;
        };
        if let Some(slot) = data.bindless_index {
            self.bindless.release(slot, frame_index);
        }
        self.defer_destroy(frame_index, NativeResource::Buffer(data));
    }

    pub fn destroy_pipeline(&self, h: Handle, frame_index: u64) {
        if !self.pipelines.validate(h) {
            return;
        }
        self.pipelines.retire(h);
        if let Some(data) = self.pipelines.free_slot(h.index) {
            self.defer_destroy(frame_index, NativeResource::Pipeline(data));
        }
    }

    fn destroy_mesh(&self, h: Handle, frame_index: u64) {
        if !self.meshes.validate(h) {
            return;
        }
        self.meshes.retire(h);
        if let Some(data) = self.meshes.free_slot(h.index) {
            self.defer_destroy(frame_index, NativeResource::Mesh(data));
        }
    }

    fn defer_destroy(&self, frame_index: u64, resource: NativeResource) {
        let n = self.frames_in_flight.max(1);
        let bucket = (frame_index % n) as usize;
        self.deferred.lock()[bucket].push_back(resource);
    }

    /// Drains the destroy-event queue, dispatching each to the right
    /// per-kind destroy function. Call once per frame on the render thread,
    /// *after* `flush` for the frame that is retiring — flushing first
    /// avoids a same-frame self-flush of something just deferred here.
    pub fn process_destroy_events(&self, frame_index: u64) {
        while let Some(h) = self.destroy_queue.pop() {
            match h.kind {
                ResourceKind::Texture => self.destroy_texture(h, frame_index),
                ResourceKind::Buffer => self.destroy_buffer(h, frame_index),
                ResourceKind::Mesh => self.destroy_mesh(h, frame_index),
                ResourceKind::Pipeline => self.destroy_pipeline(h, frame_index),
            }
        }
    }

    /// Drops every native resource deferred into bucket `frame_slot mod N`.
    pub fn flush(&self, frame_slot: u64) {
        let n = self.frames_in_flight.max(1);
        let bucket = (frame_slot % n) as usize;
        let drained: Vec<NativeResource> = self.deferred.lock()[bucket].drain(..).collect();
        drop(drained);
    }

    /// Debug-only leak sweep: every slot still `Alive` with a nonzero
    /// refcount at teardown, one line per pool.
    pub fn dump_leaks(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.textures.for_each(|h, data| {
            if let Some(rc) = self.textures.refcount(h) {
                if rc > 0 {
                    out.push(format!("leaked texture `{}` ({:?}), refcount={}", data.debug_name, h, rc));
                }
            }
        });
        self.buffers.for_each(|h, data| {
            if let Some(rc) = self.buffers.refcount(h) {
                if rc > 0 {
                    out.push(format!("leaked buffer `{}` ({:?}), refcount={}", data.debug_name, h, rc));
                }
            }
        });
        self.meshes.for_each(|h, _data| {
            if let Some(rc) = self.meshes.refcount(h) {
                if rc > 0 {
                    out.push(format!("leaked mesh ({:?}), refcount={}", h, rc));
                }
            }
        });
        self.pipelines.for_each(|h, data| {
            if let Some(rc) = self.pipelines.refcount(h) {
                if rc > 0 {
                    out.push(format!("leaked pipeline `{}` ({:?}), refcount={}", data.debug_name, h, rc));
                }
            }
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_rhi::null::NullDevice;
    use gpu_rhi::{Extent3d, Format, MemoryUsage, TextureUsage};

    fn manager(frames_in_flight: u64) -> Arc<ResourceManager> {
        let device: Arc<dyn Device> = Arc::new(NullDevice::new());
        let bindless = Arc::new(BindlessRegistry::new(device.clone(), frames_in_flight));
        Arc::new(ResourceManager::new(device, bindless, frames_in_flight))
    }

    fn texture_descriptor(name: &str) -> TextureDescriptor {
        TextureDescriptor {
            debug_name: name.to_string(),
            ty: TextureType::Texture2D,
            extent: Extent3d::new(4, 4, 1),
            format: Format::Rgba8Unorm,
            usage: TextureUsage::TRANSFER_DST | TextureUsage::SAMPLED,
            mip_levels: 1,
            array_layers: 1,
            sample_count: 1,
            memory_usage: MemoryUsage::GpuOnly,
            skip_bindless: false,
        }
    }

    #[test]
    fn create_texture_registers_a_bindless_slot() {
        let rm = manager(2);
        let h = rm.create_texture("t0", &texture_descriptor("t0")).unwrap();
        assert!(rm.validate(h.raw()));
        assert!(rm.texture(h.raw()).unwrap().bindless_index.is_some());
    }

    #[test]
    fn dropping_last_smart_handle_enqueues_destroy_not_immediate_free() {
        let rm = manager(2);
        let h = rm.create_texture("t0", &texture_descriptor("t0")).unwrap();
        let raw = h.raw();
        drop(h);
        // Dropping the last SmartHandle only enqueues a destroy event; the
        // slot is still Alive until process_destroy_events drains it.
        assert!(rm.validate(raw));
        rm.process_destroy_events(0);
        assert!(!rm.validate(raw));
    }

    #[test]
    fn destroyed_texture_native_resource_survives_until_its_frame_bucket_flushes() {
        let rm = manager(3);
        let h = rm.create_texture("t0", &texture_descriptor("t0")).unwrap();
        let raw = h.raw();
        drop(h);
        rm.process_destroy_events(5);
        assert!(!rm.validate(raw));
        // Bucket 5 % 3 == 2; flushing any other bucket must not touch it.
        rm.flush(3);
        rm.flush(4);
        assert_eq!(rm.dump_leaks().len(), 0);
        rm.flush(5);
    }

    #[test]
    fn replace_texture_preserves_dst_handle_identity_and_defers_old_payload() {
        let rm = manager(2);
        let dst = rm.create_texture("placeholder", &texture_descriptor("placeholder")).unwrap();
        let src = rm.create_texture("real", &texture_descriptor("real")).unwrap();
        let dst_raw = dst.raw();
        let src_raw = src.raw();

        rm.replace_texture(dst_raw, src_raw, 0).unwrap();

        assert!(rm.validate(dst_raw));
        assert_eq!(rm.texture(dst_raw).unwrap().debug_name, "real");
        // src's own slot was retired as part of the swap.
        assert!(!rm.validate(src_raw));

        std::mem::forget(dst);
        std::mem::forget(src);
    }

    #[test]
    fn replace_texture_rejects_invalid_handles() {
        let rm = manager(2);
        let dst = rm.create_texture("placeholder", &texture_descriptor("placeholder")).unwrap();
        let bogus = Handle {
            kind: ResourceKind::Texture,
            index: 9999,
            generation: 0,
        };
        assert!(matches!(
            rm.replace_texture(dst.raw(), bogus, 0),
            Err(StreamError::InvalidHandle)
        ));
    }

    #[test]
    fn destroy_texture_on_already_invalid_handle_is_a_no_op() {
        let rm = manager(2);
        let h = rm.create_texture("t0", &texture_descriptor("t0")).unwrap();
        let raw = h.raw();
        drop(h);
        rm.process_destroy_events(0);
        assert!(!rm.validate(raw));
        rm.destroy_texture(raw, 1);
        assert!(!rm.validate(raw));
    }

    #[test]
    fn dump_leaks_reports_alive_resources_with_outstanding_refcount() {
        let rm = manager(2);
        let h = rm.create_texture("leaky", &texture_descriptor("leaky")).unwrap();
        let leaks = rm.dump_leaks();
        assert_eq!(leaks.len(), 1);
        assert!(leaks[0].contains("leaky"));
        drop(h);
        rm.process_destroy_events(0);
        assert_eq!(rm.dump_leaks().len(), 0);
    }
}
