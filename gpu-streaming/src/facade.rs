//! The facade: a synchronous, handle-returning API in front of the
//! asynchronous streaming pipeline. Owns every other component (resource
//! manager, bindless registry, staging ring, request manager, I/O worker
//! pool, GPU transfer worker) and is the only type application code
//! normally constructs directly.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gpu_rhi::{
    BufferDescriptor, BufferUsage, BufferTextureCopyRegion, CommandPoolDescriptor,
    CommandPoolFlags, Device, Extent3d, Format, MemoryBarrier, MemoryUsage, ResourceLayout,
    ShaderStage, SubmitQueue, TextureDescriptor, TextureType, TextureUsage,
};
use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::bindless::BindlessRegistry;
use crate::config::StreamingConfig;
use crate::error::{StreamError, StreamResult};
use crate::handle::Handle;
use crate::io_worker::{IoWorkerPool, TextureDecoder};
use crate::request_manager::RequestManager;
use crate::requests::LoadRequest;
use crate::resource_manager::ResourceManager;
use crate::smart_handle::SmartHandle;
use crate::staging::StagingRing;
use crate::state_machine::Priority;
use crate::transfer_worker::{
    GpuTransferWorker, TransferMetricsSnapshot, TransferTarget, TransferWorkerConfig,
};

const FALLBACK_CHECKER_SIZE: u32 = 4;

/// Bridges [`ResourceManager`] to the transfer worker's narrow view of it,
/// without making the transfer worker depend on the resource manager crate
/// module directly.
struct ManagerTarget(Arc<ResourceManager>);

impl TransferTarget for ManagerTarget {
    fn is_live(&self, handle: Handle) -> bool {
        self.0.validate(handle)
    }

    fn texture(&self, handle: Handle) -> Option<Arc<dyn gpu_rhi::Texture>> {
        self.0.texture(handle).map(|t| t.native_texture.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoadStatus {
    Loading,
    Complete,
    Failed,
}

/// Snapshot of the pipeline's running counters, returned by
/// [`TextureFacade::get_streaming_statistics`].
#[derive(Clone, Debug, Default)]
pub struct StreamingStatistics {
    pub bindless: gpu_rhi::BindlessStatistics,
    pub transfer: TransferMetricsSnapshot,
    pub bytes_uploaded_this_frame: u64,
    pub pending_file_requests: usize,
    pub textures_loading: usize,
}

fn fnv1a32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// On-disk transcode cache filename: FNV-1a of the encoded bytes, folded
/// with the `srgb` flag via a boost-style combine, rendered as 16 hex
/// digits (the hash itself is 32 bits; the name is simply zero-extended so
/// cache filenames have a stable width).
fn cache_filename(encoded: &[u8], srgb: bool) -> String {
    let mut hash = fnv1a32(encoded);
    hash ^= (srgb as u32)
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(hash << 6)
        .wrapping_add(hash >> 2);
    format!("{hash:016x}.ktx2")
}

#[cfg(target_os = "windows")]
fn cache_root() -> PathBuf {
    std::env::var_os("LOCALAPPDATA")
        .map(|p| PathBuf::from(p).join("pnkr").join("cache").join("textures"))
        .unwrap_or_else(|| PathBuf::from("./.pnkr_cache/textures"))
}

#[cfg(not(target_os = "windows"))]
fn cache_root() -> PathBuf {
    std::env::var_os("HOME")
        .map(|p| PathBuf::from(p).join(".cache").join("pnkr").join("textures"))
        .unwrap_or_else(|| PathBuf::from("./.pnkr_cache/textures"))
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Distinct from the on-disk cache filename hash above: this key only needs
/// to be cheap and collision-tolerant for a process-lifetime map, not
/// stable across runs, so it uses `DefaultHasher` rather than FNV-1a.
fn in_memory_cache_key(normalized_path: &str, srgb: bool) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    normalized_path.hash(&mut hasher);
    let h1 = hasher.finish();
    let h2 = srgb as u64;
    h1 ^ h2
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(h1 << 6)
        .wrapping_add(h1 >> 2)
}

fn checkerboard_rgba(size: u32, a: [u8; 4], b: [u8; 4]) -> Vec<u8> {
    let mut out = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let c = if (x + y) % 2 == 0 { a } else { b };
            out.extend_from_slice(&c);
        }
    }
    out
}

/// Synchronously uploads `layer_bytes[i]` into array layer `i` of the
/// texture behind `handle`, through a throwaway CPU-visible staging buffer
/// and an immediate graphics-queue submission. Used only for the facade's
/// baked-in fallbacks and the synchronous `create_texture`/`create_cubemap`
/// surface — the async pipeline in `transfer_worker` never calls this.
fn upload_sync(
    device: &Arc<dyn Device>,
    resources: &ResourceManager,
    handle: &SmartHandle,
    layer_bytes: &[Vec<u8>],
) -> StreamResult<()> {
    let texture = resources
        .texture(handle.raw())
        .ok_or(StreamError::InvalidHandle)?
        .native_texture
        .clone();
    let total: usize = layer_bytes.iter().map(|b| b.len()).sum();
    let staging = device.create_buffer(&BufferDescriptor {
        debug_name: "facade_sync_upload".to_string(),
        size: total as u64,
        usage: BufferUsage::TRANSFER_SRC,
        memory_usage: MemoryUsage::CpuToGpu,
    })?;
    let base = staging
        .mapped_ptr()
        .expect("CpuToGpu staging buffer must be host-mapped");

    let extent = texture.extent();
    let mut regions = Vec::with_capacity(layer_bytes.len());
    let mut offset = 0usize;
    for (layer, bytes) in layer_bytes.iter().enumerate() {
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(offset), bytes.len());
        }
        regions.push(BufferTextureCopyRegion {
            buffer_offset: offset as u64,
            buffer_row_length: extent.width,
            buffer_image_height: extent.height,
            mip_level: 0,
            array_layer: layer as u32,
            texture_offset: Extent3d::new(0, 0, 0),
            texture_extent: extent,
        });
        offset += bytes.len();
    }

    let queues = device.queue_family_indices();
    let pool = device.create_command_pool(&CommandPoolDescriptor {
        queue_family_index: queues.graphics,
        flags: CommandPoolFlags::RESET_COMMAND_BUFFER,
    })?;
    let mut list = device.create_command_list(pool.as_ref())?;
    list.begin()?;
    list.pipeline_barrier(
        texture.as_ref(),
        MemoryBarrier {
            old_layout: ResourceLayout::Undefined,
            new_layout: ResourceLayout::TransferDst,
            src_access_stage: ShaderStage::NONE,
            dst_access_stage: ShaderStage::TRANSFER,
            src_queue_family: queues.graphics,
            dst_queue_family: queues.graphics,
        },
    );
    list.copy_buffer_to_texture(staging.as_ref(), texture.as_ref(), &regions);
    list.pipeline_barrier(
        texture.as_ref(),
        MemoryBarrier {
            old_layout: ResourceLayout::TransferDst,
            new_layout: ResourceLayout::ShaderReadOnly,
            src_access_stage: ShaderStage::TRANSFER,
            dst_access_stage: ShaderStage::GRAPHICS,
            src_queue_family: queues.graphics,
            dst_queue_family: queues.graphics,
        },
    );
    list.end()?;
    let fence = device.create_fence(false)?;
    device.submit_commands(SubmitQueue::Graphics, list.as_ref(), Some(fence.as_ref()), &[], &[])?;
    device.wait_idle()?;
    Ok(())
}

fn build_texture(
    device: &Arc<dyn Device>,
    resources: &Arc<ResourceManager>,
    name: &str,
    ty: TextureType,
    extent: Extent3d,
    format: Format,
    array_layers: u32,
    layer_bytes: Vec<Vec<u8>>,
) -> StreamResult<SmartHandle> {
    let descriptor = TextureDescriptor {
        debug_name: name.to_string(),
        ty,
        extent,
        format,
        usage: TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
        mip_levels: 1,
        array_layers,
        sample_count: 1,
        memory_usage: MemoryUsage::GpuOnly,
        skip_bindless: false,
    };
    let handle = resources.create_texture(name, &descriptor)?;
    upload_sync(device, resources, &handle, &layer_bytes)?;
    Ok(handle)
}

/// Owns the whole pipeline. Construct one per RHI device; `shutdown`
/// tears down the background threads in the order the device needs
/// (workers first, device idle last).
pub struct TextureFacade {
    device: Arc<dyn Device>,
    resources: Arc<ResourceManager>,
    bindless: Arc<BindlessRegistry>,
    requests: Arc<RequestManager>,
    staging: Arc<StagingRing>,
    decoder: Arc<dyn TextureDecoder>,
    io_workers: Option<IoWorkerPool>,
    transfer_worker: Option<GpuTransferWorker>,
    config: StreamingConfig,
    frame_index: AtomicU64,
    cache: Mutex<HashMap<u64, SmartHandle>>,
    status: Mutex<HashMap<Handle, LoadStatus>>,
    completed: Mutex<Vec<Handle>>,
    bytes_uploaded_this_frame: AtomicU64,

    default_white: SmartHandle,
    error_texture: SmartHandle,
    loading_texture: SmartHandle,
    default_white_cube: SmartHandle,
    error_cube: SmartHandle,
    loading_cube: SmartHandle,
}

impl std::fmt::Debug for TextureFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureFacade")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TextureFacade {
    pub fn new(
        device: Arc<dyn Device>,
        config: StreamingConfig,
        decoder: Arc<dyn TextureDecoder>,
    ) -> StreamResult<Self> {
        let frames_in_flight = config.frames_in_flight as u64;
        let bindless = Arc::new(BindlessRegistry::new(device.clone(), frames_in_flight));
        let resources = Arc::new(ResourceManager::new(device.clone(), bindless.clone(), frames_in_flight));
        let staging = Arc::new(StagingRing::new(
            device.as_ref(),
            config.staging_ring_size_bytes,
            config.staging_page_size_bytes,
            config.max_temporary_staging_buffers as usize,
        )?);
        let requests = Arc::new(RequestManager::new());

        let io_workers = config
            .async_streaming_enabled
            .then(|| IoWorkerPool::new(config.max_concurrent_file_loads, requests.clone(), decoder.clone()));

        let transfer_worker = config.async_streaming_enabled.then(|| {
            GpuTransferWorker::spawn(
                device.clone(),
                staging.clone(),
                requests.clone(),
                Arc::new(ManagerTarget(resources.clone())) as Arc<dyn TransferTarget>,
                TransferWorkerConfig {
                    in_flight_batches: config.in_flight_batches,
                    max_bytes_per_frame: config.max_upload_bytes_per_frame,
                    max_jobs_per_frame: config.max_upload_jobs_per_frame,
                },
            )
        });

        let white = vec![255u8, 255, 255, 255];
        let error_px = checkerboard_rgba(FALLBACK_CHECKER_SIZE, [255, 0, 255, 255], [0, 0, 0, 255]);
        let loading_px = checkerboard_rgba(FALLBACK_CHECKER_SIZE, [160, 160, 160, 255], [96, 96, 96, 255]);

        let default_white = build_texture(
            &device,
            &resources,
            "default_white",
            TextureType::Texture2D,
            Extent3d::new(1, 1, 1),
            Format::Rgba8Unorm,
            1,
            vec![white.clone()],
        )?;
        let error_texture = build_texture(
            &device,
            &resources,
            "error",
            TextureType::Texture2D,
            Extent3d::new(FALLBACK_CHECKER_SIZE, FALLBACK_CHECKER_SIZE, 1),
            Format::Rgba8Unorm,
            1,
            vec![error_px.clone()],
        )?;
        let loading_texture = build_texture(
            &device,
            &resources,
            "loading",
            TextureType::Texture2D,
            Extent3d::new(FALLBACK_CHECKER_SIZE, FALLBACK_CHECKER_SIZE, 1),
            Format::Rgba8Unorm,
            1,
            vec![loading_px.clone()],
        )?;
        let default_white_cube = build_texture(
            &device,
            &resources,
            "default_white_cube",
            TextureType::TextureCube,
            Extent3d::new(1, 1, 1),
            Format::Rgba8Unorm,
            6,
            vec![white; 6],
        )?;
        let error_cube = build_texture(
            &device,
            &resources,
            "error_cube",
            TextureType::TextureCube,
            Extent3d::new(FALLBACK_CHECKER_SIZE, FALLBACK_CHECKER_SIZE, 1),
            Format::Rgba8Unorm,
            6,
            vec![error_px; 6],
        )?;
        let loading_cube = build_texture(
            &device,
            &resources,
            "loading_cube",
            TextureType::TextureCube,
            Extent3d::new(FALLBACK_CHECKER_SIZE, FALLBACK_CHECKER_SIZE, 1),
            Format::Rgba8Unorm,
            6,
            vec![loading_px; 6],
        )?;

        Ok(Self {
            device,
            resources,
            bindless,
            requests,
            staging,
            decoder,
            io_workers,
            transfer_worker,
            config,
            frame_index: AtomicU64::new(0),
            cache: Mutex::new(HashMap::new()),
            status: Mutex::new(HashMap::new()),
            completed: Mutex::new(Vec::new()),
            bytes_uploaded_this_frame: AtomicU64::new(0),
            default_white,
            error_texture,
            loading_texture,
            default_white_cube,
            error_cube,
            loading_cube,
        })
    }

    pub fn get_default_white(&self) -> SmartHandle {
        self.default_white.clone()
    }

    pub fn get_error_texture(&self) -> SmartHandle {
        self.error_texture.clone()
    }

    pub fn get_loading_texture(&self) -> SmartHandle {
        self.loading_texture.clone()
    }

    pub fn get_default_white_cube(&self) -> SmartHandle {
        self.default_white_cube.clone()
    }

    pub fn get_error_cube(&self) -> SmartHandle {
        self.error_cube.clone()
    }

    pub fn get_loading_cube(&self) -> SmartHandle {
        self.loading_cube.clone()
    }

    fn make_error_proxy(&self) -> StreamResult<SmartHandle> {
        let bytes = checkerboard_rgba(FALLBACK_CHECKER_SIZE, [255, 0, 255, 255], [0, 0, 0, 255]);
        build_texture(
            &self.device,
            &self.resources,
            "error_proxy",
            TextureType::Texture2D,
            Extent3d::new(FALLBACK_CHECKER_SIZE, FALLBACK_CHECKER_SIZE, 1),
            Format::Rgba8Unorm,
            1,
            vec![bytes],
        )
    }

    fn make_loading_proxy(&self) -> StreamResult<SmartHandle> {
        let bytes = checkerboard_rgba(FALLBACK_CHECKER_SIZE, [160, 160, 160, 255], [96, 96, 96, 255]);
        build_texture(
            &self.device,
            &self.resources,
            "loading_proxy",
            TextureType::Texture2D,
            Extent3d::new(FALLBACK_CHECKER_SIZE, FALLBACK_CHECKER_SIZE, 1),
            Format::Rgba8Unorm,
            1,
            vec![bytes],
        )
    }

    /// Non-blocking. Returns a cache hit immediately; otherwise stands up a
    /// loading-proxy-backed handle and enqueues a `LoadRequest`.
    pub fn load_texture(&self, path: &str, srgb: bool, priority: Priority) -> StreamResult<SmartHandle> {
        let normalized = normalize_path(path);
        let key = in_memory_cache_key(&normalized, srgb);
        if let Some(existing) = self.cache.lock().get(&key) {
            return Ok(existing.clone());
        }

        let placeholder = build_texture(
            &self.device,
            &self.resources,
            &format!("{normalized}:placeholder"),
            TextureType::Texture2D,
            Extent3d::new(1, 1, 1),
            Format::Rgba8Unorm,
            1,
            vec![vec![0u8; 4]],
        )?;
        let user_handle = placeholder.raw();

        let loading_proxy = self.make_loading_proxy()?;
        let frame = self.frame_index.load(Ordering::Acquire);
        self.resources.replace_texture(user_handle, loading_proxy.raw(), frame)?;

        self.status.lock().insert(user_handle, LoadStatus::Loading);
        self.requests.enqueue_file_request(LoadRequest {
            path: normalized,
            target_handle: user_handle,
            srgb,
            priority,
            base_mip: 0,
            enqueue_timestamp: frame,
        });

        self.cache.lock().insert(key, placeholder.clone());
        Ok(placeholder)
    }

    /// Identical contract to [`Self::load_texture`]; kept as a distinct
    /// entry point because KTX2 assets carry their own mip ladder and
    /// cubemap metadata that a future decoder integration may need to
    /// branch on before the request is enqueued. Today it is a thin alias.
    pub fn load_texture_ktx(&self, path: &str, srgb: bool, priority: Priority) -> StreamResult<SmartHandle> {
        self.load_texture(path, srgb, priority)
    }

    /// Immediate, synchronous upload from already-decoded raw bytes.
    pub fn create_texture(
        &self,
        debug_name: &str,
        width: u32,
        height: u32,
        channels: u32,
        bytes: &[u8],
        srgb: bool,
    ) -> StreamResult<SmartHandle> {
        let format = match channels {
            1 => Format::R8Unorm,
            2 => Format::Rg8Unorm,
            4 => Format::Rgba8Unorm,
            other => {
                return Err(StreamError::FormatMismatch {
                    reason: format!("unsupported channel count {other}"),
                })
            }
        }
        .with_srgb(srgb);
        let expected = (width as usize) * (height as usize) * (channels as usize);
        if bytes.len() != expected {
            return Err(StreamError::FormatMismatch {
                reason: format!("expected {expected} bytes, got {}", bytes.len()),
            });
        }
        build_texture(
            &self.device,
            &self.resources,
            debug_name,
            TextureType::Texture2D,
            Extent3d::new(width, height, 1),
            format,
            1,
            vec![bytes.to_vec()],
        )
    }

    /// Synchronous cubemap construction from six already-decoded faces. A
    /// face-dimension mismatch is not a hard error: it is logged once and
    /// resolved to the shared error-cube fallback, matching how the async
    /// pipeline resolves terminal per-request failures to an error proxy
    /// rather than propagating `Err` to a renderer that expects a handle.
    pub fn create_cubemap(
        &self,
        debug_name: &str,
        faces: [(u32, u32, &[u8]); 6],
        srgb: bool,
    ) -> StreamResult<SmartHandle> {
        let (w0, h0, _) = faces[0];
        if faces.iter().any(|(w, h, _)| *w != w0 || *h != h0) {
            error!(target: "stream", "create_cubemap `{debug_name}`: face dimension mismatch");
            return Ok(self.error_cube.clone());
        }
        let format = Format::Rgba8Unorm.with_srgb(srgb);
        let expected = (w0 as usize) * (h0 as usize) * 4;
        let mut layer_bytes = Vec::with_capacity(6);
        for (_, _, bytes) in faces.iter() {
            if bytes.len() != expected {
                error!(target: "stream", "create_cubemap `{debug_name}`: face byte length mismatch");
                return Ok(self.error_cube.clone());
            }
            layer_bytes.push(bytes.to_vec());
        }
        build_texture(
            &self.device,
            &self.resources,
            debug_name,
            TextureType::TextureCube,
            Extent3d::new(w0, h0, 1),
            format,
            6,
            layer_bytes,
        )
    }

    /// Writes `encoded_bytes` to the transcode cache (if not already
    /// present) under the FNV-1a-derived filename, then loads it through
    /// the normal async path. The actual re-encode to an on-disk GPU-ready
    /// form is a decoder concern outside this crate's scope; the bytes are
    /// cached as-is so the cache-path/filename contract is exercised end to
    /// end regardless of which decoder is plugged in.
    pub fn create_texture_with_cache(&self, encoded_bytes: &[u8], srgb: bool) -> StreamResult<SmartHandle> {
        let dir = cache_root();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(target: "stream", "failed to create texture cache dir {}: {e}", dir.display());
        }
        let filename = cache_filename(encoded_bytes, srgb);
        let path = dir.join(&filename);
        if !path.exists() {
            if let Err(e) = std::fs::write(&path, encoded_bytes) {
                warn!(target: "stream", "failed to write transcode cache entry {}: {e}", path.display());
            }
        }
        let path_str = path.to_string_lossy().into_owned();
        self.load_texture(&path_str, srgb, Priority::Medium)
    }

    /// Turns every texture an I/O worker finished decoding since the last
    /// tick into a backed intermediate texture (created `skip_bindless`,
    /// since it borrows the eventual `dst`'s bindless slot at finalization
    /// time rather than holding its own) and hands it to the transfer
    /// worker via the prioritized upload queue.
    fn pump_decoded(&self) {
        while let Some(mut req) = self.requests.try_recv_decoded() {
            let descriptor = TextureDescriptor {
                debug_name: format!("{}:intermediate", req.path),
                ty: req.shape.ty,
                extent: req.shape.extent,
                format: req.shape.format,
                usage: TextureUsage::TRANSFER_DST | TextureUsage::SAMPLED,
                mip_levels: req.shape.mip_levels,
                array_layers: req.shape.array_layers,
                sample_count: 1,
                memory_usage: MemoryUsage::GpuOnly,
                skip_bindless: true,
            };
            match self.resources.create_texture(&descriptor.debug_name, &descriptor) {
                Ok(intermediate) => {
                    req.intermediate_handle = Some(intermediate);
                    self.requests.enqueue_upload(req);
                }
                Err(e) => {
                    error!(target: "stream", "failed to create intermediate texture for `{}`: {e}", req.path);
                    self.requests.enqueue_finalization(crate::requests::FinalizedRequest {
                        target_handle: req.target_handle,
                        intermediate_handle: None,
                        success: false,
                        failure_reason: Some(format!("intermediate texture creation failed: {e}")),
                    });
                }
            }
        }
    }

    /// Per-frame render-thread tick: pulls newly decoded textures into the
    /// upload pipeline, drains finalized requests (swapping user handles
    /// onto their real or error texture), reclaims bindless slots and
    /// deferred native resources for the frame that just matured, and
    /// advances the frame counter the RHI backend and staging ring key off
    /// of.
    pub fn sync_to_gpu(&self) {
        let frame = self.frame_index.fetch_add(1, Ordering::AcqRel);
        self.device.set_frame_index(frame);

        self.pump_decoded();

        for finalized in self.requests.drain_finalization() {
            let target = finalized.target_handle;
            if !self.resources.validate(target) {
                debug!(target: "stream", "finalization for {:?} arrived after the handle was unloaded", target);
                continue;
            }
            if finalized.success {
                let Some(intermediate) = finalized.intermediate_handle else {
                    continue;
                };
                if let Err(e) = self.resources.replace_texture(target, intermediate.raw(), frame) {
                    error!(target: "stream", "replace_texture failed for {:?}: {e}", target);
                    continue;
                }
                self.status.lock().insert(target, LoadStatus::Complete);
                self.completed.lock().push(target);
            } else {
                if let Some(reason) = &finalized.failure_reason {
                    error!(target: "stream", "load for {:?} failed: {reason}", target);
                }
                match self.make_error_proxy() {
                    Ok(proxy) => {
                        if let Err(e) = self.resources.replace_texture(target, proxy.raw(), frame) {
                            error!(target: "stream", "replace_texture (error proxy) failed for {:?}: {e}", target);
                        }
                        self.status.lock().insert(target, LoadStatus::Failed);
                    }
                    Err(e) => error!(target: "stream", "failed to build error proxy: {e}"),
                }
            }
        }

        self.bindless.update(frame);
        self.resources.flush(frame);
        self.resources.process_destroy_events(frame);

        if let Some(worker) = &self.transfer_worker {
            self.bytes_uploaded_this_frame
                .store(worker.metrics().take_bytes_this_frame(), Ordering::Release);
        }
    }

    pub fn consume_completed_textures(&self) -> Vec<Handle> {
        std::mem::take(&mut self.completed.lock())
    }

    pub fn get_streaming_statistics(&self) -> StreamingStatistics {
        let transfer = self
            .transfer_worker
            .as_ref()
            .map(|w| w.metrics().snapshot())
            .unwrap_or_default();
        let textures_loading = self
            .status
            .lock()
            .values()
            .filter(|s| **s == LoadStatus::Loading)
            .count();
        StreamingStatistics {
            bindless: self.bindless.statistics(),
            transfer,
            bytes_uploaded_this_frame: self.bytes_uploaded_this_frame.load(Ordering::Acquire),
            pending_file_requests: self.requests.pending_file_requests(),
            textures_loading,
        }
    }

    pub fn is_texture_loaded(&self, handle: Handle) -> bool {
        matches!(self.status.lock().get(&handle), Some(LoadStatus::Complete))
    }

    pub fn unload_texture(&self, handle: Handle) {
        self.cache.lock().retain(|_, h| h.raw() != handle);
        self.status.lock().remove(&handle);
        self.resources.destroy_texture(handle, self.frame_index.load(Ordering::Acquire));
    }

    pub fn unload_all_textures(&self) {
        let handles: Vec<Handle> = self.status.lock().keys().copied().collect();
        self.cache.lock().clear();
        self.status.lock().clear();
        let frame = self.frame_index.load(Ordering::Acquire);
        for h in handles {
            self.resources.destroy_texture(h, frame);
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn decoder(&self) -> &Arc<dyn TextureDecoder> {
        &self.decoder
    }

    /// Stops background workers and waits the device idle before dropping
    /// anything they might still be touching.
    pub fn shutdown(self) {
        if let Some(worker) = self.transfer_worker {
            let _ = self.device.wait_idle();
            worker.shutdown();
        }
        if let Some(pool) = self.io_workers {
            pool.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_worker::DecodedTexture;
    use crate::requests::TextureShape;
    use gpu_rhi::null::NullDevice;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct FixedDecoder {
        calls: AtomicUsize,
    }

    impl TextureDecoder for FixedDecoder {
        fn decode(&self, _path: &str) -> Result<DecodedTexture, crate::io_worker::DecodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DecodedTexture {
                shape: TextureShape {
                    ty: TextureType::Texture2D,
                    extent: Extent3d::new(2, 2, 1),
                    format: Format::Rgba8Unorm,
                    mip_levels: 1,
                    array_layers: 1,
                },
                bytes: vec![42u8; 2 * 2 * 4],
                mip_count_provided: 1,
            })
        }
    }

    fn facade(config: StreamingConfig) -> TextureFacade {
        crate::init_test_logging();
        let device: Arc<dyn Device> = Arc::new(NullDevice::new());
        let decoder: Arc<dyn TextureDecoder> = Arc::new(FixedDecoder {
            calls: AtomicUsize::new(0),
        });
        TextureFacade::new(device, config, decoder).unwrap()
    }

    #[test]
    fn fallback_textures_are_distinct_and_valid() {
        let f = facade(StreamingConfig::builder().async_streaming_enabled(false).build());
        assert!(f.get_default_white().is_valid());
        assert!(f.get_error_texture().is_valid());
        assert!(f.get_loading_texture().is_valid());
        assert_ne!(f.get_default_white().raw(), f.get_error_texture().raw());
        f.shutdown();
    }

    #[test]
    fn load_texture_twice_returns_the_same_raw_handle() {
        let f = facade(StreamingConfig::builder().async_streaming_enabled(false).build());
        let h1 = f.load_texture("rocks.png", true, Priority::Medium).unwrap();
        let h2 = f.load_texture("rocks.png", true, Priority::Medium).unwrap();
        assert_eq!(h1.raw(), h2.raw());
        f.shutdown();
    }

    #[test]
    fn successful_load_ends_up_complete_and_consumable() {
        let f = facade(StreamingConfig::builder().build());
        let handle = f.load_texture("tex.png", false, Priority::High).unwrap();
        let raw = handle.raw();

        let mut completed = Vec::new();
        for _ in 0..500 {
            f.sync_to_gpu();
            completed = f.consume_completed_textures();
            if !completed.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(completed, vec![raw]);
        assert!(f.is_texture_loaded(raw));
        f.shutdown();
    }

    #[test]
    fn unload_texture_clears_cache_and_status() {
        let f = facade(StreamingConfig::builder().async_streaming_enabled(false).build());
        let handle = f.load_texture("a.png", true, Priority::Low).unwrap();
        let raw = handle.raw();
        f.unload_texture(raw);
        assert!(!f.is_texture_loaded(raw));
        let again = f.load_texture("a.png", true, Priority::Low).unwrap();
        assert_ne!(again.raw(), raw);
        f.shutdown();
    }

    #[test]
    fn create_texture_validates_byte_length() {
        let f = facade(StreamingConfig::builder().async_streaming_enabled(false).build());
        let err = f.create_texture("bad", 4, 4, 4, &[0u8; 3], false).unwrap_err();
        assert!(matches!(err, StreamError::FormatMismatch { .. }));
        f.shutdown();
    }

    #[test]
    fn create_cubemap_with_matching_faces_succeeds() {
        let f = facade(StreamingConfig::builder().async_streaming_enabled(false).build());
        let face = vec![7u8; 2 * 2 * 4];
        let faces = [
            (2, 2, face.as_slice()),
            (2, 2, face.as_slice()),
            (2, 2, face.as_slice()),
            (2, 2, face.as_slice()),
            (2, 2, face.as_slice()),
            (2, 2, face.as_slice()),
        ];
        let handle = f.create_cubemap("sky", faces, true).unwrap();
        assert!(handle.is_valid());
        assert_ne!(handle.raw(), f.get_error_cube().raw());
        f.shutdown();
    }

    #[test]
    fn create_cubemap_with_mismatched_faces_returns_error_cube() {
        let f = facade(StreamingConfig::builder().async_streaming_enabled(false).build());
        let a = vec![1u8; 2 * 2 * 4];
        let b = vec![1u8; 4 * 4 * 4];
        let faces = [
            (2, 2, a.as_slice()),
            (2, 2, a.as_slice()),
            (2, 2, a.as_slice()),
            (2, 2, a.as_slice()),
            (4, 4, b.as_slice()),
            (2, 2, a.as_slice()),
        ];
        let handle = f.create_cubemap("sky", faces, true).unwrap();
        assert_eq!(handle.raw(), f.get_error_cube().raw());
        f.shutdown();
    }

    #[test]
    fn cache_filename_changes_with_srgb_flag() {
        let bytes = b"pretend-encoded-texture";
        let linear = cache_filename(bytes, false);
        let srgb = cache_filename(bytes, true);
        assert_ne!(linear, srgb);
        assert!(linear.ends_with(".ktx2"));
    }
}
