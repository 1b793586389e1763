//! The GPU transfer worker: a single dedicated thread owning `N` in-flight
//! batch slots, each with its own transfer/graphics command lists and
//! fences. Pulls ready uploads off [`RequestManager`], reserves staging,
//! plans and records copies via [`crate::streamer`], submits on the
//! transfer queue, and chains mipmap generation on the graphics queue with
//! a cross-queue-family ownership handoff when the two queues differ.
//!
//! Nothing here calls `ResourceManager::replace_texture` directly —
//! finished (or abandoned) requests are routed to the finalization queue
//! and the render thread performs the handle swap (see `crate::facade`).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use gpu_rhi::{
    CommandList, Device, Fence, MemoryBarrier, ResourceLayout, Semaphore, ShaderStage, SubmitQueue,
};
use log::{debug, trace, warn};

use crate::handle::Handle;
use crate::request_manager::RequestManager;
use crate::requests::{FinalizedRequest, StagingRange, TextureShape, UploadRequest};
use crate::staging::StagingRing;
use crate::state_machine::{State, StreamDirection};
use crate::streamer;

/// Tunables the transfer worker needs that aren't staging-ring-specific. A
/// subset of `StreamingConfig`, passed in by whatever constructs the worker
/// (the facade, normally).
#[derive(Clone, Copy, Debug)]
pub struct TransferWorkerConfig {
    pub in_flight_batches: u32,
    pub max_bytes_per_frame: u64,
    pub max_jobs_per_frame: u32,
}

/// Running totals the facade surfaces via `get_streaming_statistics`.
#[derive(Debug, Default)]
pub struct TransferMetrics {
    bytes_uploaded_total: AtomicU64,
    batches_submitted: AtomicU64,
    bytes_uploaded_this_frame: AtomicU64,
    transfer_active_ns: AtomicU64,
}

impl TransferMetrics {
    pub fn snapshot(&self) -> TransferMetricsSnapshot {
        TransferMetricsSnapshot {
            bytes_uploaded_total: self.bytes_uploaded_total.load(Ordering::Relaxed),
            batches_submitted: self.batches_submitted.load(Ordering::Relaxed),
            transfer_active_ns: self.transfer_active_ns.load(Ordering::Relaxed),
        }
    }

    /// Reads and zeroes the per-frame byte counter; called once per frame
    /// by the facade's render-thread tick.
    pub fn take_bytes_this_frame(&self) -> u64 {
        self.bytes_uploaded_this_frame.swap(0, Ordering::AcqRel)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TransferMetricsSnapshot {
    pub bytes_uploaded_total: u64,
    pub batches_submitted: u64,
    pub transfer_active_ns: u64,
}

/// Callbacks the worker needs into the resource manager without depending
/// on it directly: whether a job's target handle is still live, and the
/// native texture of a job's intermediate (created by the facade on the
/// render thread before the job was enqueued).
pub trait TransferTarget: Send + Sync {
    fn is_live(&self, handle: Handle) -> bool;
    fn texture(&self, handle: Handle) -> Option<Arc<dyn gpu_rhi::Texture>>;
}

/// One in-flight batch: a transfer command list (always used) plus a
/// graphics command list (recorded into only when some job in the batch
/// needs mipmap generation).
struct BatchSlot {
    busy: bool,
    batch_id: u64,
    transfer_list: Box<dyn CommandList>,
    graphics_list: Box<dyn CommandList>,
    transfer_fence: Box<dyn Fence>,
    graphics_fence: Box<dyn Fence>,
    /// Signaled by the transfer submit, waited on by the graphics submit, so
    /// mipmap generation never reads a base level before the transfer
    /// queue's copies are visible. Only used cross-queue; the same-queue
    /// case instead blocks on `transfer_fence` directly (see `run`).
    transfer_done: Box<dyn Semaphore>,
    jobs: Vec<UploadRequest>,
    staging_ranges: Vec<StagingRange>,
    needs_mipmap: bool,
}

fn make_slot(device: &dyn Device, queues: gpu_rhi::QueueFamilyIndices) -> BatchSlot {
    let transfer_pool = device
        .create_command_pool(&gpu_rhi::CommandPoolDescriptor {
            queue_family_index: queues.transfer,
            flags: gpu_rhi::CommandPoolFlags::RESET_COMMAND_BUFFER,
        })
        .expect("failed to create transfer command pool");
    let graphics_pool = device
        .create_command_pool(&gpu_rhi::CommandPoolDescriptor {
            queue_family_index: queues.graphics,
            flags: gpu_rhi::CommandPoolFlags::RESET_COMMAND_BUFFER,
        })
        .expect("failed to create graphics command pool");
    BatchSlot {
        busy: false,
        batch_id: 0,
        transfer_list: device
            .create_command_list(transfer_pool.as_ref())
            .expect("failed to create transfer command list"),
        graphics_list: device
            .create_command_list(graphics_pool.as_ref())
            .expect("failed to create graphics command list"),
        transfer_fence: device.create_fence(false).expect("failed to create transfer fence"),
        graphics_fence: device.create_fence(false).expect("failed to create graphics fence"),
        transfer_done: device.create_semaphore().expect("failed to create transfer-done semaphore"),
        jobs: Vec::new(),
        staging_ranges: Vec::new(),
        needs_mipmap: false,
    }
}

/// Owns the dedicated transfer thread. Constructed with everything it needs
/// to run standalone, so the facade just spawns it and later shuts it down.
pub struct GpuTransferWorker {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    metrics: Arc<TransferMetrics>,
}

impl std::fmt::Debug for GpuTransferWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuTransferWorker").finish_non_exhaustive()
    }
}

impl GpuTransferWorker {
    pub fn spawn(
        device: Arc<dyn Device>,
        staging: Arc<StagingRing>,
        requests: Arc<RequestManager>,
        target: Arc<dyn TransferTarget>,
        config: TransferWorkerConfig,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(TransferMetrics::default());
        let thread = {
            let running = running.clone();
            let metrics = metrics.clone();
            thread::Builder::new()
                .name("gpu-transfer".to_string())
                .spawn(move || run(running, device, staging, requests, target, config, metrics))
                .expect("failed to spawn GPU transfer thread")
        };
        Self {
            running,
            thread: Some(thread),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<TransferMetrics> {
        &self.metrics
    }

    /// Signals the loop to stop, wakes it, and joins. The caller should
    /// `device.wait_idle()` beforehand for a clean device teardown; this
    /// only guarantees the thread itself has exited.
    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

/// Bytes of `job`'s decoded payload not yet handed to staging, derived from
/// the stream cursor (not tracked separately) so a re-queued request's
/// remaining size always agrees with its `StreamRequestState`. Slightly
/// conservative: a partially-copied current mip is still counted whole.
fn remaining_bytes(job: &UploadRequest) -> u64 {
    match job.stream.direction {
        StreamDirection::HighToLow => {
            let consumed = streamer::mip_layer_base_offset(&job.shape, job.stream.current_level, 0);
            job.total_size.saturating_sub(consumed)
        }
        StreamDirection::LowToHigh => {
            let through_current =
                streamer::mip_layer_base_offset(&job.shape, job.stream.current_level + 1, 0);
            through_current.min(job.total_size)
        }
    }
}

fn fail_job(job: &mut UploadRequest, requests: &RequestManager, reason: &str) {
    let _ = job.state.transition(State::Failed);
    requests.enqueue_finalization(FinalizedRequest {
        target_handle: job.target_handle,
        intermediate_handle: job.intermediate_handle.take(),
        success: false,
        failure_reason: Some(reason.to_string()),
    });
}

/// Records every copy region staging can currently accommodate for `job`
/// into `transfer_list`, advancing its stream cursor as it goes. Returns
/// the number of bytes copied; stops once the allocation's capacity is
/// exhausted or the job's stream is fully done.
#[allow(clippy::too_many_arguments)]
fn record_copies(
    transfer_list: &mut dyn CommandList,
    staging: &StagingRing,
    shape: &TextureShape,
    job: &mut UploadRequest,
    texture: &dyn gpu_rhi::Texture,
    alloc_offset: u64,
    alloc_size: u64,
    alloc_is_temporary: bool,
    alloc_temp_index: Option<usize>,
) -> u64 {
    let mut written = 0u64;
    loop {
        let remaining_capacity = alloc_size - written;
        if remaining_capacity == 0 {
            break;
        }
        let Some(plan) =
            streamer::plan_copy_region(shape, &job.stream, remaining_capacity, staging.ring_size())
        else {
            break;
        };

        let write_offset = if alloc_is_temporary { written } else { alloc_offset + written };
        let dst_base = if alloc_is_temporary {
            staging.temporary_mapped_ptr(alloc_temp_index.expect("temporary allocation has an index"))
        } else {
            staging.mapped_base()
        };
        if let Some(base_ptr) = dst_base {
            unsafe {
                let dst = base_ptr.add(write_offset as usize);
                let src = job.decoded_bytes.as_ptr().add(plan.source_offset as usize);
                std::ptr::copy_nonoverlapping(src, dst, plan.copy_size as usize);
            }
        }

        let mut region = plan.region;
        region.buffer_offset = write_offset;

        if alloc_is_temporary {
            let idx = alloc_temp_index.expect("temporary allocation has an index");
            staging.with_temporary_buffer(idx, |buf| {
                transfer_list.copy_buffer_to_texture(buf, texture, &[region]);
            });
        } else {
            transfer_list.copy_buffer_to_texture(staging.ring_buffer(), texture, &[region]);
        }

        written += plan.copy_size;
        let mip_count = job.mip_count_provided.max(1);
        if streamer::advance_request_state(&mut job.stream, shape, mip_count, &plan) {
            job.layout_finalized = true;
            if job.mip_count_provided < job.mip_levels_requested {
                job.needs_mipmap_generation = true;
            }
            break;
        }
    }
    written
}

fn run(
    running: Arc<AtomicBool>,
    device: Arc<dyn Device>,
    staging: Arc<StagingRing>,
    requests: Arc<RequestManager>,
    target: Arc<dyn TransferTarget>,
    config: TransferWorkerConfig,
    metrics: Arc<TransferMetrics>,
) {
    let queues = device.queue_family_indices();
    let cross_queue = queues.transfer != queues.graphics;
    let mut slots: Vec<BatchSlot> = (0..config.in_flight_batches.max(1))
        .map(|_| make_slot(device.as_ref(), queues))
        .collect();

    while running.load(Ordering::Acquire) {
        reclaim_completed(&mut slots, &staging, &requests);

        let Some(slot_idx) = slots.iter().position(|s| !s.busy) else {
            thread::sleep(Duration::from_millis(1));
            continue;
        };

        let batch_id = staging.begin_batch();
        slots[slot_idx].batch_id = batch_id;
        slots[slot_idx].jobs.clear();
        slots[slot_idx].staging_ranges.clear();
        slots[slot_idx].needs_mipmap = false;
        slots[slot_idx]
            .transfer_list
            .begin()
            .expect("failed to begin transfer command list");

        let started = Instant::now();
        let mut bytes_this_batch = 0u64;
        let mut jobs_this_batch = 0u32;
        let mut made_progress = false;

        loop {
            if bytes_this_batch >= config.max_bytes_per_frame || jobs_this_batch >= config.max_jobs_per_frame {
                break;
            }
            let mut job = match requests.next_upload() {
                Some(j) => j,
                None => {
                    if made_progress || !running.load(Ordering::Acquire) {
                        break;
                    }
                    requests.wait_for_upload(Duration::from_millis(10));
                    match requests.next_upload() {
                        Some(j) => j,
                        None => break,
                    }
                }
            };

            if !target.is_live(job.target_handle) {
                debug!(target: "stream", "transfer worker: target {:?} no longer live, failing job", job.target_handle);
                fail_job(&mut job, &requests, "target destroyed before upload");
                made_progress = true;
                continue;
            }

            let intermediate_raw = job
                .intermediate_handle
                .as_ref()
                .map(|h| h.raw())
                .unwrap_or(job.target_handle);
            let Some(native_texture) = target.texture(intermediate_raw) else {
                fail_job(&mut job, &requests, "intermediate texture missing at copy time");
                made_progress = true;
                continue;
            };

            let remaining = remaining_bytes(&job);
            let alloc = match staging.reserve(remaining, batch_id, false) {
                Ok(a) => a,
                // `reserve`'s own oversize path only ever reuses an
                // already-grown temporary buffer; growing the pool needs the
                // device handle, which only the transfer worker holds.
                Err(_) if remaining > staging.ring_size() => {
                    match staging.grow_temporary(device.as_ref(), remaining, batch_id) {
                        Ok(a) => a,
                        Err(_) => {
                            requests.enqueue_upload(job);
                            break;
                        }
                    }
                }
                Err(_) => {
                    requests.enqueue_upload(job);
                    break;
                }
            };

            let slot = &mut slots[slot_idx];
            if !job.layout_initialized {
                slot.transfer_list.pipeline_barrier(
                    native_texture.as_ref(),
                    MemoryBarrier {
                        old_layout: ResourceLayout::Undefined,
                        new_layout: ResourceLayout::TransferDst,
                        src_access_stage: ShaderStage::NONE,
                        dst_access_stage: ShaderStage::TRANSFER,
                        src_queue_family: queues.transfer,
                        dst_queue_family: queues.transfer,
                    },
                );
                job.layout_initialized = true;
            }

            let shape = job.shape;
            let copied = record_copies(
                slot.transfer_list.as_mut(),
                &staging,
                &shape,
                &mut job,
                native_texture.as_ref(),
                alloc.offset,
                alloc.size,
                alloc.is_temporary,
                alloc.temp_index,
            );
            bytes_this_batch += copied;
            if job.needs_mipmap_generation {
                slot.needs_mipmap = true;
            }
            slot.staging_ranges.push(StagingRange {
                offset: alloc.offset,
                size: alloc.size,
                is_temporary: alloc.is_temporary,
                temp_index: alloc.temp_index,
            });

            let _ = job.state.transition(State::Uploading);
            jobs_this_batch += 1;
            made_progress = true;
            slot.jobs.push(job);
        }

        let slot = &mut slots[slot_idx];
        if slot.jobs.is_empty() {
            slot.transfer_list.end().expect("failed to end empty transfer command list");
            continue;
        }

        if slot.needs_mipmap && cross_queue {
            for job in &slot.jobs {
                if !job.needs_mipmap_generation {
                    continue;
                }
                let raw = job.intermediate_handle.as_ref().map(|h| h.raw()).unwrap_or(job.target_handle);
                if let Some(texture) = target.texture(raw) {
                    slot.transfer_list.pipeline_barrier(
                        texture.as_ref(),
                        MemoryBarrier {
                            old_layout: ResourceLayout::TransferDst,
                            new_layout: ResourceLayout::TransferDst,
                            src_access_stage: ShaderStage::TRANSFER,
                            dst_access_stage: ShaderStage::NONE,
                            src_queue_family: queues.transfer,
                            dst_queue_family: queues.graphics,
                        },
                    );
                }
            }
        }

        slot.transfer_list.end().expect("failed to end transfer command list");
        // When the graphics submit below depends on this transfer (mipmap
        // generation needs the copies' writes visible), signal a semaphore
        // the graphics submit waits on. Single-queue-family batches skip the
        // semaphore and instead block on `transfer_fence` before recording
        // graphics work (see below) — a semaphore with no cross-queue wait
        // would just go unconsumed.
        let transfer_done_ref: &dyn Semaphore = slot.transfer_done.as_ref();
        let transfer_signals_storage = [transfer_done_ref];
        let transfer_signals: &[&dyn Semaphore] =
            if slot.needs_mipmap && cross_queue { &transfer_signals_storage } else { &[] };
        device
            .submit_commands(
                SubmitQueue::Transfer,
                slot.transfer_list.as_ref(),
                Some(slot.transfer_fence.as_ref()),
                &[],
                transfer_signals,
            )
            .expect("transfer submission failed");

        for range in &slot.staging_ranges {
            staging.mark_pages(range.offset, range.size, slot.batch_id);
        }

        if slot.needs_mipmap {
            if !cross_queue {
                // Same queue family: no semaphore hand-off, just make sure
                // the transfer writes landed before we record reads of them.
                slot.transfer_fence
                    .wait(u64::MAX)
                    .expect("waiting on transfer fence before same-queue mipmap generation failed");
            }
            slot.graphics_list.begin().expect("failed to begin graphics command list");
            for job in &slot.jobs {
                if !job.needs_mipmap_generation {
                    continue;
                }
                let raw = job.intermediate_handle.as_ref().map(|h| h.raw()).unwrap_or(job.target_handle);
                if let Some(texture) = target.texture(raw) {
                    // A barrier is required either way: cross-queue it's the
                    // acquire half of the ownership transfer, same-queue it
                    // collapses to a standard layout transition (spec.md:332).
                    let (src_family, dst_family) = if cross_queue {
                        (queues.transfer, queues.graphics)
                    } else {
                        (queues.graphics, queues.graphics)
                    };
                    slot.graphics_list.pipeline_barrier(
                        texture.as_ref(),
                        MemoryBarrier {
                            old_layout: ResourceLayout::TransferDst,
                            new_layout: ResourceLayout::TransferDst,
                            src_access_stage: if cross_queue { ShaderStage::NONE } else { ShaderStage::TRANSFER },
                            dst_access_stage: ShaderStage::GRAPHICS,
                            src_queue_family: src_family,
                            dst_queue_family: dst_family,
                        },
                    );
                    slot.graphics_list
                        .generate_mipmaps(texture.as_ref(), job.mip_count_provided.saturating_sub(1));
                }
            }
            slot.graphics_list.end().expect("failed to end graphics command list");
            let transfer_done_ref: &dyn Semaphore = slot.transfer_done.as_ref();
            let graphics_waits_storage = [transfer_done_ref];
            let graphics_waits: &[&dyn Semaphore] =
                if cross_queue { &graphics_waits_storage } else { &[] };
            device
                .submit_commands(
                    SubmitQueue::Graphics,
                    slot.graphics_list.as_ref(),
                    Some(slot.graphics_fence.as_ref()),
                    graphics_waits,
                    &[],
                )
                .expect("graphics submission failed");
        }

        slot.busy = true;
        metrics.batches_submitted.fetch_add(1, Ordering::Relaxed);
        metrics.bytes_uploaded_total.fetch_add(bytes_this_batch, Ordering::Relaxed);
        metrics.bytes_uploaded_this_frame.fetch_add(bytes_this_batch, Ordering::Relaxed);
        let elapsed_ns = started.elapsed().as_nanos() as u64;
        metrics.transfer_active_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
        trace!(target: "stream", "submitted batch {} ({} jobs, {} bytes)", slot.batch_id, jobs_this_batch, bytes_this_batch);
    }

    // Shutdown: whatever is still in-flight is dropped. The caller is
    // expected to have waited the device idle before this returns if it
    // cares about a clean release of the underlying native resources.
    for mut slot in slots {
        for range in slot.staging_ranges.drain(..) {
            if range.is_temporary {
                if let Some(idx) = range.temp_index {
                    staging.release_temporary(idx, slot.batch_id);
                }
            }
        }
        slot.jobs.clear();
    }
}

fn reclaim_completed(slots: &mut [BatchSlot], staging: &StagingRing, requests: &RequestManager) {
    for slot in slots.iter_mut() {
        if !slot.busy {
            continue;
        }
        let transfer_done = slot.transfer_fence.is_signaled().unwrap_or(false);
        if !transfer_done {
            continue;
        }
        if slot.needs_mipmap && !slot.graphics_fence.is_signaled().unwrap_or(false) {
            continue;
        }

        let _ = slot.transfer_fence.reset();
        if slot.needs_mipmap {
            let _ = slot.graphics_fence.reset();
        }

        for job in slot.jobs.drain(..) {
            route_completed_job(job, requests);
        }

        staging.notify_batch_complete(slot.batch_id);
        for range in slot.staging_ranges.drain(..) {
            if range.is_temporary {
                if let Some(idx) = range.temp_index {
                    staging.release_temporary(idx, slot.batch_id);
                }
            }
        }
        slot.busy = false;
        slot.needs_mipmap = false;
    }
}

fn route_completed_job(mut job: UploadRequest, requests: &RequestManager) {
    if job.is_failed() {
        requests.enqueue_finalization(FinalizedRequest {
            target_handle: job.target_handle,
            intermediate_handle: job.intermediate_handle.take(),
            success: false,
            failure_reason: job.failure_reason.clone(),
        });
        return;
    }
    if job.layout_finalized {
        let _ = job.state.transition(State::Transferred);
        let _ = job.state.transition(State::Finalizing);
        requests.enqueue_finalization(FinalizedRequest {
            target_handle: job.target_handle,
            intermediate_handle: job.intermediate_handle.take(),
            success: true,
            failure_reason: None,
        });
    } else {
        job.staging_ranges.clear();
        warn!(target: "stream", "request for {:?} only partially streamed this batch, re-queueing", job.target_handle);
        requests.enqueue_upload(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::ResourceKind;
    use crate::state_machine::Priority;
    use gpu_rhi::null::NullDevice;
    use gpu_rhi::{Extent3d, Format, TextureDescriptor};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct FakeTarget {
        textures: Mutex<HashMap<Handle, Arc<dyn gpu_rhi::Texture>>>,
    }

    impl TransferTarget for FakeTarget {
        fn is_live(&self, handle: Handle) -> bool {
            self.textures.lock().contains_key(&handle)
        }
        fn texture(&self, handle: Handle) -> Option<Arc<dyn gpu_rhi::Texture>> {
            self.textures.lock().get(&handle).cloned()
        }
    }

    fn upload_request(device: &dyn Device, target: &FakeTarget) -> (Handle, UploadRequest) {
        let handle = Handle::new(ResourceKind::Texture, 1, 0);
        let descriptor = TextureDescriptor {
            debug_name: "t".into(),
            extent: Extent3d::new(4, 4, 1),
            format: Format::Rgba8Unorm,
            mip_levels: 1,
            array_layers: 1,
            ..Default::default()
        };
        let texture: Arc<dyn gpu_rhi::Texture> = device.create_texture(&descriptor).unwrap().into();
        target.textures.lock().insert(handle, texture);

        let shape = TextureShape {
            ty: gpu_rhi::TextureType::Texture2D,
            extent: Extent3d::new(4, 4, 1),
            format: Format::Rgba8Unorm,
            mip_levels: 1,
            array_layers: 1,
        };
        let mut state = crate::state_machine::ResourceStateMachine::new();
        let _ = state.transition(State::Pending);
        let _ = state.transition(State::Loading);
        let _ = state.transition(State::Decoded);
        let req = UploadRequest {
            path: "t.png".into(),
            target_handle: handle,
            priority: Priority::Medium,
            shape,
            srgb: false,
            decoded_bytes: vec![7u8; 4 * 4 * 4],
            total_size: 4 * 4 * 4,
            mip_count_provided: 1,
            mip_levels_requested: 1,
            state,
            stream: crate::state_machine::StreamRequestState::new(0, StreamDirection::HighToLow, 1),
            layout_initialized: false,
            layout_finalized: false,
            needs_mipmap_generation: false,
            staging_ranges: Vec::new(),
            intermediate_handle: None,
            failure_reason: None,
        };
        (handle, req)
    }

    #[test]
    fn remaining_bytes_matches_total_size_before_any_copy() {
        let device = NullDevice::new();
        let target = FakeTarget {
            textures: Mutex::new(HashMap::new()),
        };
        let (_, req) = upload_request(&device, &target);
        assert_eq!(remaining_bytes(&req), req.total_size);
    }

    #[test]
    fn record_copies_drains_a_single_mip_request_in_one_call() {
        let device = NullDevice::new();
        let target = FakeTarget {
            textures: Mutex::new(HashMap::new()),
        };
        let (handle, mut req) = upload_request(&device, &target);
        let texture = target.texture(handle).unwrap();

        let pool = device
            .create_command_pool(&gpu_rhi::CommandPoolDescriptor {
                queue_family_index: 0,
                flags: gpu_rhi::CommandPoolFlags::RESET_COMMAND_BUFFER,
            })
            .unwrap();
        let mut list = device.create_command_list(pool.as_ref()).unwrap();
        list.begin().unwrap();

        let staging = StagingRing::new(&device, 1 << 16, 1024, 2).unwrap();
        let batch = staging.begin_batch();
        let total = req.total_size;
        let alloc = staging.reserve(total, batch, true).unwrap();

        let shape = req.shape;
        let copied = record_copies(
            list.as_mut(),
            &staging,
            &shape,
            &mut req,
            texture.as_ref(),
            alloc.offset,
            alloc.size,
            alloc.is_temporary,
            alloc.temp_index,
        );
        list.end().unwrap();

        assert_eq!(copied, total);
        assert!(req.layout_finalized);
        assert_eq!(remaining_bytes(&req), 0);
    }

    #[test]
    fn fail_job_transitions_to_failed_and_enqueues_finalization() {
        let device = NullDevice::new();
        let target = FakeTarget {
            textures: Mutex::new(HashMap::new()),
        };
        let (_, mut req) = upload_request(&device, &target);
        let requests = RequestManager::new();
        fail_job(&mut req, &requests, "gone");
        assert!(req.is_failed());
        let drained = requests.drain_finalization();
        assert_eq!(drained.len(), 1);
        assert!(!drained[0].success);
        assert_eq!(drained[0].failure_reason.as_deref(), Some("gone"));
    }
}
