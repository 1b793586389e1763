//! The staging ring allocator: a large persistently-mapped device-visible
//! buffer divided into fixed-size pages, handed out in batch-tagged byte
//! ranges, with condvar-driven reclamation and a bounded fallback pool of
//! temporary buffers for oversize requests.

use std::sync::atomic::{AtomicU64, Ordering};

use gpu_rhi::{BufferDescriptor, BufferUsage, Device, MemoryUsage};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::{StreamError, StreamResult};

const ALIGNMENT: u64 = 16;

struct Page {
    last_batch_id: u64,
}

/// One reserved byte range, either inside the ring or a standalone
/// temporary buffer for oversize requests.
pub struct Allocation {
    pub is_temporary: bool,
    pub offset: u64,
    pub size: u64,
    pub batch_id: u64,
    /// Index into the temporary buffer pool, set only when `is_temporary`.
    pub temp_index: Option<usize>,
}

struct RingState {
    head: u64,
    pages: Vec<Page>,
}

/// A single device-visible buffer on loan from the bounded temporary pool,
/// sized exactly for one oversize request.
struct TemporaryBuffer {
    buffer: Box<dyn gpu_rhi::Buffer>,
    size: u64,
    in_use: bool,
    freed_at_batch: Option<u64>,
}

pub struct StagingRing {
    ring_size: u64,
    page_size: u64,
    buffer: Box<dyn gpu_rhi::Buffer>,
    state: Mutex<RingState>,
    reclaim_cv: Condvar,
    next_batch_id: AtomicU64,
    completed_batch_id: AtomicU64,
    temporaries: Mutex<Vec<TemporaryBuffer>>,
    max_temporaries: usize,
}

impl std::fmt::Debug for StagingRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingRing")
            .field("ring_size", &self.ring_size)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl StagingRing {
    pub fn new(
        device: &dyn Device,
        ring_size: u64,
        page_size: u64,
        max_temporaries: usize,
    ) -> StreamResult<Self> {
        let page_count = ring_size.div_ceil(page_size);
        let buffer = device.create_buffer(&BufferDescriptor {
            debug_name: "staging_ring".to_string(),
            size: ring_size,
            usage: BufferUsage::TRANSFER_SRC,
            memory_usage: MemoryUsage::CpuToGpu,
        })?;
        let pages = (0..page_count).map(|_| Page { last_batch_id: 0 }).collect();
        Ok(Self {
            ring_size,
            page_size,
            buffer,
            state: Mutex::new(RingState { head: 0, pages }),
            reclaim_cv: Condvar::new(),
            next_batch_id: AtomicU64::new(1),
            completed_batch_id: AtomicU64::new(0),
            temporaries: Mutex::new(Vec::new()),
            max_temporaries,
        })
    }

    pub fn begin_batch(&self) -> u64 {
        self.next_batch_id.fetch_add(1, Ordering::AcqRel)
    }

    pub fn completed_batch_id(&self) -> u64 {
        self.completed_batch_id.load(Ordering::Acquire)
    }

    fn page_range(&self, offset: u64, size: u64) -> std::ops::Range<usize> {
        let first = (offset / self.page_size) as usize;
        let last = ((offset + size - 1) / self.page_size) as usize;
        first..(last + 1)
    }

    /// Reserves `size` bytes tagged with `batch_id`. Oversize requests
    /// (`size > ring_size`) bypass the ring entirely via a temporary
    /// buffer. Otherwise blocks (bounded by the caller's willingness to
    /// wait — this crate's transfer worker always passes `wait = true`)
    /// until the pages this allocation would occupy have all completed a
    /// batch at or before `completed_batch_id`.
    pub fn reserve(&self, size: u64, batch_id: u64, wait: bool) -> StreamResult<Allocation> {
        if size > self.ring_size {
            return self.allocate_temporary(size, batch_id);
        }
        let mut guard = self.state.lock();
        loop {
            let aligned_head = guard.head.div_ceil(ALIGNMENT) * ALIGNMENT;
            let (offset, wraps) = if aligned_head + size <= self.ring_size {
                (aligned_head, false)
            } else {
                (0, true)
            };
            let range = self.page_range(offset, size);
            let completed = self.completed_batch_id.load(Ordering::Acquire);
            let all_free = range.clone().all(|i| guard.pages[i].last_batch_id <= completed);
            if all_free {
                guard.head = offset + size;
                drop(guard);
                debug!(target: "stream", "staging reserve batch={batch_id} offset={offset} size={size} wrapped={wraps}");
                return Ok(Allocation {
                    is_temporary: false,
                    offset,
                    size,
                    batch_id,
                    temp_index: None,
                });
            }
            if !wait {
                return Err(StreamError::StagingUnavailable);
            }
            self.reclaim_cv.wait_for(&mut guard, std::time::Duration::from_millis(10));
        }
    }

    /// Stamps every page covered by `[offset, offset + size)` with
    /// `batch_id`, once the command buffer recording has incorporated the
    /// range. Pages are not reclaimed until `notify_batch_complete(batch_id)`.
    pub fn mark_pages(&self, offset: u64, size: u64, batch_id: u64) {
        let mut guard = self.state.lock();
        for i in self.page_range(offset, size) {
            guard.pages[i].last_batch_id = batch_id;
        }
    }

    /// Advances `completed_batch_id` to at least `batch_id` and wakes every
    /// thread blocked in `reserve`.
    pub fn notify_batch_complete(&self, batch_id: u64) {
        self.completed_batch_id.fetch_max(batch_id, Ordering::AcqRel);
        self.reclaim_cv.notify_all();
    }

    pub fn mapped_base(&self) -> Option<*mut u8> {
        self.buffer.mapped_ptr()
    }

    pub fn ring_size(&self) -> u64 {
        self.ring_size
    }

    /// The underlying ring buffer, for `copy_buffer_to_texture` calls that
    /// read from a non-temporary allocation.
    pub fn ring_buffer(&self) -> &dyn gpu_rhi::Buffer {
        self.buffer.as_ref()
    }

    /// Runs `f` with a reference to the temporary buffer at `index`, while
    /// holding the pool lock just long enough to hand out the reference.
    pub fn with_temporary_buffer<R>(&self, index: usize, f: impl FnOnce(&dyn gpu_rhi::Buffer) -> R) -> Option<R> {
        let pool = self.temporaries.lock();
        pool.get(index).map(|t| f(t.buffer.as_ref()))
    }

    fn allocate_temporary(&self, size: u64, batch_id: u64) -> StreamResult<Allocation> {
        let mut pool = self.temporaries.lock();
        if let Some((idx, slot)) = pool
            .iter_mut()
            .enumerate()
            .find(|(_, t)| !t.in_use && t.size >= size)
        {
            slot.in_use = true;
            slot.freed_at_batch = None;
            return Ok(Allocation {
                is_temporary: true,
                offset: 0,
                size,
                batch_id,
                temp_index: Some(idx),
            });
        }
        if pool.len() >= self.max_temporaries {
            warn!(target: "stream", "temporary staging pool exhausted ({} in use)", pool.len());
            return Err(StreamError::StagingUnavailable);
        }
        // device is not stored on the ring (only needed at construction),
        // so callers that hit this path go through `grow_temporary` on the
        // transfer worker side, which owns the device handle.
        Err(StreamError::StagingUnavailable)
    }

    /// Called by the transfer worker (which holds the device) when
    /// `allocate_temporary` found no existing slot big enough and the pool
    /// has room to grow.
    pub fn grow_temporary(&self, device: &dyn Device, size: u64, batch_id: u64) -> StreamResult<Allocation> {
        let mut pool = self.temporaries.lock();
        if pool.len() >= self.max_temporaries {
            return Err(StreamError::StagingUnavailable);
        }
        let buffer = device.create_buffer(&BufferDescriptor {
            debug_name: format!("staging_temp_{}", pool.len()),
            size,
            usage: BufferUsage::TRANSFER_SRC,
            memory_usage: MemoryUsage::CpuToGpu,
        })?;
        let idx = pool.len();
        pool.push(TemporaryBuffer {
            buffer,
            size,
            in_use: true,
            freed_at_batch: None,
        });
        Ok(Allocation {
            is_temporary: true,
            offset: 0,
            size,
            batch_id,
            temp_index: Some(idx),
        })
    }

    pub fn temporary_mapped_ptr(&self, index: usize) -> Option<*mut u8> {
        self.temporaries.lock()[index].buffer.mapped_ptr()
    }

    /// Releases a temporary buffer back to the pool. Must only be called
    /// after the owning batch has completed.
    pub fn release_temporary(&self, index: usize, batch_id: u64) {
        let completed = self.completed_batch_id.load(Ordering::Acquire);
        if completed < batch_id {
            warn!(target: "stream", "release_temporary called before batch {batch_id} completed (completed={completed})");
        }
        let mut pool = self.temporaries.lock();
        if let Some(slot) = pool.get_mut(index) {
            slot.in_use = false;
            slot.freed_at_batch = Some(batch_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_rhi::null::NullDevice;

    fn ring(ring_size: u64, page_size: u64) -> StagingRing {
        let device = NullDevice::new();
        StagingRing::new(&device, ring_size, page_size, 4).unwrap()
    }

    #[test]
    fn reserve_then_complete_allows_reuse() {
        let ring = ring(4096, 1024);
        let batch = ring.begin_batch();
        let alloc = ring.reserve(1024, batch, true).unwrap();
        assert!(!alloc.is_temporary);
        ring.mark_pages(alloc.offset, alloc.size, batch);
        ring.notify_batch_complete(batch);
        assert_eq!(ring.completed_batch_id(), batch);
    }

    #[test]
    fn oversize_request_does_not_touch_the_ring() {
        let ring = ring(1024, 256);
        let batch = ring.begin_batch();
        let err = ring.reserve(4096, batch, true).unwrap_err();
        assert!(matches!(err, StreamError::StagingUnavailable));
        let grown = ring.grow_temporary(&NullDevice::new(), 4096, batch).unwrap();
        assert!(grown.is_temporary);
    }

    #[test]
    fn page_not_reused_until_batch_completes() {
        let ring = ring(2048, 1024);
        let b1 = ring.begin_batch();
        let a1 = ring.reserve(1024, b1, true).unwrap();
        ring.mark_pages(a1.offset, a1.size, b1);

        // A second batch wanting the same page must not observe it free
        // until b1 completes.
        let b2 = ring.begin_batch();
        let before = ring.reserve(1024, b2, true);
        // head has advanced past page 0, so this actually lands on page 1,
        // which is still unused — demonstrates non-overlap, not blocking.
        assert!(before.is_ok());
        ring.notify_batch_complete(b1);
        assert!(ring.completed_batch_id() >= b1);
    }
}
