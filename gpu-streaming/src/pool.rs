//! The generational, chunked stable pool allocator.
//!
//! Structural mutation (`emplace`/`retire`/`free_slot`/`for_each`) is
//! exclusive to whichever thread constructs the pool — enforced with a
//! debug-time identity check, not a runtime lock, since the cost of
//! serializing every render-thread call behind a mutex would defeat the
//! point of a lock-free reader path. `validate`/`get`/`incr_ref`/`decr_ref`
//! are wait-free and safe from any thread.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU16, AtomicU32, AtomicU8, Ordering};
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::handle::{Handle, ResourceKind, GENERATION_MASK};

const CHUNK_SIZE: usize = 1024;
const MAX_CHUNKS: usize = 1024;

const STATE_FREE: u8 = 0;
const STATE_ALIVE: u8 = 1;
const STATE_RETIRED: u8 = 2;

struct SlotInner<T> {
    state: AtomicU8,
    generation: AtomicU16,
    refcount: AtomicU32,
    payload: UnsafeCell<MaybeUninit<T>>,
}

impl<T> SlotInner<T> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_FREE),
            generation: AtomicU16::new(0),
            refcount: AtomicU32::new(0),
            payload: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

struct Chunk<T> {
    slots: Box<[SlotInner<T>]>,
}

impl<T> Chunk<T> {
    fn new() -> Self {
        let slots = (0..CHUNK_SIZE).map(|_| SlotInner::new()).collect();
        Self { slots }
    }
}

// SAFETY: a slot's payload is only ever read or written while its state is
// `Alive`, and all state/generation transitions happen under the pool's
// single-writer discipline plus acquire/release ordering around them.
unsafe impl<T: Send> Sync for Chunk<T> {}

/// Outcome of a smart-handle's refcount decrement, telling the caller
/// whether it owns the "last reference" event.
#[derive(Debug, PartialEq, Eq)]
pub enum RefDrop {
    /// Other strong references remain.
    StillAlive,
    /// This was the last strong reference; the caller must enqueue a
    /// destroy event. The dropper never frees the slot itself.
    ReachedZero,
    /// The slot's generation moved on since this handle was minted (it was
    /// already freed and possibly reincarnated); no action is correct here.
    Stale,
}

/// Chunked, pointer-stable slot allocator with 12-bit generation tags and
/// atomic refcounts. See module docs for the single-writer/many-reader
/// concurrency split.
pub struct StablePool<T> {
    chunks: Vec<AtomicPtr<Chunk<T>>>,
    next_index: AtomicU32,
    free_list: Mutex<Vec<u32>>,
    owner: ThreadId,
    kind: ResourceKind,
}

impl<T> StablePool<T> {
    /// Constructs a pool owned by the calling thread; every structural
    /// mutation must happen on this same thread for the lifetime of the
    /// pool (debug-asserted, not enforced in release builds).
    pub fn new(kind: ResourceKind) -> Self {
        let chunks = (0..MAX_CHUNKS).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        Self {
            chunks,
            next_index: AtomicU32::new(0),
            free_list: Mutex::new(Vec::new()),
            owner: std::thread::current().id(),
            kind,
        }
    }

    fn assert_owner_thread(&self) {
        debug_assert_eq!(
            std::thread::current().id(),
            self.owner,
            "structural StablePool<{:?}> mutation attempted off its owning thread",
            self.kind,
        );
    }

    fn chunk_and_local(index: u32) -> (usize, usize) {
        (index as usize / CHUNK_SIZE, index as usize % CHUNK_SIZE)
    }

    fn get_chunk(&self, chunk_idx: usize) -> Option<&Chunk<T>> {
        let atomic = self.chunks.get(chunk_idx)?;
        let p = atomic.load(Ordering::Acquire);
        if p.is_null() {
            None
        } else {
            Some(unsafe { &*p })
        }
    }

    /// Allocates (if necessary) and publishes the chunk at `chunk_idx`.
    /// Render-thread only: no CAS race is possible because only the single
    /// owning thread ever calls this.
    fn ensure_chunk(&self, chunk_idx: usize) -> &Chunk<T> {
        let atomic = &self.chunks[chunk_idx];
        let existing = atomic.load(Ordering::Acquire);
        if !existing.is_null() {
            return unsafe { &*existing };
        }
        let new_chunk = Box::into_raw(Box::new(Chunk::new()));
        atomic.store(new_chunk, Ordering::Release);
        unsafe { &*new_chunk }
    }

    fn slot(&self, index: u32) -> Option<&SlotInner<T>> {
        let (c, l) = Self::chunk_and_local(index);
        self.get_chunk(c).map(|chunk| &chunk.slots[l])
    }

    /// Render-thread only. Constructs `value` in a free slot and transitions
    /// it `Free -> Alive`, returning a fresh handle tagged with the slot's
    /// current generation.
    pub fn emplace(&self, value: T) -> Handle {
        self.assert_owner_thread();
        let index = {
            let mut free_list = self.free_list.lock();
            match free_list.pop() {
                Some(idx) => idx,
                None => {
                    drop(free_list);
                    self.next_index.fetch_add(1, Ordering::Relaxed)
                }
            }
        };
        let (chunk_idx, local) = Self::chunk_and_local(index);
        let chunk = self.ensure_chunk(chunk_idx);
        let slot = &chunk.slots[local];
        debug_assert_eq!(slot.state.load(Ordering::Relaxed), STATE_FREE);
        unsafe {
            (*slot.payload.get()).write(value);
        }
        slot.refcount.store(0, Ordering::Relaxed);
        slot.state.store(STATE_ALIVE, Ordering::Release);
        let generation = slot.generation.load(Ordering::Acquire);
        Handle::new(self.kind, index, generation)
    }

    /// Render-thread only. Transitions `Alive -> Retired` if `h`'s
    /// generation still matches. Must only be called once the refcount has
    /// demonstrably reached zero (i.e. after a `ReachedZero` destroy
    /// event).
    pub fn retire(&self, h: Handle) -> bool {
        self.assert_owner_thread();
        let Some(slot) = self.slot(h.index) else {
            return false;
        };
        if slot.state.load(Ordering::Acquire) != STATE_ALIVE {
            return false;
        }
        if slot.generation.load(Ordering::Acquire) != h.generation {
            return false;
        }
        slot.state.store(STATE_RETIRED, Ordering::Release);
        true
    }

    /// Render-thread only. Destroys the payload, bumps the generation
    /// (mod 4096), and transitions `Retired -> Free`, returning the moved
    /// payload so the caller can steal its native resource into the
    /// deferred-destruction ring before dropping the rest.
    pub fn free_slot(&self, index: u32) -> Option<T> {
        self.assert_owner_thread();
        let slot = self.slot(index)?;
        debug_assert_eq!(slot.state.load(Ordering::Acquire), STATE_RETIRED);
        let value = unsafe { (*slot.payload.get()).assume_init_read() };
        let next_gen = (slot.generation.load(Ordering::Relaxed).wrapping_add(1)) & GENERATION_MASK;
        slot.generation.store(next_gen, Ordering::Release);
        slot.state.store(STATE_FREE, Ordering::Release);
        self.free_list.lock().push(index);
        Some(value)
    }

    /// Any thread, wait-free. `true` iff the slot is `Alive` and its
    /// generation matches `h`'s.
    pub fn validate(&self, h: Handle) -> bool {
        let Some(slot) = self.slot(h.index) else {
            return false;
        };
        slot.state.load(Ordering::Acquire) == STATE_ALIVE
            && slot.generation.load(Ordering::Acquire) == h.generation
    }

    /// Any thread, wait-free observe.
    pub fn get(&self, h: Handle) -> Option<&T> {
        let slot = self.slot(h.index)?;
        if slot.state.load(Ordering::Acquire) != STATE_ALIVE {
            return None;
        }
        if slot.generation.load(Ordering::Acquire) != h.generation {
            return None;
        }
        Some(unsafe { (*slot.payload.get()).assume_init_ref() })
    }

    /// Render-thread only. Visits every `Alive` slot in index order.
    pub fn for_each(&self, mut f: impl FnMut(Handle, &T)) {
        self.assert_owner_thread();
        let total = self.next_index.load(Ordering::Acquire);
        for index in 0..total {
            if let Some(slot) = self.slot(index) {
                if slot.state.load(Ordering::Acquire) == STATE_ALIVE {
                    let generation = slot.generation.load(Ordering::Acquire);
                    let value = unsafe { (*slot.payload.get()).assume_init_ref() };
                    f(Handle::new(self.kind, index, generation), value);
                }
            }
        }
    }

    /// Any thread. Used by `SmartHandle::clone`.
    pub fn incr_ref(&self, h: Handle) -> bool {
        let Some(slot) = self.slot(h.index) else {
            return false;
        };
        if slot.generation.load(Ordering::Acquire) != h.generation {
            return false;
        }
        slot.refcount.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Any thread. Used by `SmartHandle::drop`. If the slot's generation
    /// moved on underneath the caller, the decrement is skipped entirely
    /// (it would otherwise release a reincarnated slot).
    pub fn decr_ref(&self, h: Handle) -> RefDrop {
        let Some(slot) = self.slot(h.index) else {
            return RefDrop::Stale;
        };
        if slot.generation.load(Ordering::Acquire) != h.generation {
            return RefDrop::Stale;
        }
        let prev = slot.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "StablePool refcount underflow");
        if prev == 1 {
            RefDrop::ReachedZero
        } else {
            RefDrop::StillAlive
        }
    }

    /// Any thread. Used by leak diagnostics and tests; not part of the
    /// structural single-writer contract since it only observes.
    pub fn refcount(&self, h: Handle) -> Option<u32> {
        let slot = self.slot(h.index)?;
        if slot.generation.load(Ordering::Acquire) != h.generation {
            return None;
        }
        Some(slot.refcount.load(Ordering::Acquire))
    }

    /// Render-thread only. Overwrites the payload of an `Alive` slot in
    /// place, preserving its handle (index *and* generation) so external
    /// holders never see the swap. Returns the old payload so the caller
    /// can move it into deferred destruction. Unlike `free_slot`, this does
    /// not bump the generation — the slot never transitions out of
    /// `Alive`. Used by `resource_manager::replace_texture` (a loading
    /// proxy and its final replacement share one handle).
    ///
    /// Payload reads via `get` are not synchronized against this call
    /// beyond the state/generation check; callers that read pool payloads
    /// concurrently with a replace on another thread must provide their
    /// own ordering (in practice, content reads and `replace_payload` both
    /// happen on the render thread, unlike `validate`/`incr_ref`/`decr_ref`
    /// which are the genuinely any-thread operations).
    pub fn replace_payload(&self, h: Handle, new_value: T) -> Option<T> {
        self.assert_owner_thread();
        let slot = self.slot(h.index)?;
        if slot.state.load(Ordering::Acquire) != STATE_ALIVE || slot.generation.load(Ordering::Acquire) != h.generation {
            return None;
        }
        let old = unsafe { (*slot.payload.get()).assume_init_read() };
        unsafe {
            (*slot.payload.get()).write(new_value);
        }
        Some(old)
    }
}

impl<T> Drop for StablePool<T> {
    fn drop(&mut self) {
        for atomic in &self.chunks {
            let p = atomic.load(Ordering::Acquire);
            if p.is_null() {
                continue;
            }
            let chunk = unsafe { Box::from_raw(p) };
            for slot in chunk.slots.iter() {
                if slot.state.load(Ordering::Acquire) == STATE_ALIVE {
                    unsafe {
                        ptr::drop_in_place((*slot.payload.get()).as_mut_ptr());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn replace_payload_preserves_handle_identity() {
        let pool = StablePool::<u32>::new(ResourceKind::Texture);
        let h = pool.emplace(1);
        let old = pool.replace_payload(h, 2).unwrap();
        assert_eq!(old, 1);
        assert!(pool.validate(h));
        assert_eq!(*pool.get(h).unwrap(), 2);
    }

    #[test]
    fn stale_handle_never_validates_after_free() {
        let pool = StablePool::<u32>::new(ResourceKind::Texture);
        let h = pool.emplace(42);
        assert!(pool.validate(h));
        assert!(pool.retire(h));
        let value = pool.free_slot(h.index).unwrap();
        assert_eq!(value, 42);
        assert!(!pool.validate(h));
        assert!(pool.get(h).is_none());
    }

    #[test]
    fn generation_rolls_over_and_keeps_invalidating_stale_handles() {
        let pool = StablePool::<u32>::new(ResourceKind::Buffer);
        let mut last = None;
        for i in 0..4000u32 {
            let h = pool.emplace(i);
            assert!(pool.retire(h));
            pool.free_slot(h.index);
            if let Some(prev) = last {
                assert!(!pool.validate(prev));
            }
            last = Some(h);
        }
    }

    #[test]
    fn concurrent_refcount_copy_drop_converges() {
        let pool = Arc::new(StablePool::<u32>::new(ResourceKind::Mesh));
        let h = pool.emplace(7);
        pool.incr_ref(h); // refcount now 1 representing the first outstanding strong ref

        let destroy_events = Arc::new(AtomicUsize::new(0));
        let threads = 8;
        let iters = 2000;
        let mut handles = Vec::new();
        for _ in 0..threads {
            let pool = pool.clone();
            let destroy_events = destroy_events.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..iters {
                    pool.incr_ref(h);
                    match pool.decr_ref(h) {
                        RefDrop::ReachedZero => {
                            destroy_events.fetch_add(1, Ordering::SeqCst);
                        }
                        RefDrop::StillAlive | RefDrop::Stale => {}
                    }
                }
            }));
        }
        for t in handles {
            t.join().unwrap();
        }
        // The single outstanding strong ref from the main thread is still
        // held, so refcount must have returned to exactly 1 and no destroy
        // event should ever have fired.
        assert_eq!(pool.refcount(h), Some(1));
        assert_eq!(destroy_events.load(Ordering::SeqCst), 0);
    }
}
