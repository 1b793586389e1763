//! Refcounted wrapper around `(ResourceManager, Handle)` (the
//! "smart-handle"). Copying increments the slot's atomic refcount; dropping
//! decrements it, and the thread that observes the count reach zero
//! enqueues a destroy event rather than freeing anything itself — only the
//! render thread ever performs the structural free.

use std::sync::Arc;

use log::trace;

use crate::handle::Handle;
use crate::pool::RefDrop;
use crate::resource_manager::ResourceManager;

/// A strong reference to a pool slot. Cloning is lock-free and safe from
/// any thread; so is dropping. See module docs for where the "last
/// reference" work actually happens.
pub struct SmartHandle {
    manager: Arc<ResourceManager>,
    handle: Handle,
}

impl SmartHandle {
    /// Constructs a smart-handle over a slot whose refcount has already
    /// been set to the caller's intended starting count (normally 1, by
    /// `StablePool::emplace` immediately followed by one `incr_ref`). Used
    /// only by `ResourceManager::create_*`.
    pub(crate) fn new_owning(manager: Arc<ResourceManager>, handle: Handle) -> Self {
        manager.incr_ref(handle);
        Self { manager, handle }
    }

    pub fn raw(&self) -> Handle {
        self.handle
    }

    pub fn is_valid(&self) -> bool {
        self.manager.validate(self.handle)
    }
}

impl Clone for SmartHandle {
    fn clone(&self) -> Self {
        self.manager.incr_ref(self.handle);
        Self {
            manager: self.manager.clone(),
            handle: self.handle,
        }
    }
}

impl Drop for SmartHandle {
    fn drop(&mut self) {
        match self.manager.decr_ref(self.handle) {
            RefDrop::ReachedZero => {
                trace!(target: "stream", "last reference to {:?} dropped, enqueuing destroy", self.handle);
                self.manager.enqueue_destroy(self.handle);
            }
            RefDrop::StillAlive | RefDrop::Stale => {}
        }
    }
}

impl std::fmt::Debug for SmartHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SmartHandle").field(&self.handle).finish()
    }
}

impl PartialEq for SmartHandle {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for SmartHandle {}
