//! Queue routing between the three pipeline stages: the facade (render
//! thread), the I/O worker pool, and the dedicated GPU transfer thread.
//!
//! Everything here is plain routing — no decoding, no GPU calls. A pending
//! file read waits in `file_requests`; a decoded texture a render-thread
//! tick hasn't yet turned into a backed upload waits in `decoded_to_upload`;
//! a backed, ready-to-copy upload waits in `upload_high_priority` or
//! `upload_normal`; a finished (or abandoned) request waits in
//! `finalization` for the render thread to pick up.

use std::collections::VecDeque;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};

use crate::requests::{FinalizedRequest, LoadRequest, UploadRequest};
use crate::state_machine::Priority;

/// Bound on the decoded/upload/finalization channels. Generous relative to
/// `max_concurrent_file_loads` and `max_upload_jobs_per_frame` — these
/// queues exist to smooth out bursts, not to apply backpressure on their
/// own; the I/O worker pool and transfer worker already bound concurrency
/// upstream.
const CHANNEL_CAPACITY: usize = 4096;

pub struct RequestManager {
    file_requests: Mutex<VecDeque<LoadRequest>>,
    file_cv: Condvar,

    decoded_tx: Sender<UploadRequest>,
    decoded_rx: Receiver<UploadRequest>,

    upload_high_tx: Sender<UploadRequest>,
    upload_high_rx: Receiver<UploadRequest>,
    upload_normal_tx: Sender<UploadRequest>,
    upload_normal_rx: Receiver<UploadRequest>,
    upload_wake: Condvar,
    upload_wake_mutex: Mutex<()>,

    finalization_tx: Sender<FinalizedRequest>,
    finalization_rx: Receiver<FinalizedRequest>,
}

impl std::fmt::Debug for RequestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestManager")
            .field("file_requests_pending", &self.file_requests.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for RequestManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestManager {
    pub fn new() -> Self {
        let (decoded_tx, decoded_rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        let (upload_high_tx, upload_high_rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        let (upload_normal_tx, upload_normal_rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        let (finalization_tx, finalization_rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        Self {
            file_requests: Mutex::new(VecDeque::new()),
            file_cv: Condvar::new(),
            decoded_tx,
            decoded_rx,
            upload_high_tx,
            upload_high_rx,
            upload_normal_tx,
            upload_normal_rx,
            upload_wake: Condvar::new(),
            upload_wake_mutex: Mutex::new(()),
            finalization_tx,
            finalization_rx,
        }
    }

    // -- file_requests: facade (producer) -> I/O workers (consumers) ----

    pub fn enqueue_file_request(&self, req: LoadRequest) {
        let mut guard = self.file_requests.lock();
        let pos = guard.partition_point(|r| r.priority >= req.priority);
        guard.insert(pos, req);
        self.file_cv.notify_one();
    }

    /// Blocks an I/O worker thread up to `timeout` waiting for work.
    pub fn pop_file_request(&self, timeout: Duration) -> Option<LoadRequest> {
        let mut guard = self.file_requests.lock();
        if guard.is_empty() {
            self.file_cv.wait_for(&mut guard, timeout);
        }
        guard.pop_front()
    }

    pub fn pending_file_requests(&self) -> usize {
        self.file_requests.lock().len()
    }

    // -- decoded_to_upload: I/O workers (producers) -> render thread -----

    pub fn enqueue_decoded(&self, req: UploadRequest) {
        // The channel is only ever full under pathological backpressure;
        // blocking an I/O worker here is the right failure mode (it simply
        // stops pulling more file requests) rather than dropping decoded
        // work on the floor.
        let _ = self.decoded_tx.send(req);
    }

    /// Non-blocking drain, used by the facade's per-frame render-thread
    /// tick to pick up everything an I/O worker finished decoding since the
    /// last frame.
    pub fn try_recv_decoded(&self) -> Option<UploadRequest> {
        match self.decoded_rx.try_recv() {
            Ok(req) => Some(req),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    // -- upload_high_priority / upload_normal: render thread (producer)
    //    -> transfer worker (consumer) --------------------------------

    pub fn enqueue_upload(&self, req: UploadRequest) {
        let tx = if req.priority.is_high_priority() {
            &self.upload_high_tx
        } else {
            &self.upload_normal_tx
        };
        let _ = tx.send(req);
        let _guard = self.upload_wake_mutex.lock();
        self.upload_wake.notify_all();
    }

    /// Non-blocking; high-priority queue drains first.
    pub fn next_upload(&self) -> Option<UploadRequest> {
        if let Ok(req) = self.upload_high_rx.try_recv() {
            return Some(req);
        }
        match self.upload_normal_rx.try_recv() {
            Ok(req) => Some(req),
            Err(_) => None,
        }
    }

    /// Parks the transfer worker until an upload is enqueued or `timeout`
    /// elapses, whichever comes first. Spurious wakeups are fine — callers
    /// always re-poll `next_upload` afterward.
    pub fn wait_for_upload(&self, timeout: Duration) {
        let mut guard = self.upload_wake_mutex.lock();
        self.upload_wake.wait_for(&mut guard, timeout);
    }

    // -- finalization: transfer worker / I/O workers (producers)
    //    -> render thread (consumer) ------------------------------------

    pub fn enqueue_finalization(&self, req: FinalizedRequest) {
        let _ = self.finalization_tx.send(req);
    }

    /// Drains every outcome queued since the last call. Called once per
    /// frame by the facade's render-thread tick, ahead of
    /// `ResourceManager::process_destroy_events`.
    pub fn drain_finalization(&self) -> Vec<FinalizedRequest> {
        self.finalization_rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Handle, ResourceKind};

    fn load_request(priority: Priority) -> LoadRequest {
        LoadRequest {
            path: "tex.png".into(),
            target_handle: Handle::invalid(ResourceKind::Texture),
            srgb: true,
            priority,
            base_mip: 0,
            enqueue_timestamp: 0,
        }
    }

    #[test]
    fn file_requests_drain_highest_priority_first() {
        let mgr = RequestManager::new();
        mgr.enqueue_file_request(load_request(Priority::Low));
        mgr.enqueue_file_request(load_request(Priority::Immediate));
        mgr.enqueue_file_request(load_request(Priority::Medium));

        let first = mgr.pop_file_request(Duration::from_millis(1)).unwrap();
        assert_eq!(first.priority, Priority::Immediate);
        let second = mgr.pop_file_request(Duration::from_millis(1)).unwrap();
        assert_eq!(second.priority, Priority::Medium);
        let third = mgr.pop_file_request(Duration::from_millis(1)).unwrap();
        assert_eq!(third.priority, Priority::Low);
        assert!(mgr.pop_file_request(Duration::from_millis(1)).is_none());
    }

    #[test]
    fn upload_high_priority_drains_before_normal() {
        let mgr = RequestManager::new();
        let normal = UploadRequest::failed("a.png".into(), Handle::invalid(ResourceKind::Texture), Priority::Low, "x".into());
        let high = UploadRequest::failed("b.png".into(), Handle::invalid(ResourceKind::Texture), Priority::Immediate, "x".into());
        mgr.enqueue_upload(normal);
        mgr.enqueue_upload(high);
        let first = mgr.next_upload().unwrap();
        assert_eq!(first.path, "b.png");
        let second = mgr.next_upload().unwrap();
        assert_eq!(second.path, "a.png");
        assert!(mgr.next_upload().is_none());
    }

    #[test]
    fn finalization_drain_collects_everything_pending() {
        let mgr = RequestManager::new();
        for i in 0..3 {
            mgr.enqueue_finalization(FinalizedRequest {
                target_handle: Handle::invalid(ResourceKind::Texture),
                intermediate_handle: None,
                success: i % 2 == 0,
                failure_reason: None,
            });
        }
        let drained = mgr.drain_finalization();
        assert_eq!(drained.len(), 3);
        assert!(mgr.drain_finalization().is_empty());
    }
}
