//! The async I/O worker pool: a bounded set of OS threads that pull
//! [`LoadRequest`]s off [`RequestManager::pop_file_request`], hand each to an
//! injected decoder, and push the result onto `decoded_to_upload` (or
//! straight to `finalization` on failure).
//!
//! Decoding itself (image/KTX2 parsing, BCn transcode, mip generation from
//! source assets) is external to this crate; callers supply a
//! [`TextureDecoder`] implementation. This mirrors how pipeline/shader
//! construction is kept out of `ResourceManager` — the boundary here is
//! "bytes in, typed GPU upload payload out."

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, warn};

use crate::request_manager::RequestManager;
use crate::requests::{FinalizedRequest, LoadRequest, TextureShape, UploadRequest};
use crate::state_machine::{ResourceStateMachine, State, StreamDirection, StreamRequestState};

/// One fully decoded texture, ready to be handed to the render thread for
/// intermediate-texture creation. `mip_count_provided` may be less than
/// `shape.mip_levels` (the decoder supplied only the base mip, or a partial
/// ladder); the transfer worker generates the rest on the GPU.
#[derive(Clone, Debug)]
pub struct DecodedTexture {
    pub shape: TextureShape,
    pub bytes: Vec<u8>,
    pub mip_count_provided: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("decode failed for `{path}`: {reason}")]
pub struct DecodeError {
    pub path: String,
    pub reason: String,
}

/// Implemented by the embedding application. `decode` runs on an I/O worker
/// thread and may block on file I/O; it must not touch the GPU.
pub trait TextureDecoder: Send + Sync {
    fn decode(&self, path: &str) -> Result<DecodedTexture, DecodeError>;
}

fn build_upload(req: LoadRequest, decoded: DecodedTexture) -> UploadRequest {
    let format = decoded.shape.format.with_srgb(req.srgb);
    let shape = TextureShape {
        format,
        ..decoded.shape
    };
    let total_size = decoded.bytes.len() as u64;
    // The decoder hands back the whole payload at once (no progressive
    // low-res-first delivery in this crate's scope), so the stream always
    // walks from the highest provided mip down.
    let direction = StreamDirection::HighToLow;
    let mut state = ResourceStateMachine::new();
    let _ = state.transition(State::Pending);
    let _ = state.transition(State::Loading);
    let _ = state.transition(State::Decoded);
    UploadRequest {
        path: req.path,
        target_handle: req.target_handle,
        priority: req.priority,
        shape,
        srgb: req.srgb,
        decoded_bytes: decoded.bytes,
        total_size,
        mip_count_provided: decoded.mip_count_provided,
        mip_levels_requested: shape.mip_levels,
        state,
        stream: StreamRequestState::new(req.base_mip, direction, decoded.mip_count_provided.max(1)),
        layout_initialized: false,
        layout_finalized: false,
        needs_mipmap_generation: false,
        staging_ranges: Vec::new(),
        intermediate_handle: None,
        failure_reason: None,
    }
}

fn process_one(decoder: &dyn TextureDecoder, req: LoadRequest) -> Result<UploadRequest, UploadRequest> {
    let path = req.path.clone();
    let target_handle = req.target_handle;
    let priority = req.priority;
    let outcome = catch_unwind(AssertUnwindSafe(|| decoder.decode(&path)));
    match outcome {
        Ok(Ok(decoded)) => Ok(build_upload(req, decoded)),
        Ok(Err(e)) => {
            warn!(target: "stream", "decode failed for `{path}`: {}", e.reason);
            Err(UploadRequest::failed(path, target_handle, priority, e.reason))
        }
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "decoder panicked".to_string());
            error!(target: "stream", "decoder panicked decoding `{path}`: {msg}");
            Err(UploadRequest::failed(path, target_handle, priority, format!("panic: {msg}")))
        }
    }
}

/// Owns the pool's worker threads. Dropping without calling [`Self::shutdown`]
/// leaves the threads running (they hold their own `Arc`s); always call
/// `shutdown` during an orderly teardown.
pub struct IoWorkerPool {
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for IoWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoWorkerPool").field("worker_count", &self.threads.len()).finish()
    }
}

impl IoWorkerPool {
    pub fn new(worker_count: u32, requests: Arc<RequestManager>, decoder: Arc<dyn TextureDecoder>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let threads = (0..worker_count.max(1))
            .map(|i| {
                let running = running.clone();
                let requests = requests.clone();
                let decoder = decoder.clone();
                thread::Builder::new()
                    .name(format!("io-worker-{i}"))
                    .spawn(move || Self::run(running, requests, decoder))
                    .expect("failed to spawn I/O worker thread")
            })
            .collect();
        Self { running, threads }
    }

    fn run(running: Arc<AtomicBool>, requests: Arc<RequestManager>, decoder: Arc<dyn TextureDecoder>) {
        while running.load(Ordering::Acquire) {
            let Some(req) = requests.pop_file_request(Duration::from_millis(50)) else {
                continue;
            };
            match process_one(decoder.as_ref(), req) {
                Ok(upload) => requests.enqueue_decoded(upload),
                Err(failed) => requests.enqueue_finalization(FinalizedRequest {
                    target_handle: failed.target_handle,
                    intermediate_handle: None,
                    success: false,
                    failure_reason: failed.failure_reason,
                }),
            }
        }
    }

    /// Signals every worker to stop after its current task and joins them.
    /// Any file request still sitting in `file_requests` is left for the
    /// caller to decide what to do with (the queue itself is unaffected).
    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::Release);
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Handle, ResourceKind};
    use gpu_rhi::{Extent3d, Format, TextureType};
    use std::sync::atomic::AtomicUsize;

    struct FixedDecoder {
        calls: AtomicUsize,
        fail_path: Option<String>,
    }

    impl TextureDecoder for FixedDecoder {
        fn decode(&self, path: &str) -> Result<DecodedTexture, DecodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_path.as_deref() == Some(path) {
                return Err(DecodeError {
                    path: path.to_string(),
                    reason: "not found".into(),
                });
            }
            Ok(DecodedTexture {
                shape: TextureShape {
                    ty: TextureType::Texture2D,
                    extent: Extent3d::new(4, 4, 1),
                    format: Format::Rgba8Unorm,
                    mip_levels: 1,
                    array_layers: 1,
                },
                bytes: vec![0u8; 4 * 4 * 4],
                mip_count_provided: 1,
            })
        }
    }

    #[test]
    fn successful_decode_lands_on_decoded_queue() {
        let requests = Arc::new(RequestManager::new());
        let decoder: Arc<dyn TextureDecoder> = Arc::new(FixedDecoder {
            calls: AtomicUsize::new(0),
            fail_path: None,
        });
        let pool = IoWorkerPool::new(2, requests.clone(), decoder);
        requests.enqueue_file_request(LoadRequest {
            path: "ok.png".into(),
            target_handle: Handle::invalid(ResourceKind::Texture),
            srgb: true,
            priority: crate::state_machine::Priority::Medium,
            base_mip: 0,
            enqueue_timestamp: 0,
        });

        let mut seen = None;
        for _ in 0..200 {
            if let Some(req) = requests.try_recv_decoded() {
                seen = Some(req);
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        pool.shutdown();
        let req = seen.expect("decoded upload never arrived");
        assert_eq!(req.shape.format, Format::Rgba8UnormSrgb);
    }

    #[test]
    fn failed_decode_routes_directly_to_finalization() {
        let requests = Arc::new(RequestManager::new());
        let decoder: Arc<dyn TextureDecoder> = Arc::new(FixedDecoder {
            calls: AtomicUsize::new(0),
            fail_path: Some("missing.png".into()),
        });
        let pool = IoWorkerPool::new(1, requests.clone(), decoder);
        requests.enqueue_file_request(LoadRequest {
            path: "missing.png".into(),
            target_handle: Handle::invalid(ResourceKind::Texture),
            srgb: false,
            priority: crate::state_machine::Priority::Low,
            base_mip: 0,
            enqueue_timestamp: 0,
        });

        let mut drained = Vec::new();
        for _ in 0..200 {
            drained = requests.drain_finalization();
            if !drained.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        pool.shutdown();
        assert_eq!(drained.len(), 1);
        assert!(!drained[0].success);
    }
}
