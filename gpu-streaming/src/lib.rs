//! Asynchronous GPU resource streaming core.
//!
//! Decouples "a texture is needed" from "a texture is uploaded": file
//! decoding happens on a bounded I/O worker pool, GPU transfer happens on a
//! single dedicated transfer thread with its own in-flight batch slots, and
//! the render thread only ever touches handles through [`facade::TextureFacade`],
//! which is the crate's intended entry point for embedding applications.
//!
//! Everything below the facade — the generational pool, smart handles, the
//! bindless registry, the staging ring, the request queues, and the two
//! background workers — is exposed for callers that want to drive the
//! pipeline directly (a custom facade, integration tests, tooling), but the
//! facade is what most code should construct.

mod bindless;
mod config;
mod error;
mod facade;
mod handle;
mod io_worker;
mod pool;
mod request_manager;
mod requests;
mod resource_manager;
mod smart_handle;
mod state_machine;
mod staging;
mod streamer;
mod transfer_worker;

pub use bindless::{BindlessArrayKind, BindlessRegistry, BindlessSlot};
pub use config::{StreamingConfig, StreamingConfigBuilder};
pub use error::{StreamError, StreamResult};
pub use facade::{StreamingStatistics, TextureFacade};
pub use handle::{Handle, ResourceKind};
pub use io_worker::{DecodeError, DecodedTexture, IoWorkerPool, TextureDecoder};
pub use request_manager::RequestManager;
pub use requests::{FinalizedRequest, LoadRequest, StagingRange, TextureShape, UploadRequest};
pub use resource_manager::{BufferData, MeshData, PipelineData, ResourceManager, TextureData};
pub use smart_handle::SmartHandle;
pub use state_machine::{IllegalTransition, Priority, ResourceStateMachine, State, StreamDirection, StreamRequestState};
pub use staging::{Allocation, StagingRing};
pub use transfer_worker::{GpuTransferWorker, TransferMetrics, TransferMetricsSnapshot, TransferTarget, TransferWorkerConfig};

/// Test-only: installs `env_logger` once per test binary so background
/// worker threads can log without racing `log::set_logger`'s one-shot init.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
