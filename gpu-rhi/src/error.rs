use thiserror::Error;

/// Errors surfaced by the abstract render hardware interface.
///
/// These are the only errors a `gpu_streaming` caller ever sees out of a
/// `Device` call; backend implementations are expected to fold their own
/// native error types (`VkResult`, `wgpu::Error`, ...) into one of these
/// variants rather than leaking them across the trait boundary.
#[derive(Debug, Error)]
pub enum RhiError {
    #[error("device out of memory")]
    OutOfMemory,

    #[error("resource creation failed: {0}")]
    ResourceCreation(String),

    #[error("bindless slot exhausted for array `{array}` (capacity {capacity})")]
    BindlessSlotExhausted { array: &'static str, capacity: u32 },

    #[error("fence wait timed out")]
    FenceTimeout,

    #[error("command submission failed: {0}")]
    SubmitFailed(String),

    #[error("device lost")]
    DeviceLost,
}
