use thiserror::Error;

/// Errors returned by the crate's synchronous, caller-facing surface:
/// engine construction, configuration parsing, and the immediate
/// `create_texture`/`create_cubemap` APIs.
///
/// Internal asynchronous recovery (staging shortage, per-request decode
/// failure, an invalidated target handle) never surfaces through this type;
/// those resolve into the `Failed` state-machine branch and an error-proxy
/// substitution instead (see `gpu_streaming::state_machine`).
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to read asset `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode asset `{path}`: {reason}")]
    Decode { path: String, reason: String },

    #[error("cubemap face mismatch: {reason}")]
    CubemapValidation { reason: String },

    #[error("format mismatch: {reason}")]
    FormatMismatch { reason: String },

    #[error("handle is no longer valid")]
    InvalidHandle,

    #[error("staging allocation unavailable")]
    StagingUnavailable,

    #[error("bindless slot exhausted for array `{0}`")]
    BindlessExhausted(&'static str),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("device error: {0}")]
    Rhi(#[from] gpu_rhi::RhiError),
}

pub type StreamResult<T> = Result<T, StreamError>;
