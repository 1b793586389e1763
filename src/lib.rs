//! Backend-agnostic GPU resource lifecycle and asynchronous texture streaming core.
//!
//! This crate is a thin aggregator over [`gpu_rhi`] (the abstract render hardware
//! interface the streaming core is written against) and [`gpu_streaming`] (the
//! pools, registries, queues and workers themselves). Applications depend on
//! this crate and implement [`gpu_rhi::Device`] for their actual graphics API.

pub use gpu_rhi;
pub use gpu_streaming;
