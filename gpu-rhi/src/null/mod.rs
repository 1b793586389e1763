//! In-memory `Device` implementation.
//!
//! Exists so `gpu_streaming`'s own test suite, and downstream consumers who
//! want to unit-test against the streaming core, can drive every pool,
//! registry, and worker described by that crate without a real GPU. Nothing
//! here is a faithful performance model of any real backend; it is a
//! behavioral mock.

mod bindless;
mod command;
mod device;
mod resources;

pub use bindless::{NullBindlessManager, WriteRecord};
pub use command::NullCommandList;
pub use device::{NullDevice, NullFence, NullSemaphore};
pub use resources::{NullBuffer, NullCommandPool, NullSampler, NullTexture, NullTextureView};
