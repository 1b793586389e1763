//! The two request types that flow through the streaming pipeline:
//! [`LoadRequest`] (facade -> I/O worker) and [`UploadRequest`]
//! (I/O worker -> transfer worker -> facade finalization).

use gpu_rhi::{Extent3d, Format, TextureType};

use crate::handle::Handle;
use crate::smart_handle::SmartHandle;
use crate::state_machine::{Priority, ResourceStateMachine, StreamRequestState};

#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub path: String,
    pub target_handle: Handle,
    pub srgb: bool,
    pub priority: Priority,
    pub base_mip: u32,
    pub enqueue_timestamp: u64,
}

/// Shape of a decoded (but not yet uploaded) texture, enough for the
/// streamer planner to compute copy regions without touching the decoder.
#[derive(Clone, Copy, Debug)]
pub struct TextureShape {
    pub ty: TextureType,
    pub extent: Extent3d,
    pub format: Format,
    pub mip_levels: u32,
    pub array_layers: u32,
}

/// A byte range held open in the staging ring (or a temporary buffer) on
/// behalf of one in-flight `UploadRequest`. Released as soon as the owning
/// batch's `notify_batch_complete` fires.
#[derive(Clone, Copy, Debug)]
pub struct StagingRange {
    pub offset: u64,
    pub size: u64,
    pub is_temporary: bool,
    pub temp_index: Option<usize>,
}

/// One decoded, not-yet-fully-uploaded texture. Owns the decoded bytes and
/// everything needed to resume streaming after a partial batch, so
/// re-queueing never loses progress. Move-only: cloning an in-flight upload
/// would desynchronize its state machine from its staging ranges.
#[derive(Debug)]
pub struct UploadRequest {
    pub path: String,
    pub target_handle: Handle,
    pub priority: Priority,
    pub shape: TextureShape,
    pub srgb: bool,
    pub decoded_bytes: Vec<u8>,
    pub total_size: u64,
    pub mip_count_provided: u32,
    pub mip_levels_requested: u32,
    pub state: ResourceStateMachine,
    pub stream: StreamRequestState,
    pub layout_initialized: bool,
    pub layout_finalized: bool,
    pub needs_mipmap_generation: bool,
    pub staging_ranges: Vec<StagingRange>,
    /// The freshly created (not-yet-visible) texture the copies land in.
    /// Held as a `SmartHandle` so nothing else can tear it down while a
    /// batch is mid-flight; consumed (and its raw handle read out) by
    /// `ResourceManager::replace_texture` at finalization.
    pub intermediate_handle: Option<SmartHandle>,
    pub failure_reason: Option<String>,
}

impl UploadRequest {
    pub fn failed(path: String, target_handle: Handle, priority: Priority, reason: String) -> Self {
        let mut state = ResourceStateMachine::new();
        let _ = state.transition(crate::state_machine::State::Pending);
        let _ = state.transition(crate::state_machine::State::Failed);
        Self {
            path,
            target_handle,
            priority,
            shape: TextureShape {
                ty: TextureType::Texture2D,
                extent: Extent3d::new(1, 1, 1),
                format: Format::Rgba8Unorm,
                mip_levels: 1,
                array_layers: 1,
            },
            srgb: false,
            decoded_bytes: Vec::new(),
            total_size: 0,
            mip_count_provided: 0,
            mip_levels_requested: 1,
            state,
            stream: StreamRequestState::new(0, crate::state_machine::StreamDirection::HighToLow, 1),
            layout_initialized: false,
            layout_finalized: true,
            needs_mipmap_generation: false,
            staging_ranges: Vec::new(),
            intermediate_handle: None,
            failure_reason: Some(reason),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.state.state() == crate::state_machine::State::Failed
    }
}

/// What the facade's finalization drain actually needs: enough to call
/// `replace_texture` and to report the outcome via the completed list.
#[derive(Debug)]
pub struct FinalizedRequest {
    pub target_handle: Handle,
    pub intermediate_handle: Option<SmartHandle>,
    pub success: bool,
    pub failure_reason: Option<String>,
}
