//! The texture streamer planner: a deterministic,
//! stateless-per-call function that derives the next copy region for a
//! request. All mutable cursor state lives on [`StreamRequestState`] (owned
//! by the caller's `UploadRequest`), which is what makes re-queueing a
//! partially-streamed request safe — it carries everything needed to
//! resume.

use gpu_rhi::{BlockInfo, BufferTextureCopyRegion, Extent3d, TextureType};

use crate::requests::TextureShape;
use crate::state_machine::{StreamDirection, StreamRequestState};

/// One planned `copyBufferToTexture` region, plus enough bookkeeping for
/// the caller to advance its stream state and know whether the mip this
/// call targeted is now fully copied.
#[derive(Clone, Copy, Debug)]
pub struct CopyRegionPlan {
    /// Byte offset into the request's decoded payload this region reads
    /// from.
    pub source_offset: u64,
    pub copy_size: u64,
    /// `buffer_offset` is left at 0; the caller fills it in once the
    /// staging allocation's offset is known.
    pub region: BufferTextureCopyRegion,
    pub rows_copied: u32,
    pub mip_finished: bool,
}

fn mip_bytes_one_layer(shape: &TextureShape, block: BlockInfo, mip: u32) -> u64 {
    let extent = shape.extent.mip_level(mip);
    let blocks_x = extent.width.div_ceil(block.block_width) as u64;
    let blocks_y = extent.height.div_ceil(block.block_height) as u64;
    blocks_x * blocks_y * block.bytes_per_block as u64 * extent.depth as u64
}

fn mip_bytes_all_layers(shape: &TextureShape, block: BlockInfo, mip: u32) -> u64 {
    mip_bytes_one_layer(shape, block, mip) * shape.array_layers as u64
}

/// Byte offset of `(mip, layer)`'s subresource within a decoded payload
/// laid out mip-major, matching `gpu_rhi::null::NullTexture`'s layout.
pub fn mip_layer_base_offset(shape: &TextureShape, mip: u32, layer: u32) -> u64 {
    let block = shape.format.block_info();
    let mut offset = 0u64;
    for m in 0..mip {
        offset += mip_bytes_all_layers(shape, block, m);
    }
    offset + mip_bytes_one_layer(shape, block, mip) * layer as u64
}

/// Plans the next copy region for `stream`, honoring block-compressed
/// alignment and the caller's remaining staging-window budget.
///
/// Returns `None` when the current mip doesn't fit in `remaining_capacity`
/// but *would* fit in a fresh ring (`ring_capacity`) — signaling "defer this
/// request to a later batch" rather than splitting it needlessly. When a
/// single mip exceeds the ring's total capacity, the mip is split into
/// row-aligned partial copies instead.
pub fn plan_copy_region(
    shape: &TextureShape,
    stream: &StreamRequestState,
    remaining_capacity: u64,
    ring_capacity: u64,
) -> Option<CopyRegionPlan> {
    let block = shape.format.block_info();
    let mip_extent = shape.extent.mip_level(stream.current_level);
    let blocks_x = mip_extent.width.div_ceil(block.block_width) as u64;
    let blocks_y_total = mip_extent.height.div_ceil(block.block_height) as u64;
    let row_bytes = blocks_x * block.bytes_per_block as u64;
    let remaining_block_rows = blocks_y_total.saturating_sub(stream.current_row as u64);
    let full_remaining_size = row_bytes * remaining_block_rows * mip_extent.depth as u64;

    if stream.current_row == 0 && full_remaining_size > remaining_capacity && full_remaining_size <= ring_capacity {
        return None;
    }

    let (rows_this_call, mip_finished) = if full_remaining_size <= remaining_capacity {
        (remaining_block_rows, true)
    } else {
        let max_rows = (remaining_capacity / row_bytes.max(1)).max(1).min(remaining_block_rows);
        (max_rows, max_rows >= remaining_block_rows)
    };

    let copy_size = row_bytes * rows_this_call * mip_extent.depth as u64;
    if copy_size == 0 || copy_size > remaining_capacity {
        return None;
    }

    let texel_row_offset = stream.current_row * block.block_height;
    let source_offset = mip_layer_base_offset(shape, stream.current_level, stream.current_layer)
        + stream.current_row as u64 * row_bytes;

    let region = BufferTextureCopyRegion {
        buffer_offset: 0,
        buffer_row_length: mip_extent.width,
        buffer_image_height: rows_this_call as u32 * block.block_height,
        mip_level: stream.current_level,
        array_layer: stream.current_layer,
        texture_offset: Extent3d::new(0, texel_row_offset, 0),
        texture_extent: Extent3d::new(
            mip_extent.width,
            rows_this_call as u32 * block.block_height,
            mip_extent.depth,
        ),
    };

    Some(CopyRegionPlan {
        source_offset,
        copy_size,
        region,
        rows_copied: rows_this_call as u32,
        mip_finished,
    })
}

/// Advances `stream` past the region just copied. Returns `true` once every
/// mip this request is responsible for (down to `mip_count_provided` or
/// `base_mip`, per `direction`) has been fully copied.
pub fn advance_request_state(
    stream: &mut StreamRequestState,
    shape: &TextureShape,
    mip_count_provided: u32,
    plan: &CopyRegionPlan,
) -> bool {
    if !plan.mip_finished {
        stream.current_row += plan.rows_copied;
        return false;
    }
    stream.current_row = 0;
    stream.current_layer += 1;
    if shape.ty == TextureType::TextureCube {
        stream.current_face = stream.current_layer % 6;
    }
    if stream.current_layer < shape.array_layers {
        return false;
    }
    stream.current_layer = 0;
    stream.current_face = 0;

    match stream.direction {
        StreamDirection::LowToHigh => {
            if stream.current_level == stream.base_mip {
                true
            } else {
                stream.current_level -= 1;
                false
            }
        }
        StreamDirection::HighToLow => {
            if stream.current_level + 1 >= mip_count_provided {
                true
            } else {
                stream.current_level += 1;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_rhi::Format;

    fn shape(extent: Extent3d, mip_levels: u32, array_layers: u32) -> TextureShape {
        TextureShape {
            ty: TextureType::Texture2D,
            extent,
            format: Format::Rgba8Unorm,
            mip_levels,
            array_layers,
        }
    }

    #[test]
    fn single_mip_fits_whole_in_one_call() {
        let shape = shape(Extent3d::new(64, 64, 1), 1, 1);
        let mut stream = StreamRequestState::new(0, StreamDirection::HighToLow, 1);
        let plan = plan_copy_region(&shape, &stream, 1 << 20, 1 << 20).unwrap();
        assert!(plan.mip_finished);
        assert_eq!(plan.copy_size, 64 * 64 * 4);
        let done = advance_request_state(&mut stream, &shape, 1, &plan);
        assert!(done);
    }

    #[test]
    fn oversize_mip_splits_into_row_chunks() {
        let shape = shape(Extent3d::new(1024, 1024, 1), 1, 1);
        let mut stream = StreamRequestState::new(0, StreamDirection::HighToLow, 1);
        let ring_capacity = 1024 * 1024 * 4; // exactly one mip, so "defer" path is never taken
        let mut total = 0u64;
        let mut calls = 0;
        loop {
            let plan = plan_copy_region(&shape, &stream, 256 * 1024, ring_capacity).unwrap();
            total += plan.copy_size;
            calls += 1;
            if advance_request_state(&mut stream, &shape, 1, &plan) {
                break;
            }
            assert!(calls < 100, "planner did not converge");
        }
        assert_eq!(total, 1024 * 1024 * 4);
        assert!(calls > 1);
    }

    #[test]
    fn defers_when_it_would_fit_a_fresh_batch_but_not_this_ones_remainder() {
        let shape = shape(Extent3d::new(512, 512, 1), 1, 1);
        let stream = StreamRequestState::new(0, StreamDirection::HighToLow, 1);
        let full_mip_size = 512 * 512 * 4;
        let plan = plan_copy_region(&shape, &stream, full_mip_size - 1, full_mip_size);
        assert!(plan.is_none());
    }

    #[test]
    fn low_to_high_decreases_level_monotonically() {
        let shape = shape(Extent3d::new(256, 256, 1), 4, 1);
        let mut stream = StreamRequestState::new(0, StreamDirection::LowToHigh, 4);
        assert_eq!(stream.current_level, 3);
        let mut levels = vec![stream.current_level];
        loop {
            let plan = plan_copy_region(&shape, &stream, 1 << 20, 1 << 20).unwrap();
            if advance_request_state(&mut stream, &shape, 4, &plan) {
                break;
            }
            levels.push(stream.current_level);
        }
        let mut sorted = levels.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(levels, sorted, "current_level must decrease monotonically");
        assert_eq!(*levels.last().unwrap(), 0);
    }
}
