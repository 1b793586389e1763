use crate::error::RhiError;
use crate::null::resources::{NullBuffer, NullTexture};
use crate::traits::{Buffer, CommandList, Texture};
use crate::types::{BufferTextureCopyRegion, MemoryBarrier};

/// Host-memory command list. Every operation executes immediately when
/// recorded rather than being deferred to submission time; this keeps the
/// null backend usable as a synchronous test double while still exercising
/// the exact call sequence `gpu_streaming::transfer_worker` issues.
#[derive(Debug, Default)]
pub struct NullCommandList {
    recording: bool,
    pub(crate) barriers_recorded: u32,
    pub(crate) copies_recorded: u32,
}

impl NullCommandList {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommandList for NullCommandList {
    fn begin(&mut self) -> Result<(), RhiError> {
        self.recording = true;
        Ok(())
    }

    fn end(&mut self) -> Result<(), RhiError> {
        self.recording = false;
        Ok(())
    }

    fn pipeline_barrier(&mut self, _texture: &dyn Texture, _barrier: MemoryBarrier) {
        self.barriers_recorded += 1;
    }

    fn copy_buffer_to_texture(
        &mut self,
        buffer: &dyn Buffer,
        texture: &dyn Texture,
        regions: &[BufferTextureCopyRegion],
    ) {
        let buffer = buffer
            .as_any()
            .downcast_ref::<NullBuffer>()
            .expect("null backend command list used with a foreign buffer");
        let texture = texture
            .as_any()
            .downcast_ref::<NullTexture>()
            .expect("null backend command list used with a foreign texture");
        let src = buffer.snapshot();
        for region in regions {
            let copy_size = texture.subresource_size(region.mip_level) as usize;
            let start = region.buffer_offset as usize;
            let bytes = &src[start..start + copy_size];
            texture.write_subresource(region.mip_level, region.array_layer, bytes);
        }
        self.copies_recorded += regions.len() as u32;
    }

    fn generate_mipmaps(&mut self, texture: &dyn Texture, base_level: u32) {
        let texture = texture
            .as_any()
            .downcast_ref::<NullTexture>()
            .expect("null backend command list used with a foreign texture");
        // Host-side box filter, one mip at a time, from `base_level` down to
        // the smallest. This is a correctness aid for tests, not a faithful
        // GPU mip chain: only Rgba8-family formats are actually filtered,
        // everything else is replicated from the parent mip's first texel.
        let block = texture.descriptor().format.block_info();
        let bpp = block.bytes_per_block;
        for layer in 0..texture.array_layers() {
            let mut parent = texture.read_subresource(base_level, layer);
            let mut parent_extent = texture.descriptor().extent.mip_level(base_level);
            for mip in (base_level + 1)..texture.mip_levels() {
                let mip_extent = texture.descriptor().extent.mip_level(mip);
                let dst_size = texture.subresource_size(mip) as usize;
                let mut dst = vec![0u8; dst_size];
                if block.block_width == 1 && block.block_height == 1 && bpp <= 16 {
                    downsample_box_filter(&parent, parent_extent, &mut dst, mip_extent, bpp as usize);
                } else if !parent.is_empty() {
                    for chunk in dst.chunks_mut(bpp as usize) {
                        let n = chunk.len().min(parent.len());
                        chunk[..n].copy_from_slice(&parent[..n]);
                    }
                }
                texture.write_subresource(mip, layer, &dst);
                parent = dst;
                parent_extent = mip_extent;
            }
        }
    }
}

fn downsample_box_filter(
    src: &[u8],
    src_extent: crate::types::Extent3d,
    dst: &mut [u8],
    dst_extent: crate::types::Extent3d,
    bpp: usize,
) {
    let src_row = src_extent.width as usize * bpp;
    let dst_row = dst_extent.width as usize * bpp;
    for y in 0..dst_extent.height as usize {
        for x in 0..dst_extent.width as usize {
            let sx0 = (x * 2).min(src_extent.width.saturating_sub(1) as usize);
            let sy0 = (y * 2).min(src_extent.height.saturating_sub(1) as usize);
            let sx1 = (sx0 + 1).min(src_extent.width.saturating_sub(1) as usize);
            let sy1 = (sy0 + 1).min(src_extent.height.saturating_sub(1) as usize);
            for c in 0..bpp {
                let sample = |sx: usize, sy: usize| -> u16 {
                    src[sy * src_row + sx * bpp + c] as u16
                };
                let avg = ((sample(sx0, sy0)
                    + sample(sx1, sy0)
                    + sample(sx0, sy1)
                    + sample(sx1, sy1))
                    / 4) as u8;
                dst[y * dst_row + x * bpp + c] = avg;
            }
        }
    }
}
