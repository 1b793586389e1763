use parking_lot::Mutex;

use crate::traits::{BindlessManager, Buffer, Sampler, TextureView};

/// Records which slot last received which write, purely for test assertions
/// (`slot stability`, `update in place`); the null backend imposes no
/// capacity limit of its own since slot lifetime is the streaming core
/// registry's job, not the RHI's.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub slot: u32,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct Array {
    writes: Vec<WriteRecord>,
    next_generation: u64,
}

impl Array {
    fn write(&mut self, slot: u32) {
        if self.writes.len() <= slot as usize {
            self.writes.resize(slot as usize + 1, WriteRecord::default());
        }
        self.next_generation += 1;
        self.writes[slot as usize] = WriteRecord {
            slot,
            generation: self.next_generation,
        };
    }
}

#[derive(Debug, Default)]
pub struct NullBindlessManager {
    sampled_texture: Mutex<Array>,
    cubemap: Mutex<Array>,
    storage_image: Mutex<Array>,
    msaa_texture: Mutex<Array>,
    shadow_texture2d: Mutex<Array>,
    sampler: Mutex<Array>,
    shadow_sampler: Mutex<Array>,
    buffer: Mutex<Array>,
}

impl NullBindlessManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self, array: &str) -> u64 {
        let arr = match array {
            "sampled2D" => &self.sampled_texture,
            "cubemap" => &self.cubemap,
            "storageImage" => &self.storage_image,
            "msaaTexture" => &self.msaa_texture,
            "shadowTexture2D" => &self.shadow_texture2d,
            "sampler" => &self.sampler,
            "shadowSampler" => &self.shadow_sampler,
            "buffer" => &self.buffer,
            other => panic!("unknown bindless array `{other}`"),
        };
        arr.lock().next_generation
    }
}

impl BindlessManager for NullBindlessManager {
    fn write_sampled_texture(&self, slot: u32, _view: &dyn TextureView) {
        self.sampled_texture.lock().write(slot);
    }

    fn write_cubemap(&self, slot: u32, _view: &dyn TextureView) {
        self.cubemap.lock().write(slot);
    }

    fn write_storage_image(&self, slot: u32, _view: &dyn TextureView) {
        self.storage_image.lock().write(slot);
    }

    fn write_msaa_texture(&self, slot: u32, _view: &dyn TextureView) {
        self.msaa_texture.lock().write(slot);
    }

    fn write_shadow_texture2d(&self, slot: u32, _view: &dyn TextureView) {
        self.shadow_texture2d.lock().write(slot);
    }

    fn write_sampler(&self, slot: u32, _sampler: &dyn Sampler) {
        self.sampler.lock().write(slot);
    }

    fn write_shadow_sampler(&self, slot: u32, _sampler: &dyn Sampler) {
        self.shadow_sampler.lock().write(slot);
    }

    fn write_buffer(&self, slot: u32, _buffer: &dyn Buffer) {
        self.buffer.lock().write(slot);
    }
}
