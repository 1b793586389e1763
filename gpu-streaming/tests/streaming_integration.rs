//! End-to-end streaming scenarios driven entirely against the `null` RHI
//! backend, exercising the whole pipeline (I/O workers, transfer worker,
//! facade) the way a real engine's render loop would: construct the facade
//! once, call `load_texture`/`create_cubemap`, then tick `sync_to_gpu` until
//! the result settles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gpu_rhi::null::NullDevice;
use gpu_rhi::{Device, Extent3d, Format, TextureType};
use gpu_streaming::{
    DecodeError, DecodedTexture, Priority, StreamingConfig, TextureDecoder, TextureFacade,
    TextureShape,
};

struct FixedSizeDecoder {
    width: u32,
    height: u32,
    calls: AtomicUsize,
}

impl FixedSizeDecoder {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            calls: AtomicUsize::new(0),
        }
    }
}

impl TextureDecoder for FixedSizeDecoder {
    fn decode(&self, _path: &str) -> Result<DecodedTexture, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pixel_count = (self.width * self.height) as usize;
        Ok(DecodedTexture {
            shape: TextureShape {
                ty: TextureType::Texture2D,
                extent: Extent3d::new(self.width, self.height, 1),
                format: Format::Rgba8Unorm,
                mip_levels: 1,
                array_layers: 1,
            },
            bytes: vec![0xABu8; pixel_count * 4],
            mip_count_provided: 1,
        })
    }
}

struct AlwaysFailsDecoder;

impl TextureDecoder for AlwaysFailsDecoder {
    fn decode(&self, path: &str) -> Result<DecodedTexture, DecodeError> {
        Err(DecodeError {
            path: path.to_string(),
            reason: "no decoder registered for this extension".to_string(),
        })
    }
}

fn init_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn pump_until<F: Fn(&TextureFacade) -> bool>(facade: &TextureFacade, predicate: F) -> bool {
    for _ in 0..500 {
        facade.sync_to_gpu();
        if predicate(facade) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn happy_path_uncompressed_upload_settles_in_place_on_the_proxys_slot() {
    init_logging();
    let device: Arc<dyn Device> = Arc::new(NullDevice::new());
    let decoder: Arc<dyn TextureDecoder> = Arc::new(FixedSizeDecoder::new(64, 64));
    let facade = TextureFacade::new(device, StreamingConfig::default(), decoder).unwrap();

    let handle = facade.load_texture("rocks_albedo.png", true, Priority::Medium).unwrap();
    let raw = handle.raw();

    assert!(pump_until(&facade, |f| f.is_texture_loaded(raw)));
    let completed = facade.consume_completed_textures();
    assert_eq!(completed, vec![raw]);

    facade.shutdown();
}

#[test]
fn failed_decode_never_reports_loaded_and_does_not_wedge_the_pipeline() {
    init_logging();
    let device: Arc<dyn Device> = Arc::new(NullDevice::new());
    let decoder: Arc<dyn TextureDecoder> = Arc::new(AlwaysFailsDecoder);
    let facade = TextureFacade::new(device, StreamingConfig::default(), decoder).unwrap();

    let handle = facade.load_texture("missing.png", false, Priority::High).unwrap();
    let raw = handle.raw();

    // Give the pipeline plenty of ticks; it must never transition to
    // "loaded" since every decode attempt fails and resolves to the error
    // proxy instead.
    for _ in 0..50 {
        facade.sync_to_gpu();
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(!facade.is_texture_loaded(raw));

    facade.shutdown();
}

#[test]
fn dropping_the_handle_before_upload_completes_does_not_leak_or_panic() {
    init_logging();
    let device: Arc<dyn Device> = Arc::new(NullDevice::new());
    let decoder: Arc<dyn TextureDecoder> = Arc::new(FixedSizeDecoder::new(256, 256));
    let facade = TextureFacade::new(device, StreamingConfig::default(), decoder).unwrap();

    let handle = facade.load_texture("big_one.png", true, Priority::Low).unwrap();
    let raw = handle.raw();
    facade.unload_texture(raw);

    // A handful of ticks must not panic even though the target may already
    // be gone by the time the transfer worker gets to it.
    for _ in 0..20 {
        facade.sync_to_gpu();
        std::thread::sleep(Duration::from_millis(2));
    }

    facade.shutdown();
}

#[test]
fn cubemap_with_consistent_faces_produces_a_valid_handle() {
    init_logging();
    let device: Arc<dyn Device> = Arc::new(NullDevice::new());
    let decoder: Arc<dyn TextureDecoder> = Arc::new(FixedSizeDecoder::new(32, 32));
    let facade = TextureFacade::new(
        device,
        StreamingConfig::builder().async_streaming_enabled(false).build(),
        decoder,
    )
    .unwrap();

    let face = vec![0u8; 32 * 32 * 4];
    let faces: [(u32, u32, &[u8]); 6] = [
        (32, 32, &face),
        (32, 32, &face),
        (32, 32, &face),
        (32, 32, &face),
        (32, 32, &face),
        (32, 32, &face),
    ];
    let handle = facade.create_cubemap("sky", faces, true).unwrap();
    assert!(handle.is_valid());

    facade.shutdown();
}

#[test]
fn cubemap_with_mismatched_face_size_falls_back_to_the_error_cube() {
    init_logging();
    let device: Arc<dyn Device> = Arc::new(NullDevice::new());
    let decoder: Arc<dyn TextureDecoder> = Arc::new(FixedSizeDecoder::new(32, 32));
    let facade = TextureFacade::new(
        device,
        StreamingConfig::builder().async_streaming_enabled(false).build(),
        decoder,
    )
    .unwrap();

    let small = vec![0u8; 16 * 16 * 4];
    let big = vec![0u8; 32 * 32 * 4];
    let faces: [(u32, u32, &[u8]); 6] = [
        (32, 32, &big),
        (16, 16, &small),
        (32, 32, &big),
        (32, 32, &big),
        (32, 32, &big),
        (32, 32, &big),
    ];
    let handle = facade.create_cubemap("bad_sky", faces, true).unwrap();
    assert_eq!(handle.raw(), facade.get_error_cube().raw());

    facade.shutdown();
}

#[test]
fn reloading_after_unload_returns_a_fresh_but_valid_handle() {
    init_logging();
    let device: Arc<dyn Device> = Arc::new(NullDevice::new());
    let decoder: Arc<dyn TextureDecoder> = Arc::new(FixedSizeDecoder::new(16, 16));
    let facade = TextureFacade::new(
        device,
        StreamingConfig::builder().async_streaming_enabled(false).build(),
        decoder,
    )
    .unwrap();

    let first = facade.load_texture("repeated.png", false, Priority::Medium).unwrap();
    facade.unload_texture(first.raw());
    let second = facade.load_texture("repeated.png", false, Priority::Medium).unwrap();
    assert!(second.is_valid());

    facade.shutdown();
}
