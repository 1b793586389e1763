use bitflags::bitflags;

/// Width/height/depth in texels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self { width, height, depth }
    }

    /// The extent one mip level down, halving width/height/depth and clamping
    /// each to at least 1 texel.
    pub fn mip_level(&self, level: u32) -> Self {
        let shrink = |x: u32| (x >> level).max(1);
        Self {
            width: shrink(self.width),
            height: shrink(self.height),
            depth: shrink(self.depth),
        }
    }
}

/// Pixel/block formats the streaming core plans copies for.
///
/// Block-compressed variants carry their own `(block_width, block_height,
/// bytes_per_block)` via [`Format::block_info`]; uncompressed formats report
/// a 1x1 block whose `bytes_per_block` is the pixel stride.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Bc7Unorm,
    Bc7Srgb,
    Bc1Unorm,
    Bc1Srgb,
    Bc3Unorm,
    Bc3Srgb,
    Bc5Unorm,
    Bc5Snorm,
}

/// Static block geometry for a [`Format`]; block size is 1x1 for
/// uncompressed formats, with `bytes_per_block` equal to the pixel stride.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub block_width: u32,
    pub block_height: u32,
    pub bytes_per_block: u32,
}

impl Format {
    pub const fn block_info(self) -> BlockInfo {
        use Format::*;
        match self {
            R8Unorm => BlockInfo { block_width: 1, block_height: 1, bytes_per_block: 1 },
            Rg8Unorm => BlockInfo { block_width: 1, block_height: 1, bytes_per_block: 2 },
            Rgba8Unorm | Rgba8UnormSrgb | Bgra8Unorm | Bgra8UnormSrgb => {
                BlockInfo { block_width: 1, block_height: 1, bytes_per_block: 4 }
            }
            Rgba16Float => BlockInfo { block_width: 1, block_height: 1, bytes_per_block: 8 },
            Rgba32Float => BlockInfo { block_width: 1, block_height: 1, bytes_per_block: 16 },
            Bc1Unorm | Bc1Srgb => BlockInfo { block_width: 4, block_height: 4, bytes_per_block: 8 },
            Bc3Unorm | Bc3Srgb | Bc5Unorm | Bc5Snorm | Bc7Unorm | Bc7Srgb => {
                BlockInfo { block_width: 4, block_height: 4, bytes_per_block: 16 }
            }
        }
    }

    /// Promotes a decoded linear format to its sRGB-aware counterpart, or
    /// leaves it unchanged if the format has no sRGB variant (e.g. float
    /// formats). Used when deriving a texture's final format from
    /// `LoadRequest::srgb`.
    pub const fn with_srgb(self, srgb: bool) -> Self {
        use Format::*;
        match (self, srgb) {
            (Rgba8UnormSrgb, false) => Rgba8Unorm,
            (Rgba8Unorm, true) => Rgba8UnormSrgb,
            (Bgra8UnormSrgb, false) => Bgra8Unorm,
            (Bgra8Unorm, true) => Bgra8UnormSrgb,
            (Bc7Srgb, false) => Bc7Unorm,
            (Bc7Unorm, true) => Bc7Srgb,
            (Bc1Srgb, false) => Bc1Unorm,
            (Bc1Unorm, true) => Bc1Srgb,
            (Bc3Srgb, false) => Bc3Unorm,
            (Bc3Unorm, true) => Bc3Srgb,
            (other, _) => other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TextureType {
    #[default]
    Texture2D,
    Texture1D,
    Texture3D,
    TextureCube,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const TRANSFER_SRC          = 1 << 0;
        const TRANSFER_DST          = 1 << 1;
        const SAMPLED               = 1 << 2;
        const STORAGE               = 1 << 3;
        const COLOR_ATTACHMENT      = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC          = 1 << 0;
        const TRANSFER_DST          = 1 << 1;
        const VERTEX_BUFFER         = 1 << 2;
        const INDEX_BUFFER          = 1 << 3;
        const STORAGE_BUFFER        = 1 << 4;
        const UNIFORM_BUFFER        = 1 << 5;
        const SHADER_DEVICE_ADDRESS = 1 << 6;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum MemoryUsage {
    #[default]
    GpuOnly,
    CpuToGpu,
    GpuToCpu,
}

/// Descriptor for texture creation. Mirrors the fields the streaming core
/// needs to know about; anything backend-specific (tiling, Vulkan image
/// create flags, ...) lives on the concrete `Device` implementation's own
/// extension of this type if it needs one.
#[derive(Clone, Debug)]
pub struct TextureDescriptor {
    pub debug_name: String,
    pub ty: TextureType,
    pub extent: Extent3d,
    pub format: Format,
    pub usage: TextureUsage,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub sample_count: u32,
    pub memory_usage: MemoryUsage,
    /// When true, the resource manager never attempts bindless registration
    /// for this texture even if `use_bindless` is requested at creation.
    pub skip_bindless: bool,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            debug_name: String::new(),
            ty: TextureType::Texture2D,
            extent: Extent3d::new(1, 1, 1),
            format: Format::Rgba8Unorm,
            usage: TextureUsage::SAMPLED,
            mip_levels: 1,
            array_layers: 1,
            sample_count: 1,
            memory_usage: MemoryUsage::GpuOnly,
            skip_bindless: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TextureViewDescriptor {
    pub base_mip_level: u32,
    pub mip_level_count: u32,
    pub base_array_layer: u32,
    pub array_layer_count: u32,
}

#[derive(Clone, Debug)]
pub struct BufferDescriptor {
    pub debug_name: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub memory_usage: MemoryUsage,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SamplerDescriptor {
    pub mag_filter_linear: bool,
    pub min_filter_linear: bool,
    pub mip_filter_linear: bool,
    pub address_mode_repeat: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CommandPoolDescriptor {
    pub queue_family_index: u32,
    pub flags: CommandPoolFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct CommandPoolFlags: u32 {
        const RESET_COMMAND_BUFFER = 1 << 0;
    }
}

/// A source/destination pair for one `copyBufferToTexture` region.
#[derive(Clone, Copy, Debug, Default)]
pub struct BufferTextureCopyRegion {
    pub buffer_offset: u64,
    pub buffer_row_length: u32,
    pub buffer_image_height: u32,
    pub mip_level: u32,
    pub array_layer: u32,
    pub texture_offset: Extent3d,
    pub texture_extent: Extent3d,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ResourceLayout {
    #[default]
    Undefined,
    TransferSrc,
    TransferDst,
    ShaderReadOnly,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStage: u32 {
        const NONE     = 0;
        const TRANSFER = 1 << 0;
        const COMPUTE  = 1 << 1;
        const GRAPHICS = 1 << 2;
    }
}

/// A queue-family ownership / layout transition barrier for one texture.
///
/// When `src_queue_family != dst_queue_family`, this describes one half of a
/// release/acquire pair (see `gpu_streaming::transfer_worker`).
#[derive(Clone, Copy, Debug)]
pub struct MemoryBarrier {
    pub old_layout: ResourceLayout,
    pub new_layout: ResourceLayout,
    pub src_access_stage: ShaderStage,
    pub dst_access_stage: ShaderStage,
    pub src_queue_family: u32,
    pub dst_queue_family: u32,
}

/// Opaque index into one of the bindless registry's eight typed arrays.
/// `u32::MAX` is the sentinel for "not registered".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureBindlessHandle(pub u32);

impl TextureBindlessHandle {
    pub const INVALID: Self = Self(u32::MAX);

    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }
}

impl Default for TextureBindlessHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Snapshot of one occupied or free slot in a bindless array, used for
/// statistics and debug overlays.
#[derive(Clone, Debug)]
pub struct BindlessSlotInfo {
    pub name: String,
    pub slot_index: u32,
    pub width: u32,
    pub height: u32,
    pub format: Option<Format>,
    pub is_occupied: bool,
}

/// Statistics for one typed bindless array.
#[derive(Clone, Debug, Default)]
pub struct BindlessArrayStats {
    pub name: String,
    pub capacity: u32,
    pub occupied: u32,
    pub free_list_size: u32,
    pub slots: Vec<BindlessSlotInfo>,
}

#[derive(Clone, Debug, Default)]
pub struct BindlessStatistics {
    pub arrays: Vec<BindlessArrayStats>,
}
