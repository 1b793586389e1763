use serde::{Deserialize, Serialize};

use crate::error::StreamResult;

const MIB: u64 = 1024 * 1024;

/// Every tunable the streaming core recognizes, assembled into one
/// `serde`-deserializable struct so it can be loaded from the environment
/// (`PNKR_STREAM_*`) or a layered config file on top of the built-in
/// defaults below.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub async_streaming_enabled: bool,
    pub staging_ring_size_bytes: u64,
    pub staging_page_size_bytes: u64,
    pub in_flight_batches: u32,
    pub max_upload_bytes_per_frame: u64,
    pub max_upload_jobs_per_frame: u32,
    pub max_concurrent_file_loads: u32,
    pub max_temporary_staging_buffers: u32,
    pub frames_in_flight: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            async_streaming_enabled: true,
            staging_ring_size_bytes: 512 * MIB,
            staging_page_size_bytes: 2 * MIB,
            in_flight_batches: 3,
            max_upload_bytes_per_frame: 128 * MIB,
            max_upload_jobs_per_frame: 128,
            max_concurrent_file_loads: 32,
            max_temporary_staging_buffers: 16,
            frames_in_flight: 3,
        }
    }
}

impl StreamingConfig {
    pub fn builder() -> StreamingConfigBuilder {
        StreamingConfigBuilder::default()
    }

    /// Loads config in the engine's standard override order: built-in
    /// defaults, then an optional config file, then `PNKR_STREAM_*`
    /// environment variables. Callers apply explicit builder overrides on
    /// top of the returned value, which is the final and strictest layer.
    pub fn load(config_file: Option<&str>) -> StreamResult<Self> {
        let defaults = Self::default();
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&defaults)?);
        if let Some(path) = config_file {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("PNKR_STREAM")
                .try_parsing(true)
                .separator("_"),
        );
        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn page_count(&self) -> u64 {
        self.staging_ring_size_bytes / self.staging_page_size_bytes
    }
}

/// Programmatic override layer applied on top of [`StreamingConfig::load`].
#[derive(Default)]
pub struct StreamingConfigBuilder {
    config: StreamingConfigOverrides,
}

#[derive(Default)]
struct StreamingConfigOverrides {
    base: Option<StreamingConfig>,
}

impl StreamingConfigBuilder {
    pub fn with_base(mut self, base: StreamingConfig) -> Self {
        self.config.base = Some(base);
        self
    }

    pub fn async_streaming_enabled(mut self, value: bool) -> Self {
        self.resolve().async_streaming_enabled = value;
        self
    }

    pub fn staging_ring_size_bytes(mut self, value: u64) -> Self {
        self.resolve().staging_ring_size_bytes = value;
        self
    }

    pub fn staging_page_size_bytes(mut self, value: u64) -> Self {
        self.resolve().staging_page_size_bytes = value;
        self
    }

    pub fn in_flight_batches(mut self, value: u32) -> Self {
        self.resolve().in_flight_batches = value;
        self
    }

    pub fn max_upload_bytes_per_frame(mut self, value: u64) -> Self {
        self.resolve().max_upload_bytes_per_frame = value;
        self
    }

    pub fn max_upload_jobs_per_frame(mut self, value: u32) -> Self {
        self.resolve().max_upload_jobs_per_frame = value;
        self
    }

    pub fn max_concurrent_file_loads(mut self, value: u32) -> Self {
        self.resolve().max_concurrent_file_loads = value;
        self
    }

    pub fn max_temporary_staging_buffers(mut self, value: u32) -> Self {
        self.resolve().max_temporary_staging_buffers = value;
        self
    }

    pub fn frames_in_flight(mut self, value: u32) -> Self {
        self.resolve().frames_in_flight = value;
        self
    }

    fn resolve(&mut self) -> &mut StreamingConfig {
        self.config.base.get_or_insert_with(StreamingConfig::default)
    }

    pub fn build(self) -> StreamingConfig {
        self.config.base.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = StreamingConfig::default();
        assert_eq!(cfg.staging_ring_size_bytes, 512 * MIB);
        assert_eq!(cfg.staging_page_size_bytes, 2 * MIB);
        assert_eq!(cfg.in_flight_batches, 3);
        assert_eq!(cfg.frames_in_flight, 3);
        assert_eq!(cfg.max_upload_bytes_per_frame, 128 * MIB);
        assert_eq!(cfg.max_upload_jobs_per_frame, 128);
        assert_eq!(cfg.max_concurrent_file_loads, 32);
        assert_eq!(cfg.max_temporary_staging_buffers, 16);
    }

    #[test]
    fn builder_overrides_only_touched_fields() {
        let cfg = StreamingConfig::builder().frames_in_flight(4).build();
        assert_eq!(cfg.frames_in_flight, 4);
        assert_eq!(cfg.staging_page_size_bytes, 2 * MIB);
    }
}
