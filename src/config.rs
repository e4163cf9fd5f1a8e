//! Stream pipeline settings, loadable from JSON.

use crate::channel_map::{ChannelError, ChannelMap, DEFAULT_ALIGNMENT};
use crate::control::{CancelCheck, CancelToken, DEFAULT_CANCEL_CHECK_INTERVAL};
use crate::stream::{BoxedStream, DeformedStream, Deformer, FractionalStream, SampleMode, StreamError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Settings shared by the decorators a viewport or render pass stacks up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Fraction of particles kept, in `[0, 1]`.
    pub view_fraction: f64,
    /// Cap on kept particles, in thousands. `None` disables the cap.
    pub view_limit: Option<f64>,
    pub seed: u64,
    /// Scale `Density` by the inverse of the kept fraction.
    pub density_compensation: bool,
    /// Channel hashed for frame-stable sampling, when present.
    pub id_channel: String,
    /// Particles per deformer batch. `None` buffers the whole stream.
    pub deform_batch_size: Option<usize>,
    /// Record alignment in bytes used when sealing maps.
    pub alignment: usize,
    pub cancel_check_interval: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            view_fraction: 1.0,
            view_limit: None,
            seed: 42,
            density_compensation: false,
            id_channel: "ID".to_string(),
            deform_batch_size: Some(4096),
            alignment: DEFAULT_ALIGNMENT,
            cancel_check_interval: DEFAULT_CANCEL_CHECK_INTERVAL,
        }
    }
}

impl StreamConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        debug!("loaded stream config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Limit in particles, rounded up.
    pub fn limit(&self) -> Option<u64> {
        self.view_limit
            .filter(|thousands| *thousands > 0.0 && thousands.is_finite())
            .map(|thousands| (thousands * 1000.0).ceil() as u64)
    }

    /// Seals `map` with the configured alignment.
    pub fn seal(&self, map: &mut ChannelMap) -> Result<(), ChannelError> {
        map.end_channel_definition(self.alignment.max(1), true, false)
    }

    pub fn cancel_check(&self, token: CancelToken) -> CancelCheck {
        CancelCheck::new(token, self.cancel_check_interval)
    }
}

/// Wraps `stream` in a [`FractionalStream`] set up from `config`.
///
/// Sampling hashes the ID channel when the stream carries it. Otherwise it
/// falls back to seeded per-index draws, which are not stable across frames.
pub fn apply_fractional(stream: BoxedStream, config: &StreamConfig) -> Result<BoxedStream, StreamError> {
    let has_id = stream.channel_map().has_channel(&config.id_channel)
        || stream.native_channel_map().has_channel(&config.id_channel);
    let mode = if has_id {
        SampleMode::ById {
            channel: config.id_channel.clone(),
            seed: config.seed,
        }
    } else {
        warn!(
            "\"{}\" has no {} channel; sampling by index",
            stream.name(),
            config.id_channel
        );
        SampleMode::Random { seed: config.seed }
    };
    let fractional = FractionalStream::new(stream, config.view_fraction, config.limit(), mode)?
        .with_density_compensation(config.density_compensation)?;
    Ok(Box::new(fractional))
}

/// Wraps `stream` in a [`DeformedStream`] using the configured batch size.
pub fn apply_deformer<D>(stream: BoxedStream, deformer: D, config: &StreamConfig) -> Result<BoxedStream, StreamError>
where
    D: Deformer + 'static,
{
    Ok(Box::new(DeformedStream::new(
        stream,
        deformer,
        config.deform_batch_size,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::stream::{GeneratorStream, ParticleArray};

    fn stream(with_id: bool) -> BoxedStream {
        let mut defs = vec![("Position", 3, DataType::Float32)];
        if with_id {
            defs.push(("ID", 1, DataType::Int64));
        }
        let map = ChannelMap::from_channels(&defs).unwrap();
        let id = map.accessor::<i64>("ID").ok();
        Box::new(
            GeneratorStream::new(map, move |i, _, r| {
                if let Some(id) = &id {
                    id.set(r, i as i64 * 7);
                }
                true
            })
            .with_count(2000),
        )
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = StreamConfig::from_json_str(r#"{"view_fraction": 0.25, "view_limit": 0.5}"#).unwrap();
        assert_eq!(config.view_fraction, 0.25);
        assert_eq!(config.limit(), Some(500));
        assert_eq!(config.id_channel, "ID");
        assert_eq!(config.alignment, DEFAULT_ALIGNMENT);
    }

    #[test]
    fn limit_rounds_up() {
        let config = StreamConfig {
            view_limit: Some(0.0015),
            ..StreamConfig::default()
        };
        assert_eq!(config.limit(), Some(2));
        let off = StreamConfig {
            view_limit: Some(0.0),
            ..StreamConfig::default()
        };
        assert_eq!(off.limit(), None);
    }

    #[test]
    fn bad_json_is_rejected() {
        assert!(matches!(
            StreamConfig::from_json_str("{\"seed\": \"x\"}"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn fractional_respects_limit_with_and_without_id() {
        for with_id in [true, false] {
            let config = StreamConfig {
                view_fraction: 0.5,
                view_limit: Some(0.1),
                ..StreamConfig::default()
            };
            let mut stream = apply_fractional(stream(with_id), &config).unwrap();
            let array = ParticleArray::from_stream(stream.as_mut()).unwrap();
            assert_eq!(array.len(), 100);
        }
    }

    #[test]
    fn seal_uses_alignment() {
        let config = StreamConfig {
            alignment: 16,
            ..StreamConfig::default()
        };
        let mut map = ChannelMap::new();
        map.define_channel("Density", 1, DataType::Float32).unwrap();
        config.seal(&mut map).unwrap();
        assert_eq!(map.structure_size(), 16);
    }
}
