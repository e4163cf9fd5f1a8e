use super::decorator::DecoratorCore;
use super::{check_buffer, BoxedStream, ParticleStream, StreamError};
use crate::accessor::RawAccessor;
use crate::channel_map::ChannelMap;
use log::debug;

/// Multiplies the `Density` channel by a constant.
///
/// Streams without `Density` in their output map pass through untouched.
/// Used after sampling to restore total density, and for per-object
/// visibility.
pub struct DensityScaleStream {
    core: DecoratorCore,
    scale: f64,
    density: Option<RawAccessor>,
}

impl DensityScaleStream {
    pub fn new(upstream: BoxedStream, scale: f64) -> Result<Self, StreamError> {
        let native = upstream.native_channel_map().clone();
        let core = DecoratorCore::new("DensityScaleStream", upstream, native);
        let mut stream = Self {
            core,
            scale,
            density: None,
        };
        let map = stream.core.map().clone();
        stream.negotiate(&map)?;
        debug!("{}: scaling Density by {}", stream.core.name(), scale);
        Ok(stream)
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    fn negotiate(&mut self, map: &ChannelMap) -> Result<(), StreamError> {
        self.core.negotiate(map, &ChannelMap::empty())?;
        self.density = if map.has_channel("Density") {
            Some(self.core.request().raw_accessor("Density")?)
        } else {
            None
        };
        Ok(())
    }
}

impl ParticleStream for DensityScaleStream {
    forward_to_core!();

    fn set_channel_map(&mut self, map: &ChannelMap) -> Result<(), StreamError> {
        if map == self.core.map() {
            return Ok(());
        }
        self.negotiate(map)
    }

    fn get_particle(&mut self, particle: &mut [u8]) -> Result<bool, StreamError> {
        if !self.core.begin()? {
            return Ok(false);
        }
        check_buffer(particle, self.core.map())?;
        if !self.core.pull()? {
            self.core.finish();
            return Ok(false);
        }
        if let Some(density) = self.density {
            density.scale(self.core.record_mut(), self.scale);
        }
        self.core.emit(particle);
        Ok(true)
    }

    fn particle_count(&self) -> i64 {
        self.core.upstream().particle_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::stream::{GeneratorStream, ParticleArray};

    fn source(channels: &[(&str, usize, DataType)]) -> BoxedStream {
        let map = ChannelMap::from_channels(channels).unwrap();
        let density = map.raw_accessor("Density").ok();
        Box::new(
            GeneratorStream::new(map, move |i, _, r| {
                if let Some(density) = density {
                    density.write(r, 0, 1.0 + i as f64);
                }
                true
            })
            .with_count(3),
        )
    }

    #[test]
    fn density_is_multiplied() {
        let upstream = source(&[
            ("Position", 3, DataType::Float32),
            ("Density", 1, DataType::Float16),
        ]);
        let mut stream = DensityScaleStream::new(upstream, 0.5).unwrap();
        assert_eq!(stream.particle_count(), 3);
        let array = ParticleArray::from_stream(&mut stream).unwrap();
        let density = array.channel_map().convert_accessor::<f32>("Density").unwrap();
        assert_eq!(
            array.iter().map(|r| density.get(r)).collect::<Vec<_>>(),
            vec![0.5, 1.0, 1.5]
        );
    }

    #[test]
    fn streams_without_density_pass_through() {
        let upstream = source(&[("Position", 3, DataType::Float32)]);
        let mut stream = DensityScaleStream::new(upstream, 4.0).unwrap();
        assert!(!stream.channel_map().has_channel("Density"));
        assert_eq!(ParticleArray::from_stream(&mut stream).unwrap().len(), 3);
    }
}
