use super::decorator::DecoratorCore;
use super::{check_buffer, BoxedStream, ParticleStream, StreamError};
use crate::accessor::{ChannelValue, RawAccessor, Scalar};
use crate::channel_map::{ChannelError, ChannelMap};
use crate::data_type::DataType;

/// Writes one constant value into a channel of every particle.
///
/// The channel becomes part of both the native and the default output map.
pub struct SetChannelStream {
    core: DecoratorCore,
    channel: String,
    data_type: DataType,
    value: Vec<f64>,
    accessor: Option<RawAccessor>,
}

impl SetChannelStream {
    pub fn new<T: ChannelValue>(upstream: BoxedStream, channel: &str, value: T) -> Result<Self, StreamError> {
        let components = (0..T::ARITY).map(|i| value.component(i).to_f64()).collect();
        Self::with_components(
            upstream,
            channel,
            <T::Scalar as Scalar>::DATA_TYPE,
            components,
        )
    }

    /// Constant given as f64 components stored as `data_type`.
    pub fn with_components(
        upstream: BoxedStream,
        channel: &str,
        data_type: DataType,
        value: Vec<f64>,
    ) -> Result<Self, StreamError> {
        let own = ChannelMap::from_channels(&[(channel, value.len(), data_type)])?;
        let native = upstream.native_channel_map().union(&own)?;
        let map = upstream.channel_map().union(&own)?;
        let core = DecoratorCore::new("SetChannelStream", upstream, native);
        let mut stream = Self {
            core,
            channel: channel.to_string(),
            data_type,
            value,
            accessor: None,
        };
        stream.negotiate(&map)?;
        Ok(stream)
    }

    fn negotiate(&mut self, map: &ChannelMap) -> Result<(), StreamError> {
        self.core.negotiate(map, &ChannelMap::empty())?;
        self.accessor = None;
        if let Ok(channel) = map.channel(&self.channel) {
            if channel.arity() != self.value.len() {
                return Err(ChannelError::TypeMismatch {
                    channel: self.channel.clone(),
                    expected: self.data_type,
                    expected_arity: self.value.len(),
                    found: channel.data_type(),
                    found_arity: channel.arity(),
                }
                .into());
            }
            self.accessor = Some(self.core.request().raw_accessor(&self.channel)?);
        }
        Ok(())
    }
}

impl ParticleStream for SetChannelStream {
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
        if let Some(accessor) = self.accessor {
            let record = self.core.record_mut();
            for (i, &v) in self.value.iter().enumerate() {
                accessor.write(record, i, v);
            }
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
    use crate::stream::{GeneratorStream, ParticleArray};
    use glam::Vec3;

    #[test]
    fn constant_reaches_every_particle() {
        let map = ChannelMap::from_channels(&[("Position", 3, DataType::Float32)]).unwrap();
        let source: BoxedStream = Box::new(GeneratorStream::new(map, |_, _, _| true).with_count(3));
        let mut stream = SetChannelStream::new(source, "Color", Vec3::new(1.0, 0.5, 0.25)).unwrap();
        assert!(stream.native_channel_map().has_channel("Color"));

        let array = ParticleArray::from_stream(&mut stream).unwrap();
        let color = array.channel_map().accessor::<Vec3>("Color").unwrap();
        assert_eq!(array.len(), 3);
        assert!(array.iter().all(|r| color.get(r) == Vec3::new(1.0, 0.5, 0.25)));
    }

    #[test]
    fn omitted_channel_is_not_written() {
        let map = ChannelMap::from_channels(&[("Position", 3, DataType::Float32)]).unwrap();
        let source: BoxedStream = Box::new(GeneratorStream::new(map.clone(), |_, _, _| true).with_count(1));
        let mut stream = SetChannelStream::new(source, "Density", 2.0f32).unwrap();
        stream.set_channel_map(&map).unwrap();
        let mut record = map.new_particle();
        assert!(stream.get_particle(&mut record).unwrap());
    }
}
