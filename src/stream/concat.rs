use super::{check_buffer, require_sealed, BoxedStream, EmptyStream, ParticleStream, StreamError};
use crate::channel_map::ChannelMap;
use crate::invariant_ppt::{assert_invariant, CONCAT_COUNT_LAW};
use crate::states::StreamState;
use log::{debug, trace, warn};

/// Reads each upstream to exhaustion, in order.
///
/// All upstreams share one output layout. The native map is the
/// intersection of the upstream native maps: only channels every source
/// produces are native to the sequence.
pub struct ConcatenatedStream {
    state: StreamState,
    streams: Vec<BoxedStream>,
    current: usize,
    map: ChannelMap,
    native: ChannelMap,
    default_particle: Vec<u8>,
    index: i64,
}

impl ConcatenatedStream {
    pub fn new(streams: Vec<BoxedStream>) -> Result<Self, StreamError> {
        let mut native: Option<ChannelMap> = None;
        for stream in &streams {
            native = Some(match native {
                None => stream.native_channel_map().clone(),
                Some(acc) => acc.intersection(stream.native_channel_map())?,
            });
        }
        let native = native.unwrap_or_else(ChannelMap::empty);
        let map = streams
            .first()
            .map(|s| s.channel_map().clone())
            .unwrap_or_else(ChannelMap::empty);
        let default_particle = streams
            .first()
            .map(|s| s.default_particle().to_vec())
            .unwrap_or_default();

        let mut concat = Self {
            state: StreamState::new("ConcatenatedStream"),
            streams,
            current: 0,
            map,
            native,
            default_particle,
            index: -1,
        };
        let map = concat.map.clone();
        for stream in concat.streams.iter_mut().skip(1) {
            stream.set_channel_map(&map)?;
        }
        let default_particle = concat.default_particle.clone();
        for stream in concat.streams.iter_mut().skip(1) {
            stream.set_default_particle(&default_particle)?;
        }

        let count = concat.particle_count();
        let unknown = concat.streams.iter().any(|s| s.particle_count() < 0);
        assert_invariant(
            CONCAT_COUNT_LAW,
            (count < 0) == unknown,
            "concatenated count is the sum, or unknown if any part is",
            None,
        );
        debug!(
            "{}: {} upstreams, native {}",
            concat.state.name(),
            concat.streams.len(),
            concat.native
        );
        Ok(concat)
    }
}

/// Concatenates every source that opened. A source that failed is replaced
/// by an [`EmptyStream`] in `map` and logged, so one bad producer does not
/// take the whole aggregate down.
pub fn concat_or_empty(
    sources: Vec<Result<BoxedStream, StreamError>>,
    map: &ChannelMap,
) -> Result<ConcatenatedStream, StreamError> {
    require_sealed(map)?;
    let streams = sources
        .into_iter()
        .enumerate()
        .map(|(i, source)| match source {
            Ok(stream) => stream,
            Err(err) => {
                warn!("particle source {} failed, using an empty stream: {}", i, err);
                Box::new(EmptyStream::new(map.clone())) as BoxedStream
            }
        })
        .collect();
    let mut concat = ConcatenatedStream::new(streams)?;
    concat.set_channel_map(map)?;
    Ok(concat)
}

impl ParticleStream for ConcatenatedStream {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn channel_map(&self) -> &ChannelMap {
        &self.map
    }

    fn native_channel_map(&self) -> &ChannelMap {
        &self.native
    }

    fn set_channel_map(&mut self, map: &ChannelMap) -> Result<(), StreamError> {
        require_sealed(map)?;
        if *map == self.map {
            return Ok(());
        }
        for stream in &mut self.streams {
            stream.set_channel_map(map)?;
        }
        self.default_particle = match self.streams.first() {
            Some(first) => first.default_particle().to_vec(),
            None => map.new_particle(),
        };
        self.map = map.clone();
        Ok(())
    }

    fn default_particle(&self) -> &[u8] {
        &self.default_particle
    }

    fn set_default_particle(&mut self, particle: &[u8]) -> Result<(), StreamError> {
        check_buffer(particle, &self.map)?;
        for stream in &mut self.streams {
            stream.set_default_particle(particle)?;
        }
        self.default_particle.copy_from_slice(particle);
        Ok(())
    }

    fn get_particle(&mut self, particle: &mut [u8]) -> Result<bool, StreamError> {
        if !self.state.begin_read()? {
            return Ok(false);
        }
        check_buffer(particle, &self.map)?;
        while let Some(stream) = self.streams.get_mut(self.current) {
            if stream.get_particle(particle)? {
                self.index += 1;
                return Ok(true);
            }
            trace!(
                "{}: upstream {} exhausted",
                self.state.name(),
                self.current
            );
            self.current += 1;
        }
        self.state.exhaust();
        Ok(false)
    }

    fn particle_count(&self) -> i64 {
        let mut total = 0;
        for stream in &self.streams {
            let count = stream.particle_count();
            if count < 0 {
                return -1;
            }
            total += count;
        }
        total
    }

    fn particle_index(&self) -> i64 {
        self.index
    }

    fn close(&mut self) {
        if self.state.close() {
            for stream in &mut self.streams {
                stream.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::stream::{EmptyStream, GeneratorStream, ParticleArray};

    fn source(channels: &[(&str, usize, DataType)], n: u64) -> BoxedStream {
        let map = ChannelMap::from_channels(channels).unwrap();
        Box::new(GeneratorStream::new(map, |_, _, _| true).with_count(n))
    }

    #[test]
    fn counts_sum_and_native_intersects() {
        let a = source(
            &[("Position", 3, DataType::Float32), ("Color", 3, DataType::Float32)],
            3,
        );
        let b = source(&[("Position", 3, DataType::Float32)], 2);
        let mut concat = ConcatenatedStream::new(vec![a, b]).unwrap();
        assert_eq!(concat.particle_count(), 5);
        assert_eq!(concat.native_channel_map().names().collect::<Vec<_>>(), vec!["Position"]);
        assert_eq!(concat.channel_map().len(), 2);
        assert_eq!(ParticleArray::from_stream(&mut concat).unwrap().len(), 5);
        assert_eq!(concat.particle_index(), 4);
    }

    #[test]
    fn unknown_count_propagates() {
        let map = ChannelMap::from_channels(&[("Position", 3, DataType::Float32)]).unwrap();
        let unknown: BoxedStream = Box::new(GeneratorStream::new(map.clone(), |i, _, _| i < 1));
        let empty: BoxedStream = Box::new(EmptyStream::new(map));
        let concat = ConcatenatedStream::new(vec![empty, unknown]).unwrap();
        assert_eq!(concat.particle_count(), -1);
    }

    #[test]
    fn failed_sources_become_empty() {
        let map = ChannelMap::from_channels(&[("Position", 3, DataType::Float32)]).unwrap();
        let sources = vec![
            Err(StreamError::MissingChannel {
                channel: "Position".to_string(),
                stream: "missing.prt".to_string(),
            }),
            Ok(source(&[("Position", 3, DataType::Float32)], 4)),
            Err(StreamError::Closed("broken".to_string())),
        ];
        let mut concat = concat_or_empty(sources, &map).unwrap();
        assert_eq!(concat.particle_count(), 4);
        assert_eq!(concat.channel_map(), &map);
        assert_eq!(ParticleArray::from_stream(&mut concat).unwrap().len(), 4);

        let mut none = concat_or_empty(Vec::new(), &map).unwrap();
        assert_eq!(none.particle_count(), 0);
        assert!(ParticleArray::from_stream(&mut none).unwrap().is_empty());
    }
}
