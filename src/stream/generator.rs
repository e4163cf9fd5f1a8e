use super::{adapt_default, check_buffer, require_sealed, ParticleStream, StreamError};
use crate::channel_map::{ChannelMap, ChannelMapAdaptor};
use crate::control::{CancelCheck, CancelToken};
use crate::states::StreamState;
use log::trace;

/// Procedural source: a closure fills native-layout records on demand.
///
/// The closure receives the particle index and a zeroed record in the
/// native layout and returns false when it has nothing more to produce.
pub struct GeneratorStream<F> {
    state: StreamState,
    native: ChannelMap,
    map: ChannelMap,
    default_particle: Vec<u8>,
    adaptor: ChannelMapAdaptor,
    scratch: Vec<u8>,
    generate: F,
    count: Option<i64>,
    index: i64,
    cancel: Option<CancelCheck>,
}

impl<F> GeneratorStream<F>
where
    F: FnMut(i64, &ChannelMap, &mut [u8]) -> bool,
{
    pub fn new(native: ChannelMap, generate: F) -> Self {
        Self {
            state: StreamState::new("GeneratorStream"),
            map: native.clone(),
            default_particle: native.new_particle(),
            adaptor: ChannelMapAdaptor::new(&native, &native),
            scratch: native.new_particle(),
            native,
            generate,
            count: None,
            index: -1,
            cancel: None,
        }
    }

    /// Advertises exactly `count` particles; generation stops there.
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count as i64);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken, interval: usize) -> Self {
        self.cancel = Some(CancelCheck::new(token, interval));
        self
    }
}

impl<F> ParticleStream for GeneratorStream<F>
where
    F: FnMut(i64, &ChannelMap, &mut [u8]) -> bool,
{
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
        self.default_particle = adapt_default(&self.default_particle, &self.map, map);
        self.map = map.clone();
        self.adaptor = ChannelMapAdaptor::new(&self.map, &self.native);
        Ok(())
    }

    fn default_particle(&self) -> &[u8] {
        &self.default_particle
    }

    fn set_default_particle(&mut self, particle: &[u8]) -> Result<(), StreamError> {
        check_buffer(particle, &self.map)?;
        self.default_particle.copy_from_slice(particle);
        Ok(())
    }

    fn get_particle(&mut self, particle: &mut [u8]) -> Result<bool, StreamError> {
        if !self.state.begin_read()? {
            return Ok(false);
        }
        check_buffer(particle, &self.map)?;
        if let Some(check) = self.cancel.as_mut() {
            if check.tick() {
                return Err(self.state.cancel());
            }
        }
        let next = self.index + 1;
        let within_count = self.count.map_or(true, |count| next < count);
        self.scratch.fill(0);
        if !within_count || !(self.generate)(next, &self.native, &mut self.scratch) {
            trace!("{}: generated {} particles", self.state.name(), next);
            self.state.exhaust();
            return Ok(false);
        }
        if !self.adaptor.is_identity() {
            particle.copy_from_slice(&self.default_particle);
        }
        self.adaptor.copy_structure(particle, &self.scratch);
        self.index = next;
        Ok(true)
    }

    fn particle_count(&self) -> i64 {
        self.count.unwrap_or(-1)
    }

    fn particle_index(&self) -> i64 {
        self.index
    }

    fn close(&mut self) {
        self.state.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;

    #[test]
    fn stops_at_advertised_count() {
        let map = ChannelMap::from_channels(&[("Index", 1, DataType::Int32)]).unwrap();
        let index = map.accessor::<i32>("Index").unwrap();
        let mut stream = GeneratorStream::new(map.clone(), move |i, _, r| {
            index.set(r, i as i32);
            true
        })
        .with_count(4);
        let mut record = map.new_particle();
        let mut seen = Vec::new();
        while stream.get_particle(&mut record).unwrap() {
            seen.push(index.get(&record));
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(stream.particle_count_left(), 0);
    }

    #[test]
    fn unknown_count_until_closure_ends() {
        let map = ChannelMap::from_channels(&[("Index", 1, DataType::Int32)]).unwrap();
        let mut stream = GeneratorStream::new(map.clone(), |i, _, _| i < 2);
        assert_eq!(stream.particle_count(), -1);
        assert_eq!(stream.particle_count_left(), -1);
        let mut record = map.new_particle();
        assert!(stream.get_particle(&mut record).unwrap());
        assert!(stream.get_particle(&mut record).unwrap());
        assert!(!stream.get_particle(&mut record).unwrap());
    }

    #[test]
    fn cancel_stays_cancelled() {
        let map = ChannelMap::from_channels(&[("Index", 1, DataType::Int32)]).unwrap();
        let token = CancelToken::new();
        let mut stream = GeneratorStream::new(map.clone(), |_, _, _| true).with_cancel(token.clone(), 2);
        let mut record = map.new_particle();
        assert!(stream.get_particle(&mut record).unwrap());
        token.cancel();
        for _ in 0..6 {
            assert!(matches!(
                stream.get_particle(&mut record),
                Err(StreamError::Cancelled(_))
            ));
        }
        let mut buffer = vec![0u8; map.structure_size() * 4];
        let mut count = 4;
        assert!(matches!(
            stream.get_particles(&mut buffer, &mut count),
            Err(StreamError::Cancelled(_))
        ));
    }
}
