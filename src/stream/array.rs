use super::{adapt_default, check_buffer, require_sealed, ParticleStream, StreamError};
use crate::channel_map::{ChannelMap, ChannelMapAdaptor};
use crate::control::{CancelCheck, CancelToken};
use crate::states::StreamState;
use log::{debug, trace};

/// Contiguous in-memory particle records sharing one layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleArray {
    map: ChannelMap,
    data: Vec<u8>,
}

impl ParticleArray {
    pub fn new(map: ChannelMap) -> Self {
        Self {
            map,
            data: Vec::new(),
        }
    }

    pub fn with_capacity(map: ChannelMap, particles: usize) -> Self {
        let data = Vec::with_capacity(particles * map.structure_size());
        Self { map, data }
    }

    /// Drains `stream` in its current layout. The stream is left exhausted
    /// but not closed.
    pub fn from_stream(stream: &mut dyn ParticleStream) -> Result<Self, StreamError> {
        let map = stream.channel_map().clone();
        let hint = stream.particle_count().max(0) as usize;
        let mut array = Self::with_capacity(map, hint);
        let mut record = array.map.new_particle();
        while stream.get_particle(&mut record)? {
            array.data.extend_from_slice(&record);
        }
        debug!(
            "cached {} particles from \"{}\"",
            array.len(),
            stream.name()
        );
        Ok(array)
    }

    pub fn channel_map(&self) -> &ChannelMap {
        &self.map
    }

    pub fn len(&self) -> usize {
        match self.map.structure_size() {
            0 => 0,
            size => self.data.len() / size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Appends one record; its length must match the layout.
    pub fn push(&mut self, record: &[u8]) -> Result<(), StreamError> {
        check_buffer(record, &self.map)?;
        self.data.extend_from_slice(record);
        Ok(())
    }

    /// Appends a zeroed record and lets `fill` write it.
    pub fn push_with(&mut self, fill: impl FnOnce(&ChannelMap, &mut [u8])) {
        let start = self.data.len();
        self.data.resize(start + self.map.structure_size(), 0);
        fill(&self.map, &mut self.data[start..]);
    }

    pub fn particle(&self, index: usize) -> &[u8] {
        let size = self.map.structure_size();
        &self.data[index * size..(index + 1) * size]
    }

    pub fn particle_mut(&mut self, index: usize) -> &mut [u8] {
        let size = self.map.structure_size();
        &mut self.data[index * size..(index + 1) * size]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        let size = self.map.structure_size().max(1);
        self.data.chunks_exact(size)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_stream(self) -> ArrayParticleStream {
        ArrayParticleStream::new(self)
    }
}

/// Replays a [`ParticleArray`] as a stream.
pub struct ArrayParticleStream {
    state: StreamState,
    array: ParticleArray,
    map: ChannelMap,
    default_particle: Vec<u8>,
    adaptor: ChannelMapAdaptor,
    cursor: usize,
    cancel: Option<CancelCheck>,
}

impl ArrayParticleStream {
    pub fn new(array: ParticleArray) -> Self {
        let map = array.channel_map().clone();
        let adaptor = ChannelMapAdaptor::new(&map, &map);
        Self {
            state: StreamState::new("ArrayParticleStream"),
            default_particle: map.new_particle(),
            map,
            array,
            adaptor,
            cursor: 0,
            cancel: None,
        }
    }

    /// Polls `token` every `interval` particles.
    pub fn with_cancel(mut self, token: CancelToken, interval: usize) -> Self {
        self.cancel = Some(CancelCheck::new(token, interval));
        self
    }

    pub fn array(&self) -> &ParticleArray {
        &self.array
    }
}

impl ParticleStream for ArrayParticleStream {
    fn name(&self) -> &str {
        self.state.name()
    }

    fn channel_map(&self) -> &ChannelMap {
        &self.map
    }

    fn native_channel_map(&self) -> &ChannelMap {
        self.array.channel_map()
    }

    fn set_channel_map(&mut self, map: &ChannelMap) -> Result<(), StreamError> {
        require_sealed(map)?;
        if *map == self.map {
            return Ok(());
        }
        self.default_particle = adapt_default(&self.default_particle, &self.map, map);
        self.map = map.clone();
        self.adaptor = ChannelMapAdaptor::new(&self.map, self.array.channel_map());
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
        if self.cursor >= self.array.len() {
            trace!("{}: replayed {} particles", self.state.name(), self.cursor);
            self.state.exhaust();
            return Ok(false);
        }
        if !self.adaptor.is_identity() {
            particle.copy_from_slice(&self.default_particle);
        }
        self.adaptor
            .copy_structure(particle, self.array.particle(self.cursor));
        self.cursor += 1;
        Ok(true)
    }

    fn particle_count(&self) -> i64 {
        self.array.len() as i64
    }

    fn particle_index(&self) -> i64 {
        self.cursor as i64 - 1
    }

    fn close(&mut self) {
        self.state.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use glam::Vec3;

    fn positions(n: usize) -> ParticleArray {
        let map = ChannelMap::from_channels(&[("Position", 3, DataType::Float32)]).unwrap();
        let pos = map.accessor::<Vec3>("Position").unwrap();
        let mut array = ParticleArray::new(map);
        for i in 0..n {
            array.push_with(|_, r| pos.set(r, Vec3::splat(i as f32)));
        }
        array
    }

    #[test]
    fn replays_in_order_and_reports_counts() {
        let mut stream = positions(3).into_stream();
        assert_eq!(stream.particle_count(), 3);
        assert_eq!(stream.particle_index(), -1);
        let mut record = stream.channel_map().new_particle();
        assert!(stream.get_particle(&mut record).unwrap());
        assert_eq!(stream.particle_index(), 0);
        assert_eq!(stream.particle_count_left(), 2);

        let copy = ParticleArray::from_stream(&mut stream).unwrap();
        assert_eq!(copy.len(), 2);
        assert!(!stream.get_particle(&mut record).unwrap());
    }

    #[test]
    fn wider_layout_uses_defaults() {
        let mut stream = positions(1).into_stream();
        let wider = ChannelMap::from_channels(&[
            ("Density", 1, DataType::Float32),
            ("Position", 3, DataType::Float32),
        ])
        .unwrap();
        stream.set_channel_map(&wider).unwrap();
        let density = wider.accessor::<f32>("Density").unwrap();
        let mut default_particle = wider.new_particle();
        density.set(&mut default_particle, 2.0);
        stream.set_default_particle(&default_particle).unwrap();

        let mut record = wider.new_particle();
        assert!(stream.get_particle(&mut record).unwrap());
        assert_eq!(density.get(&record), 2.0);
        assert_eq!(
            wider.accessor::<Vec3>("Position").unwrap().get(&record),
            Vec3::ZERO
        );
    }

    #[test]
    fn cancellation_is_reported() {
        let token = CancelToken::new();
        let mut stream = positions(10).into_stream().with_cancel(token.clone(), 2);
        let mut record = stream.channel_map().new_particle();
        assert!(stream.get_particle(&mut record).unwrap());
        token.cancel();
        assert!(matches!(
            stream.get_particle(&mut record),
            Err(StreamError::Cancelled(_))
        ));
    }
}
