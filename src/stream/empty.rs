use super::{adapt_default, check_buffer, require_sealed, ParticleStream, StreamError};
use crate::channel_map::ChannelMap;
use crate::states::StreamState;

/// A stream with zero particles that still negotiates layouts.
///
/// Stands in for a source that could not be opened so the rest of a
/// pipeline keeps working.
pub struct EmptyStream {
    state: StreamState,
    map: ChannelMap,
    native: ChannelMap,
    default_particle: Vec<u8>,
}

impl EmptyStream {
    pub fn new(map: ChannelMap) -> Self {
        Self::with_native(map.clone(), map)
    }

    /// Empty stream advertising `native` as what it could have produced.
    pub fn with_native(map: ChannelMap, native: ChannelMap) -> Self {
        let default_particle = map.new_particle();
        Self {
            state: StreamState::new("EmptyStream"),
            map,
            native,
            default_particle,
        }
    }
}

impl ParticleStream for EmptyStream {
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
        if *map != self.map {
            self.default_particle = adapt_default(&self.default_particle, &self.map, map);
            self.map = map.clone();
        }
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
        if self.state.begin_read()? {
            check_buffer(particle, &self.map)?;
            self.state.exhaust();
        }
        Ok(false)
    }

    fn particle_count(&self) -> i64 {
        0
    }

    fn particle_index(&self) -> i64 {
        -1
    }

    fn close(&mut self) {
        self.state.close();
    }
}
