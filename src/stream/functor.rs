use super::decorator::DecoratorCore;
use super::{check_buffer, BoxedStream, ParticleStream, StreamError};
use crate::channel_map::ChannelMap;

/// Applies a closure to every record.
///
/// The closure sees the record in a layout that contains the channels it
/// declared it reads plus the channels it produces. Produced channels are
/// added to the native and default output maps.
pub struct FunctorStream<F> {
    core: DecoratorCore,
    reads: Vec<String>,
    produces: ChannelMap,
    f: F,
}

impl<F> FunctorStream<F>
where
    F: FnMut(&ChannelMap, &mut [u8]) + Send,
{
    pub fn new(
        upstream: BoxedStream,
        reads: &[&str],
        produces: ChannelMap,
        f: F,
    ) -> Result<Self, StreamError> {
        let native = upstream.native_channel_map().union(&produces)?;
        let map = upstream.channel_map().union(&produces)?;
        let core = DecoratorCore::new("FunctorStream", upstream, native);
        let mut stream = Self {
            core,
            reads: reads.iter().map(|r| r.to_string()).collect(),
            produces,
            f,
        };
        stream.negotiate(&map)?;
        Ok(stream)
    }

    fn negotiate(&mut self, map: &ChannelMap) -> Result<(), StreamError> {
        let reads: Vec<&str> = self.reads.iter().map(String::as_str).collect();
        let extra = self.core.required(&reads)?.union(&self.produces)?;
        self.core.negotiate(map, &extra)
    }
}

impl<F> ParticleStream for FunctorStream<F>
where
    F: FnMut(&ChannelMap, &mut [u8]) + Send,
{
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
        let (map, record) = self.core.parts();
        (self.f)(map, record);
        self.core.emit(particle);
        Ok(true)
    }

    fn particle_count(&self) -> i64 {
        self.core.upstream().particle_count()
    }
}
