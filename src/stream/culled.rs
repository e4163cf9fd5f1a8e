use super::decorator::DecoratorCore;
use super::{check_buffer, BoxedStream, ParticleStream, StreamError};
use crate::accessor::ConvertAccessor;
use crate::channel_map::ChannelMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Decides which particles survive a [`CulledStream`].
pub trait CullPredicate: Send {
    /// Channels the predicate reads. They are requested from upstream.
    fn required_channels(&self) -> Vec<String>;

    /// Called whenever the record layout changes, before any `keep`.
    fn bind(&mut self, map: &ChannelMap) -> Result<(), StreamError>;

    fn keep(&mut self, particle: &[u8]) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionMode {
    /// Keep particles whose weight is above the threshold.
    Hard { threshold: f32 },
    /// Keep each particle with probability equal to its weight.
    Soft { seed: u64 },
}

/// Culls on a scalar selection weight channel.
pub struct SelectionCull {
    channel: String,
    mode: SelectionMode,
    invert: bool,
    weight: Option<ConvertAccessor<f32>>,
    rng: StdRng,
}

impl SelectionCull {
    pub fn new(mode: SelectionMode) -> Self {
        Self::on_channel("Selection", mode)
    }

    pub fn on_channel(channel: &str, mode: SelectionMode) -> Self {
        let seed = match mode {
            SelectionMode::Soft { seed } => seed,
            SelectionMode::Hard { .. } => 0,
        };
        Self {
            channel: channel.to_string(),
            mode,
            invert: false,
            weight: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Keep the particles that would otherwise be culled.
    pub fn inverted(mut self) -> Self {
        self.invert = !self.invert;
        self
    }
}

impl CullPredicate for SelectionCull {
    fn required_channels(&self) -> Vec<String> {
        vec![self.channel.clone()]
    }

    fn bind(&mut self, map: &ChannelMap) -> Result<(), StreamError> {
        self.weight = Some(map.convert_accessor::<f32>(&self.channel)?);
        Ok(())
    }

    fn keep(&mut self, particle: &[u8]) -> bool {
        let weight = self.weight.map_or(0.0, |w| w.get(particle));
        let selected = match self.mode {
            SelectionMode::Hard { threshold } => weight > threshold,
            SelectionMode::Soft { .. } => self.rng.random::<f32>() < weight,
        };
        selected != self.invert
    }
}

/// Predicate from a closure over the record layout and record.
pub struct FnPredicate<F> {
    channels: Vec<String>,
    map: ChannelMap,
    f: F,
}

impl<F> FnPredicate<F>
where
    F: FnMut(&ChannelMap, &[u8]) -> bool + Send,
{
    pub fn new(channels: &[&str], f: F) -> Self {
        Self {
            channels: channels.iter().map(|c| c.to_string()).collect(),
            map: ChannelMap::empty(),
            f,
        }
    }
}

impl<F> CullPredicate for FnPredicate<F>
where
    F: FnMut(&ChannelMap, &[u8]) -> bool + Send,
{
    fn required_channels(&self) -> Vec<String> {
        self.channels.clone()
    }

    fn bind(&mut self, map: &ChannelMap) -> Result<(), StreamError> {
        self.map = map.clone();
        Ok(())
    }

    fn keep(&mut self, particle: &[u8]) -> bool {
        (self.f)(&self.map, particle)
    }
}

/// Drops particles the predicate rejects.
pub struct CulledStream<P> {
    core: DecoratorCore,
    predicate: P,
}

impl<P: CullPredicate> CulledStream<P> {
    pub fn new(upstream: BoxedStream, predicate: P) -> Result<Self, StreamError> {
        let native = upstream.native_channel_map().clone();
        let core = DecoratorCore::new("CulledStream", upstream, native);
        let mut stream = Self { core, predicate };
        let map = stream.core.map().clone();
        stream.negotiate(&map)?;
        Ok(stream)
    }

    fn negotiate(&mut self, map: &ChannelMap) -> Result<(), StreamError> {
        let names = self.predicate.required_channels();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let extra = self.core.required(&names)?;
        self.core.negotiate(map, &extra)?;
        self.predicate.bind(self.core.request())
    }
}

impl<P: CullPredicate> ParticleStream for CulledStream<P> {
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
        loop {
            if !self.core.pull()? {
                self.core.finish();
                return Ok(false);
            }
            if self.predicate.keep(self.core.record()) {
                self.core.emit(particle);
                return Ok(true);
            }
        }
    }

    fn particle_count(&self) -> i64 {
        match self.core.upstream().particle_count() {
            0 => 0,
            _ => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::stream::{GeneratorStream, ParticleArray};

    fn weights(values: &'static [f32]) -> BoxedStream {
        let map = ChannelMap::from_channels(&[
            ("Index", 1, DataType::Int32),
            ("Selection", 1, DataType::Float32),
        ])
        .unwrap();
        let index = map.accessor::<i32>("Index").unwrap();
        let weight = map.accessor::<f32>("Selection").unwrap();
        Box::new(
            GeneratorStream::new(map, move |i, _, r| {
                let Some(&w) = values.get(i as usize) else {
                    return false;
                };
                index.set(r, i as i32);
                weight.set(r, w);
                true
            })
            .with_count(values.len() as u64),
        )
    }

    #[test]
    fn hard_selection_keeps_selected() {
        let mut stream = CulledStream::new(
            weights(&[0.0, 1.0, 0.2, 0.0, 0.7]),
            SelectionCull::new(SelectionMode::Hard { threshold: 0.5 }),
        )
        .unwrap();
        assert_eq!(stream.particle_count(), -1);
        let array = ParticleArray::from_stream(&mut stream).unwrap();
        let index = array.channel_map().accessor::<i32>("Index").unwrap();
        let kept: Vec<i32> = array.iter().map(|r| index.get(r)).collect();
        assert_eq!(kept, vec![1, 4]);
    }

    #[test]
    fn inverted_and_closure_predicates() {
        let mut stream = CulledStream::new(
            weights(&[0.0, 1.0, 0.0]),
            SelectionCull::new(SelectionMode::Hard { threshold: 0.5 }).inverted(),
        )
        .unwrap();
        assert_eq!(ParticleArray::from_stream(&mut stream).unwrap().len(), 2);

        let predicate = FnPredicate::new(&["Index"], |map, r| {
            map.accessor::<i32>("Index").map_or(false, |a| a.get(r) % 2 == 0)
        });
        let mut stream = CulledStream::new(weights(&[0.0; 5]), predicate).unwrap();
        assert_eq!(ParticleArray::from_stream(&mut stream).unwrap().len(), 3);
    }

    #[test]
    fn narrowed_output_still_reads_selection() {
        let mut stream = CulledStream::new(
            weights(&[1.0, 0.0, 1.0]),
            SelectionCull::new(SelectionMode::Hard { threshold: 0.5 }),
        )
        .unwrap();
        let narrow = ChannelMap::from_channels(&[("Index", 1, DataType::Int32)]).unwrap();
        stream.set_channel_map(&narrow).unwrap();
        assert_eq!(ParticleArray::from_stream(&mut stream).unwrap().len(), 2);
    }

    #[test]
    fn missing_selection_fails_at_construction() {
        let map = ChannelMap::from_channels(&[("Index", 1, DataType::Int32)]).unwrap();
        let source: BoxedStream = Box::new(ParticleArray::new(map).into_stream());
        let result = CulledStream::new(
            source,
            SelectionCull::new(SelectionMode::Hard { threshold: 0.0 }),
        );
        assert!(matches!(result, Err(StreamError::MissingChannel { .. })));
    }
}
