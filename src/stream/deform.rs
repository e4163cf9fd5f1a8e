use super::decorator::DecoratorCore;
use super::{check_buffer, BoxedStream, ParticleStream, StreamError};
use crate::accessor::ConvertAccessor;
use crate::channel_map::ChannelMap;
use glam::Vec3;
use log::debug;

/// Moves many positions at once.
pub trait Deformer: Send {
    fn deform(&mut self, positions: &mut [Vec3]);
}

impl<F> Deformer for F
where
    F: FnMut(&mut [Vec3]) + Send,
{
    fn deform(&mut self, positions: &mut [Vec3]) {
        self(positions)
    }
}

/// Buffers particles and hands their positions to a [`Deformer`] in
/// batches. A batch size of `None` buffers the whole upstream.
pub struct DeformedStream<D> {
    core: DecoratorCore,
    deformer: D,
    batch_size: Option<usize>,
    position: Option<ConvertAccessor<Vec3>>,
    batch: Vec<u8>,
    positions: Vec<Vec3>,
    cursor: usize,
    upstream_done: bool,
}

impl<D: Deformer> DeformedStream<D> {
    pub fn new(upstream: BoxedStream, deformer: D, batch_size: Option<usize>) -> Result<Self, StreamError> {
        let native = upstream.native_channel_map().clone();
        let core = DecoratorCore::new("DeformedStream", upstream, native);
        let mut stream = Self {
            core,
            deformer,
            batch_size: batch_size.map(|n| n.max(1)),
            position: None,
            batch: Vec::new(),
            positions: Vec::new(),
            cursor: 0,
            upstream_done: false,
        };
        let map = stream.core.map().clone();
        stream.negotiate(&map)?;
        debug!("{}: batch size {:?}", stream.core.name(), stream.batch_size);
        Ok(stream)
    }

    fn negotiate(&mut self, map: &ChannelMap) -> Result<(), StreamError> {
        let extra = self.core.required(&["Position"])?;
        self.core.negotiate(map, &extra)?;
        self.position = Some(self.core.request().convert_accessor::<Vec3>("Position")?);
        Ok(())
    }

    fn buffered(&self) -> usize {
        self.positions.len()
    }

    /// Pulls the next batch, deforms it and writes positions back.
    fn refill(&mut self) -> Result<(), StreamError> {
        let size = self.core.request().structure_size();
        self.batch.clear();
        self.positions.clear();
        self.cursor = 0;
        let Some(position) = self.position else {
            return Ok(());
        };
        while self.batch_size.map_or(true, |n| self.positions.len() < n) {
            if !self.core.pull()? {
                self.upstream_done = true;
                break;
            }
            let record = self.core.record();
            self.positions.push(position.get(record));
            self.batch.extend_from_slice(record);
        }
        if !self.positions.is_empty() {
            self.deformer.deform(&mut self.positions);
            for (record, &p) in self.batch.chunks_exact_mut(size.max(1)).zip(&self.positions) {
                position.set(record, p);
            }
        }
        Ok(())
    }
}

impl<D: Deformer> ParticleStream for DeformedStream<D> {
    forward_to_core!();

    fn set_channel_map(&mut self, map: &ChannelMap) -> Result<(), StreamError> {
        if map == self.core.map() {
            return Ok(());
        }
        let old_request = self.core.request().clone();
        self.negotiate(map)?;
        if self.cursor < self.buffered() && *self.core.request() != old_request {
            // Re-lay the records still waiting to be emitted.
            let new_request = self.core.request().clone();
            let old_size = old_request.structure_size().max(1);
            let mut relaid = Vec::with_capacity(self.buffered() * new_request.structure_size());
            let template = self.core.upstream().default_particle().to_vec();
            for record in self.batch.chunks_exact(old_size) {
                let start = relaid.len();
                relaid.extend_from_slice(&template);
                new_request.copy_structure(&mut relaid[start..], record, &old_request);
            }
            self.batch = relaid;
        }
        Ok(())
    }

    fn get_particle(&mut self, particle: &mut [u8]) -> Result<bool, StreamError> {
        if !self.core.begin()? {
            return Ok(false);
        }
        check_buffer(particle, self.core.map())?;
        if self.cursor >= self.buffered() {
            if self.upstream_done {
                self.core.finish();
                return Ok(false);
            }
            self.refill()?;
            if self.buffered() == 0 {
                self.core.finish();
                return Ok(false);
            }
        }
        let size = self.core.request().structure_size();
        let start = self.cursor * size;
        self.core.emit_from(&self.batch[start..start + size], particle);
        self.cursor += 1;
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

    fn line(n: u64) -> BoxedStream {
        let map = ChannelMap::from_channels(&[("Position", 3, DataType::Float32)]).unwrap();
        let pos = map.accessor::<Vec3>("Position").unwrap();
        Box::new(
            GeneratorStream::new(map, move |i, _, r| {
                pos.set(r, Vec3::new(i as f32, 0.0, 0.0));
                true
            })
            .with_count(n),
        )
    }

    #[test]
    fn batches_see_whole_groups() {
        let sizes = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = sizes.clone();
        let deformer = move |positions: &mut [Vec3]| {
            seen.lock().unwrap().push(positions.len());
            for p in positions.iter_mut() {
                p.y = 1.0;
            }
        };
        let mut stream = DeformedStream::new(line(7), deformer, Some(3)).unwrap();
        let array = ParticleArray::from_stream(&mut stream).unwrap();
        assert_eq!(*sizes.lock().unwrap(), vec![3, 3, 1]);

        let pos = array.channel_map().accessor::<Vec3>("Position").unwrap();
        let xs: Vec<f32> = array.iter().map(|r| pos.get(r).x).collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(array.iter().all(|r| pos.get(r).y == 1.0));
    }

    #[test]
    fn whole_stream_mode() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let deformer = move |positions: &mut [Vec3]| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            assert_eq!(positions.len(), 10);
        };
        let mut stream = DeformedStream::new(line(10), deformer, None).unwrap();
        assert_eq!(ParticleArray::from_stream(&mut stream).unwrap().len(), 10);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
