//! Drain helpers: pull a stream to exhaustion in batches and check the
//! stream contract along the way.

use crate::control::{CancelToken, ProgressReporter};
use crate::stream::{ParticleArray, ParticleStream, StreamError};
use log::trace;

/// Reads every particle in batches of `batch` records.
pub fn drain(stream: &mut dyn ParticleStream, batch: usize) -> Result<ParticleArray, StreamError> {
    let mut progress = crate::control::NullProgress;
    drain_with_progress(stream, batch, &mut progress, &CancelToken::new())
}

/// Like [`drain`], reporting progress between batches. Cancellation through
/// the token or the reporter ends the drain with [`StreamError::Cancelled`].
pub fn drain_with_progress(
    stream: &mut dyn ParticleStream,
    batch: usize,
    progress: &mut dyn ProgressReporter,
    cancel: &CancelToken,
) -> Result<ParticleArray, StreamError> {
    let batch = batch.max(1);
    let map = stream.channel_map().clone();
    let size = map.structure_size();
    let mut array = ParticleArray::with_capacity(map, stream.particle_count().max(0) as usize);
    let mut buffer = vec![0u8; size * batch];
    loop {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled(stream.name().to_string()));
        }
        let mut count = batch;
        let more = stream.get_particles(&mut buffer, &mut count)?;
        for i in 0..count {
            array.push(&buffer[i * size..(i + 1) * size])?;
        }
        if !progress.report(array.len() as i64, stream.particle_count()) {
            cancel.cancel();
            return Err(StreamError::Cancelled(stream.name().to_string()));
        }
        if !more {
            break;
        }
    }
    trace!("drained {} particles from \"{}\"", array.len(), stream.name());
    Ok(array)
}

/// Wraps a stream and panics on contract violations while reading.
pub struct StreamHarness<'a> {
    stream: &'a mut dyn ParticleStream,
    exhausted: bool,
    read: i64,
}

impl<'a> StreamHarness<'a> {
    pub fn new(stream: &'a mut dyn ParticleStream) -> Self {
        Self {
            stream,
            exhausted: false,
            read: 0,
        }
    }

    /// Reads one particle, checking the index advances and that exhaustion
    /// is never followed by data.
    pub fn step(&mut self) -> Result<bool, StreamError> {
        let mut record = self.stream.channel_map().new_particle();
        let got = self.stream.get_particle(&mut record)?;
        assert!(
            !(self.exhausted && got),
            "\"{}\" produced data after reporting the end",
            self.stream.name()
        );
        if got {
            self.read += 1;
            assert_eq!(self.stream.particle_index(), self.read - 1);
            let count = self.stream.particle_count();
            assert!(count < 0 || self.read <= count, "read past particle_count {count}");
        }
        self.exhausted |= !got;
        Ok(got)
    }

    /// Reads until the end, then reads a few extra times.
    pub fn run(&mut self) -> Result<i64, StreamError> {
        while self.step()? {}
        for _ in 0..3 {
            self.step()?;
        }
        Ok(self.read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_map::ChannelMap;
    use crate::data_type::DataType;
    use crate::stream::GeneratorStream;

    fn counter(count: u64) -> GeneratorStream<impl FnMut(i64, &ChannelMap, &mut [u8]) -> bool> {
        let map = ChannelMap::from_channels(&[("Density", 1, DataType::Float32)]).unwrap();
        let density = map.accessor::<f32>("Density").unwrap();
        GeneratorStream::new(map, move |i, _, r| {
            density.set(r, i as f32);
            true
        })
        .with_count(count)
    }

    #[test]
    fn harness_basic() {
        let mut stream = counter(10);
        assert_eq!(StreamHarness::new(&mut stream).run().unwrap(), 10);
    }

    #[test]
    fn drain_handles_short_batches() {
        let mut stream = counter(10);
        let array = drain(&mut stream, 4).unwrap();
        let density = array.channel_map().accessor::<f32>("Density").unwrap();
        assert_eq!(array.len(), 10);
        assert_eq!(density.get(array.particle(9)), 9.0);
    }

    #[test]
    fn reporter_can_cancel() {
        let mut stream = counter(100);
        let mut calls = 0;
        let mut progress = |_done: i64, _total: i64| {
            calls += 1;
            false
        };
        let err = drain_with_progress(&mut stream, 8, &mut progress, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, StreamError::Cancelled(_)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn reporter_cancel_on_last_batch_is_an_error() {
        let mut stream = counter(4);
        let token = CancelToken::new();
        let mut progress = |done: i64, _total: i64| done < 4;
        let err = drain_with_progress(&mut stream, 8, &mut progress, &token).unwrap_err();
        assert!(matches!(err, StreamError::Cancelled(_)));
        assert!(token.is_cancelled());
    }
}
