//! Lazy particle streams and the decorators that compose them.
//!
//! A stream produces fixed-layout records one at a time. The consumer picks
//! the layout with [`ParticleStream::set_channel_map`]; channels the stream
//! does not produce are filled from its default particle. Decorators own
//! their upstream as a [`BoxedStream`] and ask it only for the channels they
//! need.

use crate::channel_map::{ChannelError, ChannelMap};
use crate::graph::GraphError;
use crate::plan::PlanError;
use thiserror::Error;

#[macro_use]
mod decorator;

mod array;
mod channel_op;
mod concat;
mod culled;
mod deform;
mod density_scale;
mod empty;
mod fractional;
mod functor;
mod generator;
mod set_channel;
mod transform;

pub use array::{ArrayParticleStream, ParticleArray};
pub use channel_op::ChannelOpStream;
pub use concat::{concat_or_empty, ConcatenatedStream};
pub use culled::{CullPredicate, CulledStream, FnPredicate, SelectionCull, SelectionMode};
pub use deform::{DeformedStream, Deformer};
pub use density_scale::DensityScaleStream;
pub use empty::EmptyStream;
pub use fractional::{FractionalStream, SampleMode};
pub use functor::FunctorStream;
pub use generator::GeneratorStream;
pub use set_channel::SetChannelStream;
pub use transform::{apply_transform, TransformKind, TransformStream};

/// Errors surfaced by stream construction, negotiation and reads.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("channel \"{channel}\" is required but stream \"{stream}\" does not provide it")]
    MissingChannel { channel: String, stream: String },
    #[error("stream \"{0}\" has been closed")]
    Closed(String),
    #[error("stream \"{0}\" was cancelled")]
    Cancelled(String),
    #[error("particle buffer holds {got} bytes, expected {expected}")]
    BufferSize { expected: usize, got: usize },
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Plan(#[from] PlanError),
}

/// A lazy producer of particle records.
pub trait ParticleStream {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Layout of the records this stream currently produces.
    fn channel_map(&self) -> &ChannelMap;

    /// Channels this stream can produce without falling back to defaults.
    fn native_channel_map(&self) -> &ChannelMap;

    /// Switches the output layout. The map must be sealed. Setting a map
    /// equal to the current one changes nothing.
    fn set_channel_map(&mut self, map: &ChannelMap) -> Result<(), StreamError>;

    /// Record returned for channels absent upstream, in the current layout.
    fn default_particle(&self) -> &[u8];

    fn set_default_particle(&mut self, particle: &[u8]) -> Result<(), StreamError>;

    /// Fills `particle` with the next record. `Ok(false)` means end of data
    /// and is terminal.
    fn get_particle(&mut self, particle: &mut [u8]) -> Result<bool, StreamError>;

    /// Reads up to `*count` records into `buffer`. On a short read `*count`
    /// becomes the number actually read and the result is `Ok(false)`.
    fn get_particles(&mut self, buffer: &mut [u8], count: &mut usize) -> Result<bool, StreamError> {
        let size = self.channel_map().structure_size();
        let requested = *count;
        let expected = requested.checked_mul(size).ok_or(StreamError::BufferSize {
            expected: usize::MAX,
            got: buffer.len(),
        })?;
        if buffer.len() < expected {
            return Err(StreamError::BufferSize {
                expected,
                got: buffer.len(),
            });
        }
        for i in 0..requested {
            if !self.get_particle(&mut buffer[i * size..(i + 1) * size])? {
                *count = i;
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Total particles, or `-1` when unknown.
    fn particle_count(&self) -> i64;

    /// Index of the last particle returned, `-1` before the first.
    fn particle_index(&self) -> i64;

    fn particle_count_left(&self) -> i64 {
        let count = self.particle_count();
        if count < 0 {
            -1
        } else {
            (count - self.particle_index() - 1).max(0)
        }
    }

    fn particle_progress_count(&self) -> i64 {
        self.particle_count()
    }

    fn particle_progress_index(&self) -> i64 {
        self.particle_index()
    }

    /// Releases upstream resources. Idempotent; later reads fail with
    /// [`StreamError::Closed`].
    fn close(&mut self);
}

/// Owned, type-erased stream.
pub type BoxedStream = Box<dyn ParticleStream + Send>;

pub(crate) fn check_buffer(buffer: &[u8], map: &ChannelMap) -> Result<(), StreamError> {
    let expected = map.structure_size();
    if buffer.len() != expected {
        return Err(StreamError::BufferSize {
            expected,
            got: buffer.len(),
        });
    }
    Ok(())
}

pub(crate) fn require_sealed(map: &ChannelMap) -> Result<(), StreamError> {
    if !map.is_sealed() {
        return Err(ChannelError::NotSealed.into());
    }
    Ok(())
}

/// Re-lays `default` from `from` into `to`, zero-filling new channels.
pub(crate) fn adapt_default(default: &[u8], from: &ChannelMap, to: &ChannelMap) -> Vec<u8> {
    let mut adapted = to.new_particle();
    to.copy_structure(&mut adapted, default, from);
    adapted
}
