//! Shared plumbing for single-upstream decorators.
//!
//! The core keeps two layouts: the outer map the consumer asked for, and the
//! request map sent upstream (outer map plus whatever the decorator reads).
//! Upstream records land in a scratch buffer in the request layout, the
//! decorator edits them there, and [`DecoratorCore::emit`] copies the result
//! out through a precomputed adaptor.

use super::{adapt_default, check_buffer, require_sealed, BoxedStream, ParticleStream, StreamError};
use crate::channel_map::{ChannelMap, ChannelMapAdaptor};
use crate::states::StreamState;
use log::{debug, trace};

pub(crate) struct DecoratorCore {
    upstream: BoxedStream,
    state: StreamState,
    map: ChannelMap,
    native: ChannelMap,
    default_particle: Vec<u8>,
    request: ChannelMap,
    adaptor: ChannelMapAdaptor,
    scratch: Vec<u8>,
    emitted: i64,
}

impl DecoratorCore {
    /// Starts with the upstream's current layout on both sides.
    pub fn new(name: &str, upstream: BoxedStream, native: ChannelMap) -> Self {
        let map = upstream.channel_map().clone();
        let request = map.clone();
        let default_particle = upstream.default_particle().to_vec();
        let adaptor = ChannelMapAdaptor::new(&map, &request);
        let scratch = request.new_particle();
        debug!("{}: wrapping \"{}\" with {}", name, upstream.name(), map);
        Self {
            upstream,
            state: StreamState::new(name),
            map,
            native,
            default_particle,
            request,
            adaptor,
            scratch,
            emitted: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }

    pub fn map(&self) -> &ChannelMap {
        &self.map
    }

    pub fn native(&self) -> &ChannelMap {
        &self.native
    }

    pub fn set_native(&mut self, native: ChannelMap) {
        self.native = native;
    }

    /// Layout of the scratch record.
    pub fn request(&self) -> &ChannelMap {
        &self.request
    }

    pub fn upstream(&self) -> &dyn ParticleStream {
        self.upstream.as_ref()
    }

    pub fn default_particle(&self) -> &[u8] {
        &self.default_particle
    }

    /// Definitions of `names` as the upstream can provide them.
    pub fn required(&self, names: &[&str]) -> Result<ChannelMap, StreamError> {
        let mut extra = ChannelMap::new();
        for &name in names {
            if extra.has_channel(name) {
                continue;
            }
            let channel = self
                .upstream
                .channel_map()
                .channel(name)
                .or_else(|_| self.upstream.native_channel_map().channel(name))
                .map_err(|_| StreamError::MissingChannel {
                    channel: name.to_string(),
                    stream: self.upstream.name().to_string(),
                })?;
            extra.define_channel(name, channel.arity(), channel.data_type())?;
        }
        extra.seal()?;
        Ok(extra)
    }

    /// Like [`DecoratorCore::required`] but silently skips what is missing.
    pub fn optional(&self, names: &[&str]) -> Result<ChannelMap, StreamError> {
        let available: Vec<&str> = names
            .iter()
            .copied()
            .filter(|name| {
                self.upstream.channel_map().has_channel(name)
                    || self.upstream.native_channel_map().has_channel(name)
            })
            .collect();
        self.required(&available)
    }

    /// Switches the outer layout to `map` and requests `map ∪ extra`
    /// upstream. New outer channels take the upstream's defaults.
    pub fn negotiate(&mut self, map: &ChannelMap, extra: &ChannelMap) -> Result<(), StreamError> {
        require_sealed(map)?;
        let request = map.union(extra)?;
        if request != self.request {
            self.upstream.set_channel_map(&request)?;
            self.request = request;
            self.scratch = self.request.new_particle();
        }
        if *map != self.map {
            let mut default_particle = adapt_default(self.upstream.default_particle(), &self.request, map);
            map.copy_structure(&mut default_particle, &self.default_particle, &self.map);
            self.default_particle = default_particle;
            self.map = map.clone();
        }
        self.adaptor = ChannelMapAdaptor::new(&self.map, &self.request);
        debug!(
            "{}: output {} requesting {}",
            self.name(),
            self.map,
            self.request
        );
        Ok(())
    }

    pub fn set_default_particle(&mut self, particle: &[u8]) -> Result<(), StreamError> {
        check_buffer(particle, &self.map)?;
        self.default_particle.copy_from_slice(particle);
        let mut upstream_default = self.upstream.default_particle().to_vec();
        self.request
            .copy_structure(&mut upstream_default, particle, &self.map);
        self.upstream.set_default_particle(&upstream_default)
    }

    /// Read gate; see [`StreamState::begin_read`].
    pub fn begin(&mut self) -> Result<bool, StreamError> {
        self.state.begin_read()
    }

    /// Pulls the next upstream record into scratch. A cancelled upstream
    /// cancels this stage too.
    pub fn pull(&mut self) -> Result<bool, StreamError> {
        let result = self.upstream.get_particle(&mut self.scratch);
        if let Err(StreamError::Cancelled(_)) = &result {
            self.state.cancel();
        }
        result
    }

    pub fn record(&self) -> &[u8] {
        &self.scratch
    }

    pub fn record_mut(&mut self) -> &mut [u8] {
        &mut self.scratch
    }

    /// Request layout and scratch record together.
    pub fn parts(&mut self) -> (&ChannelMap, &mut [u8]) {
        (&self.request, &mut self.scratch)
    }

    /// Copies scratch into `out` in the outer layout.
    pub fn emit(&mut self, out: &mut [u8]) {
        self.adaptor.copy_structure(out, &self.scratch);
        self.emitted += 1;
    }

    /// Copies a request-layout record other than scratch into `out`.
    pub fn emit_from(&mut self, record: &[u8], out: &mut [u8]) {
        self.adaptor.copy_structure(out, record);
        self.emitted += 1;
    }

    pub fn finish(&mut self) {
        if !self.state.is_exhausted() {
            trace!("{}: exhausted after {} particles", self.name(), self.emitted);
        }
        self.state.exhaust();
    }

    pub fn index(&self) -> i64 {
        self.emitted - 1
    }

    pub fn close(&mut self) {
        if self.state.close() {
            debug!("{}: closing", self.name());
            self.upstream.close();
        }
    }
}

/// Implements the `ParticleStream` methods that only forward to a `core`
/// field of type [`DecoratorCore`].
macro_rules! forward_to_core {
    () => {
        fn name(&self) -> &str {
            self.core.name()
        }

        fn channel_map(&self) -> &$crate::channel_map::ChannelMap {
            self.core.map()
        }

        fn native_channel_map(&self) -> &$crate::channel_map::ChannelMap {
            self.core.native()
        }

        fn default_particle(&self) -> &[u8] {
            self.core.default_particle()
        }

        fn set_default_particle(
            &mut self,
            particle: &[u8],
        ) -> Result<(), $crate::stream::StreamError> {
            self.core.set_default_particle(particle)
        }

        fn particle_index(&self) -> i64 {
            self.core.index()
        }

        fn particle_progress_count(&self) -> i64 {
            self.core.upstream().particle_progress_count()
        }

        fn particle_progress_index(&self) -> i64 {
            self.core.upstream().particle_progress_index()
        }

        fn close(&mut self) {
            self.core.close()
        }
    };
}
