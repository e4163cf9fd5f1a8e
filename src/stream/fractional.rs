use super::decorator::DecoratorCore;
use super::{check_buffer, BoxedStream, ParticleStream, StreamError};
use crate::accessor::RawAccessor;
use crate::channel_map::ChannelMap;
use crate::invariant_ppt::{assert_invariant, DENSITY_COMPENSATED};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// How a [`FractionalStream`] chooses its subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleMode {
    /// Seeded Bernoulli draw per particle, in stream order.
    Random { seed: u64 },
    /// Hash of an ID channel. The same particle gets the same verdict in
    /// every frame, however the stream is ordered.
    ById { channel: String, seed: u64 },
    /// The first `fraction` of the upstream, by count. Needs a known
    /// upstream count; otherwise every `1 / fraction`-th particle is kept.
    First,
}

/// Keeps a fraction of the upstream particles, optionally capped.
pub struct FractionalStream {
    core: DecoratorCore,
    fraction: f64,
    limit: Option<u64>,
    mode: SampleMode,
    compensate: bool,
    rng: StdRng,
    id: Option<RawAccessor>,
    density: Option<RawAccessor>,
    quota: Option<u64>,
    seen: u64,
    kept: u64,
}

/// splitmix64 finalizer.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn unit_from_hash(h: u64) -> f64 {
    (h >> 11) as f64 / (1u64 << 53) as f64
}

impl FractionalStream {
    /// `fraction` is clamped to `[0, 1]`.
    pub fn new(
        upstream: BoxedStream,
        fraction: f64,
        limit: Option<u64>,
        mode: SampleMode,
    ) -> Result<Self, StreamError> {
        let native = upstream.native_channel_map().clone();
        let core = DecoratorCore::new("FractionalStream", upstream, native);
        let seed = match &mode {
            SampleMode::Random { seed } | SampleMode::ById { seed, .. } => *seed,
            SampleMode::First => 0,
        };
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let quota = match (&mode, core.upstream().particle_count()) {
            (SampleMode::First, count) if count >= 0 => Some((fraction * count as f64).floor() as u64),
            (SampleMode::First, _) => {
                warn!("FractionalStream: upstream count unknown, keeping an even stride instead of the first particles");
                None
            }
            _ => None,
        };
        let mut stream = Self {
            core,
            fraction,
            limit,
            mode,
            compensate: false,
            rng: StdRng::seed_from_u64(seed),
            id: None,
            density: None,
            quota,
            seen: 0,
            kept: 0,
        };
        let map = stream.core.map().clone();
        stream.negotiate(&map)?;
        debug!(
            "{}: keeping {:.4} of upstream, limit {:?}, {:?}",
            stream.core.name(),
            stream.fraction,
            stream.limit,
            stream.mode
        );
        Ok(stream)
    }

    /// Multiplies `Density` by `1 / fraction` so total density is preserved.
    pub fn with_density_compensation(mut self, enabled: bool) -> Result<Self, StreamError> {
        self.compensate = enabled;
        let map = self.core.map().clone();
        self.negotiate(&map)?;
        Ok(self)
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    fn negotiate(&mut self, map: &ChannelMap) -> Result<(), StreamError> {
        let extra = match &self.mode {
            SampleMode::ById { channel, .. } => self.core.required(&[channel.as_str()])?,
            SampleMode::Random { .. } | SampleMode::First => ChannelMap::empty(),
        };
        self.core.negotiate(map, &extra)?;

        let request = self.core.request();
        self.id = match &self.mode {
            SampleMode::ById { channel, .. } => Some(request.raw_accessor(channel)?),
            SampleMode::Random { .. } | SampleMode::First => None,
        };
        self.density = None;
        if self.compensate && self.fraction > 0.0 && map.has_channel("Density") {
            let scale = 1.0 / self.fraction;
            assert_invariant(
                DENSITY_COMPENSATED,
                scale.is_finite() && scale >= 1.0,
                "density compensation scale must be finite and at least one",
                Some(self.core.name()),
            );
            self.density = Some(request.raw_accessor("Density")?);
        }
        Ok(())
    }

    /// Effective cap: the limit, tightened by the first-N quota.
    fn cap(&self) -> Option<u64> {
        match (self.limit, self.quota) {
            (Some(limit), Some(quota)) => Some(limit.min(quota)),
            (limit, quota) => limit.or(quota),
        }
    }

    fn limit_reached(&self) -> bool {
        self.cap().is_some_and(|cap| self.kept >= cap)
    }

    fn select(&mut self) -> bool {
        let index = self.seen;
        self.seen += 1;
        if self.fraction >= 1.0 {
            return true;
        }
        match (&self.mode, self.id) {
            (SampleMode::First, _) if self.quota.is_some() => true,
            (SampleMode::First, _) => {
                let f = self.fraction;
                ((index + 1) as f64 * f).floor() > (index as f64 * f).floor()
            }
            (SampleMode::ById { seed, .. }, Some(id)) => {
                let value = id.read_i64(self.core.record(), 0) as u64;
                unit_from_hash(mix(value ^ mix(*seed))) < self.fraction
            }
            _ => self.rng.random::<f64>() < self.fraction,
        }
    }
}

impl ParticleStream for FractionalStream {
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
        if self.fraction <= 0.0 || self.limit_reached() {
            self.core.finish();
            return Ok(false);
        }
        loop {
            if !self.core.pull()? {
                self.core.finish();
                return Ok(false);
            }
            if self.select() {
                break;
            }
        }
        if let Some(density) = self.density {
            density.scale(self.core.record_mut(), 1.0 / self.fraction);
        }
        self.kept += 1;
        self.core.emit(particle);
        Ok(true)
    }

    fn particle_count(&self) -> i64 {
        if self.fraction <= 0.0 || self.limit == Some(0) {
            return 0;
        }
        if let Some(cap) = self.quota.and(self.cap()) {
            return cap as i64;
        }
        if self.fraction < 1.0 {
            return -1;
        }
        match (self.core.upstream().particle_count(), self.limit) {
            (count, _) if count < 0 => -1,
            (count, Some(limit)) => count.min(limit as i64),
            (count, None) => count,
        }
    }
}
