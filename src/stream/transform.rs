use super::decorator::DecoratorCore;
use super::{check_buffer, BoxedStream, ParticleStream, StreamError};
use crate::accessor::ConvertAccessor;
use crate::channel_map::ChannelMap;
use glam::{Mat3, Mat4, Vec3};
use log::debug;

/// How a channel reacts to an affine transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// Full affine transform.
    Point,
    /// Linear part only.
    Vector,
    /// Inverse transpose of the linear part.
    Normal,
}

struct Bound {
    matrix: Mat4,
    normal_matrix: Mat3,
    derivative: Option<Mat4>,
    channels: Vec<(ConvertAccessor<Vec3>, TransformKind)>,
    velocity: Option<ConvertAccessor<Vec3>>,
    position: Option<ConvertAccessor<Vec3>>,
}

impl Bound {
    fn apply(&self, record: &mut [u8]) {
        // The derivative term uses the position before it is transformed.
        let motion = match (self.derivative, self.position) {
            (Some(derivative), Some(position)) => {
                Some(derivative.transform_point3(position.get(record)))
            }
            _ => None,
        };
        for (accessor, kind) in &self.channels {
            let value = accessor.get(record);
            let transformed = match kind {
                TransformKind::Point => self.matrix.transform_point3(value),
                TransformKind::Vector => self.matrix.transform_vector3(value),
                TransformKind::Normal => self.normal_matrix * value,
            };
            accessor.set(record, transformed);
        }
        if let (Some(motion), Some(velocity)) = (motion, self.velocity) {
            velocity.set(record, velocity.get(record) + motion);
        }
    }
}

/// Applies an affine transform to position-like channels.
///
/// With a transform derivative (the rate of change of the matrix over
/// time), velocities pick up the motion of the moving frame:
/// `v' = L v + dT p` with `p` the untransformed position.
pub struct TransformStream {
    core: DecoratorCore,
    classes: Vec<(String, TransformKind)>,
    bound: Bound,
}

impl TransformStream {
    /// Channel classes used by [`TransformStream::new`].
    pub fn default_channels() -> Vec<(String, TransformKind)> {
        vec![
            ("Position".to_string(), TransformKind::Point),
            ("Velocity".to_string(), TransformKind::Vector),
            ("Normal".to_string(), TransformKind::Normal),
            ("Tangent".to_string(), TransformKind::Vector),
        ]
    }

    pub fn new(
        upstream: BoxedStream,
        matrix: Mat4,
        derivative: Option<Mat4>,
    ) -> Result<Self, StreamError> {
        Self::with_channels(upstream, matrix, derivative, Self::default_channels())
    }

    pub fn with_channels(
        upstream: BoxedStream,
        matrix: Mat4,
        derivative: Option<Mat4>,
        classes: Vec<(String, TransformKind)>,
    ) -> Result<Self, StreamError> {
        let native = upstream.native_channel_map().clone();
        let core = DecoratorCore::new("TransformStream", upstream, native);
        let mut stream = Self {
            core,
            classes,
            bound: Bound {
                matrix,
                normal_matrix: Mat3::from_mat4(matrix).inverse().transpose(),
                derivative,
                channels: Vec::new(),
                velocity: None,
                position: None,
            },
        };
        let map = stream.core.map().clone();
        stream.negotiate(&map)?;
        Ok(stream)
    }

    pub fn matrix(&self) -> Mat4 {
        self.bound.matrix
    }

    fn negotiate(&mut self, map: &ChannelMap) -> Result<(), StreamError> {
        let needs_position = self.bound.derivative.is_some() && map.has_channel("Velocity");
        let extra = if needs_position {
            self.core.required(&["Position"])?
        } else {
            ChannelMap::empty()
        };
        self.core.negotiate(map, &extra)?;

        let request = self.core.request();
        let mut channels = Vec::new();
        for (name, kind) in &self.classes {
            if map.has_channel(name) {
                channels.push((request.convert_accessor::<Vec3>(name)?, *kind));
            }
        }
        let (velocity, position) = if needs_position {
            (
                Some(request.convert_accessor::<Vec3>("Velocity")?),
                Some(request.convert_accessor::<Vec3>("Position")?),
            )
        } else {
            (None, None)
        };
        debug!(
            "{}: transforming {} channels",
            self.core.name(),
            channels.len()
        );
        self.bound.channels = channels;
        self.bound.velocity = velocity;
        self.bound.position = position;
        Ok(())
    }
}

impl ParticleStream for TransformStream {
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
        self.bound.apply(self.core.record_mut());
        self.core.emit(particle);
        Ok(true)
    }

    fn particle_count(&self) -> i64 {
        self.core.upstream().particle_count()
    }
}

/// Wraps `stream` in a [`TransformStream`] unless the transform is the
/// identity without motion.
pub fn apply_transform(
    stream: BoxedStream,
    matrix: Mat4,
    derivative: Option<Mat4>,
) -> Result<BoxedStream, StreamError> {
    let moving = derivative.is_some_and(|d| d != Mat4::ZERO);
    if matrix == Mat4::IDENTITY && !moving {
        debug!("skipping identity transform on \"{}\"", stream.name());
        return Ok(stream);
    }
    Ok(Box::new(TransformStream::new(stream, matrix, derivative)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::stream::ParticleArray;

    fn source() -> BoxedStream {
        let map = ChannelMap::from_channels(&[
            ("Position", 3, DataType::Float32),
            ("Velocity", 3, DataType::Float32),
            ("Normal", 3, DataType::Float16),
        ])
        .unwrap();
        let pos = map.accessor::<Vec3>("Position").unwrap();
        let vel = map.accessor::<Vec3>("Velocity").unwrap();
        let nrm = map.convert_accessor::<Vec3>("Normal").unwrap();
        let mut array = ParticleArray::new(map);
        array.push_with(|_, r| {
            pos.set(r, Vec3::new(1.0, 0.0, 0.0));
            vel.set(r, Vec3::new(0.0, 1.0, 0.0));
            nrm.set(r, Vec3::new(0.0, 0.0, 1.0));
        });
        Box::new(array.into_stream())
    }

    #[test]
    fn points_vectors_and_normals() {
        let matrix = Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0))
            * Mat4::from_scale(Vec3::new(2.0, 2.0, 0.5));
        let mut stream = TransformStream::new(source(), matrix, None).unwrap();
        let map = stream.channel_map().clone();
        let mut record = map.new_particle();
        assert!(stream.get_particle(&mut record).unwrap());

        let get = |name: &str| map.convert_accessor::<Vec3>(name).unwrap().get(&record);
        assert_eq!(get("Position"), Vec3::new(2.0, 0.0, 5.0));
        assert_eq!(get("Velocity"), Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(get("Normal"), Vec3::new(0.0, 0.0, 2.0));
    }

    #[test]
    fn derivative_adds_frame_motion_to_velocity() {
        // Pure drift along z: dT p = (0, 0, 3) for every p.
        let derivative = Mat4::from_cols(
            glam::Vec4::ZERO,
            glam::Vec4::ZERO,
            glam::Vec4::ZERO,
            glam::Vec4::new(0.0, 0.0, 3.0, 1.0),
        );
        let mut stream =
            TransformStream::new(source(), Mat4::IDENTITY, Some(derivative)).unwrap();
        let map = stream.channel_map().clone();
        let mut record = map.new_particle();
        assert!(stream.get_particle(&mut record).unwrap());
        let velocity = map.convert_accessor::<Vec3>("Velocity").unwrap().get(&record);
        assert_eq!(velocity, Vec3::new(0.0, 1.0, 3.0));
    }

    #[test]
    fn identity_is_skipped() {
        let stream = apply_transform(source(), Mat4::IDENTITY, None).unwrap();
        assert_eq!(stream.name(), "ArrayParticleStream");
    }
}
