//! Channel maps: the byte layout of one particle record.
//!
//! A map is built by defining channels and then sealed with
//! [`ChannelMap::end_channel_definition`]. Sealed maps are immutable; derived
//! layouts are produced through [`ChannelMap::reopen`], [`ChannelMap::union`]
//! and [`ChannelMap::intersection`].

#![forbid(unsafe_code)]

use crate::data_type::DataType;
use crate::invariant_ppt::{assert_invariant, ADAPTOR_COVERS_COMMON, CHANNEL_MAP_SEALED};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Default structure alignment used by the convenience constructors.
pub const DEFAULT_ALIGNMENT: usize = 4;

/// Errors raised while building or querying a channel map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel \"{0}\" is already defined")]
    Duplicate(String),
    #[error("channel \"{0}\" does not exist")]
    Unknown(String),
    #[error("channel map has no channels")]
    Empty,
    #[error(
        "channel \"{channel}\" is {found_arity} x {found}, expected {expected_arity} x {expected}"
    )]
    TypeMismatch {
        channel: String,
        expected: DataType,
        expected_arity: usize,
        found: DataType,
        found_arity: usize,
    },
    #[error("channel map is sealed")]
    Sealed,
    #[error("channel map is not sealed")]
    NotSealed,
    #[error("channel \"{channel}\" has invalid arity {arity}")]
    InvalidArity { channel: String, arity: usize },
    #[error("channel \"{channel}\" overlaps channel \"{other}\"")]
    Overlap { channel: String, other: String },
}

/// One named, typed field of a particle record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    name: String,
    arity: usize,
    data_type: DataType,
    offset: usize,
}

impl Channel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Byte offset of the first component within a record.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total bytes occupied: `arity * data_type.size()`.
    pub fn size(&self) -> usize {
        self.arity * self.data_type.size()
    }

    fn end(&self) -> usize {
        self.offset + self.size()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}[{}] @{}", self.name, self.data_type, self.arity, self.offset)
    }
}

/// Ordered set of channels with a fixed record size.
#[derive(Debug, Clone, Default)]
pub struct ChannelMap {
    channels: Vec<Channel>,
    explicit: Vec<bool>,
    lookup: HashMap<String, usize>,
    size: usize,
    sealed: bool,
}

fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

impl ChannelMap {
    /// Empty, unsealed map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds and seals a map from `(name, arity, type)` triples.
    pub fn from_channels(defs: &[(&str, usize, DataType)]) -> Result<Self, ChannelError> {
        let mut map = Self::new();
        for &(name, arity, data_type) in defs {
            map.define_channel(name, arity, data_type)?;
        }
        map.end_channel_definition(DEFAULT_ALIGNMENT, true, false)?;
        Ok(map)
    }

    /// Sealed map with no channels and size zero.
    pub fn empty() -> Self {
        Self {
            sealed: true,
            ..Self::default()
        }
    }

    /// Appends a channel at the next free offset aligned to its scalar size.
    pub fn define_channel(
        &mut self,
        name: &str,
        arity: usize,
        data_type: DataType,
    ) -> Result<(), ChannelError> {
        self.define(name, arity, data_type, None)
    }

    /// Appends a channel at an explicit byte offset.
    pub fn define_channel_at(
        &mut self,
        name: &str,
        arity: usize,
        data_type: DataType,
        offset: usize,
    ) -> Result<(), ChannelError> {
        self.define(name, arity, data_type, Some(offset))
    }

    fn define(
        &mut self,
        name: &str,
        arity: usize,
        data_type: DataType,
        offset: Option<usize>,
    ) -> Result<(), ChannelError> {
        if self.sealed {
            return Err(ChannelError::Sealed);
        }
        if arity == 0 {
            return Err(ChannelError::InvalidArity {
                channel: name.to_string(),
                arity,
            });
        }
        if self.lookup.contains_key(name) {
            return Err(ChannelError::Duplicate(name.to_string()));
        }
        let channel = Channel {
            name: name.to_string(),
            arity,
            data_type,
            offset: offset.unwrap_or_else(|| align_up(self.size, data_type.size())),
        };
        if let Some(other) = self.overlapping(channel.offset, channel.end(), None) {
            return Err(ChannelError::Overlap {
                channel: channel.name,
                other: other.name.clone(),
            });
        }
        self.size = self.size.max(channel.end());
        self.lookup.insert(channel.name.clone(), self.channels.len());
        self.channels.push(channel);
        self.explicit.push(offset.is_some());
        Ok(())
    }

    /// Seals the map.
    ///
    /// With `tight_pack`, implicitly placed channels are laid out back to
    /// back in definition order; explicit channels keep their offsets and the
    /// cursor skips past them. The structure size is rounded up to
    /// `alignment`.
    pub fn end_channel_definition(
        &mut self,
        alignment: usize,
        allow_empty: bool,
        tight_pack: bool,
    ) -> Result<(), ChannelError> {
        if self.sealed {
            return Err(ChannelError::Sealed);
        }
        if self.channels.is_empty() && !allow_empty {
            return Err(ChannelError::Empty);
        }

        if tight_pack {
            let mut cursor = 0;
            for i in 0..self.channels.len() {
                if !self.explicit[i] {
                    let len = self.channels[i].size();
                    // Slide past explicit channels defined later in the list.
                    while let Some(end) = self
                        .explicit_overlap(cursor, cursor + len, i)
                        .map(Channel::end)
                    {
                        cursor = end;
                    }
                    self.channels[i].offset = cursor;
                }
                cursor = cursor.max(self.channels[i].end());
            }
            for (i, channel) in self.channels.iter().enumerate() {
                if let Some(other) = self.overlapping(channel.offset, channel.end(), Some(i)) {
                    return Err(ChannelError::Overlap {
                        channel: channel.name.clone(),
                        other: other.name.clone(),
                    });
                }
            }
        }

        let end = self.channels.iter().map(Channel::end).max().unwrap_or(0);
        self.size = align_up(end, alignment);
        self.sealed = true;

        assert_invariant(
            CHANNEL_MAP_SEALED,
            self.size >= end && self.lookup.len() == self.channels.len(),
            "sealed channel map must cover every channel",
            None,
        );
        Ok(())
    }

    fn overlapping(&self, start: usize, end: usize, skip: Option<usize>) -> Option<&Channel> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != skip)
            .map(|(_, c)| c)
            .find(|c| c.offset < end && start < c.end())
    }

    fn explicit_overlap(&self, start: usize, end: usize, skip: usize) -> Option<&Channel> {
        self.channels
            .iter()
            .zip(&self.explicit)
            .enumerate()
            .filter(|(i, (_, &explicit))| explicit && *i != skip)
            .map(|(_, (c, _))| c)
            .find(|c| c.offset < end && start < c.end())
    }

    /// Seals with the default alignment, allowing an empty map.
    pub fn seal(&mut self) -> Result<(), ChannelError> {
        self.end_channel_definition(DEFAULT_ALIGNMENT, true, false)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Record size in bytes.
    pub fn structure_size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }

    pub fn channel(&self, name: &str) -> Result<&Channel, ChannelError> {
        self.lookup
            .get(name)
            .map(|&i| &self.channels[i])
            .ok_or_else(|| ChannelError::Unknown(name.to_string()))
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|c| c.name.as_str())
    }

    /// Unsealed copy that keeps every existing offset. Channels defined on
    /// the copy are placed after the current structure.
    pub fn reopen(&self) -> Self {
        let mut map = self.clone();
        map.sealed = false;
        map
    }

    /// This map plus every channel of `other` it does not already name.
    /// Existing definitions win on a name clash.
    pub fn union(&self, other: &ChannelMap) -> Result<Self, ChannelError> {
        let mut map = self.reopen();
        for channel in &other.channels {
            if !map.has_channel(&channel.name) {
                map.define_channel(&channel.name, channel.arity, channel.data_type)?;
            }
        }
        map.seal()?;
        Ok(map)
    }

    /// Channels of this map that `other` defines with the same arity and type,
    /// laid out fresh in this map's order.
    pub fn intersection(&self, other: &ChannelMap) -> Result<Self, ChannelError> {
        let mut map = Self::new();
        for channel in &self.channels {
            let common = other
                .channel(&channel.name)
                .map(|c| c.arity == channel.arity && c.data_type == channel.data_type)
                .unwrap_or(false);
            if common {
                map.define_channel(&channel.name, channel.arity, channel.data_type)?;
            }
        }
        map.seal()?;
        Ok(map)
    }

    /// A record of this layout with every byte zero.
    pub fn new_particle(&self) -> Vec<u8> {
        vec![0; self.size]
    }

    /// Copies the channels common to both maps from `src` (laid out by
    /// `src_map`) into `dst` (laid out by `self`). Channels only in `self`
    /// are left untouched.
    pub fn copy_structure(&self, dst: &mut [u8], src: &[u8], src_map: &ChannelMap) {
        ChannelMapAdaptor::new(self, src_map).copy_structure(dst, src);
    }
}

impl PartialEq for ChannelMap {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size && self.channels == other.channels
    }
}

impl Eq for ChannelMap {}

impl fmt::Display for ChannelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, channel) in self.channels.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", channel)?;
        }
        write!(f, "] ({} bytes)", self.size)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum CopyOp {
    Bytes {
        dst: usize,
        src: usize,
        len: usize,
    },
    Convert {
        dst: usize,
        dst_type: DataType,
        src: usize,
        src_type: DataType,
        arity: usize,
    },
}

/// Precomputed copy plan between two record layouts.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMapAdaptor {
    ops: Vec<CopyOp>,
    dest_size: usize,
    source_size: usize,
    identity: bool,
}

impl ChannelMapAdaptor {
    pub fn new(dest: &ChannelMap, source: &ChannelMap) -> Self {
        let identity = dest == source;
        let mut ops = Vec::new();
        if !identity {
            for d in &dest.channels {
                let Ok(s) = source.channel(&d.name) else {
                    continue;
                };
                if s.arity != d.arity {
                    continue;
                }
                if s.data_type == d.data_type {
                    ops.push(CopyOp::Bytes {
                        dst: d.offset,
                        src: s.offset,
                        len: d.size(),
                    });
                } else {
                    ops.push(CopyOp::Convert {
                        dst: d.offset,
                        dst_type: d.data_type,
                        src: s.offset,
                        src_type: s.data_type,
                        arity: d.arity,
                    });
                }
            }
        }

        assert_invariant(
            ADAPTOR_COVERS_COMMON,
            identity || ops.len() <= dest.len().min(source.len()),
            "adaptor copies each common channel at most once",
            None,
        );

        Self {
            ops,
            dest_size: dest.structure_size(),
            source_size: source.structure_size(),
            identity,
        }
    }

    /// True when both layouts are equal and a copy is a plain memcpy.
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn dest_size(&self) -> usize {
        self.dest_size
    }

    pub fn source_size(&self) -> usize {
        self.source_size
    }

    /// Number of channels that will be copied (or converted).
    pub fn copied_channels(&self) -> usize {
        self.ops.len()
    }

    pub fn copy_structure(&self, dst: &mut [u8], src: &[u8]) {
        if self.identity {
            dst[..self.dest_size].copy_from_slice(&src[..self.source_size]);
            return;
        }
        for op in &self.ops {
            match *op {
                CopyOp::Bytes { dst: d, src: s, len } => {
                    dst[d..d + len].copy_from_slice(&src[s..s + len]);
                }
                CopyOp::Convert {
                    dst: d,
                    dst_type,
                    src: s,
                    src_type,
                    arity,
                } => {
                    for i in 0..arity {
                        let value = src_type.read_f64(&src[s + i * src_type.size()..]);
                        dst_type.write_f64(&mut dst[d + i * dst_type.size()..], value);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn offsets_respect_scalar_alignment() {
        let mut map = ChannelMap::new();
        map.define_channel("Flag", 1, DataType::UInt8).unwrap();
        map.define_channel("Position", 3, DataType::Float32).unwrap();
        map.define_channel("ID", 1, DataType::Int64).unwrap();
        map.end_channel_definition(4, false, false).unwrap();

        assert_eq!(map.channel("Flag").unwrap().offset(), 0);
        assert_eq!(map.channel("Position").unwrap().offset(), 4);
        assert_eq!(map.channel("ID").unwrap().offset(), 16);
        assert_eq!(map.structure_size(), 24);
    }

    #[test]
    fn tight_pack_removes_padding() {
        let mut map = ChannelMap::new();
        map.define_channel("Flag", 1, DataType::UInt8).unwrap();
        map.define_channel("Position", 3, DataType::Float32).unwrap();
        map.end_channel_definition(1, false, true).unwrap();

        assert_eq!(map.channel("Position").unwrap().offset(), 1);
        assert_eq!(map.structure_size(), 13);
    }

    #[test]
    fn overlapping_offsets_are_rejected() {
        let mut map = ChannelMap::new();
        map.define_channel("Position", 3, DataType::Float32).unwrap();
        assert_eq!(
            map.define_channel_at("Density", 1, DataType::Float32, 8),
            Err(ChannelError::Overlap {
                channel: "Density".into(),
                other: "Position".into(),
            })
        );
        map.define_channel_at("Density", 1, DataType::Float32, 12).unwrap();
        map.define_channel("ID", 1, DataType::Int64).unwrap();
        assert_eq!(map.channel("ID").unwrap().offset(), 16);
    }

    #[test]
    fn tight_pack_skips_explicit_channels() {
        let mut map = ChannelMap::new();
        map.define_channel("Flag", 1, DataType::Float16).unwrap();
        map.define_channel("Density", 1, DataType::Float32).unwrap();
        map.define_channel_at("Mask", 1, DataType::UInt16, 2).unwrap();
        map.end_channel_definition(1, false, true).unwrap();

        assert_eq!(map.channel("Flag").unwrap().offset(), 0);
        assert_eq!(map.channel("Density").unwrap().offset(), 4);
        assert_eq!(map.channel("Mask").unwrap().offset(), 2);
        assert_eq!(map.structure_size(), 8);
    }

    #[test]
    fn sealed_and_duplicate_errors() {
        let mut map = ChannelMap::new();
        map.define_channel("A", 1, DataType::Float32).unwrap();
        assert_eq!(
            map.define_channel("A", 2, DataType::Float32),
            Err(ChannelError::Duplicate("A".into()))
        );
        assert!(matches!(
            map.define_channel("B", 0, DataType::Float32),
            Err(ChannelError::InvalidArity { .. })
        ));
        map.seal().unwrap();
        assert_eq!(
            map.define_channel("B", 1, DataType::Float32),
            Err(ChannelError::Sealed)
        );
        assert_eq!(ChannelMap::new().end_channel_definition(4, false, false), Err(ChannelError::Empty));
    }

    #[test]
    fn union_and_intersection() {
        let a = ChannelMap::from_channels(&[
            ("Position", 3, DataType::Float32),
            ("Color", 3, DataType::Float16),
        ])
        .unwrap();
        let b = ChannelMap::from_channels(&[
            ("Color", 3, DataType::Float16),
            ("ID", 1, DataType::Int32),
        ])
        .unwrap();

        let u = a.union(&b).unwrap();
        assert_eq!(u.names().collect::<Vec<_>>(), vec!["Position", "Color", "ID"]);
        assert_eq!(u.channel("Position").unwrap(), a.channel("Position").unwrap());

        let i = a.intersection(&b).unwrap();
        assert_eq!(i.names().collect::<Vec<_>>(), vec!["Color"]);
    }

    #[test]
    fn adaptor_converts_and_skips() {
        let src = ChannelMap::from_channels(&[
            ("Density", 1, DataType::Float64),
            ("Velocity", 3, DataType::Float32),
            ("ID", 1, DataType::Int32),
        ])
        .unwrap();
        let dst = ChannelMap::from_channels(&[
            ("ID", 1, DataType::Int32),
            ("Density", 1, DataType::Float32),
            ("Velocity", 2, DataType::Float32),
        ])
        .unwrap();

        let mut record = src.new_particle();
        DataType::Float64.write_f64(&mut record[0..], 2.5);
        DataType::Int32.write_f64(&mut record[20..], 7.0);

        let adaptor = ChannelMapAdaptor::new(&dst, &src);
        assert_eq!(adaptor.copied_channels(), 2);
        let mut out = vec![0xffu8; dst.structure_size()];
        adaptor.copy_structure(&mut out, &record);

        assert_eq!(DataType::Int32.read_f64(&out[0..]), 7.0);
        assert_eq!(DataType::Float32.read_f64(&out[4..]), 2.5);
        // Velocity arity differs; destination bytes untouched.
        assert!(out[8..16].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn equality_is_order_sensitive() {
        let a = ChannelMap::from_channels(&[
            ("A", 1, DataType::Float32),
            ("B", 1, DataType::Float32),
        ])
        .unwrap();
        let b = ChannelMap::from_channels(&[
            ("B", 1, DataType::Float32),
            ("A", 1, DataType::Float32),
        ])
        .unwrap();
        assert_ne!(a, b);
        assert!(ChannelMapAdaptor::new(&a, &a.clone()).is_identity());
    }
}
