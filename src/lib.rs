//! Lazy particle streams and a per-particle channel-operation compiler.
//!
//! A [`channel_map::ChannelMap`] describes a fixed record layout. Streams in
//! [`stream`] produce records in whatever layout the consumer asks for, and
//! decorators reshape, filter, merge and deform them on the way. The
//! [`graph`], [`node`], [`plan`] and [`rt`] modules turn a JSON operator
//! graph into a slot-allocated program run by
//! [`stream::ChannelOpStream`] on every particle.

pub mod accessor;
pub mod channel_map;
pub mod config;
pub mod control;
pub mod curve;
pub mod data_type;
pub mod dsl;
pub mod geometry;
pub mod graph;
#[doc(hidden)]
pub mod harness;
#[doc(hidden)]
pub mod invariant_ppt;
pub mod node;
pub mod noise;
pub mod plan;
pub mod rt;
pub mod states;
pub mod stream;
pub mod value;
