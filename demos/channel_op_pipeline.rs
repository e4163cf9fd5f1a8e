//! Channel Operation Pipeline
//!
//! Builds a small graph with the builder API, compiles it against a
//! generated particle source and prints the computed channel.

use prtflow::channel_map::ChannelMap;
use prtflow::data_type::DataType;
use prtflow::dsl::GraphBuilder;
use prtflow::harness::drain;
use prtflow::node::{NodeRegistry, Op};
use prtflow::stream::{ChannelOpStream, GeneratorStream, ParticleStream};
use prtflow::value::{NullProvider, ValueProvider};
use std::sync::Arc;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Source: 8 particles along a diagonal with rising density
    let map = ChannelMap::from_channels(&[
        ("Position", 3, DataType::Float32),
        ("Density", 1, DataType::Float32),
    ])?;
    let position = map.accessor::<[f32; 3]>("Position")?;
    let density = map.accessor::<f32>("Density")?;
    let source = GeneratorStream::new(map, move |i, _, r| {
        position.set(r, [i as f32, i as f32, 0.0]);
        density.set(r, 0.25 * i as f32);
        true
    })
    .with_count(8);

    // Velocity = Position * Density
    let mut builder = GraphBuilder::new();
    let p = builder.channel("Position");
    let d = builder.channel("Density");
    let scaled = builder.op(Op::Multiply, &[p, d])?;
    builder.output(scaled, "Velocity");

    let provider: Arc<dyn ValueProvider> = Arc::new(NullProvider);
    let graph = builder.build(&NodeRegistry::with_builtins(), &provider)?;
    let mut stream = ChannelOpStream::new(Box::new(source), &graph)?;
    println!("compiled {} into a plan over {}", stream.name(), stream.channel_map());

    let particles = drain(&mut stream, 4)?;
    let velocity = particles.channel_map().accessor::<[f32; 3]>("Velocity")?;
    for (i, record) in particles.iter().enumerate() {
        println!("particle {i}: velocity {:?}", velocity.get(record));
    }
    println!("{} evaluation failures", stream.failures());
    Ok(())
}
