//! Fractional Viewport
//!
//! Loads viewport settings from JSON, thins a large source the way an
//! interactive preview does and reports progress while draining.

use prtflow::channel_map::ChannelMap;
use prtflow::config::{apply_fractional, StreamConfig};
use prtflow::control::CancelToken;
use prtflow::data_type::DataType;
use prtflow::harness::drain_with_progress;
use prtflow::stream::{DensityScaleStream, GeneratorStream, ParticleStream};

const SETTINGS: &str = r#"{
    "view_fraction": 0.1,
    "view_limit": 5.0,
    "seed": 7,
    "density_compensation": true
}"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = StreamConfig::from_json_str(SETTINGS)?;

    let map = ChannelMap::from_channels(&[
        ("Position", 3, DataType::Float32),
        ("Density", 1, DataType::Float32),
        ("ID", 1, DataType::Int64),
    ])?;
    let density = map.accessor::<f32>("Density")?;
    let id = map.accessor::<i64>("ID")?;
    let source = GeneratorStream::new(map, move |i, _, r| {
        density.set(r, 1.0);
        id.set(r, i);
        true
    })
    .with_count(100_000);

    let sampled = apply_fractional(Box::new(source), &config)?;
    println!("sampling {} of {} particles", sampled.particle_count(), 100_000);
    let mut stream = DensityScaleStream::new(sampled, 0.5)?;

    let token = CancelToken::new();
    let mut progress = |done: i64, total: i64| {
        println!("  {done} / {total}");
        true
    };
    let particles = drain_with_progress(&mut stream, 1024, &mut progress, &token)?;

    let density = particles.channel_map().accessor::<f32>("Density")?;
    let total: f32 = particles.iter().map(|r| density.get(r)).sum();
    println!("kept {} particles, total density {total}", particles.len());
    Ok(())
}
