use prtflow::channel_map::ChannelMap;
use prtflow::data_type::DataType;
use prtflow::harness::drain;
use prtflow::stream::{BoxedStream, FractionalStream, GeneratorStream, SampleMode};

const N: u64 = 100_000;

fn uniform(density: f32) -> BoxedStream {
    let map = ChannelMap::from_channels(&[
        ("ID", 1, DataType::Int64),
        ("Density", 1, DataType::Float32),
    ])
    .unwrap();
    let id = map.accessor::<i64>("ID").unwrap();
    let d = map.accessor::<f32>("Density").unwrap();
    Box::new(
        GeneratorStream::new(map, move |i, _, r| {
            id.set(r, i);
            d.set(r, density);
            true
        })
        .with_count(N),
    )
}

fn total_density(mut stream: FractionalStream) -> f64 {
    let array = drain(&mut stream, 512).unwrap();
    let density = array.channel_map().accessor::<f32>("Density").unwrap();
    array.iter().map(|r| density.get(r) as f64).sum()
}

#[test]
fn compensated_density_matches_unsampled_total() {
    let expected = N as f64 * 0.5;
    for mode in [
        SampleMode::Random { seed: 7 },
        SampleMode::ById {
            channel: "ID".to_string(),
            seed: 7,
        },
    ] {
        let stream = FractionalStream::new(uniform(0.5), 0.25, None, mode)
            .unwrap()
            .with_density_compensation(true)
            .unwrap();
        let total = total_density(stream);
        assert!(
            (total - expected).abs() / expected < 0.02,
            "total {total} vs {expected}"
        );
    }
}

#[test]
fn uncompensated_density_scales_with_fraction() {
    let stream = FractionalStream::new(uniform(1.0), 0.25, None, SampleMode::Random { seed: 3 }).unwrap();
    let total = total_density(stream);
    assert!((total / N as f64 - 0.25).abs() < 0.01);
}

#[test]
fn same_seed_same_selection() {
    let run = || {
        let mut stream =
            FractionalStream::new(uniform(1.0), 0.1, Some(500), SampleMode::Random { seed: 11 }).unwrap();
        let array = drain(&mut stream, 64).unwrap();
        array.as_bytes().to_vec()
    };
    assert_eq!(run(), run());
}
