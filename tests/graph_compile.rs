use pretty_assertions::assert_eq;
use prtflow::channel_map::ChannelMap;
use prtflow::data_type::DataType;
use prtflow::dsl::GraphBuilder;
use prtflow::graph::{Graph, NodeId};
use prtflow::node::{NodeRegistry, Op};
use prtflow::plan::{Plan, PlanError};
use prtflow::stream::{BoxedStream, ChannelOpStream, GeneratorStream, ParticleArray, StreamError};
use prtflow::value::{NullProvider, ValueProvider};
use std::sync::Arc;

fn provider() -> Arc<dyn ValueProvider> {
    Arc::new(NullProvider)
}

fn parse(json: &str) -> Graph {
    Graph::from_json(json, &NodeRegistry::with_builtins(), &provider()).unwrap()
}

fn ab_map() -> ChannelMap {
    ChannelMap::from_channels(&[("A", 1, DataType::Float32), ("B", 1, DataType::Float32)]).unwrap()
}

fn ab_source() -> BoxedStream {
    let map = ab_map();
    let a = map.accessor::<f32>("A").unwrap();
    let b = map.accessor::<f32>("B").unwrap();
    Box::new(
        GeneratorStream::new(map, move |_, _, r| {
            a.set(r, 2.0);
            b.set(r, 3.0);
            true
        })
        .with_count(8),
    )
}

fn results(graph: &Graph) -> Vec<f32> {
    let mut stream = ChannelOpStream::new(ab_source(), graph).unwrap();
    let array = ParticleArray::from_stream(&mut stream).unwrap();
    let result = array.channel_map().accessor::<f32>("Result").unwrap();
    array.iter().map(|r| result.get(r)).collect()
}

#[test]
fn add_graph_writes_sum() {
    let graph = parse(
        r#"[{"kind": "Channel", "properties": ["A"]},
            {"kind": "Channel", "properties": ["B"]},
            {"kind": "Add", "connections": [0, 1]},
            {"kind": "Output", "connections": [2], "properties": ["Result"]}]"#,
    );
    assert_eq!(results(&graph), vec![5.0; 8]);
}

#[test]
fn disabled_node_passes_through() {
    let graph = parse(
        r#"[{"kind": "Channel", "properties": ["A"]},
            {"kind": "Negate", "connections": [0], "disabled": true},
            {"kind": "Output", "connections": [1], "properties": ["Result"]}]"#,
    );
    assert_eq!(results(&graph), vec![2.0; 8]);
}

#[test]
fn cycle_is_rejected() {
    let mut builder = GraphBuilder::new();
    let a = builder.channel("A");
    let b = builder.channel("B");
    let first = builder.op(Op::Add, &[a, b]).unwrap();
    let second = builder.op(Op::Multiply, &[first, b]).unwrap();
    builder.output(second, "Result");
    builder.connect(second, first, 1).unwrap();
    let graph = builder
        .build(&NodeRegistry::with_builtins(), &provider())
        .unwrap();

    let err = Plan::compile(&graph, &ab_map()).unwrap_err();
    assert_eq!(err, PlanError::GraphCycle { node: NodeId(2) });
    assert_eq!(err.node_id(), NodeId(2));
}

#[test]
fn missing_temperature_fails_before_reading() {
    let graph = parse(
        r#"[{"kind": "Channel", "properties": ["Temperature"]},
            {"kind": "Output", "connections": [0], "properties": ["Heat"]}]"#,
    );
    match ChannelOpStream::new(ab_source(), &graph) {
        Err(StreamError::Plan(PlanError::MissingChannel { node, channel })) => {
            assert_eq!(node, NodeId(0));
            assert_eq!(channel, "Temperature");
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("compiled against a missing channel"),
    }
}

#[test]
fn compile_is_deterministic() {
    let graph = parse(
        r#"[{"kind": "Output", "connections": [3], "properties": ["Result"]},
            {"kind": "Channel", "properties": ["A"]},
            {"kind": "Channel", "properties": ["B"]},
            {"kind": "Subtract", "connections": [1, 2]}]"#,
    );
    let first = Plan::compile(&graph, &ab_map()).unwrap();
    let second = Plan::compile(&graph, &ab_map()).unwrap();
    assert_eq!(first.order, second.order);
    assert_eq!(first.outputs, second.outputs);
    assert_eq!(first.order.last(), Some(&NodeId(0)));
    assert_eq!(results(&graph), vec![-1.0; 8]);
}

#[test]
fn unknown_kind_is_reported_with_its_node() {
    let err = Graph::from_json(
        r#"[{"kind": "Channel", "properties": ["A"]}, {"kind": "Teleport", "connections": [0]}]"#,
        &NodeRegistry::with_builtins(),
        &provider(),
    )
    .unwrap_err();
    assert_eq!(err.node_id(), Some(NodeId(1)));
}
