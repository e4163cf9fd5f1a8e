use super::decorator::DecoratorCore;
use super::{check_buffer, BoxedStream, ParticleStream, StreamError};
use crate::channel_map::ChannelMap;
use crate::graph::Graph;
use crate::node::NodeRegistry;
use crate::plan::Plan;
use crate::rt::{evaluate_safe, Runtime};
use crate::value::ValueProvider;
use log::{debug, warn};
use std::sync::Arc;

/// Runs a compiled expression graph on every particle.
///
/// The graph is compiled once, against everything the upstream can supply.
/// Channels the graph writes join the native and default output maps; the
/// request sent upstream adds the channels the graph reads.
pub struct ChannelOpStream {
    core: DecoratorCore,
    plan: Plan,
    outputs: ChannelMap,
    runtime: Option<Runtime>,
    failures: u64,
}

impl ChannelOpStream {
    pub fn new(upstream: BoxedStream, graph: &Graph) -> Result<Self, StreamError> {
        let available = upstream
            .channel_map()
            .union(upstream.native_channel_map())?;
        let plan = Plan::compile(graph, &available)?;
        let outputs = plan.output_map()?;
        let native = upstream.native_channel_map().union(&outputs)?;
        let map = upstream.channel_map().union(&outputs)?;
        debug!(
            "ChannelOpStream: {} steps reading {:?}, writing {}",
            plan.steps.len(),
            plan.input_channels(),
            outputs
        );
        let core = DecoratorCore::new("ChannelOpStream", upstream, native);
        let mut stream = Self {
            core,
            plan,
            outputs,
            runtime: None,
            failures: 0,
        };
        stream.negotiate(&map)?;
        Ok(stream)
    }

    /// Parses, compiles and attaches a JSON graph.
    pub fn from_json(
        upstream: BoxedStream,
        json: &str,
        registry: &NodeRegistry,
        provider: &Arc<dyn ValueProvider>,
    ) -> Result<Self, StreamError> {
        let graph = Graph::from_json(json, registry, provider)?;
        Self::new(upstream, &graph)
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Particles whose evaluation panicked so far.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn negotiate(&mut self, map: &ChannelMap) -> Result<(), StreamError> {
        let reads: Vec<&str> = self
            .plan
            .input_channels()
            .iter()
            .map(String::as_str)
            .collect();
        let extra = self.core.required(&reads)?.union(&self.outputs)?;
        self.core.negotiate(map, &extra)?;
        self.runtime = Some(Runtime::new(self.plan.clone(), self.core.request())?);
        Ok(())
    }
}

impl ParticleStream for ChannelOpStream {
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
            if self.failures > 0 {
                warn!(
                    "{}: {} particles failed to evaluate and carry NaN outputs",
                    self.core.name(),
                    self.failures
                );
            }
            self.core.finish();
            return Ok(false);
        }
        if let Some(runtime) = self.runtime.as_mut() {
            let (_, record) = self.core.parts();
            if !evaluate_safe(runtime, record) {
                self.failures += 1;
            }
        }
        self.core.emit(particle);
        Ok(true)
    }

    fn particle_count(&self) -> i64 {
        self.core.upstream().particle_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::graph::NodeId;
    use crate::plan::PlanError;
    use crate::stream::{GeneratorStream, ParticleArray};
    use crate::value::NullProvider;

    fn source(count: u64) -> BoxedStream {
        let map = ChannelMap::from_channels(&[
            ("A", 1, DataType::Float32),
            ("B", 1, DataType::Float32),
        ])
        .unwrap();
        let a = map.accessor::<f32>("A").unwrap();
        let b = map.accessor::<f32>("B").unwrap();
        Box::new(
            GeneratorStream::new(map, move |i, _, r| {
                a.set(r, 2.0);
                b.set(r, 3.0 + i as f32);
                true
            })
            .with_count(count),
        )
    }

    fn provider() -> Arc<dyn ValueProvider> {
        Arc::new(NullProvider)
    }

    const ADD: &str = r#"[
        {"kind": "Channel", "properties": ["A"]},
        {"kind": "Channel", "properties": ["B"]},
        {"kind": "Add", "connections": [0, 1]},
        {"kind": "Output", "connections": [2], "properties": ["Result"]}
    ]"#;

    #[test]
    fn adds_output_channel() {
        let mut stream =
            ChannelOpStream::from_json(source(3), ADD, &NodeRegistry::with_builtins(), &provider())
                .unwrap();
        assert!(stream.channel_map().has_channel("Result"));
        assert!(stream.native_channel_map().has_channel("Result"));
        assert_eq!(stream.particle_count(), 3);

        let array = ParticleArray::from_stream(&mut stream).unwrap();
        let result = array.channel_map().accessor::<f32>("Result").unwrap();
        assert_eq!(
            array.iter().map(|r| result.get(r)).collect::<Vec<_>>(),
            vec![5.0, 6.0, 7.0]
        );
        assert_eq!(stream.failures(), 0);
    }

    #[test]
    fn narrow_output_still_reads_inputs() {
        let mut stream =
            ChannelOpStream::from_json(source(2), ADD, &NodeRegistry::with_builtins(), &provider())
                .unwrap();
        let narrow = ChannelMap::from_channels(&[("Result", 1, DataType::Float16)]).unwrap();
        stream.set_channel_map(&narrow).unwrap();
        let array = ParticleArray::from_stream(&mut stream).unwrap();
        let result = narrow.convert_accessor::<f32>("Result").unwrap();
        assert_eq!(
            array.iter().map(|r| result.get(r)).collect::<Vec<_>>(),
            vec![5.0, 6.0]
        );
    }

    #[test]
    fn missing_channel_fails_at_construction() {
        let json = r#"[
            {"kind": "Channel", "properties": ["Temperature"]},
            {"kind": "Output", "connections": [0], "properties": ["Heat"]}
        ]"#;
        let err = ChannelOpStream::from_json(source(5), json, &NodeRegistry::with_builtins(), &provider())
            .err()
            .unwrap();
        match err {
            StreamError::Plan(PlanError::MissingChannel { node, channel }) => {
                assert_eq!(node, NodeId(0));
                assert_eq!(channel, "Temperature");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
