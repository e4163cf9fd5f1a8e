//! DSL module: builder API producing node records.

use crate::curve::CurvePoint;
use crate::data_type::DataType;
use crate::graph::{Graph, GraphError, NodeId, NodeRecord, Property};
use crate::node::{NodeRegistry, Op};
use crate::stream::TransformKind;
use crate::value::ValueProvider;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Handle to a node in the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHandle(pub NodeId);

fn string(s: &str) -> Property {
    Property::String(s.to_string())
}

fn pair(v: glam::Vec2) -> Property {
    Property::List(vec![Property::Float(v.x as f64), Property::Float(v.y as f64)])
}

/// The graph builder. Node ids follow creation order.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    records: Vec<NodeRecord>,
    node_names: HashMap<String, NodeId>,
}

impl GraphBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record of any kind.
    pub fn node(&mut self, kind: &str, inputs: &[NodeHandle], properties: Vec<Property>) -> NodeHandle {
        let id = NodeId(self.records.len());
        self.records.push(NodeRecord {
            kind: kind.to_string(),
            connections: inputs.iter().map(|h| h.0 .0 as i64).collect(),
            properties,
            disabled: false,
        });
        NodeHandle(id)
    }

    /// Add a named record.
    pub fn node_named(
        &mut self,
        name: &str,
        kind: &str,
        inputs: &[NodeHandle],
        properties: Vec<Property>,
    ) -> NodeHandle {
        let handle = self.node(kind, inputs, properties);
        self.node_names.insert(name.to_string(), handle.0);
        handle
    }

    /// Look up a named record.
    pub fn named(&self, name: &str) -> Result<NodeHandle, DslError> {
        self.node_names
            .get(name)
            .map(|&id| NodeHandle(id))
            .ok_or_else(|| DslError::MissingNode(name.to_string()))
    }

    pub fn channel(&mut self, name: &str) -> NodeHandle {
        self.node("Channel", &[], vec![string(name)])
    }

    /// Track value sampled once; `ty` is `Integer`, `Float` or `Vector`.
    pub fn value(&mut self, ty: &str, path: &str) -> NodeHandle {
        self.node("Value", &[], vec![string(ty), string(path)])
    }

    pub fn script(&mut self, expression: &str) -> NodeHandle {
        self.node("Script", &[], vec![string(expression)])
    }

    pub fn op(&mut self, op: Op, inputs: &[NodeHandle]) -> Result<NodeHandle, DslError> {
        if inputs.len() != op.input_count() {
            return Err(DslError::InputCount {
                kind: op.tag(),
                expected: op.input_count(),
                got: inputs.len(),
            });
        }
        Ok(self.node(op.tag(), inputs, Vec::new()))
    }

    /// Float32 output with the arity of its input.
    pub fn output(&mut self, input: NodeHandle, channel: &str) -> NodeHandle {
        self.node("Output", &[input], vec![string(channel)])
    }

    pub fn output_typed(
        &mut self,
        input: NodeHandle,
        channel: &str,
        data_type: DataType,
        arity: usize,
    ) -> NodeHandle {
        self.node(
            "Output",
            &[input],
            vec![
                string(channel),
                string(data_type.name()),
                Property::Int(arity as i64),
            ],
        )
    }

    pub fn curve(&mut self, input: NodeHandle, points: &[CurvePoint]) -> NodeHandle {
        let points = points
            .iter()
            .map(|p| {
                Property::List(vec![
                    pair(p.position),
                    pair(p.in_tangent),
                    pair(p.out_tangent),
                ])
            })
            .collect();
        self.node("Curve", &[input], vec![Property::List(points)])
    }

    /// `kind` is one of the transform family tags, e.g. `"ToWorld"`.
    pub fn transform(
        &mut self,
        kind: &str,
        input: NodeHandle,
        operand: TransformKind,
        space: Option<&str>,
    ) -> NodeHandle {
        let operand = match operand {
            TransformKind::Point => "Point",
            TransformKind::Vector => "Vector",
            TransformKind::Normal => "Normal",
        };
        let mut properties = vec![string(operand)];
        if let Some(space) = space {
            properties.push(string(space));
        }
        self.node(kind, &[input], properties)
    }

    pub fn surf_data(&mut self, input: NodeHandle, target: &str) -> NodeHandle {
        self.node("SurfDataValue", &[input], vec![string(target)])
    }

    /// Disabled record forwarding `passthrough`, or a terminator.
    pub fn disabled(&mut self, passthrough: Option<NodeHandle>) -> NodeHandle {
        let inputs: Vec<NodeHandle> = passthrough.into_iter().collect();
        let handle = self.node("Disabled", &inputs, Vec::new());
        self.records[handle.0 .0].disabled = true;
        handle
    }

    /// Sets input `socket` of `to` to `from`. Unset lower sockets stay
    /// unconnected. Cycles are not checked here.
    pub fn connect(&mut self, from: NodeHandle, to: NodeHandle, socket: usize) -> Result<(), DslError> {
        if from.0 .0 >= self.records.len() {
            return Err(DslError::UnboundNode(from.0));
        }
        let record = self
            .records
            .get_mut(to.0 .0)
            .ok_or(DslError::UnboundNode(to.0))?;
        if record.connections.len() <= socket {
            record.connections.resize(socket + 1, -1);
        }
        record.connections[socket] = from.0 .0 as i64;
        Ok(())
    }

    pub fn records(&self) -> &[NodeRecord] {
        &self.records
    }

    pub fn to_json(&self) -> Result<String, DslError> {
        serde_json::to_string_pretty(&self.records).map_err(|e| DslError::Graph(GraphError::Json(e)))
    }

    /// Parse the records into a graph.
    pub fn build(
        self,
        registry: &NodeRegistry,
        provider: &Arc<dyn ValueProvider>,
    ) -> Result<Graph, DslError> {
        Ok(Graph::parse(&self.records, registry, provider)?)
    }
}

/// DSL-specific errors.
#[derive(Debug, Error)]
pub enum DslError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("no node named \"{0}\"")]
    MissingNode(String),
    #[error("node {0} does not exist")]
    UnboundNode(NodeId),
    #[error("{kind} takes {expected} inputs, got {got}")]
    InputCount {
        kind: &'static str,
        expected: usize,
        got: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;
    use crate::value::NullProvider;

    fn provider() -> Arc<dyn ValueProvider> {
        Arc::new(NullProvider)
    }

    #[test]
    fn dsl_equivalence() {
        let mut builder = GraphBuilder::new();
        let a = builder.channel("A");
        let b = builder.channel("B");
        let sum = builder.op(Op::Add, &[a, b]).unwrap();
        builder.output(sum, "Result");
        let dsl_records = builder.records().to_vec();
        let json = builder.to_json().unwrap();

        let manual = Graph::records_from_json(
            r#"[{"kind": "Channel", "properties": ["A"]},
                {"kind": "Channel", "properties": ["B"]},
                {"kind": "Add", "connections": [0, 1]},
                {"kind": "Output", "connections": [2], "properties": ["Result"]}]"#,
        )
        .unwrap();
        assert_eq!(dsl_records, manual);
        assert_eq!(Graph::records_from_json(&json).unwrap(), manual);
    }

    #[test]
    fn ui_tests() {
        let mut builder = GraphBuilder::new();
        let a = builder.channel("A");
        let err = builder.op(Op::Add, &[a]).unwrap_err();
        assert!(matches!(err, DslError::InputCount { expected: 2, got: 1, .. }));
        assert!(matches!(
            builder.named("missing"),
            Err(DslError::MissingNode(_))
        ));
        assert!(matches!(
            builder.connect(a, NodeHandle(NodeId(9)), 0),
            Err(DslError::UnboundNode(NodeId(9)))
        ));
    }

    #[test]
    fn connect_builds_back_edges() {
        let mut builder = GraphBuilder::new();
        let a = builder.channel("A");
        let first = builder.node("Negate", &[a], Vec::new());
        let second = builder.node_named("loop", "Negate", &[first], Vec::new());
        builder.connect(second, first, 0).unwrap();
        assert_eq!(builder.named("loop").unwrap(), second);
        assert_eq!(builder.records()[1].connections, vec![2]);
    }

    #[test]
    fn typed_outputs_and_disabled_nodes_parse() {
        let mut builder = GraphBuilder::new();
        let a = builder.channel("A");
        let skip = builder.disabled(Some(a));
        builder.output_typed(skip, "Result", DataType::Float16, 1);
        let graph = builder
            .build(&NodeRegistry::with_builtins(), &provider())
            .unwrap();
        assert!(matches!(
            graph.nodes()[1].kind,
            NodeKind::Disabled {
                passthrough: Some(NodeId(0))
            }
        ));
        match &graph.nodes()[2].kind {
            NodeKind::Output {
                data_type, arity, ..
            } => {
                assert_eq!(*data_type, DataType::Float16);
                assert_eq!(*arity, Some(1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
