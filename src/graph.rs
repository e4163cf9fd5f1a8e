//! Graph module: serialized node records and the parsed node arena.
//!
//! A graph arrives as an ordered list of [`NodeRecord`]s; the position of a
//! record is its [`NodeId`]. Parsing resolves every record through a
//! [`NodeRegistry`] into a typed [`NodeKind`], sampling host constants once.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use crate::curve::BezierCurve;
use crate::data_type::DataType;
use crate::geometry::Mesh;
use crate::node::{NodeRegistry, NodeSpec, Op, OperatorDefDyn, ParseContext};
use crate::stream::TransformKind;
use crate::value::{Constant, TextureOutput, ValueProvider};
use glam::Mat4;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Unique identifier for a node: its position in the record list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A property value attached to a node record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Property {
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
    /// Nested list of properties.
    List(Vec<Property>),
}

impl Property {
    /// The value as a float, accepting integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Property::Int(i) => Some(*i as f64),
            Property::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The value as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Property::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Property::String(s) => Some(s),
            _ => None,
        }
    }

    /// The value as a list.
    pub fn as_list(&self) -> Option<&[Property]> {
        match self {
            Property::List(l) => Some(l),
            _ => None,
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One serialized node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Registry tag, e.g. `"Add"` or `"Channel"`.
    pub kind: String,
    /// Source node id per input socket. Negative means unconnected.
    #[serde(default)]
    pub connections: Vec<i64>,
    /// Kind-specific properties.
    #[serde(default)]
    pub properties: Vec<Property>,
    /// Disabled nodes pass connection 0 through.
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
}

impl NodeRecord {
    /// Record with no connections or properties.
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            connections: Vec::new(),
            properties: Vec::new(),
            disabled: false,
        }
    }
}

/// The field a `SurfDataValue` node extracts from a surface hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceField {
    /// Hit position.
    Position,
    /// Distance to the hit, signed by side.
    SignedDistance,
    /// Geometric normal of the hit face.
    FaceNormal,
    /// Interpolated vertex normal.
    SmoothNormal,
    /// Index of the mesh in the geometry input.
    MeshIndex,
    /// Index of the hit face.
    FaceIndex,
    /// Material id of the hit face.
    FaceMatId,
    /// Smoothing group bits of the hit face.
    SmoothGroup,
    /// Barycentric coordinates within the face.
    BaryCoords,
    /// Interpolated texture coordinates.
    TextureCoord,
    /// 1 when something was hit, else 0.
    Valid,
}

impl SurfaceField {
    /// Parses the serialized field name.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "Position" => SurfaceField::Position,
            "SignedDistance" => SurfaceField::SignedDistance,
            "FaceNormal" => SurfaceField::FaceNormal,
            "SmoothNormal" => SurfaceField::SmoothNormal,
            "MeshIndex" => SurfaceField::MeshIndex,
            "FaceIndex" => SurfaceField::FaceIndex,
            "FaceMatID" => SurfaceField::FaceMatId,
            "SmoothGroup" => SurfaceField::SmoothGroup,
            "BaryCoords" => SurfaceField::BaryCoords,
            "TextureCoord" => SurfaceField::TextureCoord,
            "Valid" => SurfaceField::Valid,
            _ => return None,
        })
    }
}

/// Parsed node payload.
#[non_exhaustive]
#[derive(Clone)]
pub enum NodeKind {
    /// Per-particle channel read.
    Channel {
        /// Channel name.
        name: String,
    },
    /// Value fixed at parse time.
    Constant {
        /// The sampled value.
        value: Constant,
    },
    /// Shader evaluated per particle.
    Texture {
        /// Host shader index.
        map: usize,
        /// Which result to return.
        output: TextureOutput,
        /// Where the shader runs.
        provider: Arc<dyn ValueProvider>,
    },
    /// Meshes for surface queries.
    Geometry {
        /// Resolved meshes, in input order.
        meshes: Vec<Arc<Mesh>>,
    },
    /// Fixed-arity built-in operator.
    Operator {
        /// The operation.
        op: Op,
        /// Input nodes, one per socket.
        inputs: Vec<NodeId>,
    },
    /// Function curve lookup.
    Curve {
        /// Scalar input.
        input: NodeId,
        /// The curve.
        curve: Arc<BezierCurve>,
    },
    /// Space conversion with a matrix resolved at parse time.
    Transform {
        /// Vector input.
        input: NodeId,
        /// Full matrix to apply.
        matrix: Mat4,
        /// Point, vector or normal semantics.
        operand: TransformKind,
    },
    /// Field extraction from a surface hit.
    SurfaceData {
        /// Surface hit input.
        input: NodeId,
        /// Field to extract.
        field: SurfaceField,
    },
    /// Writes a value to a particle channel.
    Output {
        /// Value to write.
        input: NodeId,
        /// Target channel.
        channel: String,
        /// Storage type of the channel.
        data_type: DataType,
        /// Channel arity; the input's arity when `None`.
        arity: Option<usize>,
    },
    /// Disabled node: forwards its first input, or terminates when it has none.
    Disabled {
        /// The forwarded node.
        passthrough: Option<NodeId>,
    },
    /// Operator implemented outside the crate.
    External {
        /// The operator definition.
        def: Arc<dyn OperatorDefDyn>,
        /// Input nodes, one per socket.
        inputs: Vec<NodeId>,
    },
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Channel { name } => write!(f, "Channel({})", name),
            NodeKind::Constant { value } => write!(f, "Constant({:?})", value),
            NodeKind::Texture { map, output, .. } => write!(f, "Texture({}, {:?})", map, output),
            NodeKind::Geometry { meshes } => write!(f, "Geometry({} meshes)", meshes.len()),
            NodeKind::Operator { op, inputs } => write!(f, "{:?}{:?}", op, inputs),
            NodeKind::Curve { input, .. } => write!(f, "Curve({})", input),
            NodeKind::Transform { input, operand, .. } => {
                write!(f, "Transform({}, {:?})", input, operand)
            }
            NodeKind::SurfaceData { input, field } => write!(f, "SurfData({}, {:?})", input, field),
            NodeKind::Output { input, channel, .. } => write!(f, "Output({} -> {})", input, channel),
            NodeKind::Disabled { passthrough } => write!(f, "Disabled({:?})", passthrough),
            NodeKind::External { inputs, .. } => write!(f, "External{:?}", inputs),
        }
    }
}

impl NodeKind {
    /// Nodes this node reads from, in socket order.
    pub fn inputs(&self) -> &[NodeId] {
        match self {
            NodeKind::Operator { inputs, .. } | NodeKind::External { inputs, .. } => inputs,
            NodeKind::Curve { input, .. }
            | NodeKind::Transform { input, .. }
            | NodeKind::SurfaceData { input, .. }
            | NodeKind::Output { input, .. } => std::slice::from_ref(input),
            NodeKind::Disabled { passthrough } => passthrough.as_slice(),
            NodeKind::Channel { .. }
            | NodeKind::Constant { .. }
            | NodeKind::Texture { .. }
            | NodeKind::Geometry { .. } => &[],
        }
    }

    /// True for `Output` nodes.
    pub fn is_output(&self) -> bool {
        matches!(self, NodeKind::Output { .. })
    }
}

/// A parsed node.
#[derive(Debug, Clone)]
pub struct Node {
    /// Position in the graph.
    pub id: NodeId,
    /// Registry tag it was built from.
    pub tag: String,
    /// Parsed payload.
    pub kind: NodeKind,
}

/// Errors raised while parsing a graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// No factory is registered for the record's kind.
    #[error("node {node}: unknown node kind \"{kind}\"")]
    UnknownNodeKind {
        /// Offending node.
        node: NodeId,
        /// The unknown tag.
        kind: String,
    },
    /// The record does not have the shape its kind requires.
    #[error("node {node}: {reason}")]
    MalformedNode {
        /// Offending node.
        node: NodeId,
        /// What is wrong.
        reason: String,
    },
    /// The serialized form is not valid JSON for a record list.
    #[error("invalid graph description: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphError {
    /// The node the error refers to, if any.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            GraphError::UnknownNodeKind { node, .. } | GraphError::MalformedNode { node, .. } => {
                Some(*node)
            }
            GraphError::Json(_) => None,
        }
    }

    pub(crate) fn malformed(node: NodeId, reason: impl Into<String>) -> Self {
        GraphError::MalformedNode {
            node,
            reason: reason.into(),
        }
    }
}

/// The expression graph: parsed nodes indexed by id.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses records in order, resolving each through `registry`.
    pub fn parse(
        records: &[NodeRecord],
        registry: &NodeRegistry,
        provider: &Arc<dyn ValueProvider>,
    ) -> Result<Self, GraphError> {
        let mut ctx = ParseContext::new(provider);
        let mut graph = Self::new();
        for (i, record) in records.iter().enumerate() {
            let id = NodeId(i);
            let spec = NodeSpec::new(id, record, records.len());
            let kind = if record.disabled {
                NodeKind::Disabled {
                    passthrough: spec.valid_connection(0),
                }
            } else {
                let factory =
                    registry
                        .get(&record.kind)
                        .ok_or_else(|| GraphError::UnknownNodeKind {
                            node: id,
                            kind: record.kind.clone(),
                        })?;
                spec.check_shape(&factory.shape())?;
                factory.build(&spec, &mut ctx)?
            };
            graph.nodes.push(Node {
                id,
                tag: record.kind.clone(),
                kind,
            });
        }
        debug!("parsed graph with {} nodes", graph.nodes.len());
        Ok(graph)
    }

    /// Decodes a JSON record list.
    pub fn records_from_json(json: &str) -> Result<Vec<NodeRecord>, GraphError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Decodes and parses a JSON record list.
    pub fn from_json(
        json: &str,
        registry: &NodeRegistry,
        provider: &Arc<dyn ValueProvider>,
    ) -> Result<Self, GraphError> {
        Self::parse(&Self::records_from_json(json)?, registry, provider)
    }

    /// Appends an already-built node. Input ids are checked at compile time.
    pub fn add_node(&mut self, tag: &str, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            tag: tag.to_string(),
            kind,
        });
        id
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node by id.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Output nodes in id order.
    pub fn outputs(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind.is_output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::NullProvider;

    fn provider() -> Arc<dyn ValueProvider> {
        Arc::new(NullProvider)
    }

    #[test]
    fn records_decode_with_defaults() {
        let records = Graph::records_from_json(
            r#"[
                {"kind": "Channel", "properties": ["Position"]},
                {"kind": "Magnitude", "connections": [0]},
                {"kind": "Output", "connections": [1], "properties": ["Speed", "float16", 1]}
            ]"#,
        )
        .unwrap();
        assert_eq!(records.len(), 3);
        assert!(records[0].connections.is_empty());
        assert!(!records[1].disabled);
        assert_eq!(records[2].properties[2], Property::Int(1));

        let graph = Graph::parse(&records, &NodeRegistry::with_builtins(), &provider()).unwrap();
        assert_eq!(graph.outputs().count(), 1);
        assert_eq!(graph.node(NodeId(1)).unwrap().kind.inputs(), &[NodeId(0)]);
    }

    #[test]
    fn unknown_kind_is_reported_with_its_node() {
        let records = vec![NodeRecord::new("Channel"), NodeRecord::new("Teleport")];
        let mut records = records;
        records[0].properties.push(Property::String("Position".into()));
        let err = Graph::parse(&records, &NodeRegistry::with_builtins(), &provider()).unwrap_err();
        assert!(matches!(err, GraphError::UnknownNodeKind { ref kind, .. } if kind == "Teleport"));
        assert_eq!(err.node_id(), Some(NodeId(1)));
    }

    #[test]
    fn disabled_records_skip_validation() {
        let mut record = NodeRecord::new("Teleport");
        record.disabled = true;
        record.connections.push(-1);
        let graph = Graph::parse(&[record], &NodeRegistry::with_builtins(), &provider()).unwrap();
        assert!(matches!(
            graph.nodes()[0].kind,
            NodeKind::Disabled { passthrough: None }
        ));
    }

    #[test]
    fn bad_json_is_an_error() {
        assert!(matches!(
            Graph::records_from_json("{not json"),
            Err(GraphError::Json(_))
        ));
    }
}
