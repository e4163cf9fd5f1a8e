//! Node kinds: the built-in operator set, the kind→factory registry and
//! trait-based definitions for external operators.

#![forbid(unsafe_code)]

use crate::curve::{BezierCurve, CurvePoint};
use crate::data_type::DataType;
use crate::geometry::Mesh;
use crate::graph::{GraphError, NodeId, NodeKind, NodeRecord, Property, SurfaceField};
use crate::plan::ValueType;
use crate::stream::TransformKind;
use crate::value::{Constant, ConstantKind, TextureOutput, ValueProvider};
use glam::{Mat4, Vec2};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Built-in operator with a fixed number of inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    SquareRoot,
    AbsoluteValue,
    Floor,
    Ceil,
    Negate,
    Logarithm,
    Normalize,
    Magnitude,
    ComponentSum,
    Sin,
    Cos,
    Tan,
    ASin,
    ACos,
    ATan,
    ToFloat,
    ToInteger,
    LogicalNot,
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Modulo,
    DotProduct,
    CrossProduct,
    FromQuat,
    ToScalar,
    TransformByQuat,
    NearestPoint,
    ATan2,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Equal,
    LogicalAnd,
    LogicalOr,
    Blend,
    Clamp,
    Noise,
    DNoise,
    ToQuat,
    ToVector,
    RayIntersect,
    Switch,
}

impl Op {
    /// Every operator, in registration order.
    pub const ALL: [Op; 46] = [
        Op::SquareRoot,
        Op::AbsoluteValue,
        Op::Floor,
        Op::Ceil,
        Op::Negate,
        Op::Logarithm,
        Op::Normalize,
        Op::Magnitude,
        Op::ComponentSum,
        Op::Sin,
        Op::Cos,
        Op::Tan,
        Op::ASin,
        Op::ACos,
        Op::ATan,
        Op::ToFloat,
        Op::ToInteger,
        Op::LogicalNot,
        Op::Add,
        Op::Subtract,
        Op::Multiply,
        Op::Divide,
        Op::Power,
        Op::Modulo,
        Op::DotProduct,
        Op::CrossProduct,
        Op::FromQuat,
        Op::ToScalar,
        Op::TransformByQuat,
        Op::NearestPoint,
        Op::ATan2,
        Op::Less,
        Op::LessOrEqual,
        Op::Greater,
        Op::GreaterOrEqual,
        Op::Equal,
        Op::LogicalAnd,
        Op::LogicalOr,
        Op::Blend,
        Op::Clamp,
        Op::Noise,
        Op::DNoise,
        Op::ToQuat,
        Op::ToVector,
        Op::RayIntersect,
        Op::Switch,
    ];

    /// Serialized kind tag.
    pub fn tag(self) -> &'static str {
        match self {
            Op::SquareRoot => "SquareRoot",
            Op::AbsoluteValue => "AbsoluteValue",
            Op::Floor => "Floor",
            Op::Ceil => "Ceil",
            Op::Negate => "Negate",
            Op::Logarithm => "Logarithm",
            Op::Normalize => "Normalize",
            Op::Magnitude => "Magnitude",
            Op::ComponentSum => "ComponentSum",
            Op::Sin => "Sin",
            Op::Cos => "Cos",
            Op::Tan => "Tan",
            Op::ASin => "ASin",
            Op::ACos => "ACos",
            Op::ATan => "ATan",
            Op::ToFloat => "ToFloat",
            Op::ToInteger => "ToInteger",
            Op::LogicalNot => "LogicalNot",
            Op::Add => "Add",
            Op::Subtract => "Subtract",
            Op::Multiply => "Multiply",
            Op::Divide => "Divide",
            Op::Power => "Power",
            Op::Modulo => "Modulo",
            Op::DotProduct => "DotProduct",
            Op::CrossProduct => "CrossProduct",
            Op::FromQuat => "FromQuat",
            Op::ToScalar => "ToScalar",
            Op::TransformByQuat => "TransformByQuat",
            Op::NearestPoint => "NearestPoint",
            Op::ATan2 => "ATan2",
            Op::Less => "Less",
            Op::LessOrEqual => "LessOrEqual",
            Op::Greater => "Greater",
            Op::GreaterOrEqual => "GreaterOrEqual",
            Op::Equal => "Equal",
            Op::LogicalAnd => "LogicalAnd",
            Op::LogicalOr => "LogicalOr",
            Op::Blend => "Blend",
            Op::Clamp => "Clamp",
            Op::Noise => "Noise",
            Op::DNoise => "DNoise",
            Op::ToQuat => "ToQuat",
            Op::ToVector => "ToVector",
            Op::RayIntersect => "RayIntersect",
            Op::Switch => "Switch",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Op::ALL.iter().copied().find(|op| op.tag() == tag)
    }

    pub fn input_count(self) -> usize {
        use Op::*;
        match self {
            SquareRoot | AbsoluteValue | Floor | Ceil | Negate | Logarithm | Normalize
            | Magnitude | ComponentSum | Sin | Cos | Tan | ASin | ACos | ATan | ToFloat
            | ToInteger | LogicalNot => 1,
            Blend | Clamp | Noise | DNoise | ToQuat | ToVector | RayIntersect | Switch => 3,
            _ => 2,
        }
    }
}

/// Object-safe operator definition for external operators.
pub trait OperatorDefDyn: Send + Sync {
    fn input_count(&self) -> usize;
    fn result_type(&self, inputs: &[ValueType]) -> Result<ValueType, String>;
    fn init_state(&self) -> Box<dyn Any + Send>;
    fn evaluate(
        &self,
        state: &mut dyn Any,
        inputs: &[&[f32]],
        out: &mut [f32],
    ) -> Result<(), &'static str>;
}

/// Generic operator definition; implement this for your own operators.
///
/// Inputs arrive as float slices sized by their inferred type; `Int` inputs
/// hold the integer's bit pattern. An `Err` from `evaluate` fills the result
/// with NaN for that particle.
pub trait OperatorDef: Send + Sync + 'static {
    type State: Send + 'static;
    fn input_count(&self) -> usize;
    fn result_type(&self, inputs: &[ValueType]) -> Result<ValueType, String>;
    fn init_state(&self) -> Self::State;
    fn evaluate(
        &self,
        state: &mut Self::State,
        inputs: &[&[f32]],
        out: &mut [f32],
    ) -> Result<(), &'static str>;
}

impl<T: OperatorDef> OperatorDefDyn for T {
    fn input_count(&self) -> usize {
        <T as OperatorDef>::input_count(self)
    }

    fn result_type(&self, inputs: &[ValueType]) -> Result<ValueType, String> {
        <T as OperatorDef>::result_type(self, inputs)
    }

    fn init_state(&self) -> Box<dyn Any + Send> {
        Box::new(<T as OperatorDef>::init_state(self))
    }

    fn evaluate(
        &self,
        state: &mut dyn Any,
        inputs: &[&[f32]],
        out: &mut [f32],
    ) -> Result<(), &'static str> {
        if let Some(typed) = state.downcast_mut::<<T as OperatorDef>::State>() {
            <T as OperatorDef>::evaluate(self, typed, inputs, out)
        } else {
            Err("state type mismatch in external operator")
        }
    }
}

/// Property kinds a node shape can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Bool,
    Int,
    /// Integer or float.
    Number,
    String,
    List,
}

impl PropertyKind {
    fn accepts(self, p: &Property) -> bool {
        matches!(
            (self, p),
            (PropertyKind::Bool, Property::Bool(_))
                | (PropertyKind::Int, Property::Int(_))
                | (PropertyKind::Number, Property::Int(_) | Property::Float(_))
                | (PropertyKind::String, Property::String(_))
                | (PropertyKind::List, Property::List(_))
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySlot {
    pub kind: PropertyKind,
    pub required: bool,
}

const REQ_STRING: PropertySlot = PropertySlot {
    kind: PropertyKind::String,
    required: true,
};
const OPT_STRING: PropertySlot = PropertySlot {
    kind: PropertyKind::String,
    required: false,
};
const REQ_INT: PropertySlot = PropertySlot {
    kind: PropertyKind::Int,
    required: true,
};
const OPT_INT: PropertySlot = PropertySlot {
    kind: PropertyKind::Int,
    required: false,
};
const REQ_LIST: PropertySlot = PropertySlot {
    kind: PropertyKind::List,
    required: true,
};

/// Expected record shape of a node kind, checked before its factory runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeShape {
    pub inputs: usize,
    pub properties: &'static [PropertySlot],
}

impl NodeShape {
    pub const fn operator(inputs: usize) -> Self {
        Self {
            inputs,
            properties: &[],
        }
    }
}

/// A record under construction, with typed property access.
pub struct NodeSpec<'a> {
    id: NodeId,
    record: &'a NodeRecord,
    node_count: usize,
}

impl<'a> NodeSpec<'a> {
    pub(crate) fn new(id: NodeId, record: &'a NodeRecord, node_count: usize) -> Self {
        Self {
            id,
            record,
            node_count,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn record(&self) -> &NodeRecord {
        self.record
    }

    /// Connection `index` if it names a node of the graph.
    pub fn valid_connection(&self, index: usize) -> Option<NodeId> {
        self.record
            .connections
            .get(index)
            .and_then(|&c| usize::try_from(c).ok())
            .filter(|&c| c < self.node_count)
            .map(NodeId)
    }

    /// The first `count` connections. Extra connections are ignored.
    pub fn inputs(&self, count: usize) -> Result<Vec<NodeId>, GraphError> {
        (0..count)
            .map(|i| {
                self.valid_connection(i).ok_or_else(|| {
                    GraphError::malformed(self.id, format!("input {} is not connected", i))
                })
            })
            .collect()
    }

    pub fn input(&self) -> Result<NodeId, GraphError> {
        Ok(self.inputs(1)?[0])
    }

    pub fn property(&self, index: usize) -> Option<&'a Property> {
        self.record.properties.get(index)
    }

    pub fn string(&self, index: usize) -> Result<&'a str, GraphError> {
        self.property(index)
            .and_then(Property::as_str)
            .ok_or_else(|| self.malformed(format!("property {} must be a string", index)))
    }

    pub fn int(&self, index: usize) -> Result<i64, GraphError> {
        self.property(index)
            .and_then(Property::as_i64)
            .ok_or_else(|| self.malformed(format!("property {} must be an integer", index)))
    }

    pub fn list(&self, index: usize) -> Result<&'a [Property], GraphError> {
        self.property(index)
            .and_then(Property::as_list)
            .ok_or_else(|| self.malformed(format!("property {} must be a list", index)))
    }

    pub fn malformed(&self, reason: impl Into<String>) -> GraphError {
        GraphError::malformed(self.id, reason)
    }

    pub(crate) fn check_shape(&self, shape: &NodeShape) -> Result<(), GraphError> {
        if self.record.connections.len() < shape.inputs {
            return Err(self.malformed(format!(
                "{} expects {} inputs, got {}",
                self.record.kind,
                shape.inputs,
                self.record.connections.len()
            )));
        }
        self.inputs(shape.inputs)?;
        for (i, slot) in shape.properties.iter().enumerate() {
            match self.record.properties.get(i) {
                None if slot.required => {
                    return Err(self.malformed(format!(
                        "{} is missing property {}",
                        self.record.kind, i
                    )))
                }
                Some(p) if !slot.kind.accepts(p) => {
                    return Err(self.malformed(format!(
                        "property {} should be {:?}, got {:?}",
                        i, slot.kind, p
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// State shared by factories during one parse.
pub struct ParseContext<'a> {
    provider: &'a Arc<dyn ValueProvider>,
    meshes: HashMap<String, Arc<Mesh>>,
}

impl<'a> ParseContext<'a> {
    pub(crate) fn new(provider: &'a Arc<dyn ValueProvider>) -> Self {
        Self {
            provider,
            meshes: HashMap::new(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn ValueProvider> {
        self.provider
    }

    /// Looks a mesh up once per parse.
    pub fn mesh(&mut self, name: &str) -> Option<Arc<Mesh>> {
        if let Some(mesh) = self.meshes.get(name) {
            return Some(mesh.clone());
        }
        let mesh = self.provider.named_geometry(name)?;
        self.meshes.insert(name.to_string(), mesh.clone());
        Some(mesh)
    }
}

/// Builds a [`NodeKind`] from a record whose shape has been checked.
pub trait NodeFactory: Send + Sync {
    fn shape(&self) -> NodeShape;
    fn build(&self, spec: &NodeSpec<'_>, ctx: &mut ParseContext<'_>) -> Result<NodeKind, GraphError>;
}

/// Explicit kind→factory table handed to the parser.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.factories.keys().collect();
        tags.sort();
        f.debug_struct("NodeRegistry").field("kinds", &tags).finish()
    }
}

impl NodeRegistry {
    /// Registry with no kinds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in input, operator and output kind.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("Channel", ChannelFactory);
        registry.register("Value", ValueFactory);
        registry.register("Script", ScriptFactory);
        registry.register("TextureMap", TextureFactory);
        registry.register("Geometry", GeometryFactory);
        registry.register("Output", OutputFactory);
        registry.register("Curve", CurveFactory);
        registry.register("SurfDataValue", SurfDataFactory);
        for op in Op::ALL {
            registry.register(op.tag(), OpFactory(op));
        }
        for (tag, space, inverse) in [
            ("ToWorld", Space::World, false),
            ("FromWorld", Space::World, true),
            ("ToSpace", Space::Named, true),
            ("FromSpace", Space::Named, false),
            ("ToView", Space::View, true),
            ("FromView", Space::View, false),
        ] {
            registry.register(tag, TransformFactory { space, inverse });
        }
        registry
    }

    /// Registers `factory` under `tag`, replacing any earlier one.
    pub fn register<F: NodeFactory + 'static>(&mut self, tag: &str, factory: F) {
        self.factories.insert(tag.to_string(), Arc::new(factory));
    }

    /// Registers an external operator under `tag`.
    pub fn register_operator<D: OperatorDef>(&mut self, tag: &str, def: D) {
        self.register(
            tag,
            ExternalFactory {
                def: Arc::new(def),
            },
        );
    }

    pub fn get(&self, tag: &str) -> Option<&Arc<dyn NodeFactory>> {
        self.factories.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }
}

struct ChannelFactory;

impl NodeFactory for ChannelFactory {
    fn shape(&self) -> NodeShape {
        NodeShape {
            inputs: 0,
            properties: &[REQ_STRING],
        }
    }

    fn build(&self, spec: &NodeSpec<'_>, _: &mut ParseContext<'_>) -> Result<NodeKind, GraphError> {
        Ok(NodeKind::Channel {
            name: spec.string(0)?.to_string(),
        })
    }
}

struct ValueFactory;

impl NodeFactory for ValueFactory {
    fn shape(&self) -> NodeShape {
        NodeShape {
            inputs: 0,
            properties: &[REQ_STRING, REQ_STRING],
        }
    }

    fn build(&self, spec: &NodeSpec<'_>, ctx: &mut ParseContext<'_>) -> Result<NodeKind, GraphError> {
        let ty = spec.string(0)?;
        let path = spec.string(1)?;
        let sampled = ctx
            .provider()
            .constant_value(ConstantKind::Track, path)
            .ok_or_else(|| spec.malformed(format!("no track value at \"{}\"", path)))?;
        let value = match (ty, sampled) {
            ("Integer", Constant::Int(i)) => Constant::Int(i),
            ("Integer", Constant::Float(f)) => Constant::Int((f + 0.5).floor() as i32),
            ("Float", Constant::Float(f)) => Constant::Float(f),
            ("Float", Constant::Int(i)) => Constant::Float(i as f32),
            ("Vector", Constant::Vector(v)) => Constant::Vector(v),
            ("Integer" | "Float" | "Vector", other) => {
                return Err(spec.malformed(format!(
                    "track \"{}\" holds {:?}, not a {} value",
                    path, other, ty
                )))
            }
            _ => return Err(spec.malformed(format!("unknown value type \"{}\"", ty))),
        };
        Ok(NodeKind::Constant { value })
    }
}

struct ScriptFactory;

impl NodeFactory for ScriptFactory {
    fn shape(&self) -> NodeShape {
        NodeShape {
            inputs: 0,
            properties: &[REQ_STRING],
        }
    }

    fn build(&self, spec: &NodeSpec<'_>, ctx: &mut ParseContext<'_>) -> Result<NodeKind, GraphError> {
        let expression = spec.string(0)?;
        let value = ctx
            .provider()
            .constant_value(ConstantKind::Script, expression)
            .ok_or_else(|| spec.malformed(format!("script \"{}\" produced no value", expression)))?;
        Ok(NodeKind::Constant { value })
    }
}

struct TextureFactory;

impl NodeFactory for TextureFactory {
    fn shape(&self) -> NodeShape {
        NodeShape {
            inputs: 0,
            properties: &[REQ_INT, OPT_STRING],
        }
    }

    fn build(&self, spec: &NodeSpec<'_>, ctx: &mut ParseContext<'_>) -> Result<NodeKind, GraphError> {
        let index = spec.int(0)?;
        if index < 1 {
            return Err(spec.malformed(format!("texture map index {} must be at least 1", index)));
        }
        let map = (index - 1) as usize;
        if !ctx.provider().has_shader(map) {
            return Err(spec.malformed(format!("texture map {} is not available", index)));
        }
        let output = match spec.property(1) {
            None => TextureOutput::Color,
            Some(_) => {
                let name = spec.string(1)?;
                TextureOutput::parse(name)
                    .ok_or_else(|| spec.malformed(format!("unknown texture output \"{}\"", name)))?
            }
        };
        Ok(NodeKind::Texture {
            map,
            output,
            provider: ctx.provider().clone(),
        })
    }
}

struct GeometryFactory;

impl NodeFactory for GeometryFactory {
    fn shape(&self) -> NodeShape {
        NodeShape {
            inputs: 0,
            properties: &[REQ_LIST],
        }
    }

    fn build(&self, spec: &NodeSpec<'_>, ctx: &mut ParseContext<'_>) -> Result<NodeKind, GraphError> {
        let names = spec.list(0)?;
        let mut meshes = Vec::with_capacity(names.len());
        for name in names {
            let name = name
                .as_str()
                .ok_or_else(|| spec.malformed("geometry names must be strings"))?;
            let mesh = ctx
                .mesh(name)
                .ok_or_else(|| spec.malformed(format!("unknown geometry \"{}\"", name)))?;
            meshes.push(mesh);
        }
        Ok(NodeKind::Geometry { meshes })
    }
}

struct OutputFactory;

impl NodeFactory for OutputFactory {
    fn shape(&self) -> NodeShape {
        NodeShape {
            inputs: 1,
            properties: &[
                REQ_STRING,
                OPT_STRING,
                OPT_INT,
            ],
        }
    }

    fn build(&self, spec: &NodeSpec<'_>, _: &mut ParseContext<'_>) -> Result<NodeKind, GraphError> {
        let channel = spec.string(0)?.to_string();
        if channel.is_empty() {
            return Err(spec.malformed("output channel name is empty"));
        }
        let data_type = match spec.property(1) {
            None => DataType::Float32,
            Some(_) => spec
                .string(1)?
                .parse::<DataType>()
                .map_err(|e| spec.malformed(e.to_string()))?,
        };
        let arity = match spec.property(2) {
            None => None,
            Some(_) => {
                let a = spec.int(2)?;
                if !(1..=16).contains(&a) {
                    return Err(spec.malformed(format!("invalid output arity {}", a)));
                }
                Some(a as usize)
            }
        };
        Ok(NodeKind::Output {
            input: spec.input()?,
            channel,
            data_type,
            arity,
        })
    }
}

struct OpFactory(Op);

impl NodeFactory for OpFactory {
    fn shape(&self) -> NodeShape {
        NodeShape::operator(self.0.input_count())
    }

    fn build(&self, spec: &NodeSpec<'_>, _: &mut ParseContext<'_>) -> Result<NodeKind, GraphError> {
        Ok(NodeKind::Operator {
            op: self.0,
            inputs: spec.inputs(self.0.input_count())?,
        })
    }
}

fn vec2(spec: &NodeSpec<'_>, p: &Property) -> Result<Vec2, GraphError> {
    match p.as_list() {
        Some([x, y]) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => Ok(Vec2::new(x as f32, y as f32)),
            _ => Err(spec.malformed("curve coordinates must be numbers")),
        },
        _ => Err(spec.malformed("curve coordinates must be [x, y] pairs")),
    }
}

struct CurveFactory;

impl NodeFactory for CurveFactory {
    fn shape(&self) -> NodeShape {
        NodeShape {
            inputs: 1,
            properties: &[REQ_LIST],
        }
    }

    fn build(&self, spec: &NodeSpec<'_>, _: &mut ParseContext<'_>) -> Result<NodeKind, GraphError> {
        let mut points = Vec::new();
        for (i, point) in spec.list(0)?.iter().enumerate() {
            match point.as_list() {
                Some([pos, in_tan, out_tan, ..]) => points.push(CurvePoint {
                    position: vec2(spec, pos)?,
                    in_tangent: vec2(spec, in_tan)?,
                    out_tangent: vec2(spec, out_tan)?,
                }),
                _ => return Err(spec.malformed(format!("invalid element {} in curve", i))),
            }
        }
        let curve = BezierCurve::new(points).map_err(|e| spec.malformed(e.to_string()))?;
        Ok(NodeKind::Curve {
            input: spec.input()?,
            curve: Arc::new(curve),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Space {
    World,
    Named,
    View,
}

struct TransformFactory {
    space: Space,
    inverse: bool,
}

impl NodeFactory for TransformFactory {
    fn shape(&self) -> NodeShape {
        NodeShape {
            inputs: 1,
            properties: &[REQ_STRING, OPT_STRING],
        }
    }

    fn build(&self, spec: &NodeSpec<'_>, ctx: &mut ParseContext<'_>) -> Result<NodeKind, GraphError> {
        let operand = match spec.string(0)? {
            "Point" => TransformKind::Point,
            "Vector" => TransformKind::Vector,
            "Normal" => TransformKind::Normal,
            other => {
                return Err(spec.malformed(format!("unexpected transform operand \"{}\"", other)))
            }
        };
        let provider = ctx.provider();
        let matrix: Mat4 = match self.space {
            Space::World => provider
                .bound_transform()
                .ok_or_else(|| spec.malformed("no bound object in this context"))?,
            Space::View => provider
                .camera_transform()
                .ok_or_else(|| spec.malformed("no camera in this context"))?,
            Space::Named => {
                let name = spec.string(1)?;
                provider
                    .named_transform(name)
                    .ok_or_else(|| spec.malformed(format!("could not find object \"{}\"", name)))?
            }
        };
        let matrix = if self.inverse {
            matrix.inverse()
        } else {
            matrix
        };
        Ok(NodeKind::Transform {
            input: spec.input()?,
            matrix,
            operand,
        })
    }
}

struct SurfDataFactory;

impl NodeFactory for SurfDataFactory {
    fn shape(&self) -> NodeShape {
        NodeShape {
            inputs: 1,
            properties: &[REQ_STRING],
        }
    }

    fn build(&self, spec: &NodeSpec<'_>, _: &mut ParseContext<'_>) -> Result<NodeKind, GraphError> {
        let target = spec.string(0)?;
        let field = SurfaceField::parse(target)
            .ok_or_else(|| spec.malformed(format!("invalid surface data target \"{}\"", target)))?;
        Ok(NodeKind::SurfaceData {
            input: spec.input()?,
            field,
        })
    }
}

struct ExternalFactory {
    def: Arc<dyn OperatorDefDyn>,
}

impl NodeFactory for ExternalFactory {
    fn shape(&self) -> NodeShape {
        NodeShape::operator(self.def.input_count())
    }

    fn build(&self, spec: &NodeSpec<'_>, _: &mut ParseContext<'_>) -> Result<NodeKind, GraphError> {
        Ok(NodeKind::External {
            def: self.def.clone(),
            inputs: spec.inputs(self.def.input_count())?,
        })
    }
}
