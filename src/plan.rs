//! Plan module: compile a parsed graph into an ordered step list over one
//! flat temporaries buffer.

use crate::channel_map::{ChannelError, ChannelMap};
use crate::curve::BezierCurve;
use crate::data_type::DataType;
use crate::geometry::{Mesh, SURFACE_HIT_WIDTH};
use crate::graph::{Graph, NodeId, NodeKind, SurfaceField};
use crate::invariant_ppt::{
    assert_invariant, GRAPH_REJECTS_CYCLE, MISSING_CHANNEL_FAIL_FAST, PLAN_SLOTS_SOUND,
    PLAN_TOPOLOGICAL,
};
use crate::node::{Op, OperatorDefDyn};
use crate::stream::TransformKind;
use crate::value::{Constant, TextureOutput, ValueProvider};
use glam::Mat4;
use log::{debug, warn};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

/// Inferred type of a node's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `n` single precision components.
    Float(usize),
    /// One 32-bit integer, stored as its bit pattern.
    Int,
    /// Mesh handles; occupies no temporaries.
    Geometry,
    /// A packed surface query result.
    SurfaceHit,
}

impl ValueType {
    /// Number of `f32` cells the value occupies.
    pub fn width(self) -> usize {
        match self {
            ValueType::Float(n) => n,
            ValueType::Int => 1,
            ValueType::Geometry => 0,
            ValueType::SurfaceHit => SURFACE_HIT_WIDTH,
        }
    }

    /// Component count of numeric values.
    pub fn arity(self) -> Option<usize> {
        match self {
            ValueType::Float(n) => Some(n),
            ValueType::Int => Some(1),
            ValueType::Geometry | ValueType::SurfaceHit => None,
        }
    }

    pub fn is_int(self) -> bool {
        self == ValueType::Int
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Float(n) => write!(f, "float[{}]", n),
            ValueType::Int => write!(f, "int"),
            ValueType::Geometry => write!(f, "geometry"),
            ValueType::SurfaceHit => write!(f, "surface hit"),
        }
    }
}

/// A region of the temporaries buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: usize,
    pub ty: ValueType,
}

impl Slot {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.ty.width()
    }
}

/// What a step computes.
#[derive(Clone)]
pub enum StepKind {
    Channel {
        channel: String,
    },
    Constant(Constant),
    Texture {
        map: usize,
        output: TextureOutput,
        provider: Arc<dyn ValueProvider>,
    },
    Operator {
        op: Op,
        args: Vec<Slot>,
    },
    /// `NearestPoint` or `RayIntersect`; `args` excludes the geometry input.
    Query {
        op: Op,
        meshes: Vec<Arc<Mesh>>,
        args: Vec<Slot>,
    },
    Curve {
        arg: Slot,
        curve: Arc<BezierCurve>,
    },
    Transform {
        arg: Slot,
        matrix: Mat4,
        operand: TransformKind,
    },
    SurfaceData {
        arg: Slot,
        field: SurfaceField,
    },
    External {
        def: Arc<dyn OperatorDefDyn>,
        args: Vec<Slot>,
    },
}

impl fmt::Debug for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Channel { channel } => write!(f, "Channel({})", channel),
            StepKind::Constant(c) => write!(f, "Constant({:?})", c),
            StepKind::Texture { map, output, .. } => write!(f, "Texture({}, {:?})", map, output),
            StepKind::Operator { op, args } => write!(f, "{:?}{:?}", op, args),
            StepKind::Query { op, meshes, args } => {
                write!(f, "{:?}({} meshes, {:?})", op, meshes.len(), args)
            }
            StepKind::Curve { arg, .. } => write!(f, "Curve({:?})", arg),
            StepKind::Transform { arg, operand, .. } => {
                write!(f, "Transform({:?}, {:?})", arg, operand)
            }
            StepKind::SurfaceData { arg, field } => write!(f, "SurfData({:?}, {:?})", arg, field),
            StepKind::External { args, .. } => write!(f, "External{:?}", args),
        }
    }
}

/// One executable step: evaluates a node into its slot.
#[derive(Debug, Clone)]
pub struct Step {
    pub node: NodeId,
    pub out: Slot,
    pub kind: StepKind,
}

/// A deferred channel write.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputStep {
    pub node: NodeId,
    pub source: Slot,
    pub channel: String,
    pub data_type: DataType,
    pub arity: usize,
}

/// The compiled plan: execution order, steps and temporaries layout.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Live nodes in execution order.
    pub order: Vec<NodeId>,
    pub steps: Vec<Step>,
    /// Output writes in node-id order.
    pub outputs: Vec<OutputStep>,
    /// Size of the temporaries buffer in `f32` cells.
    pub temporaries: usize,
    /// Channels the steps read, in first-use order.
    pub input_channels: Vec<String>,
}

/// Errors during plan compilation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("node {node}: graph contains a cycle")]
    GraphCycle { node: NodeId },
    #[error("node {node}: channel \"{channel}\" is not available")]
    MissingChannel { node: NodeId, channel: String },
    #[error("node {node}: {reason}")]
    MalformedNode { node: NodeId, reason: String },
    #[error("node {node}: channel \"{channel}\" is {found}, expected {expected}")]
    TypeMismatch {
        node: NodeId,
        channel: String,
        expected: String,
        found: String,
    },
}

impl PlanError {
    pub fn node_id(&self) -> NodeId {
        match self {
            PlanError::GraphCycle { node }
            | PlanError::MissingChannel { node, .. }
            | PlanError::MalformedNode { node, .. }
            | PlanError::TypeMismatch { node, .. } => *node,
        }
    }
}

/// Follows disabled nodes from `id`. `None` means the chain ends in a
/// terminator.
fn resolve(graph: &Graph, consumer: NodeId, mut id: NodeId) -> Result<Option<NodeId>, PlanError> {
    let mut chain: Vec<NodeId> = Vec::new();
    loop {
        let node = graph.node(id).ok_or_else(|| PlanError::MalformedNode {
            node: consumer,
            reason: format!("input refers to missing node {}", id),
        })?;
        match node.kind {
            NodeKind::Disabled { passthrough } => {
                if let Some(pos) = chain.iter().position(|&c| c == id) {
                    let node = chain[pos..].iter().copied().min().unwrap_or(id);
                    return Err(PlanError::GraphCycle { node });
                }
                chain.push(id);
                match passthrough {
                    Some(next) => id = next,
                    None => return Ok(None),
                }
            }
            _ => return Ok(Some(id)),
        }
    }
}

/// Kahn's algorithm over active nodes, lowest id first.
fn topo_sort(active: &[bool], inputs: &[Vec<Option<NodeId>>]) -> Result<Vec<NodeId>, PlanError> {
    let n = active.len();
    let mut in_degree = vec![0usize; n];
    let mut consumers: Vec<Vec<NodeId>> = vec![Vec::new(); n];
    for id in (0..n).filter(|&i| active[i]) {
        for input in inputs[id].iter().flatten() {
            in_degree[id] += 1;
            consumers[input.0].push(NodeId(id));
        }
    }

    let mut ready: BinaryHeap<Reverse<NodeId>> = (0..n)
        .filter(|&i| active[i] && in_degree[i] == 0)
        .map(|i| Reverse(NodeId(i)))
        .collect();
    let mut order = Vec::new();
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &c in &consumers[node.0] {
            in_degree[c.0] -= 1;
            if in_degree[c.0] == 0 {
                ready.push(Reverse(c));
            }
        }
    }

    let active_count = active.iter().filter(|&&a| a).count();
    if order.len() == active_count {
        return Ok(order);
    }
    let mut placed = vec![false; n];
    for id in &order {
        placed[id.0] = true;
    }
    let residual = (0..n).find(|&i| active[i] && !placed[i]).unwrap_or(0);
    assert_invariant(
        GRAPH_REJECTS_CYCLE,
        order.len() < active_count,
        "cycle reported only when nodes remain unordered",
        None,
    );
    Err(PlanError::GraphCycle {
        node: NodeId(residual),
    })
}

fn numeric(t: ValueType) -> Result<usize, String> {
    t.arity()
        .ok_or_else(|| format!("expected a numeric input, got {}", t))
}

fn scalar(t: ValueType) -> Result<(), String> {
    match numeric(t)? {
        1 => Ok(()),
        _ => Err(format!("expected a scalar input, got {}", t)),
    }
}

fn exact(t: ValueType, arity: usize) -> Result<(), String> {
    if numeric(t)? == arity {
        Ok(())
    } else {
        Err(format!("expected float[{}], got {}", arity, t))
    }
}

/// Common arity of operands where scalars broadcast.
fn broadcast(args: &[ValueType]) -> Result<usize, String> {
    let mut arity = 1;
    for &t in args {
        let a = numeric(t)?;
        if a != 1 {
            if arity != 1 && arity != a {
                return Err(format!("cannot combine arities {} and {}", arity, a));
            }
            arity = a;
        }
    }
    Ok(arity)
}

fn op_type(op: Op, args: &[ValueType]) -> Result<ValueType, String> {
    use Op::*;
    use ValueType::{Float, Int};

    let all_int = args.iter().all(|t| t.is_int());
    let ty = match op {
        AbsoluteValue | Floor | Ceil | Negate => {
            if all_int {
                Int
            } else {
                Float(numeric(args[0])?)
            }
        }
        SquareRoot | Logarithm | Sin | Cos | Tan | ASin | ACos | ATan | ToFloat | Normalize => {
            Float(numeric(args[0])?)
        }
        Magnitude | ComponentSum => {
            numeric(args[0])?;
            Float(1)
        }
        ToInteger => {
            scalar(args[0])?;
            Int
        }
        LogicalNot => {
            scalar(args[0])?;
            Float(1)
        }
        Add | Subtract | Multiply => {
            let arity = broadcast(args)?;
            if all_int {
                Int
            } else {
                Float(arity)
            }
        }
        Divide | Power | Modulo | ATan2 => Float(broadcast(args)?),
        DotProduct => {
            if numeric(args[0])? != numeric(args[1])? {
                return Err(format!("cannot dot {} with {}", args[0], args[1]));
            }
            Float(1)
        }
        CrossProduct => {
            exact(args[0], 3)?;
            exact(args[1], 3)?;
            Float(3)
        }
        FromQuat => {
            exact(args[0], 4)?;
            scalar(args[1])?;
            Float(3)
        }
        ToScalar => {
            numeric(args[0])?;
            scalar(args[1])?;
            Float(1)
        }
        TransformByQuat => {
            exact(args[0], 4)?;
            exact(args[1], 3)?;
            Float(3)
        }
        NearestPoint | RayIntersect => {
            if args[0] != ValueType::Geometry {
                return Err(format!("expected geometry as input 0, got {}", args[0]));
            }
            for &t in &args[1..] {
                exact(t, 3)?;
            }
            ValueType::SurfaceHit
        }
        Less | LessOrEqual | Greater | GreaterOrEqual | LogicalAnd | LogicalOr => {
            scalar(args[0])?;
            scalar(args[1])?;
            Float(1)
        }
        Equal => {
            broadcast(args)?;
            Float(1)
        }
        Blend => {
            let arity = broadcast(&args[..2])?;
            scalar(args[2])?;
            Float(arity)
        }
        Clamp => {
            let arity = broadcast(args)?;
            if all_int {
                Int
            } else {
                Float(arity)
            }
        }
        Noise | DNoise => {
            if numeric(args[0])? > 3 {
                return Err(format!("noise is defined up to 3 dimensions, got {}", args[0]));
            }
            scalar(args[1])?;
            scalar(args[2])?;
            if op == Noise {
                Float(1)
            } else {
                Float(3)
            }
        }
        ToQuat => {
            for &t in args {
                exact(t, 3)?;
            }
            Float(4)
        }
        ToVector => {
            for &t in args {
                scalar(t)?;
            }
            Float(3)
        }
        Switch => {
            scalar(args[2])?;
            let arity = broadcast(&args[..2])?;
            if args[0].is_int() && args[1].is_int() {
                Int
            } else {
                Float(arity)
            }
        }
    };
    Ok(ty)
}

fn field_type(field: SurfaceField) -> ValueType {
    match field {
        SurfaceField::SignedDistance | SurfaceField::Valid => ValueType::Float(1),
        SurfaceField::MeshIndex
        | SurfaceField::FaceIndex
        | SurfaceField::FaceMatId
        | SurfaceField::SmoothGroup => ValueType::Int,
        SurfaceField::Position
        | SurfaceField::FaceNormal
        | SurfaceField::SmoothNormal
        | SurfaceField::BaryCoords
        | SurfaceField::TextureCoord => ValueType::Float(3),
    }
}

fn channel_type(map: &ChannelMap, name: &str) -> Option<ValueType> {
    let channel = map.channel(name).ok()?;
    Some(if channel.arity() == 1 && !channel.data_type().is_float() {
        ValueType::Int
    } else {
        ValueType::Float(channel.arity())
    })
}

fn infer(kind: &NodeKind, args: &[ValueType], available: &ChannelMap) -> Result<ValueType, String> {
    Ok(match kind {
        NodeKind::Channel { name } => {
            channel_type(available, name).ok_or_else(|| format!("unknown channel {}", name))?
        }
        NodeKind::Constant { value } => match value {
            Constant::Int(_) => ValueType::Int,
            Constant::Float(_) => ValueType::Float(1),
            Constant::Vector(_) => ValueType::Float(3),
        },
        NodeKind::Texture { output, .. } => match output {
            TextureOutput::Mono => ValueType::Float(1),
            TextureOutput::Color | TextureOutput::Perturb => ValueType::Float(3),
        },
        NodeKind::Geometry { .. } => ValueType::Geometry,
        NodeKind::Operator { op, .. } => op_type(*op, args)?,
        NodeKind::Curve { .. } => {
            scalar(args[0])?;
            ValueType::Float(1)
        }
        NodeKind::Transform { .. } => {
            exact(args[0], 3)?;
            ValueType::Float(3)
        }
        NodeKind::SurfaceData { field, .. } => {
            if args[0] != ValueType::SurfaceHit {
                return Err(format!("expected a surface hit, got {}", args[0]));
            }
            field_type(*field)
        }
        NodeKind::External { def, .. } => {
            let ty = def.result_type(args)?;
            if ty == ValueType::Geometry {
                return Err("external operators cannot produce geometry".to_string());
            }
            ty
        }
        NodeKind::Output { .. } | NodeKind::Disabled { .. } => {
            return Err("node has no value".to_string())
        }
    })
}

/// First-fit allocator over the temporaries buffer.
#[derive(Debug, Default)]
struct FreeList {
    blocks: Vec<Range<usize>>,
    end: usize,
}

impl FreeList {
    fn take(&mut self, width: usize) -> usize {
        if let Some(i) = self.blocks.iter().position(|b| b.len() >= width) {
            let offset = self.blocks[i].start;
            self.blocks[i].start += width;
            if self.blocks[i].is_empty() {
                self.blocks.remove(i);
            }
            return offset;
        }
        let offset = self.end;
        self.end += width;
        offset
    }

    fn give(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        let at = self
            .blocks
            .iter()
            .position(|b| b.start > range.start)
            .unwrap_or(self.blocks.len());
        self.blocks.insert(at, range);
        let mut merged: Vec<Range<usize>> = Vec::with_capacity(self.blocks.len());
        for b in self.blocks.drain(..) {
            match merged.last_mut() {
                Some(last) if last.end == b.start => last.end = b.end,
                _ => merged.push(b),
            }
        }
        self.blocks = merged;
    }
}

impl Plan {
    /// Compiles `graph` against the channels in `available`.
    pub fn compile(graph: &Graph, available: &ChannelMap) -> Result<Self, PlanError> {
        let n = graph.len();
        let active: Vec<bool> = graph
            .nodes()
            .iter()
            .map(|node| !matches!(node.kind, NodeKind::Disabled { .. }))
            .collect();

        let mut inputs: Vec<Vec<Option<NodeId>>> = vec![Vec::new(); n];
        for node in graph.nodes().iter().filter(|node| active[node.id.0]) {
            let expected = match &node.kind {
                NodeKind::Operator { op, .. } => Some(op.input_count()),
                NodeKind::External { def, .. } => Some(def.input_count()),
                _ => None,
            };
            let given = node.kind.inputs();
            if expected.is_some_and(|e| e != given.len()) {
                return Err(PlanError::MalformedNode {
                    node: node.id,
                    reason: format!(
                        "{} expects {} inputs, got {}",
                        node.tag,
                        expected.unwrap_or(0),
                        given.len()
                    ),
                });
            }
            for &input in given {
                inputs[node.id.0].push(resolve(graph, node.id, input)?);
            }
        }

        let order = topo_sort(&active, &inputs)?;

        // Anything downstream of a terminator is dropped.
        let mut dead = vec![false; n];
        for &id in &order {
            dead[id.0] = inputs[id.0]
                .iter()
                .any(|input| input.map_or(true, |i| dead[i.0]));
        }
        for node in graph.outputs().filter(|node| dead[node.id.0]) {
            if let NodeKind::Output { channel, .. } = &node.kind {
                warn!(
                    "output {} to \"{}\" depends on a disabled node and will not be written",
                    node.id, channel
                );
            }
        }

        for &id in order.iter().filter(|id| !dead[id.0]) {
            let missing = match &graph.nodes()[id.0].kind {
                NodeKind::Channel { name } if !available.has_channel(name) => Some(name.as_str()),
                NodeKind::Texture { .. } if !available.has_channel("Position") => Some("Position"),
                _ => None,
            };
            if let Some(channel) = missing {
                assert_invariant(
                    MISSING_CHANNEL_FAIL_FAST,
                    !available.has_channel(channel),
                    "missing channel reported at compile time",
                    Some(channel),
                );
                return Err(PlanError::MissingChannel {
                    node: id,
                    channel: channel.to_string(),
                });
            }
        }

        let mut live = vec![false; n];
        let mut stack: Vec<NodeId> = graph
            .outputs()
            .map(|node| node.id)
            .filter(|id| !dead[id.0])
            .collect();
        while let Some(id) = stack.pop() {
            if !live[id.0] {
                live[id.0] = true;
                stack.extend(inputs[id.0].iter().flatten().copied());
            }
        }
        let order: Vec<NodeId> = order.into_iter().filter(|id| live[id.0]).collect();

        let mut types: Vec<Option<ValueType>> = vec![None; n];
        for &id in &order {
            let node = &graph.nodes()[id.0];
            if node.kind.is_output() {
                continue;
            }
            let args: Vec<ValueType> = inputs[id.0]
                .iter()
                .flatten()
                .map(|i| {
                    types[i.0].ok_or_else(|| PlanError::MalformedNode {
                        node: id,
                        reason: format!("input {} has no value", i),
                    })
                })
                .collect::<Result<_, _>>()?;
            let ty = infer(&node.kind, &args, available)
                .map_err(|reason| PlanError::MalformedNode { node: id, reason })?;
            types[id.0] = Some(ty);
        }

        let position: Vec<usize> = {
            let mut position = vec![usize::MAX; n];
            for (pos, id) in order.iter().enumerate() {
                position[id.0] = pos;
            }
            position
        };
        let mut last_use = vec![0usize; n];
        for &id in &order {
            let keep = graph.nodes()[id.0].kind.is_output();
            for input in inputs[id.0].iter().flatten() {
                last_use[input.0] = if keep {
                    usize::MAX
                } else {
                    last_use[input.0].max(position[id.0])
                };
            }
        }

        let mut slots: Vec<Option<Slot>> = vec![None; n];
        let mut free = FreeList::default();
        for (pos, &id) in order.iter().enumerate() {
            if let Some(ty) = types[id.0] {
                let offset = if ty.width() > 0 { free.take(ty.width()) } else { 0 };
                slots[id.0] = Some(Slot { offset, ty });
            }
            let mut released: Vec<NodeId> = inputs[id.0].iter().flatten().copied().collect();
            released.sort();
            released.dedup();
            for input in released {
                if last_use[input.0] == pos {
                    if let Some(slot) = slots[input.0] {
                        free.give(slot.range());
                    }
                }
            }
        }
        let temporaries = free.end;

        let slot_of = |id: NodeId| -> Result<Slot, PlanError> {
            slots[id.0].ok_or_else(|| PlanError::MalformedNode {
                node: id,
                reason: "node has no value".to_string(),
            })
        };

        let mut steps = Vec::new();
        let mut input_channels: Vec<String> = Vec::new();
        let mut note = |name: &str| {
            if !input_channels.iter().any(|c| c == name) {
                input_channels.push(name.to_string());
            }
        };
        for &id in &order {
            let node = &graph.nodes()[id.0];
            let args: Vec<Slot> = inputs[id.0]
                .iter()
                .flatten()
                .map(|&i| slot_of(i))
                .collect::<Result<_, _>>()?;
            let kind = match &node.kind {
                NodeKind::Channel { name } => {
                    note(name);
                    StepKind::Channel {
                        channel: name.clone(),
                    }
                }
                NodeKind::Constant { value } => StepKind::Constant(*value),
                NodeKind::Texture {
                    map,
                    output,
                    provider,
                } => {
                    note("Position");
                    for optional in ["Normal", "TextureCoord"] {
                        if available.has_channel(optional) {
                            note(optional);
                        }
                    }
                    StepKind::Texture {
                        map: *map,
                        output: *output,
                        provider: provider.clone(),
                    }
                }
                NodeKind::Operator { op, .. } if matches!(op, Op::NearestPoint | Op::RayIntersect) => {
                    let meshes = inputs[id.0][0]
                        .and_then(|g| match &graph.nodes()[g.0].kind {
                            NodeKind::Geometry { meshes } => Some(meshes.clone()),
                            _ => None,
                        })
                        .unwrap_or_default();
                    StepKind::Query {
                        op: *op,
                        meshes,
                        args: args[1..].to_vec(),
                    }
                }
                NodeKind::Operator { op, .. } => StepKind::Operator { op: *op, args },
                NodeKind::Curve { curve, .. } => StepKind::Curve {
                    arg: args[0],
                    curve: curve.clone(),
                },
                NodeKind::Transform {
                    matrix, operand, ..
                } => StepKind::Transform {
                    arg: args[0],
                    matrix: *matrix,
                    operand: *operand,
                },
                NodeKind::SurfaceData { field, .. } => StepKind::SurfaceData {
                    arg: args[0],
                    field: *field,
                },
                NodeKind::External { def, .. } => StepKind::External {
                    def: def.clone(),
                    args,
                },
                NodeKind::Geometry { .. } | NodeKind::Output { .. } | NodeKind::Disabled { .. } => {
                    continue
                }
            };
            steps.push(Step {
                node: id,
                out: slot_of(id)?,
                kind,
            });
        }

        let mut outputs: Vec<OutputStep> = Vec::new();
        for node in graph.outputs().filter(|node| live[node.id.0]) {
            let NodeKind::Output {
                channel,
                data_type,
                arity,
                ..
            } = &node.kind
            else {
                continue;
            };
            let source_id = inputs[node.id.0].first().copied().flatten();
            let source = match source_id {
                Some(s) => slot_of(s)?,
                None => continue,
            };
            let value_arity = source.ty.arity().ok_or_else(|| PlanError::TypeMismatch {
                node: node.id,
                channel: channel.clone(),
                expected: "a numeric value".to_string(),
                found: source.ty.to_string(),
            })?;
            let arity = arity.unwrap_or(value_arity);
            if value_arity != arity && value_arity != 1 {
                return Err(PlanError::TypeMismatch {
                    node: node.id,
                    channel: channel.clone(),
                    expected: format!("{} components", arity),
                    found: source.ty.to_string(),
                });
            }
            // An existing channel keeps its storage type.
            let prior = available
                .channel(channel)
                .ok()
                .map(|c| (c.arity(), c.data_type()))
                .or_else(|| {
                    outputs
                        .iter()
                        .find(|o| &o.channel == channel)
                        .map(|o| (o.arity, o.data_type))
                });
            let data_type = match prior {
                Some((prior_arity, _)) if prior_arity != arity => {
                    return Err(PlanError::TypeMismatch {
                        node: node.id,
                        channel: channel.clone(),
                        expected: format!("{} components", prior_arity),
                        found: format!("{} components", arity),
                    })
                }
                Some((_, prior_type)) => prior_type,
                None => *data_type,
            };
            outputs.push(OutputStep {
                node: node.id,
                source,
                channel: channel.clone(),
                data_type,
                arity,
            });
        }

        let plan = Self {
            order,
            steps,
            outputs,
            temporaries,
            input_channels,
        };
        plan.check_invariants(&inputs, &last_use, &position);
        debug!(
            "compiled {} steps, {} outputs, {} temporaries",
            plan.steps.len(),
            plan.outputs.len(),
            plan.temporaries
        );
        Ok(plan)
    }

    fn check_invariants(&self, inputs: &[Vec<Option<NodeId>>], last_use: &[usize], position: &[usize]) {
        let topological = self.order.iter().enumerate().all(|(pos, id)| {
            inputs[id.0]
                .iter()
                .flatten()
                .all(|input| position[input.0] < pos)
        });
        assert_invariant(
            PLAN_TOPOLOGICAL,
            topological,
            "every step runs after its inputs",
            None,
        );

        let live_slots: Vec<(usize, usize, Range<usize>)> = self
            .steps
            .iter()
            .map(|s| (position[s.node.0], last_use[s.node.0], s.out.range()))
            .filter(|(_, _, r)| !r.is_empty())
            .collect();
        let overlap = |a: &Range<usize>, b: &Range<usize>| a.start < b.end && b.start < a.end;
        let sound = live_slots.iter().all(|(pa, la, ra)| {
            live_slots
                .iter()
                .filter(|(pb, _, _)| pb > pa && pb <= la)
                .all(|(_, _, rb)| !overlap(ra, rb))
        });
        assert_invariant(
            PLAN_SLOTS_SOUND,
            sound && live_slots.iter().all(|(_, _, r)| r.end <= self.temporaries),
            "live temporaries never overlap",
            None,
        );
    }

    /// Sealed map of the channels the plan writes.
    pub fn output_map(&self) -> Result<ChannelMap, ChannelError> {
        let mut map = ChannelMap::new();
        for output in &self.outputs {
            if !map.has_channel(&output.channel) {
                map.define_channel(&output.channel, output.arity, output.data_type)?;
            }
        }
        map.seal()?;
        Ok(map)
    }

    /// Channels read by the plan, in first-use order.
    pub fn input_channels(&self) -> &[String] {
        &self.input_channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, NodeRecord, Property};
    use crate::node::NodeRegistry;
    use crate::value::NullProvider;

    fn graph(json: &str) -> Graph {
        let provider: Arc<dyn ValueProvider> = Arc::new(NullProvider);
        Graph::from_json(json, &NodeRegistry::with_builtins(), &provider).unwrap()
    }

    fn channels() -> ChannelMap {
        ChannelMap::from_channels(&[
            ("A", 1, DataType::Float32),
            ("B", 1, DataType::Float32),
            ("Position", 3, DataType::Float32),
            ("ID", 1, DataType::Int32),
        ])
        .unwrap()
    }

    #[test]
    fn plan_stability() {
        let g = graph(
            r#"[{"kind": "Channel", "properties": ["A"]},
                {"kind": "Channel", "properties": ["B"]},
                {"kind": "Add", "connections": [0, 1]},
                {"kind": "Output", "connections": [2], "properties": ["Result"]}]"#,
        );
        let p1 = Plan::compile(&g, &channels()).unwrap();
        let p2 = Plan::compile(&g, &channels()).unwrap();
        assert_eq!(p1.order, p2.order);
        assert_eq!(p1.outputs, p2.outputs);
        assert_eq!(p1.order, vec![NodeId(0), NodeId(1), NodeId(2), NodeId(3)]);
        assert_eq!(p1.input_channels(), ["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn forward_references_are_ordered() {
        let g = graph(
            r#"[{"kind": "Output", "connections": [2], "properties": ["Result"]},
                {"kind": "Channel", "properties": ["A"]},
                {"kind": "Negate", "connections": [1]}]"#,
        );
        let plan = Plan::compile(&g, &channels()).unwrap();
        assert_eq!(plan.order, vec![NodeId(1), NodeId(2), NodeId(0)]);
    }

    #[test]
    fn dead_nodes_get_no_slot() {
        let g = graph(
            r#"[{"kind": "Channel", "properties": ["A"]},
                {"kind": "Channel", "properties": ["Position"]},
                {"kind": "Magnitude", "connections": [1]},
                {"kind": "Output", "connections": [0], "properties": ["Result"]}]"#,
        );
        let plan = Plan::compile(&g, &channels()).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.temporaries, 1);
    }

    #[test]
    fn plan_buffer_liveness() {
        // Chain of unary ops: slots are recycled after their last consumer.
        let mut records = vec![NodeRecord::new("Channel")];
        records[0].properties.push(Property::String("Position".into()));
        for i in 0..6 {
            let mut r = NodeRecord::new("Normalize");
            r.connections.push(i);
            records.push(r);
        }
        let mut out = NodeRecord::new("Output");
        out.connections.push(6);
        out.properties.push(Property::String("Dir".into()));
        records.push(out);
        let provider: Arc<dyn ValueProvider> = Arc::new(NullProvider);
        let g = Graph::parse(&records, &NodeRegistry::with_builtins(), &provider).unwrap();
        let plan = Plan::compile(&g, &channels()).unwrap();
        assert_eq!(plan.steps.len(), 7);
        assert_eq!(plan.temporaries, 6);
    }

    #[test]
    fn integer_arithmetic_stays_integer() {
        let g = graph(
            r#"[{"kind": "Channel", "properties": ["ID"]},
                {"kind": "Add", "connections": [0, 0]},
                {"kind": "Divide", "connections": [0, 0]},
                {"kind": "Output", "connections": [1], "properties": ["Twice", "int32"]},
                {"kind": "Output", "connections": [2], "properties": ["One"]}]"#,
        );
        let plan = Plan::compile(&g, &channels()).unwrap();
        assert_eq!(plan.steps[1].out.ty, ValueType::Int);
        assert_eq!(plan.steps[2].out.ty, ValueType::Float(1));
        let map = plan.output_map().unwrap();
        assert_eq!(map.channel("Twice").unwrap().data_type(), DataType::Int32);
    }

    #[test]
    fn arity_errors_are_malformed() {
        let g = graph(
            r#"[{"kind": "Channel", "properties": ["Position"]},
                {"kind": "Channel", "properties": ["A"]},
                {"kind": "CrossProduct", "connections": [0, 1]},
                {"kind": "Output", "connections": [2], "properties": ["C"]}]"#,
        );
        let err = Plan::compile(&g, &channels()).unwrap_err();
        assert!(matches!(err, PlanError::MalformedNode { node: NodeId(2), .. }));
    }

    #[test]
    fn output_arity_conflict_is_type_mismatch() {
        let g = graph(
            r#"[{"kind": "Channel", "properties": ["Position"]},
                {"kind": "Output", "connections": [0], "properties": ["A"]}]"#,
        );
        let err = Plan::compile(&g, &channels()).unwrap_err();
        assert!(matches!(err, PlanError::TypeMismatch { ref channel, .. } if channel == "A"));
        assert_eq!(err.node_id(), NodeId(1));
    }

    #[test]
    fn free_list_merges_neighbours() {
        let mut free = FreeList::default();
        let a = free.take(3);
        let b = free.take(2);
        assert_eq!((a, b, free.end), (0, 3, 5));
        free.give(0..3);
        free.give(3..5);
        assert_eq!(free.blocks, vec![0..5]);
        assert_eq!(free.take(4), 0);
        assert_eq!(free.take(2), 5);
    }

    #[test]
    fn plan_debug_smoke_test() {
        let plan = Plan::compile(&Graph::new(), &channels()).unwrap();
        let debug_str = format!("{:?}", plan);
        assert!(debug_str.contains("order"));
        assert!(debug_str.contains("temporaries"));
    }
}
