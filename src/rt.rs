//! RT module: per-particle execution of a compiled plan.

// Do not call assert_invariant or any PPT logging in per-particle paths.

use crate::accessor::RawAccessor;
use crate::channel_map::ChannelMap;
use crate::geometry::{layout, Mesh, SurfaceHit};
use crate::graph::{NodeId, SurfaceField};
use crate::noise;
use crate::node::Op;
use crate::plan::{Plan, PlanError, Slot, StepKind, ValueType};
use crate::stream::TransformKind;
use crate::value::{Constant, ShadeContext, TextureOutput};
use glam::{Mat3, Quat, Vec3};
use std::any::Any;
use std::sync::Arc;

const NAN: f32 = f32::NAN;

#[inline]
fn component(temps: &[f32], slot: Slot, i: usize) -> f32 {
    match slot.ty {
        ValueType::Int => temps[slot.offset].to_bits() as i32 as f32,
        ValueType::Float(1) => temps[slot.offset],
        ValueType::Float(n) if i < n => temps[slot.offset + i],
        _ => 0.0,
    }
}

#[inline]
fn int(temps: &[f32], slot: Slot) -> i32 {
    match slot.ty {
        ValueType::Int => temps[slot.offset].to_bits() as i32,
        _ => temps[slot.offset] as i32,
    }
}

#[inline]
fn vec3(temps: &[f32], slot: Slot) -> Vec3 {
    Vec3::new(
        component(temps, slot, 0),
        component(temps, slot, 1),
        component(temps, slot, 2),
    )
}

#[inline]
fn quat(temps: &[f32], slot: Slot) -> Quat {
    Quat::from_xyzw(
        component(temps, slot, 0),
        component(temps, slot, 1),
        component(temps, slot, 2),
        component(temps, slot, 3),
    )
    .normalize()
}

#[inline]
fn boolean(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[inline]
fn store_int(out: &mut [f32], value: i32) {
    out[0] = f32::from_bits(value as u32);
}

fn eval_int(op: Op, args: &[Slot], temps: &[f32]) -> i32 {
    let a = |k: usize| int(temps, args[k]);
    match op {
        Op::AbsoluteValue => a(0).wrapping_abs(),
        Op::Negate => a(0).wrapping_neg(),
        Op::Add => a(0).wrapping_add(a(1)),
        Op::Subtract => a(0).wrapping_sub(a(1)),
        Op::Multiply => a(0).wrapping_mul(a(1)),
        Op::Clamp => a(0).max(a(1)).min(a(2)),
        Op::Switch => {
            if component(temps, args[2], 0) != 0.0 {
                a(0)
            } else {
                a(1)
            }
        }
        Op::ToInteger => match args[0].ty {
            ValueType::Int => a(0),
            _ => component(temps, args[0], 0) as i32,
        },
        _ => a(0),
    }
}

fn eval_float(op: Op, args: &[Slot], temps: &[f32], out: &mut [f32]) {
    let c = |k: usize, i: usize| component(temps, args[k], i);
    let arity = |k: usize| args[k].ty.arity().unwrap_or(1);
    let n = out.len();
    let unary = |out: &mut [f32], f: fn(f32) -> f32| {
        for (i, o) in out.iter_mut().enumerate() {
            *o = f(c(0, i));
        }
    };
    let binary = |out: &mut [f32], f: fn(f32, f32) -> f32| {
        for (i, o) in out.iter_mut().enumerate() {
            *o = f(c(0, i), c(1, i));
        }
    };

    match op {
        Op::SquareRoot => unary(out, f32::sqrt),
        Op::AbsoluteValue => unary(out, f32::abs),
        Op::Floor => unary(out, f32::floor),
        Op::Ceil => unary(out, f32::ceil),
        Op::Negate => unary(out, |x| -x),
        Op::Logarithm => unary(out, f32::ln),
        Op::Sin => unary(out, f32::sin),
        Op::Cos => unary(out, f32::cos),
        Op::Tan => unary(out, f32::tan),
        Op::ASin => unary(out, f32::asin),
        Op::ACos => unary(out, f32::acos),
        Op::ATan => unary(out, f32::atan),
        Op::ToFloat => unary(out, |x| x),
        Op::Normalize => {
            let len = (0..n).map(|i| c(0, i) * c(0, i)).sum::<f32>().sqrt();
            for (i, o) in out.iter_mut().enumerate() {
                *o = c(0, i) / len;
            }
        }
        Op::Magnitude => out[0] = (0..arity(0)).map(|i| c(0, i) * c(0, i)).sum::<f32>().sqrt(),
        Op::ComponentSum => out[0] = (0..arity(0)).map(|i| c(0, i)).sum(),
        Op::LogicalNot => out[0] = boolean(c(0, 0) == 0.0),
        Op::Add => binary(out, |a, b| a + b),
        Op::Subtract => binary(out, |a, b| a - b),
        Op::Multiply => binary(out, |a, b| a * b),
        Op::Divide => binary(out, |a, b| a / b),
        Op::Power => binary(out, f32::powf),
        Op::Modulo => binary(out, |a, b| a % b),
        Op::ATan2 => binary(out, f32::atan2),
        Op::DotProduct => out[0] = (0..arity(0)).map(|i| c(0, i) * c(1, i)).sum(),
        Op::CrossProduct => {
            let v = vec3(temps, args[0]).cross(vec3(temps, args[1]));
            out.copy_from_slice(&v.to_array());
        }
        Op::FromQuat => {
            let axis = int(temps, args[1]);
            let v = match axis {
                0..=2 => Mat3::from_quat(quat(temps, args[0])).col(axis as usize),
                _ => Vec3::splat(NAN),
            };
            out.copy_from_slice(&v.to_array());
        }
        Op::ToScalar => {
            let index = int(temps, args[1]);
            out[0] = if index >= 0 && (index as usize) < arity(0) {
                c(0, index as usize)
            } else {
                NAN
            };
        }
        Op::TransformByQuat => {
            let v = quat(temps, args[0]).mul_vec3(vec3(temps, args[1]));
            out.copy_from_slice(&v.to_array());
        }
        Op::Less => out[0] = boolean(c(0, 0) < c(1, 0)),
        Op::LessOrEqual => out[0] = boolean(c(0, 0) <= c(1, 0)),
        Op::Greater => out[0] = boolean(c(0, 0) > c(1, 0)),
        Op::GreaterOrEqual => out[0] = boolean(c(0, 0) >= c(1, 0)),
        Op::Equal => {
            let width = arity(0).max(arity(1));
            out[0] = boolean((0..width).all(|i| c(0, i) == c(1, i)));
        }
        Op::LogicalAnd => out[0] = boolean(c(0, 0) != 0.0 && c(1, 0) != 0.0),
        Op::LogicalOr => out[0] = boolean(c(0, 0) != 0.0 || c(1, 0) != 0.0),
        Op::Blend => {
            let t = c(2, 0);
            for (i, o) in out.iter_mut().enumerate() {
                let (a, b) = (c(0, i), c(1, i));
                *o = a + (b - a) * t;
            }
        }
        Op::Clamp => {
            for (i, o) in out.iter_mut().enumerate() {
                *o = c(0, i).max(c(1, i)).min(c(2, i));
            }
        }
        Op::Noise | Op::DNoise => {
            let mut p = [0.0f32; 3];
            for (i, v) in p.iter_mut().enumerate().take(arity(0)) {
                *v = c(0, i);
            }
            let p = Vec3::from_array(p);
            let octaves = int(temps, args[1]).max(1) as u32;
            let lacunarity = c(2, 0);
            if op == Op::Noise {
                out[0] = noise::fractal(p, octaves, lacunarity);
            } else {
                out.copy_from_slice(&noise::fractal_gradient(p, octaves, lacunarity).to_array());
            }
        }
        Op::ToQuat => {
            let m = Mat3::from_cols(
                vec3(temps, args[0]),
                vec3(temps, args[1]),
                vec3(temps, args[2]),
            );
            out.copy_from_slice(&Quat::from_mat3(&m).to_array());
        }
        Op::ToVector => {
            for (i, o) in out.iter_mut().enumerate() {
                *o = c(i, 0);
            }
        }
        Op::Switch => {
            let pick = if c(2, 0) != 0.0 { 0 } else { 1 };
            for (i, o) in out.iter_mut().enumerate() {
                *o = c(pick, i);
            }
        }
        Op::ToInteger | Op::NearestPoint | Op::RayIntersect => out.fill(NAN),
    }
}

fn query(op: Op, meshes: &[Arc<Mesh>], args: &[Slot], temps: &[f32]) -> SurfaceHit {
    let p = vec3(temps, args[0]);
    let mut best: Option<SurfaceHit> = None;
    for (i, mesh) in meshes.iter().enumerate() {
        let hit = match op {
            Op::RayIntersect => mesh.ray_intersect(p, vec3(temps, args[1])),
            _ => mesh.nearest_point(p),
        };
        if let Some(mut hit) = hit {
            hit.mesh_index = i as i32;
            let closer = best.map_or(true, |b| {
                hit.signed_distance.abs() < b.signed_distance.abs()
            });
            if closer {
                best = Some(hit);
            }
        }
    }
    best.unwrap_or_default()
}

fn surface_field(field: SurfaceField, hit: &[f32], out: &mut [f32]) {
    use layout::*;
    let (start, len) = match field {
        SurfaceField::Position => (POSITION, 3),
        SurfaceField::SignedDistance => (SIGNED_DISTANCE, 1),
        SurfaceField::FaceNormal => (FACE_NORMAL, 3),
        SurfaceField::SmoothNormal => (SMOOTH_NORMAL, 3),
        SurfaceField::MeshIndex => (MESH_INDEX, 1),
        SurfaceField::FaceIndex => (FACE_INDEX, 1),
        SurfaceField::FaceMatId => (MATERIAL_ID, 1),
        SurfaceField::SmoothGroup => (SMOOTHING_GROUP, 1),
        SurfaceField::BaryCoords => (BARY, 3),
        SurfaceField::TextureCoord => (UVW, 3),
        SurfaceField::Valid => (VALID, 1),
    };
    out.copy_from_slice(&hit[start..start + len]);
}

/// Channels a texture step shades with.
#[derive(Debug, Clone, Copy)]
struct ShadeInputs {
    position: RawAccessor,
    normal: Option<RawAccessor>,
    uvw: Option<RawAccessor>,
}

impl ShadeInputs {
    fn context(&self, record: &[u8]) -> ShadeContext {
        let read = |acc: Option<RawAccessor>| {
            let mut v = [0.0f32; 3];
            if let Some(acc) = acc {
                acc.read_f32s(record, &mut v);
            }
            Vec3::from_array(v)
        };
        ShadeContext {
            position: read(Some(self.position)),
            normal: read(self.normal),
            uvw: read(self.uvw),
        }
    }
}

/// Per-step bindings resolved against a record layout.
enum Binding {
    None,
    Read(RawAccessor),
    Shade(ShadeInputs),
    Normal(Mat3),
    State(Box<dyn Any + Send>),
}

/// The runtime engine: one per stream, never shared.
pub struct Runtime {
    pub plan: Plan,
    bindings: Vec<Binding>,
    writes: Vec<RawAccessor>,
    temps: Vec<f32>,
    result: Vec<f32>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("plan", &self.plan)
            .field("temporaries", &self.temps.len())
            .finish()
    }
}

fn bind(map: &ChannelMap, node: NodeId, channel: &str) -> Result<RawAccessor, PlanError> {
    map.raw_accessor(channel)
        .map_err(|_| PlanError::MissingChannel {
            node,
            channel: channel.to_string(),
        })
}

impl Runtime {
    /// Binds `plan` to records laid out by `record_map`.
    pub fn new(plan: Plan, record_map: &ChannelMap) -> Result<Self, PlanError> {
        let mut bindings = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let binding = match &step.kind {
                StepKind::Channel { channel } => {
                    let acc = bind(record_map, step.node, channel)?;
                    let fits = match step.out.ty {
                        ValueType::Int => acc.arity() == 1 && !acc.data_type().is_float(),
                        ty => ty.arity() == Some(acc.arity()),
                    };
                    if !fits {
                        return Err(PlanError::TypeMismatch {
                            node: step.node,
                            channel: channel.clone(),
                            expected: step.out.ty.to_string(),
                            found: format!("{}[{}]", acc.data_type(), acc.arity()),
                        });
                    }
                    Binding::Read(acc)
                }
                StepKind::Texture { .. } => Binding::Shade(ShadeInputs {
                    position: bind(record_map, step.node, "Position")?,
                    normal: record_map.raw_accessor("Normal").ok(),
                    uvw: record_map.raw_accessor("TextureCoord").ok(),
                }),
                StepKind::Transform {
                    matrix,
                    operand: TransformKind::Normal,
                    ..
                } => Binding::Normal(Mat3::from_mat4(*matrix).inverse().transpose()),
                StepKind::External { def, .. } => Binding::State(def.init_state()),
                _ => Binding::None,
            };
            bindings.push(binding);
        }

        let mut writes = Vec::with_capacity(plan.outputs.len());
        for output in &plan.outputs {
            let acc = bind(record_map, output.node, &output.channel)?;
            if acc.arity() != output.arity {
                return Err(PlanError::TypeMismatch {
                    node: output.node,
                    channel: output.channel.clone(),
                    expected: format!("{} components", output.arity),
                    found: format!("{}[{}]", acc.data_type(), acc.arity()),
                });
            }
            writes.push(acc);
        }

        let widest = plan
            .steps
            .iter()
            .map(|s| s.out.ty.width())
            .max()
            .unwrap_or(0);
        Ok(Self {
            temps: vec![0.0; plan.temporaries],
            result: vec![0.0; widest],
            plan,
            bindings,
            writes,
        })
    }

    /// Evaluates every step for one record, then applies the output writes.
    pub fn evaluate(&mut self, record: &mut [u8]) {
        let Self {
            plan,
            bindings,
            writes,
            temps,
            result,
        } = self;

        for (step, binding) in plan.steps.iter().zip(bindings.iter_mut()) {
            let out = &mut result[..step.out.ty.width()];
            match (&step.kind, binding) {
                (StepKind::Channel { .. }, Binding::Read(acc)) => {
                    if step.out.ty == ValueType::Int {
                        store_int(out, acc.read_i64(record, 0) as i32);
                    } else {
                        for (i, o) in out.iter_mut().enumerate() {
                            *o = acc.read(record, i) as f32;
                        }
                    }
                }
                (StepKind::Constant(value), _) => match value {
                    Constant::Int(i) => store_int(out, *i),
                    Constant::Float(f) => out[0] = *f,
                    Constant::Vector(v) => out.copy_from_slice(&v.to_array()),
                },
                (
                    StepKind::Texture {
                        map,
                        output,
                        provider,
                    },
                    Binding::Shade(inputs),
                ) => {
                    let v = provider.evaluate_shader(*map, &inputs.context(record), *output);
                    if *output == TextureOutput::Mono {
                        out[0] = v.x;
                    } else {
                        out.copy_from_slice(&v.to_array());
                    }
                }
                (StepKind::Operator { op, args }, _) => {
                    if step.out.ty == ValueType::Int {
                        store_int(out, eval_int(*op, args, temps));
                    } else {
                        eval_float(*op, args, temps, out);
                    }
                }
                (StepKind::Query { op, meshes, args }, _) => {
                    query(*op, meshes, args, temps).pack(out);
                }
                (StepKind::Curve { arg, curve }, _) => {
                    out[0] = curve.evaluate(component(temps, *arg, 0));
                }
                (
                    StepKind::Transform {
                        arg,
                        matrix,
                        operand,
                    },
                    binding,
                ) => {
                    let v = vec3(temps, *arg);
                    let r = match (operand, binding) {
                        (TransformKind::Point, _) => matrix.transform_point3(v),
                        (TransformKind::Vector, _) => matrix.transform_vector3(v),
                        (TransformKind::Normal, Binding::Normal(n)) => *n * v,
                        (TransformKind::Normal, _) => {
                            Mat3::from_mat4(*matrix).inverse().transpose() * v
                        }
                    };
                    out.copy_from_slice(&r.to_array());
                }
                (StepKind::SurfaceData { arg, field }, _) => {
                    surface_field(*field, &temps[arg.range()], out);
                }
                (StepKind::External { def, args }, Binding::State(state)) => {
                    let inputs: Vec<&[f32]> = args.iter().map(|s| &temps[s.range()]).collect();
                    if def.evaluate(state.as_mut(), &inputs, out).is_err() {
                        out.fill(NAN);
                    }
                }
                _ => out.fill(NAN),
            }
            temps[step.out.range()].copy_from_slice(out);
        }

        for (output, acc) in plan.outputs.iter().zip(writes.iter()) {
            for i in 0..output.arity {
                let value = match output.source.ty {
                    ValueType::Int => int(temps, output.source) as f64,
                    _ => component(temps, output.source, i) as f64,
                };
                acc.write(record, i, value);
            }
        }
    }
}

/// Run evaluate with panic containment. Returns false when evaluation
/// panicked; the record's output channels are then set to NaN.
pub fn evaluate_safe(runtime: &mut Runtime, record: &mut [u8]) -> bool {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        runtime.evaluate(record);
    }));
    if result.is_err() {
        // Fail closed.
        for (output, acc) in runtime.plan.outputs.iter().zip(&runtime.writes) {
            for i in 0..output.arity {
                acc.write(record, i, f64::NAN);
            }
        }
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::DataType;
    use crate::graph::Graph;
    use crate::node::NodeRegistry;
    use crate::value::{NullProvider, ValueProvider};

    fn runtime(json: &str, map: &ChannelMap) -> Runtime {
        let provider: Arc<dyn ValueProvider> = Arc::new(NullProvider);
        let graph = Graph::from_json(json, &NodeRegistry::with_builtins(), &provider).unwrap();
        let plan = Plan::compile(&graph, map).unwrap();
        Runtime::new(plan, map).unwrap()
    }

    fn ab_map() -> ChannelMap {
        ChannelMap::from_channels(&[
            ("A", 1, DataType::Float32),
            ("B", 1, DataType::Float32),
            ("Result", 1, DataType::Float32),
        ])
        .unwrap()
    }

    fn record(map: &ChannelMap, a: f32, b: f32) -> Vec<u8> {
        let mut rec = map.new_particle();
        map.raw_accessor("A").unwrap().write(&mut rec, 0, a as f64);
        map.raw_accessor("B").unwrap().write(&mut rec, 0, b as f64);
        rec
    }

    fn result(map: &ChannelMap, rec: &[u8]) -> f32 {
        map.raw_accessor("Result").unwrap().read(rec, 0) as f32
    }

    #[test]
    fn rt_adds_channels() {
        let map = ab_map();
        let mut rt = runtime(
            r#"[{"kind": "Channel", "properties": ["A"]},
                {"kind": "Channel", "properties": ["B"]},
                {"kind": "Add", "connections": [0, 1]},
                {"kind": "Output", "connections": [2], "properties": ["Result"]}]"#,
            &map,
        );
        let mut rec = record(&map, 2.0, 3.0);
        rt.evaluate(&mut rec);
        assert_eq!(result(&map, &rec), 5.0);
    }

    #[test]
    fn rt_domain_errors_propagate_nan() {
        let map = ab_map();
        let mut rt = runtime(
            r#"[{"kind": "Channel", "properties": ["A"]},
                {"kind": "Channel", "properties": ["B"]},
                {"kind": "Divide", "connections": [0, 1]},
                {"kind": "Logarithm", "connections": [1]},
                {"kind": "Add", "connections": [2, 3]},
                {"kind": "Output", "connections": [4], "properties": ["Result"]}]"#,
            &map,
        );
        let mut rec = record(&map, 1.0, 0.0);
        rt.evaluate(&mut rec);
        // 1/0 + ln(0) = inf + -inf
        assert!(result(&map, &rec).is_nan());
    }

    #[test]
    fn rt_outputs_see_upstream_values() {
        // Both outputs read A before either write lands.
        let map = ab_map();
        let mut rt = runtime(
            r#"[{"kind": "Channel", "properties": ["A"]},
                {"kind": "Negate", "connections": [0]},
                {"kind": "Output", "connections": [1], "properties": ["A"]},
                {"kind": "Output", "connections": [0], "properties": ["Result"]}]"#,
            &map,
        );
        let mut rec = record(&map, 4.0, 0.0);
        rt.evaluate(&mut rec);
        assert_eq!(map.raw_accessor("A").unwrap().read(&rec, 0), -4.0);
        assert_eq!(result(&map, &rec), 4.0);
    }

    #[test]
    fn rt_comparisons_are_zero_or_one() {
        let map = ab_map();
        let mut rt = runtime(
            r#"[{"kind": "Channel", "properties": ["A"]},
                {"kind": "Channel", "properties": ["B"]},
                {"kind": "Less", "connections": [0, 1]},
                {"kind": "Output", "connections": [2], "properties": ["Result"]}]"#,
            &map,
        );
        let mut rec = record(&map, 1.0, 2.0);
        rt.evaluate(&mut rec);
        assert_eq!(result(&map, &rec), 1.0);
        let mut rec = record(&map, 3.0, 2.0);
        rt.evaluate(&mut rec);
        assert_eq!(result(&map, &rec), 0.0);
    }

    #[test]
    fn rt_switch_and_vectors() {
        let map = ChannelMap::from_channels(&[
            ("Position", 3, DataType::Float32),
            ("A", 1, DataType::Float32),
            ("Out", 3, DataType::Float32),
        ])
        .unwrap();
        let mut rt = runtime(
            r#"[{"kind": "Channel", "properties": ["Position"]},
                {"kind": "Channel", "properties": ["A"]},
                {"kind": "Multiply", "connections": [0, 1]},
                {"kind": "Switch", "connections": [2, 0, 1]},
                {"kind": "Output", "connections": [3], "properties": ["Out"]}]"#,
            &map,
        );
        let pos = map.raw_accessor("Position").unwrap();
        let a = map.raw_accessor("A").unwrap();
        let out = map.raw_accessor("Out").unwrap();

        let mut rec = map.new_particle();
        for (i, v) in [1.0, 2.0, 3.0].iter().enumerate() {
            pos.write(&mut rec, i, *v);
        }
        a.write(&mut rec, 0, 2.0);
        rt.evaluate(&mut rec);
        assert_eq!(
            (0..3).map(|i| out.read(&rec, i)).collect::<Vec<_>>(),
            vec![2.0, 4.0, 6.0]
        );

        a.write(&mut rec, 0, 0.0);
        rt.evaluate(&mut rec);
        assert_eq!(
            (0..3).map(|i| out.read(&rec, i)).collect::<Vec<_>>(),
            vec![1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn rt_integer_channels() {
        let map = ChannelMap::from_channels(&[
            ("ID", 1, DataType::Int32),
            ("Next", 1, DataType::Int32),
        ])
        .unwrap();
        let mut rt = runtime(
            r#"[{"kind": "Channel", "properties": ["ID"]},
                {"kind": "Add", "connections": [0, 0]},
                {"kind": "Output", "connections": [1], "properties": ["Next"]}]"#,
            &map,
        );
        let mut rec = map.new_particle();
        map.raw_accessor("ID").unwrap().write(&mut rec, 0, 16_777_217.0);
        rt.evaluate(&mut rec);
        assert_eq!(map.raw_accessor("Next").unwrap().read_i64(&rec, 0), 33_554_434);
    }

    #[test]
    fn rt_binding_reports_missing_channel() {
        let map = ab_map();
        let provider: Arc<dyn ValueProvider> = Arc::new(NullProvider);
        let graph = Graph::from_json(
            r#"[{"kind": "Channel", "properties": ["A"]},
                {"kind": "Output", "connections": [0], "properties": ["Result"]}]"#,
            &NodeRegistry::with_builtins(),
            &provider,
        )
        .unwrap();
        let plan = Plan::compile(&graph, &map).unwrap();
        let narrow = ChannelMap::from_channels(&[("Result", 1, DataType::Float32)]).unwrap();
        let err = Runtime::new(plan, &narrow).unwrap_err();
        assert_eq!(
            err,
            PlanError::MissingChannel {
                node: NodeId(0),
                channel: "A".into()
            }
        );
    }

    #[test]
    fn rt_determinism() {
        let map = ab_map();
        let json = r#"[{"kind": "Channel", "properties": ["A"]},
                {"kind": "Sin", "connections": [0]},
                {"kind": "Output", "connections": [1], "properties": ["Result"]}]"#;
        let mut rt1 = runtime(json, &map);
        let mut rt2 = runtime(json, &map);
        let mut r1 = record(&map, 0.7, 0.0);
        let mut r2 = r1.clone();
        rt1.evaluate(&mut r1);
        assert!(evaluate_safe(&mut rt2, &mut r2));
        assert_eq!(r1, r2);
    }
}
