//! Host-supplied values for graph input nodes.
//!
//! The graph never reaches into a scene directly. Constants, shaders,
//! geometry and transforms come through a [`ValueProvider`], sampled once at
//! parse time except for shaders, which run per particle.

use crate::geometry::Mesh;
use glam::{Mat4, Vec3};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A value fixed for the whole evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    Int(i32),
    Float(f32),
    Vector(Vec3),
}

/// Where a constant comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstantKind {
    /// An animatable track addressed by path.
    Track,
    /// An expression evaluated by the host.
    Script,
}

/// Which shader result a texture input returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureOutput {
    Color,
    Mono,
    Perturb,
}

impl TextureOutput {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Color" => Some(TextureOutput::Color),
            "Mono" => Some(TextureOutput::Mono),
            "Perturb" => Some(TextureOutput::Perturb),
            _ => None,
        }
    }
}

/// Per-particle inputs handed to a shader.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShadeContext {
    pub position: Vec3,
    pub normal: Vec3,
    pub uvw: Vec3,
}

/// Capability interface to the host scene. Every method defaults to "not
/// available".
pub trait ValueProvider: Send + Sync {
    fn constant_value(&self, _kind: ConstantKind, _key: &str) -> Option<Constant> {
        None
    }

    /// Whether `map` names a shader that [`ValueProvider::evaluate_shader`]
    /// can run.
    fn has_shader(&self, _map: usize) -> bool {
        false
    }

    /// Mono results are returned in `x`.
    fn evaluate_shader(&self, _map: usize, _ctx: &ShadeContext, _output: TextureOutput) -> Vec3 {
        Vec3::ZERO
    }

    fn named_geometry(&self, _name: &str) -> Option<Arc<Mesh>> {
        None
    }

    fn named_transform(&self, _name: &str) -> Option<Mat4> {
        None
    }

    /// Object-to-world transform of the object the particles belong to.
    fn bound_transform(&self) -> Option<Mat4> {
        None
    }

    /// Camera-to-world transform.
    fn camera_transform(&self) -> Option<Mat4> {
        None
    }
}

/// Provides nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProvider;

impl ValueProvider for NullProvider {}

type Shader = Box<dyn Fn(&ShadeContext, TextureOutput) -> Vec3 + Send + Sync>;

/// In-memory scene, built up front.
#[derive(Default)]
pub struct SceneProvider {
    constants: HashMap<(ConstantKind, String), Constant>,
    shaders: HashMap<usize, Shader>,
    geometry: HashMap<String, Arc<Mesh>>,
    transforms: HashMap<String, Mat4>,
    bound: Option<Mat4>,
    camera: Option<Mat4>,
}

impl SceneProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(mut self, path: &str, value: Constant) -> Self {
        self.constants
            .insert((ConstantKind::Track, path.to_string()), value);
        self
    }

    pub fn with_script(mut self, expression: &str, value: Constant) -> Self {
        self.constants
            .insert((ConstantKind::Script, expression.to_string()), value);
        self
    }

    pub fn with_shader<F>(mut self, map: usize, shader: F) -> Self
    where
        F: Fn(&ShadeContext, TextureOutput) -> Vec3 + Send + Sync + 'static,
    {
        self.shaders.insert(map, Box::new(shader));
        self
    }

    pub fn with_geometry(mut self, name: &str, mesh: Mesh) -> Self {
        self.geometry.insert(name.to_string(), Arc::new(mesh));
        self
    }

    pub fn with_transform(mut self, name: &str, matrix: Mat4) -> Self {
        self.transforms.insert(name.to_string(), matrix);
        self
    }

    pub fn with_bound_transform(mut self, matrix: Mat4) -> Self {
        self.bound = Some(matrix);
        self
    }

    pub fn with_camera(mut self, matrix: Mat4) -> Self {
        self.camera = Some(matrix);
        self
    }
}

impl fmt::Debug for SceneProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneProvider")
            .field("constants", &self.constants.len())
            .field("shaders", &self.shaders.len())
            .field("geometry", &self.geometry.keys().collect::<Vec<_>>())
            .field("transforms", &self.transforms.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ValueProvider for SceneProvider {
    fn constant_value(&self, kind: ConstantKind, key: &str) -> Option<Constant> {
        self.constants.get(&(kind, key.to_string())).copied()
    }

    fn has_shader(&self, map: usize) -> bool {
        self.shaders.contains_key(&map)
    }

    fn evaluate_shader(&self, map: usize, ctx: &ShadeContext, output: TextureOutput) -> Vec3 {
        self.shaders
            .get(&map)
            .map_or(Vec3::ZERO, |shader| shader(ctx, output))
    }

    fn named_geometry(&self, name: &str) -> Option<Arc<Mesh>> {
        self.geometry.get(name).cloned()
    }

    fn named_transform(&self, name: &str) -> Option<Mat4> {
        self.transforms.get(name).copied()
    }

    fn bound_transform(&self) -> Option<Mat4> {
        self.bound
    }

    fn camera_transform(&self) -> Option<Mat4> {
        self.camera
    }
}
