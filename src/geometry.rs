//! Triangle meshes and the spatial queries used by geometry nodes.
//!
//! Queries are brute force over every face. Meshes used per particle are
//! expected to be small collision or guide shapes.

#![forbid(unsafe_code)]

use glam::Vec3;
use thiserror::Error;

/// Number of f32 slots a packed [`SurfaceHit`] occupies.
pub const SURFACE_HIT_WIDTH: usize = 21;

const EPSILON: f32 = 1e-7;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("face {face} references vertex {index}, mesh has {vertex_count}")]
    InvalidFace {
        face: usize,
        index: u32,
        vertex_count: usize,
    },
    #[error("{what} has {found} entries, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Indexed triangle mesh with optional per-face and per-vertex data.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    vertices: Vec<Vec3>,
    faces: Vec<[u32; 3]>,
    material_ids: Vec<i32>,
    smoothing_groups: Vec<u32>,
    vertex_normals: Vec<Vec3>,
    uvws: Vec<Vec3>,
}

impl Mesh {
    pub fn new(vertices: Vec<Vec3>, faces: Vec<[u32; 3]>) -> Result<Self, GeometryError> {
        for (face, indices) in faces.iter().enumerate() {
            if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
                return Err(GeometryError::InvalidFace {
                    face,
                    index,
                    vertex_count: vertices.len(),
                });
            }
        }
        let vertex_normals = area_weighted_normals(&vertices, &faces);
        Ok(Self {
            vertices,
            faces,
            material_ids: Vec::new(),
            smoothing_groups: Vec::new(),
            vertex_normals,
            uvws: Vec::new(),
        })
    }

    pub fn with_material_ids(mut self, ids: Vec<i32>) -> Result<Self, GeometryError> {
        check_len("material ids", self.faces.len(), ids.len())?;
        self.material_ids = ids;
        Ok(self)
    }

    pub fn with_smoothing_groups(mut self, groups: Vec<u32>) -> Result<Self, GeometryError> {
        check_len("smoothing groups", self.faces.len(), groups.len())?;
        self.smoothing_groups = groups;
        Ok(self)
    }

    /// Per-vertex texture coordinates.
    pub fn with_uvws(mut self, uvws: Vec<Vec3>) -> Result<Self, GeometryError> {
        check_len("uvws", self.vertices.len(), uvws.len())?;
        self.uvws = uvws;
        Ok(self)
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn faces(&self) -> &[[u32; 3]] {
        &self.faces
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    fn corners(&self, face: usize) -> [Vec3; 3] {
        let [a, b, c] = self.faces[face];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    fn face_normal(&self, face: usize) -> Vec3 {
        let [a, b, c] = self.corners(face);
        (b - a).cross(c - a).normalize_or_zero()
    }

    fn hit(&self, face: usize, position: Vec3, bary: Vec3, signed_distance: f32) -> SurfaceHit {
        let [a, b, c] = self.faces[face].map(|i| i as usize);
        let smooth_normal = (self.vertex_normals[a] * bary.x
            + self.vertex_normals[b] * bary.y
            + self.vertex_normals[c] * bary.z)
            .normalize_or_zero();
        let uvw = if self.uvws.is_empty() {
            Vec3::ZERO
        } else {
            self.uvws[a] * bary.x + self.uvws[b] * bary.y + self.uvws[c] * bary.z
        };
        SurfaceHit {
            position,
            signed_distance,
            face_normal: self.face_normal(face),
            smooth_normal,
            mesh_index: 0,
            face_index: face as i32,
            material_id: self.material_ids.get(face).copied().unwrap_or(0),
            smoothing_group: self.smoothing_groups.get(face).copied().unwrap_or(0),
            bary,
            uvw,
            valid: true,
        }
    }

    /// Closest surface point to `point`. The signed distance is positive on
    /// the side the face normal points to.
    pub fn nearest_point(&self, point: Vec3) -> Option<SurfaceHit> {
        let mut best: Option<(f32, usize, Vec3, Vec3)> = None;
        for face in 0..self.faces.len() {
            let [a, b, c] = self.corners(face);
            let (q, bary) = closest_point_on_triangle(point, a, b, c);
            let d2 = point.distance_squared(q);
            if best.map_or(true, |(best_d2, ..)| d2 < best_d2) {
                best = Some((d2, face, q, bary));
            }
        }
        best.map(|(d2, face, q, bary)| {
            let side = (point - q).dot(self.face_normal(face));
            let distance = d2.sqrt();
            let signed = if side < 0.0 { -distance } else { distance };
            self.hit(face, q, bary, signed)
        })
    }

    /// First intersection along `origin + t * direction`, `t > 0`. The
    /// signed distance holds the distance travelled.
    pub fn ray_intersect(&self, origin: Vec3, direction: Vec3) -> Option<SurfaceHit> {
        let mut best: Option<(f32, usize, Vec3)> = None;
        for face in 0..self.faces.len() {
            let [a, b, c] = self.corners(face);
            if let Some((t, u, v)) = ray_triangle(origin, direction, a, b, c) {
                if best.map_or(true, |(best_t, ..)| t < best_t) {
                    best = Some((t, face, Vec3::new(1.0 - u - v, u, v)));
                }
            }
        }
        best.map(|(t, face, bary)| {
            let position = origin + direction * t;
            self.hit(face, position, bary, t * direction.length())
        })
    }
}

fn check_len(what: &'static str, expected: usize, found: usize) -> Result<(), GeometryError> {
    if expected != found {
        return Err(GeometryError::LengthMismatch {
            what,
            expected,
            found,
        });
    }
    Ok(())
}

fn area_weighted_normals(vertices: &[Vec3], faces: &[[u32; 3]]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; vertices.len()];
    for &[a, b, c] in faces {
        let (a, b, c) = (a as usize, b as usize, c as usize);
        // Unnormalized cross product: length is twice the face area.
        let n = (vertices[b] - vertices[a]).cross(vertices[c] - vertices[a]);
        normals[a] += n;
        normals[b] += n;
        normals[c] += n;
    }
    normals.into_iter().map(Vec3::normalize_or_zero).collect()
}

/// Closest point on triangle `abc` and its barycentric coordinates.
fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> (Vec3, Vec3) {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (a, Vec3::X);
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (b, Vec3::Y);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return (a + ab * v, Vec3::new(1.0 - v, v, 0.0));
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (c, Vec3::Z);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return (a + ac * w, Vec3::new(1.0 - w, 0.0, w));
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * w, Vec3::new(0.0, 1.0 - w, w));
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, Vec3::new(1.0 - v - w, v, w))
}

/// Möller–Trumbore, two-sided. Returns `(t, u, v)`.
fn ray_triangle(origin: Vec3, dir: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<(f32, f32, f32)> {
    let e1 = b - a;
    let e2 = c - a;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < EPSILON {
        return None;
    }
    let inv = 1.0 / det;
    let s = origin - a;
    let u = s.dot(p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv;
    (t > EPSILON).then_some((t, u, v))
}

/// Result of a surface query, packable into [`SURFACE_HIT_WIDTH`] floats.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SurfaceHit {
    pub position: Vec3,
    pub signed_distance: f32,
    pub face_normal: Vec3,
    pub smooth_normal: Vec3,
    pub mesh_index: i32,
    pub face_index: i32,
    pub material_id: i32,
    pub smoothing_group: u32,
    pub bary: Vec3,
    pub uvw: Vec3,
    pub valid: bool,
}

/// Slot offsets inside a packed hit.
pub(crate) mod layout {
    pub const POSITION: usize = 0;
    pub const SIGNED_DISTANCE: usize = 3;
    pub const FACE_NORMAL: usize = 4;
    pub const SMOOTH_NORMAL: usize = 7;
    pub const MESH_INDEX: usize = 10;
    pub const FACE_INDEX: usize = 11;
    pub const MATERIAL_ID: usize = 12;
    pub const SMOOTHING_GROUP: usize = 13;
    pub const BARY: usize = 14;
    pub const UVW: usize = 17;
    pub const VALID: usize = 20;
}

impl SurfaceHit {
    /// Writes the hit into `out`. Integer fields are stored as their bit
    /// patterns.
    pub fn pack(&self, out: &mut [f32]) {
        use layout::*;
        out[POSITION..POSITION + 3].copy_from_slice(&self.position.to_array());
        out[SIGNED_DISTANCE] = self.signed_distance;
        out[FACE_NORMAL..FACE_NORMAL + 3].copy_from_slice(&self.face_normal.to_array());
        out[SMOOTH_NORMAL..SMOOTH_NORMAL + 3].copy_from_slice(&self.smooth_normal.to_array());
        out[MESH_INDEX] = f32::from_bits(self.mesh_index as u32);
        out[FACE_INDEX] = f32::from_bits(self.face_index as u32);
        out[MATERIAL_ID] = f32::from_bits(self.material_id as u32);
        out[SMOOTHING_GROUP] = f32::from_bits(self.smoothing_group);
        out[BARY..BARY + 3].copy_from_slice(&self.bary.to_array());
        out[UVW..UVW + 3].copy_from_slice(&self.uvw.to_array());
        out[VALID] = if self.valid { 1.0 } else { 0.0 };
    }

    pub fn unpack(data: &[f32]) -> Self {
        use layout::*;
        let v3 = |i: usize| Vec3::new(data[i], data[i + 1], data[i + 2]);
        Self {
            position: v3(POSITION),
            signed_distance: data[SIGNED_DISTANCE],
            face_normal: v3(FACE_NORMAL),
            smooth_normal: v3(SMOOTH_NORMAL),
            mesh_index: data[MESH_INDEX].to_bits() as i32,
            face_index: data[FACE_INDEX].to_bits() as i32,
            material_id: data[MATERIAL_ID].to_bits() as i32,
            smoothing_group: data[SMOOTHING_GROUP].to_bits(),
            bary: v3(BARY),
            uvw: v3(UVW),
            valid: data[VALID] != 0.0,
        }
    }
}
