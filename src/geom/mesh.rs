use crate::scene::GeometryPayload;

use super::core::{BBox, Vec3};

/// Polygon mesh whose vertices are driven by the scene embedding.
///
/// Faces are arbitrary polygons given as vertex index loops. Face and vertex
/// normals plus bounds are derived data, recomputed by [`GeometryPayload::update`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshPayload {
    name: String,
    positions: Vec<Vec<f64>>,
    faces: Vec<Vec<u32>>,
    marked: Vec<bool>,
    face_normals: Vec<Vec3>,
    vertex_normals: Vec<Vec3>,
    bounds: Option<BBox>,
}

impl MeshPayload {
    /// Create a mesh and compute its derived data.
    #[must_use]
    pub fn new(name: impl Into<String>, positions: Vec<Vec<f64>>, faces: Vec<Vec<u32>>) -> Self {
        let marked = vec![false; positions.len()];
        let mut mesh = Self {
            name: name.into(),
            positions,
            faces,
            marked,
            ..Self::default()
        };
        mesh.recompute();
        mesh
    }

    #[must_use]
    pub fn positions(&self) -> &[Vec<f64>] {
        &self.positions
    }

    #[must_use]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    #[must_use]
    pub fn face_normals(&self) -> &[Vec3] {
        &self.face_normals
    }

    #[must_use]
    pub fn vertex_normals(&self) -> &[Vec3] {
        &self.vertex_normals
    }

    #[must_use]
    pub fn bounds(&self) -> Option<BBox> {
        self.bounds
    }

    /// Returns true if any vertex position contains NaN or Inf values.
    #[must_use]
    pub fn has_invalid_vertices(&self) -> bool {
        self.positions
            .iter()
            .any(|p| p.iter().any(|c| !c.is_finite()))
    }

    /// Returns true if all face indices are within bounds.
    #[must_use]
    pub fn has_valid_indices(&self) -> bool {
        let n = self.positions.len();
        self.faces
            .iter()
            .flatten()
            .all(|&i| (i as usize) < n)
    }

    #[must_use]
    pub fn has_degenerate_faces(&self) -> bool {
        self.faces.iter().any(|face| face.len() < 3)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.has_degenerate_faces() {
            return Err("mesh has faces with fewer than three vertices".to_string());
        }
        if self.has_invalid_vertices() {
            return Err("mesh has invalid vertex coordinates (NaN/Inf)".to_string());
        }
        if !self.has_valid_indices() {
            return Err("mesh has out-of-bounds vertex indices".to_string());
        }
        Ok(())
    }

    fn recompute(&mut self) {
        let points: Vec<Vec3> = self.positions.iter().map(|p| Vec3::from_coords(p)).collect();
        self.face_normals = self
            .faces
            .iter()
            .map(|face| face_normal(&points, face))
            .collect();
        self.vertex_normals = vertex_normals(&points, &self.faces, &self.face_normals);
        self.bounds = BBox::from_points(points);
    }
}

/// Newell normal of a polygon; works for non-planar and concave loops.
fn face_normal(points: &[Vec3], face: &[u32]) -> Vec3 {
    let mut normal = Vec3::ZERO;
    for (k, &i) in face.iter().enumerate() {
        let j = face[(k + 1) % face.len()];
        let (Some(a), Some(b)) = (points.get(i as usize), points.get(j as usize)) else {
            continue;
        };
        normal = normal
            + Vec3::new(
                (a.y - b.y) * (a.z + b.z),
                (a.z - b.z) * (a.x + b.x),
                (a.x - b.x) * (a.y + b.y),
            );
    }
    normal.normalized().unwrap_or(Vec3::Z)
}

fn vertex_normals(points: &[Vec3], faces: &[Vec<u32>], face_normals: &[Vec3]) -> Vec<Vec3> {
    let mut sums = vec![Vec3::ZERO; points.len()];
    for (face, &n) in faces.iter().zip(face_normals) {
        for &i in face {
            if let Some(sum) = sums.get_mut(i as usize) {
                *sum = *sum + n;
            }
        }
    }
    sums.into_iter()
        .map(|sum| sum.normalized().unwrap_or(Vec3::Z))
        .collect()
}

impl GeometryPayload for MeshPayload {
    fn name(&self) -> &str {
        &self.name
    }

    fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    fn vertex_coords(&self, index: usize) -> Option<&[f64]> {
        self.positions.get(index).map(Vec::as_slice)
    }

    fn set_point_coords(&mut self, index: usize, coords: &[f64]) {
        if let Some(position) = self.positions.get_mut(index) {
            position.clear();
            position.extend_from_slice(coords);
        }
    }

    fn update(&mut self) {
        self.recompute();
    }

    fn get_marked(&self, index: usize) -> bool {
        self.marked.get(index).copied().unwrap_or(false)
    }

    fn set_marked(&mut self, index: usize, marked: bool) {
        if let Some(flag) = self.marked.get_mut(index) {
            *flag = marked;
        }
    }

    fn copy(&self) -> Box<dyn GeometryPayload> {
        Box::new(self.clone())
    }

    fn faces(&self) -> &[Vec<u32>] {
        &self.faces
    }
}
