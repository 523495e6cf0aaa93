use crate::scene::GeometryPayload;

use super::core::{BBox, Vec3};

/// Bare vertex cloud with per-vertex marks.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSetPayload {
    name: String,
    vertices: Vec<Vec<f64>>,
    marked: Vec<bool>,
    bounds: Option<BBox>,
}

impl PointSetPayload {
    #[must_use]
    pub fn new(name: impl Into<String>, vertices: Vec<Vec<f64>>) -> Self {
        let marked = vec![false; vertices.len()];
        let mut payload = Self {
            name: name.into(),
            vertices,
            marked,
            bounds: None,
        };
        payload.update_bounds();
        payload
    }

    #[must_use]
    pub fn vertices(&self) -> &[Vec<f64>] {
        &self.vertices
    }

    /// Bounds as of the last [`GeometryPayload::update`].
    #[must_use]
    pub fn bounds(&self) -> Option<BBox> {
        self.bounds
    }

    fn update_bounds(&mut self) {
        self.bounds = BBox::from_points(self.vertices.iter().map(|v| Vec3::from_coords(v)));
    }
}

impl GeometryPayload for PointSetPayload {
    fn name(&self) -> &str {
        &self.name
    }

    fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    fn vertex_coords(&self, index: usize) -> Option<&[f64]> {
        self.vertices.get(index).map(Vec::as_slice)
    }

    fn set_point_coords(&mut self, index: usize, coords: &[f64]) {
        if let Some(vertex) = self.vertices.get_mut(index) {
            vertex.clear();
            vertex.extend_from_slice(coords);
        }
    }

    fn update(&mut self) {
        self.update_bounds();
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_follow_update() {
        let mut payload = PointSetPayload::new("P", vec![vec![0.0, 0.0, 0.0], vec![1.0, 1.0, 1.0]]);
        payload.set_point_coords(1, &[4.0, 0.0, 0.0]);
        assert_eq!(payload.bounds().unwrap().max, Vec3::new(1.0, 1.0, 1.0));

        payload.update();
        assert_eq!(payload.bounds().unwrap().max, Vec3::new(4.0, 0.0, 0.0));
    }

    #[test]
    fn out_of_range_access_is_ignored() {
        let mut payload = PointSetPayload::new("P", vec![vec![0.0; 3]]);
        payload.set_marked(5, true);
        payload.set_point_coords(5, &[1.0, 1.0, 1.0]);
        assert!(!payload.get_marked(5));
        assert!(payload.vertex_coords(5).is_none());
        assert!(payload.faces().is_empty());
    }
}
