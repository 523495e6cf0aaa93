//! Interface voor renderbare geometry payloads.

use std::fmt;

/// Wat de scene van een geometry payload nodig heeft. De host (renderer) bezit
/// de concrete data; de scene leest en schrijft alleen vertex-coördinaten en
/// markeringen via deze aanroepen.
pub trait GeometryPayload: fmt::Debug + Send {
    /// Naam van de geometrie, uniek binnen een scene.
    fn name(&self) -> &str;

    fn vertex_count(&self) -> usize;

    fn vertex_coords(&self, index: usize) -> Option<&[f64]>;

    fn set_point_coords(&mut self, index: usize, coords: &[f64]);

    /// Herberekent afgeleide data (normalen, bounds) na coördinaatwijzigingen.
    fn update(&mut self);

    fn get_marked(&self, index: usize) -> bool;

    fn set_marked(&mut self, index: usize, marked: bool);

    /// Diepe kopie van de payload.
    fn copy(&self) -> Box<dyn GeometryPayload>;

    /// Facelijsten voor exporters. Puntenverzamelingen hebben er geen.
    fn faces(&self) -> &[Vec<u32>] {
        &[]
    }
}

impl Clone for Box<dyn GeometryPayload> {
    fn clone(&self) -> Self {
        self.copy()
    }
}
