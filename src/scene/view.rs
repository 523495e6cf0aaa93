//! Een geometry payload gekoppeld aan de gedeelde embedding.

use super::payload::GeometryPayload;
use super::{Embedding, IndexKind, SceneError, SceneResult};

/// Koppelt een payload aan de afbeelding van lokale vertices op de embedding.
///
/// `index_map[local]` is de embedding-index van lokale vertex `local`; de lengte
/// is altijd gelijk aan het aantal vertices van de payload. De map verandert na
/// constructie niet meer.
#[derive(Debug, Clone)]
pub struct GeometryView {
    payload: Box<dyn GeometryPayload>,
    index_map: Vec<usize>,
    dynamic: bool,
}

impl GeometryView {
    pub fn new(
        payload: Box<dyn GeometryPayload>,
        index_map: Vec<usize>,
        dynamic: bool,
    ) -> SceneResult<Self> {
        if index_map.len() != payload.vertex_count() {
            return Err(SceneError::VertexCountMismatch {
                geometry: payload.name().to_owned(),
                expected: index_map.len(),
                found: payload.vertex_count(),
            });
        }

        Ok(Self {
            payload,
            index_map,
            dynamic,
        })
    }

    /// View waarvan lokale vertex `i` embedding-vertex `i` is.
    #[must_use]
    pub fn identity(payload: Box<dyn GeometryPayload>, dynamic: bool) -> Self {
        let index_map = (0..payload.vertex_count()).collect();
        Self {
            payload,
            index_map,
            dynamic,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.payload.name()
    }

    #[must_use]
    pub fn payload(&self) -> &dyn GeometryPayload {
        self.payload.as_ref()
    }

    pub fn payload_mut(&mut self) -> &mut dyn GeometryPayload {
        self.payload.as_mut()
    }

    #[must_use]
    pub fn index_map(&self) -> &[usize] {
        &self.index_map
    }

    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.index_map.len()
    }

    /// Vertaalt een lokale vertex-index naar een embedding-index.
    pub fn vertex_index(&self, local: usize) -> SceneResult<usize> {
        self.index_map
            .get(local)
            .copied()
            .ok_or(SceneError::IndexOutOfRange {
                what: IndexKind::Local,
                index: local,
                len: self.index_map.len(),
            })
    }

    /// Kopieert de gekoppelde embedding-coördinaten naar de payload en laat die
    /// afgeleide data verversen. Statische views blijven ongemoeid.
    pub fn update(&mut self, embedding: &Embedding) {
        if !self.dynamic {
            return;
        }

        for (local, &global) in self.index_map.iter().enumerate() {
            if let Some(coords) = embedding.coords(global) {
                self.payload.set_point_coords(local, coords);
            }
        }
        self.payload.update();
    }

    /// Wist alle markeringen in de payload.
    pub(crate) fn clear_marks(&mut self) {
        for local in 0..self.index_map.len() {
            self.payload.set_marked(local, false);
        }
    }

    /// Zet een kopie van `payload` in de plaats; de map en de dynamic-vlag blijven.
    pub(crate) fn replace_payload(&mut self, payload: &dyn GeometryPayload) -> SceneResult<()> {
        if payload.vertex_count() != self.index_map.len() {
            return Err(SceneError::VertexCountMismatch {
                geometry: payload.name().to_owned(),
                expected: self.index_map.len(),
                found: payload.vertex_count(),
            });
        }
        self.payload = payload.copy();
        Ok(())
    }
}
