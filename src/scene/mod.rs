//! Scene-model: één gedeelde embedding plus de benoemde geometrieën die eruit putten.
//!
//! Een [`Scene`] lockt niets. Alle muterende aanroepen op één scene moeten door
//! de eigenaar worden geserialiseerd, normaal de [`Session`](crate::session::Session)
//! die het kanaal van de scene afhandelt.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::bulk::BulkChannelError;

mod embedding;
mod payload;
mod view;

pub use embedding::{Embedding, Point};
pub use payload::GeometryPayload;
pub use view::GeometryView;

pub type SceneResult<T> = Result<T, SceneError>;

/// Tot welke indexruimte een ongeldige index behoort.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IndexKind {
    /// Lokale vertex-index van een geometrie.
    Local,
    /// Vertex-index in de embedding.
    Embedding,
    /// Positie van een geometrie binnen de scene.
    Geometry,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("lokale vertex"),
            Self::Embedding => f.write_str("embedding-vertex"),
            Self::Geometry => f.write_str("geometrie"),
        }
    }
}

/// Adres- en structuurfouten. Geen enkele laat een halve schrijfactie achter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SceneError {
    #[error("onbekende geometrie `{0}`")]
    UnknownGeometry(String),
    #[error("{what}-index {index} valt buiten bereik (lengte {len})")]
    IndexOutOfRange {
        what: IndexKind,
        index: usize,
        len: usize,
    },
    #[error("label `{0}` is geen embedding-index")]
    MalformedLabel(String),
    #[error("verwacht {expected} coördinaten, kreeg er {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("geometrie `{0}` bestaat al in de scene")]
    DuplicateGeometry(String),
    #[error("geometrie `{geometry}` heeft {found} vertices, de index map heeft er {expected}")]
    VertexCountMismatch {
        geometry: String,
        expected: usize,
        found: usize,
    },
}

/// Eigenaar van één embedding en de bijbehorende geometry views.
#[derive(Debug, Clone)]
pub struct Scene {
    name: String,
    embedding: Embedding,
    views: Vec<GeometryView>,
    name_index: HashMap<String, usize>,
    forward_failures: usize,
}

impl Scene {
    /// Bouwt een live scene. Dynamische views worden direct met de embedding
    /// gesynchroniseerd.
    pub fn new(
        title: impl Into<String>,
        embedding: Embedding,
        views: Vec<GeometryView>,
    ) -> SceneResult<Self> {
        let mut scene = Self {
            name: title.into(),
            embedding,
            views: Vec::with_capacity(views.len()),
            name_index: HashMap::new(),
            forward_failures: 0,
        };
        for view in views {
            scene.add_view(view)?;
        }
        Ok(scene)
    }

    /// Voegt een view toe en geeft de positie terug.
    pub fn add_view(&mut self, mut view: GeometryView) -> SceneResult<usize> {
        if self.name_index.contains_key(view.name()) {
            return Err(SceneError::DuplicateGeometry(view.name().to_owned()));
        }
        let len = self.embedding.len();
        if let Some(&index) = view.index_map().iter().find(|&&index| index >= len) {
            return Err(SceneError::IndexOutOfRange {
                what: IndexKind::Embedding,
                index,
                len,
            });
        }

        view.update(&self.embedding);
        let position = self.views.len();
        self.name_index.insert(view.name().to_owned(), position);
        self.views.push(view);
        Ok(position)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    #[must_use]
    pub fn views(&self) -> &[GeometryView] {
        &self.views
    }

    #[must_use]
    pub fn geometry_count(&self) -> usize {
        self.views.len()
    }

    #[must_use]
    pub fn view_index(&self, name: &str) -> Option<usize> {
        self.name_index.get(name).copied()
    }

    #[must_use]
    pub fn view(&self, name: &str) -> Option<&GeometryView> {
        self.view_index(name).map(|idx| &self.views[idx])
    }

    /// Directe payload-toegang voor bewerkingen door de host, zoals vertices markeren.
    pub fn payload_mut(&mut self, name: &str) -> SceneResult<&mut dyn GeometryPayload> {
        let idx = self
            .view_index(name)
            .ok_or_else(|| SceneError::UnknownGeometry(name.to_owned()))?;
        Ok(self.views[idx].payload_mut())
    }

    /// Zoekt de embedding-index bij een lokale vertex van een geometrie.
    pub fn vertex_index(&self, geometry: &str, local: usize) -> SceneResult<usize> {
        self.view(geometry)
            .ok_or_else(|| SceneError::UnknownGeometry(geometry.to_owned()))?
            .vertex_index(local)
    }

    /// Aantal mislukte doorzendingen naar het bulkkanaal. Een mislukte
    /// doorzending draait de schrijfactie in de embedding nooit terug.
    #[must_use]
    pub fn forward_failures(&self) -> usize {
        self.forward_failures
    }

    /// Verplaatst één vertex van `geometry` en zet de nieuwe positie door naar
    /// elke dynamische view. Geeft de geschreven embedding-index terug.
    ///
    /// Het adres wordt volledig gecontroleerd vóór de enige schrijfactie.
    pub fn move_vertex(
        &mut self,
        geometry: &str,
        local: usize,
        coords: &[f64],
    ) -> SceneResult<usize> {
        let target = self.vertex_index(geometry, local)?;
        self.check_dim(coords.len())?;

        let forwarded = self.embedding.set_point_coords(target, coords);
        self.report_forward(forwarded);
        self.refresh_dynamic_views();
        Ok(target)
    }

    /// Voegt `new_points` samen met de embedding en ververst elke dynamische view.
    ///
    /// Punten met een label komen op de index die het label noemt; punten zonder
    /// label op hun positie in `new_points`. Alle labels van de batch worden
    /// gecontroleerd voordat er iets geschreven wordt. Een label mag de embedding
    /// hooguit met het aantal binnenkomende punten laten groeien. Met `clear_tags`
    /// worden eerst alle markeringen gewist.
    ///
    /// Draagt `new_points` een ander bulkkanaal dan de scene, dan volgt de scene
    /// voortaan dat nieuwe kanaal.
    pub fn update(&mut self, new_points: &Embedding, clear_tags: bool) -> SceneResult<()> {
        if !new_points.is_empty() && self.embedding.dim() != 0 {
            self.check_dim(new_points.dim())?;
        }
        let limit = merge_limit(self.embedding.len(), new_points.len());
        let targets = new_points
            .points()
            .iter()
            .enumerate()
            .map(|(position, point)| match point.label.as_deref() {
                Some(label) => parse_label(label, limit),
                None => Ok(position),
            })
            .collect::<SceneResult<Vec<usize>>>()?;

        if !new_points.name().is_empty() {
            self.name = new_points.name().to_owned();
            self.embedding.set_name(new_points.name());
        }
        if clear_tags {
            self.embedding.mark_all_false();
            for view in self.views.iter_mut().filter(|view| view.is_dynamic()) {
                view.clear_marks();
            }
        }

        let same_channel = match (new_points.bulk(), self.embedding.bulk()) {
            (Some(incoming), Some(current)) => incoming.key() == current.key(),
            _ => false,
        };
        if let Some(handle) = new_points.bulk().filter(|_| !same_channel) {
            log::debug!("scene `{}` volgt nu bulkkanaal {}", self.name, handle.key());
            self.embedding.attach_bulk(handle.clone());
        }

        if !new_points.is_empty() {
            self.embedding.adopt_dim(new_points.dim());
        }
        self.embedding.grow_to(new_points.len());
        for (point, &target) in new_points.points().iter().zip(&targets) {
            self.embedding.load_point_coords(target, &point.coords);
            let unlabeled = self
                .embedding
                .point(target)
                .is_some_and(|existing| existing.label.is_none());
            if unlabeled && point.label.is_some() {
                self.embedding.set_label(target, point.label.clone())?;
            }
        }
        if !same_channel && !targets.is_empty() {
            let forwarded = self.embedding.flush_bulk();
            self.report_forward(forwarded);
        }

        self.refresh_dynamic_views();
        Ok(())
    }

    /// Verzamelt de gemarkeerde vertices van elke view als embedding-indices, in
    /// view-volgorde en daarbinnen lokale volgorde. Dubbelen blijven staan: twee
    /// views die dezelfde vertex markeren, leveren die twee keer op.
    ///
    /// De payload-positie van elke gemarkeerde vertex wordt teruggeschreven in de
    /// embedding en de markering daar gezet; alle andere markeringen vervallen.
    pub fn collect_marked_vertices(&mut self) -> Vec<usize> {
        self.embedding.mark_all_false();

        let dim = self.embedding.dim();
        let mut marked = Vec::new();
        for view in &self.views {
            let payload = view.payload();
            for (local, &global) in view.index_map().iter().enumerate() {
                if !payload.get_marked(local) {
                    continue;
                }
                match payload.vertex_coords(local) {
                    Some(coords) if coords.len() == dim || dim == 0 => {
                        self.embedding.load_point_coords(global, coords);
                    }
                    _ => log::warn!(
                        "marked vertex {local} of `{}` has no usable coordinates",
                        view.name()
                    ),
                }
                if self.embedding.set_marked(global, true).is_ok() {
                    marked.push(global);
                }
            }
        }

        if !marked.is_empty() {
            let forwarded = self.embedding.flush_bulk();
            self.report_forward(forwarded);
        }
        marked
    }

    /// [`Scene::collect_marked_vertices`] met indices in hun tekstvorm.
    pub fn get_marked_vertices(&mut self) -> Vec<String> {
        self.collect_marked_vertices()
            .into_iter()
            .map(|index| index.to_string())
            .collect()
    }

    /// Vervangt de payload op `position` door een kopie van `payload`. De index
    /// map en de dynamic-vlag blijven staan.
    pub fn set_geometry_at(
        &mut self,
        position: usize,
        payload: &dyn GeometryPayload,
    ) -> SceneResult<()> {
        let old_name = self.view_at(position)?.name().to_owned();
        let new_name = payload.name();
        if new_name != old_name && self.name_index.contains_key(new_name) {
            return Err(SceneError::DuplicateGeometry(new_name.to_owned()));
        }

        self.views[position].replace_payload(payload)?;
        if new_name != old_name {
            self.name_index.remove(&old_name);
            self.name_index.insert(new_name.to_owned(), position);
        }
        Ok(())
    }

    /// Geeft een kopie van de payload op `position`.
    pub fn get_geometry_at(&self, position: usize) -> SceneResult<Box<dyn GeometryPayload>> {
        Ok(self.view_at(position)?.payload().copy())
    }

    fn view_at(&self, position: usize) -> SceneResult<&GeometryView> {
        self.views.get(position).ok_or(SceneError::IndexOutOfRange {
            what: IndexKind::Geometry,
            index: position,
            len: self.views.len(),
        })
    }

    fn check_dim(&self, found: usize) -> SceneResult<()> {
        let expected = self.embedding.dim();
        if expected != 0 && expected != found {
            return Err(SceneError::DimensionMismatch { expected, found });
        }
        Ok(())
    }

    fn refresh_dynamic_views(&mut self) {
        for view in self.views.iter_mut().filter(|view| view.is_dynamic()) {
            view.update(&self.embedding);
        }
    }

    fn report_forward(&mut self, result: Result<(), BulkChannelError>) {
        if let Err(err) = result {
            self.forward_failures += 1;
            log::warn!("bulk forward for scene `{}` failed: {err}", self.name);
        }
    }
}

/// Hoogste index (exclusief) die een label-merge mag beschrijven: de embedding
/// groeit per merge hooguit met het aantal binnenkomende punten.
fn merge_limit(current: usize, incoming: usize) -> usize {
    current.max(incoming).saturating_add(incoming)
}

fn parse_label(label: &str, limit: usize) -> SceneResult<usize> {
    let index = label
        .trim()
        .parse::<usize>()
        .map_err(|_| SceneError::MalformedLabel(label.to_owned()))?;
    if index >= limit {
        return Err(SceneError::IndexOutOfRange {
            what: IndexKind::Embedding,
            index,
            len: limit,
        });
    }
    Ok(index)
}
