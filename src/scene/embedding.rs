//! De gedeelde coördinatenruimte achter elke geometrie van een scene.

use crate::bulk::{BulkChannelError, BulkHandle};

use super::{IndexKind, SceneError, SceneResult};

/// Eén vertex van de embedding.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Point {
    pub coords: Vec<f64>,
    /// Externe identiteit; bij een merge op label wijst die de doelindex aan.
    pub label: Option<String>,
    pub marked: bool,
}

impl Point {
    #[must_use]
    pub fn new(coords: Vec<f64>) -> Self {
        Self {
            coords,
            label: None,
            marked: false,
        }
    }

    #[must_use]
    pub fn labeled(coords: Vec<f64>, label: impl Into<String>) -> Self {
        Self {
            coords,
            label: Some(label.into()),
            marked: false,
        }
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.coords.len()
    }
}

/// Geordende reeks punten die alleen groeit. Index `i` is de vaste vertex-id
/// waar elke [`GeometryView`](super::GeometryView) naar verwijst.
///
/// Een embedding kan aan een bulkkanaal gekoppeld zijn; schrijfacties via
/// [`Embedding::set_point_coords`] gaan dan naar beste vermogen door naar dat kanaal.
#[derive(Debug, Default)]
pub struct Embedding {
    name: String,
    dim: usize,
    points: Vec<Point>,
    bulk: Option<BulkHandle>,
}

impl Embedding {
    /// Maakt een lege embedding. Een `dim` van nul betekent "nog onbekend": de
    /// eerste schrijfactie of bulk-read bepaalt die.
    #[must_use]
    pub fn new(name: impl Into<String>, dim: usize) -> Self {
        Self {
            name: name.into(),
            dim,
            points: Vec::new(),
            bulk: None,
        }
    }

    /// Maakt een embedding met `count` punten op nul.
    #[must_use]
    pub fn with_len(name: impl Into<String>, dim: usize, count: usize) -> Self {
        let mut embedding = Self::new(name, dim);
        embedding.grow_to(count);
        embedding
    }

    /// Bouwt een embedding uit al gedecodeerde punten. Alle punten moeten
    /// dezelfde dimensie hebben.
    pub fn from_points(name: impl Into<String>, points: Vec<Point>) -> SceneResult<Self> {
        let dim = points.first().map_or(0, Point::dim);
        if let Some(bad) = points.iter().find(|point| point.dim() != dim) {
            return Err(SceneError::DimensionMismatch {
                expected: dim,
                found: bad.dim(),
            });
        }

        Ok(Self {
            name: name.into(),
            dim,
            points,
            bulk: None,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    #[must_use]
    pub fn point(&self, index: usize) -> Option<&Point> {
        self.points.get(index)
    }

    #[must_use]
    pub fn coords(&self, index: usize) -> Option<&[f64]> {
        self.points.get(index).map(|point| point.coords.as_slice())
    }

    /// Legt de dimensie vast van een embedding waarvan die nog onbekend is.
    ///
    /// Geeft `false` als de embedding al een andere dimensie heeft.
    pub fn adopt_dim(&mut self, dim: usize) -> bool {
        if self.dim == dim {
            return true;
        }
        if self.dim != 0 {
            return false;
        }

        self.dim = dim;
        for point in &mut self.points {
            point.coords.resize(dim, 0.0);
        }
        true
    }

    /// Vult de embedding aan met lege punten tot `count`. Kort nooit in.
    pub fn grow_to(&mut self, count: usize) {
        if count <= self.points.len() {
            return;
        }
        let dim = self.dim;
        self.points.resize_with(count, || Point::new(vec![0.0; dim]));
    }

    /// Schrijft `coords` op `index`, maakt het punt aan als het nog niet bestaat
    /// en zendt de schrijfactie door naar een gekoppeld bulkkanaal.
    ///
    /// Een mislukte doorzending komt terug als `Err`, maar de lokale schrijfactie
    /// is dan al gebeurd en wordt niet teruggedraaid.
    ///
    /// # Panics
    ///
    /// Panikeert als `coords` niet bij de dimensie van de embedding past. Code die
    /// externe invoer verwerkt, controleert de lengte vooraf.
    pub fn set_point_coords(&mut self, index: usize, coords: &[f64]) -> Result<(), BulkChannelError> {
        self.load_point_coords(index, coords);
        self.flush_bulk()
    }

    /// Als [`Embedding::set_point_coords`], maar zonder doorzending. Bulkkanalen
    /// vullen hiermee een embedding.
    ///
    /// # Panics
    ///
    /// Panikeert als `coords` niet bij de dimensie van de embedding past.
    pub fn load_point_coords(&mut self, index: usize, coords: &[f64]) {
        if self.dim == 0 {
            self.adopt_dim(coords.len());
        }
        assert_eq!(
            coords.len(),
            self.dim,
            "coordinate length does not match embedding dimension"
        );

        self.grow_to(index.saturating_add(1));
        self.points[index].coords.copy_from_slice(coords);
    }

    /// Zet het label van een bestaand punt.
    pub fn set_label(&mut self, index: usize, label: Option<String>) -> SceneResult<()> {
        let len = self.points.len();
        let point = self
            .points
            .get_mut(index)
            .ok_or(SceneError::IndexOutOfRange {
                what: IndexKind::Embedding,
                index,
                len,
            })?;
        point.label = label;
        Ok(())
    }

    pub fn set_marked(&mut self, index: usize, marked: bool) -> SceneResult<()> {
        let len = self.points.len();
        let point = self
            .points
            .get_mut(index)
            .ok_or(SceneError::IndexOutOfRange {
                what: IndexKind::Embedding,
                index,
                len,
            })?;
        point.marked = marked;
        Ok(())
    }

    pub fn mark_all_false(&mut self) {
        for point in &mut self.points {
            point.marked = false;
        }
    }

    /// Indices van alle gemarkeerde punten, oplopend.
    #[must_use]
    pub fn marked_indices(&self) -> Vec<usize> {
        self.points
            .iter()
            .enumerate()
            .filter_map(|(idx, point)| point.marked.then_some(idx))
            .collect()
    }

    pub fn attach_bulk(&mut self, handle: BulkHandle) {
        self.bulk = Some(handle);
    }

    pub fn detach_bulk(&mut self) -> Option<BulkHandle> {
        self.bulk.take()
    }

    #[must_use]
    pub fn bulk(&self) -> Option<&BulkHandle> {
        self.bulk.as_ref()
    }

    /// Stuurt alle punten door het gekoppelde bulkkanaal, als dat er is.
    pub fn flush_bulk(&self) -> Result<(), BulkChannelError> {
        match self.bulk.as_ref() {
            Some(handle) => handle.write_from(self),
            None => Ok(()),
        }
    }
}

/// Diepe kopie van de punten. De kopie is van elk bulkkanaal losgekoppeld, zodat
/// een momentopname nooit in het gedeelde geheugen van de producer schrijft.
impl Clone for Embedding {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            dim: self.dim,
            points: self.points.clone(),
            bulk: None,
        }
    }
}
