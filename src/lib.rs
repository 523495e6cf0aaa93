#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bulk;
pub mod geom;
pub mod protocol;
pub mod scene;
pub mod session;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bulk::{BulkKey, BulkRegistry, MemoryBulkChannel};
use geom::{MeshPayload, PointSetPayload, Vec3};
use protocol::Codec;
use scene::{GeometryPayload, GeometryView};
use serde::Serialize;
use session::{Applied, Session, SessionOptions, SessionResult};
use wasm_bindgen::JsError;
use wasm_bindgen::prelude::*;

cfg_if::cfg_if! {
    if #[cfg(all(feature = "console_error_panic_hook", target_arch = "wasm32"))] {
        #[wasm_bindgen(start)]
        pub fn initialize() {
            console_error_panic_hook::set_once();
            init_logger();
        }
    } else {
        #[wasm_bindgen(start)]
        pub fn initialize() {
            init_logger();
        }
    }
}

#[cfg(feature = "debug_logs")]
fn init_logger() {
    use log::LevelFilter;
    use wasm_bindgen_console_logger::DEFAULT_LOGGER;
    if log::set_logger(&DEFAULT_LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Debug);
    }
}

#[cfg(not(feature = "debug_logs"))]
fn init_logger() {}

/// Dimensie voor views die worden toegevoegd voordat de embedding er een heeft.
const DEFAULT_DIM: usize = 3;

#[derive(Debug, Default, Serialize)]
struct GeometryDiff {
    added: Vec<GeometryExport>,
    updated: Vec<GeometryExport>,
    removed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct GeometryExport {
    name: String,
    dynamic: bool,
    vertices: Vec<[f64; 3]>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    faces: Vec<Vec<u32>>,
    marked: Vec<usize>,
}

impl GeometryExport {
    fn from_view(view: &GeometryView) -> Self {
        let payload = view.payload();
        let count = payload.vertex_count();
        Self {
            name: view.name().to_owned(),
            dynamic: view.is_dynamic(),
            vertices: (0..count)
                .map(|i| {
                    payload
                        .vertex_coords(i)
                        .map_or(Vec3::ZERO, Vec3::from_coords)
                        .to_array()
                })
                .collect(),
            faces: payload.faces().to_vec(),
            marked: (0..count).filter(|&i| payload.get_marked(i)).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ParameterExport<'a> {
    parameters: &'a BTreeMap<String, String>,
    interactive: &'a BTreeMap<String, String>,
}

/// Viewer in de browser: één sessie, gevoed met protocoltekst door de hostpagina.
///
/// Bulk-keys verwijzen naar een kanaal in het geheugen dat de pagina vult met
/// [`Viewer::store_bulk`]. Uitgaand verkeer als neveneffect (teruggestuurde
/// verplaatsingen) komt in een outbox die de pagina leegt met [`Viewer::take_outbox`].
#[wasm_bindgen]
pub struct Viewer {
    initialized: bool,
    session: Session,
    bulk: Arc<MemoryBulkChannel>,
    outbox: Vec<u8>,
    geometry_map: BTreeMap<String, GeometryExport>,
}

impl Default for Viewer {
    fn default() -> Self {
        Self::new()
    }
}

#[wasm_bindgen]
impl Viewer {
    #[wasm_bindgen(constructor)]
    #[must_use]
    pub fn new() -> Viewer {
        let bulk = Arc::new(MemoryBulkChannel::new());
        let registry = BulkRegistry::new().with_fallback(bulk.clone());
        Viewer {
            initialized: true,
            session: Session::new(Codec::default(), registry),
            bulk,
            outbox: Vec::new(),
            geometry_map: BTreeMap::new(),
        }
    }

    #[wasm_bindgen]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Waar zodra een bericht met punten de scene heeft aangemaakt.
    #[wasm_bindgen]
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.session.scene().is_some()
    }

    #[wasm_bindgen]
    pub fn declare_parameter(&mut self, name: &str) {
        self.session.codec_mut().declare_parameter(normalize_name(name));
    }

    #[wasm_bindgen]
    pub fn declare_interactive(&mut self, name: &str) {
        self.session.codec_mut().declare_interactive(normalize_name(name));
    }

    /// Accepteert een `SessionOptions`-object; ontbrekende velden houden hun standaardwaarde.
    #[wasm_bindgen]
    pub fn set_options(&mut self, options: JsValue) -> Result<(), JsValue> {
        let options: SessionOptions =
            serde_wasm_bindgen::from_value(options).map_err(|err| JsError::new(&err.to_string()))?;
        self.session.set_options(options);
        Ok(())
    }

    /// Vult bulkslot `key` met een platte coördinatenbuffer van `dim` waarden per punt.
    #[wasm_bindgen]
    pub fn store_bulk(&mut self, key: i32, coords: Vec<f64>, dim: usize) -> Result<(), JsValue> {
        let rows = split_rows(&coords, dim).map_err(|err| js_error(&err))?;
        self.bulk.store(BulkKey(i64::from(key)), rows);
        Ok(())
    }

    /// Decodeert en verwerkt één protocolbericht; geeft terug wat er veranderde.
    #[wasm_bindgen]
    pub fn load_message(&mut self, text: &str) -> Result<JsValue, JsValue> {
        let applied = self.apply_text(text).map_err(to_js_error)?;
        serde_wasm_bindgen::to_value(&applied).map_err(|err| JsError::new(&err.to_string()).into())
    }

    /// Voegt een puntenverzameling toe waarvan vertex `i` embedding-vertex `index_map[i]` is.
    #[wasm_bindgen]
    pub fn add_point_view(
        &mut self,
        name: &str,
        coords: Vec<f64>,
        index_map: Vec<u32>,
        dynamic: bool,
    ) -> Result<usize, JsValue> {
        let rows = self.view_rows(&coords).map_err(|err| js_error(&err))?;
        let payload = PointSetPayload::new(normalize_name(name), rows);
        self.push_view(Box::new(payload), &index_map, dynamic)
            .map_err(to_js_error)
    }

    /// Voegt een mesh toe; `faces` is een array van vertex-indexarrays.
    #[wasm_bindgen]
    pub fn add_mesh_view(
        &mut self,
        name: &str,
        coords: Vec<f64>,
        faces: JsValue,
        index_map: Vec<u32>,
        dynamic: bool,
    ) -> Result<usize, JsValue> {
        let faces: Vec<Vec<u32>> =
            serde_wasm_bindgen::from_value(faces).map_err(|err| JsError::new(&err.to_string()))?;
        let rows = self.view_rows(&coords).map_err(|err| js_error(&err))?;
        let payload = MeshPayload::new(normalize_name(name), rows, faces);
        payload.validate().map_err(|err| js_error(&err))?;
        self.push_view(Box::new(payload), &index_map, dynamic)
            .map_err(to_js_error)
    }

    /// Verplaatst een vertex en geeft de embedding-index terug.
    #[wasm_bindgen]
    pub fn move_vertex(&mut self, geometry: &str, local: usize, coords: Vec<f64>) -> Result<usize, JsValue> {
        self.session
            .move_vertex(geometry, local, &coords, &mut self.outbox)
            .map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub fn set_marked(&mut self, geometry: &str, local: usize, marked: bool) -> Result<(), JsValue> {
        self.mark(geometry, local, marked).map_err(to_js_error)
    }

    /// Views die sinds de vorige aanroep veranderd zijn, op naam.
    #[wasm_bindgen]
    pub fn get_geometry(&mut self) -> Result<JsValue, JsValue> {
        let diff = self.geometry_diff();
        serde_wasm_bindgen::to_value(&diff).map_err(|err| JsError::new(&err.to_string()).into())
    }

    #[wasm_bindgen]
    pub fn get_marked_vertices(&mut self) -> Result<JsValue, JsValue> {
        let marked = self
            .session
            .scene_mut()
            .map_err(to_js_error)?
            .get_marked_vertices();
        serde_wasm_bindgen::to_value(&marked).map_err(|err| JsError::new(&err.to_string()).into())
    }

    #[wasm_bindgen]
    pub fn encode_scene(&self) -> Result<String, JsValue> {
        let mut out = Vec::new();
        self.session.send_scene(&mut out).map_err(to_js_error)?;
        String::from_utf8(out).map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub fn encode_selection(&mut self) -> Result<String, JsValue> {
        let mut out = Vec::new();
        self.session.send_selection(&mut out).map_err(to_js_error)?;
        String::from_utf8(out).map_err(to_js_error)
    }

    /// Zet een gedeclareerde parameter. Waarden met een regeleinde worden geweigerd.
    #[wasm_bindgen]
    pub fn set_parameter(&mut self, key: &str, value: &str) -> Result<(), JsValue> {
        if self.session.set_parameter(key.trim(), value) {
            Ok(())
        } else {
            Err(js_error(&format!(
                "parameter `{key}` is niet gedeclareerd of de waarde bevat een regeleinde"
            )))
        }
    }

    #[wasm_bindgen]
    pub fn encode_parameters(&self) -> Result<String, JsValue> {
        let mut out = Vec::new();
        self.session.send_parameters(&mut out).map_err(to_js_error)?;
        String::from_utf8(out).map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub fn get_parameters(&self) -> Result<JsValue, JsValue> {
        let export = ParameterExport {
            parameters: self.session.parameters(),
            interactive: self.session.interactive(),
        };
        serde_wasm_bindgen::to_value(&export).map_err(|err| JsError::new(&err.to_string()).into())
    }

    /// Leegt de tekst die voor de producer klaarstaat.
    #[wasm_bindgen]
    pub fn take_outbox(&mut self) -> String {
        let bytes = std::mem::take(&mut self.outbox);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[wasm_bindgen]
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.session.last_error().map(str::to_owned)
    }

    #[wasm_bindgen]
    #[must_use]
    pub fn last_warning(&self) -> Option<String> {
        self.session.last_warning().map(str::to_owned)
    }
}

impl Viewer {
    fn apply_text(&mut self, text: &str) -> SessionResult<Applied> {
        self.session.receive_str(text)
    }

    fn mark(&mut self, geometry: &str, local: usize, marked: bool) -> SessionResult<()> {
        let scene = self.session.scene_mut()?;
        // Eerst opzoeken, zodat onbekende namen en indices worden geweigerd.
        scene.vertex_index(geometry, local)?;
        scene.payload_mut(geometry)?.set_marked(local, marked);
        Ok(())
    }

    fn view_rows(&self, coords: &[f64]) -> Result<Vec<Vec<f64>>, String> {
        let dim = self
            .session
            .scene()
            .map_or(0, |scene| scene.embedding().dim());
        split_rows(coords, if dim == 0 { DEFAULT_DIM } else { dim })
    }

    fn push_view(
        &mut self,
        payload: Box<dyn GeometryPayload>,
        index_map: &[u32],
        dynamic: bool,
    ) -> SessionResult<usize> {
        let index_map = index_map.iter().map(|&i| i as usize).collect();
        let view = GeometryView::new(payload, index_map, dynamic)?;
        Ok(self.session.scene_mut()?.add_view(view)?)
    }

    fn geometry_diff(&mut self) -> GeometryDiff {
        let mut diff = GeometryDiff::default();
        let mut next_geometry_map = BTreeMap::new();

        let views = self.session.scene().map_or(&[][..], |scene| scene.views());
        for view in views {
            let export = GeometryExport::from_view(view);
            match self.geometry_map.get(view.name()) {
                Some(existing) if *existing == export => {}
                Some(_) => diff.updated.push(export.clone()),
                None => diff.added.push(export.clone()),
            }
            next_geometry_map.insert(export.name.clone(), export);
        }

        for name in self.geometry_map.keys() {
            if !next_geometry_map.contains_key(name) {
                diff.removed.push(name.clone());
            }
        }

        self.geometry_map = next_geometry_map;
        diff
    }
}

fn split_rows(coords: &[f64], dim: usize) -> Result<Vec<Vec<f64>>, String> {
    if dim == 0 || coords.len() % dim != 0 {
        return Err(format!(
            "{} coördinaatwaarde(n) laten zich niet verdelen in punten van dimensie {dim}",
            coords.len()
        ));
    }
    Ok(coords.chunks_exact(dim).map(<[f64]>::to_vec).collect())
}

fn normalize_name(name: &str) -> String {
    name.trim().to_owned()
}

fn to_js_error<E: fmt::Display>(error: E) -> JsValue {
    js_error(&error.to_string())
}

fn js_error(message: &str) -> JsValue {
    #[cfg(target_arch = "wasm32")]
    {
        JsError::new(message).into()
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        let _ = message;
        JsValue::NULL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionError;

    fn live_viewer() -> Viewer {
        let mut viewer = Viewer::new();
        viewer
            .apply_text("n S\np 0 0 0\np 1 0 0\np 2 0 0\nx\n")
            .unwrap();
        viewer
            .push_view(
                Box::new(PointSetPayload::new("A", vec![vec![0.0; 3]; 2])),
                &[0, 1],
                true,
            )
            .unwrap();
        viewer
    }

    #[test]
    fn split_rows_checks_dimension() {
        assert_eq!(
            split_rows(&[1.0, 2.0, 3.0, 4.0], 2).unwrap(),
            vec![vec![1.0, 2.0], vec![3.0, 4.0]]
        );
        assert!(split_rows(&[1.0, 2.0, 3.0], 2).is_err());
        assert!(split_rows(&[], 0).is_err());
    }

    #[test]
    fn views_need_a_live_scene() {
        let mut viewer = Viewer::new();
        let result = viewer.push_view(
            Box::new(PointSetPayload::new("A", vec![vec![0.0; 3]])),
            &[0],
            true,
        );
        assert!(matches!(result, Err(SessionError::NotInitialized)));
    }

    #[test]
    fn geometry_diff_reports_added_then_updated() {
        let mut viewer = live_viewer();

        let diff = viewer.geometry_diff();
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].vertices[1], [1.0, 0.0, 0.0]);
        assert!(diff.updated.is_empty());

        assert!(viewer.geometry_diff().added.is_empty());

        viewer
            .session
            .move_vertex("A", 1, &[0.0, 2.0, 0.0], &mut Vec::new())
            .unwrap();
        let diff = viewer.geometry_diff();
        assert!(diff.added.is_empty());
        assert_eq!(diff.updated.len(), 1);
        assert_eq!(diff.updated[0].vertices[1], [0.0, 2.0, 0.0]);
    }

    #[test]
    fn marks_show_up_in_the_diff() {
        let mut viewer = live_viewer();
        viewer.geometry_diff();

        viewer.mark("A", 0, true).unwrap();
        let diff = viewer.geometry_diff();
        assert_eq!(diff.updated[0].marked, vec![0]);
        assert!(matches!(
            viewer.mark("A", 7, true),
            Err(SessionError::Scene(_))
        ));
    }

    #[test]
    fn echoed_moves_land_in_the_outbox() {
        let mut viewer = live_viewer();
        viewer.session.set_options(SessionOptions {
            echo_moves: true,
            ..SessionOptions::default()
        });

        viewer.move_vertex("A", 0, vec![1.0, 1.0, 1.0]).unwrap();

        assert_eq!(viewer.take_outbox(), "n S\np 1 1 1 l 0\nx\n");
        assert!(viewer.take_outbox().is_empty());
    }

    #[test]
    fn bulk_slots_feed_messages() {
        let mut viewer = Viewer::new();
        viewer.store_bulk(4, vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0], 2).unwrap();

        let applied = viewer.apply_text("n B\nP 4\nx\n").unwrap();

        assert!(applied.created_scene);
        assert_eq!(applied.points, 3);
        assert_eq!(viewer.encode_scene().unwrap(), "n B\nP 4\nx\n");
    }
}
