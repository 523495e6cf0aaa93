//! Eigenaar van één scene en het bijbehorende protocolkanaal.
//!
//! Elke mutatie van een scene loopt via de sessie, die door één taak (de lezer
//! van het kanaal) wordt vastgehouden. Hier wordt niets gelockt; wie een sessie
//! tussen threads deelt, zet de hele sessie achter één mutex.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bulk::BulkRegistry;
use crate::protocol::{Codec, Message, ProtocolError, is_single_line};
use crate::scene::{Embedding, IndexKind, Point, Scene, SceneError};

/// Result type voor sessie-operaties.
pub type SessionResult<T> = Result<T, SessionError>;

/// Fouten die een sessie kan teruggeven.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("er is nog geen scene ontvangen")]
    NotInitialized,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Scene(#[from] SceneError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Wordt als `clear_tags` doorgegeven aan elke [`Scene::update`] vanuit een bericht.
    pub clear_tags_on_update: bool,
    /// Stuur een verplaatste vertex terug naar de producer na [`Session::move_vertex`].
    pub echo_moves: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Er is nog geen bericht met punten binnengekomen.
    Uninitialized,
    Live,
}

/// Wat één inkomend bericht heeft veranderd.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Applied {
    pub created_scene: bool,
    pub points: usize,
    pub facets: usize,
    pub parameters: usize,
}

#[derive(Debug)]
pub struct Session {
    codec: Codec,
    registry: BulkRegistry,
    options: SessionOptions,
    scene: Option<Scene>,
    parameters: BTreeMap<String, String>,
    interactive: BTreeMap<String, String>,
    facets: Vec<Vec<usize>>,
    last_error: Option<String>,
    last_warning: Option<String>,
}

impl Session {
    #[must_use]
    pub fn new(codec: Codec, registry: BulkRegistry) -> Self {
        Self {
            codec,
            registry,
            options: SessionOptions::default(),
            scene: None,
            parameters: BTreeMap::new(),
            interactive: BTreeMap::new(),
            facets: Vec::new(),
            last_error: None,
            last_warning: None,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn set_options(&mut self, options: SessionOptions) {
        self.options = options;
    }

    #[must_use]
    pub fn options(&self) -> SessionOptions {
        self.options
    }

    #[must_use]
    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut Codec {
        &mut self.codec
    }

    pub fn registry_mut(&mut self) -> &mut BulkRegistry {
        &mut self.registry
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.scene.is_some() {
            SessionState::Live
        } else {
            SessionState::Uninitialized
        }
    }

    #[must_use]
    pub fn scene(&self) -> Option<&Scene> {
        self.scene.as_ref()
    }

    pub fn scene_mut(&mut self) -> SessionResult<&mut Scene> {
        self.scene.as_mut().ok_or(SessionError::NotInitialized)
    }

    /// Onafhankelijke kopie van de live scene, losgekoppeld van elk bulkkanaal.
    #[must_use]
    pub fn snapshot(&self) -> Option<Scene> {
        self.scene.clone()
    }

    #[must_use]
    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    #[must_use]
    pub fn interactive(&self) -> &BTreeMap<String, String> {
        &self.interactive
    }

    /// Facets van het laatste bericht dat er had.
    #[must_use]
    pub fn facets(&self) -> &[Vec<usize>] {
        &self.facets
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub fn last_warning(&self) -> Option<&str> {
        self.last_warning.as_deref()
    }

    /// Slaat een parameterwaarde lokaal op. Niet-gedeclareerde namen en waarden
    /// met een regeleinde worden geweigerd.
    pub fn set_parameter(&mut self, key: &str, value: impl Into<String>) -> bool {
        let value = value.into();
        if !self.codec.accepts_parameter(key) || !is_single_line(&value) {
            return false;
        }
        self.parameters.insert(key.to_owned(), value);
        true
    }

    /// Leest één bericht uit `reader` en past het toe.
    pub fn receive<R: BufRead>(&mut self, reader: &mut R) -> SessionResult<Applied> {
        let message = self.codec.read_message(reader)?;
        self.apply(message)
    }

    pub fn receive_str(&mut self, text: &str) -> SessionResult<Applied> {
        self.receive(&mut text.as_bytes())
    }

    /// Past een gedecodeerd bericht toe. Het eerste bericht met punten maakt de
    /// scene aan; latere berichten worden erin samengevoegd.
    pub fn apply(&mut self, message: Message) -> SessionResult<Applied> {
        let mut applied = Applied::default();

        if let Some(incoming) = message.to_embedding(&self.registry)? {
            applied.points = incoming.len();
            let clear_tags = self.options.clear_tags_on_update;
            match self.scene.as_mut() {
                Some(scene) => scene.update(&incoming, clear_tags)?,
                None => {
                    let mut scene = Scene::new(
                        incoming.name(),
                        Embedding::new(incoming.name(), incoming.dim()),
                        Vec::new(),
                    )?;
                    scene.update(&incoming, clear_tags)?;
                    log::debug!(
                        "scene `{}` is live with {} point(s)",
                        scene.name(),
                        scene.embedding().len()
                    );
                    self.scene = Some(scene);
                    applied.created_scene = true;
                }
            }
        } else if let Some(name) = message.name.as_deref() {
            log::debug!("message `{name}` carries no points");
        }

        if !message.facets.is_empty() {
            applied.facets = message.facets.len();
            self.facets = message.facets;
        }
        applied.parameters = message.parameters.len() + message.interactive.len();
        self.parameters.extend(message.parameters);
        self.interactive.extend(message.interactive);

        if let Some(error) = message.error {
            log::error!("producer reported: {error}");
            self.last_error = Some(error);
        }
        if let Some(warning) = message.warning {
            log::warn!("producer warned: {warning}");
            self.last_warning = Some(warning);
        }
        Ok(applied)
    }

    /// Verplaatst een vertex van de live scene. Met `echo_moves` gaat de nieuwe
    /// positie als bericht met één punt naar `echo`.
    pub fn move_vertex<W: Write>(
        &mut self,
        geometry: &str,
        local: usize,
        coords: &[f64],
        echo: &mut W,
    ) -> SessionResult<usize> {
        let index = self.scene_mut()?.move_vertex(geometry, local, coords)?;
        if self.options.echo_moves {
            self.send_vertex(echo, index)?;
        }
        Ok(index)
    }

    pub fn send_scene<W: Write>(&self, writer: &mut W) -> SessionResult<()> {
        let scene = self.scene.as_ref().ok_or(SessionError::NotInitialized)?;
        self.codec.write_scene(writer, scene)?;
        Ok(())
    }

    /// Stuurt één embedding-punt, gelabeld met zijn index zodat de producer het
    /// op label kan samenvoegen.
    pub fn send_vertex<W: Write>(&self, writer: &mut W, index: usize) -> SessionResult<()> {
        let scene = self.scene.as_ref().ok_or(SessionError::NotInitialized)?;
        let embedding = scene.embedding();
        let coords = embedding.coords(index).ok_or(SceneError::IndexOutOfRange {
            what: IndexKind::Embedding,
            index,
            len: embedding.len(),
        })?;

        let message = Message::new()
            .with_name(scene.name())
            .with_points(vec![Point::labeled(coords.to_vec(), index.to_string())]);
        self.codec.write_message(writer, &message)?;
        Ok(())
    }

    /// Stuurt de huidige selectie als één `f`-regel en geeft die terug.
    pub fn send_selection<W: Write>(&mut self, writer: &mut W) -> SessionResult<Vec<usize>> {
        let scene = self.scene.as_mut().ok_or(SessionError::NotInitialized)?;
        let marked = scene.collect_marked_vertices();
        let message = Message::new()
            .with_name(scene.name())
            .with_facet(marked.clone());
        self.codec.write_message(writer, &message)?;
        Ok(marked)
    }

    pub fn send_parameters<W: Write>(&self, writer: &mut W) -> SessionResult<()> {
        let message = Message {
            parameters: self.parameters.clone(),
            interactive: self.interactive.clone(),
            ..Message::default()
        };
        self.codec.write_message(writer, &message)?;
        Ok(())
    }
}
