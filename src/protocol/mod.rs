//! Regelgebaseerd tekstprotocol tussen de viewer en het producerende proces.
//!
//! Een bericht is een reeks getagde regels, afgesloten met een regel met tag `x`:
//!
//! ```text
//! n <name>                  naam van het doel
//! p <f0> <f1> .. [l <label>] één punt, optioneel met label
//! P <key>                   punten komen uit bulkkanaal <key>
//! f <i0> <i1> ..            facet (lijst met vertex-indices)
//! s <key> <value>           gedeclareerde parameter
//! i <key> <value>           gedeclareerde interactieve parameter
//! e <message>               laatste fout
//! w <message>               laatste waarschuwing
//! x                         einde van het bericht
//! ```
//!
//! Bevat een bericht zowel `p`-regels als een `P`-regel, dan wint het bulkkanaal
//! en vervallen de `p`-regels. Onbekende tags en niet-gedeclareerde parameters
//! worden genegeerd, zodat producers velden kunnen toevoegen zonder lezers te breken.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::num::{ParseFloatError, ParseIntError};

use thiserror::Error;

use crate::bulk::{BulkChannelError, BulkKey, BulkRegistry};
use crate::scene::{Embedding, Point, SceneError};

mod decode;
mod encode;

pub(crate) use encode::is_single_line;

/// Result type voor het coderen en decoderen van berichten.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Fouten die kunnen optreden op het protocolkanaal.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("kanaal gesloten na {lines_read} regel(s) zonder afsluitende `x`")]
    ChannelClosed { lines_read: usize },
    #[error("kanaal loopt vast tijdens het wachten op de producer")]
    ChannelStalled,
    #[error("I/O-fout op het protocolkanaal: {0}")]
    Io(#[source] io::Error),
    #[error("regel {line}: ongeldig getal: {source}")]
    InvalidNumber {
        line: usize,
        #[source]
        source: ParseFloatError,
    },
    #[error("regel {line}: ongeldige indexwaarde: {source}")]
    InvalidIndex {
        line: usize,
        #[source]
        source: ParseIntError,
    },
    #[error("regel {line}: punt heeft {found} coördinaten, eerdere punten hebben er {expected}")]
    RaggedPoint {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("regel {line}: `{tag}` mist een argument")]
    MissingArgument { line: usize, tag: char },
    #[error("tekst voor `{tag}` bevat een regeleinde")]
    LineBreak { tag: char },
    #[error(transparent)]
    Bulk(#[from] BulkChannelError),
    #[error(transparent)]
    Scene(#[from] SceneError),
}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::ChannelStalled,
            _ => Self::Io(err),
        }
    }
}

/// Regeltags van het protocol.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Tag {
    Name,
    Point,
    Bulk,
    Facet,
    Parameter,
    Interactive,
    Error,
    Warning,
    End,
}

impl Tag {
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Name => 'n',
            Self::Point => 'p',
            Self::Bulk => 'P',
            Self::Facet => 'f',
            Self::Parameter => 's',
            Self::Interactive => 'i',
            Self::Error => 'e',
            Self::Warning => 'w',
            Self::End => 'x',
        }
    }

    #[must_use]
    pub const fn from_char(ch: char) -> Option<Self> {
        Some(match ch {
            'n' => Self::Name,
            'p' => Self::Point,
            'P' => Self::Bulk,
            'f' => Self::Facet,
            's' => Self::Parameter,
            'i' => Self::Interactive,
            'e' => Self::Error,
            'w' => Self::Warning,
            'x' => Self::End,
            _ => return None,
        })
    }
}

/// Waar de punten van een bericht staan.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PointData {
    #[default]
    None,
    Inline(Vec<Point>),
    Bulk(BulkKey),
}

/// Eén gedecodeerd (of nog te coderen) bericht.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub name: Option<String>,
    pub points: PointData,
    pub facets: Vec<Vec<usize>>,
    pub parameters: BTreeMap<String, String>,
    pub interactive: BTreeMap<String, String>,
    pub error: Option<String>,
    pub warning: Option<String>,
}

impl Message {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_points(mut self, points: Vec<Point>) -> Self {
        self.points = PointData::Inline(points);
        self
    }

    #[must_use]
    pub fn with_bulk(mut self, key: BulkKey) -> Self {
        self.points = PointData::Bulk(key);
        self
    }

    #[must_use]
    pub fn with_facet(mut self, facet: Vec<usize>) -> Self {
        self.facets.push(facet);
        self
    }

    #[must_use]
    pub fn has_points(&self) -> bool {
        !matches!(self.points, PointData::None)
    }

    /// Zet de punten van het bericht om naar een embedding voor
    /// [`Scene::update`](crate::scene::Scene::update).
    ///
    /// Bulkpunten worden gelezen via het kanaal dat `registry` bij de key vindt;
    /// de teruggegeven embedding blijft aan dat kanaal gekoppeld.
    pub fn to_embedding(&self, registry: &BulkRegistry) -> ProtocolResult<Option<Embedding>> {
        let name = self.name.clone().unwrap_or_default();
        match &self.points {
            PointData::None => Ok(None),
            PointData::Inline(points) => Ok(Some(Embedding::from_points(name, points.clone())?)),
            PointData::Bulk(key) => {
                let handle = registry.resolve(*key)?;
                let mut embedding = Embedding::new(name, 0);
                handle.read_into(&mut embedding)?;
                embedding.attach_bulk(handle);
                Ok(Some(embedding))
            }
        }
    }
}

/// Encoder/decoder met de parameternamen die de applicatie accepteert.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    parameters: BTreeSet<String>,
    interactive: BTreeSet<String>,
}

impl Codec {
    pub fn new<I, S>(parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parameters: parameters.into_iter().map(Into::into).collect(),
            interactive: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_interactive<I, S>(mut self, interactive: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interactive
            .extend(interactive.into_iter().map(Into::into));
        self
    }

    pub fn declare_parameter(&mut self, name: impl Into<String>) {
        self.parameters.insert(name.into());
    }

    pub fn declare_interactive(&mut self, name: impl Into<String>) {
        self.interactive.insert(name.into());
    }

    #[must_use]
    pub fn accepts_parameter(&self, name: &str) -> bool {
        self.parameters.contains(name)
    }

    #[must_use]
    pub fn accepts_interactive(&self, name: &str) -> bool {
        self.interactive.contains(name)
    }
}
