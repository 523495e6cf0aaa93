//! Transport buiten de tekstregels om voor coördinatenarrays.
//!
//! Een producer met veel punten kan `P <key>` sturen in plaats van `p`-regels.
//! De key wijst een buffer aan die zowel de producer als dit proces bereikt (in
//! de praktijk gedeeld geheugen). De scene raakt die buffer nooit direct aan; ze
//! ziet alleen de [`BulkChannel`]-capability, opgezocht via een meegegeven
//! [`BulkRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::scene::Embedding;

/// Ondoorzichtige key die met `P <key>` wordt aangekondigd.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Ord, PartialOrd)]
pub struct BulkKey(pub i64);

impl From<i64> for BulkKey {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for BulkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum BulkChannelError {
    #[error("geen bulkkanaal geregistreerd voor key {0}")]
    UnknownKey(BulkKey),
    #[error("bulkdata heeft dimensie {found}, de embedding verwacht {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("I/O op het bulkkanaal mislukt: {0}")]
    Io(#[from] std::io::Error),
    #[error("bulkkanaal weigerde het verzoek: {0}")]
    Rejected(String),
}

/// De twee operaties die een bulktransport per key biedt.
pub trait BulkChannel: fmt::Debug + Send + Sync {
    /// Vult `embedding` uit de buffer achter `key`. Een lege embedding neemt het
    /// aantal punten en de dimensie van de buffer over.
    fn read_into(&self, key: BulkKey, embedding: &mut Embedding) -> Result<(), BulkChannelError>;

    /// Schrijft elk punt van `embedding` naar de buffer achter `key`.
    fn write_from(&self, key: BulkKey, embedding: &Embedding) -> Result<(), BulkChannelError>;
}

/// Een kanaal gebonden aan één key.
#[derive(Debug, Clone)]
pub struct BulkHandle {
    key: BulkKey,
    channel: Arc<dyn BulkChannel>,
}

impl BulkHandle {
    #[must_use]
    pub fn new(key: BulkKey, channel: Arc<dyn BulkChannel>) -> Self {
        Self { key, channel }
    }

    #[must_use]
    pub fn key(&self) -> BulkKey {
        self.key
    }

    pub fn read_into(&self, embedding: &mut Embedding) -> Result<(), BulkChannelError> {
        self.channel.read_into(self.key, embedding)
    }

    pub fn write_from(&self, embedding: &Embedding) -> Result<(), BulkChannelError> {
        self.channel.write_from(self.key, embedding)
    }
}

/// Zoekt het kanaal bij een key. Keys worden buiten het protocol afgesproken,
/// dus de eigenaar registreert ze (of een vangnet-kanaal) vóór het decoderen.
#[derive(Debug, Clone, Default)]
pub struct BulkRegistry {
    channels: HashMap<BulkKey, Arc<dyn BulkChannel>>,
    fallback: Option<Arc<dyn BulkChannel>>,
}

impl BulkRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gebruikt `channel` voor elke key zonder eigen registratie.
    #[must_use]
    pub fn with_fallback(mut self, channel: Arc<dyn BulkChannel>) -> Self {
        self.fallback = Some(channel);
        self
    }

    pub fn register(&mut self, key: BulkKey, channel: Arc<dyn BulkChannel>) {
        self.channels.insert(key, channel);
    }

    #[must_use]
    pub fn contains(&self, key: BulkKey) -> bool {
        self.channels.contains_key(&key) || self.fallback.is_some()
    }

    pub fn resolve(&self, key: BulkKey) -> Result<BulkHandle, BulkChannelError> {
        self.channels
            .get(&key)
            .or(self.fallback.as_ref())
            .map(|channel| BulkHandle::new(key, Arc::clone(channel)))
            .ok_or(BulkChannelError::UnknownKey(key))
    }
}

/// Bulktransport binnen het proces: één rij-georiënteerde coördinatentabel per key.
#[derive(Debug, Default)]
pub struct MemoryBulkChannel {
    slots: Mutex<HashMap<BulkKey, Vec<Vec<f64>>>>,
}

impl MemoryBulkChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Vervangt de tabel achter `key`.
    pub fn store(&self, key: BulkKey, rows: Vec<Vec<f64>>) {
        self.slots.lock().insert(key, rows);
    }

    #[must_use]
    pub fn rows(&self, key: BulkKey) -> Option<Vec<Vec<f64>>> {
        self.slots.lock().get(&key).cloned()
    }
}

impl BulkChannel for MemoryBulkChannel {
    fn read_into(&self, key: BulkKey, embedding: &mut Embedding) -> Result<(), BulkChannelError> {
        // Copy out first: the embedding may forward writes back into this channel.
        let rows = self.rows(key).ok_or(BulkChannelError::UnknownKey(key))?;

        let dim = rows.first().map_or(embedding.dim(), Vec::len);
        if let Some(bad) = rows.iter().find(|row| row.len() != dim) {
            return Err(BulkChannelError::DimensionMismatch {
                expected: dim,
                found: bad.len(),
            });
        }
        if !rows.is_empty() && !embedding.adopt_dim(dim) {
            return Err(BulkChannelError::DimensionMismatch {
                expected: embedding.dim(),
                found: dim,
            });
        }

        embedding.grow_to(rows.len());
        for (index, row) in rows.iter().enumerate() {
            embedding.load_point_coords(index, row);
        }
        Ok(())
    }

    fn write_from(&self, key: BulkKey, embedding: &Embedding) -> Result<(), BulkChannelError> {
        let rows = embedding
            .points()
            .iter()
            .map(|point| point.coords.clone())
            .collect();
        self.store(key, rows);
        Ok(())
    }
}
