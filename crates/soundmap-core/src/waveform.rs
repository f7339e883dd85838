use std::{
    collections::{BTreeMap, HashMap},
    f64::consts::TAU,
    fmt,
    sync::Arc,
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::{control_points::ControlPoints, interpolator::InterpolationError};

pub const DEFAULT_WAVEFORM: &str = "sine";

#[derive(Debug, Error)]
pub enum WaveformError {
    #[error("unknown waveform: {0}")]
    Unknown(WaveformId),
    #[error("waveform {0} is built in and cannot be changed")]
    BuiltIn(WaveformId),
    #[error("waveform id already registered: {0}")]
    Duplicate(WaveformId),
    #[error("custom waveform needs at least one control point")]
    EmptyControlPoints,
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error(transparent)]
    Interpolation(#[from] InterpolationError),
}

/// Stable identifier of a waveform in a [`WaveformBank`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaveformId(String);

impl WaveformId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WaveformId {
    fn default() -> Self {
        Self::new(DEFAULT_WAVEFORM)
    }
}

impl fmt::Display for WaveformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WaveformId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One period sampled at `sample_rate` points. Immutable once built; shared
/// between every note rendering at that rate.
pub struct Wavetable {
    id: WaveformId,
    sample_rate: u32,
    samples: Box<[f32]>,
    fingerprint: [u8; 32],
}

impl Wavetable {
    #[must_use]
    pub fn new(id: WaveformId, sample_rate: u32, samples: Vec<f32>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(id.as_str().as_bytes());
        hasher.update(sample_rate.to_le_bytes());
        for sample in &samples {
            hasher.update(sample.to_le_bytes());
        }
        Self {
            id,
            sample_rate,
            samples: samples.into_boxed_slice(),
            fingerprint: hasher.finalize().into(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &WaveformId {
        &self.id
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// SHA-256 over the id, rate and sample data.
    #[must_use]
    pub fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    #[must_use]
    pub fn lookup(&self, time: f64, frequency: f64) -> f64 {
        let len = self.samples.len() as u64;
        if len == 0 {
            return 0.0;
        }
        let position = (time * f64::from(self.sample_rate) * frequency) as u64;
        f64::from(self.samples[(position % len) as usize])
    }
}

impl fmt::Debug for Wavetable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wavetable")
            .field("id", &self.id)
            .field("sample_rate", &self.sample_rate)
            .field("len", &self.samples.len())
            .finish_non_exhaustive()
    }
}

/// A waveform resolved for rendering.
#[derive(Debug, Clone)]
pub enum Waveform {
    Sine,
    Table(Arc<Wavetable>),
}

impl Waveform {
    /// Amplitude at `time` seconds into the note for a tone of `frequency`
    /// Hz.
    #[must_use]
    pub fn value(&self, time: f64, frequency: f64) -> f64 {
        match self {
            Self::Sine => (TAU * time * frequency).sin(),
            Self::Table(table) => table.lookup(time, frequency),
        }
    }

    #[must_use]
    pub fn table(&self) -> Option<&Arc<Wavetable>> {
        match self {
            Self::Sine => None,
            Self::Table(table) => Some(table),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferedShape {
    Sine,
    Triangle,
    Square,
    SawRising,
    SawFalling,
}

impl BufferedShape {
    #[must_use]
    pub fn synthesize(self, sample_rate: u32) -> Vec<f32> {
        let rate = sample_rate as usize;
        let last = rate.saturating_sub(1).max(1) as f64;
        match self {
            Self::Sine => (0..rate)
                .map(|i| (TAU * i as f64 / last).sin() as f32)
                .collect(),
            Self::Triangle => {
                let quarter = (rate / 4).max(1);
                (0..rate)
                    .map(|i| {
                        let ramp = (i % quarter) as f64 / quarter as f64;
                        let value = match i / quarter {
                            0 => ramp,
                            1 => 1.0 - ramp,
                            2 => -ramp,
                            _ => -1.0 + (i - 3 * quarter) as f64 / quarter as f64,
                        };
                        value as f32
                    })
                    .collect()
            }
            Self::Square => {
                let half = rate / 2;
                (0..rate)
                    .map(|i| if i < half { 1.0 } else { -1.0 })
                    .collect()
            }
            Self::SawRising => (0..rate).map(|i| (i as f64 / last) as f32).collect(),
            Self::SawFalling => (0..rate).map(|i| (1.0 - i as f64 / last) as f32).collect(),
        }
    }
}

#[derive(Debug, Clone)]
enum WaveformFactory {
    Sine,
    Buffered(BufferedShape),
    Custom(ControlPoints),
}

impl WaveformFactory {
    fn synthesize(&self, sample_rate: u32) -> Result<Vec<f32>, WaveformError> {
        match self {
            Self::Sine => Ok(Vec::new()),
            Self::Buffered(shape) => Ok(shape.synthesize(sample_rate)),
            Self::Custom(points) => {
                if points.is_empty() {
                    return Err(WaveformError::EmptyControlPoints);
                }
                let resampled = points.resample(0.0, 1.0, -1.0, 1.0, sample_rate as usize)?;
                Ok(resampled.into_iter().map(|point| point.y as f32).collect())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaveformInfo {
    pub id: WaveformId,
    pub built_in: bool,
    pub buffered: bool,
}

/// Published tables keyed by (waveform, sample rate).
#[derive(Debug, Default)]
pub struct WavetableCache {
    tables: RwLock<HashMap<(WaveformId, u32), Arc<Wavetable>>>,
}

impl WavetableCache {
    #[must_use]
    pub fn get(&self, id: &WaveformId, sample_rate: u32) -> Option<Arc<Wavetable>> {
        self.tables.read().get(&(id.clone(), sample_rate)).cloned()
    }

    /// Replaces whatever table was published for the key. Readers holding
    /// the previous `Arc` keep using it until they drop it.
    pub fn publish(&self, table: Arc<Wavetable>) {
        let key = (table.id().clone(), table.sample_rate());
        self.tables.write().insert(key, table);
    }

    #[must_use]
    pub fn sample_rates_for(&self, id: &WaveformId) -> Vec<u32> {
        self.tables
            .read()
            .keys()
            .filter(|(key_id, _)| key_id == id)
            .map(|(_, rate)| *rate)
            .collect()
    }

    pub fn evict(&self, id: &WaveformId) {
        self.tables.write().retain(|(key_id, _), _| key_id != id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }

    pub fn clear(&self) {
        self.tables.write().clear();
    }
}

/// Registry of the waveforms a session can render, from a stable id to the
/// factory that builds its table, plus the cache of built tables.
#[derive(Debug)]
pub struct WaveformBank {
    factories: RwLock<BTreeMap<WaveformId, WaveformFactory>>,
    cache: WavetableCache,
}

impl Default for WaveformBank {
    fn default() -> Self {
        Self::new()
    }
}

impl WaveformBank {
    #[must_use]
    pub fn new() -> Self {
        let mut factories = BTreeMap::new();
        factories.insert(WaveformId::new(DEFAULT_WAVEFORM), WaveformFactory::Sine);
        for (id, shape) in Self::buffered_builtins() {
            factories.insert(WaveformId::new(id), WaveformFactory::Buffered(shape));
        }
        Self {
            factories: RwLock::new(factories),
            cache: WavetableCache::default(),
        }
    }

    fn buffered_builtins() -> [(&'static str, BufferedShape); 5] {
        [
            ("bsine", BufferedShape::Sine),
            ("triangle", BufferedShape::Triangle),
            ("square", BufferedShape::Square),
            ("saw_rising", BufferedShape::SawRising),
            ("saw_falling", BufferedShape::SawFalling),
        ]
    }

    #[must_use]
    pub fn contains(&self, id: &WaveformId) -> bool {
        self.factories.read().contains_key(id)
    }

    #[must_use]
    pub fn list(&self) -> Vec<WaveformInfo> {
        self.factories
            .read()
            .iter()
            .map(|(id, factory)| WaveformInfo {
                id: id.clone(),
                built_in: !matches!(factory, WaveformFactory::Custom(_)),
                buffered: !matches!(factory, WaveformFactory::Sine),
            })
            .collect()
    }

    #[must_use]
    pub fn cache(&self) -> &WavetableCache {
        &self.cache
    }

    /// Resolves `id` at `sample_rate`, building and publishing the table on
    /// first use. Unknown ids resolve to the default waveform.
    pub fn resolve(&self, id: &WaveformId, sample_rate: u32) -> Result<Waveform, WaveformError> {
        if sample_rate == 0 {
            return Err(WaveformError::InvalidSampleRate);
        }

        let factory = {
            let factories = self.factories.read();
            match factories.get(id) {
                Some(factory) => factory.clone(),
                None => {
                    debug!(waveform = %id, "unknown waveform, using default");
                    return Ok(Waveform::Sine);
                }
            }
        };

        if matches!(factory, WaveformFactory::Sine) {
            return Ok(Waveform::Sine);
        }

        if let Some(table) = self.cache.get(id, sample_rate) {
            return Ok(Waveform::Table(table));
        }

        let table = Arc::new(Wavetable::new(
            id.clone(),
            sample_rate,
            factory.synthesize(sample_rate)?,
        ));
        self.cache.publish(Arc::clone(&table));
        debug!(waveform = %id, sample_rate, "wavetable built");
        Ok(Waveform::Table(table))
    }

    #[instrument(skip(self, points), fields(waveform = %id))]
    pub fn register_custom(
        &self,
        id: WaveformId,
        points: ControlPoints,
    ) -> Result<WaveformId, WaveformError> {
        if points.is_empty() {
            return Err(WaveformError::EmptyControlPoints);
        }
        let mut factories = self.factories.write();
        if factories.contains_key(&id) {
            return Err(WaveformError::Duplicate(id));
        }
        factories.insert(id.clone(), WaveformFactory::Custom(points));
        info!("custom waveform registered");
        Ok(id)
    }

    /// Replaces the control points of a custom waveform and republishes a
    /// fresh table for every sample rate already cached for it.
    #[instrument(skip(self, points), fields(waveform = %id))]
    pub fn edit_custom(&self, id: &WaveformId, points: ControlPoints) -> Result<(), WaveformError> {
        if points.is_empty() {
            return Err(WaveformError::EmptyControlPoints);
        }

        let factory = WaveformFactory::Custom(points);
        let rebuilt = self
            .cache
            .sample_rates_for(id)
            .into_iter()
            .map(|rate| {
                factory
                    .synthesize(rate)
                    .map(|samples| Arc::new(Wavetable::new(id.clone(), rate, samples)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        {
            let mut factories = self.factories.write();
            match factories.get_mut(id) {
                Some(slot @ WaveformFactory::Custom(_)) => *slot = factory,
                Some(_) => return Err(WaveformError::BuiltIn(id.clone())),
                None => return Err(WaveformError::Unknown(id.clone())),
            }
        }

        let republished = rebuilt.len();
        for table in rebuilt {
            self.cache.publish(table);
        }
        info!(republished, "custom waveform edited");
        Ok(())
    }

    #[instrument(skip(self), fields(waveform = %id))]
    pub fn remove_custom(&self, id: &WaveformId) -> Result<(), WaveformError> {
        {
            let mut factories = self.factories.write();
            match factories.get(id) {
                Some(WaveformFactory::Custom(_)) => {
                    factories.remove(id);
                }
                Some(_) => return Err(WaveformError::BuiltIn(id.clone())),
                None => return Err(WaveformError::Unknown(id.clone())),
            }
        }
        self.cache.evict(id);
        info!("custom waveform removed");
        Ok(())
    }

    #[must_use]
    pub fn control_points(&self, id: &WaveformId) -> Option<ControlPoints> {
        match self.factories.read().get(id) {
            Some(WaveformFactory::Custom(points)) => Some(points.clone()),
            _ => None,
        }
    }
}
