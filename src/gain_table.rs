//! Per-frequency calibrated rx gains and their persistence

use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{RadarError, Result},
    Channel, RX_GAIN_MAX,
};

/// Calibrated rx gains (dB) for one frequency
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub rx_gain_a: f64,
    pub rx_gain_b: f64,
}

impl CalibrationEntry {
    pub fn new(rx_gain_a: f64, rx_gain_b: f64) -> Self {
        Self {
            rx_gain_a,
            rx_gain_b,
        }
    }

    pub fn rx_gain(&self, channel: Channel) -> f64 {
        match channel {
            Channel::A => self.rx_gain_a,
            Channel::B => self.rx_gain_b,
        }
    }

    /// Gains indexed by [`Channel::index`]
    pub fn rx_gains(&self) -> [f64; 2] {
        [self.rx_gain_a, self.rx_gain_b]
    }
}

/// Frequency → [`CalibrationEntry`], in calibration order.
///
/// Only the calibration engine and [`GainTableStore::load`] produce a ready
/// table, and a table is never ready part way through calibration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GainTable {
    entries: Vec<(f64, CalibrationEntry)>,
    ready: bool,
}

impl GainTable {
    /// An empty table, not ready
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `freq_hz`. Replacing keeps the original position.
    pub(crate) fn insert(&mut self, freq_hz: f64, entry: CalibrationEntry) {
        match self.entries.iter_mut().find(|(f, _)| *f == freq_hz) {
            Some((_, existing)) => *existing = entry,
            None => self.entries.push((freq_hz, entry)),
        }
    }

    pub(crate) fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn get(&self, freq_hz: f64) -> Option<&CalibrationEntry> {
        self.entries
            .iter()
            .find(|(f, _)| *f == freq_hz)
            .map(|(_, e)| e)
    }

    pub fn contains(&self, freq_hz: f64) -> bool {
        self.get(freq_hz).is_some()
    }

    pub fn frequencies(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|(f, _)| *f)
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &CalibrationEntry)> + '_ {
        self.entries.iter().map(|(f, e)| (*f, e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A sweep over `freqs` may only run if this succeeds
    pub fn check_covers(&self, freqs: &[f64]) -> Result<()> {
        if !self.ready {
            return Err(RadarError::GainTableNotReady);
        }
        match freqs.iter().find(|f| !self.contains(**f)) {
            Some(f) => Err(RadarError::MissingFrequency(*f)),
            None => Ok(()),
        }
    }
}

/// Where calibrated tables live between the calibration and survey runs
pub trait GainTableStore {
    /// Persist `table` under `name`, replacing any table already stored there
    fn save(&self, table: &GainTable, name: &str) -> Result<()>;

    /// Read back a table. A structurally invalid table fails with
    /// [`RadarError::CorruptGainTable`]. A loaded table is ready.
    fn load(&self, name: &str) -> Result<GainTable>;
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredEntry {
    freq_hz: f64,
    rx_gain_a: f64,
    rx_gain_b: f64,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredTable {
    entries: Vec<StoredEntry>,
}

impl StoredTable {
    fn into_table(self) -> Result<GainTable> {
        let mut table = GainTable::new();
        for e in self.entries {
            if !(e.freq_hz.is_finite() && e.freq_hz > 0.0) {
                return Err(RadarError::CorruptGainTable(format!(
                    "invalid frequency {}",
                    e.freq_hz
                )));
            }
            for gain in [e.rx_gain_a, e.rx_gain_b] {
                if !(0.0..=RX_GAIN_MAX).contains(&gain) {
                    return Err(RadarError::CorruptGainTable(format!(
                        "rx gain {gain} dB at {} Hz outside [0, {RX_GAIN_MAX}]",
                        e.freq_hz
                    )));
                }
            }
            if table.contains(e.freq_hz) {
                return Err(RadarError::CorruptGainTable(format!(
                    "duplicate frequency {}",
                    e.freq_hz
                )));
            }
            table.insert(e.freq_hz, CalibrationEntry::new(e.rx_gain_a, e.rx_gain_b));
        }
        table.mark_ready();
        Ok(table)
    }
}

/// One pretty-printed JSON file per table, `<dir>/<name>.json`
pub struct JsonGainTableStore {
    dir: PathBuf,
}

impl JsonGainTableStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

impl GainTableStore for JsonGainTableStore {
    fn save(&self, table: &GainTable, name: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let stored = StoredTable {
            entries: table
                .iter()
                .map(|(freq_hz, e)| StoredEntry {
                    freq_hz,
                    rx_gain_a: e.rx_gain_a,
                    rx_gain_b: e.rx_gain_b,
                })
                .collect(),
        };
        let path = self.path(name);
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &stored)
            .map_err(std::io::Error::from)?;
        info!("Gain table is saved into {}", path.display());
        Ok(())
    }

    fn load(&self, name: &str) -> Result<GainTable> {
        let path = self.path(name);
        let file = File::open(&path)?;
        let stored: StoredTable = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| RadarError::CorruptGainTable(format!("{}: {e}", path.display())))?;
        let table = stored.into_table()?;
        info!(
            "Loaded {} gain table entries from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }
}
