pub mod calibration;
pub mod capture;
pub mod complex;
pub mod error;
pub mod exfil;
pub mod frontend;
pub mod gain_table;
pub mod search;
pub mod sim;
pub mod sweep;
pub mod transmit;
pub mod tuning;

use serde::{Deserialize, Serialize};

pub use calibration::{CalibrationConfig, GainCalibrator};
pub use complex::IqSample;
pub use error::{FrontEndError, RadarError, Result};
pub use frontend::{FrontEndConfig, RadioFrontEnd};
pub use gain_table::{CalibrationEntry, GainTable, GainTableStore, JsonGainTableStore};
pub use sweep::{SurveyRecord, SweepConfig, SweepController};
pub use transmit::{CancelToken, TransmitTask};

/// Upper bound of the receive gain stage (dB)
pub const RX_GAIN_MAX: f64 = 76.0;
/// Upper bound of the transmit gain stage (dB)
pub const TX_GAIN_MAX: f64 = 89.8;
/// Samples in one period of the baseband waveform
pub const LENGTH_ONE_PERIOD: usize = 1000;
/// Capture this many waveform periods per buffer so the estimate averages over several cycles
pub const CAPTURE_PERIODS: usize = 10;
/// Default number of samples per channel in a capture
pub const CAPTURE_LEN: usize = CAPTURE_PERIODS * LENGTH_ONE_PERIOD;

/// One of the two RF channels of the front end
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Channel {
    A,
    B,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::A, Channel::B];

    /// Row of this channel in a capture buffer (and its driver channel number)
    pub fn index(self) -> usize {
        match self {
            Channel::A => 0,
            Channel::B => 1,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::A => write!(f, "A"),
            Channel::B => write!(f, "B"),
        }
    }
}

/// Direction of a chain on one channel
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Role {
    Tx,
    Rx,
}

impl Role {
    /// Largest gain the chain accepts
    pub fn max_gain(self) -> f64 {
        match self {
            Role::Tx => TX_GAIN_MAX,
            Role::Rx => RX_GAIN_MAX,
        }
    }

    /// Clamp a requested gain into the chain's range
    pub fn clamp_gain(self, gain_db: f64) -> f64 {
        gain_db.clamp(0.0, self.max_gain())
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Tx => write!(f, "tx"),
            Role::Rx => write!(f, "rx"),
        }
    }
}

/// Build `[start, stop)` in `step` increments, like the usual `arange`.
/// Non-finite bounds or steps give an empty range.
pub fn frequency_range(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let finite = start.is_finite() && stop.is_finite() && step.is_finite();
    if !finite || step <= 0.0 || stop <= start {
        return Vec::new();
    }
    let n = ((stop - start) / step).ceil() as usize;
    (0..n).map(|i| start + i as f64 * step).collect()
}
