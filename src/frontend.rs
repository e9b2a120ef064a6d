//! The narrow interface the radar core consumes from a two-channel front end.
//!
//! The transmit loop only ever calls [`RadioFrontEnd::submit_transmit`], the
//! control thread only calls the tune, gain and capture methods. Drivers must
//! allow those two sets to run concurrently from different threads, which is
//! why every method takes `&self`.

use hifitime::Epoch;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{capture::CaptureBuffer, error::FrontEndError, Channel, IqSample, Role};

pub trait RadioFrontEnd: Send + Sync {
    /// Human readable device description
    fn name(&self) -> String;

    /// Issue a tune request to one chain. Returns before the LO has locked.
    fn set_center_frequency(
        &self,
        channel: Channel,
        role: Role,
        freq_hz: f64,
    ) -> Result<(), FrontEndError>;

    fn set_gain(&self, channel: Channel, role: Role, gain_db: f64) -> Result<(), FrontEndError>;

    /// The gain actually applied, which may differ from what was requested
    fn gain(&self, channel: Channel, role: Role) -> Result<f64, FrontEndError>;

    fn is_lo_locked(&self, channel: Channel, role: Role) -> Result<bool, FrontEndError>;

    /// Send one buffer to both tx channels, blocking until the hardware accepted it
    fn submit_transmit(&self, buffer: &[IqSample]) -> Result<(), FrontEndError>;

    /// Fill the first `num_samples` of each row of `buffer`, starting at device time `start`.
    /// Blocks until every sample has arrived.
    fn capture_into(
        &self,
        buffer: &mut CaptureBuffer,
        num_samples: usize,
        start: Epoch,
    ) -> Result<(), FrontEndError>;

    fn device_time_now(&self) -> Result<Epoch, FrontEndError>;

    fn set_device_time(&self, time: Epoch) -> Result<(), FrontEndError>;

    /// Reset the device clock to zero
    fn init_device_time(&self) -> Result<(), FrontEndError> {
        self.set_device_time(Epoch::from_tai_seconds(0.0))
    }

    /// Set tx and rx gains on both channels, indexed by [`Channel::index`]
    fn set_gains(&self, tx_gains: [f64; 2], rx_gains: [f64; 2]) -> Result<(), FrontEndError> {
        for channel in Channel::ALL {
            self.set_gain(channel, Role::Rx, rx_gains[channel.index()])?;
            self.set_gain(channel, Role::Tx, tx_gains[channel.index()])?;
        }
        Ok(())
    }
}

/// Everything needed to bring up a front end, specified once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontEndConfig {
    /// ADC/DAC sample rate of the baseband signal (Hz)
    pub sample_rate: f64,
    /// Reference clock for the converters and FPGA, must exceed the sample rate (Hz)
    pub master_clock_rate: f64,
    /// RF transmit filter bandwidth (Hz)
    pub tx_bandwidth: f64,
    /// RF receive filter bandwidth (Hz)
    pub rx_bandwidth: f64,
    /// Initial tx gains for channels A and B (dB)
    pub tx_gains: [f64; 2],
    /// Initial rx gains for channels A and B (dB)
    pub rx_gains: [f64; 2],
    /// Daughterboard subdevice selection
    pub subdevice: String,
    /// Frequency reference source
    pub clock_source: String,
}

impl Default for FrontEndConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1e6,
            master_clock_rate: 16e6,
            tx_bandwidth: 0.2e6,
            rx_bandwidth: 0.2e6,
            tx_gains: [0.0, 0.0],
            rx_gains: [0.0, 0.0],
            subdevice: "A:A A:B".to_owned(),
            clock_source: "internal".to_owned(),
        }
    }
}

impl FrontEndConfig {
    pub fn validate(&self) -> Result<(), FrontEndError> {
        if self.sample_rate <= 0.0 || self.master_clock_rate <= self.sample_rate {
            return Err(FrontEndError::Hardware(format!(
                "master clock rate {} must exceed sample rate {}",
                self.master_clock_rate, self.sample_rate
            )));
        }
        for (role, gains) in [(Role::Tx, self.tx_gains), (Role::Rx, self.rx_gains)] {
            for gain in gains {
                if !(0.0..=role.max_gain()).contains(&gain) {
                    return Err(FrontEndError::Hardware(format!(
                        "initial {role} gain {gain} dB outside [0, {}]",
                        role.max_gain()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn log_summary(&self) {
        info!(
            "Front end: {} MS/s, master clock {} MHz, subdev \"{}\", clock {}",
            self.sample_rate / 1e6,
            self.master_clock_rate / 1e6,
            self.subdevice,
            self.clock_source
        );
        info!(
            "TX bandwidth {} MHz, RX bandwidth {} MHz",
            self.tx_bandwidth / 1e6,
            self.rx_bandwidth / 1e6
        );
    }
}
