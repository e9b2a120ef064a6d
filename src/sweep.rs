//! The stepped-frequency survey.
//!
//! With the carrier on, each step applies the calibrated rx gains for its
//! frequency, retunes, captures, conjugates, and keeps a copy of the capture.

use std::sync::Arc;

use hifitime::{Duration, Unit};
use tracing::{debug, info};

use crate::{
    capture::{capture, CaptureBuffer},
    error::{RadarError, Result},
    frontend::RadioFrontEnd,
    gain_table::{GainTable, GainTableStore},
    transmit::{CancelToken, TransmitTask},
    tuning::{tune, TuningConfig},
    Channel, IqSample, Role, CAPTURE_LEN,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    /// Samples per channel in each capture
    pub capture_len: usize,
    /// Captures start this long after the device's current time
    pub capture_lead: Duration,
    pub tuning: TuningConfig,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            capture_len: CAPTURE_LEN,
            capture_lead: Unit::Millisecond * 10.0,
            tuning: TuningConfig::default(),
        }
    }
}

/// One survey step: the carrier frequency and the corrected capture taken there
#[derive(Clone, Debug, PartialEq)]
pub struct SurveyStep {
    pub freq_hz: f64,
    pub capture: CaptureBuffer,
}

/// All steps of one survey, in the order the frequencies were given
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SurveyRecord {
    steps: Vec<SurveyStep>,
}

impl SurveyRecord {
    pub fn steps(&self) -> &[SurveyStep] {
        &self.steps
    }

    pub fn frequencies(&self) -> Vec<f64> {
        self.steps.iter().map(|s| s.freq_hz).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Samples per channel in each step, zero for an empty record
    pub fn capture_len(&self) -> usize {
        self.steps.first().map_or(0, |s| s.capture.len())
    }
}

impl From<Vec<SurveyStep>> for SurveyRecord {
    fn from(steps: Vec<SurveyStep>) -> Self {
        Self { steps }
    }
}

pub struct SweepController {
    frontend: Arc<dyn RadioFrontEnd>,
    table: GainTable,
    config: SweepConfig,
    scratch: CaptureBuffer,
    cancel: CancelToken,
}

impl SweepController {
    pub fn new(frontend: Arc<dyn RadioFrontEnd>, table: GainTable, config: SweepConfig) -> Self {
        let scratch = CaptureBuffer::new(config.capture_len);
        Self {
            frontend,
            table,
            config,
            scratch,
            cancel: CancelToken::new(),
        }
    }

    /// Sweep with the table stored under `name`
    pub fn from_store(
        frontend: Arc<dyn RadioFrontEnd>,
        store: &dyn GainTableStore,
        name: &str,
        config: SweepConfig,
    ) -> Result<Self> {
        Ok(Self::new(frontend, store.load(name)?, config))
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the survey over `freqs` in the given order.
    ///
    /// Fails before touching the hardware if the gain table is not ready
    /// ([`RadarError::GainTableNotReady`]) or lacks one of the frequencies
    /// ([`RadarError::MissingFrequency`]). The carrier is off again when this
    /// returns, whether it succeeded or not. The frequency list is handed back
    /// alongside the record for consumers that store them separately.
    pub fn run_sweep(
        &mut self,
        transmit: &mut TransmitTask,
        waveform: Arc<[IqSample]>,
        freqs: &[f64],
        tx_gain_a: f64,
        tx_gain_b: f64,
    ) -> Result<(SurveyRecord, Vec<f64>)> {
        self.table.check_covers(freqs)?;

        let fe = self.frontend.as_ref();
        fe.set_gain(Channel::A, Role::Tx, Role::Tx.clamp_gain(tx_gain_a))?;
        fe.set_gain(Channel::B, Role::Tx, Role::Tx.clamp_gain(tx_gain_b))?;
        let started = transmit.start(waveform);
        transmit.stop_on_err(started)?;

        let record = self.sweep_steps(transmit, freqs);
        let record = transmit.stop_on_err(record)?;
        transmit.shutdown()?;
        info!("Survey complete, {} steps", record.len());
        Ok((record, freqs.to_vec()))
    }

    fn sweep_steps(&mut self, transmit: &mut TransmitTask, freqs: &[f64]) -> Result<SurveyRecord> {
        let fe = self.frontend.as_ref();
        let mut steps = Vec::with_capacity(freqs.len());
        for &freq in freqs {
            self.cancel.check()?;
            transmit.ensure_active()?;
            let entry = self
                .table
                .get(freq)
                .ok_or(RadarError::MissingFrequency(freq))?;
            for channel in Channel::ALL {
                fe.set_gain(channel, Role::Rx, entry.rx_gain(channel))?;
            }
            tune(fe, freq, &self.config.tuning, &self.cancel)?;
            capture(fe, &mut self.scratch, self.config.capture_lead)?;
            self.scratch.conjugate();
            steps.push(SurveyStep {
                freq_hz: freq,
                capture: self.scratch.clone(),
            });
            debug!(
                "Captured {} GHz with rx gains {:?}",
                freq / 1e9,
                entry.rx_gains()
            );
        }
        Ok(SurveyRecord { steps })
    }
}
