//! Adaptive rx gain calibration.
//!
//! For each (channel, frequency) the engine retunes, resets the rx gain to
//! 0 dB and then repeatedly captures, estimates the amplitude and asks its
//! [`GainSearch`] for the next gain until the amplitude lands in
//! `[target - tolerance, target + tolerance]`. Hitting a gain rail is not an
//! error: the search stops there and the rail gain is used as a best effort.

use std::sync::Arc;

use hifitime::{Duration, Unit};
use tracing::{debug, info, warn};

use crate::{
    capture::{capture, CaptureBuffer},
    complex::estimate_amplitude,
    error::Result,
    frontend::RadioFrontEnd,
    gain_table::{CalibrationEntry, GainTable},
    search::{GainSearch, Rail, RandomStepSearch, SearchStep},
    transmit::{CancelToken, TransmitTask},
    tuning::{tune, TuningConfig},
    Channel, IqSample, Role, CAPTURE_LEN, RX_GAIN_MAX,
};

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationConfig {
    /// Tx gains for channels A and B while calibrating (dB)
    pub tx_gains: [f64; 2],
    /// Target mean amplitude for channels A and B
    pub target_amplitudes: [f32; 2],
    /// Half-width of the acceptance band around each target
    pub tolerance: f32,
    /// Samples per channel in each capture
    pub capture_len: usize,
    /// Captures start this long after the device's current time
    pub capture_lead: Duration,
    pub tuning: TuningConfig,
    /// Measurements per (channel, frequency) before settling for the current gain
    pub max_iterations: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            tx_gains: [70.0, 70.0],
            target_amplitudes: [0.6, 0.6],
            tolerance: 0.03,
            capture_len: CAPTURE_LEN,
            capture_lead: Unit::Millisecond * 10.0,
            tuning: TuningConfig::default(),
            max_iterations: 500,
        }
    }
}

/// How a single gain search ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchOutcome {
    Converged,
    /// Still too quiet at the maximum rx gain
    UpperRail,
    /// Still too loud at 0 dB
    LowerRail,
    Stalled,
    IterationLimit,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GainSearchResult {
    /// Rx gain in effect when the search ended (dB)
    pub gain: f64,
    /// Amplitude measured at that gain
    pub amplitude: f32,
    /// Number of captures taken
    pub iterations: usize,
    pub outcome: SearchOutcome,
}

pub struct GainCalibrator {
    frontend: Arc<dyn RadioFrontEnd>,
    search: Box<dyn GainSearch>,
    config: CalibrationConfig,
    scratch: CaptureBuffer,
    cancel: CancelToken,
}

impl GainCalibrator {
    /// Calibrator using the randomized step search
    pub fn new(frontend: Arc<dyn RadioFrontEnd>, config: CalibrationConfig) -> Self {
        let scratch = CaptureBuffer::new(config.capture_len);
        Self {
            frontend,
            search: Box::new(RandomStepSearch::new()),
            config,
            scratch,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_search(mut self, search: impl GainSearch + 'static) -> Self {
        self.search = Box::new(search);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Find the rx gain on `channel` that brings its amplitude at `freq_hz` within
    /// `tolerance` of `target`.
    ///
    /// The carrier must already be on. Any hard failure switches it off before
    /// returning.
    pub fn find_gain(
        &mut self,
        transmit: &mut TransmitTask,
        channel: Channel,
        freq_hz: f64,
        tx_gain: f64,
        target: f32,
        tolerance: f32,
    ) -> Result<GainSearchResult> {
        transmit.ensure_active()?;
        let result = self.search_gain(transmit, channel, freq_hz, tx_gain, target, tolerance);
        transmit.stop_on_err(result)
    }

    fn search_gain(
        &mut self,
        transmit: &mut TransmitTask,
        channel: Channel,
        freq_hz: f64,
        tx_gain: f64,
        target: f32,
        tolerance: f32,
    ) -> Result<GainSearchResult> {
        let fe = self.frontend.as_ref();
        tune(fe, freq_hz, &self.config.tuning, &self.cancel)?;
        fe.set_gain(channel, Role::Tx, Role::Tx.clamp_gain(tx_gain))?;
        fe.set_gain(channel, Role::Rx, 0.0)?;
        self.search.reset();

        let mut iterations = 0usize;
        loop {
            self.cancel.check()?;
            transmit.ensure_active()?;
            capture(fe, &mut self.scratch, self.config.capture_lead)?;
            let amplitude = estimate_amplitude(self.scratch.row(channel));
            let gain = fe.gain(channel, Role::Rx)?;
            iterations += 1;

            let result = |outcome| GainSearchResult {
                gain,
                amplitude,
                iterations,
                outcome,
            };
            match self.search.next_step(gain, amplitude, target, tolerance) {
                SearchStep::Converged => {
                    info!(
                        "Frequency {} GHz, good rx{channel} gain is {gain:.2} dB (amplitude {amplitude:.3}, {iterations} captures)",
                        freq_hz / 1e9
                    );
                    return Ok(result(SearchOutcome::Converged));
                }
                SearchStep::Rail(Rail::Upper) => {
                    warn!(
                        "Frequency {} GHz can not be tuned to amplitude {target} on rx{channel}, rx gain can not exceed {RX_GAIN_MAX} dB (amplitude {amplitude:.3})",
                        freq_hz / 1e9
                    );
                    return Ok(result(SearchOutcome::UpperRail));
                }
                SearchStep::Rail(Rail::Lower) => {
                    warn!(
                        "Frequency {} GHz can not be tuned to amplitude {target} on rx{channel}, rx gain can not be less than 0 dB (amplitude {amplitude:.3})",
                        freq_hz / 1e9
                    );
                    return Ok(result(SearchOutcome::LowerRail));
                }
                SearchStep::Stalled => {
                    warn!(
                        "{} search stalled for rx{channel} at {} GHz, keeping {gain:.2} dB",
                        self.search.name(),
                        freq_hz / 1e9
                    );
                    return Ok(result(SearchOutcome::Stalled));
                }
                SearchStep::Retry(next) => {
                    if iterations >= self.config.max_iterations {
                        warn!(
                            "No convergence for rx{channel} at {} GHz after {iterations} captures, keeping {gain:.2} dB",
                            freq_hz / 1e9
                        );
                        return Ok(result(SearchOutcome::IterationLimit));
                    }
                    fe.set_gain(channel, Role::Rx, next)?;
                    debug!(
                        "Trying rx{channel} gain {next:.2} dB for {} GHz (amplitude {amplitude:.3})",
                        freq_hz / 1e9
                    );
                }
            }
        }
    }

    /// Calibrate channel A then channel B at every frequency, in order.
    ///
    /// The returned table is ready. On error no table is produced.
    pub fn build_table(&mut self, transmit: &mut TransmitTask, freqs: &[f64]) -> Result<GainTable> {
        transmit.ensure_active()?;
        let CalibrationConfig {
            tx_gains,
            target_amplitudes,
            tolerance,
            ..
        } = self.config.clone();

        let mut table = GainTable::new();
        for &freq in freqs {
            let a = self.find_gain(
                transmit,
                Channel::A,
                freq,
                tx_gains[0],
                target_amplitudes[0],
                tolerance,
            )?;
            let b = self.find_gain(
                transmit,
                Channel::B,
                freq,
                tx_gains[1],
                target_amplitudes[1],
                tolerance,
            )?;
            table.insert(freq, CalibrationEntry::new(a.gain, b.gain));
        }
        table.mark_ready();
        info!("Gain table complete with {} frequencies", table.len());
        Ok(table)
    }

    /// Switch the carrier on, build a table over `freqs`, and switch it off again
    pub fn calibrate(
        &mut self,
        transmit: &mut TransmitTask,
        waveform: Arc<[IqSample]>,
        freqs: &[f64],
    ) -> Result<GainTable> {
        let started = transmit.start(waveform);
        transmit.stop_on_err(started)?;
        let table = self.build_table(transmit, freqs);
        let stopped = transmit.shutdown();
        let table = table?;
        stopped?;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        complex::complex_sinusoid, error::FrontEndError, error::RadarError, search::BisectionSearch,
        sim::SimFrontEnd,
    };
    use hifitime::Epoch;

    fn waveform() -> Arc<[IqSample]> {
        complex_sinusoid(1000, 0.7).into()
    }

    fn test_config() -> CalibrationConfig {
        CalibrationConfig {
            capture_len: 200,
            capture_lead: Unit::Millisecond * 0.0,
            ..Default::default()
        }
    }

    fn linear_front_end() -> Arc<SimFrontEnd> {
        Arc::new(
            SimFrontEnd::default()
                .with_model(|_, _, rx_gain, _| 0.01 * (1.0 + rx_gain as f32))
                .unpaced(),
        )
    }

    fn calibrator(fe: Arc<SimFrontEnd>, seed: u64) -> GainCalibrator {
        GainCalibrator::new(fe, test_config()).with_search(RandomStepSearch::seeded(seed))
    }

    #[test]
    fn test_requires_transmit() {
        let fe = linear_front_end();
        let mut transmit = TransmitTask::new(fe.clone());
        let mut cal = calibrator(fe.clone(), 1);
        let err = cal
            .find_gain(&mut transmit, Channel::A, 1e9, 70.0, 0.6, 0.03)
            .unwrap_err();
        assert!(matches!(err, RadarError::NotTransmitting));
        assert!(matches!(
            cal.build_table(&mut transmit, &[1e9]),
            Err(RadarError::NotTransmitting)
        ));
        assert_eq!(fe.capture_count(), 0);
    }

    #[test]
    fn test_converges_into_band() {
        let fe = linear_front_end();
        let mut transmit = TransmitTask::new(fe.clone());
        transmit.start(waveform()).unwrap();
        for (seed, target) in [0.2f32, 0.35, 0.5, 0.6, 0.7].into_iter().enumerate() {
            for tolerance in [0.03f32, 0.05] {
                let mut cal = calibrator(fe.clone(), seed as u64);
                let found = cal
                    .find_gain(&mut transmit, Channel::B, 1e9, 70.0, target, tolerance)
                    .unwrap();
                assert_eq!(found.outcome, SearchOutcome::Converged);
                assert!((0.0..=RX_GAIN_MAX).contains(&found.gain));
                let model = 0.01 * (1.0 + found.gain as f32);
                assert!((model - target).abs() <= tolerance + 1e-4, "{model} {target}");
                assert!((found.amplitude - model).abs() < 1e-4);
            }
        }
        transmit.shutdown().unwrap();
    }

    #[test]
    fn test_resets_gain_and_sets_tx() {
        let fe = linear_front_end();
        fe.set_gain(Channel::A, Role::Rx, 60.0).unwrap();
        let mut transmit = TransmitTask::new(fe.clone());
        transmit.start(waveform()).unwrap();
        let mut cal = calibrator(fe.clone(), 2);
        // Amplitude at 0 dB is already in band, so the reset gain is the answer
        let found = cal
            .find_gain(&mut transmit, Channel::A, 2e9, 55.0, 0.01, 0.005)
            .unwrap();
        assert_eq!(found.gain, 0.0);
        assert_eq!(found.iterations, 1);
        assert_eq!(fe.gain(Channel::A, Role::Tx).unwrap(), 55.0);
        assert_eq!(fe.center_frequency(Channel::B, Role::Tx).unwrap(), 2e9);
        transmit.shutdown().unwrap();
    }

    #[test]
    fn test_unreachable_target_stops_at_upper_rail() {
        let fe = linear_front_end();
        let mut transmit = TransmitTask::new(fe.clone());
        transmit.start(waveform()).unwrap();
        let mut cal = calibrator(fe.clone(), 3);
        // 0.01 * 77 = 0.77 is the loudest this model gets
        let found = cal
            .find_gain(&mut transmit, Channel::A, 1e9, 70.0, 0.9, 0.03)
            .unwrap();
        assert_eq!(found.outcome, SearchOutcome::UpperRail);
        assert_eq!(found.gain, RX_GAIN_MAX);
        // Soft failure, the carrier stays on
        assert!(transmit.is_active());
        transmit.shutdown().unwrap();
    }

    #[test]
    fn test_too_loud_stops_at_lower_rail() {
        let fe = Arc::new(SimFrontEnd::default().with_model(|_, _, _, _| 0.95).unpaced());
        let mut transmit = TransmitTask::new(fe.clone());
        transmit.start(waveform()).unwrap();
        let mut cal = calibrator(fe.clone(), 4);
        let found = cal
            .find_gain(&mut transmit, Channel::B, 1e9, 70.0, 0.6, 0.03)
            .unwrap();
        assert_eq!(found.outcome, SearchOutcome::LowerRail);
        assert_eq!(found.gain, 0.0);
        transmit.shutdown().unwrap();
    }

    #[test]
    fn test_iteration_limit() {
        let fe = linear_front_end();
        let mut transmit = TransmitTask::new(fe.clone());
        transmit.start(waveform()).unwrap();
        let mut cal = GainCalibrator::new(
            fe.clone(),
            CalibrationConfig {
                max_iterations: 3,
                ..test_config()
            },
        )
        .with_search(RandomStepSearch::seeded(5));
        let found = cal
            .find_gain(&mut transmit, Channel::A, 1e9, 70.0, 0.7, 0.03)
            .unwrap();
        assert_eq!(found.outcome, SearchOutcome::IterationLimit);
        assert_eq!(found.iterations, 3);
        assert!(found.gain < RX_GAIN_MAX);
        assert_eq!(fe.capture_count(), 3);
        transmit.shutdown().unwrap();
    }

    #[test]
    fn test_bisection_strategy() {
        let fe = linear_front_end();
        let mut transmit = TransmitTask::new(fe.clone());
        transmit.start(waveform()).unwrap();
        let mut cal =
            GainCalibrator::new(fe.clone(), test_config()).with_search(BisectionSearch::default());
        let found = cal
            .find_gain(&mut transmit, Channel::A, 1e9, 70.0, 0.45, 0.01)
            .unwrap();
        assert_eq!(found.outcome, SearchOutcome::Converged);
        assert!((0.01 * (1.0 + found.gain as f32) - 0.45).abs() <= 0.0101);
        transmit.shutdown().unwrap();
    }

    #[test]
    fn test_lock_timeout_switches_carrier_off() {
        let fe = Arc::new(SimFrontEnd::default().never_locks().unpaced());
        let mut transmit = TransmitTask::new(fe.clone());
        transmit.start(waveform()).unwrap();
        let mut cal = GainCalibrator::new(
            fe.clone(),
            CalibrationConfig {
                tuning: TuningConfig {
                    lock_timeout: std::time::Duration::from_millis(10),
                    poll_interval: std::time::Duration::from_millis(1),
                },
                ..test_config()
            },
        );
        let err = cal
            .find_gain(&mut transmit, Channel::A, 1e9, 70.0, 0.6, 0.03)
            .unwrap_err();
        assert!(matches!(err, RadarError::LoLockTimeout { .. }));
        assert!(!transmit.is_active());
        assert_eq!(fe.capture_count(), 0);
    }

    #[test]
    fn test_cancel_switches_carrier_off() {
        let fe = linear_front_end();
        let mut transmit = TransmitTask::new(fe.clone());
        transmit.start(waveform()).unwrap();
        let cancel = CancelToken::new();
        let mut cal = calibrator(fe.clone(), 6).with_cancel(cancel.clone());
        cancel.cancel();
        let err = cal.build_table(&mut transmit, &[1e9, 5e8]).unwrap_err();
        assert!(matches!(err, RadarError::Cancelled));
        assert!(!transmit.is_active());
    }

    #[test]
    fn test_calibrate_refuses_running_transmit() {
        let fe = linear_front_end();
        let mut transmit = TransmitTask::new(fe.clone());
        transmit.start(waveform()).unwrap();
        let mut cal = calibrator(fe.clone(), 9);
        let err = cal.calibrate(&mut transmit, waveform(), &[1e9]).unwrap_err();
        assert!(matches!(err, RadarError::AlreadyTransmitting));
        assert_eq!(fe.capture_count(), 0);
        assert!(!transmit.is_active());
    }

    #[test]
    fn test_build_table_scenario() {
        // amplitude = k / (1 + gain) with k in band at 0 dB, so every search
        // accepts the reset gain on its first capture
        let fe = Arc::new(
            SimFrontEnd::default()
                .with_model(|_, _, rx_gain, _| 0.6 / (1.0 + rx_gain as f32))
                .unpaced(),
        );
        let mut transmit = TransmitTask::new(fe.clone());
        let mut cal = calibrator(fe.clone(), 7);
        let table = cal.calibrate(&mut transmit, waveform(), &[1e9, 5e8]).unwrap();
        assert!(table.is_ready());
        assert_eq!(table.frequencies().collect::<Vec<_>>(), vec![1e9, 5e8]);
        for (_, entry) in table.iter() {
            for channel in Channel::ALL {
                assert_eq!(entry.rx_gain(channel), 0.0);
            }
        }
        assert_eq!(fe.capture_count(), 4);
        assert!(!transmit.is_active());
    }

    #[test]
    fn test_build_table_per_channel_targets() {
        let fe = linear_front_end();
        let mut transmit = TransmitTask::new(fe.clone());
        let mut cal = GainCalibrator::new(
            fe.clone(),
            CalibrationConfig {
                target_amplitudes: [0.3, 0.6],
                ..test_config()
            },
        )
        .with_search(RandomStepSearch::seeded(8));
        let table = cal
            .calibrate(&mut transmit, waveform(), &[5e8, 1e9, 1.5e9])
            .unwrap();
        assert_eq!(table.len(), 3);
        for (_, entry) in table.iter() {
            assert!((0.01 * (1.0 + entry.rx_gain_a as f32) - 0.3).abs() <= 0.0301);
            assert!((0.01 * (1.0 + entry.rx_gain_b as f32) - 0.6).abs() <= 0.0301);
        }
    }

    /// Refuses to tune to one frequency
    struct DeadBand {
        inner: SimFrontEnd,
        dead_freq: f64,
    }

    impl RadioFrontEnd for DeadBand {
        fn name(&self) -> String {
            self.inner.name()
        }
        fn set_center_frequency(
            &self,
            channel: Channel,
            role: Role,
            freq_hz: f64,
        ) -> std::result::Result<(), FrontEndError> {
            if freq_hz == self.dead_freq {
                return Err(FrontEndError::Hardware("synthesizer fault".to_owned()));
            }
            self.inner.set_center_frequency(channel, role, freq_hz)
        }
        fn set_gain(&self, c: Channel, r: Role, g: f64) -> std::result::Result<(), FrontEndError> {
            self.inner.set_gain(c, r, g)
        }
        fn gain(&self, c: Channel, r: Role) -> std::result::Result<f64, FrontEndError> {
            self.inner.gain(c, r)
        }
        fn is_lo_locked(&self, c: Channel, r: Role) -> std::result::Result<bool, FrontEndError> {
            self.inner.is_lo_locked(c, r)
        }
        fn submit_transmit(&self, b: &[IqSample]) -> std::result::Result<(), FrontEndError> {
            self.inner.submit_transmit(b)
        }
        fn capture_into(
            &self,
            b: &mut CaptureBuffer,
            n: usize,
            start: Epoch,
        ) -> std::result::Result<(), FrontEndError> {
            self.inner.capture_into(b, n, start)
        }
        fn device_time_now(&self) -> std::result::Result<Epoch, FrontEndError> {
            self.inner.device_time_now()
        }
        fn set_device_time(&self, t: Epoch) -> std::result::Result<(), FrontEndError> {
            self.inner.set_device_time(t)
        }
    }

    #[test]
    fn test_partial_failure_produces_no_table() {
        let fe = Arc::new(DeadBand {
            inner: SimFrontEnd::default()
                .with_model(|_, _, rx_gain, _| 0.01 * (1.0 + rx_gain as f32))
                .unpaced(),
            dead_freq: 5e8,
        });
        let mut transmit = TransmitTask::new(fe.clone());
        let mut cal = GainCalibrator::new(fe.clone(), test_config())
            .with_search(RandomStepSearch::seeded(9));
        let err = cal
            .calibrate(&mut transmit, waveform(), &[1e9, 5e8, 3e9])
            .unwrap_err();
        assert!(matches!(err, RadarError::FrontEnd(FrontEndError::Hardware(_))));
        assert!(!transmit.is_active());
    }
}
