//! Simulated two-channel front end.
//!
//! Stands in for hardware in tests and in the binary. The receive amplitude of
//! each channel comes from an amplitude model of (channel, frequency, rx gain,
//! tx gain), and LOs report lock a fixed delay after each tune request.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex, MutexGuard,
};
use std::time::{Duration, Instant};

use hifitime::{Epoch, Unit};

use crate::{
    capture::CaptureBuffer, error::FrontEndError, frontend::FrontEndConfig, frontend::RadioFrontEnd,
    Channel, IqSample, Role, LENGTH_ONE_PERIOD,
};

/// Receive amplitude as a function of (channel, frequency Hz, rx gain dB, tx gain dB)
pub type AmplitudeModel = dyn Fn(Channel, f64, f64, f64) -> f32 + Send + Sync;

/// A lossy path: 0.05 at 70 dB tx and 0 dB rx gain near DC, losing 8 dB per GHz,
/// clipped at ADC full scale
pub fn default_amplitude_model(_channel: Channel, freq_hz: f64, rx_gain: f64, tx_gain: f64) -> f32 {
    let db = rx_gain + tx_gain - 70.0 - 8.0 * freq_hz / 1e9;
    (0.05 * 10f64.powf(db / 20.0)).min(1.0) as f32
}

#[derive(Clone, Copy, Debug)]
struct Chain {
    freq: f64,
    gain: f64,
    locked_at: Instant,
}

#[derive(Debug)]
struct SimState {
    // [channel][role]
    chains: [[Chain; 2]; 2],
    time_base: (Epoch, Instant),
}

fn role_index(role: Role) -> usize {
    match role {
        Role::Tx => 0,
        Role::Rx => 1,
    }
}

pub struct SimFrontEnd {
    config: FrontEndConfig,
    model: Box<AmplitudeModel>,
    state: Mutex<SimState>,
    lock_delay: Duration,
    never_locks: bool,
    paced: bool,
    fail_transmit_after: Option<usize>,
    captures: AtomicUsize,
    submissions: AtomicUsize,
    tunes: AtomicUsize,
}

impl Default for SimFrontEnd {
    fn default() -> Self {
        Self::new(FrontEndConfig::default())
    }
}

impl SimFrontEnd {
    pub fn new(config: FrontEndConfig) -> Self {
        let now = Instant::now();
        let chain = |channel: Channel, role: Role| {
            let gain = match role {
                Role::Tx => config.tx_gains[channel.index()],
                Role::Rx => config.rx_gains[channel.index()],
            };
            Chain {
                freq: 0.0,
                gain: role.clamp_gain(gain),
                locked_at: now,
            }
        };
        let chains = [
            [chain(Channel::A, Role::Tx), chain(Channel::A, Role::Rx)],
            [chain(Channel::B, Role::Tx), chain(Channel::B, Role::Rx)],
        ];
        Self {
            config,
            model: Box::new(default_amplitude_model),
            state: Mutex::new(SimState {
                chains,
                time_base: (Epoch::from_tai_seconds(0.0), now),
            }),
            lock_delay: Duration::from_micros(200),
            never_locks: false,
            paced: true,
            fail_transmit_after: None,
            captures: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
            tunes: AtomicUsize::new(0),
        }
    }

    pub fn with_model<F>(mut self, model: F) -> Self
    where
        F: Fn(Channel, f64, f64, f64) -> f32 + Send + Sync + 'static,
    {
        self.model = Box::new(model);
        self
    }

    pub fn with_lock_delay(mut self, delay: Duration) -> Self {
        self.lock_delay = delay;
        self
    }

    /// LOs never report lock
    pub fn never_locks(mut self) -> Self {
        self.never_locks = true;
        self
    }

    /// Return captures immediately instead of waiting out the capture window
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    /// Fail every transmit submission after the first `n`
    pub fn fail_transmit_after(mut self, n: usize) -> Self {
        self.fail_transmit_after = Some(n);
        self
    }

    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::Acquire)
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::Acquire)
    }

    pub fn tune_count(&self) -> usize {
        self.tunes.load(Ordering::Acquire)
    }

    pub fn center_frequency(&self, channel: Channel, role: Role) -> Result<f64, FrontEndError> {
        Ok(self.state()?.chains[channel.index()][role_index(role)].freq)
    }

    fn state(&self) -> Result<MutexGuard<'_, SimState>, FrontEndError> {
        self.state
            .lock()
            .map_err(|_| FrontEndError::Hardware("simulator state poisoned".to_owned()))
    }

    fn samples_duration(&self, n: usize) -> Duration {
        Duration::from_secs_f64(n as f64 / self.config.sample_rate)
    }
}

impl RadioFrontEnd for SimFrontEnd {
    fn name(&self) -> String {
        format!("simulated 2x2 front end ({} MS/s)", self.config.sample_rate / 1e6)
    }

    fn set_center_frequency(
        &self,
        channel: Channel,
        role: Role,
        freq_hz: f64,
    ) -> Result<(), FrontEndError> {
        let mut state = self.state()?;
        let chain = &mut state.chains[channel.index()][role_index(role)];
        chain.freq = freq_hz;
        chain.locked_at = Instant::now() + self.lock_delay;
        self.tunes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn set_gain(&self, channel: Channel, role: Role, gain_db: f64) -> Result<(), FrontEndError> {
        if !gain_db.is_finite() {
            return Err(FrontEndError::Hardware(format!("{role} gain {gain_db} is not finite")));
        }
        let mut state = self.state()?;
        state.chains[channel.index()][role_index(role)].gain = role.clamp_gain(gain_db);
        Ok(())
    }

    fn gain(&self, channel: Channel, role: Role) -> Result<f64, FrontEndError> {
        Ok(self.state()?.chains[channel.index()][role_index(role)].gain)
    }

    fn is_lo_locked(&self, channel: Channel, role: Role) -> Result<bool, FrontEndError> {
        if self.never_locks {
            return Ok(false);
        }
        let state = self.state()?;
        Ok(Instant::now() >= state.chains[channel.index()][role_index(role)].locked_at)
    }

    fn submit_transmit(&self, buffer: &[IqSample]) -> Result<(), FrontEndError> {
        let sent = self.submissions.fetch_add(1, Ordering::AcqRel);
        if let Some(limit) = self.fail_transmit_after {
            if sent >= limit {
                return Err(FrontEndError::Hardware("tx underflow".to_owned()));
            }
        }
        // The DAC drains the buffer at the sample rate
        std::thread::sleep(self.samples_duration(buffer.len()));
        Ok(())
    }

    fn capture_into(
        &self,
        buffer: &mut CaptureBuffer,
        num_samples: usize,
        start: Epoch,
    ) -> Result<(), FrontEndError> {
        if num_samples > buffer.len() {
            return Err(FrontEndError::CaptureTooLong {
                requested: num_samples,
                capacity: buffer.len(),
            });
        }
        let (chains, now) = {
            let state = self.state()?;
            let elapsed = state.time_base.1.elapsed().as_secs_f64();
            (state.chains, state.time_base.0 + Unit::Second * elapsed)
        };
        if self.paced {
            let wait = (start - now).to_seconds().max(0.0);
            std::thread::sleep(Duration::from_secs_f64(wait) + self.samples_duration(num_samples));
        }
        for channel in Channel::ALL {
            let tx = chains[channel.index()][role_index(Role::Tx)];
            let rx = chains[channel.index()][role_index(Role::Rx)];
            let amplitude = (self.model)(channel, rx.freq, rx.gain, tx.gain);
            // The receive mixer model rotates the opposite way to the transmit one
            for (n, sample) in buffer.row_mut(channel)[..num_samples].iter_mut().enumerate() {
                let phase = -2.0 * std::f64::consts::PI * (n % LENGTH_ONE_PERIOD) as f64
                    / LENGTH_ONE_PERIOD as f64;
                *sample = IqSample::from_polar(amplitude, phase as f32);
            }
        }
        self.captures.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn device_time_now(&self) -> Result<Epoch, FrontEndError> {
        let state = self.state()?;
        let elapsed = state.time_base.1.elapsed().as_secs_f64();
        Ok(state.time_base.0 + Unit::Second * elapsed)
    }

    fn set_device_time(&self, time: Epoch) -> Result<(), FrontEndError> {
        self.state()?.time_base = (time, Instant::now());
        Ok(())
    }
}
