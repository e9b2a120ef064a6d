//! LO tuning: request a frequency on every chain, then wait for lock

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::{
    error::{RadarError, Result},
    frontend::RadioFrontEnd,
    transmit::CancelToken,
    Channel, Role,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuningConfig {
    /// Give up on lock after this long
    pub lock_timeout: Duration,
    /// Sleep between lock sensor reads
    pub poll_interval: Duration,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// Tune rx and tx on both channels to `freq_hz` and block until all four LOs report lock.
///
/// Fails with [`RadarError::LoLockTimeout`] naming the first chain still unlocked at the
/// deadline, or [`RadarError::Cancelled`] if `cancel` trips while waiting.
pub fn tune(
    frontend: &dyn RadioFrontEnd,
    freq_hz: f64,
    config: &TuningConfig,
    cancel: &CancelToken,
) -> Result<()> {
    for channel in Channel::ALL {
        frontend.set_center_frequency(channel, Role::Rx, freq_hz)?;
        frontend.set_center_frequency(channel, Role::Tx, freq_hz)?;
    }
    let start = Instant::now();
    let deadline = start + config.lock_timeout;
    loop {
        match first_unlocked(frontend)? {
            None => {
                debug!("LOs locked at {} GHz after {:?}", freq_hz / 1e9, start.elapsed());
                return Ok(());
            }
            Some((channel, role)) => {
                cancel.check()?;
                if Instant::now() >= deadline {
                    return Err(RadarError::LoLockTimeout {
                        channel,
                        role,
                        freq: freq_hz,
                        timeout: config.lock_timeout,
                    });
                }
                trace!("Waiting on {role}{channel} LO lock");
                std::thread::sleep(config.poll_interval);
            }
        }
    }
}

fn first_unlocked(frontend: &dyn RadioFrontEnd) -> Result<Option<(Channel, Role)>> {
    for channel in Channel::ALL {
        for role in [Role::Rx, Role::Tx] {
            if !frontend.is_lo_locked(channel, role)? {
                return Ok(Some((channel, role)));
            }
        }
    }
    Ok(None)
}
