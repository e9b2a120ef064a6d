//! The continuous transmit loop and the flags the control thread uses to steer it

// The loop runs on its own thread and does one thing: resubmit the waveform
// until the control thread clears the transmitting flag. It only ever reads
// the flag. Submission failures come back over a channel and are reported the
// next time the control thread checks on the task.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver};
use tracing::{debug, info, warn};

use crate::{
    error::{FrontEndError, RadarError, Result},
    frontend::RadioFrontEnd,
    IqSample,
};

/// Cooperative cancellation shared between the control thread and whoever wants it stopped
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RadarError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Keeps the carrier on by resubmitting a waveform from a background thread.
///
/// Starts inactive. Dropping the task stops the loop and waits for it.
pub struct TransmitTask {
    frontend: Arc<dyn RadioFrontEnd>,
    transmitting: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    failures: Option<Receiver<FrontEndError>>,
}

impl TransmitTask {
    pub fn new(frontend: Arc<dyn RadioFrontEnd>) -> Self {
        Self {
            frontend,
            transmitting: Arc::new(AtomicBool::new(false)),
            handle: None,
            failures: None,
        }
    }

    /// True while a loop is running and has not been asked to stop
    pub fn is_active(&self) -> bool {
        self.transmitting.load(Ordering::Acquire)
            && self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Start resubmitting `waveform`. Returns as soon as the loop is spawned.
    ///
    /// Starting an active task fails with [`RadarError::AlreadyTransmitting`].
    pub fn start(&mut self, waveform: Arc<[IqSample]>) -> Result<()> {
        if self.is_active() {
            return Err(RadarError::AlreadyTransmitting);
        }
        // A previous loop may still be finishing its last submission, or have died on one
        self.stop();
        if let Err(e) = self.join() {
            warn!("Previous transmit loop ended badly - {e}");
        }

        let (failure_tx, failure_rx) = bounded(1);
        let transmitting = self.transmitting.clone();
        let frontend = self.frontend.clone();
        self.transmitting.store(true, Ordering::Release);
        let spawned = thread::Builder::new()
            .name("transmit".to_owned())
            .spawn(move || {
                let mut sent = 0usize;
                while transmitting.load(Ordering::Acquire) {
                    if let Err(e) = frontend.submit_transmit(&waveform) {
                        warn!("Transmit submission failed after {sent} buffers - {e}");
                        let _ = failure_tx.try_send(e);
                        return;
                    }
                    sent += 1;
                }
                debug!("Transmit loop exiting after {sent} buffers");
            });
        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.failures = Some(failure_rx);
                info!("Transmit started");
                Ok(())
            }
            Err(e) => {
                self.transmitting.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Ask the loop to stop after its in-flight submission. Does not wait for it.
    pub fn stop(&mut self) {
        if self.transmitting.swap(false, Ordering::AcqRel) {
            info!("Stop transmit");
        }
    }

    /// Wait for a stopped loop to exit, reporting any submission failure it hit.
    ///
    /// Joining a live loop would never return, so that fails with
    /// [`RadarError::AlreadyTransmitting`].
    pub fn join(&mut self) -> Result<()> {
        if self.is_active() {
            return Err(RadarError::AlreadyTransmitting);
        }
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| RadarError::TransmitFailed("transmit thread panicked".to_owned()))?;
        }
        self.transmitting.store(false, Ordering::Release);
        match self.failures.take().and_then(|rx| rx.try_recv().ok()) {
            Some(e) => Err(RadarError::TransmitFailed(e.to_string())),
            None => Ok(()),
        }
    }

    /// Stop and wait for full quiescence
    pub fn shutdown(&mut self) -> Result<()> {
        self.stop();
        self.join()
    }

    /// Succeeds only while the carrier is actually being driven.
    ///
    /// A loop that died on a submission error is stopped and reported as
    /// [`RadarError::TransmitFailed`].
    pub fn ensure_active(&mut self) -> Result<()> {
        let active = self.is_active();
        if let Some(Ok(e)) = self.failures.as_ref().map(|rx| rx.try_recv()) {
            self.stop();
            self.failures = None;
            let _ = self.join();
            return Err(RadarError::TransmitFailed(e.to_string()));
        }
        if !active {
            return Err(RadarError::NotTransmitting);
        }
        Ok(())
    }

    /// Switch the carrier off if `result` is a hard failure, then pass it through
    pub fn stop_on_err<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if self.handle.is_some() {
                warn!("Stopping transmit after error - {e}");
                if let Err(join_err) = self.shutdown() {
                    warn!("Transmit shutdown also failed - {join_err}");
                }
            }
        }
        result
    }
}

impl Drop for TransmitTask {
    fn drop(&mut self) {
        self.stop();
        let _ = self.join();
    }
}
