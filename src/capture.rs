//! This module contains the capture logic

// Captures land in a scratch buffer owned by whoever is capturing. It is
// overwritten on every call, so anything that has to outlive the next
// capture must be copied out with `clone`.

use hifitime::Duration;

use crate::{
    complex::{conjugate_in_place, IqSample},
    error::Result,
    frontend::RadioFrontEnd,
    Channel,
};

/// Two rows of samples, one per channel
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureBuffer {
    rows: [Vec<IqSample>; 2],
}

impl CaptureBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            rows: [vec![IqSample::default(); len], vec![IqSample::default(); len]],
        }
    }

    /// Samples per channel
    pub fn len(&self) -> usize {
        self.rows[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, channel: Channel) -> &[IqSample] {
        &self.rows[channel.index()]
    }

    pub fn row_mut(&mut self, channel: Channel) -> &mut [IqSample] {
        &mut self.rows[channel.index()]
    }

    /// Conjugate every sample of both rows
    pub fn conjugate(&mut self) {
        for row in self.rows.iter_mut() {
            conjugate_in_place(row);
        }
    }
}

/// Fill `buffer` with a capture scheduled `lead` after the device's current time
pub fn capture(frontend: &dyn RadioFrontEnd, buffer: &mut CaptureBuffer, lead: Duration) -> Result<()> {
    let start = frontend.device_time_now()? + lead;
    let n = buffer.len();
    frontend.capture_into(buffer, n, start)?;
    Ok(())
}
