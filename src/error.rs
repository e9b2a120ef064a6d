//! Error types for the front end and the radar core

use std::time::Duration;

use thiserror::Error;

use crate::{Channel, Role};

/// Errors reported by a front end driver
#[derive(Error, Debug, Clone)]
pub enum FrontEndError {
    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Capture buffer holds {capacity} samples per channel, {requested} requested")]
    CaptureTooLong { requested: usize, capacity: usize },
}

/// Result type for radar operations
pub type Result<T> = std::result::Result<T, RadarError>;

/// Errors that can occur while calibrating or surveying
#[derive(Error, Debug)]
pub enum RadarError {
    /// An operation that needs the carrier was called while nothing is transmitting
    #[error("Front end is not transmitting")]
    NotTransmitting,

    #[error("Transmit task is already running")]
    AlreadyTransmitting,

    #[error("Gain table is not ready, calibrate or load one first")]
    GainTableNotReady,

    #[error("Gain table has no entry for {0} Hz")]
    MissingFrequency(f64),

    #[error("Corrupt gain table: {0}")]
    CorruptGainTable(String),

    #[error("{role}{channel} LO did not lock at {freq} Hz within {timeout:?}")]
    LoLockTimeout {
        channel: Channel,
        role: Role,
        freq: f64,
        timeout: Duration,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transmit loop failed: {0}")]
    TransmitFailed(String),

    #[error("Front end error: {0}")]
    FrontEnd(#[from] FrontEndError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
