//! Argument parsing for running from the command line

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sfcw_sounder::{frequency_range, TX_GAIN_MAX};

/// Carrier frequencies surveyed when none are given (Hz)
pub const DEFAULT_FREQS: [f64; 6] = [1e9, 500e6, 1.5e9, 3e9, 5e9, 6e9];

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
    /// Comma-separated carrier frequencies in Hz, in sweep order
    #[clap(long, value_delimiter = ',', conflicts_with = "start")]
    pub freqs: Vec<f64>,
    /// First frequency of an evenly spaced sweep (Hz)
    #[clap(long, requires_all = &["stop", "step"])]
    pub start: Option<f64>,
    /// End of the sweep, exclusive (Hz)
    #[clap(long)]
    pub stop: Option<f64>,
    /// Spacing of the sweep (Hz)
    #[clap(long)]
    pub step: Option<f64>,
    /// Channel A transmit gain (dB)
    #[clap(long, default_value_t = 70.0, value_parser = valid_tx_gain)]
    pub tx_gain_a: f64,
    /// Channel B transmit gain (dB)
    #[clap(long, default_value_t = 70.0, value_parser = valid_tx_gain)]
    pub tx_gain_b: f64,
    /// Directory holding gain tables
    #[clap(long, default_value = "gain_tables")]
    pub table_dir: PathBuf,
    /// Give up waiting for LO lock after this many milliseconds
    #[clap(long, default_value_t = 2000)]
    pub lock_timeout_ms: u64,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Find rx gains that hit the target amplitudes and save them as a gain table
    Calibrate {
        /// Name of the gain table to write (overwritten if it exists)
        #[clap(short, long)]
        table: String,
        /// Target mean rx amplitude on channel A
        #[clap(long, default_value_t = 0.6, value_parser = valid_amplitude)]
        target_a: f32,
        /// Target mean rx amplitude on channel B
        #[clap(long, default_value_t = 0.6, value_parser = valid_amplitude)]
        target_b: f32,
        /// Accept amplitudes within this distance of the target
        #[clap(long, default_value_t = 0.03, value_parser = valid_amplitude)]
        tolerance: f32,
        /// Seed the gain search for a reproducible run
        #[clap(long)]
        seed: Option<u64>,
        /// Use bisection instead of the randomized step search
        #[clap(long)]
        bisect: bool,
    },
    /// Run a survey with a saved gain table
    Survey {
        /// Name of the gain table to load
        #[clap(short, long)]
        table: String,
        /// Directory to write the survey into
        #[clap(short, long, default_value = ".")]
        output: PathBuf,
    },
}

impl Args {
    /// The sweep frequencies: the explicit list, else the range, else the defaults
    pub fn frequencies(&self) -> Vec<f64> {
        if !self.freqs.is_empty() {
            return self.freqs.clone();
        }
        match (self.start, self.stop, self.step) {
            (Some(start), Some(stop), Some(step)) => frequency_range(start, stop, step),
            _ => DEFAULT_FREQS.to_vec(),
        }
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn valid_tx_gain(s: &str) -> Result<f64, String> {
    let gain: f64 = s.parse().map_err(|_| format!("Invalid gain {s}"))?;
    if (0.0..=TX_GAIN_MAX).contains(&gain) {
        Ok(gain)
    } else {
        Err(format!("Tx gain must be within 0 to {TX_GAIN_MAX} dB"))
    }
}

fn valid_amplitude(s: &str) -> Result<f32, String> {
    let amp: f32 = s.parse().map_err(|_| format!("Invalid amplitude {s}"))?;
    if amp > 0.0 && amp <= 1.0 {
        Ok(amp)
    } else {
        Err("Amplitude must be within (0, 1]".to_string())
    }
}
