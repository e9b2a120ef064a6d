//! This module is responsible for exfilling survey data to disk.
//!
//! A survey is written as two files sharing a timestamped stem:
//! `<stem>.c64` holds the raw samples as native-endian interleaved `f32`
//! re/im pairs, step by step, channel A row then channel B row.
//! `<stem>.json` describes the layout and lists the frequencies in step order.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use byte_slice_cast::AsByteSlice;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{error::Result, sweep::SurveyRecord, Channel, IqSample};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyMeta {
    pub utc_start: String,
    pub sample_rate: f64,
    /// Samples per channel per step
    pub capture_len: usize,
    pub channels: usize,
    pub frequencies: Vec<f64>,
    pub endianness: String,
}

/// Convert a chrono DateTime into the timestamp used in survey file names
fn survey_timestamp(time: &DateTime<Utc>) -> String {
    format!(
        "{}-{:02}-{:02}-{:02}:{:02}:{:02}",
        time.year(),
        time.month(),
        time.day(),
        time.hour(),
        time.minute(),
        time.second()
    )
}

fn interleave(row: &[IqSample], out: &mut Vec<f32>) {
    out.clear();
    for s in row {
        out.push(s.re);
        out.push(s.im);
    }
}

/// Write `record` into `dir`, returning the path of the sample file
pub fn write_survey(dir: &Path, record: &SurveyRecord, sample_rate: f64) -> Result<PathBuf> {
    write_survey_at(dir, record, sample_rate, &Utc::now())
}

pub fn write_survey_at(
    dir: &Path,
    record: &SurveyRecord,
    sample_rate: f64,
    time: &DateTime<Utc>,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let stem = format!("sfcw-{}", survey_timestamp(time));
    let data_path = dir.join(format!("{stem}.c64"));
    let meta_path = dir.join(format!("{stem}.json"));

    let mut data = BufWriter::new(File::create(&data_path)?);
    let mut flat = Vec::with_capacity(2 * record.capture_len());
    for step in record.steps() {
        for channel in Channel::ALL {
            interleave(step.capture.row(channel), &mut flat);
            data.write_all(flat.as_byte_slice())?;
        }
    }
    data.flush()?;

    let meta = SurveyMeta {
        utc_start: time.to_rfc3339(),
        sample_rate,
        capture_len: record.capture_len(),
        channels: Channel::ALL.len(),
        frequencies: record.frequencies(),
        endianness: if cfg!(target_endian = "little") {
            "little".to_owned()
        } else {
            "big".to_owned()
        },
    };
    serde_json::to_writer_pretty(BufWriter::new(File::create(&meta_path)?), &meta)
        .map_err(std::io::Error::from)?;

    info!(
        "Wrote {} survey steps to {}",
        record.len(),
        data_path.display()
    );
    Ok(data_path)
}
