use args::{Args, Command};
use clap::Parser;
use sfcw_sounder::{
    complex::complex_sinusoid,
    exfil::write_survey,
    search::{BisectionSearch, RandomStepSearch},
    sim::SimFrontEnd,
    tuning::TuningConfig,
    CalibrationConfig, CancelToken, FrontEndConfig, GainCalibrator, GainTableStore, IqSample,
    JsonGainTableStore, RadioFrontEnd, SweepConfig, SweepController, TransmitTask,
    LENGTH_ONE_PERIOD,
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{info, warn};

mod args;

/// Peak amplitude of the transmitted tone
const WAVEFORM_AMPLITUDE: f32 = 0.7;

fn main() -> sfcw_sounder::Result<()> {
    // Get the CLI options
    let cli = Args::parse();

    // Setup logging
    let filter = args::convert_filter(cli.verbose.log_level_filter());
    tracing_subscriber::fmt().with_max_level(filter).init();
    info!("Starting SFCW sounder!");

    // Setup the exit handler
    let cancel = CancelToken::new();
    let handler_cancel = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        warn!("Interrupted, finishing the current step");
        handler_cancel.cancel();
    }) {
        warn!("Couldn't install the interrupt handler - {e}");
    }

    // Bring up the front end
    let fe_config = FrontEndConfig {
        tx_gains: [cli.tx_gain_a, cli.tx_gain_b],
        ..Default::default()
    };
    fe_config.validate()?;
    fe_config.log_summary();
    let sample_rate = fe_config.sample_rate;
    let frontend: Arc<dyn RadioFrontEnd> = Arc::new(SimFrontEnd::new(fe_config));
    info!("Using front end {}", frontend.name());
    frontend.init_device_time()?;

    let waveform: Arc<[IqSample]> = complex_sinusoid(LENGTH_ONE_PERIOD, WAVEFORM_AMPLITUDE).into();
    let mut transmit = TransmitTask::new(frontend.clone());
    let store = JsonGainTableStore::new(&cli.table_dir);
    let freqs = cli.frequencies();
    let tuning = TuningConfig {
        lock_timeout: Duration::from_millis(cli.lock_timeout_ms),
        ..Default::default()
    };

    let now = Instant::now();
    match cli.command {
        Command::Calibrate {
            table,
            target_a,
            target_b,
            tolerance,
            seed,
            bisect,
        } => {
            let config = CalibrationConfig {
                tx_gains: [cli.tx_gain_a, cli.tx_gain_b],
                target_amplitudes: [target_a, target_b],
                tolerance,
                tuning,
                ..Default::default()
            };
            let calibrator = GainCalibrator::new(frontend.clone(), config).with_cancel(cancel);
            let mut calibrator = match (bisect, seed) {
                (true, _) => calibrator.with_search(BisectionSearch::default()),
                (false, Some(seed)) => calibrator.with_search(RandomStepSearch::seeded(seed)),
                (false, None) => calibrator.with_search(RandomStepSearch::new()),
            };
            let gains = calibrator.calibrate(&mut transmit, waveform, &freqs)?;
            info!(
                "Calibrated {} frequencies in {:?}",
                gains.len(),
                now.elapsed()
            );
            store.save(&gains, &table)?;
            info!("Saved gain table to {}", store.path(&table).display());
        }
        Command::Survey { table, output } => {
            let config = SweepConfig {
                tuning,
                ..Default::default()
            };
            let mut sweep = SweepController::from_store(frontend.clone(), &store, &table, config)?
                .with_cancel(cancel);
            let (record, _) =
                sweep.run_sweep(&mut transmit, waveform, &freqs, cli.tx_gain_a, cli.tx_gain_b)?;
            info!("Surveyed {} steps in {:?}", record.len(), now.elapsed());
            write_survey(&output, &record, sample_rate)?;
        }
    }
    Ok(())
}
