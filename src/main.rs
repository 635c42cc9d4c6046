//! # Cup Task Entry Point
//! Runs one block of ball-in-a-cup trials against a haptic device.
//!
//! ## Pipeline
//! - **Parameters:** `name=value` file (path as first argument, default
//!   `param.txt`) parsed and validated before the device is touched.
//! - **Device:** TCP link to the device controller; springs, damper and bias
//!   forces created at startup, released at the end of the block.
//! - **Control loop:** fixed-period tick (default 10 ms) driving the trial
//!   state machine; the elapsed wall clock is the simulation time base.
//! - **Recording:** one semicolon-separated CSV per trial, written by a
//!   background thread fed over a channel.

use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use log::{error, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use spin_sleep::{SpinSleeper, SpinStrategy};

use cup_task::device::haptic::HapticDevice;
use cup_task::device::link::TcpTransport;
use cup_task::params::ParamFile;
use cup_task::task::config::TrialConfig;
use cup_task::task::orchestrator::Orchestrator;
use cup_task::task::recording::spawn_trial_writer;
use cup_task::task::view::shared_view;

const DEFAULT_PARAM_FILE: &str = "param.txt";
const DEFAULT_DEVICE_ADDRESS: &str = "192.168.100.53:2000";
const DEFAULT_LOOP_PERIOD_MS: u64 = 10;
const OUTPUT_DIR: &str = "Output";

fn main() -> ExitCode {
    env_logger::init();

    let param_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_PARAM_FILE.to_string());
    let params = match ParamFile::load(Path::new(&param_path)) {
        Ok(params) => params,
        Err(e) => {
            error!("{param_path}: {e}");
            return ExitCode::FAILURE;
        }
    };
    let config = match TrialConfig::from_params(&params) {
        Ok(config) => config,
        Err(e) => {
            error!("{param_path}: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        "block {}: {} trials, goal time {:.2} s",
        config.block_name, config.nb_trials, config.goal_time
    );

    let address = params
        .get_str("deviceAddress")
        .unwrap_or(DEFAULT_DEVICE_ADDRESS)
        .to_string();
    let loop_period_ms = params
        .get_i64("loopPeriodMs")
        .map(|ms| ms.max(1) as u64)
        .unwrap_or(DEFAULT_LOOP_PERIOD_MS);

    let transport = match TcpTransport::connect(&address) {
        Ok(transport) => transport,
        Err(e) => {
            error!("cannot connect to device at {address}: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("connected to device at {address}");

    let mut device = HapticDevice::new(transport, config.inertia, config.floor_height);
    if let Err(e) = device.initialize() {
        error!("device initialization failed: {e}");
        return ExitCode::FAILURE;
    }

    let (sink, writer) = spawn_trial_writer(&config, Path::new(OUTPUT_DIR));
    let view = shared_view();

    // A fixed seed makes a block's perturbation sequence reproducible.
    let rng = match params.get_i64("randomSeed") {
        Some(seed) => StdRng::seed_from_u64(seed as u64),
        None => StdRng::from_os_rng(),
    };

    let mut orchestrator = Orchestrator::new(config, device, sink, view, rng);

    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    let period = std::time::Duration::from_millis(loop_period_ms);
    let origin = Instant::now();

    loop {
        orchestrator.tick(origin.elapsed().as_secs_f64());
        if orchestrator.is_finished() {
            break;
        }
        sleeper.sleep(period);
    }

    let total = orchestrator.total_score();
    // Dropping the orchestrator drops the sink, which lets the writer drain
    // and exit.
    drop(orchestrator);
    if writer.join().is_err() {
        error!("trial writer thread panicked, some files may be incomplete");
    }

    info!("session over, total score {total}");
    ExitCode::SUCCESS
}
