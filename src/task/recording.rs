//! recording.rs
//! Per-trial motion recording. Samples accumulate in memory while a trial's
//! motion runs and are handed to a sink when the trial settles, so file IO
//! never happens on the control-loop thread. The shipped sink is a background
//! CSV writer fed over a crossbeam channel; tests use the in-memory sink.
//!
//! One file per trial: `<block>_trial_<n>.csv`, semicolon separated, with a
//! preamble of trial-level facts before the column and unit rows.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use log::{error, info};
use serde::Serialize;

use crate::task::config::TrialConfig;

/// One control-loop tick of trial state, captured while recording is active.
/// Field order is the column order of the trial file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrialSample {
    /// Seconds since the trial's motion started.
    pub time: f64,
    pub pendulum_angle: f64,
    pub pendulum_velocity: f64,
    pub pendulum_acceleration: f64,
    /// Cart state along the motion axis.
    pub cart_position: f64,
    pub cart_velocity: f64,
    pub cart_acceleration: f64,
    /// Ball reaction force commanded to the device, before clamping.
    pub ball_force: f64,
}

const COLUMN_NAMES: [&str; 8] = [
    "time",
    "pendulumAngle",
    "pendulumVelocity",
    "pendulumAcceleration",
    "cartPosition",
    "cartVelocity",
    "cartAcceleration",
    "ballForce",
];

const COLUMN_UNITS: [&str; 8] = [
    "s", "rad", "rad/s", "rad/s2", "m", "m/s", "m/s2", "N",
];

/// Trial-level facts written in the file preamble.
#[derive(Debug, Clone)]
pub struct TrialHeader {
    pub trial_nb: u32,
    pub success: bool,
    pub trial_score: i32,
    pub total_score: i32,
    /// Motion start to settled-at-target, mandatory hold included (s).
    pub motion_duration: f64,
    pub perturbed: bool,
    pub perturbation_distance_fraction: f64,
    pub perturbation_direction: i32,
}

/// Sample accumulator for the trial currently in motion.
#[derive(Debug, Default)]
pub struct RecordingBuffer {
    active: bool,
    samples: Vec<TrialSample>,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop whatever a previous trial left behind and start collecting.
    pub fn start(&mut self) {
        self.samples.clear();
        self.active = true;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Ignored unless recording is active.
    pub fn push(&mut self, sample: TrialSample) {
        if self.active {
            self.samples.push(sample);
        }
    }

    /// Hand the collected samples off, leaving the buffer empty and stopped.
    pub fn take(&mut self) -> Vec<TrialSample> {
        self.active = false;
        std::mem::take(&mut self.samples)
    }
}

/// Destination for finished trials. The control loop only ever calls this
/// once per trial, after the motion has settled.
pub trait RecordingSink: Send {
    fn write_trial(&mut self, header: TrialHeader, samples: Vec<TrialSample>);
}

/// Test sink keeping every finished trial in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub trials: Vec<(TrialHeader, Vec<TrialSample>)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordingSink for MemorySink {
    fn write_trial(&mut self, header: TrialHeader, samples: Vec<TrialSample>) {
        self.trials.push((header, samples));
    }
}

/// Channel-fed sink; the paired background thread owns all file IO.
pub struct CsvSink {
    sender: Sender<(TrialHeader, Vec<TrialSample>)>,
}

impl RecordingSink for CsvSink {
    fn write_trial(&mut self, header: TrialHeader, samples: Vec<TrialSample>) {
        // The receiver lives until every sender is dropped, so a send only
        // fails if the writer thread died; the trial is lost either way.
        if self.sender.send((header, samples)).is_err() {
            error!("trial writer thread is gone, dropping trial data");
        }
    }
}

/// Spawn the trial-file writer thread. The returned sink feeds it; the thread
/// exits once the sink (and any clones of its channel) are dropped, and the
/// handle joins after the last file is flushed.
pub fn spawn_trial_writer(config: &TrialConfig, output_dir: &Path) -> (CsvSink, JoinHandle<()>) {
    let (sender, receiver) = channel::unbounded::<(TrialHeader, Vec<TrialSample>)>();
    let config = config.clone();
    let output_dir = output_dir.to_path_buf();

    let handle = thread::spawn(move || {
        for (header, samples) in receiver {
            let path = trial_path(&output_dir, &config.block_name, header.trial_nb);
            match write_trial_file(&path, &config, &header, &samples) {
                Ok(()) => info!(
                    "trial {} written to {} ({} samples)",
                    header.trial_nb,
                    path.display(),
                    samples.len()
                ),
                Err(e) => error!("cannot write {}: {e}", path.display()),
            }
        }
    });

    (CsvSink { sender }, handle)
}

fn trial_path(output_dir: &Path, block_name: &str, trial_nb: u32) -> PathBuf {
    output_dir.join(format!("{block_name}_trial_{trial_nb}.csv"))
}

fn write_trial_file(
    path: &Path,
    config: &TrialConfig,
    header: &TrialHeader,
    samples: &[TrialSample],
) -> Result<(), csv::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .has_headers(false)
        .from_path(path)?;

    // Preamble: trial-level facts, one name;value row each.
    writer.write_record(["block", &config.block_name])?;
    writer.write_record(["trial", &header.trial_nb.to_string()])?;
    writer.write_record(["success", if header.success { "1" } else { "0" }])?;
    writer.write_record(["trialScore", &header.trial_score.to_string()])?;
    writer.write_record(["totalScore", &header.total_score.to_string()])?;
    writer.write_record(["motionDuration", &header.motion_duration.to_string()])?;
    writer.write_record(["goalTime", &config.goal_time.to_string()])?;
    writer.write_record(["pendulumMass", &config.pendulum_mass.to_string()])?;
    writer.write_record(["pendulumLength", &config.pendulum_length.to_string()])?;
    writer.write_record(["pendulumDamping", &config.pendulum_damping.to_string()])?;
    writer.write_record(["perturbed", if header.perturbed { "1" } else { "0" }])?;
    if header.perturbed {
        writer.write_record([
            "perturbationDistance",
            &header.perturbation_distance_fraction.to_string(),
        ])?;
        writer.write_record([
            "perturbationDirection",
            &header.perturbation_direction.to_string(),
        ])?;
    }

    writer.write_record(COLUMN_NAMES)?;
    writer.write_record(COLUMN_UNITS)?;
    for sample in samples {
        writer.serialize(sample)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(time: f64) -> TrialSample {
        TrialSample {
            time,
            pendulum_angle: 0.1,
            pendulum_velocity: -0.2,
            pendulum_acceleration: 0.3,
            cart_position: -0.4,
            cart_velocity: 0.5,
            cart_acceleration: -0.6,
            ball_force: 0.7,
        }
    }

    #[test]
    fn buffer_only_collects_while_active() {
        let mut buffer = RecordingBuffer::new();
        buffer.push(sample(0.0));
        assert!(buffer.take().is_empty());

        buffer.start();
        buffer.push(sample(0.01));
        buffer.push(sample(0.02));
        buffer.stop();
        buffer.push(sample(0.03));
        assert_eq!(buffer.take().len(), 2);
    }

    #[test]
    fn starting_discards_the_previous_trial() {
        let mut buffer = RecordingBuffer::new();
        buffer.start();
        buffer.push(sample(0.0));
        buffer.start();
        buffer.push(sample(0.01));
        let samples = buffer.take();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].time, 0.01);
        assert!(!buffer.is_active());
    }

    #[test]
    fn memory_sink_keeps_trials_in_arrival_order() {
        let mut sink = MemorySink::new();
        for trial_nb in 1..=3 {
            let header = TrialHeader {
                trial_nb,
                success: true,
                trial_score: 80,
                total_score: 80 * trial_nb as i32,
                motion_duration: 3.0,
                perturbed: false,
                perturbation_distance_fraction: 0.0,
                perturbation_direction: 1,
            };
            sink.write_trial(header, vec![sample(0.0)]);
        }
        assert_eq!(sink.trials.len(), 3);
        assert_eq!(sink.trials[2].0.trial_nb, 3);
    }

    #[test]
    fn trial_files_are_named_by_block_and_trial() {
        let path = trial_path(Path::new("Output"), "block_a", 7);
        assert_eq!(path, Path::new("Output/block_a_trial_7.csv"));
    }
}
