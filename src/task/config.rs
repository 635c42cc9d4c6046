//! config.rs
//! Immutable per-block trial configuration, built once from the parameter
//! file and shared by every trial in the block.

use std::f64::consts::PI;

use crate::params::{ParamError, ParamFile};
use crate::vec3::{AXIS_Y, Vec3};

/// Speed below which the cart counts as stopped (m/s).
pub const VELOCITY_TOLERANCE: f64 = 0.005;
/// Hold at the start position before the go cue (s).
pub const WAIT_FOR_START: f64 = 2.0;
/// The cart must rest inside the target this long before success (s); the
/// ball can still be lost during the hold.
pub const WAIT_AT_TARGET: f64 = 1.0;
/// Score display at the end of a trial (s).
pub const DISPLAY_RESULT: f64 = 2.0;

pub const SCORE_FAILURE: i32 = -50;
pub const SCORE_FULL_SUCCESS: i32 = 100;

const GRAVITY: f64 = 9.81;

/// Block-level perturbation settings; the per-trial draw lives in
/// [`crate::task::perturbation`].
#[derive(Debug, Clone)]
pub struct PerturbationConfig {
    pub enabled: bool,
    /// Force magnitude (N); sign comes from `direction`.
    pub magnitude: f64,
    pub duration: f64,
    /// +1 pushes toward the target, -1 back toward the start.
    pub direction: i32,
    /// Trigger point as a fraction of the start-to-target path.
    pub distance_fraction: f64,
    /// Re-draw per trial: whether the trial carries a perturbation at all...
    pub random_event: bool,
    /// ...where along the path it triggers...
    pub random_distance: bool,
    /// ...and which way it pushes.
    pub random_direction: bool,
    pub visible: bool,
}

impl PerturbationConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            magnitude: 0.0,
            duration: 0.0,
            direction: 1,
            distance_fraction: 0.0,
            random_event: false,
            random_distance: false,
            random_direction: false,
            visible: false,
        }
    }
}

/// Everything a block of trials shares. Built once from parsed parameters,
/// never mutated after the block starts.
#[derive(Debug, Clone)]
pub struct TrialConfig {
    pub block_name: String,
    pub nb_trials: u32,
    /// Ideal start-to-target motion duration (s).
    pub goal_time: f64,

    // Geometry: motion is along Y, symmetric about the origin, at floor
    // height.
    pub start_position: Vec3,
    pub target_position: Vec3,
    pub motion_axis: usize,
    pub floor_height: f64,
    pub distance_tolerance: f64,
    pub velocity_tolerance: f64,

    pub wait_for_start: f64,
    pub wait_at_target: f64,
    pub display_result: f64,

    // Pendulum constants (radians where angular).
    pub pendulum_mass: f64,
    pub pendulum_length: f64,
    pub pendulum_damping: f64,
    pub gravity: f64,
    pub pendulum_initial_angle: f64,
    pub pendulum_initial_velocity: f64,
    pub arc_cup: f64,

    pub inertia: f64,
    pub acceleration_amplification: f64,
    pub accuracy_factor: f64,

    pub auto_start: bool,
    pub can_ball_escape: bool,
    pub damp_end_motion: bool,

    pub score_failure: i32,
    pub score_full_success: i32,

    pub perturbation: PerturbationConfig,
}

impl TrialConfig {
    /// Build the block configuration from a parsed parameter file. Every
    /// missing required parameter is collected and reported in one error,
    /// before any device interaction.
    pub fn from_params(params: &ParamFile) -> Result<Self, ParamError> {
        let mut missing: Vec<String> = Vec::new();

        let mut f64_of = |name: &str| {
            params.get_f64(name).unwrap_or_else(|| {
                missing.push(name.to_string());
                0.0
            })
        };

        let nb_trials = params.get_i64("nbTrials");
        let auto_start = params.get_bool("autoStart");
        let can_ball_escape = params.get_bool("ballEscape");
        let damp_end_motion = params.get_bool("dampEndMotion");
        let block_name = params.get_str("outputFilename");

        let goal_time = f64_of("goalTime");
        let floor_height = f64_of("floorHeight");
        let start_to_target = f64_of("startToTargetDistance");
        let accuracy_factor = f64_of("accuracyFactor");
        let acceleration_amplification = f64_of("accelerationAmplification");
        let inertia = f64_of("inertia");
        let arc_cup_deg = f64_of("arcCup");
        let pendulum_mass = f64_of("pendulumMass");
        let pendulum_length = f64_of("pendulumLength");
        let pendulum_damping = f64_of("pendulumDamping");
        let initial_angle_deg = f64_of("pendulumInitialAngle");
        let initial_velocity_deg = f64_of("pendulumInitialVelocity");

        for (name, present) in [
            ("nbTrials", nb_trials.is_some()),
            ("autoStart", auto_start.is_some()),
            ("ballEscape", can_ball_escape.is_some()),
            ("dampEndMotion", damp_end_motion.is_some()),
            ("outputFilename", block_name.is_some()),
        ] {
            if !present {
                missing.push(name.to_string());
            }
        }

        let perturbation = match params.get_bool("perturbation") {
            None => {
                missing.push("perturbation".to_string());
                PerturbationConfig::disabled()
            }
            Some(false) => PerturbationConfig::disabled(),
            Some(true) => {
                let mut f64_of = |name: &str| {
                    params.get_f64(name).unwrap_or_else(|| {
                        missing.push(name.to_string());
                        0.0
                    })
                };
                let magnitude = f64_of("perturbationMagnitude");
                let duration = f64_of("perturbationDuration");
                let distance_fraction = f64_of("perturbationDistance").clamp(0.0, 1.0);
                let direction = params.get_i64("perturbationDirection").unwrap_or_else(|| {
                    missing.push("perturbationDirection".to_string());
                    1
                });
                let mut bool_of = |name: &str| {
                    params.get_bool(name).unwrap_or_else(|| {
                        missing.push(name.to_string());
                        false
                    })
                };
                PerturbationConfig {
                    enabled: true,
                    // Take |magnitude| and put the sign in the direction,
                    // even if someone writes a negative value in the file.
                    magnitude: magnitude.abs(),
                    duration,
                    direction: if direction >= 0 { 1 } else { -1 },
                    distance_fraction,
                    random_event: bool_of("perturbationRandomEvent"),
                    random_distance: bool_of("perturbationRandomDistance"),
                    random_direction: bool_of("perturbationRandomDirection"),
                    visible: bool_of("perturbationVisible"),
                }
            }
        };

        if !missing.is_empty() {
            return Err(ParamError::Missing(missing));
        }

        let mut start_position = [0.0, 0.0, floor_height];
        let mut target_position = [0.0, 0.0, floor_height];
        start_position[AXIS_Y] = -0.5 * start_to_target;
        target_position[AXIS_Y] = 0.5 * start_to_target;

        let arc_cup = arc_cup_deg * PI / 180.0;
        let pendulum_initial_angle = initial_angle_deg * PI / 180.0;
        let pendulum_initial_velocity = initial_velocity_deg * PI / 180.0;

        let cup_width = 2.0 * pendulum_length * (0.5 * arc_cup).sin();
        // The cup must fit entirely inside the target block for the target
        // to count as reached, so the factor is floored at 1.1.
        let distance_tolerance = (accuracy_factor.max(1.1) - 1.0) * cup_width / 2.0;

        Ok(Self {
            block_name: block_name.unwrap_or_default().to_string(),
            nb_trials: nb_trials.unwrap_or(0).max(0) as u32,
            goal_time,
            start_position,
            target_position,
            motion_axis: AXIS_Y,
            floor_height,
            distance_tolerance,
            velocity_tolerance: VELOCITY_TOLERANCE,
            wait_for_start: WAIT_FOR_START,
            wait_at_target: WAIT_AT_TARGET,
            display_result: DISPLAY_RESULT,
            pendulum_mass,
            pendulum_length,
            pendulum_damping,
            gravity: GRAVITY,
            pendulum_initial_angle,
            pendulum_initial_velocity,
            arc_cup,
            inertia,
            acceleration_amplification,
            accuracy_factor,
            auto_start: auto_start.unwrap_or(false),
            can_ball_escape: can_ball_escape.unwrap_or(false),
            damp_end_motion: damp_end_motion.unwrap_or(false),
            score_failure: SCORE_FAILURE,
            score_full_success: SCORE_FULL_SUCCESS,
            perturbation,
        })
    }

    /// Chord of the cup arc; also defines the target-zone width.
    pub fn cup_width(&self) -> f64 {
        2.0 * self.pendulum_length * (0.5 * self.arc_cup).sin()
    }

    /// Sagitta of the cup arc.
    pub fn cup_height(&self) -> f64 {
        self.pendulum_length * (1.0 - (0.5 * self.arc_cup).cos())
    }

    /// Sign of travel along the motion axis (start below target gives +1).
    pub fn travel_sign(&self) -> f64 {
        let d = self.target_position[self.motion_axis] - self.start_position[self.motion_axis];
        if d < 0.0 { -1.0 } else { 1.0 }
    }

    /// Whether the ball has left the cup: escape must be permitted for the
    /// block, and the pendulum past half the cup arc on either side.
    pub fn ball_escaped(&self, pendulum_angle: f64) -> bool {
        self.can_ball_escape && pendulum_angle.abs() > self.arc_cup / 2.0
    }

    /// Trial score on success. Peaks at the full-success score when the
    /// motion (minus the mandatory hold at the target) matches the goal time
    /// exactly, and decays toward the failure score at two seconds of error
    /// either way.
    pub fn success_score(&self, motion_duration: f64) -> i32 {
        let range = (self.score_full_success - self.score_failure) as f64;
        let timing_error = (self.goal_time - (motion_duration - self.wait_at_target)).abs();
        (range * (-2.0 * timing_error).exp()).round() as i32 + self.score_failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamFile;

    pub const FULL_PARAMS: &str = "\
nbTrials = 10
outputFilename = block_a
autoStart = 0
ballEscape = 1
dampEndMotion = 1
goalTime = 2.0
floorHeight = 0.05
startToTargetDistance = 1.0
accuracyFactor = 1.5
accelerationAmplification = 1.0
inertia = 3.0
arcCup = 60.0
pendulumMass = 0.5
pendulumLength = 0.5
pendulumDamping = 0.02
pendulumInitialAngle = 0.0
pendulumInitialVelocity = 0.0
perturbation = 0
";

    #[test]
    fn builds_symmetric_start_and_target_at_floor_height() {
        let config = TrialConfig::from_params(&ParamFile::parse(FULL_PARAMS)).unwrap();
        assert_eq!(config.start_position, [0.0, -0.5, 0.05]);
        assert_eq!(config.target_position, [0.0, 0.5, 0.05]);
        assert_eq!(config.motion_axis, 1);
    }

    #[test]
    fn derives_tolerance_from_cup_geometry() {
        let config = TrialConfig::from_params(&ParamFile::parse(FULL_PARAMS)).unwrap();
        // arc 60 deg, L = 0.5: chord = 2 * 0.5 * sin(30 deg) = 0.5
        assert!((config.cup_width() - 0.5).abs() < 1e-12);
        // (1.5 - 1) * 0.5 / 2
        assert!((config.distance_tolerance - 0.125).abs() < 1e-12);
    }

    #[test]
    fn reports_every_missing_parameter_at_once() {
        let text = FULL_PARAMS
            .replace("pendulumMass = 0.5\n", "")
            .replace("goalTime = 2.0\n", "");
        match TrialConfig::from_params(&ParamFile::parse(&text)) {
            Err(ParamError::Missing(names)) => {
                assert!(names.contains(&"pendulumMass".to_string()));
                assert!(names.contains(&"goalTime".to_string()));
                assert_eq!(names.len(), 2);
            }
            other => panic!("expected missing-parameter error, got {other:?}"),
        }
    }

    #[test]
    fn degree_parameters_convert_to_radians() {
        let config = TrialConfig::from_params(&ParamFile::parse(FULL_PARAMS)).unwrap();
        assert!((config.arc_cup - std::f64::consts::FRAC_PI_3).abs() < 1e-12);
    }

    #[test]
    fn score_peaks_at_goal_time_and_floors_at_failure() {
        let config = TrialConfig::from_params(&ParamFile::parse(FULL_PARAMS)).unwrap();
        // motion = goal + mandatory hold: zero timing error, full score.
        assert_eq!(
            config.success_score(config.goal_time + config.wait_at_target),
            config.score_full_success
        );
        // Far off either way decays to the failure score.
        assert_eq!(config.success_score(20.0), config.score_failure);
        assert!(config.success_score(2.4) < config.score_full_success);
    }

    #[test]
    fn escape_detection_is_monotonic_in_angle() {
        let config = TrialConfig::from_params(&ParamFile::parse(FULL_PARAMS)).unwrap();
        let half_arc = config.arc_cup / 2.0;
        for within in [0.0, half_arc * 0.5, half_arc] {
            assert!(!config.ball_escaped(within));
            assert!(!config.ball_escaped(-within));
        }
        for beyond in [half_arc + 1e-9, half_arc * 1.5, half_arc * 4.0] {
            assert!(config.ball_escaped(beyond));
            assert!(config.ball_escaped(-beyond));
        }
    }
}
