//! perturbation.rs
//! Per-trial perturbation schedule: at trial reset the block configuration
//! plus an injected random source decide whether this trial carries a
//! perturbation, where along the path it triggers, and which way it pushes.
//! During the motion the trigger fires exactly once, stays active for the
//! configured duration, then clears for the rest of the trial.
//!
//! The random source is a seeded generator advanced per draw (one seed per
//! block), so a block's perturbation sequence is reproducible.

use rand::Rng;
use rand::rngs::StdRng;

use crate::task::config::TrialConfig;
use crate::vec3::Vec3;

/// Fraction bounds for a randomized trigger position: never too close to the
/// start or the target.
const RANDOM_FRACTION_MIN: f64 = 0.25;
const RANDOM_FRACTION_MAX: f64 = 0.75;

/// Schedule and live status of the current trial's perturbation.
#[derive(Debug, Clone)]
pub struct PerturbationState {
    /// Scheduled for this trial and not yet fired.
    pub due: bool,
    /// Whether this trial carries a perturbation at all (kept for the trial
    /// log after `due` clears).
    pub in_current_trial: bool,
    pub active: bool,
    /// Cart position at which the perturbation triggers.
    pub trigger_position: Vec3,
    /// Force applied while active; motion-axis component only.
    pub force: Vec3,
    /// Fraction and direction actually used this trial (after any random
    /// draw), recorded in the trial log.
    pub distance_fraction: f64,
    pub direction: i32,
    /// Time the perturbation fired, in orchestrator clock seconds.
    pub started_at: f64,
}

impl PerturbationState {
    /// No perturbation this trial.
    pub fn idle() -> Self {
        Self {
            due: false,
            in_current_trial: false,
            active: false,
            trigger_position: [0.0; 3],
            force: [0.0; 3],
            distance_fraction: 0.0,
            direction: 1,
            started_at: 0.0,
        }
    }

    /// Draw this trial's schedule. Called once at trial reset.
    pub fn schedule(config: &TrialConfig, rng: &mut StdRng) -> Self {
        let p = &config.perturbation;
        if !p.enabled {
            return Self::idle();
        }

        // In random-event mode roughly half the trials carry a perturbation.
        if p.random_event && rng.random_range(0..100) < 50 {
            return Self::idle();
        }

        let distance_fraction = if p.random_distance {
            rng.random_range(RANDOM_FRACTION_MIN..=RANDOM_FRACTION_MAX)
        } else {
            p.distance_fraction
        };

        let direction = if p.random_direction {
            if rng.random_range(0..100) < 50 { -1 } else { 1 }
        } else {
            p.direction
        };

        let mut trigger_position = [0.0; 3];
        for i in 0..3 {
            trigger_position[i] = config.start_position[i]
                + (config.target_position[i] - config.start_position[i]) * distance_fraction;
        }

        let mut force = [0.0; 3];
        force[config.motion_axis] = direction as f64 * p.magnitude;

        Self {
            due: true,
            in_current_trial: true,
            active: false,
            trigger_position,
            force,
            distance_fraction,
            direction,
            started_at: 0.0,
        }
    }

    /// Whether the cart has reached or passed the trigger position, measured
    /// in the direction of travel.
    pub fn should_fire(&self, axis_position: f64, config: &TrialConfig) -> bool {
        self.due
            && (axis_position - self.trigger_position[config.motion_axis]) * config.travel_sign()
                >= 0.0
    }

    /// One-shot arm-to-active transition.
    pub fn fire(&mut self, now: f64) {
        self.due = false;
        self.active = true;
        self.started_at = now;
    }

    pub fn expired(&self, now: f64, duration: f64) -> bool {
        self.active && now - self.started_at >= duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamFile;
    use crate::task::config::TrialConfig;
    use rand::SeedableRng;

    fn config(random_event: bool, random_distance: bool, random_direction: bool) -> TrialConfig {
        let text = format!(
            "\
nbTrials = 10
outputFilename = block_a
autoStart = 0
ballEscape = 1
dampEndMotion = 0
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
perturbation = 1
perturbationMagnitude = 5.0
perturbationDuration = 0.15
perturbationDistance = 0.5
perturbationDirection = -1
perturbationRandomEvent = {}
perturbationRandomDistance = {}
perturbationRandomDirection = {}
perturbationVisible = 0
",
            random_event as u8, random_distance as u8, random_direction as u8
        );
        TrialConfig::from_params(&ParamFile::parse(&text)).unwrap()
    }

    #[test]
    fn fixed_schedule_uses_configured_fraction_and_direction() {
        let config = config(false, false, false);
        let mut rng = StdRng::seed_from_u64(1);
        let state = PerturbationState::schedule(&config, &mut rng);
        assert!(state.due && state.in_current_trial);
        // Midpoint of start (-0.5) to target (0.5).
        assert!((state.trigger_position[1] - 0.0).abs() < 1e-12);
        // Direction -1 signs the magnitude, force along the motion axis only.
        assert_eq!(state.force, [0.0, -5.0, 0.0]);
    }

    #[test]
    fn randomized_fraction_stays_inside_the_middle_band() {
        let config = config(false, true, false);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let state = PerturbationState::schedule(&config, &mut rng);
            assert!(state.distance_fraction >= RANDOM_FRACTION_MIN);
            assert!(state.distance_fraction <= RANDOM_FRACTION_MAX);
        }
    }

    #[test]
    fn random_event_mode_skips_roughly_half_the_trials() {
        let config = config(true, false, false);
        let mut rng = StdRng::seed_from_u64(7);
        let carried = (0..1000)
            .filter(|_| PerturbationState::schedule(&config, &mut rng).in_current_trial)
            .count();
        assert!((350..=650).contains(&carried), "carried {carried} of 1000");
    }

    #[test]
    fn seeded_blocks_reproduce_the_same_draw_sequence() {
        let config = config(true, true, true);
        let mut a = StdRng::seed_from_u64(99);
        let mut b = StdRng::seed_from_u64(99);
        for _ in 0..50 {
            let sa = PerturbationState::schedule(&config, &mut a);
            let sb = PerturbationState::schedule(&config, &mut b);
            assert_eq!(sa.in_current_trial, sb.in_current_trial);
            assert_eq!(sa.distance_fraction, sb.distance_fraction);
            assert_eq!(sa.direction, sb.direction);
        }
    }

    #[test]
    fn fires_exactly_once_and_expires_after_its_duration() {
        let config = config(false, false, false);
        let mut rng = StdRng::seed_from_u64(1);
        let mut state = PerturbationState::schedule(&config, &mut rng);

        // Before the trigger point: armed but quiet.
        assert!(!state.should_fire(-0.2, &config));
        // At/past the trigger point: fires once.
        assert!(state.should_fire(0.01, &config));
        state.fire(3.0);
        assert!(state.active && !state.due);
        assert!(!state.should_fire(0.2, &config), "must not re-trigger");

        assert!(!state.expired(3.1, config.perturbation.duration));
        assert!(state.expired(3.2, config.perturbation.duration));
        state.active = false;
        // Cleared for the rest of the trial; position can keep passing the
        // trigger without effect.
        assert!(!state.should_fire(0.4, &config));
        assert!(state.in_current_trial);
    }
}
