//! orchestrator.rs
//! Per-tick trial state machine. Each tick refreshes the device kinematics,
//! runs exactly one state handler, and publishes the presentation snapshot.
//! Handlers return the next state; all timing derives from the caller's clock
//! so the machine is testable without sleeping.
//!
//! Trial life cycle:
//!
//! ```text
//! Initializing -> GoToNext -> WaitForStart -> StartMotion -> InitiateMotion
//!     -> InMotion -> TerminateMotion -> EndOfTrial -> GoToNext | End
//! ```

use log::{debug, info};
use rand::rngs::StdRng;

use crate::device::haptic::HapticDevice;
use crate::device::link::Transport;
use crate::sim::pendulum::Pendulum;
use crate::task::config::TrialConfig;
use crate::task::perturbation::PerturbationState;
use crate::task::recording::{RecordingBuffer, RecordingSink, TrialHeader, TrialSample};
use crate::task::view::{BallFlight, Cue, SharedView};
use crate::vec3::{self, AXIS_Y, AXIS_Z};

/// Cue thresholds on the trial score.
const SCORE_SUCCESS_CUE: i32 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialState {
    /// First tick only: arm the first trial.
    Initializing,
    /// The start spring is dragging the end-effector to the start position.
    GoToNext,
    /// Holding still at the start until the go cue.
    WaitForStart,
    /// Single-tick pivot: go cue, springs reconfigured, recording starts.
    StartMotion,
    /// Physics runs, waiting for the subject to actually move.
    InitiateMotion,
    /// The scored motion toward the target.
    InMotion,
    /// Single-tick pivot: scores settled, device relaxed, trial flushed.
    TerminateMotion,
    /// Result on display before the next trial or the end of the block.
    EndOfTrial,
    End,
}

impl TrialState {
    pub fn name(&self) -> &'static str {
        match self {
            TrialState::Initializing => "initializing",
            TrialState::GoToNext => "go_to_next",
            TrialState::WaitForStart => "wait_for_start",
            TrialState::StartMotion => "start_motion",
            TrialState::InitiateMotion => "initiate_motion",
            TrialState::InMotion => "in_motion",
            TrialState::TerminateMotion => "terminate_motion",
            TrialState::EndOfTrial => "end_of_trial",
            TrialState::End => "end",
        }
    }
}

/// Runs a block of trials against one device.
pub struct Orchestrator<T: Transport, S: RecordingSink> {
    config: TrialConfig,
    device: HapticDevice<T>,
    pendulum: Pendulum,
    sink: S,
    view: SharedView,
    rng: StdRng,

    state: TrialState,
    trial_nb: u32,
    trial_score: i32,
    total_score: i32,

    last_time: Option<f64>,
    /// Recording time base, set at the go cue.
    motion_started: f64,
    /// Movement onset inside the trial, the scored duration's origin.
    movement_onset: f64,
    motion_duration: f64,
    hold_started: Option<f64>,
    waiting_at_target_since: Option<f64>,
    result_shown_at: f64,

    perturbation: PerturbationState,
    buffer: RecordingBuffer,
    flight: Option<BallFlight>,
    cue: Cue,
    ball_lost: bool,
    damper_engaged: bool,
}

impl<T: Transport, S: RecordingSink> Orchestrator<T, S> {
    /// The device must already be initialized (objects created, force
    /// rendering active).
    pub fn new(
        config: TrialConfig,
        device: HapticDevice<T>,
        sink: S,
        view: SharedView,
        rng: StdRng,
    ) -> Self {
        let pendulum = Pendulum::new(
            config.pendulum_mass,
            config.pendulum_length,
            config.pendulum_damping,
            config.gravity,
        );
        {
            let mut v = view.lock();
            v.pendulum_length = config.pendulum_length;
            v.gravity = config.gravity;
            v.start_position = config.start_position;
            v.target_position = config.target_position;
            v.distance_tolerance = config.distance_tolerance;
            v.cup_width = config.cup_width();
            v.cup_height = config.cup_height();
        }
        Self {
            config,
            device,
            pendulum,
            sink,
            view,
            rng,
            state: TrialState::Initializing,
            trial_nb: 0,
            trial_score: 0,
            total_score: 0,
            last_time: None,
            motion_started: 0.0,
            movement_onset: 0.0,
            motion_duration: 0.0,
            hold_started: None,
            waiting_at_target_since: None,
            result_shown_at: 0.0,
            perturbation: PerturbationState::idle(),
            buffer: RecordingBuffer::new(),
            flight: None,
            cue: Cue::Idle,
            ball_lost: false,
            damper_engaged: false,
        }
    }

    pub fn state(&self) -> TrialState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == TrialState::End
    }

    pub fn total_score(&self) -> i32 {
        self.total_score
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// One control-loop step at caller time `now` (seconds, monotonic).
    pub fn tick(&mut self, now: f64) {
        if self.state == TrialState::End {
            return;
        }
        let dt = match self.last_time {
            Some(t) => (now - t).max(0.0),
            None => 0.0,
        };
        self.last_time = Some(now);
        self.device.refresh_kinematics();

        let next = match self.state {
            TrialState::Initializing => self.begin_next_trial(),
            TrialState::GoToNext => self.on_go_to_next(now),
            TrialState::WaitForStart => self.on_wait_for_start(now),
            TrialState::StartMotion => self.on_start_motion(now),
            TrialState::InitiateMotion => self.on_initiate_motion(now, dt),
            TrialState::InMotion => self.on_in_motion(now, dt),
            TrialState::TerminateMotion => self.on_terminate_motion(now),
            TrialState::EndOfTrial => self.on_end_of_trial(now),
            TrialState::End => TrialState::End,
        };
        if next != self.state {
            debug!("{} -> {}", self.state.name(), next.name());
        }
        self.state = next;
        self.publish_view(now);
    }

    // ========================================================================
    // State handlers
    // ========================================================================

    /// Arm the next trial and send the end-effector back to the start, or
    /// end the block once every trial has run.
    fn begin_next_trial(&mut self) -> TrialState {
        if self.trial_nb >= self.config.nb_trials {
            info!(
                "block {} complete, total score {}",
                self.config.block_name, self.total_score
            );
            self.device.terminate();
            return TrialState::End;
        }
        self.trial_nb += 1;
        self.trial_score = 0;
        self.motion_duration = 0.0;
        self.hold_started = None;
        self.waiting_at_target_since = None;
        self.flight = None;
        self.cue = Cue::Idle;
        self.ball_lost = false;
        self.damper_engaged = false;

        self.pendulum.reset(
            self.config.pendulum_initial_angle,
            self.config.pendulum_initial_velocity,
        );
        self.perturbation = PerturbationState::schedule(&self.config, &mut self.rng);

        self.device
            .set_start_spring_reference(self.config.start_position);
        self.device.enable_start_spring();

        info!(
            "trial {}/{} armed{}",
            self.trial_nb,
            self.config.nb_trials,
            if self.perturbation.in_current_trial {
                " (perturbed)"
            } else {
                ""
            }
        );
        TrialState::GoToNext
    }

    fn at_rest_near_start(&self) -> bool {
        let snapshot = self.device.snapshot();
        let offset = vec3::norm(vec3::sub(snapshot.position, self.config.start_position));
        offset < self.config.distance_tolerance
            && vec3::norm(snapshot.velocity) < self.config.velocity_tolerance
    }

    fn on_go_to_next(&mut self, now: f64) -> TrialState {
        if self.at_rest_near_start() {
            // Settled at the start: lock the start spring in and pin the
            // off-axis directions for the coming motion.
            self.device.enable_start_spring();
            self.device.set_motion_restriction(true);
            self.hold_started = Some(now);
            TrialState::WaitForStart
        } else {
            // Keep dragging toward the start until the effector settles.
            self.device
                .set_start_spring_reference(self.config.start_position);
            TrialState::GoToNext
        }
    }

    /// The subject must hold still at the start for the full wait; any drift
    /// restarts the hold.
    fn on_wait_for_start(&mut self, now: f64) -> TrialState {
        if !self.at_rest_near_start() {
            self.hold_started = None;
            return TrialState::WaitForStart;
        }
        let since = *self.hold_started.get_or_insert(now);
        if now - since < self.config.wait_for_start {
            TrialState::WaitForStart
        } else {
            TrialState::StartMotion
        }
    }

    /// Go cue: release the start spring, pin the off-axis directions, start
    /// rendering the ball and recording the motion.
    fn on_start_motion(&mut self, now: f64) -> TrialState {
        self.cue = Cue::Go;
        self.device.disable_start_spring();
        self.device.enable_ball_force();
        self.buffer.start();
        self.motion_started = now;
        self.movement_onset = now;
        TrialState::InitiateMotion
    }

    /// Physics is live but the scored clock starts only once the subject
    /// moves toward the target (auto-start blocks score from the go cue).
    fn on_initiate_motion(&mut self, now: f64, dt: f64) -> TrialState {
        self.step_physics(now, dt);
        let axis_velocity = self.device.snapshot().velocity[self.config.motion_axis];
        if self.config.auto_start
            || axis_velocity * self.config.travel_sign() > self.config.velocity_tolerance
        {
            self.movement_onset = now;
            TrialState::InMotion
        } else {
            TrialState::InitiateMotion
        }
    }

    fn on_in_motion(&mut self, now: f64, dt: f64) -> TrialState {
        self.step_physics(now, dt);
        let axis = self.config.motion_axis;
        let snapshot = *self.device.snapshot();

        if !self.ball_lost && self.config.ball_escaped(self.pendulum.angle()) {
            self.ball_lost = true;
            self.flight = Some(self.escape_flight(now));
            self.cue = Cue::Failure;
            self.trial_score = self.config.score_failure;
            self.motion_duration = now - self.movement_onset;
            info!("trial {}: ball lost", self.trial_nb);
            return TrialState::TerminateMotion;
        }

        if self.perturbation.should_fire(snapshot.position[axis], &self.config) {
            self.perturbation.fire(now);
            self.device.apply_perturbation_force(self.perturbation.force);
        }
        if self
            .perturbation
            .expired(now, self.config.perturbation.duration)
        {
            self.perturbation.active = false;
            self.device.stop_perturbation_force();
        }

        let at_target = (snapshot.position[axis] - self.config.target_position[axis]).abs()
            < self.config.distance_tolerance;
        let still = snapshot.velocity[axis].abs() < self.config.velocity_tolerance;

        // The damper helps the subject brake: engaged the moment the cart
        // enters the zone, still moving or not, and held until the trial
        // terminates.
        if at_target && self.config.damp_end_motion && !self.damper_engaged {
            self.device.enable_damper();
            self.damper_engaged = true;
        }

        if at_target && still {
            match self.waiting_at_target_since {
                None => self.waiting_at_target_since = Some(now),
                Some(since) if now - since >= self.config.wait_at_target => {
                    self.motion_duration = now - self.movement_onset;
                    self.trial_score = self.config.success_score(self.motion_duration);
                    return TrialState::TerminateMotion;
                }
                Some(_) => {}
            }
        } else if self.waiting_at_target_since.is_some() {
            // Left the target or started moving again: the hold restarts
            // from scratch.
            self.waiting_at_target_since = None;
        }
        TrialState::InMotion
    }

    /// Settle the trial: accumulate the score, cue the result, relax the
    /// device and flush the recording.
    fn on_terminate_motion(&mut self, now: f64) -> TrialState {
        self.total_score += self.trial_score;
        if !self.ball_lost {
            self.cue = if self.trial_score > SCORE_SUCCESS_CUE {
                Cue::Success
            } else if self.trial_score > 0 {
                Cue::Neutral
            } else {
                Cue::Failure
            };
        }
        info!(
            "trial {} done: score {} (total {}), motion {:.3} s",
            self.trial_nb, self.trial_score, self.total_score, self.motion_duration
        );

        self.device.disable_ball_force();
        self.device.stop_perturbation_force();
        self.perturbation.active = false;
        if self.damper_engaged {
            self.device.disable_damper();
            self.damper_engaged = false;
        }
        self.device.set_motion_restriction(false);
        // Park the end-effector where the motion ended until the next trial
        // pulls it back to the start.
        let here = self.device.snapshot().position;
        self.device.set_start_spring_reference(here);
        self.device.enable_start_spring();

        let samples = self.buffer.take();
        let header = TrialHeader {
            trial_nb: self.trial_nb,
            success: !self.ball_lost,
            trial_score: self.trial_score,
            total_score: self.total_score,
            motion_duration: self.motion_duration,
            perturbed: self.perturbation.in_current_trial,
            perturbation_distance_fraction: self.perturbation.distance_fraction,
            perturbation_direction: self.perturbation.direction,
        };
        self.sink.write_trial(header, samples);

        self.result_shown_at = now;
        TrialState::EndOfTrial
    }

    fn on_end_of_trial(&mut self, now: f64) -> TrialState {
        if now - self.result_shown_at < self.config.display_result {
            TrialState::EndOfTrial
        } else {
            self.begin_next_trial()
        }
    }

    // ========================================================================
    // Physics coupling
    // ========================================================================

    /// Advance the pendulum under the measured cart acceleration, render the
    /// reaction force and record the tick.
    fn step_physics(&mut self, now: f64, dt: f64) {
        let snapshot = *self.device.snapshot();
        let axis = self.config.motion_axis;
        let forcing =
            snapshot.acceleration[axis] * self.config.acceleration_amplification;
        self.pendulum.step(forcing, dt);

        let force = self.pendulum.force_on_cart(forcing);
        let mut force_vector = [0.0; 3];
        force_vector[axis] = force;
        self.device.update_ball_force(force_vector);

        self.buffer.push(TrialSample {
            time: now - self.motion_started,
            pendulum_angle: self.pendulum.angle(),
            pendulum_velocity: self.pendulum.angular_velocity(),
            pendulum_acceleration: self.pendulum.angular_acceleration(),
            cart_position: snapshot.position[axis],
            cart_velocity: snapshot.velocity[axis],
            cart_acceleration: snapshot.acceleration[axis],
            ball_force: force,
        });
    }

    /// Cartesian state of the ball at the moment it leaves the cup: the
    /// cart's motion plus the tangential contribution of the swing, per
    /// component.
    fn escape_flight(&self, now: f64) -> BallFlight {
        let snapshot = self.device.snapshot();
        let length = self.config.pendulum_length;
        let angle = self.pendulum.angle();
        let angular_velocity = self.pendulum.angular_velocity();

        let mut position = snapshot.position;
        position[AXIS_Y] += length * angle.sin();
        position[AXIS_Z] += length * (1.0 - angle.cos());

        let mut velocity = snapshot.velocity;
        velocity[AXIS_Y] += length * angle.cos() * angular_velocity;
        velocity[AXIS_Z] += length * angle.sin() * angular_velocity;

        BallFlight {
            position,
            velocity,
            started_at: now,
        }
    }

    fn publish_view(&self, now: f64) {
        let snapshot = self.device.snapshot();
        let mut view = self.view.lock();
        view.state_name = self.state.name();
        view.trial_nb = self.trial_nb;
        view.trial_score = self.trial_score;
        view.total_score = self.total_score;
        view.motion_elapsed = match self.state {
            TrialState::InitiateMotion | TrialState::InMotion => now - self.motion_started,
            _ => 0.0,
        };
        view.cart_position = snapshot.position;
        view.pendulum_angle = self.pendulum.angle();
        view.perturbation_marker = if self.config.perturbation.visible
            && self.perturbation.in_current_trial
        {
            Some(self.perturbation.trigger_position)
        } else {
            None
        };
        view.ball_flight = self.flight;
        view.last_cue = self.cue;
    }
}
