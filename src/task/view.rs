//! view.rs
//! Presentation snapshot. The control loop publishes a copy of everything a
//! renderer needs each tick; readers lock, copy, and draw at their own rate
//! without touching the device or the trial state machine.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::vec3::{AXIS_Y, AXIS_Z, Vec3};

/// Feedback cue shown to the subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// None yet this trial.
    Idle,
    /// Start position reached and held, motion may begin.
    Go,
    /// Trial ended with a high score.
    Success,
    /// Trial ended with a positive but low score.
    Neutral,
    /// Ball lost, or the motion scored at the floor.
    Failure,
}

/// Free-flight state of an escaped ball, projected forward by the renderer.
#[derive(Debug, Clone, Copy)]
pub struct BallFlight {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Orchestrator clock time of the escape (s).
    pub started_at: f64,
}

/// Everything the renderer reads. Written whole by the control loop, read
/// whole by the display thread.
#[derive(Debug, Clone)]
pub struct TaskView {
    pub state_name: &'static str,
    pub trial_nb: u32,
    pub trial_score: i32,
    pub total_score: i32,
    /// Seconds since the current trial's motion started; zero outside motion.
    pub motion_elapsed: f64,

    pub cart_position: Vec3,
    pub pendulum_angle: f64,
    pub pendulum_length: f64,
    pub gravity: f64,

    pub start_position: Vec3,
    pub target_position: Vec3,
    pub distance_tolerance: f64,
    pub cup_width: f64,
    pub cup_height: f64,

    /// Trigger point of a visible perturbation, for drawing a marker.
    pub perturbation_marker: Option<Vec3>,
    /// Set the moment the ball leaves the cup, cleared at trial reset.
    pub ball_flight: Option<BallFlight>,
    pub last_cue: Cue,
}

impl TaskView {
    pub fn new() -> Self {
        Self {
            state_name: "initializing",
            trial_nb: 0,
            trial_score: 0,
            total_score: 0,
            motion_elapsed: 0.0,
            cart_position: [0.0; 3],
            pendulum_angle: 0.0,
            pendulum_length: 0.0,
            gravity: 9.81,
            start_position: [0.0; 3],
            target_position: [0.0; 3],
            distance_tolerance: 0.0,
            cup_width: 0.0,
            cup_height: 0.0,
            perturbation_marker: None,
            ball_flight: None,
            last_cue: Cue::Idle,
        }
    }

    /// Ball position at `now`: swinging in the cup while captive, ballistic
    /// once escaped.
    pub fn ball_position(&self, now: f64) -> Vec3 {
        match self.ball_flight {
            Some(flight) => {
                let t = (now - flight.started_at).max(0.0);
                let mut p = flight.position;
                for i in 0..3 {
                    p[i] += flight.velocity[i] * t;
                }
                p[AXIS_Z] -= 0.5 * self.gravity * t * t;
                p
            }
            None => {
                let mut p = self.cart_position;
                p[AXIS_Y] += self.pendulum_length * self.pendulum_angle.sin();
                p[AXIS_Z] += self.pendulum_length * (1.0 - self.pendulum_angle.cos());
                p
            }
        }
    }
}

impl Default for TaskView {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedView = Arc<Mutex<TaskView>>;

pub fn shared_view() -> SharedView {
    Arc::new(Mutex::new(TaskView::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captive_ball_tracks_the_cart_and_angle() {
        let mut view = TaskView::new();
        view.cart_position = [0.0, -0.3, 0.05];
        view.pendulum_length = 0.5;
        view.pendulum_angle = 0.0;
        assert_eq!(view.ball_position(12.0), [0.0, -0.3, 0.05]);

        view.pendulum_angle = std::f64::consts::FRAC_PI_2;
        let p = view.ball_position(12.0);
        assert!((p[AXIS_Y] - 0.2).abs() < 1e-12);
        assert!((p[AXIS_Z] - 0.55).abs() < 1e-12);
    }

    #[test]
    fn escaped_ball_follows_a_ballistic_arc() {
        let mut view = TaskView::new();
        view.pendulum_length = 0.5;
        view.ball_flight = Some(BallFlight {
            position: [0.0, 0.1, 1.0],
            velocity: [0.0, 2.0, 0.0],
            started_at: 5.0,
        });
        let p = view.ball_position(5.5);
        assert!((p[AXIS_Y] - 1.1).abs() < 1e-12);
        // 1.0 - 0.5 * 9.81 * 0.25
        assert!((p[AXIS_Z] - (1.0 - 1.226_25)).abs() < 1e-9);
    }

    #[test]
    fn flight_projection_never_runs_backward() {
        let mut view = TaskView::new();
        view.ball_flight = Some(BallFlight {
            position: [0.0, 0.0, 1.0],
            velocity: [0.0, 1.0, 0.0],
            started_at: 10.0,
        });
        // A stale reader clock before the escape time shows the escape point.
        assert_eq!(view.ball_position(9.0), [0.0, 0.0, 1.0]);
    }
}
