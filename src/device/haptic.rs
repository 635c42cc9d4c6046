//! haptic.rs
//! Capability layer over the device link: named spring/damper/force objects
//! and the per-tick kinematic refresh.
//!
//! Every operation is one or more link requests with inline error checking.
//! A failed request is logged and the operation aborted; the local cached
//! state stays as it was and the control loop keeps running with stale data
//! rather than halting a live trial. Only connection/initialization failures
//! are fatal.

use log::{error, info, warn};
use std::thread;
use std::time::Duration;

use crate::device::link::{DeviceLink, LinkError, Transport};
use crate::device::response::{field, triple_or_zero};
use crate::vec3::{self, AXIS_X, AXIS_Y, AXIS_Z, Vec3};

// Spring settings for the two regimes: "smooth" lets the subject drift a
// little off-axis, "stiff" pins the off-axis directions during a trial.
const SPRING_STIFFNESS_SMOOTH: f64 = 100.0;
const SPRING_DAMPING_SMOOTH: f64 = 0.7;
const SPRING_STIFFNESS_STIFF: f64 = 5000.0;
const SPRING_DAMPING_STIFF: f64 = 10.0;
const SPRING_DEADBAND: f64 = 0.0;

/// Cap on the start-spring pull, so the return-to-start motion stays slow.
const MAX_SPRING_FORCE: f64 = 400.0;
/// Cap on any rendered bias force; vectors above this are rescaled.
const MAX_FEEDBACK_FORCE: f64 = 100.0;

const DAMPER_COEF: Vec3 = [0.0, 30.0, 0.0];

const CALIBRATION_POLL: Duration = Duration::from_millis(100);

/// End-effector state as last reported by the device. Refreshed once per
/// tick; read-only to the orchestrator and the model.
#[derive(Debug, Clone, Copy, Default)]
pub struct KinematicSnapshot {
    pub position: Vec3,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    pub force: Vec3,
}

/// Uniformly rescale `force` so its magnitude never exceeds `max`.
/// Direction is preserved.
pub fn clamp_force(force: Vec3, max: f64) -> Vec3 {
    let magnitude = vec3::norm(force);
    if magnitude > max {
        vec3::scaled(force, max / magnitude)
    } else {
        force
    }
}

/// The haptic device: owns the link, the haptic objects created on the
/// device side, and the cached kinematic snapshot.
pub struct HapticDevice<T: Transport> {
    link: DeviceLink<T>,
    snapshot: KinematicSnapshot,
    inertia: f64,
    floor_height: f64,
    terminated: bool,
}

impl<T: Transport> HapticDevice<T> {
    pub fn new(transport: T, inertia: f64, floor_height: f64) -> Self {
        Self {
            link: DeviceLink::new(transport),
            snapshot: KinematicSnapshot::default(),
            inertia,
            floor_height,
            terminated: false,
        }
    }

    pub fn snapshot(&self) -> &KinematicSnapshot {
        &self.snapshot
    }

    /// Bring the device into force-rendering mode and create every haptic
    /// object this task uses. Fatal on failure: without its objects the
    /// session cannot start.
    ///
    /// The off-axis springs (`spring_X`, `spring_Z`) stay enabled for the
    /// whole session; `spring_Y` drives the end-effector back to the start
    /// position between trials and starts disabled, as do the damper and the
    /// two bias forces.
    pub fn initialize(&mut self) -> Result<(), LinkError> {
        self.link.request("remove all")?;

        // Health queries are advisory: a pushed emergency stop shows up as a
        // failed calibration or motion later, so only warn here.
        match self.link.request("get emergencybuttonpushed") {
            Ok(r) if field(&r, 1) == "true" => {
                warn!("emergency button is down, release it before starting");
            }
            Ok(_) => {}
            Err(e) => warn!("emergency button query failed: {e}"),
        }
        match self.link.request("get emergencyrelay") {
            Ok(r) if field(&r, 1) == "false" => {
                warn!("device relay not engaged, push the start button");
            }
            Ok(_) => {}
            Err(e) => warn!("emergency relay query failed: {e}"),
        }

        let calibrated = self.link.request("get position_calibrated")?;
        if field(&calibrated, 1) == "false" {
            info!("device uncalibrated, running self-calibration");
            self.link.request("set state init")?;
            loop {
                let state = self.link.request("get state")?;
                if field(&state, 1) == "stop" {
                    break;
                }
                thread::sleep(CALIBRATION_POLL);
            }
        }

        self.link.request("set state force")?;
        self.link.request_scalar("set inertia", self.inertia)?;

        let reference = [0.0, 0.0, self.floor_height];
        self.create_spring("spring_X", AXIS_X, reference, true)?;
        self.create_spring("spring_Y", AXIS_Y, reference, false)?;
        self.create_spring("spring_Z", AXIS_Z, reference, true)?;

        self.link.request("create damper damper_Y")?;
        self.link.request_vector("set damper_Y dampcoef", DAMPER_COEF)?;
        self.link.request("set damper_Y disable")?;

        self.create_bias_force("ballForce")?;
        self.create_bias_force("perturbationForce")?;

        info!("haptic device initialized, force rendering active");
        Ok(())
    }

    fn create_spring(
        &mut self,
        name: &str,
        axis: usize,
        reference: Vec3,
        enabled: bool,
    ) -> Result<(), LinkError> {
        let mut direction = [0.0; 3];
        direction[axis] = 1.0;

        self.link.request(&format!("create spring {name}"))?;
        self.link
            .request_scalar(&format!("set {name} stiffness"), SPRING_STIFFNESS_SMOOTH)?;
        self.link
            .request_scalar(&format!("set {name} dampfactor"), SPRING_DAMPING_SMOOTH)?;
        self.link
            .request_scalar(&format!("set {name} deadband"), SPRING_DEADBAND)?;
        self.link
            .request_vector(&format!("set {name} direction"), direction)?;
        self.link.request_vector(&format!("set {name} pos"), reference)?;
        if enabled {
            self.link.request(&format!("set {name} enable"))?;
        } else {
            self.link
                .request_scalar(&format!("set {name} maxforce"), MAX_SPRING_FORCE)?;
            self.link.request(&format!("set {name} disable"))?;
        }
        Ok(())
    }

    fn create_bias_force(&mut self, name: &str) -> Result<(), LinkError> {
        self.link.request(&format!("create biasforce {name}"))?;
        self.link
            .request_vector(&format!("set {name} force"), [0.0; 3])?;
        self.link.request(&format!("set {name} disable"))?;
        Ok(())
    }

    /// Log a failed request and fall back to the previous local state.
    fn tolerate(what: &str, result: Result<String, LinkError>) -> Option<String> {
        match result {
            Ok(response) => Some(response),
            Err(e) => {
                error!("{what}: {e}");
                None
            }
        }
    }

    // ========================================================================
    // Per-tick kinematics
    // ========================================================================

    /// One batched query for position, velocity, acceleration and measured
    /// force. On failure the previous snapshot stays valid (stale) for this
    /// tick.
    pub fn refresh_kinematics(&mut self) {
        let result = self
            .link
            .request("get modelpos; get modelvel; get modelacc; get measforce");
        if let Some(response) = Self::tolerate("kinematics refresh", result) {
            self.snapshot.position = triple_or_zero(field(&response, 1));
            self.snapshot.velocity = triple_or_zero(field(&response, 2));
            self.snapshot.acceleration = triple_or_zero(field(&response, 3));
            self.snapshot.force = triple_or_zero(field(&response, 4));
        }
    }

    // ========================================================================
    // Springs and damper
    // ========================================================================

    pub fn enable_start_spring(&mut self) {
        let r = self.link.request("set spring_Y enable");
        Self::tolerate("start spring enable", r);
    }

    pub fn disable_start_spring(&mut self) {
        let r = self.link.request("set spring_Y disable");
        Self::tolerate("start spring disable", r);
    }

    /// Move the start spring's reference position; the device pulls the
    /// end-effector toward it while the spring is enabled.
    pub fn set_start_spring_reference(&mut self, reference: Vec3) {
        let r = self.link.request_vector("set spring_Y pos", reference);
        Self::tolerate("start spring reference update", r);
    }

    /// Stiffen (or relax) the two off-axis springs so motion is restricted to
    /// the task axis during a trial.
    pub fn set_motion_restriction(&mut self, restricted: bool) {
        let (stiffness, damping) = if restricted {
            (SPRING_STIFFNESS_STIFF, SPRING_DAMPING_STIFF)
        } else {
            (SPRING_STIFFNESS_SMOOTH, SPRING_DAMPING_SMOOTH)
        };
        for name in ["spring_X", "spring_Z"] {
            let r = self
                .link
                .request_scalar(&format!("set {name} stiffness"), stiffness)
                .and_then(|_| {
                    self.link
                        .request_scalar(&format!("set {name} dampfactor"), damping)
                });
            Self::tolerate("motion restriction update", r);
        }
    }

    pub fn enable_damper(&mut self) {
        let r = self.link.request("set damper_Y enable");
        Self::tolerate("damper enable", r);
    }

    pub fn disable_damper(&mut self) {
        let r = self.link.request("set damper_Y disable");
        Self::tolerate("damper disable", r);
    }

    // ========================================================================
    // Bias forces
    // ========================================================================

    /// Clear any force left over from a previous trial, then enable.
    pub fn enable_ball_force(&mut self) {
        let r = self
            .link
            .request_vector("set ballForce force", [0.0; 3])
            .and_then(|_| self.link.request("set ballForce enable"));
        Self::tolerate("ball force enable", r);
    }

    pub fn disable_ball_force(&mut self) {
        let r = self.link.request("set ballForce disable");
        Self::tolerate("ball force disable", r);
    }

    /// Send the pendulum reaction force, clamped to the hardware-safe
    /// maximum. The value holds on the device until the next update.
    pub fn update_ball_force(&mut self, force: Vec3) {
        let clamped = clamp_force(force, MAX_FEEDBACK_FORCE);
        let r = self.link.request_vector("set ballForce force", clamped);
        Self::tolerate("ball force update", r);
    }

    pub fn apply_perturbation_force(&mut self, force: Vec3) {
        let clamped = clamp_force(force, MAX_FEEDBACK_FORCE);
        let r = self
            .link
            .request_vector("set perturbationForce force", clamped)
            .and_then(|_| self.link.request("set perturbationForce enable"));
        Self::tolerate("perturbation force apply", r);
    }

    pub fn stop_perturbation_force(&mut self) {
        let r = self.link.request("set perturbationForce disable");
        Self::tolerate("perturbation force stop", r);
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Best-effort release of device resources: drop every haptic object and
    /// stop force rendering.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        let r = self
            .link
            .request("remove all")
            .and_then(|_| self.link.request("set state stop"));
        Self::tolerate("device teardown", r);
    }
}

impl<T: Transport> Drop for HapticDevice<T> {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::link::LoopbackTransport;
    use crate::vec3::norm;

    fn device() -> (HapticDevice<LoopbackTransport>, LoopbackTransport) {
        let transport = LoopbackTransport::new();
        (
            HapticDevice::new(transport.clone(), 3.0, 0.05),
            transport,
        )
    }

    #[test]
    fn oversized_force_is_rescaled_to_the_maximum() {
        let force = [0.0, 300.0, 400.0]; // magnitude 500
        let clamped = clamp_force(force, MAX_FEEDBACK_FORCE);
        assert!((norm(clamped) - MAX_FEEDBACK_FORCE).abs() < 1e-9);
        // Same direction: components keep their 3:4 ratio.
        assert!((clamped[1] - 60.0).abs() < 1e-9);
        assert!((clamped[2] - 80.0).abs() < 1e-9);
    }

    #[test]
    fn in_range_force_passes_through_unchanged() {
        let force = [0.0, -40.0, 0.0];
        assert_eq!(clamp_force(force, MAX_FEEDBACK_FORCE), force);
    }

    #[test]
    fn ball_force_update_sends_the_clamped_vector() {
        let (mut device, transport) = device();
        device.update_ball_force([0.0, 300.0, 400.0]);
        let sent = transport.state().lock().sent.clone();
        assert_eq!(sent.last().unwrap(), "set ballForce force [0,60,80]");
    }

    #[test]
    fn refresh_parses_all_four_fields_in_order() {
        let (mut device, transport) = device();
        {
            let handle = transport.state();
            let mut state = handle.lock();
            state.position = [0.0, -0.5, 0.05];
            state.velocity = [0.0, 0.1, 0.0];
            state.acceleration = [0.0, 0.2, 0.0];
            state.force = [0.0, -1.5, 0.0];
        }
        device.refresh_kinematics();
        assert_eq!(device.snapshot().position, [0.0, -0.5, 0.05]);
        assert_eq!(device.snapshot().velocity, [0.0, 0.1, 0.0]);
        assert_eq!(device.snapshot().acceleration, [0.0, 0.2, 0.0]);
        assert_eq!(device.snapshot().force, [0.0, -1.5, 0.0]);
    }

    #[test]
    fn failed_refresh_keeps_the_stale_snapshot() {
        let (mut device, transport) = device();
        transport.state().lock().position = [0.0, 0.3, 0.0];
        device.refresh_kinematics();
        transport.state().lock().fail_next = true;
        device.refresh_kinematics();
        assert_eq!(device.snapshot().position, [0.0, 0.3, 0.0]);
    }

    #[test]
    fn initialize_creates_objects_and_enters_force_state() {
        let (mut device, transport) = device();
        device.initialize().unwrap();
        let sent = transport.state().lock().sent.clone();
        assert_eq!(sent.first().unwrap(), "remove all");
        assert!(sent.iter().any(|c| c == "set state force"));
        assert!(sent.iter().any(|c| c == "create spring spring_X"));
        assert!(sent.iter().any(|c| c == "create spring spring_Y"));
        assert!(sent.iter().any(|c| c == "create spring spring_Z"));
        assert!(sent.iter().any(|c| c == "create damper damper_Y"));
        assert!(sent.iter().any(|c| c == "create biasforce ballForce"));
        // Off-axis springs enabled, start spring parked disabled.
        assert!(sent.iter().any(|c| c == "set spring_X enable"));
        assert!(sent.iter().any(|c| c == "set spring_Y disable"));
    }
}
