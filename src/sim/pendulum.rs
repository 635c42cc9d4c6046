//! pendulum.rs
//! Damped pendulum on a translating cart, the mechanical model behind the
//! ball-in-a-cup metaphor (the ball slides without rolling or friction).
//!
//! Governing equation, with the cart acceleration `a` as forcing input:
//!
//! ```text
//! theta_dd = -(a/L)*cos(theta) - (g/L)*sin(theta) - b/(m*L^2) * theta_d
//! ```
//!
//! and the reaction force the pendulum exerts on the cart along the motion
//! axis:
//!
//! ```text
//! F = -m*L*theta_dd*cos(theta) + m*L*theta_d^2*sin(theta)
//! ```
//!
//! Integration is one explicit Euler step per tick with the forcing term held
//! constant over the step; the step size is the measured elapsed wall time,
//! not the nominal tick period. Deterministic: identical (state, forcing, dt)
//! always produces the identical next state.

/// Pendulum state and constants. Angle is measured from the cup's resting
/// vertical, in radians.
#[derive(Debug, Clone)]
pub struct Pendulum {
    mass: f64,
    length: f64,
    damping: f64,
    gravity: f64,
    angle: f64,
    angular_velocity: f64,
    angular_acceleration: f64,
}

impl Pendulum {
    pub fn new(mass: f64, length: f64, damping: f64, gravity: f64) -> Self {
        Self {
            mass,
            length,
            damping,
            gravity,
            angle: 0.0,
            angular_velocity: 0.0,
            angular_acceleration: 0.0,
        }
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn angular_velocity(&self) -> f64 {
        self.angular_velocity
    }

    pub fn angular_acceleration(&self) -> f64 {
        self.angular_acceleration
    }

    /// Reset to the configured initial state at the start of a trial. Only
    /// the angular state is owned here: the ball's Cartesian position is
    /// always derived from the cart position plus the angle.
    pub fn reset(&mut self, angle: f64, angular_velocity: f64) {
        self.angle = angle;
        self.angular_velocity = angular_velocity;
        self.angular_acceleration = 0.0;
    }

    /// Angular acceleration for the current state under `cart_acceleration`.
    fn forced_acceleration(&self, cart_acceleration: f64) -> f64 {
        -(cart_acceleration / self.length) * self.angle.cos()
            - (self.gravity / self.length) * self.angle.sin()
            - self.damping / (self.mass * self.length * self.length) * self.angular_velocity
    }

    /// Advance one step of size `dt` (seconds of measured wall time).
    pub fn step(&mut self, cart_acceleration: f64, dt: f64) {
        self.angular_acceleration = self.forced_acceleration(cart_acceleration);
        self.angular_velocity += self.angular_acceleration * dt;
        self.angle += self.angular_velocity * dt;
    }

    /// Reaction force on the cart along the motion axis for the current
    /// state, with the angular acceleration recomputed from
    /// `cart_acceleration` (the forcing may differ from the last integration
    /// step, e.g. unamplified for recording).
    pub fn force_on_cart(&self, cart_acceleration: f64) -> f64 {
        let angular_acceleration = self.forced_acceleration(cart_acceleration);
        let m_l = self.mass * self.length;
        -m_l * angular_acceleration * self.angle.cos()
            + m_l * self.angular_velocity * self.angular_velocity * self.angle.sin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pendulum() -> Pendulum {
        Pendulum::new(0.5, 0.4, 0.02, 9.81)
    }

    #[test]
    fn integration_is_deterministic() {
        let mut a = pendulum();
        let mut b = pendulum();
        a.reset(0.1, -0.2);
        b.reset(0.1, -0.2);
        for _ in 0..500 {
            a.step(1.3, 0.011);
            b.step(1.3, 0.011);
        }
        assert_eq!(a.angle(), b.angle());
        assert_eq!(a.angular_velocity(), b.angular_velocity());
        assert_eq!(a.angular_acceleration(), b.angular_acceleration());
    }

    #[test]
    fn hanging_pendulum_stays_at_rest() {
        let mut p = pendulum();
        p.reset(0.0, 0.0);
        for _ in 0..100 {
            p.step(0.0, 0.01);
        }
        assert_eq!(p.angle(), 0.0);
        assert_eq!(p.angular_velocity(), 0.0);
    }

    #[test]
    fn cart_acceleration_swings_the_ball_backward() {
        let mut p = pendulum();
        p.reset(0.0, 0.0);
        // Accelerating the cart in +Y throws the ball toward -theta.
        p.step(2.0, 0.01);
        assert!(p.angular_acceleration() < 0.0);
        assert!(p.angle() < 0.0);
    }

    #[test]
    fn damping_decays_free_oscillation() {
        let mut p = pendulum();
        p.reset(0.3, 0.0);
        let mut peak = 0.0f64;
        for _ in 0..2000 {
            p.step(0.0, 0.005);
            peak = peak.max(p.angle().abs());
        }
        // After 10 s of damped swinging the envelope is well below the
        // release angle and never grew past it.
        assert!(p.angle().abs() < 0.25);
        assert!(peak <= 0.305);
    }

    #[test]
    fn reset_zeroes_the_angular_acceleration() {
        let mut p = pendulum();
        p.step(5.0, 0.01);
        assert!(p.angular_acceleration() != 0.0);
        p.reset(0.05, 0.0);
        assert_eq!(p.angle(), 0.05);
        assert_eq!(p.angular_acceleration(), 0.0);
    }
}
