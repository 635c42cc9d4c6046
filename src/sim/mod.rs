//! Physical simulation of the ball-in-a-cup task.

pub mod pendulum;
