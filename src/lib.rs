//! Cup task: a real-time ball-in-a-cup motor control experiment.
//!
//! A subject moves a haptic device end-effector along one axis while a damped
//! pendulum (the "ball in a cup") hangs from it. Each trial carries the cup
//! from a start zone to a target zone within a goal time without losing the
//! ball. Once per tick the orchestrator reads device kinematics, integrates
//! the pendulum, renders the reaction force back through the device, and
//! evaluates the trial state machine.
//!
//! Module map:
//! - `device` — ASCII request/response link, response parsing, capability layer
//! - `sim` — pendulum-cart physical model
//! - `task` — trial configuration, orchestrator FSM, recording, presentation
//! - `params` — `name=value` parameter file loading

pub mod device;
pub mod params;
pub mod sim;
pub mod task;
pub mod vec3;
