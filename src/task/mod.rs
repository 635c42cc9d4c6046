//! Trial-level logic: block configuration, the per-tick orchestrator state
//! machine, perturbation scheduling, motion recording and the presentation
//! snapshot read by external renderers.

pub mod config;
pub mod orchestrator;
pub mod perturbation;
pub mod recording;
pub mod view;
