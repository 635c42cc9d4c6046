//! Device side: wire protocol, response parsing and the capability layer
//! that the orchestrator talks to.

pub mod haptic;
pub mod link;
pub mod response;
