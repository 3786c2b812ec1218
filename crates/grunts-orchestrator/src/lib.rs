//! `grunts-orchestrator`: the Worker Loop driver/HTTP surface and the
//! Orchestrator's tier resolution, decomposition, and run lifecycle,
//! built on top of `grunts-core`'s domain-agnostic primitives.

pub mod orchestrator;
pub mod provider_rig;
pub mod worker;
