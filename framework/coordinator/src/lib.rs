//! Distributed load-shape coordination.
//!
//! The master owns a [`ControlPlane`]: it ticks the load shape on a fixed interval, accepts
//! scenario enable/disable commands, and publishes versioned scenario-state deltas. Workers keep
//! their own [`ScenarioRegistry`] copy and apply deltas through a pure, idempotent reducer, so
//! delta application never blocks request execution and at-least-once delivery is safe.

mod control;
mod delta;
mod registry;
mod shape;

pub mod prelude {
    pub use crate::control::ControlPlane;
    pub use crate::delta::ScenarioDelta;
    pub use crate::registry::{ScenarioPhase, ScenarioRegistry, ScenarioRuntime};
    pub use crate::shape::{LoadShapeConfig, LoadShapeCoordinator, LoadSnapshot};
}
