//! The runtime resolution core: variable precedence, correlation extraction, dataset row
//! distribution and throughput pacing.
//!
//! Everything here is shared by all virtual users on a worker. Locking is fine grained: the
//! session tier of a virtual user lives in its own [`UserContext`] and needs no cross-user lock,
//! while the global tier, each dataset cursor and each throughput timer are serialized
//! independently so contention on one never blocks the others.

mod correlate;
mod dataset;
mod store;
mod template;
mod think;
mod throughput;

pub mod prelude {
    pub use crate::correlate::CorrelationEngine;
    pub use crate::dataset::DatasetPool;
    pub use crate::store::{Resolved, Tier, UserContext, UserId, Value, VariableStore};
    pub use crate::template::{render_body, render_text};
    pub use crate::think::sample_think_time;
    pub use crate::throughput::ThroughputTimerRegistry;
}
