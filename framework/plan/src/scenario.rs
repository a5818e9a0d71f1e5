use serde::{Deserialize, Serialize};

use crate::node::PlanNode;

/// One thread-group equivalent: the population shape for a cohort of virtual users and the
/// script they all execute.
///
/// The population shape fields are immutable after compilation. Only the `enabled` flag is
/// expected to change at runtime, and then only through the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub id: String,
    pub name: String,
    /// Target population once the ramp completes.
    pub users: u32,
    /// Seconds over which the population ramps linearly from 0 to `users`.
    pub ramp_up_s: u64,
    /// Seconds the population is held at `users` after the ramp.
    pub sustain_s: u64,
    #[serde(default)]
    pub loop_count: LoopCount,
    /// Relative share of worker capacity when the aggregate target exceeds what a worker can run.
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Abort the scenario once its accumulated failure count reaches this limit. Unset means
    /// failures are recorded but never abort the scenario.
    #[serde(default)]
    pub max_failures: Option<u64>,
    /// The script each virtual user in this scenario runs, once per iteration.
    pub script: Vec<PlanNode>,
}

fn default_weight() -> u32 {
    1
}

fn default_enabled() -> bool {
    true
}

/// How many iterations each virtual user runs before the scenario winds down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopCount {
    #[default]
    Unbounded,
    Finite(u32),
}

impl LoopCount {
    pub fn is_unbounded(&self) -> bool {
        matches!(self, LoopCount::Unbounded)
    }
}
