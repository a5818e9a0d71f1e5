use std::collections::BTreeMap;

use gust_core::prelude::RuntimeError;
use gust_plan::prelude::{LoopCount, ScenarioSpec, TestPlan};

use crate::delta::ScenarioDelta;

/// Where a scenario sits in its lifecycle. The enabled flag is orthogonal: disabling a scenario
/// forces it to `Draining` from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioPhase {
    Pending,
    Ramping,
    Sustaining,
    Draining,
    Stopped,
}

/// Runtime record for one scenario: the immutable shape parameters from the plan plus the
/// mutable coordination state.
#[derive(Debug, Clone)]
pub struct ScenarioRuntime {
    pub id: String,
    pub users: u32,
    pub ramp_up_s: u64,
    pub sustain_s: u64,
    pub loop_count: LoopCount,
    pub weight: u32,
    pub enabled: bool,
    pub phase: ScenarioPhase,
    /// Instantaneous target population, recomputed by the coordinator each tick.
    pub target: u32,
    /// Version of the last applied delta, for idempotent application on workers.
    pub applied_version: u64,
}

impl ScenarioRuntime {
    fn from_spec(spec: &ScenarioSpec) -> Self {
        Self {
            id: spec.id.clone(),
            users: spec.users,
            ramp_up_s: spec.ramp_up_s,
            sustain_s: spec.sustain_s,
            loop_count: spec.loop_count,
            weight: spec.weight,
            enabled: spec.enabled,
            phase: ScenarioPhase::Pending,
            target: 0,
            applied_version: 0,
        }
    }
}

/// The per-process view of all scenarios. The master mutates it through the control plane;
/// each worker holds its own copy and mutates it only by applying broadcast deltas.
#[derive(Debug, Clone, Default)]
pub struct ScenarioRegistry {
    scenarios: BTreeMap<String, ScenarioRuntime>,
}

impl ScenarioRegistry {
    pub fn from_plan(plan: &TestPlan) -> Self {
        Self {
            scenarios: plan
                .scenarios
                .iter()
                .map(|spec| (spec.id.clone(), ScenarioRuntime::from_spec(spec)))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ScenarioRuntime> {
        self.scenarios.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScenarioRuntime> {
        self.scenarios.values()
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut ScenarioRuntime> {
        self.scenarios.get_mut(id)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut ScenarioRuntime> {
        self.scenarios.values_mut()
    }

    /// Records that a draining scenario has no users left on this worker. `Stopped` is
    /// terminal; re-enabling requires a fresh delta which moves the phase forward again.
    pub fn mark_stopped(&mut self, id: &str) {
        if let Some(scenario) = self.scenarios.get_mut(id) {
            if scenario.phase == ScenarioPhase::Draining {
                scenario.phase = ScenarioPhase::Stopped;
            }
        }
    }

    /// Applies one scenario-state delta. This is the worker-side reducer: a pure state
    /// transition with no side effects, safe to replay.
    ///
    /// Returns `Ok(true)` when the delta changed state, `Ok(false)` for a duplicate or stale
    /// delta (same or older version), and [`RuntimeError::BroadcastApplyConflict`] for an
    /// unknown scenario id, which callers log and drop.
    pub fn apply_delta(&mut self, delta: &ScenarioDelta) -> Result<bool, RuntimeError> {
        let scenario =
            self.scenarios
                .get_mut(&delta.scenario_id)
                .ok_or(RuntimeError::BroadcastApplyConflict {
                    scenario: delta.scenario_id.clone(),
                })?;

        if delta.version <= scenario.applied_version {
            return Ok(false);
        }

        scenario.applied_version = delta.version;
        scenario.enabled = delta.enabled;
        scenario.target = delta.target_population;
        scenario.phase = next_phase(scenario);
        Ok(true)
    }
}

/// Derives the lifecycle phase implied by a scenario's post-delta state. Workers do not receive
/// phases over the wire; they infer them, which keeps the delta format minimal and the reducer
/// deterministic.
fn next_phase(scenario: &ScenarioRuntime) -> ScenarioPhase {
    if !scenario.enabled {
        return match scenario.phase {
            ScenarioPhase::Stopped => ScenarioPhase::Stopped,
            _ => ScenarioPhase::Draining,
        };
    }
    match scenario.target {
        0 => match scenario.phase {
            ScenarioPhase::Pending | ScenarioPhase::Stopped => scenario.phase,
            _ => ScenarioPhase::Draining,
        },
        t if t >= scenario.users => ScenarioPhase::Sustaining,
        _ => ScenarioPhase::Ramping,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn two_scenario_plan() -> TestPlan {
        serde_json::from_value(serde_json::json!({
            "name": "two-scripts",
            "scenarios": [
                {
                    "id": "read",
                    "name": "Address CRUD - READ",
                    "users": 10,
                    "ramp_up_s": 5,
                    "sustain_s": 55,
                    "script": []
                },
                {
                    "id": "create",
                    "name": "Address CRUD - CREATE",
                    "users": 4,
                    "ramp_up_s": 4,
                    "sustain_s": 56,
                    "loop_count": { "finite": 3 },
                    "script": []
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn registry_starts_pending_with_zero_targets() {
        let registry = ScenarioRegistry::from_plan(&two_scenario_plan());

        let read = registry.get("read").unwrap();
        assert_eq!(read.phase, ScenarioPhase::Pending);
        assert_eq!(read.target, 0);
        assert!(read.enabled);
        assert_eq!(registry.iter().count(), 2);
    }

    #[test]
    fn applying_the_same_delta_twice_is_a_no_op() {
        let mut registry = ScenarioRegistry::from_plan(&two_scenario_plan());
        let delta = ScenarioDelta {
            version: 1,
            scenario_id: "read".to_string(),
            enabled: true,
            target_population: 6,
        };

        assert!(registry.apply_delta(&delta).unwrap());
        let after_first = registry.get("read").unwrap().clone();

        assert!(!registry.apply_delta(&delta).unwrap());
        let after_second = registry.get("read").unwrap();

        assert_eq!(after_first.target, after_second.target);
        assert_eq!(after_first.enabled, after_second.enabled);
        assert_eq!(after_first.phase, after_second.phase);
        assert_eq!(after_first.applied_version, after_second.applied_version);
    }

    #[test]
    fn stale_deltas_are_dropped() {
        let mut registry = ScenarioRegistry::from_plan(&two_scenario_plan());

        registry
            .apply_delta(&ScenarioDelta {
                version: 5,
                scenario_id: "read".to_string(),
                enabled: true,
                target_population: 8,
            })
            .unwrap();

        // An older delta arriving late (at-least-once redelivery) must not rewind state.
        let changed = registry
            .apply_delta(&ScenarioDelta {
                version: 3,
                scenario_id: "read".to_string(),
                enabled: false,
                target_population: 0,
            })
            .unwrap();

        assert!(!changed);
        assert_eq!(registry.get("read").unwrap().target, 8);
        assert!(registry.get("read").unwrap().enabled);
    }

    #[test]
    fn unknown_scenario_is_a_conflict() {
        let mut registry = ScenarioRegistry::from_plan(&two_scenario_plan());
        let err = registry
            .apply_delta(&ScenarioDelta {
                version: 1,
                scenario_id: "nope".to_string(),
                enabled: true,
                target_population: 1,
            })
            .unwrap_err();
        assert!(matches!(err, RuntimeError::BroadcastApplyConflict { .. }));
    }

    #[test]
    fn disable_delta_forces_draining() {
        let mut registry = ScenarioRegistry::from_plan(&two_scenario_plan());

        registry
            .apply_delta(&ScenarioDelta {
                version: 1,
                scenario_id: "read".to_string(),
                enabled: true,
                target_population: 6,
            })
            .unwrap();
        assert_eq!(registry.get("read").unwrap().phase, ScenarioPhase::Ramping);

        registry
            .apply_delta(&ScenarioDelta {
                version: 2,
                scenario_id: "read".to_string(),
                enabled: false,
                target_population: 0,
            })
            .unwrap();
        assert_eq!(registry.get("read").unwrap().phase, ScenarioPhase::Draining);
    }
}
