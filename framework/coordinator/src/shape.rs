use std::collections::BTreeMap;
use std::time::Duration;

use crate::registry::{ScenarioPhase, ScenarioRegistry, ScenarioRuntime};

/// Tuning for the master's load-shape loop.
#[derive(Debug, Clone, Copy)]
pub struct LoadShapeConfig {
    /// How often the master recomputes targets and publishes deltas.
    pub tick_interval: Duration,
    /// Upper bound on the overall spawn rate, users per second. Reaching a large target is
    /// spread over several ticks instead of opening every connection at once.
    pub max_spawn_rate: f64,
}

impl Default for LoadShapeConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_spawn_rate: 100.0,
        }
    }
}

/// Read-only view of the aggregate load state after one tick. This is what the master exposes
/// to operators and what sizing decisions are made from; workers never mutate it.
#[derive(Debug, Clone, Default)]
pub struct LoadSnapshot {
    pub elapsed: Duration,
    /// Instantaneous target population per scenario.
    pub targets: BTreeMap<String, u32>,
    pub total_target: u32,
    /// Users per second needed to reach `total_target` from the current population within one
    /// tick, bounded by the configured maximum.
    pub spawn_rate: f64,
}

/// Computes time-varying population targets for every enabled scenario.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadShapeCoordinator {
    config: LoadShapeConfig,
}

impl LoadShapeCoordinator {
    pub fn new(config: LoadShapeConfig) -> Self {
        Self { config }
    }

    /// Recomputes each scenario's target for the given elapsed run time and derives the
    /// aggregate snapshot. `current_population` is the live user count aggregated across
    /// workers.
    pub fn tick(
        &self,
        registry: &mut ScenarioRegistry,
        elapsed: Duration,
        current_population: u32,
    ) -> LoadSnapshot {
        let mut targets = BTreeMap::new();
        let mut total_target = 0u32;

        for scenario in registry.iter_mut() {
            let (target, phase) = if scenario.enabled {
                shape_at(scenario, elapsed)
            } else {
                // Disabling zeroes the target immediately; in-flight iterations finish on the
                // workers before their users are torn down.
                let phase = match scenario.phase {
                    ScenarioPhase::Stopped => ScenarioPhase::Stopped,
                    _ => ScenarioPhase::Draining,
                };
                (0, phase)
            };

            scenario.target = target;
            scenario.phase = phase;
            targets.insert(scenario.id.clone(), target);
            total_target += target;
        }

        LoadSnapshot {
            elapsed,
            targets,
            total_target,
            spawn_rate: self.spawn_rate(total_target, current_population),
        }
    }

    /// The smallest rate that reaches the aggregate target within one tick, floored at one user
    /// per second so an enabled scenario always makes progress, and capped to avoid connection
    /// storms.
    fn spawn_rate(&self, total_target: u32, current_population: u32) -> f64 {
        let deficit = total_target.saturating_sub(current_population);
        if deficit == 0 {
            return 0.0;
        }
        let rate = deficit as f64 / self.config.tick_interval.as_secs_f64();
        rate.clamp(1.0, self.config.max_spawn_rate)
    }
}

/// The piecewise population function for one scenario: linear ramp from 0 to `users` over the
/// ramp window, held through the sustain window, then wound down to 0. For unbounded scenarios
/// the whole window repeats instead of winding down.
fn shape_at(scenario: &ScenarioRuntime, elapsed: Duration) -> (u32, ScenarioPhase) {
    let ramp = scenario.ramp_up_s as f64;
    let cycle = (scenario.ramp_up_s + scenario.sustain_s) as f64;
    let t = elapsed.as_secs_f64();

    if cycle == 0.0 {
        // Degenerate shape: no ramp, no sustain window. Hold the target for unbounded
        // scenarios, wind down immediately for finite ones.
        return if scenario.loop_count.is_unbounded() {
            (scenario.users, ScenarioPhase::Sustaining)
        } else {
            (0, ScenarioPhase::Draining)
        };
    }

    let in_cycle = if scenario.loop_count.is_unbounded() {
        t % cycle
    } else {
        t
    };

    if in_cycle < ramp {
        let target = ((in_cycle / ramp) * scenario.users as f64) as u32;
        (target, ScenarioPhase::Ramping)
    } else if in_cycle < cycle {
        (scenario.users, ScenarioPhase::Sustaining)
    } else {
        (0, ScenarioPhase::Draining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gust_plan::prelude::TestPlan;
    use pretty_assertions::assert_eq;

    fn plan() -> TestPlan {
        serde_json::from_value(serde_json::json!({
            "name": "shape",
            "scenarios": [
                {
                    "id": "read",
                    "name": "read",
                    "users": 10,
                    "ramp_up_s": 10,
                    "sustain_s": 50,
                    "script": []
                },
                {
                    "id": "create",
                    "name": "create",
                    "users": 4,
                    "ramp_up_s": 8,
                    "sustain_s": 52,
                    "loop_count": { "finite": 3 },
                    "script": []
                }
            ]
        }))
        .unwrap()
    }

    fn coordinator() -> LoadShapeCoordinator {
        LoadShapeCoordinator::new(LoadShapeConfig::default())
    }

    #[test]
    fn ramp_is_linear_from_zero_to_target() {
        let mut registry = ScenarioRegistry::from_plan(&plan());
        let coordinator = coordinator();

        let snapshot = coordinator.tick(&mut registry, Duration::from_secs(0), 0);
        assert_eq!(snapshot.targets["read"], 0);

        let snapshot = coordinator.tick(&mut registry, Duration::from_secs(5), 0);
        assert_eq!(snapshot.targets["read"], 5);
        assert_eq!(registry.get("read").unwrap().phase, ScenarioPhase::Ramping);

        let snapshot = coordinator.tick(&mut registry, Duration::from_secs(20), 0);
        assert_eq!(snapshot.targets["read"], 10);
        assert_eq!(
            registry.get("read").unwrap().phase,
            ScenarioPhase::Sustaining
        );
    }

    #[test]
    fn finite_scenarios_wind_down_after_the_sustain_window() {
        let mut registry = ScenarioRegistry::from_plan(&plan());
        let coordinator = coordinator();

        let snapshot = coordinator.tick(&mut registry, Duration::from_secs(90), 0);
        assert_eq!(snapshot.targets["create"], 0);
        assert_eq!(
            registry.get("create").unwrap().phase,
            ScenarioPhase::Draining
        );
        // The unbounded scenario has wrapped into a fresh cycle instead.
        assert_eq!(
            registry.get("read").unwrap().phase,
            ScenarioPhase::Sustaining
        );
    }

    #[test]
    fn unbounded_scenarios_repeat_their_shape() {
        let mut registry = ScenarioRegistry::from_plan(&plan());
        let coordinator = coordinator();

        // 65s into a 60s cycle is 5s into the second ramp.
        let snapshot = coordinator.tick(&mut registry, Duration::from_secs(65), 0);
        assert_eq!(snapshot.targets["read"], 5);
    }

    #[test]
    fn total_target_sums_enabled_scenarios_only() {
        let mut registry = ScenarioRegistry::from_plan(&plan());
        let coordinator = coordinator();

        let snapshot = coordinator.tick(&mut registry, Duration::from_secs(30), 0);
        assert_eq!(snapshot.total_target, 14);

        registry.get_mut("create").unwrap().enabled = false;
        let snapshot = coordinator.tick(&mut registry, Duration::from_secs(30), 14);
        assert_eq!(snapshot.total_target, 10);
        assert_eq!(snapshot.targets["create"], 0);
        assert_eq!(
            registry.get("create").unwrap().phase,
            ScenarioPhase::Draining
        );
    }

    #[test]
    fn spawn_rate_reaches_the_deficit_within_one_tick_but_is_capped() {
        let coordinator = LoadShapeCoordinator::new(LoadShapeConfig {
            tick_interval: Duration::from_secs(2),
            max_spawn_rate: 10.0,
        });

        // Deficit of 12 over a 2s tick needs 6 users/s.
        assert_eq!(coordinator.spawn_rate(12, 0), 6.0);
        // A huge deficit hits the cap.
        assert_eq!(coordinator.spawn_rate(1000, 0), 10.0);
        // At target, nothing to spawn.
        assert_eq!(coordinator.spawn_rate(10, 10), 0.0);
        // Small deficits still make progress.
        assert_eq!(coordinator.spawn_rate(1, 0), 1.0);
    }
}
