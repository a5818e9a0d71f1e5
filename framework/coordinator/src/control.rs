use std::collections::HashMap;
use std::time::{Duration, Instant};

use gust_core::prelude::RuntimeError;
use gust_plan::prelude::TestPlan;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::delta::ScenarioDelta;
use crate::registry::ScenarioRegistry;
use crate::shape::{LoadShapeConfig, LoadShapeCoordinator, LoadSnapshot};

/// The master side of scenario coordination.
///
/// Owns the authoritative [`ScenarioRegistry`], ticks the load shape, accepts enable/disable
/// commands and publishes every state change as a versioned delta. Ticks and commands are
/// serialized against each other through one lock; worker request loops are never involved.
pub struct ControlPlane {
    inner: Mutex<Inner>,
    coordinator: LoadShapeCoordinator,
    sender: broadcast::Sender<ScenarioDelta>,
    started: Instant,
}

struct Inner {
    registry: ScenarioRegistry,
    next_version: u64,
    snapshot: LoadSnapshot,
    /// Last reported active population per worker, aggregated for spawn-rate computation.
    worker_populations: HashMap<String, u32>,
}

impl ControlPlane {
    pub fn new(plan: &TestPlan, config: LoadShapeConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                registry: ScenarioRegistry::from_plan(plan),
                next_version: 1,
                snapshot: LoadSnapshot::default(),
                worker_populations: HashMap::new(),
            }),
            coordinator: LoadShapeCoordinator::new(config),
            sender: broadcast::channel(256).0,
            started: Instant::now(),
        }
    }

    /// Subscribes a worker to the delta stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ScenarioDelta> {
        self.sender.subscribe()
    }

    /// Enables or disables a scenario. Disabling zeroes its target immediately and the workers
    /// drain it without cancelling in-flight iterations. The resulting delta is published
    /// before this returns.
    pub fn set_enabled(&self, scenario_id: &str, enabled: bool) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock();
        let scenario =
            inner
                .registry
                .get_mut(scenario_id)
                .ok_or(RuntimeError::BroadcastApplyConflict {
                    scenario: scenario_id.to_string(),
                })?;

        scenario.enabled = enabled;
        if !enabled {
            scenario.target = 0;
        }
        log::info!("Scenario {scenario_id} {}", if enabled { "enabled" } else { "disabled" });

        let delta = ScenarioDelta {
            version: 0,
            scenario_id: scenario_id.to_string(),
            enabled,
            target_population: scenario.target,
        };
        self.publish(&mut inner, delta);
        Ok(())
    }

    /// Records one worker's current active population. The aggregate feeds the next tick's
    /// spawn-rate computation.
    pub fn report_worker_population(&self, worker_id: &str, population: u32) {
        self.inner
            .lock()
            .worker_populations
            .insert(worker_id.to_string(), population);
    }

    /// Runs one coordination tick against the wall clock.
    pub fn tick(&self) -> LoadSnapshot {
        self.tick_at(self.started.elapsed())
    }

    /// Runs one coordination tick at an explicit elapsed time. Targets are recomputed, changed
    /// scenarios are published as deltas, and the refreshed snapshot is returned.
    pub fn tick_at(&self, elapsed: Duration) -> LoadSnapshot {
        let mut inner = self.inner.lock();

        let before: HashMap<String, (bool, u32)> = inner
            .registry
            .iter()
            .map(|s| (s.id.clone(), (s.enabled, s.target)))
            .collect();

        let population = inner.worker_populations.values().sum();
        let mut registry = std::mem::take(&mut inner.registry);
        let snapshot = self.coordinator.tick(&mut registry, elapsed, population);
        inner.registry = registry;

        let changed: Vec<ScenarioDelta> = inner
            .registry
            .iter()
            .filter(|s| before.get(&s.id) != Some(&(s.enabled, s.target)))
            .map(|s| ScenarioDelta {
                version: 0,
                scenario_id: s.id.clone(),
                enabled: s.enabled,
                target_population: s.target,
            })
            .collect();
        for delta in changed {
            self.publish(&mut inner, delta);
        }

        inner.snapshot = snapshot.clone();
        snapshot
    }

    /// Read-only view of the aggregate load state as of the last tick.
    pub fn snapshot(&self) -> LoadSnapshot {
        self.inner.lock().snapshot.clone()
    }

    /// The full registry state as freshly versioned deltas. Used to resync a worker whose
    /// receiver lagged behind the broadcast channel.
    pub fn full_sync(&self) -> Vec<ScenarioDelta> {
        let mut inner = self.inner.lock();
        let deltas: Vec<ScenarioDelta> = inner
            .registry
            .iter()
            .map(|s| ScenarioDelta {
                version: 0,
                scenario_id: s.id.clone(),
                enabled: s.enabled,
                target_population: s.target,
            })
            .collect();
        deltas
            .into_iter()
            .map(|mut delta| {
                delta.version = Self::take_version(&mut inner);
                delta
            })
            .collect()
    }

    fn publish(&self, inner: &mut Inner, mut delta: ScenarioDelta) {
        delta.version = Self::take_version(inner);
        if self.sender.send(delta.clone()).is_err() {
            // No workers subscribed yet; they will catch up from a full sync.
            log::debug!("No subscribers for delta {delta:?}");
        }
    }

    fn take_version(inner: &mut Inner) -> u64 {
        let version = inner.next_version;
        inner.next_version += 1;
        version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn plan() -> TestPlan {
        serde_json::from_value(serde_json::json!({
            "name": "control",
            "scenarios": [{
                "id": "read",
                "name": "read",
                "users": 10,
                "ramp_up_s": 10,
                "sustain_s": 50,
                "script": []
            }]
        }))
        .unwrap()
    }

    #[test]
    fn tick_publishes_deltas_for_changed_targets() {
        let control = ControlPlane::new(&plan(), LoadShapeConfig::default());
        let mut receiver = control.subscribe();

        let snapshot = control.tick_at(Duration::from_secs(5));
        assert_eq!(snapshot.targets["read"], 5);

        let delta = receiver.try_recv().unwrap();
        assert_eq!(delta.scenario_id, "read");
        assert_eq!(delta.target_population, 5);
        assert!(delta.enabled);

        // An identical tick produces no new delta.
        control.tick_at(Duration::from_secs(5));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn versions_increase_monotonically() {
        let control = ControlPlane::new(&plan(), LoadShapeConfig::default());
        let mut receiver = control.subscribe();

        control.tick_at(Duration::from_secs(2));
        control.tick_at(Duration::from_secs(4));
        control.tick_at(Duration::from_secs(6));

        let mut last = 0;
        while let Ok(delta) = receiver.try_recv() {
            assert!(delta.version > last);
            last = delta.version;
        }
        assert!(last >= 3);
    }

    #[test]
    fn disable_zeroes_the_target_and_publishes() {
        let control = ControlPlane::new(&plan(), LoadShapeConfig::default());
        control.tick_at(Duration::from_secs(30));
        let mut receiver = control.subscribe();

        control.set_enabled("read", false).unwrap();
        let delta = receiver.try_recv().unwrap();
        assert!(!delta.enabled);
        assert_eq!(delta.target_population, 0);

        // The next tick keeps the disabled scenario at zero.
        let snapshot = control.tick_at(Duration::from_secs(31));
        assert_eq!(snapshot.targets["read"], 0);
    }

    #[test]
    fn unknown_scenario_command_is_rejected() {
        let control = ControlPlane::new(&plan(), LoadShapeConfig::default());
        assert!(control.set_enabled("nope", true).is_err());
    }

    #[test]
    fn full_sync_rebuilds_a_lagged_worker() {
        let control = ControlPlane::new(&plan(), LoadShapeConfig::default());
        control.tick_at(Duration::from_secs(30));

        let mut registry = ScenarioRegistry::from_plan(&plan());
        for delta in control.full_sync() {
            registry.apply_delta(&delta).unwrap();
        }
        assert_eq!(registry.get("read").unwrap().target, 10);
    }

    #[test]
    fn spawn_rate_accounts_for_reported_worker_populations() {
        let control = ControlPlane::new(&plan(), LoadShapeConfig::default());

        let snapshot = control.tick_at(Duration::from_secs(30));
        assert_eq!(snapshot.spawn_rate, 10.0);

        control.report_worker_population("worker-a", 6);
        control.report_worker_population("worker-b", 4);
        let snapshot = control.tick_at(Duration::from_secs(31));
        assert_eq!(snapshot.spawn_rate, 0.0);
    }
}
