use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use gust_coordinator::prelude::{ScenarioDelta, ScenarioPhase, ScenarioRegistry};
use gust_core::prelude::{ShutdownHandle, UserBailError};
use gust_engine::prelude::{UserContext, UserId};
use gust_plan::prelude::{LoopCount, TestPlan};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;

use crate::interpret::Interpreter;

/// Runs the virtual-user population of one worker process.
///
/// The agent keeps a local [`ScenarioRegistry`] copy that is only ever mutated by applying
/// broadcast deltas, and reconciles its running users toward the per-scenario targets each
/// tick. Users are stopped cooperatively: they observe their stop flag between iterations, so a
/// request already in flight always completes or times out on its own terms, and a stopped user
/// keeps counting toward the population until its task actually finishes.
pub struct WorkerAgent {
    id: String,
    plan: Arc<TestPlan>,
    interpreter: Arc<Interpreter>,
    registry: Mutex<ScenarioRegistry>,
    users: Mutex<HashMap<String, ScenarioUsers>>,
    failures: Arc<FailureTracker>,
    retired: Arc<Mutex<HashMap<String, u32>>>,
    next_user: AtomicU32,
    shutdown: ShutdownHandle,
    seed: Option<u64>,
}

struct ActiveUser {
    stop: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

/// The live users of one scenario on this worker. Draining users no longer count against the
/// target but stay tracked until their tasks finish, so the reported population always covers
/// in-flight iterations.
#[derive(Default)]
struct ScenarioUsers {
    running: Vec<ActiveUser>,
    draining: Vec<ActiveUser>,
}

impl ScenarioUsers {
    fn prune_finished(&mut self) {
        self.running.retain(|user| !user.handle.is_finished());
        self.draining.retain(|user| !user.handle.is_finished());
    }

    fn total(&self) -> u32 {
        (self.running.len() + self.draining.len()) as u32
    }
}

/// Accumulates iteration failures per scenario and trips an abort once a scenario reaches its
/// configured `max_failures` limit. Scenarios without a limit never trip.
#[derive(Debug, Default)]
struct FailureTracker {
    limits: HashMap<String, u64>,
    counts: Mutex<HashMap<String, u64>>,
    aborted: Mutex<HashSet<String>>,
    tripped: Mutex<Vec<String>>,
}

impl FailureTracker {
    fn new(plan: &TestPlan) -> Self {
        Self {
            limits: plan
                .scenarios
                .iter()
                .filter_map(|s| s.max_failures.map(|limit| (s.id.clone(), limit)))
                .collect(),
            ..Default::default()
        }
    }

    /// Adds `count` failures against `scenario`. Returns true exactly once, on the call that
    /// crosses the scenario's limit.
    fn record(&self, scenario: &str, count: u64) -> bool {
        let Some(&limit) = self.limits.get(scenario) else {
            return false;
        };
        let mut counts = self.counts.lock();
        let total = counts.entry(scenario.to_string()).or_default();
        *total += count;
        if *total >= limit && self.aborted.lock().insert(scenario.to_string()) {
            self.tripped.lock().push(scenario.to_string());
            return true;
        }
        false
    }

    fn is_aborted(&self, scenario: &str) -> bool {
        self.aborted.lock().contains(scenario)
    }

    fn take_tripped(&self) -> Vec<String> {
        std::mem::take(&mut *self.tripped.lock())
    }
}

impl WorkerAgent {
    pub fn new(
        id: impl Into<String>,
        plan: Arc<TestPlan>,
        interpreter: Arc<Interpreter>,
        shutdown: ShutdownHandle,
        seed: Option<u64>,
    ) -> Self {
        Self {
            id: id.into(),
            interpreter,
            registry: Mutex::new(ScenarioRegistry::from_plan(&plan)),
            users: Mutex::new(HashMap::new()),
            failures: Arc::new(FailureTracker::new(&plan)),
            retired: Arc::new(Mutex::new(HashMap::new())),
            next_user: AtomicU32::new(0),
            shutdown,
            seed,
            plan,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Applies one scenario-state delta to the local registry. This is a bounded lock-and-swap:
    /// request execution never waits on it. Unknown scenario ids are logged and dropped,
    /// duplicates are no-ops.
    pub fn apply_delta(&self, delta: &ScenarioDelta) {
        match self.registry.lock().apply_delta(delta) {
            Ok(true) => log::debug!(
                "{}: scenario {} -> enabled={} target={}",
                self.id,
                delta.scenario_id,
                delta.enabled,
                delta.target_population
            ),
            Ok(false) => log::trace!("{}: ignoring duplicate delta v{}", self.id, delta.version),
            Err(e) => log::warn!("{}: dropping delta: {e}", self.id),
        }
    }

    /// A point-in-time copy of the worker's scenario view, for reporting and tests.
    pub fn registry_snapshot(&self) -> ScenarioRegistry {
        self.registry.lock().clone()
    }

    /// Current number of live virtual users across all scenarios, draining ones included. This
    /// only reaches zero once every user task, in-flight iterations and all, has finished.
    pub fn active_population(&self) -> u32 {
        let mut users = self.users.lock();
        for scenario in users.values_mut() {
            scenario.prune_finished();
        }
        users.values().map(ScenarioUsers::total).sum()
    }

    /// Scenario ids that crossed their failure limit since the last call. The caller is
    /// expected to disable them through the control plane.
    pub fn take_tripped(&self) -> Vec<String> {
        self.failures.take_tripped()
    }

    /// Moves the running population toward the per-scenario targets: signals surplus users to
    /// drain and spawns missing ones, at most `spawn_budget` new users in this tick. When the
    /// budget cannot cover every deficit it is split proportionally to scenario weights.
    ///
    /// Users that retired on their own (a stop-user dataset policy, a completed finite loop)
    /// lower the effective target instead of being replaced, and a scenario past its failure
    /// limit is held at zero.
    pub fn reconcile(&self, spawn_budget: u32) {
        let scenarios: Vec<(String, u32, u32)> = {
            let registry = self.registry.lock();
            registry
                .iter()
                .map(|s| (s.id.clone(), s.target, s.weight))
                .collect()
        };

        let retired = self.retired.lock().clone();
        let mut users = self.users.lock();

        // Drain surpluses first; that never consumes budget.
        let mut deficits: Vec<(String, u32, u32)> = Vec::new();
        for (id, target, weight) in &scenarios {
            let entry = users.entry(id.clone()).or_default();
            entry.prune_finished();

            let mut effective = target.saturating_sub(retired.get(id).copied().unwrap_or(0));
            if self.failures.is_aborted(id) {
                effective = 0;
            }

            let current = entry.running.len() as u32;
            if current > effective {
                for user in entry.running.drain(effective as usize..) {
                    // The user observes the flag between iterations; until its task finishes
                    // it stays tracked and keeps counting toward the population.
                    let _ = user.stop.send(true);
                    log::debug!("{}: draining a user from scenario {id}", self.id);
                    entry.draining.push(user);
                }
            } else if current < effective {
                deficits.push((id.clone(), effective - current, *weight));
            }
        }

        for (id, grant) in allocate_budget(&deficits, spawn_budget) {
            for _ in 0..grant {
                let user = self.spawn_user(&id);
                users.entry(id.clone()).or_default().running.push(user);
            }
        }

        // A drained scenario is fully stopped on this worker only once every one of its user
        // tasks, draining ones included, has finished.
        let mut registry = self.registry.lock();
        let drained: Vec<String> = registry
            .iter()
            .filter(|s| {
                s.phase == ScenarioPhase::Draining
                    && users.get(&s.id).map_or(true, |u| u.total() == 0)
            })
            .map(|s| s.id.clone())
            .collect();
        for id in drained {
            registry.mark_stopped(&id);
        }
    }

    /// Signals every user to stop after its current iteration and waits for them to finish.
    pub async fn drain_all(&self) {
        let users: Vec<ActiveUser> = {
            let mut users = self.users.lock();
            users
                .drain()
                .flat_map(|(_, scenario)| scenario.running.into_iter().chain(scenario.draining))
                .collect()
        };
        for user in &users {
            let _ = user.stop.send(true);
        }
        for user in users {
            if let Err(e) = user.handle.await {
                log::error!("{}: user task panicked: {e:?}", self.id);
            }
        }
    }

    fn spawn_user(&self, scenario_id: &str) -> ActiveUser {
        let (stop, stop_rx) = watch::channel(false);
        let user_id = UserId(self.next_user.fetch_add(1, Ordering::Relaxed));

        let plan = self.plan.clone();
        let interpreter = self.interpreter.clone();
        let failures = self.failures.clone();
        let retired = self.retired.clone();
        let scenario_id = scenario_id.to_string();
        let mut shutdown_listener = self.shutdown.new_listener();
        let seed = self.seed;
        let worker_id = self.id.clone();

        let handle = tokio::spawn(async move {
            let Some(spec) = plan.scenario(&scenario_id) else {
                log::error!("Scenario {scenario_id} missing from plan, user not started");
                return;
            };

            let mut user = UserContext::new(user_id);
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(user_id.0 as u64)),
                None => StdRng::from_entropy(),
            };
            log::debug!("{user_id} starting for scenario {scenario_id}");

            loop {
                // Stop checks happen only between iterations, never mid-request.
                if *stop_rx.borrow() || shutdown_listener.should_shutdown() {
                    break;
                }
                if failures.is_aborted(&scenario_id) {
                    break;
                }

                match interpreter.run_iteration(&spec.script, &mut user, &mut rng).await {
                    Ok(0) => {}
                    Ok(count) => {
                        if failures.record(&scenario_id, count) {
                            log::warn!(
                                "{worker_id}: scenario {scenario_id} reached its failure limit, aborting it"
                            );
                        }
                    }
                    Err(e) if e.is::<UserBailError>() => {
                        log::debug!("{user_id} bailed: {e}");
                        *retired.lock().entry(scenario_id.clone()).or_default() += 1;
                        break;
                    }
                    Err(e) => {
                        log::error!("{user_id} iteration failed: {e:?}");
                    }
                }

                if let LoopCount::Finite(limit) = spec.loop_count {
                    if user.iteration() >= limit as u64 {
                        log::debug!("{user_id} completed all {limit} iterations");
                        *retired.lock().entry(scenario_id.clone()).or_default() += 1;
                        break;
                    }
                }
            }
        });

        ActiveUser { stop, handle }
    }
}

/// Splits `budget` across scenarios with outstanding deficits, proportionally to their weights,
/// never granting more than a scenario's deficit. Leftover budget from capped scenarios flows to
/// the rest.
fn allocate_budget(deficits: &[(String, u32, u32)], budget: u32) -> Vec<(String, u32)> {
    let total_deficit: u32 = deficits.iter().map(|(_, d, _)| d).sum();
    if total_deficit <= budget {
        return deficits.iter().map(|(id, d, _)| (id.clone(), *d)).collect();
    }

    let total_weight: u32 = deficits.iter().map(|(_, _, w)| w).sum::<u32>().max(1);
    let mut grants: Vec<(String, u32)> = deficits
        .iter()
        .map(|(id, deficit, weight)| {
            let share = (budget as u64 * *weight as u64 / total_weight as u64) as u32;
            (id.clone(), share.min(*deficit))
        })
        .collect();

    // Hand out whatever rounding left over, one user at a time.
    let mut remaining = budget.saturating_sub(grants.iter().map(|(_, g)| g).sum());
    while remaining > 0 {
        let mut granted_any = false;
        for ((id, deficit, _), grant) in deficits.iter().zip(grants.iter_mut()) {
            debug_assert_eq!(id, &grant.0);
            if remaining == 0 {
                break;
            }
            if grant.1 < *deficit {
                grant.1 += 1;
                remaining -= 1;
                granted_any = true;
            }
        }
        if !granted_any {
            break;
        }
    }

    grants.retain(|(_, g)| *g > 0);
    grants
}
