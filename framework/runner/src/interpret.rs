use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use gust_core::prelude::{RuntimeError, UserBailError};
use gust_engine::prelude::{
    render_body, render_text, sample_think_time, CorrelationEngine, DatasetPool,
    ThroughputTimerRegistry, UserContext, VariableStore,
};
use gust_plan::prelude::{BodyTemplate, PlanNode, RequestTemplate, TestPlan};
use rand::rngs::StdRng;
use rand::Rng;

use crate::transport::{ResolvedRequest, Transport};

/// Run-wide request counters, shared by every virtual user on this worker.
#[derive(Debug, Default)]
pub struct RunStats {
    requests: AtomicU64,
    failures: AtomicU64,
}

impl RunStats {
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn bump_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn bump_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Evaluates plan graphs for virtual users.
///
/// One interpreter serves the whole worker; all per-user state arrives through the
/// [`UserContext`] argument. Within one user, nodes execute strictly in plan order, so a value
/// extracted by request N is visible to request N+1.
pub struct Interpreter {
    store: Arc<VariableStore>,
    correlator: CorrelationEngine,
    datasets: DatasetPool,
    timers: ThroughputTimerRegistry,
    transport: Arc<dyn Transport>,
    stats: Arc<RunStats>,
}

impl Interpreter {
    pub fn new(plan: &TestPlan, transport: Arc<dyn Transport>) -> Self {
        Self {
            store: Arc::new(VariableStore::new(plan.user_defined.clone())),
            correlator: CorrelationEngine::new(),
            datasets: DatasetPool::new(plan.datasets.iter().cloned()),
            timers: ThroughputTimerRegistry::new(),
            transport,
            stats: Arc::new(RunStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<RunStats> {
        self.stats.clone()
    }

    pub fn store(&self) -> &Arc<VariableStore> {
        &self.store
    }

    /// Runs one full iteration of `script` for one virtual user: dataset row assignment, then
    /// every node in plan order.
    ///
    /// Contained errors (an unresolved variable, a failed check, a transport failure) are
    /// recorded and the iteration simply ends; the user proceeds to its next iteration. The
    /// number of failures recorded during the iteration is returned so callers can hold
    /// scenarios to their failure limits. The only error surfaced is a [`UserBailError`],
    /// raised when a stop-user dataset policy fires.
    pub async fn run_iteration(
        &self,
        script: &[PlanNode],
        user: &mut UserContext,
        rng: &mut StdRng,
    ) -> anyhow::Result<u64> {
        user.begin_iteration();

        if let Err(e) = self.datasets.assign_rows(user, rng) {
            return match e {
                RuntimeError::DatasetExhausted { .. } => {
                    log::info!("{}: {e}, stopping this user", user.id());
                    Err(UserBailError::new(e.to_string()).into())
                }
                other => Err(other.into()),
            };
        }

        let mut failures = 0;
        if let Err(e) = self.run_nodes(script, user, rng, &mut failures).await {
            // Fatal to this request chain only. Record it and let the user start over.
            self.stats.bump_failures();
            failures += 1;
            log::error!(
                "{} iteration {} aborted: {e}",
                user.id(),
                user.iteration()
            );
        }
        Ok(failures)
    }

    fn run_nodes<'a>(
        &'a self,
        nodes: &'a [PlanNode],
        user: &'a mut UserContext,
        rng: &'a mut StdRng,
        failures: &'a mut u64,
    ) -> BoxFuture<'a, Result<(), RuntimeError>> {
        Box::pin(async move {
            for node in nodes {
                match node {
                    PlanNode::Request(template) => {
                        self.run_request(template, user, rng, failures).await?
                    }
                    PlanNode::Loop { count, body } => {
                        for _ in 0..*count {
                            self.run_nodes(body, user, rng, failures).await?;
                        }
                    }
                    PlanNode::Conditional {
                        variable,
                        equals,
                        then_branch,
                        else_branch,
                    } => {
                        // A variable no tier can resolve takes the else branch.
                        let matched = self
                            .store
                            .resolve(variable, user)
                            .map(|resolved| resolved.value.to_string() == *equals)
                            .unwrap_or(false);
                        let branch = if matched { then_branch } else { else_branch };
                        self.run_nodes(branch, user, rng, failures).await?;
                    }
                    PlanNode::TransactionGroup { name, body } => {
                        log::debug!("{} entering transaction group {name}", user.id());
                        self.run_nodes(body, user, rng, failures).await?;
                    }
                    PlanNode::WeightedBranch { arms } => {
                        let total: u32 = arms.iter().map(|arm| arm.weight).sum();
                        if total == 0 {
                            continue;
                        }
                        let mut pick = rng.gen_range(0..total);
                        for arm in arms {
                            if pick < arm.weight {
                                self.run_nodes(&arm.body, user, rng, failures).await?;
                                break;
                            }
                            pick -= arm.weight;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    async fn run_request(
        &self,
        template: &RequestTemplate,
        user: &mut UserContext,
        rng: &mut StdRng,
        failures: &mut u64,
    ) -> Result<(), RuntimeError> {
        // Pacing first: reserve a send slot before doing any per-request work.
        if let Some(target) = template.throughput {
            let wait = self.timers.acquire(&template.transaction, target);
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        let request = self.resolve_request(template, user)?;
        self.stats.bump_requests();

        let response = match self.transport.send(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.stats.bump_failures();
                *failures += 1;
                log::warn!("{}: {e}", user.id());
                log::debug!("Replay with:\n{}", request.replay_command());
                return Ok(());
            }
        };

        let mut check_failed = false;
        if let Some(expected) = template.checks.status {
            if response.status != expected {
                check_failed = true;
                log::warn!(
                    "{}: '{}' status check failed: {} != {expected}",
                    user.id(),
                    template.transaction,
                    response.status
                );
            }
        }
        if let Some(needle) = &template.checks.body_contains {
            if !response.body.contains(needle) {
                check_failed = true;
                log::warn!(
                    "{}: '{}' content check failed: '{needle}' not found",
                    user.id(),
                    template.transaction
                );
            }
        }
        if check_failed {
            self.stats.bump_failures();
            *failures += 1;
            log::debug!("Replay with:\n{}", request.replay_command());
        }

        // Correlation runs regardless of check outcome, in strict plan order.
        for rule in &template.extractors {
            self.correlator
                .extract_and_store(rule, &response.body, &self.store, user, rng);
        }

        let pause = sample_think_time(&template.think_time, rng);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        Ok(())
    }

    fn resolve_request(
        &self,
        template: &RequestTemplate,
        user: &UserContext,
    ) -> Result<ResolvedRequest, RuntimeError> {
        let url = render_text(&template.url, &self.store, user)?;

        let mut headers = Vec::with_capacity(template.headers.len());
        for (key, value) in &template.headers {
            let mut rendered = render_text(value, &self.store, user)?;
            // A present-but-empty correlation-id header gets a fresh unique value per request.
            if rendered.is_empty() && key.eq_ignore_ascii_case("correlationid") {
                rendered = nanoid::nanoid!();
            }
            headers.push((key.clone(), rendered));
        }

        let body = match &template.body {
            None => None,
            Some(body) => Some(match render_body(body, &self.store, user)? {
                BodyTemplate::Text(text) => text,
                BodyTemplate::Json(value) => {
                    serde_json::to_string(&value).expect("JSON value serializes")
                }
            }),
        };

        Ok(ResolvedRequest {
            transaction: template.transaction.clone(),
            method: template.method.to_uppercase(),
            url,
            headers,
            body,
        })
    }
}
