//! Data model for compiled test plans.
//!
//! A plan compiler (out of scope here) turns a hierarchical test-plan description into this
//! normalized form. The runtime treats everything in this crate as immutable input.

mod dataset;
mod extract;
mod node;
mod scenario;
mod timing;

pub mod prelude {
    pub use crate::dataset::{DatasetSpec, ExhaustionPolicy, SharingMode};
    pub use crate::extract::{ExtractScope, ExtractorKind, ExtractorRule, MatchIndex};
    pub use crate::node::{BodyTemplate, BranchArm, Checks, PlanNode, RequestTemplate};
    pub use crate::scenario::{LoopCount, ScenarioSpec};
    pub use crate::timing::{ThinkTime, ThroughputTarget};
    pub use crate::TestPlan;
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::dataset::DatasetSpec;
use crate::scenario::ScenarioSpec;

/// The root of a compiled plan: scenario definitions plus the data sources and plan-level
/// constants they share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPlan {
    pub name: String,
    pub scenarios: Vec<ScenarioSpec>,
    #[serde(default)]
    pub datasets: Vec<DatasetSpec>,
    /// Plan-level constants, the lowest resolution tier before call-site defaults.
    #[serde(default)]
    pub user_defined: HashMap<String, String>,
}

impl TestPlan {
    pub fn scenario(&self, id: &str) -> Option<&ScenarioSpec> {
        self.scenarios.iter().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserialize_compiled_plan() {
        let raw = serde_json::json!({
            "name": "address-crud",
            "scenarios": [{
                "id": "script_01",
                "name": "Address CRUD - READ",
                "users": 2,
                "ramp_up_s": 5,
                "sustain_s": 60,
                "script": [{
                    "request": {
                        "transaction": "Address CRUD - READ",
                        "method": "GET",
                        "url": "http://localhost:8088/api/address?orderId=${OrderId}",
                        "headers": { "Content-Type": "application/json" },
                        "checks": { "status": 200 },
                        "throughput": { "per_minute": 60.0 },
                        "extractors": [{
                            "variable": "addressId",
                            "kind": { "json_path": { "path": "address.id" } },
                            "scope": "session"
                        }]
                    }
                }]
            }],
            "datasets": [{
                "name": "orders",
                "columns": ["OrderId"],
                "rows": [["121383715391"], ["122911311582"]],
                "sharing": "exclusive-per-user",
                "on_exhausted": "recycle"
            }],
            "user_defined": { "env": "tst" }
        });

        let plan: TestPlan = serde_json::from_value(raw).unwrap();

        assert_eq!(plan.scenarios.len(), 1);
        let scenario = plan.scenario("script_01").unwrap();
        assert_eq!(scenario.users, 2);
        assert_eq!(scenario.loop_count, LoopCount::Unbounded);
        assert!(scenario.enabled);

        let PlanNode::Request(request) = &scenario.script[0] else {
            panic!("Expected a request node");
        };
        assert_eq!(request.checks.status, Some(200));
        assert_eq!(request.extractors[0].match_index, MatchIndex::First);

        assert_eq!(plan.datasets[0].sharing, SharingMode::ExclusivePerUser);
        assert_eq!(plan.datasets[0].on_exhausted, ExhaustionPolicy::Recycle);
        assert_eq!(plan.user_defined["env"], "tst");
    }

    #[test]
    fn row_yields_all_columns_of_one_row() {
        let dataset = DatasetSpec {
            name: "addresses".to_string(),
            columns: vec!["city".to_string(), "state".to_string()],
            rows: vec![
                vec!["Houston".to_string(), "TX".to_string()],
                vec!["Chicago".to_string(), "IL".to_string()],
            ],
            sharing: SharingMode::SharedRoundRobin,
            on_exhausted: ExhaustionPolicy::Recycle,
        };

        let row: Vec<_> = dataset.row(1).unwrap().collect();
        assert_eq!(row, vec![("city", "Chicago"), ("state", "IL")]);
        assert!(dataset.row(2).is_none());
    }
}
