use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::extract::ExtractorRule;
use crate::timing::{ThinkTime, ThroughputTarget};

/// One node in a compiled plan graph.
///
/// The whole hierarchy of controllers collapses into this single tagged tree so the runtime can
/// evaluate it with one interpreter instead of dispatching per controller kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanNode {
    Request(RequestTemplate),
    Loop {
        count: u32,
        body: Vec<PlanNode>,
    },
    /// Branches on a resolved variable's value. A missing variable takes the else branch.
    Conditional {
        variable: String,
        equals: String,
        then_branch: Vec<PlanNode>,
        #[serde(default)]
        else_branch: Vec<PlanNode>,
    },
    TransactionGroup {
        name: String,
        body: Vec<PlanNode>,
    },
    /// Picks exactly one arm per evaluation, proportionally to arm weights.
    WeightedBranch {
        arms: Vec<BranchArm>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchArm {
    pub weight: u32,
    pub body: Vec<PlanNode>,
}

/// An HTTP-style request with `${name}` placeholders still unresolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTemplate {
    /// Transaction name, used for reporting and as the throughput-timer key.
    pub transaction: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<BodyTemplate>,
    #[serde(default)]
    pub checks: Checks,
    /// Correlation rules to run against the response, in plan order.
    #[serde(default)]
    pub extractors: Vec<ExtractorRule>,
    #[serde(default)]
    pub think_time: ThinkTime,
    /// When set, all virtual users issuing this transaction share one pacing schedule.
    #[serde(default)]
    pub throughput: Option<ThroughputTarget>,
}

/// Request bodies are either plain text or structured JSON. For JSON bodies the placeholders
/// live in string leaves and are substituted recursively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BodyTemplate {
    Text(String),
    Json(serde_json::Value),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checks {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub body_contains: Option<String>,
}
