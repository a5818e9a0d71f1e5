use std::collections::HashMap;

use gust_plan::prelude::{ExtractScope, ExtractorKind, ExtractorRule, MatchIndex};
use parking_lot::Mutex;
use rand::Rng;
use regex::Regex;

use crate::store::{UserContext, Value, VariableStore};

/// Applies correlation rules to response bodies and binds the results.
///
/// Extraction never fails a request: a miss, an unparseable body or a bad pattern all fall back
/// to the rule's configured default (empty string when unset).
#[derive(Debug, Default)]
pub struct CorrelationEngine {
    /// Compiled patterns, keyed by source text. Rules repeat on every iteration so compiling
    /// once per run matters.
    patterns: Mutex<HashMap<String, Regex>>,
}

impl CorrelationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `rule` against `body` and binds the outcome into the rule's scope through the
    /// variable store. Returns the bound value.
    pub fn extract_and_store(
        &self,
        rule: &ExtractorRule,
        body: &str,
        store: &VariableStore,
        user: &mut UserContext,
        rng: &mut impl Rng,
    ) -> Value {
        let matches = self.collect_matches(&rule.kind, body);
        let value = select_match(&matches, rule.match_index, rng).unwrap_or_else(|| {
            log::debug!(
                "Extraction miss for '{}' ({} matches, wanted {:?}), binding default",
                rule.variable,
                matches.len(),
                rule.match_index,
            );
            Value::text(rule.default.clone().unwrap_or_default())
        });

        match rule.scope {
            ExtractScope::Session => store.bind_session(user, rule.variable.clone(), value.clone()),
            ExtractScope::Global => store.bind_global(rule.variable.clone(), value.clone()),
        }
        value
    }

    fn collect_matches(&self, kind: &ExtractorKind, body: &str) -> Vec<String> {
        match kind {
            ExtractorKind::Pattern { pattern } => self.pattern_matches(pattern, body),
            ExtractorKind::JsonPath { path } => json_matches(path, body),
            ExtractorKind::XmlPath { path } => xml_matches(path, body),
        }
    }

    fn pattern_matches(&self, pattern: &str, body: &str) -> Vec<String> {
        let mut patterns = self.patterns.lock();
        let regex = match patterns.get(pattern) {
            Some(regex) => regex,
            None => match Regex::new(pattern) {
                Ok(regex) => patterns.entry(pattern.to_string()).or_insert(regex),
                Err(e) => {
                    log::warn!("Invalid extraction pattern '{pattern}': {e}");
                    return Vec::new();
                }
            },
        };

        regex
            .captures_iter(body)
            .map(|caps| {
                // Capture group 1 when the pattern defines one, whole match otherwise.
                caps.get(1)
                    .or_else(|| caps.get(0))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default()
            })
            .collect()
    }
}

/// Match-index policy: 1-based selection, `random` picks uniformly among all matches and `all`
/// binds the full ordered sequence. Returns `None` on a miss.
fn select_match(matches: &[String], index: MatchIndex, rng: &mut impl Rng) -> Option<Value> {
    if matches.is_empty() {
        return None;
    }
    match index {
        MatchIndex::First => matches.first().cloned().map(Value::Text),
        MatchIndex::Nth(n) => matches.get(n.checked_sub(1)?).cloned().map(Value::Text),
        MatchIndex::Random => {
            let pick = rng.gen_range(0..matches.len());
            Some(Value::Text(matches[pick].clone()))
        }
        MatchIndex::All => Some(Value::Sequence(matches.to_vec())),
    }
}

/// Walks a dotted path (`data.items[2].id`) through a JSON body. A path landing on an array
/// yields each element as a match; a scalar yields one match.
fn json_matches(path: &str, body: &str) -> Vec<String> {
    let Ok(root) = serde_json::from_str::<serde_json::Value>(body) else {
        return Vec::new();
    };

    let mut current = &root;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let (name, indices) = parse_segment(segment);
        if !name.is_empty() {
            match current.get(name) {
                Some(next) => current = next,
                None => return Vec::new(),
            }
        }
        for index in indices {
            match current.get(index) {
                Some(next) => current = next,
                None => return Vec::new(),
            }
        }
    }

    match current {
        serde_json::Value::Array(items) => items.iter().map(json_to_text).collect(),
        value => vec![json_to_text(value)],
    }
}

/// Splits `items[2][0]` into the field name and its trailing indices.
fn parse_segment(segment: &str) -> (&str, Vec<usize>) {
    match segment.find('[') {
        None => (segment, Vec::new()),
        Some(start) => {
            let indices = segment[start..]
                .split(['[', ']'])
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse().ok())
                .collect();
            (&segment[..start], indices)
        }
    }
}

fn json_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Walks a slash path (`order/items/item/@sku`) through an XML body, collecting every matching
/// element in document order. A trailing `@name` segment selects an attribute, otherwise the
/// element text is taken.
fn xml_matches(path: &str, body: &str) -> Vec<String> {
    let Ok(doc) = roxmltree::Document::parse(body) else {
        return Vec::new();
    };

    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let attribute = match segments.last() {
        Some(last) if last.starts_with('@') => segments.pop().map(|s| &s[1..]),
        _ => None,
    };
    if segments.is_empty() {
        return Vec::new();
    }

    let root = doc.root_element();
    if root.tag_name().name() != segments[0] {
        return Vec::new();
    }

    let mut nodes = vec![root];
    for segment in &segments[1..] {
        nodes = nodes
            .into_iter()
            .flat_map(|node| {
                node.children()
                    .filter(|c| c.is_element() && c.tag_name().name() == *segment)
            })
            .collect();
    }

    nodes
        .into_iter()
        .filter_map(|node| match attribute {
            Some(name) => node.attribute(name).map(|v| v.to_string()),
            None => Some(node.text().unwrap_or_default().to_string()),
        })
        .collect()
}
