use serde::{Deserialize, Serialize};

/// One scenario-state change, published by the master whenever its registry changes.
///
/// Versions are totally ordered across the whole stream. Delivery is at-least-once; the reducer
/// in [`crate::registry::ScenarioRegistry::apply_delta`] makes redelivery and reordering safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioDelta {
    pub version: u64,
    pub scenario_id: String,
    pub enabled: bool,
    pub target_population: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn delta_round_trips_over_the_wire() {
        let delta = ScenarioDelta {
            version: 42,
            scenario_id: "read".to_string(),
            enabled: false,
            target_population: 0,
        };

        let wire = serde_json::to_string(&delta).unwrap();
        let decoded: ScenarioDelta = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded, delta);
    }
}
