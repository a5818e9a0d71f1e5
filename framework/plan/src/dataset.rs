use serde::{Deserialize, Serialize};

/// A pre-parsed data source. Rows arrive already split into columns; loading and CSV mechanics
/// belong to the plan compiler.
///
/// A row is the atomic unit: every column of one row is served to the same virtual user for the
/// same iteration, never mixed with columns of another row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    #[serde(default)]
    pub sharing: SharingMode,
    #[serde(default)]
    pub on_exhausted: ExhaustionPolicy,
}

impl DatasetSpec {
    /// Column values of `row` keyed by column name, preserving column order.
    pub fn row(&self, index: usize) -> Option<impl Iterator<Item = (&str, &str)>> {
        self.rows.get(index).map(|row| {
            self.columns
                .iter()
                .zip(row.iter())
                .map(|(c, v)| (c.as_str(), v.as_str()))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SharingMode {
    /// Each virtual user is pinned to one row for the lifetime of the run.
    ExclusivePerUser,
    /// All users advance one shared cursor, one row per acquisition.
    #[default]
    SharedRoundRobin,
    /// Each acquisition picks a uniformly random row.
    SharedRandom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustionPolicy {
    /// Wrap back to row 0.
    #[default]
    Recycle,
    /// Terminate the virtual user that hit the end.
    StopUser,
    /// Hold position and keep re-serving the last row.
    BlockAtEof,
}
