use serde::{Deserialize, Serialize};

/// A correlation rule: pull a value out of a response and bind it for later requests.
///
/// Rules on one request run strictly in plan order. When two rules target the same variable the
/// later bind wins within its scope; there is no implicit precedence between extractor kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorRule {
    /// The variable key the extracted value is bound to.
    pub variable: String,
    pub kind: ExtractorKind,
    #[serde(default)]
    pub match_index: MatchIndex,
    #[serde(default)]
    pub scope: ExtractScope,
    /// Bound on a miss. An unset default binds the empty string, so a miss never fails a request.
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    /// Regex over the raw body; capture group 1 if present, whole match otherwise.
    Pattern { pattern: String },
    /// Dotted path over a JSON body, e.g. `data.items[2].id`.
    JsonPath { path: String },
    /// Slash path over an XML body, e.g. `order/items/item/@sku`.
    XmlPath { path: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchIndex {
    /// The first match. Equivalent to `Nth(1)`.
    #[default]
    First,
    /// The Nth match, 1-based.
    Nth(usize),
    /// A uniformly random match among all found.
    Random,
    /// All matches, stored as one ordered sequence value.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractScope {
    /// Visible only to the virtual user that ran the extraction.
    #[default]
    Session,
    /// Shared across all virtual users; last writer wins.
    Global,
}
