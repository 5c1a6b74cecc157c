use serde::{Deserialize, Serialize};

/// One entry of the ranked "best investments" list. Derived on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// 1-based rank.
    pub position: usize,
    pub ticker: String,
    pub company: String,
    pub score: f64,
    pub rationale: String,
}
