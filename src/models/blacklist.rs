use serde::{Deserialize, Serialize};

/// A forbidden-destination rule owned by the management backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistRule {
    #[serde(default)]
    pub id: Option<i64>,
    /// Regex matched case-insensitively against the full target URL
    pub pattern: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl BlacklistRule {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            id: None,
            pattern: pattern.into(),
            description: None,
        }
    }
}
