use serde::{Deserialize, Serialize};

/// How completions of overlapping loads are applied to a session.
#[derive(Serialize, Deserialize, clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionOrdering {
    /// Drop a completion when a later request already settled
    #[default]
    LatestRequest,
    /// Apply every completion as it arrives; a slow earlier load may overwrite a newer one
    CompletionOrder,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionConfig {
    #[serde(default)]
    pub ordering: CompletionOrdering,
}

impl SessionConfig {
    pub fn with_ordering(ordering: CompletionOrdering) -> Self {
        Self { ordering }
    }
}
