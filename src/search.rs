use serde::{Deserialize, Serialize};

use crate::model::RecordVersion;

fn default_true() -> bool {
    true
}

/// Substring search over the field values of live versions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub term: String,
    #[serde(default = "default_true")]
    pub ignore_case: bool,
    /// Protected values (passwords, PINs) are skipped unless set
    #[serde(default)]
    pub include_protected: bool,
}

impl SearchQuery {
    pub fn new(term: impl Into<String>) -> Self {
        Self { term: term.into(), ignore_case: true, include_protected: false }
    }

    pub fn match_case(mut self) -> Self {
        self.ignore_case = false;
        self
    }

    /// True when any non-empty searchable value contains the term.
    pub fn matches(&self, version: &RecordVersion) -> bool {
        let term = if self.ignore_case { self.term.to_lowercase() } else { self.term.clone() };

        version
            .fields
            .iter()
            .filter(|f| !f.value.is_empty())
            .filter(|f| self.include_protected || !f.protected)
            .any(|f| {
                if self.ignore_case {
                    f.value.to_lowercase().contains(&term)
                } else {
                    f.value.contains(&term)
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, RecordId};

    fn mail() -> RecordVersion {
        RecordVersion::new(
            RecordId::new(),
            None,
            vec![Field::new("title", "Work Mail"), Field::new("notes", ""), Field::protected("password", "Hunter2")],
        )
    }

    #[test]
    fn ignores_case_by_default() {
        assert!(SearchQuery::new("mail").matches(&mail()));
        assert!(!SearchQuery::new("mail").match_case().matches(&mail()));
        assert!(SearchQuery::new("Mail").match_case().matches(&mail()));
    }

    #[test]
    fn protected_values_need_opt_in() {
        let query = SearchQuery::new("hunter");
        assert!(!query.matches(&mail()));
        assert!(SearchQuery { include_protected: true, ..query }.matches(&mail()));
    }

    #[test]
    fn empty_values_never_match() {
        let bare = RecordVersion::new(RecordId::new(), None, vec![Field::new("notes", "")]);
        assert!(!SearchQuery::new("").matches(&bare));
        assert!(SearchQuery::new("").matches(&mail()));
    }

    #[test]
    fn missing_flags_take_defaults_on_the_wire() {
        let query: SearchQuery = serde_json::from_str(r#"{"term":"x"}"#).unwrap();
        assert_eq!(query, SearchQuery::new("x"));
    }
}
