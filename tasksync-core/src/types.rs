//! Domain types shared by the sync pipeline.
//!
//! All types are serializable/deserializable via serde.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed Notion database identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DatabaseId(pub String);

impl DatabaseId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DatabaseId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DatabaseId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A single task row as read from a Notion database.
///
/// `assignees` holds the display name of every assigned person, as listed
/// by the remote. Names may themselves contain commas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl TaskRecord {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Assignee names joined with `", "`, for display only.
    pub fn assignee_label(&self) -> String {
        self.assignees.join(", ")
    }
}

/// A complete keyed mapping of records, keyed by the remote page id.
pub type Snapshot = BTreeMap<String, TaskRecord>;

// ---------------------------------------------------------------------------
// Identity predicate
// ---------------------------------------------------------------------------

/// Decides whether a record is assigned to the configured identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssigneeFilter {
    identity: String,
}

impl AssigneeFilter {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into().trim().to_string(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// True when one of the record's assignees equals the identity exactly.
    /// An empty identity matches nothing.
    pub fn matches(&self, record: &TaskRecord) -> bool {
        if self.identity.is_empty() {
            return false;
        }
        record
            .assignees
            .iter()
            .any(|name| name.trim() == self.identity)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn assigned(to: &[&str]) -> TaskRecord {
        TaskRecord {
            assignees: to.iter().map(|name| name.to_string()).collect(),
            ..TaskRecord::titled("t")
        }
    }

    #[test]
    fn database_id_display() {
        assert_eq!(DatabaseId::from("abc").to_string(), "abc");
        assert!(DatabaseId::from("  ").is_empty());
    }

    #[test]
    fn assignee_label_joins_names() {
        let record = assigned(&["Ada Lovelace", "Alan Turing"]);
        assert_eq!(record.assignee_label(), "Ada Lovelace, Alan Turing");
        assert_eq!(TaskRecord::titled("t").assignee_label(), "");
    }

    #[test]
    fn filter_matches_one_of_many() {
        let filter = AssigneeFilter::new("Alan Turing");
        assert!(filter.matches(&assigned(&["Ada Lovelace", "Alan Turing"])));
        assert!(!filter.matches(&assigned(&["Alan"])));
        assert!(!filter.matches(&TaskRecord::titled("nobody")));
    }

    #[test]
    fn filter_matches_name_containing_comma() {
        let filter = AssigneeFilter::new("Doe, Jane");
        assert!(filter.matches(&assigned(&["Ada", "Doe, Jane"])));
        assert!(!filter.matches(&assigned(&["Doe", "Jane"])));
        assert!(!AssigneeFilter::new("Jane").matches(&assigned(&["Doe, Jane"])));
    }

    #[test]
    fn empty_identity_matches_nothing() {
        let filter = AssigneeFilter::new("   ");
        assert!(!filter.matches(&assigned(&[""])));
        assert!(!filter.matches(&assigned(&["X"])));
    }

    #[test]
    fn record_yaml_omits_absent_fields() {
        let yaml = serde_yaml::to_string(&TaskRecord::titled("write docs")).expect("serialize");
        assert!(yaml.contains("title: write docs"));
        assert!(!yaml.contains("state"));
    }
}
