//! Shared metadata types for burrow resources

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The resource kinds held in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Template,
    Instance,
    Pod,
    PersistentVolumeClaim,
}

impl Kind {
    /// Every kind, in a stable order
    pub const ALL: [Kind; 4] = [
        Kind::Template,
        Kind::Instance,
        Kind::Pod,
        Kind::PersistentVolumeClaim,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Template => "template",
            Kind::Instance => "instance",
            Kind::Pod => "pod",
            Kind::PersistentVolumeClaim => "persistentvolumeclaim",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference from a dependent object to the object that owns it.
///
/// Removing the owner from the store removes every dependent whose
/// reference carries the owner's uid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: Kind,
    pub name: String,
    pub uid: String,
    /// Whether the owner is the managing controller of the dependent
    pub controller: bool,
}

/// Metadata shared by every stored object
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectMeta {
    /// Unique name within the kind
    pub name: String,
    /// Store-assigned identity, stable for the object's lifetime
    pub uid: String,
    /// Store-global version token of the last write
    pub resource_version: u64,
    /// Bumped by the store whenever the spec changes
    pub generation: u64,
    pub labels: BTreeMap<String, String>,
    pub owner_references: Vec<OwnerReference>,
    pub finalizers: Vec<String>,
    /// Creation time in Unix milliseconds
    pub creation_timestamp: u64,
    /// Set when deletion was requested but finalizers are still pending
    pub deletion_timestamp: Option<u64>,
}

impl ObjectMeta {
    /// Metadata for a new object with the given name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder-style label insertion
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Whether this object is owned by the object with the given uid
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.owner_references.iter().any(|r| r.uid == uid)
    }
}

/// Equality-based label selector
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabelSelector(pub BTreeMap<String, String>);

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Whether every selector entry is present in `labels`
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(k, v)| labels.get(k) == Some(v))
    }
}

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Clamp values reported by SSH clients into the u16 range
    pub fn from_ssh(cols: u32, rows: u32) -> Self {
        Self {
            cols: cols.min(u16::MAX as u32) as u16,
            rows: rows.min(u16::MAX as u32) as u16,
        }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matches_subset() {
        let labels: BTreeMap<String, String> = [
            ("app".to_string(), "burrow".to_string()),
            ("owner".to_string(), "alice".to_string()),
        ]
        .into_iter()
        .collect();

        assert!(LabelSelector::new().matches(&labels));
        assert!(LabelSelector::new().with("owner", "alice").matches(&labels));
        assert!(!LabelSelector::new().with("owner", "bob").matches(&labels));
        assert!(!LabelSelector::new().with("missing", "x").matches(&labels));
    }

    #[test]
    fn test_terminal_size_clamps() {
        let size = TerminalSize::from_ssh(100_000, 40);
        assert_eq!(size.cols, u16::MAX);
        assert_eq!(size.rows, 40);
    }
}
