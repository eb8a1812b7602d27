//! Change set produced by an incremental reparse.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::resource::ResourceName;

/// Resources changed by a reparse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    /// Resources that did not exist before.
    pub added: Vec<ResourceName>,
    /// Resources whose paths, refs or spec changed.
    pub modified: Vec<ResourceName>,
    /// Resources that no longer exist.
    pub deleted: Vec<ResourceName>,
    /// Whether the decoded project manifest changed.
    pub modified_rill_yaml: bool,
}

impl Diff {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && !self.modified_rill_yaml
    }

    /// Returns every resource that was added or modified.
    pub fn upserted(&self) -> impl Iterator<Item = &ResourceName> {
        self.added.iter().chain(self.modified.iter())
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} modified, {} deleted",
            self.added.len(),
            self.modified.len(),
            self.deleted.len()
        )?;
        if self.modified_rill_yaml {
            write!(f, ", rill.yaml changed")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ResourceKind;

    #[test]
    fn test_empty_diff() {
        let diff = Diff::default();
        assert!(diff.is_empty());
        assert_eq!(diff.to_string(), "0 added, 0 modified, 0 deleted");
    }

    #[test]
    fn test_upserted() {
        let diff = Diff {
            added: vec![ResourceName::new(ResourceKind::Source, "a")],
            modified: vec![ResourceName::new(ResourceKind::Model, "b")],
            modified_rill_yaml: true,
            ..Diff::default()
        };
        assert!(!diff.is_empty());
        assert_eq!(diff.upserted().count(), 2);
        assert!(diff.to_string().ends_with("rill.yaml changed"));
    }
}
