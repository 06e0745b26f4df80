//! Tracks what a scenario created so teardown can remove it.

use crate::client::Invoke;
use crate::outcome::{Failure, Outcome};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Kinds of server-side records a scenario can leave behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Note,
    Collection,
    Link,
    Template,
    Concept,
    ConceptScheme,
    Keyset,
}

impl ResourceKind {
    /// The operation that deletes a record of this kind.
    pub fn delete_operation(self) -> &'static str {
        match self {
            Self::Note => "delete_note",
            Self::Collection => "delete_collection",
            Self::Link => "delete_link",
            Self::Template => "delete_template",
            Self::Concept => "delete_concept",
            Self::ConceptScheme => "delete_concept_scheme",
            Self::Keyset => "pke_delete_keyset",
        }
    }

    /// Argument name the delete operation expects the identifier under.
    pub fn id_argument(self) -> &'static str {
        match self {
            Self::Keyset => "name",
            _ => "id",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Note => "note",
            Self::Collection => "collection",
            Self::Link => "link",
            Self::Template => "template",
            Self::Concept => "concept",
            Self::ConceptScheme => "concept-scheme",
            Self::Keyset => "keyset",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedResource {
    pub kind: ResourceKind,
    pub id: String,
}

impl fmt::Display for TrackedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// What a drain managed to remove.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrainReport {
    pub deleted: Vec<TrackedResource>,
    pub failed: Vec<(TrackedResource, Failure)>,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Per-scenario list of created records, in creation order.
#[derive(Debug, Default)]
pub struct CleanupLedger {
    entries: Vec<TrackedResource>,
    drained: bool,
}

impl CleanupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, kind: ResourceKind, id: impl Into<String>) {
        let resource = TrackedResource {
            kind,
            id: id.into(),
        };
        if self.drained {
            // Teardown already ran, so this record stays listed as a leftover.
            tracing::warn!(%resource, "tracked after the ledger was drained");
        } else {
            tracing::trace!(%resource, "tracking");
        }
        self.entries.push(resource);
    }

    /// Stops tracking a record that was deleted explicitly. Returns whether
    /// it was tracked.
    pub fn forget(&mut self, kind: ResourceKind, id: &str) -> bool {
        match self
            .entries
            .iter()
            .rposition(|entry| entry.kind == kind && entry.id == id)
        {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn entries(&self) -> &[TrackedResource] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// Deletes every tracked record, newest first.
    ///
    /// Individual failures are logged and collected, never retried and never
    /// raised. Only the first call does any work.
    pub async fn drain<C: Invoke>(&mut self, caller: &C) -> DrainReport {
        let mut report = DrainReport::default();
        if self.drained {
            tracing::debug!("ledger already drained");
            return report;
        }
        self.drained = true;

        while let Some(resource) = self.entries.pop() {
            let mut arguments = Map::new();
            arguments.insert(
                resource.kind.id_argument().to_string(),
                Value::String(resource.id.clone()),
            );
            let operation = resource.kind.delete_operation();

            let failure = match caller.invoke(operation, Value::Object(arguments)).await {
                Ok(Outcome::Success(_)) => None,
                Ok(Outcome::Failure(failure)) => Some(failure),
                Err(err) => Some(Failure::transport(err.to_string())),
            };

            match failure {
                None => {
                    tracing::debug!(%resource, "cleaned up");
                    report.deleted.push(resource);
                }
                Some(failure) => {
                    tracing::warn!(%resource, %failure, "cleanup failed, leaving record behind");
                    report.failed.push((resource, failure));
                }
            }
        }

        report
    }
}
