//! Deferred eager-load directives.
//!
//! Preloads requested on the facade are queued here and only handed to the
//! engine when a terminal operation runs, in the order they were requested.

use crate::clause::Clause;
use crate::statement::Statement;
use crate::trail::Trail;

/// One deferred eager-load request
#[derive(Debug, Clone, PartialEq)]
pub struct Preload {
    /// Relation name as declared by `Record::relations`
    pub field: String,
    /// Extra conditions on the related rows
    pub conditions: Vec<Clause>,
}

impl Preload {
    pub fn new(field: impl Into<String>, conditions: Vec<Clause>) -> Self {
        Self {
            field: field.into(),
            conditions,
        }
    }
}

/// FIFO queue of pending preloads, shared structurally between facades
#[derive(Debug, Clone, Default)]
pub struct PreloadQueue {
    pending: Trail<Preload>,
}

impl PreloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new queue with `preload` appended
    #[must_use]
    pub fn push(&self, preload: Preload) -> Self {
        Self {
            pending: self.pending.push(preload),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending preloads, oldest first
    pub fn to_vec(&self) -> Vec<&Preload> {
        self.pending.to_vec()
    }

    /// Attach every pending preload to `statement`, oldest first
    pub fn apply(&self, statement: Statement) -> Statement {
        self.pending
            .to_vec()
            .into_iter()
            .fold(statement, |stmt, preload| {
                stmt.preload(preload.field.clone(), preload.conditions.clone())
            })
    }
}
