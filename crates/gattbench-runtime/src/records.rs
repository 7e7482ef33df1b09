//! Ordered, de-duplicated test outcome store.
//!
//! One record per test name. A record keeps the position of its first
//! insertion forever; later outcomes for the same name overwrite `is_passed`
//! in place. Nothing is ever removed.

use std::collections::HashMap;

use gattbench_core::TestOutcome;

/// What an upsert did to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordChange {
    /// New test name appended at the end.
    Inserted,
    /// Existing record flipped its result.
    Updated,
    /// Existing record already had this result.
    Unchanged,
}

impl RecordChange {
    /// Whether the list differs from before the upsert.
    pub fn is_modified(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Insertion-ordered map from test name to latest outcome.
#[derive(Clone, Debug, Default)]
pub struct TestRecordStore {
    records: Vec<TestOutcome>,
    index: HashMap<String, usize>,
}

impl TestRecordStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `outcome` into the store and report what changed.
    pub fn apply(&mut self, outcome: TestOutcome) -> RecordChange {
        if let Some(&i) = self.index.get(&outcome.test_name) {
            let existing = &mut self.records[i];
            if existing.is_passed == outcome.is_passed {
                return RecordChange::Unchanged;
            }
            existing.is_passed = outcome.is_passed;
            return RecordChange::Updated;
        }
        let _ = self
            .index
            .insert(outcome.test_name.clone(), self.records.len());
        self.records.push(outcome);
        RecordChange::Inserted
    }

    /// Fold `outcome` and return the full list for republication.
    pub fn upsert(&mut self, outcome: TestOutcome) -> &[TestOutcome] {
        let _ = self.apply(outcome);
        &self.records
    }

    /// All records in first-seen order.
    pub fn records(&self) -> &[TestOutcome] {
        &self.records
    }
}
