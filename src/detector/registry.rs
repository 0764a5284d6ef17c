//! Live table of tracked, unreleased subscriptions.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stream::SubscriptionId;

/// Diagnostics gathered for one open subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    sequence: BTreeSet<u64>,
    traces: Vec<String>,
    untracked: usize,
    first_seen: DateTime<Utc>,
}

impl SubscriptionRecord {
    pub(crate) fn new() -> Self {
        Self {
            sequence: BTreeSet::new(),
            traces: Vec::new(),
            untracked: 0,
            first_seen: Utc::now(),
        }
    }

    pub(crate) fn record_call(&mut self, seq: u64, trace: Option<String>) {
        self.sequence.insert(seq);
        match trace {
            Some(trace) => self.traces.push(trace),
            None => self.untracked += 1,
        }
    }

    /// Sequence numbers of the spied subscribe calls that produced this subscription.
    #[must_use]
    pub fn sequence(&self) -> &BTreeSet<u64> {
        &self.sequence
    }

    /// Captured stack traces, one per call that yielded a trace.
    #[must_use]
    pub fn traces(&self) -> &[String] {
        &self.traces
    }

    /// Calls for which no stack trace could be captured.
    #[must_use]
    pub const fn untracked(&self) -> usize {
        self.untracked
    }

    /// Number of spied subscribe calls that produced this subscription.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.sequence.len()
    }

    /// Lowest sequence number, i.e. when the record was created.
    #[must_use]
    pub fn first_sequence(&self) -> Option<u64> {
        self.sequence.first().copied()
    }

    /// Wall-clock time of the first tracked call.
    #[must_use]
    pub const fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }
}

#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    records: Mutex<HashMap<SubscriptionId, SubscriptionRecord>>,
}

impl SubscriptionRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionId, SubscriptionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a tracked call. Returns true if the record was created by this call.
    pub(crate) fn record(&self, id: SubscriptionId, seq: u64, trace: Option<String>) -> bool {
        let mut records = self.lock();
        let mut created = false;
        records
            .entry(id)
            .or_insert_with(|| {
                created = true;
                SubscriptionRecord::new()
            })
            .record_call(seq, trace);
        created
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Deep copy of every record, in creation order.
    pub(crate) fn entries(&self) -> Vec<(SubscriptionId, SubscriptionRecord)> {
        let mut out: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect();
        out.sort_by_key(|(_, record)| record.first_sequence());
        out
    }
}
