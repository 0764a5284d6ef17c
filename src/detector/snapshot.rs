//! Point-in-time copies of the registry and leak reporting.

use std::fmt::Write as _;
use std::io;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LeakError, LeakResult};
use crate::stream::SubscriptionId;

use super::registry::SubscriptionRecord;

/// One subscription still open when the snapshot was taken.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakEntry {
    pub subscription: SubscriptionId,
    pub record: SubscriptionRecord,
}

/// Immutable copy of a detector's registry.
///
/// Entries are ordered by first sequence number. Later changes to the live
/// registry are not visible here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    detector: String,
    taken_at: DateTime<Utc>,
    entries: Vec<LeakEntry>,
}

impl Snapshot {
    pub(crate) fn new(detector: impl Into<String>, entries: Vec<(SubscriptionId, SubscriptionRecord)>) -> Self {
        Self {
            detector: detector.into(),
            taken_at: Utc::now(),
            entries: entries
                .into_iter()
                .map(|(subscription, record)| LeakEntry {
                    subscription,
                    record,
                })
                .collect(),
        }
    }

    /// Name of the detector that produced this snapshot.
    #[must_use]
    pub fn detector(&self) -> &str {
        &self.detector
    }

    /// When the snapshot was taken.
    #[must_use]
    pub const fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing leaked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates the leaked entries in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &LeakEntry> {
        self.entries.iter()
    }

    /// Looks up the record of one subscription.
    #[must_use]
    pub fn get(&self, subscription: SubscriptionId) -> Option<&SubscriptionRecord> {
        self.entries
            .iter()
            .find(|e| e.subscription == subscription)
            .map(|e| &e.record)
    }

    /// Renders the human-readable leak report.
    #[must_use]
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "==== subscription leak report [{}]: {} open subscription(s) ====",
            self.detector,
            self.entries.len()
        );
        for (index, entry) in self.entries.iter().enumerate() {
            let record = &entry.record;
            let sequence: Vec<String> = record.sequence().iter().map(u64::to_string).collect();
            let _ = writeln!(
                out,
                "#{index} subscription {}: {} call(s), sequence [{}], first seen {}",
                entry.subscription,
                record.call_count(),
                sequence.join(", "),
                record.first_seen().to_rfc3339_opts(SecondsFormat::Millis, true)
            );
            for (n, trace) in record.traces().iter().enumerate() {
                let _ = writeln!(out, "  stack {}:", n + 1);
                for line in trace.lines() {
                    let _ = writeln!(out, "    {line}");
                }
            }
            if record.untracked() > 0 {
                let _ = writeln!(out, "  {} call(s) without a captured stack", record.untracked());
            }
        }
        let _ = writeln!(out, "==== end of subscription leak report ====");
        out
    }

    /// Writes the leak report to `sink`.
    pub fn write_report<W: io::Write>(&self, sink: &mut W) -> io::Result<()> {
        sink.write_all(self.render_report().as_bytes())?;
        sink.flush()
    }

    /// Succeeds if empty; otherwise logs the report and fails.
    ///
    /// The report goes to `tracing` at error level.
    pub fn assert_empty_or_report(&self) -> LeakResult<()> {
        if self.is_empty() {
            return Ok(());
        }
        let report = self.render_report();
        tracing::error!(
            detector = %self.detector,
            leak_count = self.entries.len(),
            report = %report,
            "subscription leaks detected"
        );
        Err(LeakError::LeakDetected {
            count: self.entries.len(),
            report,
        })
    }

    /// Like [`Snapshot::assert_empty_or_report`] but writes the report to `sink`.
    pub fn assert_empty_or_report_to<W: io::Write>(&self, sink: &mut W) -> LeakResult<()> {
        if self.is_empty() {
            return Ok(());
        }
        let report = self.render_report();
        sink.write_all(report.as_bytes())?;
        sink.flush()?;
        Err(LeakError::LeakDetected {
            count: self.entries.len(),
            report,
        })
    }

    /// Serializes the snapshot as JSON.
    pub fn to_json(&self) -> LeakResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a LeakEntry;
    type IntoIter = std::slice::Iter<'a, LeakEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seqs: &[u64], traces: &[&str], untracked: usize) -> SubscriptionRecord {
        let mut r = SubscriptionRecord::new();
        for (i, seq) in seqs.iter().enumerate() {
            let trace = if i < untracked {
                None
            } else {
                traces.get(i - untracked).map(|t| (*t).to_string())
            };
            r.record_call(*seq, trace);
        }
        r
    }

    fn two_leaks() -> Snapshot {
        Snapshot::new(
            "unit",
            vec![
                (SubscriptionId::new(), record(&[0, 3], &["a::b", "c::d"], 0)),
                (SubscriptionId::new(), record(&[2], &[], 1)),
            ],
        )
    }

    #[test]
    fn empty_snapshot_passes_silently() {
        let snap = Snapshot::new("unit", Vec::new());
        assert!(snap.assert_empty_or_report().is_ok());
        let mut sink = Vec::new();
        assert!(snap.assert_empty_or_report_to(&mut sink).is_ok());
        assert!(sink.is_empty());
    }

    #[test]
    fn report_lists_every_leak() {
        let snap = two_leaks();
        let report = snap.render_report();

        assert!(report.starts_with("==== subscription leak report [unit]: 2 open subscription(s) ===="));
        assert!(report.contains("#0 subscription"));
        assert!(report.contains("2 call(s), sequence [0, 3]"));
        assert!(report.contains("  stack 2:\n    c::d"));
        assert!(report.contains("#1 subscription"));
        assert!(report.contains("1 call(s) without a captured stack"));
        assert!(report.trim_end().ends_with("==== end of subscription leak report ===="));
    }

    #[test]
    fn report_is_deterministic() {
        let snap = two_leaks();
        assert_eq!(snap.render_report(), snap.render_report());
        assert_eq!(snap.clone().render_report(), snap.render_report());
    }

    #[test]
    fn assert_returns_leak_count_and_writes_sink() {
        let snap = two_leaks();
        let mut sink = Vec::new();
        let err = snap.assert_empty_or_report_to(&mut sink).unwrap_err();
        assert_eq!(err.leak_count(), Some(2));
        assert_eq!(String::from_utf8(sink).unwrap(), snap.render_report());

        let err = snap.assert_empty_or_report().unwrap_err();
        assert!(err.is_leak());
    }

    #[test]
    fn json_round_trips() {
        let snap = two_leaks();
        let json = snap.to_json().unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn get_finds_entry_by_subscription() {
        let snap = two_leaks();
        let first = snap.iter().next().unwrap().subscription;
        assert_eq!(snap.get(first).map(SubscriptionRecord::call_count), Some(2));
        assert!(snap.get(SubscriptionId::new()).is_none());
    }
}
