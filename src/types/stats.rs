use serde::{Deserialize, Serialize};

/// Inbox counts for one agent over a trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStats {
    pub total: u64,
    pub processed: u64,
    pub pending: u64,
    pub failed: u64,
}

impl MessageStats {
    /// Folds `(status, count)` rows as returned by a `GROUP BY status` query.
    #[must_use]
    pub fn from_status_counts<'a>(rows: impl IntoIterator<Item = (&'a str, u64)>) -> Self {
        rows.into_iter()
            .fold(Self::default(), |mut stats, (status, count)| {
                stats.total += count;
                match status {
                    "done" => stats.processed += count,
                    "queued" | "processing" => stats.pending += count,
                    "failed" => stats.failed += count,
                    _ => {}
                }
                stats
            })
    }
}

/// Outcome of one crash-reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub runs_failed: u64,
    pub items_requeued: u64,
}

impl ReconcileReport {
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.runs_failed == 0 && self.items_requeued == 0
    }
}
