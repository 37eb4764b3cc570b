use serde::Serialize;
use uuid::Uuid;

/// Final report of one replay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplayOutcome {
    /// Identifier of the replay session, as recorded in logs
    pub session_id: Uuid,
    /// Rows accepted by the pipeline
    pub delivered: usize,
    /// Rows in the replayed sequence
    pub total: usize,
}

impl ReplayOutcome {
    /// True when every row of the sequence was delivered.
    ///
    /// A short count means the pipeline stopped running mid-sequence.
    pub const fn is_complete(&self) -> bool {
        self.delivered == self.total
    }

    pub const fn undelivered(&self) -> usize {
        self.total.saturating_sub(self.delivered)
    }
}
