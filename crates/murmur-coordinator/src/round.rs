//! The round ledger: current round number and pending submissions.
//!
//! Pure state behind one mutex at the caller. The round number is strictly
//! monotonic and observed only under that mutex, so every observer sees
//! monotonic values. Submissions and replies correlate positionally:
//! `replies[i]` belongs to `submissions[i]` as frozen; the submission
//! list is taken by value at freeze time and never mutated in flight.

use std::collections::HashSet;

/// Opaque session handle. The coordinator resolves it to a live connection
/// at dispatch time; a session that closed in the meantime simply misses
/// its reply.
pub type SessionId = u64;

/// One accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Submitting session.
    pub session: SessionId,
    /// The sealed onion.
    pub onion: Vec<u8>,
}

/// Why a submission was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Tagged with a round other than the current one. Carries the current
    /// round for the error reply.
    WrongRound {
        /// The coordinator's current round.
        current: u32,
    },
    /// The session already submitted this round. Dropped silently:
    /// positional indexing would otherwise corrupt dispatch.
    Duplicate,
}

/// A frozen round: the batch shipped to the chain head.
#[derive(Debug)]
pub struct RoundBatch {
    /// The frozen round number.
    pub round: u32,
    /// Submissions in acceptance order.
    pub submissions: Vec<Submission>,
}

/// Current round number plus the open submission list.
#[derive(Debug, Default)]
pub struct RoundLedger {
    round: u32,
    submissions: Vec<Submission>,
    submitted: HashSet<SessionId>,
}

impl RoundLedger {
    /// Fresh ledger at round 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// The round currently accepting submissions.
    pub fn current(&self) -> u32 {
        self.round
    }

    /// Accept one onion for the current round.
    ///
    /// # Errors
    ///
    /// - `SubmitError::WrongRound` if `round` is not current.
    /// - `SubmitError::Duplicate` on a second submission from the same
    ///   session.
    pub fn submit(
        &mut self,
        session: SessionId,
        round: u32,
        onion: Vec<u8>,
    ) -> Result<(), SubmitError> {
        if round != self.round {
            return Err(SubmitError::WrongRound { current: self.round });
        }
        if !self.submitted.insert(session) {
            return Err(SubmitError::Duplicate);
        }
        self.submissions.push(Submission { session, onion });
        Ok(())
    }

    /// Atomically take the current batch and advance the round.
    pub fn freeze(&mut self) -> RoundBatch {
        let batch = RoundBatch {
            round: self.round,
            submissions: std::mem::take(&mut self.submissions),
        };
        self.submitted.clear();
        self.round += 1;
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_one_submission_per_session() {
        let mut ledger = RoundLedger::new();
        assert_eq!(ledger.current(), 0);

        assert!(ledger.submit(1, 0, vec![0xAA]).is_ok());
        assert_eq!(ledger.submit(1, 0, vec![0xBB]), Err(SubmitError::Duplicate));
        assert!(ledger.submit(2, 0, vec![0xCC]).is_ok());

        let batch = ledger.freeze();
        assert_eq!(batch.round, 0);
        assert_eq!(batch.submissions.len(), 2);
        assert_eq!(batch.submissions[0].session, 1);
        assert_eq!(batch.submissions[1].session, 2);
    }

    #[test]
    fn rejects_wrong_round() {
        let mut ledger = RoundLedger::new();
        ledger.freeze();
        assert_eq!(ledger.current(), 1);

        // Stale submission for round 0 after the advance.
        assert_eq!(
            ledger.submit(7, 0, vec![1]),
            Err(SubmitError::WrongRound { current: 1 })
        );
        // Early submission for a future round is equally wrong.
        assert_eq!(
            ledger.submit(7, 5, vec![1]),
            Err(SubmitError::WrongRound { current: 1 })
        );
        // Rejections occupy no slot.
        assert!(ledger.freeze().submissions.is_empty());
    }

    #[test]
    fn freeze_resets_duplicate_tracking() {
        let mut ledger = RoundLedger::new();
        ledger.submit(1, 0, vec![1]).unwrap();
        ledger.freeze();
        // Same session may submit again next round.
        assert!(ledger.submit(1, 1, vec![2]).is_ok());
    }

    #[test]
    fn rounds_are_strictly_monotonic() {
        let mut ledger = RoundLedger::new();
        let mut last = ledger.current();
        for _ in 0..100 {
            ledger.freeze();
            assert!(ledger.current() > last);
            last = ledger.current();
        }
    }
}
