use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use thiserror::Error;

use bookwell_core::AggregateId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// What a projection should do with an incoming event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep {
    Apply,
    /// Already applied (redelivery).
    Skip,
}

/// Last applied sequence number per stream.
///
/// A projection may join a stream mid-way (first seen sequence > 1); after
/// that every event must follow its predecessor without gaps.
#[derive(Debug, Default)]
pub struct StreamCursors {
    last: RwLock<HashMap<AggregateId, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, aggregate_id: AggregateId) -> u64 {
        let last = self.last.read().unwrap_or_else(PoisonError::into_inner);
        last.get(&aggregate_id).copied().unwrap_or(0)
    }

    pub fn check(&self, aggregate_id: AggregateId, seq: u64) -> Result<CursorStep, CursorError> {
        let last = self.position(aggregate_id);
        if seq == 0 {
            return Err(CursorError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(CursorStep::Skip);
        }
        if last != 0 && seq != last + 1 {
            return Err(CursorError::NonMonotonicSequence { last, found: seq });
        }
        Ok(CursorStep::Apply)
    }

    pub fn advance(&self, aggregate_id: AggregateId, seq: u64) {
        self.last
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(aggregate_id, seq);
    }

    pub fn clear(&self) {
        self.last.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_redelivery_and_rejects_gaps() {
        let cursors = StreamCursors::new();
        let id = AggregateId::new();

        assert_eq!(cursors.check(id, 1), Ok(CursorStep::Apply));
        cursors.advance(id, 1);
        assert_eq!(cursors.check(id, 1), Ok(CursorStep::Skip));
        assert_eq!(cursors.check(id, 2), Ok(CursorStep::Apply));
        assert_eq!(
            cursors.check(id, 4),
            Err(CursorError::NonMonotonicSequence { last: 1, found: 4 })
        );
    }

    #[test]
    fn may_join_a_stream_mid_way() {
        let cursors = StreamCursors::new();
        assert_eq!(cursors.check(AggregateId::new(), 5), Ok(CursorStep::Apply));
    }
}
