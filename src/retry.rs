// src/retry.rs
// Remembers the last dispatched network-issuing action so a generic "retry"
// chip can re-issue it. Snapshot only, not an audit trail.

use std::time::{Duration, Instant};

use crate::actions::Action;

#[derive(Debug, Clone)]
struct LastAction {
    action: Action,
    recorded_at: Instant,
}

/// Tracks the most recent request-issuing user action with a short expiry.
#[derive(Debug, Default)]
pub struct RetryTracker {
    last: Option<LastAction>,
}

impl RetryTracker {
    /// Overwrite the snapshot. Synthetic resubmissions (retry re-dispatch)
    /// skip this so transcript text is not duplicated.
    pub fn record(&mut self, action: &Action) {
        self.last = Some(LastAction {
            action: action.clone(),
            recorded_at: Instant::now(),
        });
    }

    /// The snapshot, if it has not expired. An expired snapshot is dropped.
    pub fn take_fresh(&mut self, expiry: Duration) -> Option<Action> {
        match &self.last {
            Some(last) if last.recorded_at.elapsed() <= expiry => Some(last.action.clone()),
            Some(_) => {
                self.last = None;
                None
            }
            None => None,
        }
    }

    pub fn clear(&mut self) {
        self.last = None;
    }
}
