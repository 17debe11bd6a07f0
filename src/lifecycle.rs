// src/lifecycle.rs
// Request lifecycle manager: monotonic request ids plus a cancellation token
// per dispatch. Tracks which request is current so late responses from a
// superseded call can be detected and dropped.

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle for one network-issuing dispatch. Every code path that resumes
/// after an await must check `superseded` through the lifecycle before
/// mutating shared state.
#[derive(Debug, Clone)]
pub struct RequestTicket {
    pub id: u64,
    pub token: CancellationToken,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    current: Option<u64>,
    token: Option<CancellationToken>,
}

/// Issues tickets and supersedes prior in-flight requests.
#[derive(Debug, Default)]
pub struct Lifecycle {
    inner: Mutex<Inner>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new request, cancelling and superseding any prior one.
    pub fn begin(&self) -> RequestTicket {
        let mut inner = self.inner.lock().expect("lifecycle lock poisoned");
        if let Some(prior) = inner.token.take() {
            prior.cancel();
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.current = Some(id);
        let token = CancellationToken::new();
        inner.token = Some(token.clone());
        debug!(request_id = id, "request started");
        RequestTicket { id, token }
    }

    pub fn is_current(&self, id: u64) -> bool {
        let inner = self.inner.lock().expect("lifecycle lock poisoned");
        inner.current == Some(id)
    }

    /// True when this ticket's effects must be discarded: either its token
    /// was cancelled or a newer request took over.
    pub fn superseded(&self, ticket: &RequestTicket) -> bool {
        ticket.token.is_cancelled() || !self.is_current(ticket.id)
    }

    /// Cancel whatever is in flight (start over / explicit cancel).
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock().expect("lifecycle lock poisoned");
        if let Some(token) = inner.token.take() {
            token.cancel();
        }
        if let Some(id) = inner.current.take() {
            debug!(request_id = id, "request cancelled");
        }
    }
}
