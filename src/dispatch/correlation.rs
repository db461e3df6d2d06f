use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::message::ReplyMessage;

/// Process-unique, unguessable token tying a published work item to its
/// eventual reply. Never reused while its registry entry is live.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// 128 random bits, hex-encoded.
    pub fn generate() -> Self {
        CorrelationId(Uuid::new_v4().as_simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        CorrelationId(value.to_string())
    }
}

pub type ReplySender = oneshot::Sender<Result<ReplyMessage, DispatchError>>;

/// One in-flight request waiting for its reply.
///
/// A pending request undergoes exactly one terminal transition: `resolve`
/// when its reply is matched, `fail` on timeout or broker loss, or `cancel`
/// when a failed publish rolls it back. All three consume the entry, so the
/// type system rules out a second transition.
pub struct PendingRequest {
    created_at: Instant,
    reply_tx: ReplySender,
    timer: Option<AbortHandle>,
}

impl PendingRequest {
    pub fn new(reply_tx: ReplySender) -> Self {
        PendingRequest {
            created_at: Instant::now(),
            reply_tx,
            timer: None,
        }
    }

    /// How long this request has been in flight.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn resolve(self, reply: ReplyMessage) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        if self.reply_tx.send(Ok(reply)).is_err() {
            debug!("caller went away before its reply arrived, dropping payload");
        }
    }

    pub fn fail(self, error: DispatchError) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        if self.reply_tx.send(Err(error)).is_err() {
            debug!("caller went away before its failure could be reported");
        }
    }

    /// Rolls the entry back without notifying the caller; the caller still
    /// holds the receiving end and learns the outcome on the submit path.
    pub fn cancel(self) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
    }
}

/// The multiplexing heart: a concurrency-safe map from correlation id to
/// pending request, shared by the submission path and the reply path.
///
/// Removal is the single source of truth for the reply-vs-timeout race:
/// whichever path `take`s the entry first performs the terminal transition,
/// the loser observes an absent entry and does nothing.
#[derive(Clone, Default)]
pub struct CorrelationRegistry {
    inner: Arc<Mutex<HashMap<CorrelationId, PendingRequest>>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: CorrelationId, pending: PendingRequest) {
        self.lock().insert(id, pending);
    }

    /// Removes and returns the entry, if still live.
    pub fn take(&self, id: &CorrelationId) -> Option<PendingRequest> {
        self.lock().remove(id)
    }

    /// Attaches the timeout timer to a live entry. If the entry already
    /// reached its terminal transition there is nothing left to guard and
    /// the timer is aborted on the spot.
    pub fn arm(&self, id: &CorrelationId, timer: AbortHandle) {
        let mut map = self.lock();
        match map.get_mut(id) {
            Some(pending) => pending.timer = Some(timer),
            None => timer.abort(),
        }
    }

    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Fails every in-flight request with `BrokerUnavailable`. Shared-fate
    /// path for connection loss and shutdown; returns how many were dropped.
    pub fn drain(&self, reason: &str) -> usize {
        let drained: Vec<(CorrelationId, PendingRequest)> = {
            let mut map = self.lock();
            map.drain().collect()
        };

        let count = drained.len();
        for (_, pending) in drained {
            pending.fail(DispatchError::BrokerUnavailable(reason.to_string()));
        }
        count
    }

    // A poisoned lock still yields the map; the critical sections hold no
    // invariants beyond the map itself.
    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingRequest>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
