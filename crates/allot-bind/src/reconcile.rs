//! Merging of remote and bootstrap payloads into bound data.
//!
//! Payloads reach a binding from three places: its store subscription, the
//! peer-sync bootstrap answer and the persisted-get bootstrap answer. All
//! three go through [`reconcile`], which decodes the envelope, checks the
//! clock and merges the state field by field through
//! [`Observed::merge_remote`]. Anything that fails to decode is dropped.

use std::fmt;
use std::sync::Arc;

use crate::effects::{EventHandler, EventOrigin, StoreEvent};
use crate::errors::WireError;
use crate::reactive::{BoundData, MergeOutcome, Observed, WeakObserved};
use crate::wire::Envelope;

/// Where a payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadSource {
    /// Store subscription event
    Subscription,
    /// Bootstrap `sync_with_peers` answer
    PeerSync,
    /// Bootstrap `get` answer
    PersistedGet,
}

impl fmt::Display for PayloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscription => f.write_str("subscription"),
            Self::PeerSync => f.write_str("peer_sync"),
            Self::PersistedGet => f.write_str("persisted_get"),
        }
    }
}

/// What happened to one payload.
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// The payload decoded and was offered to the bound data
    Merged(MergeOutcome),
    /// The envelope carried no state
    Absent,
    /// The payload failed to decode
    Malformed(WireError),
}

impl ReconcileOutcome {
    /// Whether bound data changed.
    pub fn applied(&self) -> bool {
        matches!(self, Self::Merged(MergeOutcome::Applied))
    }
}

/// Decode `raw` and merge it into `observed`.
pub fn reconcile<T: BoundData>(
    observed: &Observed<T>,
    raw: &str,
    source: PayloadSource,
) -> ReconcileOutcome {
    let route = observed.route();
    let envelope = match Envelope::decode(raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(route, %source, error = %err, "dropping malformed payload");
            return ReconcileOutcome::Malformed(err);
        }
    };
    let state = match envelope.state() {
        Ok(Some(state)) => state,
        Ok(None) => {
            tracing::trace!(route, %source, "payload carries no state");
            return ReconcileOutcome::Absent;
        }
        Err(err) => {
            tracing::warn!(route, %source, error = %err, "dropping malformed payload");
            return ReconcileOutcome::Malformed(err);
        }
    };

    let outcome = observed.merge_remote(&state, envelope.clock);
    match &outcome {
        MergeOutcome::Applied => {
            tracing::debug!(route, %source, clock = ?envelope.clock, "merged remote state");
        }
        MergeOutcome::Empty => {
            tracing::trace!(route, %source, "payload state is empty");
        }
        MergeOutcome::Stale { incoming, current } => {
            tracing::debug!(route, %source, incoming, current, "ignoring stale payload");
        }
        MergeOutcome::Rejected(err) => {
            tracing::warn!(route, %source, error = %err, "payload does not fit bound data");
        }
    }
    ReconcileOutcome::Merged(outcome)
}

/// Store listener feeding remote events for a binding into [`reconcile`].
///
/// Local echoes are skipped: the write they report has already been applied
/// and notified through the local write path. The listener holds the bound
/// data weakly and goes quiet once every handle is dropped.
pub fn subscription_handler<T: BoundData>(observed: WeakObserved<T>) -> EventHandler {
    Arc::new(move |event: &StoreEvent| {
        if event.origin == EventOrigin::Local {
            return;
        }
        if let Some(observed) = observed.upgrade() {
            reconcile(&observed, &event.payload, PayloadSource::Subscription);
        }
    })
}
