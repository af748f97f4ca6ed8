//! Background catch-up for freshly connected bindings.
//!
//! Durable bindings ask connected peers and the local persistent store at the
//! same time. Whichever answers first merges first; a later answer merges
//! only if its clock is newer (see [`Observed::merge_remote`]). Ephemeral
//! bindings have nothing to catch up on and announce their initial data to
//! peers instead.
//!
//! No failure here reaches the caller of `connect`.
//!
//! [`Observed::merge_remote`]: crate::reactive::Observed::merge_remote

use std::sync::Arc;

use futures::future;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::binding::PersistMode;
use crate::effects::StoreEffects;
use crate::reactive::{BoundData, WeakObserved};
use crate::reconcile::{reconcile, PayloadSource};
use crate::route::Route;

pub(crate) fn spawn<T: BoundData>(
    runtime: &Handle,
    store: Arc<dyn StoreEffects>,
    route: Route,
    mode: PersistMode,
    observed: WeakObserved<T>,
    done: watch::Sender<bool>,
) {
    runtime.spawn(async move {
        match mode {
            PersistMode::Durable => catch_up(store.as_ref(), &route, &observed).await,
            PersistMode::Ephemeral => announce(store.as_ref(), &route, &observed).await,
        }
        // Nobody may be waiting.
        let _ = done.send(true);
    });
}

async fn catch_up<T: BoundData>(
    store: &dyn StoreEffects,
    route: &Route,
    observed: &WeakObserved<T>,
) {
    let from_peers = async {
        match store.sync_with_peers(route).await {
            Ok(Some(raw)) => apply(observed, &raw, PayloadSource::PeerSync),
            Ok(None) => tracing::trace!(route = %route, "no peer answered"),
            Err(err) => tracing::warn!(route = %route, error = %err, "peer sync failed"),
        }
    };
    let from_store = async {
        match store.get(route).await {
            Ok(Some(raw)) => apply(observed, &raw, PayloadSource::PersistedGet),
            Ok(None) => tracing::trace!(route = %route, "nothing persisted"),
            Err(err) => tracing::warn!(route = %route, error = %err, "persisted read failed"),
        }
    };
    future::join(from_peers, from_store).await;
}

async fn announce<T: BoundData>(
    store: &dyn StoreEffects,
    route: &Route,
    observed: &WeakObserved<T>,
) {
    let Some(observed) = observed.upgrade() else {
        return;
    };
    let data = match observed.read(serde_json::to_string) {
        Ok(data) => data,
        Err(err) => {
            tracing::warn!(route = %route, error = %err, "cannot encode bound data");
            return;
        }
    };
    if let Err(err) = store.share(route, data).await {
        tracing::debug!(route = %route, error = %err, "initial share failed");
    }
}

fn apply<T: BoundData>(observed: &WeakObserved<T>, raw: &str, source: PayloadSource) {
    if let Some(observed) = observed.upgrade() {
        reconcile(&observed, raw, source);
    }
}
