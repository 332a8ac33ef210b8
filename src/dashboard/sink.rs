use chrono::{DateTime, Utc};
use futures::stream::Stream;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use super::client::BlockSnapshot;
use super::contract::{ContractHandle, ContractMetadata};

const CHANNEL_SIZE: usize = 16;

/// Latest observed chain data. `None` means "not fetched yet".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshState {
    pub latest_block_number: Option<u64>,
    pub last_update_time: Option<DateTime<Utc>>,
    pub latest_block: Option<BlockSnapshot>,
    pub contract: Option<ContractHandle>,
    pub contract_metadata: Option<ContractMetadata>,
}

/// A chain head observation. Number and observation time always travel
/// together.
#[derive(Debug, Clone, PartialEq)]
pub struct Head {
    pub number: u64,
    pub observed_at: DateTime<Utc>,
    pub block: Option<BlockSnapshot>,
}

impl Head {
    pub fn new(number: u64, block: Option<BlockSnapshot>) -> Self {
        Self { number, observed_at: Utc::now(), block }
    }
}

/// Fields to merge into [`RefreshState`]. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct RefreshUpdate {
    pub head: Option<Head>,
    pub contract: Option<ContractHandle>,
    pub contract_metadata: Option<ContractMetadata>,
}

impl RefreshUpdate {
    pub fn head(head: Head) -> Self {
        Self { head: Some(head), ..Default::default() }
    }

    pub fn contract(contract: ContractHandle) -> Self {
        Self { contract: Some(contract), ..Default::default() }
    }

    pub fn with_metadata(mut self, metadata: ContractMetadata) -> Self {
        self.contract_metadata = Some(metadata);
        self
    }

    fn is_empty(&self) -> bool {
        self.head.is_none() && self.contract.is_none() && self.contract_metadata.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&RefreshState) + Send + Sync>;

/// Holds the [`RefreshState`] and fans each update out to subscribers.
///
/// Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct RefreshSink {
    inner: Arc<Inner>,
}

struct Inner {
    state: RwLock<RefreshState>,
    subscribers: Mutex<BTreeMap<SubscriptionId, Callback>>,
    next_id: AtomicU64,
    tx: broadcast::Sender<RefreshState>,
    driven: AtomicBool,
}

impl std::fmt::Debug for RefreshSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshSink").field("state", &self.snapshot()).finish()
    }
}

impl Default for RefreshSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_SIZE);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(RefreshState::default()),
                subscribers: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
                tx,
                driven: AtomicBool::new(false),
            }),
        }
    }

    /// A consistent copy of the current state.
    pub fn snapshot(&self) -> RefreshState {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merges `update` into the state and notifies subscribers.
    ///
    /// Readers observe either the state before or after the whole update.
    pub fn update(&self, update: RefreshUpdate) {
        if update.is_empty() {
            return;
        }

        let state = {
            let mut state = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(head) = update.head {
                if let Some(previous) = state.latest_block_number.filter(|p| *p > head.number) {
                    warn!(previous, current = head.number, "block height regressed");
                }
                state.latest_block_number = Some(head.number);
                state.last_update_time = Some(head.observed_at);
                if head.block.is_some() {
                    state.latest_block = head.block;
                }
            }
            if let Some(contract) = update.contract {
                state.contract = Some(contract);
            }
            if let Some(metadata) = update.contract_metadata {
                state.contract_metadata = Some(metadata);
            }
            state.clone()
        };

        // Callbacks run outside the lock so they may (un)subscribe.
        let callbacks: Vec<Callback> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(&state);
        }
        // No receivers is fine.
        let _ = self.inner.tx.send(state);
    }

    /// Registers `callback` to run after every update with the full state.
    ///
    /// Callbacks run on the poller's task while it holds its control lock:
    /// they must return quickly and must not call back into the poller.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&RefreshState) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));
        id
    }

    /// Returns whether `id` was subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Stream of states, one per update made after this call.
    ///
    /// The broadcast receiver is wrapped into a stream and lagged items are
    /// dropped, so a slow consumer skips to newer states instead of erroring.
    pub fn stream(&self) -> impl Stream<Item = RefreshState> + Unpin {
        let broadcast_stream: BroadcastStream<RefreshState> = self.inner.tx.subscribe().into();
        broadcast_stream.filter_map(|r| futures::future::ready(r.ok()))
    }

    /// Marks the sink as driven by a poller. Returns `false` if it already is.
    pub(crate) fn try_claim(&self) -> bool {
        self.inner
            .driven
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.inner.driven.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn contract() -> ContractHandle {
        ContractHandle::from_abi_json("[]", "0x95222290dd7278aa3ddd389cc1e1d165cc4bafe5")
            .expect("valid handle")
    }

    #[test]
    fn test_new_sink_is_empty() {
        let sink = RefreshSink::new();
        assert_eq!(sink.snapshot(), RefreshState::default());
    }

    #[test]
    fn test_head_update_sets_number_and_time_together() {
        let sink = RefreshSink::new();
        let head = Head::new(1_000_000, None);
        let observed_at = head.observed_at;

        sink.update(RefreshUpdate::head(head));

        let state = sink.snapshot();
        assert_eq!(state.latest_block_number, Some(1_000_000));
        assert_eq!(state.last_update_time, Some(observed_at));
        assert!(state.latest_block.is_none());
        assert!(state.contract.is_none());
    }

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let sink = RefreshSink::new();
        sink.update(RefreshUpdate::head(Head::new(7, None)));
        sink.update(
            RefreshUpdate::contract(contract())
                .with_metadata(ContractMetadata::from([("name".to_string(), "DAO".to_string())])),
        );

        let state = sink.snapshot();
        assert_eq!(state.latest_block_number, Some(7));
        assert!(state.last_update_time.is_some());
        assert_eq!(state.contract, Some(contract()));
        assert_eq!(
            state.contract_metadata.and_then(|m| m.get("name").cloned()),
            Some("DAO".to_string())
        );
    }

    #[test]
    fn test_regression_is_a_benign_overwrite() {
        let sink = RefreshSink::new();
        sink.update(RefreshUpdate::head(Head::new(10, None)));
        sink.update(RefreshUpdate::head(Head::new(8, None)));
        assert_eq!(sink.snapshot().latest_block_number, Some(8));
    }

    #[test]
    fn test_subscribers_receive_full_state_until_unsubscribed() {
        let sink = RefreshSink::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_callback = seen.clone();
        let id = sink.subscribe(move |state| {
            seen_in_callback
                .lock()
                .expect("lock")
                .push(state.latest_block_number);
        });

        sink.update(RefreshUpdate::head(Head::new(1, None)));
        sink.update(RefreshUpdate::contract(contract()));
        assert!(sink.unsubscribe(id));
        assert!(!sink.unsubscribe(id));
        sink.update(RefreshUpdate::head(Head::new(2, None)));

        assert_eq!(*seen.lock().expect("lock"), vec![Some(1), Some(1)]);
    }

    #[test]
    fn test_empty_update_notifies_nobody() {
        let sink = RefreshSink::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        sink.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sink.update(RefreshUpdate::default());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let sink = RefreshSink::new();
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::default();
        let handle = sink.clone();
        let slot_in_callback = slot.clone();
        let id = sink.subscribe(move |_| {
            if let Some(id) = slot_in_callback.lock().expect("lock").take() {
                handle.unsubscribe(id);
            }
        });
        *slot.lock().expect("lock") = Some(id);

        sink.update(RefreshUpdate::head(Head::new(1, None)));
        assert!(!sink.unsubscribe(id));
    }

    #[tokio::test]
    async fn test_stream_yields_updates() {
        let sink = RefreshSink::new();
        let mut stream = sink.stream();

        sink.update(RefreshUpdate::head(Head::new(1, None)));
        sink.update(RefreshUpdate::head(Head::new(2, None)));

        let first = stream.next().await.expect("first state");
        let second = stream.next().await.expect("second state");
        assert_eq!(first.latest_block_number, Some(1));
        assert_eq!(second.latest_block_number, Some(2));
    }

    #[test]
    fn test_only_one_driver_at_a_time() {
        let sink = RefreshSink::new();
        assert!(sink.try_claim());
        assert!(!sink.clone().try_claim());
        sink.release();
        assert!(sink.try_claim());
    }
}
