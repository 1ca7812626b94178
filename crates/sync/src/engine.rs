//! The bootstrap engine: per-round sync decision, single sync attempts,
//! the request/wait protocol and the sync loop.
//!
//! Rollback lives in `rollback.rs`, startup replay in `replay.rs`; both are
//! further `impl` blocks on [`BootstrapEngine`].

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::metrics::{Metric, StatusHandler};
use crate::pending::PendingRequest;
use crate::replay::NotarizedInfo;
use crate::rollback::RollBackMode;
use crate::traits::{
    BlockBootstrapper, BlockHeaderState, BlockProcessor, ChainHandler, ForkDetector, ForkInfo,
    HeaderResolver, HeadersPool, NetworkConnectionWatcher, Rounder, StateAdapter, Storer,
    StorageBootstrapper,
};
use lattice_types::{BlockHeader, Hash, Nonce, Round, ShardId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, trace, Instrument, Span};

/// Listener notified whenever the node's synchronized state flips.
///
/// Receives the new `is_node_synchronized` value. Invoked on its own spawned
/// task; it must be cheap or hand off to its own executor.
pub type SyncStateListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Handle identifying a registered sync-state listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Optional hook fired when a header arrives by nonce, used by shard nodes to
/// prefetch the miniblocks the header references.
pub type MiniBlockTrigger = Arc<dyn Fn(ShardId, Nonce) + Send + Sync>;

/// Snapshot of the per-round sync decision.
#[derive(Debug, Clone)]
struct SyncStatus {
    is_node_synchronized: bool,
    has_last_block: bool,
    round_index: Round,
    fork: ForkInfo,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            is_node_synchronized: false,
            has_last_block: false,
            round_index: Round(0),
            fork: ForkInfo::none(),
        }
    }
}

/// Collaborators and configuration for [`BootstrapEngine::new`].
///
/// Every collaborator is mandatory; a missing one is a compile error, not a
/// runtime check.
pub struct BootstrapArgs {
    pub chain: Arc<dyn ChainHandler>,
    pub block_processor: Arc<dyn BlockProcessor>,
    pub fork_detector: Arc<dyn ForkDetector>,
    pub block_bootstrapper: Arc<dyn BlockBootstrapper>,
    pub storage_bootstrapper: Arc<dyn StorageBootstrapper>,
    pub header_resolver: Arc<dyn HeaderResolver>,
    pub network_watcher: Arc<dyn NetworkConnectionWatcher>,
    pub rounder: Arc<dyn Rounder>,
    pub accounts: Arc<dyn StateAdapter>,
    pub headers_pool: Arc<dyn HeadersPool>,
    pub header_store: Arc<dyn Storer>,
    pub header_nonce_hash_store: Arc<dyn Storer>,
    pub status: Arc<dyn StatusHandler>,
    pub config: SyncConfig,
    pub shard: ShardId,
    pub request_mini_blocks: Option<MiniBlockTrigger>,
}

/// The block-synchronization engine.
///
/// One instance per chain (shard or metachain). A single sync attempt runs at
/// a time, driven by the loop spawned from [`Self::spawn_sync_loop`];
/// header-arrival callbacks may run concurrently with it and with each other.
pub struct BootstrapEngine {
    pub(crate) chain: Arc<dyn ChainHandler>,
    pub(crate) block_processor: Arc<dyn BlockProcessor>,
    pub(crate) fork_detector: Arc<dyn ForkDetector>,
    pub(crate) block_bootstrapper: Arc<dyn BlockBootstrapper>,
    pub(crate) storage_bootstrapper: Arc<dyn StorageBootstrapper>,
    pub(crate) header_resolver: Arc<dyn HeaderResolver>,
    pub(crate) network_watcher: Arc<dyn NetworkConnectionWatcher>,
    pub(crate) rounder: Arc<dyn Rounder>,
    pub(crate) accounts: Arc<dyn StateAdapter>,
    pub(crate) headers_pool: Arc<dyn HeadersPool>,
    pub(crate) header_store: Arc<dyn Storer>,
    pub(crate) header_nonce_hash_store: Arc<dyn Storer>,
    pub(crate) status: Arc<dyn StatusHandler>,

    pub(crate) config: SyncConfig,
    pub(crate) shard: ShardId,
    pub(crate) span: Span,

    pending_nonce: PendingRequest<Nonce>,
    pending_hash: PendingRequest<Hash>,

    sync_status: Mutex<SyncStatus>,
    listeners: Mutex<HashMap<ListenerId, SyncStateListener>>,
    next_listener_id: AtomicU64,
    requests_with_timeout: AtomicU32,
    stop_requested: AtomicBool,

    pub(crate) notarized: Mutex<NotarizedInfo>,
    request_mini_blocks: Option<MiniBlockTrigger>,
}

impl BootstrapEngine {
    /// Create a new engine. Fails fast on an invalid configuration.
    pub fn new(args: BootstrapArgs) -> Result<Arc<Self>, SyncError> {
        args.config.validate()?;

        let span = info_span!("bootstrap", shard = %args.shard);

        Ok(Arc::new(Self {
            chain: args.chain,
            block_processor: args.block_processor,
            fork_detector: args.fork_detector,
            block_bootstrapper: args.block_bootstrapper,
            storage_bootstrapper: args.storage_bootstrapper,
            header_resolver: args.header_resolver,
            network_watcher: args.network_watcher,
            rounder: args.rounder,
            accounts: args.accounts,
            headers_pool: args.headers_pool,
            header_store: args.header_store,
            header_nonce_hash_store: args.header_nonce_hash_store,
            status: args.status,
            config: args.config,
            shard: args.shard,
            span,
            pending_nonce: PendingRequest::new(),
            pending_hash: PendingRequest::new(),
            sync_status: Mutex::new(SyncStatus::default()),
            listeners: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(0),
            requests_with_timeout: AtomicU32::new(0),
            stop_requested: AtomicBool::new(false),
            notarized: Mutex::new(NotarizedInfo::new()),
            request_mini_blocks: args.request_mini_blocks,
        }))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Per-round sync decision
    // ═══════════════════════════════════════════════════════════════════════

    /// Whether the node still needs to synchronize.
    ///
    /// Returns true unconditionally while disconnected from the network (the
    /// loop skips the actual attempt in that case). Otherwise the decision is
    /// memoized per round: once a round was judged synchronized, the cached
    /// negative answer is returned until the round advances.
    pub fn should_sync(&self) -> bool {
        if !self.network_watcher.is_connected_to_the_network() {
            return true;
        }

        let _guard = self.span.enter();
        let mut status = self.sync_status.lock();

        let current_round = self.rounder.index();
        if status.round_index == current_round && status.is_node_synchronized {
            return false;
        }

        status.fork = self.fork_detector.check_fork();

        let head_nonce = self
            .chain
            .current_header()
            .map(|header| header.nonce)
            .unwrap_or(Nonce(0));
        status.has_last_block = self.fork_detector.probable_highest_nonce() <= head_nonce;

        let is_synchronized = !status.fork.detected && status.has_last_block;
        if is_synchronized != status.is_node_synchronized {
            debug!(
                synchronized = is_synchronized,
                "node has changed its synchronized state"
            );
            status.is_node_synchronized = is_synchronized;
            self.notify_sync_state_listeners(is_synchronized);
        }

        status.round_index = current_round;

        self.status
            .set_uint64_value(Metric::IsSyncing, u64::from(!is_synchronized));

        !is_synchronized
    }

    /// The synchronized state from the last per-round decision.
    pub fn is_node_synchronized(&self) -> bool {
        self.sync_status.lock().is_node_synchronized
    }

    /// Consecutive timed-out requests since the last successful commit.
    pub fn requests_with_timeout(&self) -> u32 {
        self.requests_with_timeout.load(Ordering::SeqCst)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sync-state listeners
    // ═══════════════════════════════════════════════════════════════════════

    /// Register a listener fired on every synchronized-state transition.
    pub fn add_sync_state_listener(&self, listener: SyncStateListener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().insert(id, listener);
        id
    }

    /// Unregister a previously added listener.
    pub fn remove_sync_state_listener(&self, id: ListenerId) {
        self.listeners.lock().remove(&id);
    }

    fn notify_sync_state_listeners(&self, is_synchronized: bool) {
        let listeners: Vec<SyncStateListener> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            tokio::spawn(async move { listener(is_synchronized) });
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Single sync attempt
    // ═══════════════════════════════════════════════════════════════════════

    /// Run one sync attempt: resolve a detected fork, then fetch, process and
    /// commit the next block. A no-op when the node is already synchronized.
    pub async fn sync_block(&self) -> Result<(), SyncError> {
        let span = self.span.clone();
        self.sync_block_inner().instrument(span).await
    }

    async fn sync_block_inner(&self) -> Result<(), SyncError> {
        if !self.should_sync() {
            return Ok(());
        }

        let fork = self.sync_status.lock().fork.clone();

        if fork.detected {
            self.status.increment(Metric::NumTimesInForkChoice);

            if fork.is_forced() {
                debug!("fork has been forced");
                self.roll_back_on_forced_fork();
                return Ok(());
            }

            debug!(nonce = %fork.nonce, hash = ?fork.hash, "fork detected");
            if let Err(err) = self.roll_back(RollBackMode::ToForkNonce(fork.nonce)) {
                debug!(%err, "roll back");
            }
        }

        let (header, result) = self.request_process_and_commit(&fork).await;
        if let Err(err) = &result {
            self.handle_sync_block_failure(header.as_ref(), err);
        }

        result
    }

    /// Fetch the next header and body, then process and commit them.
    ///
    /// Returns the header involved (when one was resolved) alongside the
    /// outcome, so the failure handler can purge it.
    async fn request_process_and_commit(
        &self,
        fork: &ForkInfo,
    ) -> (Option<Arc<BlockHeader>>, Result<(), SyncError>) {
        let header = match self.get_next_header_requesting_if_missing(fork).await {
            Ok(header) => header,
            Err(err) => {
                self.fork_detector.reset_probable_highest_nonce_if_needed();
                return (None, Err(err));
            }
        };

        self.request_headers_from_nonce_if_missing(header.nonce.next());

        let body = match self
            .block_bootstrapper
            .get_block_body_requesting_if_missing(&header)
            .await
        {
            Ok(body) => body,
            Err(err) => return (Some(header), Err(err)),
        };

        let time_budget = self.rounder.time_duration();

        let start = Instant::now();
        if let Err(err) =
            self.block_processor
                .process_block(self.chain.as_ref(), &header, &body, time_budget)
        {
            return (Some(header), Err(err));
        }
        debug!(elapsed = ?start.elapsed(), "elapsed time to process block");

        let start = Instant::now();
        if let Err(err) = self
            .block_processor
            .commit_block(self.chain.as_ref(), &header, &body)
        {
            return (Some(header), Err(err));
        }
        debug!(elapsed = ?start.elapsed(), "elapsed time to commit block");

        debug!(nonce = %header.nonce, "block has been synced successfully");
        self.requests_with_timeout.store(0, Ordering::SeqCst);

        (Some(header), Ok(()))
    }

    /// Classify a failed attempt and decide whether to purge and roll back.
    ///
    /// A timeout only counts; everything else rolls back immediately. Once
    /// the consecutive-timeout count crosses the configured threshold, the
    /// round phase is consulted (only then), and a proper-phase round forces
    /// the rollback plus a probable-highest-nonce reset.
    fn handle_sync_block_failure(&self, header: Option<&Arc<BlockHeader>>, err: &SyncError) {
        if matches!(err, SyncError::Timeout) {
            self.requests_with_timeout.fetch_add(1, Ordering::SeqCst);
        }

        let timeouts_over_threshold = self.requests_with_timeout.load(Ordering::SeqCst)
            > self.config.max_requests_with_timeout;
        let reset_and_roll_back = timeouts_over_threshold && self.rounder.is_in_proper_round();

        let should_roll_back = !matches!(err, SyncError::Timeout) || reset_and_roll_back;
        if !should_roll_back {
            return;
        }

        self.requests_with_timeout.store(0, Ordering::SeqCst);

        if let Some(header) = header {
            let hash = self.remove_header_from_pools(header);
            self.fork_detector.remove_headers(header.nonce, hash);
        }

        if reset_and_roll_back {
            self.fork_detector.reset_probable_highest_nonce();
        }

        if let Err(err) = self.roll_back(RollBackMode::OneStep) {
            debug!(%err, "roll back");
        }
    }

    pub(crate) fn remove_header_from_pools(&self, header: &BlockHeader) -> Hash {
        self.headers_pool.remove_header(header.nonce, header.shard);
        header.hash()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Request/wait protocol
    // ═══════════════════════════════════════════════════════════════════════

    /// Nonce of the next block to apply: head nonce + 1, or 1 before genesis
    /// has a successor.
    fn nonce_for_next_block(&self) -> Nonce {
        self.chain
            .current_header()
            .map(|header| header.nonce.next())
            .unwrap_or(Nonce(1))
    }

    async fn get_next_header_requesting_if_missing(
        &self,
        fork: &ForkInfo,
    ) -> Result<Arc<BlockHeader>, SyncError> {
        self.pending_hash.disarm();
        self.pending_nonce.disarm();

        if fork.detected {
            if let Some(fork_hash) = fork.hash {
                return self.get_header_with_hash_requesting_if_missing(fork_hash).await;
            }
        }

        let nonce = self.nonce_for_next_block();
        self.get_header_with_nonce_requesting_if_missing(nonce).await
    }

    async fn get_header_with_nonce_requesting_if_missing(
        &self,
        nonce: Nonce,
    ) -> Result<Arc<BlockHeader>, SyncError> {
        if let Ok((header, _)) = self.block_bootstrapper.get_header_from_pool_with_nonce(nonce) {
            return Ok(header);
        }

        let receiver = self.pending_nonce.arm(nonce);

        debug!(%nonce, "requesting header from network");
        if let Err(err) = self.header_resolver.request_data_from_nonce(nonce) {
            debug!(%err, "request data from nonce");
        }

        self.wait_for_completion(receiver).await?;

        let (header, _) = self.block_bootstrapper.get_header_from_pool_with_nonce(nonce)?;
        Ok(header)
    }

    async fn get_header_with_hash_requesting_if_missing(
        &self,
        hash: Hash,
    ) -> Result<Arc<BlockHeader>, SyncError> {
        if let Ok(header) = self.block_bootstrapper.get_header_from_pool_with_hash(hash) {
            return Ok(header);
        }

        let receiver = self.pending_hash.arm(hash);

        debug!(%hash, "requesting header from network");
        if let Err(err) = self.header_resolver.request_data_from_hash(hash) {
            debug!(%err, "request data from hash");
        }

        self.wait_for_completion(receiver).await?;

        self.block_bootstrapper.get_header_from_pool_with_hash(hash)
    }

    /// Wait for a pending request's completion signal, bounded by the
    /// configured wait timeout. A dropped signal (the request was replaced)
    /// counts as a timeout for the waiter.
    async fn wait_for_completion(&self, receiver: oneshot::Receiver<()>) -> Result<(), SyncError> {
        match tokio::time::timeout(self.config.wait_time, receiver).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) | Err(_) => Err(SyncError::Timeout),
        }
    }

    /// Fire-and-forget look-ahead: request headers after `from` that are not
    /// yet pooled, bounded by the configured window and the probable highest
    /// nonce. Never blocks the sync attempt.
    fn request_headers_from_nonce_if_missing(&self, from: Nonce) {
        let fork_detector = Arc::clone(&self.fork_detector);
        let block_bootstrapper = Arc::clone(&self.block_bootstrapper);
        let header_resolver = Arc::clone(&self.header_resolver);
        let advance = self.config.max_headers_requested_in_advance;
        let span = self.span.clone();

        tokio::spawn(
            async move {
                let window_end = from.0.saturating_add(advance - 1);
                let max_nonce = window_end.min(fork_detector.probable_highest_nonce().0);

                let mut requested = 0u64;
                for nonce in from.0..=max_nonce {
                    let nonce = Nonce(nonce);
                    if block_bootstrapper.have_header_in_pool_with_nonce(nonce) {
                        continue;
                    }
                    if let Err(err) = header_resolver.request_data_from_nonce(nonce) {
                        debug!(%err, "request data from nonce");
                        continue;
                    }
                    requested += 1;
                }

                if requested > 0 {
                    debug!(
                        num_headers = requested,
                        from = %from,
                        to = max_nonce,
                        "requested headers in advance"
                    );
                }
            }
            .instrument(span),
        );
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Header-arrival callbacks
    // ═══════════════════════════════════════════════════════════════════════

    /// Delivery of a header addressed by hash.
    ///
    /// Always feeds the fork detector; completes the outstanding hash request
    /// when it matches. Safe to call concurrently with a sync attempt and
    /// with [`Self::received_header_nonce`]; duplicates are no-ops for the
    /// request bookkeeping.
    pub fn process_received_header(&self, header: &Arc<BlockHeader>, hash: Hash) {
        let _guard = self.span.enter();
        trace!(nonce = %header.nonce, %hash, "received header from network");

        self.add_received_header_to_fork_detector(header, hash);

        if self.pending_hash.complete_if_matches(&hash) {
            debug!(nonce = %header.nonce, %hash, "received requested header from network");
        }
    }

    /// Delivery of a header addressed by nonce.
    ///
    /// Same fork-detector feed as the by-hash path, plus the optional
    /// miniblock prefetch trigger; completes the outstanding nonce request
    /// when it matches.
    pub fn received_header_nonce(&self, header: &Arc<BlockHeader>, hash: Hash) {
        let _guard = self.span.enter();
        trace!(nonce = %header.nonce, %hash, "received header from network");

        self.add_received_header_to_fork_detector(header, hash);

        if let Some(trigger) = &self.request_mini_blocks {
            let trigger = Arc::clone(trigger);
            let shard = header.shard;
            let nonce = header.nonce;
            tokio::spawn(async move { trigger(shard, nonce) });
        }

        if self.pending_nonce.complete_if_matches(&header.nonce) {
            debug!(nonce = %header.nonce, %hash, "received requested header from network");
        }
    }

    fn add_received_header_to_fork_detector(&self, header: &Arc<BlockHeader>, hash: Hash) {
        let result =
            self.fork_detector
                .add_header(header, hash, BlockHeaderState::Received, &[], &[]);
        if let Err(err) = result {
            debug!(%err, "fork detector add header");
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sync loop
    // ═══════════════════════════════════════════════════════════════════════

    /// Spawn the sync loop on the current runtime.
    ///
    /// The loop sleeps the configured interval between ticks, skips ticks
    /// while disconnected, and exits at the first tick after
    /// [`Self::stop_sync`] was called. Attempt errors are logged and never
    /// stop the loop.
    pub fn spawn_sync_loop(self: Arc<Self>) -> JoinHandle<()> {
        self.stop_requested.store(false, Ordering::SeqCst);

        tokio::spawn(async move { self.sync_blocks().await })
    }

    /// Request the sync loop to stop before its next tick. The attempt in
    /// flight, if any, is never interrupted.
    pub fn stop_sync(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    async fn sync_blocks(&self) {
        loop {
            tokio::time::sleep(self.config.sleep_interval).await;

            if !self.network_watcher.is_connected_to_the_network() {
                continue;
            }

            if self.stop_requested.load(Ordering::SeqCst) {
                return;
            }

            if let Err(err) = self.sync_block().await {
                debug!(parent: &self.span, %err, "sync block");
            }
        }
    }
}
