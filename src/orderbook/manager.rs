//! Depth replica manager
//!
//! Owns the order book, bootstraps it from a REST snapshot, applies gated
//! WebSocket deltas, and fans each resulting snapshot out to an installable
//! observer sink. The sink is invoked with no book lock held and receives the
//! snapshot by value; clearing the sink before tearing down its resources is
//! the shutdown contract.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::{BookSnapshot, OrderBook, VersionGate};
use crate::latency::LatencyTracker;
use crate::parser::DepthFrame;
use crate::rest::SpotRest;
use crate::websocket::WsClient;

/// Depth levels included in observer snapshots
const SNAPSHOT_DEPTH: usize = 20;

/// Installable consumer of book snapshots
pub type UpdateSink = Arc<dyn Fn(BookSnapshot) + Send + Sync>;

/// Manages the depth replica for a single symbol
pub struct DepthManager {
    symbol: String,
    book: Arc<RwLock<OrderBook>>,
    gate: Mutex<VersionGate>,
    latency: LatencyTracker,
    sink: Mutex<Option<UpdateSink>>,
    subscribed: AtomicBool,
}

impl DepthManager {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            book: Arc::new(RwLock::new(OrderBook::new(symbol))),
            gate: Mutex::new(VersionGate::new()),
            latency: LatencyTracker::default(),
            sink: Mutex::new(None),
            subscribed: AtomicBool::new(false),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Shared read handle to the underlying book.
    pub fn book(&self) -> Arc<RwLock<OrderBook>> {
        self.book.clone()
    }

    pub fn latency(&self) -> &LatencyTracker {
        &self.latency
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Snapshot of the current replica (full ladders).
    pub async fn snapshot(&self) -> BookSnapshot {
        self.book.read().await.snapshot(SNAPSHOT_DEPTH, true)
    }

    /// Install the update sink, replacing any existing one.
    pub fn set_update_sink(&self, sink: UpdateSink) {
        *self.sink.lock().expect("sink slot poisoned") = Some(sink);
    }

    /// Remove the update sink. After this returns, no new invocations start;
    /// an in-flight invocation still holds its own clone of the sink.
    pub fn clear_update_sink(&self) {
        *self.sink.lock().expect("sink slot poisoned") = None;
    }

    /// Fetch a 100-level REST snapshot, apply it, and re-anchor the version
    /// gate to it.
    pub async fn bootstrap_from_rest<R: SpotRest>(&self, rest: &R) -> crate::error::Result<()> {
        let depth = rest.depth(&self.symbol, 100).await?;
        if depth.bids.is_empty() || depth.asks.is_empty() {
            warn!(
                bids = depth.bids.len(),
                asks = depth.asks.len(),
                "snapshot has an empty side; continuing with incremental bootstrap"
            );
        }

        let mut book = self.book.write().await;
        book.apply_snapshot(&depth.bids, &depth.asks, depth.last_update_id);
        let valid = book.is_valid();
        let (best_bid, best_ask) = (book.best_bid(), book.best_ask());
        drop(book);

        self.gate
            .lock()
            .expect("version gate poisoned")
            .reset_to_snapshot(depth.last_update_id);

        info!(
            version = depth.last_update_id,
            %best_bid,
            %best_ask,
            valid,
            "initial snapshot loaded"
        );
        Ok(())
    }

    /// Current continuity state: `(snapshot_version, last_to_version)`.
    pub fn version_state(&self) -> (i64, Option<i64>) {
        let gate = self.gate.lock().expect("version gate poisoned");
        (gate.snapshot_version(), gate.last_to_version())
    }

    /// Bootstrap from REST (when a client is given) and subscribe to the
    /// depth stream. Idempotent; returns false when the subscription send
    /// fails.
    pub async fn subscribe<R: SpotRest>(&self, ws: &mut WsClient, rest: Option<&R>) -> bool {
        if self.subscribed.load(Ordering::Acquire) {
            return true;
        }

        if let Some(rest) = rest {
            if let Err(e) = self.bootstrap_from_rest(rest).await {
                // Recovery then depends on a both-sided frame arriving.
                warn!(error = %e, "failed to fetch initial snapshot; building from stream");
            }
        }

        match ws.subscribe_depth(&self.symbol).await {
            Ok(()) => {
                self.subscribed.store(true, Ordering::Release);
                true
            }
            Err(e) => {
                error!(error = %e, "depth subscription failed");
                false
            }
        }
    }

    /// Unsubscribe from the depth stream if currently subscribed.
    pub async fn unsubscribe(&self, ws: &mut WsClient) {
        if self.subscribed.swap(false, Ordering::AcqRel) {
            if let Err(e) = ws.unsubscribe_depth(&self.symbol).await {
                warn!(error = %e, "depth unsubscribe failed");
            }
        }
    }

    /// Marks the subscription as gone (e.g. the transport dropped) without
    /// sending anything.
    pub fn mark_unsubscribed(&self) {
        self.subscribed.store(false, Ordering::Release);
    }

    /// The hot path: gate, apply, snapshot, notify.
    ///
    /// Returns false when the frame was rejected; the subscription stays
    /// active either way. Observers are notified even when the resulting book
    /// is invalid so a viewer can surface the anomaly.
    pub async fn on_frame(&self, frame: &DepthFrame) -> bool {
        let start = Instant::now();

        if !frame.has_levels() {
            debug!("skipping frame with no levels");
            return false;
        }

        let snapshot = {
            let mut book = self.book.write().await;
            let mut gate = self.gate.lock().expect("version gate poisoned");
            let outcome = match gate.admit(frame, book.is_empty(), book.is_valid()) {
                Ok(outcome) => outcome,
                Err(reject) => {
                    debug!(reason = %reject, "depth frame rejected");
                    return false;
                }
            };

            let bids = frame.bids.as_deref().unwrap_or(&[]);
            let asks = frame.asks.as_deref().unwrap_or(&[]);
            // Frames with no usable version keep the book's id monotone.
            let update_id = if outcome.update_id > 0 {
                outcome.update_id
            } else {
                book.last_update_id()
            };
            match outcome.kind {
                super::FrameKind::Snapshot => book.apply_snapshot(bids, asks, update_id),
                super::FrameKind::Delta => book.apply_update(bids, asks, update_id),
            }

            gate.record_applied(&outcome);
            book.snapshot(SNAPSHOT_DEPTH, true)
        };

        self.latency.record(start.elapsed());

        if let Some(reason) = snapshot.diagnosis() {
            debug!(reason, "book invalid after update; notifying observer anyway");
        }
        self.notify(snapshot);

        true
    }

    /// Copy the sink under its mutex, release, then invoke. Observer panics
    /// must not reach the transport.
    fn notify(&self, snapshot: BookSnapshot) {
        let sink = self.sink.lock().expect("sink slot poisoned").clone();
        if let Some(sink) = sink {
            if catch_unwind(AssertUnwindSafe(|| sink(snapshot))).is_err() {
                error!("observer sink panicked; continuing");
            }
        }
    }
}
