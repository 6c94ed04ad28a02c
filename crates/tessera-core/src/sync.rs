//! Canvas synchronisation
//!
//! One subscription per canvas keeps the [`CanvasStore`] in step with the
//! remote canvas. Each subscription is an explicit state machine
//! (`Disconnected -> Connecting -> Subscribed`, or `Faulted`) with one handler
//! per server message kind:
//!
//! - Full frames are fetched inline and replace the canvas, bumping its
//!   generation
//! - Diff frames are queued, together with the generation current at arrival,
//!   on a per-canvas single-consumer merge queue; a merge whose generation has
//!   been superseded by a full frame is dropped
//! - Keep-alives and unknown shapes are ignored (the latter logged)
//! - `connection_error` faults the subscription and raises a [`FatalSignal`]
//!
//! Subscriptions are never repaired in place: [`CanvasSync::resync`] tears
//! every one down and builds fresh ones.

use crate::error::{ChannelError, ErrorClass};
use crate::ports::{BitmapFetcher, ChannelConnector, FrameChannel};
use crate::protocol::{ClientMessage, FrameEvent, ServerMessage};
use crate::types::{AccountId, SessionToken};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::ops::ControlFlow;
use std::sync::Arc;
use tessera_canvas::{CanvasId, CanvasStore, Generation, MergeOutcome};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Lifecycle of one canvas subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    /// No channel
    Disconnected,
    /// Channel open, handshake in progress
    Connecting,
    /// Receiving frames
    Subscribed,
    /// Channel broke; waiting for the next resync
    Faulted,
}

/// Authentication-level rejection raised by a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalSignal {
    /// Canvas whose subscription was rejected
    pub canvas: CanvasId,
    /// Server-supplied reason
    pub reason: String,
}

#[derive(Debug)]
struct MergeJob {
    url: String,
    generation: Generation,
}

struct SubscriptionHandle {
    state: Arc<RwLock<SubscriptionState>>,
    reader: JoinHandle<()>,
    merger: JoinHandle<()>,
}

impl SubscriptionHandle {
    fn abort(&self) {
        self.reader.abort();
        self.merger.abort();
    }
}

/// Owner of every canvas subscription
pub struct CanvasSync {
    store: Arc<CanvasStore>,
    fetcher: Arc<dyn BitmapFetcher>,
    connector: Arc<dyn ChannelConnector>,
    fatal_tx: mpsc::UnboundedSender<FatalSignal>,
    subscriptions: DashMap<CanvasId, SubscriptionHandle>,
}

impl std::fmt::Debug for CanvasSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasSync")
            .field("subscriptions", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}

impl CanvasSync {
    /// Create with no subscriptions; fatal signals go to `fatal_tx`
    #[must_use]
    pub fn new(
        store: Arc<CanvasStore>,
        fetcher: Arc<dyn BitmapFetcher>,
        connector: Arc<dyn ChannelConnector>,
        fatal_tx: mpsc::UnboundedSender<FatalSignal>,
    ) -> Self {
        Self {
            store,
            fetcher,
            connector,
            fatal_tx,
            subscriptions: DashMap::new(),
        }
    }

    /// Store this sync writes to
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<CanvasStore> {
        &self.store
    }

    /// Tear down every subscription and open fresh ones
    ///
    /// Canvases are paired with `tokens` in order; canvases left without a
    /// token stay `Disconnected` until the next resync. In-flight fetches of
    /// the old subscriptions are abandoned.
    pub fn resync(&self, tokens: &[(AccountId, SessionToken)]) {
        let canvases: Vec<CanvasId> = self.store.canvases().collect();
        tracing::info!(canvases = canvases.len(), tokens = tokens.len(), "rebuilding subscriptions");

        for (i, canvas) in canvases.into_iter().enumerate() {
            if let Some((_, old)) = self.subscriptions.remove(&canvas) {
                old.abort();
            }
            let Some((account, token)) = tokens.get(i) else {
                tracing::warn!(%canvas, "no account left to subscribe with");
                continue;
            };
            tracing::debug!(%canvas, %account, "subscribing");
            let handle = self.spawn(canvas, token.clone());
            self.subscriptions.insert(canvas, handle);
        }
    }

    /// Current state of a canvas' subscription
    #[must_use]
    pub fn state(&self, canvas: CanvasId) -> SubscriptionState {
        self.subscriptions
            .get(&canvas)
            .map_or(SubscriptionState::Disconnected, |h| *h.state.read())
    }

    /// True while the canvas' subscription is receiving frames
    #[inline]
    #[must_use]
    pub fn is_live(&self, canvas: CanvasId) -> bool {
        self.state(canvas) == SubscriptionState::Subscribed
    }

    /// Abort every subscription
    pub fn shutdown(&self) {
        for entry in self.subscriptions.iter() {
            entry.abort();
        }
        self.subscriptions.clear();
        tracing::info!("subscriptions closed");
    }

    fn spawn(&self, canvas: CanvasId, token: SessionToken) -> SubscriptionHandle {
        let state = Arc::new(RwLock::new(SubscriptionState::Disconnected));
        let (merge_tx, merge_rx) = mpsc::unbounded_channel();

        let merger = tokio::spawn(run_merges(
            canvas,
            merge_rx,
            Arc::clone(&self.store),
            Arc::clone(&self.fetcher),
        ));

        let subscription = Subscription {
            canvas,
            state: Arc::clone(&state),
            store: Arc::clone(&self.store),
            fetcher: Arc::clone(&self.fetcher),
            merges: merge_tx,
            fatal_tx: self.fatal_tx.clone(),
        };
        let reader = tokio::spawn(subscription.run(Arc::clone(&self.connector), token));

        SubscriptionHandle {
            state,
            reader,
            merger,
        }
    }
}

impl Drop for CanvasSync {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            entry.abort();
        }
    }
}

/// Reader side of one canvas subscription
struct Subscription {
    canvas: CanvasId,
    state: Arc<RwLock<SubscriptionState>>,
    store: Arc<CanvasStore>,
    fetcher: Arc<dyn BitmapFetcher>,
    merges: mpsc::UnboundedSender<MergeJob>,
    fatal_tx: mpsc::UnboundedSender<FatalSignal>,
}

impl Subscription {
    async fn run(self, connector: Arc<dyn ChannelConnector>, token: SessionToken) {
        self.set(SubscriptionState::Connecting);

        let mut channel = match connector.connect(self.canvas).await {
            Ok(channel) => channel,
            Err(e) => {
                self.fault(&e);
                return;
            }
        };
        if let Err(e) = channel.send(ClientMessage::ConnectionInit { token }).await {
            self.fault(&e);
            return;
        }

        while let Some(message) = channel.recv().await {
            let flow = match message {
                Ok(ServerMessage::ConnectionAck) => self.on_ack(channel.as_mut()).await,
                Ok(ServerMessage::KeepAlive) => ControlFlow::Continue(()),
                Ok(ServerMessage::Frame(frame)) => self.on_frame(frame).await,
                Ok(ServerMessage::ConnectionError { reason }) => self.on_connection_error(reason),
                Ok(ServerMessage::Unknown(value)) => {
                    tracing::warn!(canvas = %self.canvas, %value, "unhandled message");
                    ControlFlow::Continue(())
                }
                Err(e) => self.on_channel_error(&e),
            };
            if flow.is_break() {
                return;
            }
        }

        tracing::info!(canvas = %self.canvas, "subscription closed by remote");
        self.set(SubscriptionState::Faulted);
    }

    async fn on_ack(&self, channel: &mut dyn FrameChannel) -> ControlFlow<()> {
        if let Err(e) = channel.send(ClientMessage::Start { canvas: self.canvas }).await {
            self.fault(&e);
            return ControlFlow::Break(());
        }
        self.set(SubscriptionState::Subscribed);
        tracing::info!(canvas = %self.canvas, "subscribed");
        ControlFlow::Continue(())
    }

    async fn on_frame(&self, frame: FrameEvent) -> ControlFlow<()> {
        tracing::trace!(canvas = %self.canvas, url = frame.url(), "frame");
        if frame.subscription() != self.canvas {
            tracing::warn!(
                canvas = %self.canvas,
                subscription = %frame.subscription(),
                "frame for another subscription"
            );
            return ControlFlow::Continue(());
        }

        match frame {
            FrameEvent::Full { url, .. } => {
                let bitmap = match self.fetcher.fetch(&url).await {
                    Ok(bitmap) => bitmap,
                    Err(e) => {
                        tracing::warn!(canvas = %self.canvas, error = %e, "full frame fetch failed");
                        return ControlFlow::Continue(());
                    }
                };
                match self.store.replace(self.canvas, bitmap) {
                    Ok(generation) => {
                        tracing::debug!(canvas = %self.canvas, %generation, "full frame applied");
                    }
                    Err(e) => tracing::warn!(canvas = %self.canvas, error = %e, "full frame rejected"),
                }
            }
            FrameEvent::Diff { url, .. } => {
                let generation = self.store.generation(self.canvas).unwrap_or_default();
                if self.merges.send(MergeJob { url, generation }).is_err() {
                    tracing::warn!(canvas = %self.canvas, "merge queue closed");
                    return ControlFlow::Break(());
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn on_connection_error(&self, reason: String) -> ControlFlow<()> {
        self.set(SubscriptionState::Faulted);
        tracing::error!(canvas = %self.canvas, %reason, "subscription rejected authentication");
        // A closed receiver means the supervisor is already shutting down
        let _ = self.fatal_tx.send(FatalSignal {
            canvas: self.canvas,
            reason,
        });
        ControlFlow::Break(())
    }

    fn on_channel_error(&self, error: &ChannelError) -> ControlFlow<()> {
        match error.class() {
            ErrorClass::ProtocolAnomaly => {
                tracing::warn!(canvas = %self.canvas, %error, "ignoring undecodable message");
                ControlFlow::Continue(())
            }
            _ => {
                self.fault(error);
                ControlFlow::Break(())
            }
        }
    }

    fn fault(&self, error: &ChannelError) {
        self.set(SubscriptionState::Faulted);
        tracing::warn!(canvas = %self.canvas, %error, "subscription faulted");
    }

    fn set(&self, state: SubscriptionState) {
        *self.state.write() = state;
    }
}

/// Single consumer of one canvas' merge queue
async fn run_merges(
    canvas: CanvasId,
    mut jobs: mpsc::UnboundedReceiver<MergeJob>,
    store: Arc<CanvasStore>,
    fetcher: Arc<dyn BitmapFetcher>,
) {
    while let Some(job) = jobs.recv().await {
        if store.generation(canvas) != Some(job.generation) {
            tracing::debug!(%canvas, queued = %job.generation, "dropping superseded diff");
            continue;
        }
        let delta = match fetcher.fetch(&job.url).await {
            Ok(delta) => delta,
            Err(e) => {
                tracing::warn!(%canvas, error = %e, "diff fetch failed");
                continue;
            }
        };
        match store.merge(canvas, &delta, job.generation) {
            Ok(MergeOutcome::Applied(pixels)) => {
                tracing::trace!(%canvas, pixels, "diff applied");
            }
            Ok(MergeOutcome::Stale { queued, current }) => {
                tracing::debug!(%canvas, %queued, %current, "dropping superseded diff");
            }
            Ok(MergeOutcome::Uninitialized) => {
                tracing::debug!(%canvas, "diff before first full frame");
            }
            Err(e) => tracing::warn!(%canvas, error = %e, "diff rejected"),
        }
    }
}
