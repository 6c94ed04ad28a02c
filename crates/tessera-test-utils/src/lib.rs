//! Testing utilities for the Tessera workspace
//!
//! In-memory fakes for every collaborator trait plus a few polling helpers.

#![allow(missing_docs)]

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_canvas::{Bitmap, CanvasId};
use tessera_core::{
    Assignment, AuthError, Authenticator, BitmapFetcher, ChannelConnector, ChannelError,
    ClientMessage, Credentials, FetchError, FrameChannel, FrameEvent, PlacementApi,
    PlacementError, PlacementResponse, ServerMessage, Services, SessionToken, BAN_SENTINEL_MS,
};
use tokio::sync::mpsc;

/// `n` credentials named `user0..user{n-1}`
pub fn credentials(n: usize) -> Vec<Credentials> {
    (0..n)
        .map(|i| Credentials::new(format!("user{i}"), "hunter2"))
        .collect()
}

/// Poll `condition` every few milliseconds; panics after two seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not reached within 2s");
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Logs in every username not on the reject list
///
/// Tokens are `token-<username>-<login count>` so refreshes are observable.
#[derive(Debug, Default)]
pub struct FakeAuthenticator {
    rejected: Mutex<HashSet<String>>,
    logins: AtomicUsize,
}

impl FakeAuthenticator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject(&self, username: &str) {
        self.rejected.lock().insert(username.to_string());
    }

    pub fn allow(&self, username: &str) {
        self.rejected.lock().remove(username);
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Authenticator for FakeAuthenticator {
    async fn login(&self, credentials: &Credentials) -> Result<SessionToken, AuthError> {
        if self.rejected.lock().contains(&credentials.username) {
            return Err(AuthError::Rejected(credentials.username.clone()));
        }
        let n = self.logins.fetch_add(1, Ordering::SeqCst);
        Ok(SessionToken::new(format!("token-{}-{n}", credentials.username)))
    }
}

// ---------------------------------------------------------------------------
// Placement
// ---------------------------------------------------------------------------

/// Canned answer of the placement service
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Placed; available again this long after the call
    NextAvailableIn(chrono::Duration),
    /// Ban sentinel
    Banned,
    /// Rate-limit error, optionally carrying a retry timestamp (ms)
    RateLimited(Option<i64>),
    /// Non-2xx status
    ServerError(u16),
    /// Cooldown query answer with a null timestamp
    Ready,
}

impl Reply {
    fn render(&self) -> Result<PlacementResponse, PlacementError> {
        match self {
            Self::NextAvailableIn(after) => Ok(PlacementResponse::next_available(
                (Utc::now() + *after).timestamp_millis(),
            )),
            Self::Banned => Ok(PlacementResponse::next_available(BAN_SENTINEL_MS)),
            Self::RateLimited(retry_at) => Ok(PlacementResponse::rate_limited(*retry_at)),
            Self::ServerError(status) => Err(PlacementError::Status {
                status: *status,
                body: "scripted failure".to_string(),
            }),
            Self::Ready => Ok(PlacementResponse {
                data: Some(json!({
                    "act": { "data": [ { "data": { "nextAvailablePixelTimestamp": null } } ] }
                })),
                errors: None,
            }),
        }
    }
}

/// One recorded placement call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementCall {
    pub token: String,
    pub assignment: Assignment,
}

/// Placement service answering from per-token scripts
///
/// Tracks concurrent calls per token so tests can assert that no identity
/// ever had two placements in flight.
#[derive(Debug)]
pub struct ScriptedPlacementApi {
    default_reply: Mutex<Reply>,
    cooldown_reply: Mutex<Reply>,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<PlacementCall>>,
    in_flight: Mutex<HashMap<String, usize>>,
    overlaps: AtomicUsize,
    latency: Duration,
}

impl ScriptedPlacementApi {
    /// Every placement succeeds with a one-minute cooldown
    pub fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    /// Like [`Self::new`] but every placement takes `latency`
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            default_reply: Mutex::new(Reply::NextAvailableIn(chrono::Duration::seconds(60))),
            cooldown_reply: Mutex::new(Reply::Ready),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashMap::new()),
            overlaps: AtomicUsize::new(0),
            latency,
        })
    }

    pub fn set_default(&self, reply: Reply) {
        *self.default_reply.lock() = reply;
    }

    pub fn set_cooldown(&self, reply: Reply) {
        *self.cooldown_reply.lock() = reply;
    }

    /// Queue replies for calls made with tokens starting with `token_prefix`
    pub fn script(&self, token_prefix: &str, replies: impl IntoIterator<Item = Reply>) {
        self.scripts
            .lock()
            .entry(token_prefix.to_string())
            .or_default()
            .extend(replies);
    }

    pub fn calls(&self) -> Vec<PlacementCall> {
        self.calls.lock().clone()
    }

    /// Number of times a call started while another with the same token ran
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn next_reply(&self, token: &str) -> Reply {
        let mut scripts = self.scripts.lock();
        scripts
            .iter_mut()
            .find(|(prefix, _)| token.starts_with(prefix.as_str()))
            .and_then(|(_, queue)| queue.pop_front())
            .unwrap_or_else(|| self.default_reply.lock().clone())
    }
}

#[async_trait::async_trait]
impl PlacementApi for ScriptedPlacementApi {
    async fn place(
        &self,
        token: &SessionToken,
        assignment: &Assignment,
    ) -> Result<PlacementResponse, PlacementError> {
        let token = token.expose().to_string();
        {
            let mut in_flight = self.in_flight.lock();
            let running = in_flight.entry(token.clone()).or_default();
            if *running > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            *running += 1;
        }
        self.calls.lock().push(PlacementCall {
            token: token.clone(),
            assignment: *assignment,
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let reply = self.next_reply(&token);

        if let Some(running) = self.in_flight.lock().get_mut(&token) {
            *running -= 1;
        }
        reply.render()
    }

    async fn cooldown(&self, _token: &SessionToken) -> Result<PlacementResponse, PlacementError> {
        self.cooldown_reply.lock().render()
    }
}

// ---------------------------------------------------------------------------
// Bitmap fetch
// ---------------------------------------------------------------------------

/// Serves bitmaps registered by URL
#[derive(Debug, Default)]
pub struct StaticFetcher {
    bitmaps: Mutex<HashMap<String, Bitmap>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl StaticFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, url: &str, bitmap: Bitmap) {
        self.bitmaps.lock().insert(url.to_string(), bitmap);
    }

    /// Make every fetch of `url` take `delay`
    pub fn delay(&self, url: &str, delay: Duration) {
        self.delays.lock().insert(url.to_string(), delay);
    }
}

#[async_trait::async_trait]
impl BitmapFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Bitmap, FetchError> {
        let delay = self.delays.lock().get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.bitmaps
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Transport {
                url: url.to_string(),
                reason: "404 Not Found".to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Subscription channels
// ---------------------------------------------------------------------------

type Incoming = Option<Result<ServerMessage, ChannelError>>;

/// Test-side end of one scripted channel
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    canvas: CanvasId,
    incoming: mpsc::UnboundedSender<Incoming>,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
}

impl ChannelHandle {
    pub fn push(&self, message: ServerMessage) {
        let _ = self.incoming.send(Some(Ok(message)));
    }

    pub fn push_error(&self, error: ChannelError) {
        let _ = self.incoming.send(Some(Err(error)));
    }

    pub fn full_frame(&self, url: &str) {
        self.push(ServerMessage::Frame(FrameEvent::Full {
            subscription: self.canvas,
            url: url.to_string(),
            timestamp: None,
        }));
    }

    pub fn diff_frame(&self, url: &str) {
        self.push(ServerMessage::Frame(FrameEvent::Diff {
            subscription: self.canvas,
            url: url.to_string(),
            current: None,
            previous: None,
        }));
    }

    /// Remote side closes the channel
    pub fn close(&self) {
        let _ = self.incoming.send(None);
    }

    /// Messages the client sent so far
    pub fn sent(&self) -> Vec<ClientMessage> {
        self.sent.lock().clone()
    }
}

struct ScriptedChannel {
    incoming: mpsc::UnboundedReceiver<Incoming>,
    loopback: mpsc::UnboundedSender<Incoming>,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
    auto_ack: bool,
}

#[async_trait::async_trait]
impl FrameChannel for ScriptedChannel {
    async fn send(&mut self, message: ClientMessage) -> Result<(), ChannelError> {
        if self.auto_ack && matches!(message, ClientMessage::ConnectionInit { .. }) {
            let _ = self.loopback.send(Some(Ok(ServerMessage::ConnectionAck)));
        }
        self.sent.lock().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<ServerMessage, ChannelError>> {
        self.incoming.recv().await.flatten()
    }
}

/// Connector handing out scripted channels
///
/// Channels acknowledge `connection_init` on their own unless built with
/// [`ScriptedConnector::manual_ack`].
#[derive(Debug)]
pub struct ScriptedConnector {
    channels: Mutex<HashMap<CanvasId, Vec<ChannelHandle>>>,
    refused: Mutex<HashSet<CanvasId>>,
    auto_ack: bool,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new(HashMap::new()),
            refused: Mutex::new(HashSet::new()),
            auto_ack: true,
        })
    }

    pub fn manual_ack() -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new(HashMap::new()),
            refused: Mutex::new(HashSet::new()),
            auto_ack: false,
        })
    }

    /// Refuse connections for `canvas`
    pub fn refuse(&self, canvas: CanvasId) {
        self.refused.lock().insert(canvas);
    }

    /// Most recently opened channel for `canvas`
    pub fn latest(&self, canvas: CanvasId) -> Option<ChannelHandle> {
        self.channels.lock().get(&canvas)?.last().cloned()
    }

    /// Number of channels opened for `canvas`
    pub fn connects(&self, canvas: CanvasId) -> usize {
        self.channels.lock().get(&canvas).map_or(0, Vec::len)
    }
}

#[async_trait::async_trait]
impl ChannelConnector for ScriptedConnector {
    async fn connect(&self, canvas: CanvasId) -> Result<Box<dyn FrameChannel>, ChannelError> {
        if self.refused.lock().contains(&canvas) {
            return Err(ChannelError::Connect("connection refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        self.channels.lock().entry(canvas).or_default().push(ChannelHandle {
            canvas,
            incoming: tx.clone(),
            sent: Arc::clone(&sent),
        });
        Ok(Box::new(ScriptedChannel {
            incoming: rx,
            loopback: tx,
            sent,
            auto_ack: self.auto_ack,
        }))
    }
}

// ---------------------------------------------------------------------------
// Bundles
// ---------------------------------------------------------------------------

/// Every fake, ready to be turned into [`Services`]
#[derive(Debug, Clone)]
pub struct Fakes {
    pub auth: Arc<FakeAuthenticator>,
    pub placement: Arc<ScriptedPlacementApi>,
    pub fetcher: Arc<StaticFetcher>,
    pub connector: Arc<ScriptedConnector>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            auth: FakeAuthenticator::new(),
            placement: ScriptedPlacementApi::new(),
            fetcher: StaticFetcher::new(),
            connector: ScriptedConnector::new(),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            auth: self.auth.clone(),
            placement: self.placement.clone(),
            fetcher: self.fetcher.clone(),
            connector: self.connector.clone(),
        }
    }
}

impl Default for Fakes {
    fn default() -> Self {
        Self::new()
    }
}
