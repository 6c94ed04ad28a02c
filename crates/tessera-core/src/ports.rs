//! Collaborator traits
//!
//! Everything that touches the network sits behind one of these traits so
//! the core can be driven by real clients or by in-memory fakes.

use crate::error::{AuthError, ChannelError, FetchError, PlacementError};
use crate::placement::PlacementResponse;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::types::{Assignment, Credentials, SessionToken};
use std::sync::Arc;
use tessera_canvas::{Bitmap, CanvasId};

/// Login + session exchange
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    /// Obtain a fresh session token for one identity
    async fn login(&self, credentials: &Credentials) -> Result<SessionToken, AuthError>;
}

/// Placement service
#[async_trait::async_trait]
pub trait PlacementApi: Send + Sync {
    /// Place one pixel
    async fn place(
        &self,
        token: &SessionToken,
        assignment: &Assignment,
    ) -> Result<PlacementResponse, PlacementError>;

    /// Ask for the identity's current cooldown without placing
    async fn cooldown(&self, token: &SessionToken) -> Result<PlacementResponse, PlacementError>;
}

/// Bitmap download referenced by frame events
#[async_trait::async_trait]
pub trait BitmapFetcher: Send + Sync {
    /// Fetch and decode the bitmap at `url`
    async fn fetch(&self, url: &str) -> Result<Bitmap, FetchError>;
}

/// Opens subscription channels
#[async_trait::async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Open a fresh channel for one canvas
    async fn connect(&self, canvas: CanvasId) -> Result<Box<dyn FrameChannel>, ChannelError>;
}

/// One open subscription channel
///
/// Dropping the channel closes it.
#[async_trait::async_trait]
pub trait FrameChannel: Send {
    /// Send one client message
    async fn send(&mut self, message: ClientMessage) -> Result<(), ChannelError>;

    /// Next server message; `None` once the remote side closed the channel
    async fn recv(&mut self) -> Option<Result<ServerMessage, ChannelError>>;
}

/// Bundle of every collaborator the placer needs
#[derive(Clone)]
pub struct Services {
    pub auth: Arc<dyn Authenticator>,
    pub placement: Arc<dyn PlacementApi>,
    pub fetcher: Arc<dyn BitmapFetcher>,
    pub connector: Arc<dyn ChannelConnector>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
