//! Tessera Core - cooperative pixel placement
//!
//! Coordinates a pool of identities to reproduce target images on a shared,
//! rate-limited canvas:
//! - Keeps a local copy of every canvas in step with the remote one
//! - Tracks per-identity tokens, cooldowns and bans
//! - Diffs canvases against targets and builds bounded, shuffled batches
//! - Dispatches one exclusive placement per identity and records outcomes
//!
//! Network access sits behind the traits in [`ports`].
//!
//! # Example
//!
//! ```rust,ignore
//! use tessera_core::{Placer, PlacerConfig, Services};
//!
//! # async fn example(services: Services) -> Result<(), Box<dyn std::error::Error>> {
//! let config = PlacerConfig::new();
//! let (targets, _unknown) = tessera_canvas::TargetSet::load_dir(&config.targets_dir, config.canvas_count)?;
//! let placer = Placer::start(config, targets, credentials, services).await?;
//! placer.run(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod account;
pub mod dispatch;
pub mod error;
pub mod placement;
pub mod placer;
pub mod ports;
pub mod protocol;
pub mod report;
pub mod scheduler;
pub mod sync;
pub mod types;

// Re-exports for convenience
pub use account::{Account, AccountPool, AccountSnapshot, DisableReason, PlacementClaim, PoolStats};
pub use dispatch::Dispatcher;
pub use error::{
    AuthError, ChannelError, ConfigError, ErrorClass, FetchError, PlacementError, PlacerError,
};
pub use placement::{interpret, interpret_cooldown, PlacementOutcome, PlacementResponse, BAN_SENTINEL_MS};
pub use placer::Placer;
pub use ports::{Authenticator, BitmapFetcher, ChannelConnector, FrameChannel, PlacementApi, Services};
pub use protocol::{ClientMessage, FrameEvent, ServerMessage};
pub use report::StatusReport;
pub use scheduler::{DiffScheduler, Plan};
pub use sync::{CanvasSync, FatalSignal, SubscriptionState};
pub use types::{
    AccountId, Assignment, Credentials, IntervalConfig, JitterRange, PlacerConfig, SessionToken,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Tessera Core
    pub use crate::{
        Assignment, Authenticator, BitmapFetcher, ChannelConnector, Credentials, PlacementApi,
        Placer, PlacerConfig, PlacerError, Services, SessionToken,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
