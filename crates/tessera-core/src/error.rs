//! Error types for Tessera Core
//!
//! Provides error handling for:
//! - Login / token refresh failures
//! - Placement call failures
//! - Subscription channel failures
//! - Bitmap fetch failures
//! - Configuration problems
//!
//! [`ErrorClass`] maps each of these onto the failure taxonomy that decides
//! what happens to an identity or a subscription.

use tessera_canvas::{CanvasError, CanvasId};

/// Main placer error type
#[derive(Debug, thiserror::Error)]
pub enum PlacerError {
    /// Configuration or input file problem
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Canvas model error
    #[error("canvas error: {0}")]
    Canvas(#[from] CanvasError),

    /// No identity could be logged in at startup
    #[error("no usable identities (0 of {total} logged in)")]
    NoIdentities { total: usize },

    /// A subscription channel rejected our credentials
    #[error("subscription for canvas {canvas} rejected authentication: {reason}")]
    FatalChannelAuth { canvas: CanvasId, reason: String },
}

impl PlacerError {
    /// Check if the process must stop
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalChannelAuth { .. } | Self::NoIdentities { .. })
    }
}

/// Login / session exchange errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Service rejected the credentials
    #[error("login rejected for {0}")]
    Rejected(String),

    /// Session exchange did not yield a token
    #[error("session exchange failed: {0}")]
    SessionExchange(String),

    /// Network or HTTP-level failure
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Placement call errors
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// Non-success HTTP status
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not have any recognised shape
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),

    /// Network or HTTP-level failure
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Subscription channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Could not open the channel
    #[error("connect failed: {0}")]
    Connect(String),

    /// Channel broke while open
    #[error("transport failure: {0}")]
    Transport(String),

    /// Message could not be decoded at all
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Bitmap fetch errors
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network or HTTP-level failure
    #[error("fetch of {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// Body was not a decodable bitmap
    #[error("bitmap at {url} undecodable: {source}")]
    Decode {
        url: String,
        #[source]
        source: CanvasError,
    },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Credentials line is not `username|password`
    #[error("malformed credentials on line {line}")]
    MalformedCredentials { line: usize },

    /// Value out of its legal range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Failure taxonomy driving identity and subscription state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Cooldown; the identity resumes by itself
    RateLimited,
    /// Identity permanently disabled
    Banned,
    /// Identity disabled until a refresh logs it in again
    AuthFailure,
    /// Identity disabled (placement) or channel faulted (subscription)
    TransportFailure,
    /// Logged and ignored
    ProtocolAnomaly,
    /// Orderly shutdown of the whole process
    FatalChannelAuth,
}

impl ErrorClass {
    /// Check if an identity hit by this class stops receiving work
    #[inline]
    #[must_use]
    pub fn disables_identity(self) -> bool {
        matches!(self, Self::Banned | Self::AuthFailure | Self::TransportFailure)
    }

    /// Check if a refresh may bring the identity back
    #[inline]
    #[must_use]
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Self::Banned | Self::FatalChannelAuth)
    }
}

impl AuthError {
    /// Taxonomy class
    #[inline]
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        ErrorClass::AuthFailure
    }
}

impl PlacementError {
    /// Taxonomy class
    #[inline]
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        ErrorClass::TransportFailure
    }
}

impl ChannelError {
    /// Taxonomy class
    #[inline]
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Malformed(_) => ErrorClass::ProtocolAnomaly,
            Self::Connect(_) | Self::Transport(_) => ErrorClass::TransportFailure,
        }
    }
}
