//! Tessera client - network collaborators
//!
//! Concrete implementations of the `tessera-core` ports:
//! - [`CookieAuthenticator`] - login plus cookie exchange for a bearer token
//! - [`GqlPlacementApi`] - placement and cooldown calls over GraphQL/HTTP
//! - [`HttpBitmapFetcher`] - frame bitmap download and PNG decoding
//! - [`WsConnector`] - GraphQL-over-WebSocket canvas subscriptions

#![warn(unreachable_pub)]

pub mod auth;
pub mod config;
pub mod fetch;
pub mod gql;
pub mod ws;

pub use auth::CookieAuthenticator;
pub use config::EndpointConfig;
pub use fetch::HttpBitmapFetcher;
pub use gql::GqlPlacementApi;
pub use ws::{WsChannel, WsConnector};

use std::sync::Arc;
use tessera_core::Services;

/// Client construction errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP client could not be built (TLS backend, bad settings)
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Build every collaborator against `endpoints`, sharing one HTTP client
///
/// Login and bitmap fetch requests time out after
/// [`EndpointConfig::timeout`]; placement calls run until they resolve.
///
/// # Errors
/// - `ClientError::Http` if the HTTP client cannot be built
pub fn services(endpoints: EndpointConfig) -> Result<Services, ClientError> {
    let http = reqwest::Client::builder()
        .user_agent(endpoints.user_agent.clone())
        .build()?;
    let endpoints = Arc::new(endpoints);

    Ok(Services {
        auth: Arc::new(CookieAuthenticator::new(http.clone(), Arc::clone(&endpoints))),
        placement: Arc::new(GqlPlacementApi::new(http.clone(), Arc::clone(&endpoints))),
        fetcher: Arc::new(HttpBitmapFetcher::new(http, endpoints.timeout())),
        connector: Arc::new(WsConnector::new(endpoints)),
    })
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
