//! Endpoint configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remote service endpoints and the browser identity we present to them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Login endpoint; the username is appended
    pub login_url: String,
    /// Page whose response carries the `token_v2` cookie
    pub session_url: String,
    /// Referer sent with login requests
    pub login_referer: String,
    /// GraphQL HTTP endpoint (placement and cooldown)
    pub gql_url: String,
    /// GraphQL WebSocket endpoint (canvas subscriptions)
    pub websocket_url: String,
    /// Origin of the canvas web app
    pub origin: String,
    /// User agent for every request
    pub user_agent: String,
    /// Timeout for login and bitmap fetch requests; placement calls have none
    pub timeout_secs: u64,
}

impl EndpointConfig {
    /// Login and bitmap fetch timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            login_url: "https://old.reddit.com/api/login/".to_string(),
            session_url: "https://old.reddit.com/chat/minimize".to_string(),
            login_referer: "https://old.reddit.com/".to_string(),
            gql_url: "https://gql-realtime-2.reddit.com/query".to_string(),
            websocket_url: "wss://gql-realtime-2.reddit.com/query".to_string(),
            origin: "https://hot-potato.reddit.com".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/98.0.4758.102 Safari/537.36"
                .to_string(),
            timeout_secs: 30,
        }
    }
}
