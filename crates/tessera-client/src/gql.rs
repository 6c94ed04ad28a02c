//! GraphQL placement and cooldown calls

use crate::config::EndpointConfig;
use reqwest::header::{ORIGIN, REFERER};
use serde_json::{json, Value};
use std::sync::Arc;
use tessera_core::{Assignment, PlacementApi, PlacementError, PlacementResponse, SessionToken};

const SET_PIXEL_QUERY: &str = "mutation setPixel($input: ActInput!) {\n  act(input: $input) {\n    \
data {\n      ... on BasicMessage {\n        id\n        data {\n          \
... on GetUserCooldownResponseMessageData {\n            nextAvailablePixelTimestamp\n            __typename\n          }\n          \
... on SetPixelResponseMessageData {\n            timestamp\n            __typename\n          }\n          \
__typename\n        }\n        __typename\n      }\n      __typename\n    }\n    __typename\n  }\n}\n";

const COOLDOWN_QUERY: &str = "mutation GetPersonalizedTimer {\n  act(\n    \
input: {actionName: \"r/replace:get_user_cooldown\"}\n  ) {\n    data {\n      ... on BasicMessage {\n        \
id\n        data {\n          ... on GetUserCooldownResponseMessageData {\n            \
nextAvailablePixelTimestamp\n          }\n        }\n      }\n    }\n  }\n}\n";

/// [`PlacementApi`] over the GraphQL HTTP endpoint
#[derive(Debug, Clone)]
pub struct GqlPlacementApi {
    http: reqwest::Client,
    endpoints: Arc<EndpointConfig>,
}

impl GqlPlacementApi {
    /// Create with a shared HTTP client
    #[must_use]
    pub fn new(http: reqwest::Client, endpoints: Arc<EndpointConfig>) -> Self {
        Self { http, endpoints }
    }

    // No timeout: a stuck call keeps its identity claimed until it resolves
    fn request(&self, token: &SessionToken, body: &Value) -> reqwest::RequestBuilder {
        self.http
            .post(&self.endpoints.gql_url)
            .bearer_auth(token.expose())
            .header("apollographql-client-name", "mona-lisa")
            .header("apollographql-client-version", "0.0.1")
            .header(ORIGIN, &self.endpoints.origin)
            .header(REFERER, format!("{}/", self.endpoints.origin))
            .json(body)
    }

    async fn post(&self, token: &SessionToken, body: &Value) -> Result<PlacementResponse, PlacementError> {
        let response = self
            .request(token, body)
            .send()
            .await
            .map_err(|e| PlacementError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlacementError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| PlacementError::UnexpectedShape(e.to_string()))
    }
}

#[async_trait::async_trait]
impl PlacementApi for GqlPlacementApi {
    async fn place(
        &self,
        token: &SessionToken,
        assignment: &Assignment,
    ) -> Result<PlacementResponse, PlacementError> {
        self.post(token, &set_pixel_body(assignment)).await
    }

    async fn cooldown(&self, token: &SessionToken) -> Result<PlacementResponse, PlacementError> {
        self.post(token, &cooldown_body()).await
    }
}

fn set_pixel_body(assignment: &Assignment) -> Value {
    json!({
        "operationName": "setPixel",
        "variables": {
            "input": {
                "actionName": "r/replace:set_pixel",
                "PixelMessageData": {
                    "coordinate": { "x": assignment.x, "y": assignment.y },
                    "colorIndex": assignment.color.index(),
                    "canvasIndex": assignment.canvas.value(),
                }
            }
        },
        "query": SET_PIXEL_QUERY,
    })
}

fn cooldown_body() -> Value {
    json!({
        "operationName": "GetPersonalizedTimer",
        "variables": {},
        "query": COOLDOWN_QUERY,
    })
}
