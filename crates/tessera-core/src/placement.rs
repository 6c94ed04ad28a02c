//! Placement responses and their interpretation
//!
//! The placement endpoint answers with a GraphQL body. Three shapes matter:
//! - `data.act.data[0].data.nextAvailablePixelTimestamp` - placed, cooldown until then
//! - the same timestamp equal to [`BAN_SENTINEL_MS`] - permanently banned
//! - `data: null` with `errors[0].extensions.nextAvailablePixelTs` - rate limited;
//!   an explicit null there means [`DEFAULT_RETRY_AFTER_MS`]
//!
//! Everything else (including transport errors) is a failure.

use crate::error::{ErrorClass, PlacementError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Next-available timestamp the service uses to mean "never again"
pub const BAN_SENTINEL_MS: i64 = 2_147_483_647_000;

/// Cooldown assumed when a rate-limit error carries no retry timestamp
pub const DEFAULT_RETRY_AFTER_MS: i64 = 5 * 60 * 1000;

const NEXT_AVAILABLE_PTR: &str = "/act/data/0/data/nextAvailablePixelTimestamp";
const RETRY_AT_PTR: &str = "/0/extensions/nextAvailablePixelTs";

/// Raw GraphQL response body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacementResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Option<Value>,
}

impl PlacementResponse {
    /// Successful body with a next-available timestamp
    #[must_use]
    pub fn next_available(ms: i64) -> Self {
        Self {
            data: Some(json!({
                "act": { "data": [ { "data": { "nextAvailablePixelTimestamp": ms } } ] }
            })),
            errors: None,
        }
    }

    /// Rate-limit error body, optionally carrying a retry timestamp
    #[must_use]
    pub fn rate_limited(retry_at_ms: Option<i64>) -> Self {
        Self {
            data: None,
            errors: Some(json!([ { "extensions": { "nextAvailablePixelTs": retry_at_ms } } ])),
        }
    }

    fn next_available_ms(&self) -> Option<&Value> {
        self.data.as_ref()?.pointer(NEXT_AVAILABLE_PTR)
    }
}

/// What a placement attempt means for the identity that made it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// Placed; the identity may place again at `next_available`
    Placed { next_available: DateTime<Utc> },
    /// Rejected by the rate limiter; retry at `retry_at`
    RateLimited { retry_at: DateTime<Utc> },
    /// Permanently banned
    Banned,
    /// Transport failure or unexpected response
    Failed { reason: String },
}

impl PlacementOutcome {
    /// Timestamp the identity becomes available again, if it does
    #[inline]
    #[must_use]
    pub fn available_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Placed { next_available } => Some(*next_available),
            Self::RateLimited { retry_at } => Some(*retry_at),
            Self::Banned | Self::Failed { .. } => None,
        }
    }

    /// Taxonomy class; `None` for a plain success
    #[inline]
    #[must_use]
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            Self::Placed { .. } => None,
            Self::RateLimited { .. } => Some(ErrorClass::RateLimited),
            Self::Banned => Some(ErrorClass::Banned),
            Self::Failed { .. } => Some(ErrorClass::TransportFailure),
        }
    }
}

/// Interpret the result of a placement call
#[must_use]
pub fn interpret(result: Result<PlacementResponse, PlacementError>, now: DateTime<Utc>) -> PlacementOutcome {
    let response = match result {
        Ok(response) => response,
        Err(e) => return failed(e),
    };

    if response.data.as_ref().is_some_and(|d| !d.is_null()) {
        return match response.next_available_ms().and_then(Value::as_f64) {
            Some(ms) => from_timestamp(ms, |next_available| PlacementOutcome::Placed { next_available }),
            None => failed(PlacementError::UnexpectedShape(
                "missing nextAvailablePixelTimestamp".to_string(),
            )),
        };
    }

    let Some(first_error) = response.errors.as_ref().filter(|e| e.get(0).is_some()) else {
        return failed(PlacementError::UnexpectedShape(
            "neither data nor errors present".to_string(),
        ));
    };
    match first_error.pointer(RETRY_AT_PTR) {
        Some(Value::Null) => PlacementOutcome::RateLimited {
            retry_at: now + Duration::milliseconds(DEFAULT_RETRY_AFTER_MS),
        },
        Some(value) => match value.as_f64() {
            Some(ms) => from_timestamp(ms, |retry_at| PlacementOutcome::RateLimited { retry_at }),
            None => failed(PlacementError::UnexpectedShape(format!(
                "non-numeric retry timestamp: {value}"
            ))),
        },
        // Auth, validation and other errors carry no retry timestamp at all
        None => failed(PlacementError::UnexpectedShape(format!(
            "placement rejected: {}",
            first_error[0]
        ))),
    }
}

/// Interpret a cooldown query made at login time
///
/// A null timestamp means the identity may place right away.
#[must_use]
pub fn interpret_cooldown(
    result: Result<PlacementResponse, PlacementError>,
    now: DateTime<Utc>,
) -> PlacementOutcome {
    let response = match result {
        Ok(response) => response,
        Err(e) => return failed(e),
    };
    match response.next_available_ms() {
        Some(Value::Null) => PlacementOutcome::Placed { next_available: now },
        Some(value) => match value.as_f64() {
            Some(ms) => from_timestamp(ms, |next_available| PlacementOutcome::Placed { next_available }),
            None => failed(PlacementError::UnexpectedShape(format!(
                "non-numeric cooldown: {value}"
            ))),
        },
        None => failed(PlacementError::UnexpectedShape(
            "missing cooldown data".to_string(),
        )),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn from_timestamp(
    ms: f64,
    build: impl FnOnce(DateTime<Utc>) -> PlacementOutcome,
) -> PlacementOutcome {
    let ms = ms as i64;
    if ms == BAN_SENTINEL_MS {
        return PlacementOutcome::Banned;
    }
    match DateTime::from_timestamp_millis(ms) {
        Some(at) => build(at),
        None => failed(PlacementError::UnexpectedShape(format!(
            "timestamp out of range: {ms}"
        ))),
    }
}

fn failed(error: PlacementError) -> PlacementOutcome {
    PlacementOutcome::Failed {
        reason: error.to_string(),
    }
}
