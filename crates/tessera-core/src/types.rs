//! Core types for Tessera
//!
//! Defines the fundamental types for the placer:
//! - Placer configuration
//! - Identity ids, credentials and session tokens
//! - Assignments (one pixel for one identity)

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tessera_canvas::{CanvasId, Color, DEFAULT_DIMENSION};

/// Position of an identity in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u32);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque bearer token for one identity
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wrap a raw token
    #[inline]
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Raw token for request headers
    #[inline]
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

/// Username / password pair for one identity
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Create credentials
    #[inline]
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Parse one `username|password` pair per line; blank lines are skipped
    ///
    /// # Errors
    /// - `ConfigError::MalformedCredentials` naming the first bad line (1-based)
    pub fn parse_list(text: &str) -> Result<Vec<Self>, ConfigError> {
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| match line.trim().split_once('|') {
                Some((user, pass)) if !user.is_empty() && !pass.is_empty() => {
                    Ok(Self::new(user, pass))
                }
                _ => Err(ConfigError::MalformedCredentials { line: i + 1 }),
            })
            .collect()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// One pixel to place: transient, bound to exactly one placement attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Assignment {
    pub canvas: CanvasId,
    pub x: u32,
    pub y: u32,
    pub color: Color,
}

impl Assignment {
    /// Create assignment
    #[inline]
    #[must_use]
    pub fn new(canvas: CanvasId, x: u32, y: u32, color: Color) -> Self {
        Self { canvas, x, y, color }
    }
}

impl std::fmt::Display for Assignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {}) -> {:?}", self.x, self.y, self.canvas, self.color)
    }
}

/// Placer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacerConfig {
    /// Number of canvases (ids `0..canvas_count`)
    pub canvas_count: u8,
    /// Canvas width in pixels
    pub canvas_width: u32,
    /// Canvas height in pixels
    pub canvas_height: u32,
    /// Driver periods
    pub intervals: IntervalConfig,
    /// Random delay added to every recorded cooldown
    pub jitter: JitterRange,
    /// Upper bound on concurrently running placement calls
    pub max_in_flight: usize,
    /// `username|password` file
    pub credentials_path: PathBuf,
    /// Directory holding `<canvas>.png` targets
    pub targets_dir: PathBuf,
}

impl PlacerConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With canvas count
    #[inline]
    #[must_use]
    pub fn with_canvas_count(mut self, count: u8) -> Self {
        self.canvas_count = count;
        self
    }

    /// Canvas `(width, height)`
    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.canvas_width, self.canvas_height)
    }

    /// With canvas dimensions
    #[inline]
    #[must_use]
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.canvas_width = width;
        self.canvas_height = height;
        self
    }

    /// With cooldown jitter
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterRange) -> Self {
        self.jitter = jitter;
        self
    }

    /// With max in-flight placements
    #[inline]
    #[must_use]
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Canvas ids covered by this configuration
    pub fn canvases(&self) -> impl Iterator<Item = CanvasId> {
        (0..self.canvas_count).map(CanvasId)
    }

    /// Check ranges that would make the placer misbehave
    ///
    /// # Errors
    /// - `ConfigError::InvalidValue` naming the offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.canvas_count == 0 {
            return Err(invalid("canvas_count", "must be at least 1"));
        }
        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err(invalid("canvas_width/canvas_height", "must be non-zero"));
        }
        if self.max_in_flight == 0 {
            return Err(invalid("max_in_flight", "must be at least 1"));
        }
        if self.jitter.min_ms > self.jitter.max_ms {
            return Err(invalid("jitter", "min_ms exceeds max_ms"));
        }
        self.intervals.validate()
    }
}

impl Default for PlacerConfig {
    fn default() -> Self {
        Self {
            canvas_count: 3,
            canvas_width: DEFAULT_DIMENSION,
            canvas_height: DEFAULT_DIMENSION,
            intervals: IntervalConfig::default(),
            jitter: JitterRange::default(),
            max_in_flight: 100,
            credentials_path: PathBuf::from("users.txt"),
            targets_dir: PathBuf::from("targets"),
        }
    }
}

/// Driver periods, in seconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    /// Diff + dispatch cycle
    pub dispatch_secs: u64,
    /// Token refresh for every identity
    pub refresh_secs: u64,
    /// Tear down and rebuild every subscription
    pub resync_secs: u64,
    /// Status report
    pub report_secs: u64,
}

impl IntervalConfig {
    /// Dispatch period
    #[inline]
    #[must_use]
    pub fn dispatch(&self) -> Duration {
        Duration::from_secs(self.dispatch_secs)
    }

    /// Refresh period
    #[inline]
    #[must_use]
    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    /// Resync period
    #[inline]
    #[must_use]
    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    /// Report period
    #[inline]
    #[must_use]
    pub fn report(&self) -> Duration {
        Duration::from_secs(self.report_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, secs) in [
            ("intervals.dispatch_secs", self.dispatch_secs),
            ("intervals.refresh_secs", self.refresh_secs),
            ("intervals.resync_secs", self.resync_secs),
            ("intervals.report_secs", self.report_secs),
        ] {
            if secs == 0 {
                return Err(invalid(field, "must be at least 1 second"));
            }
        }
        Ok(())
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            dispatch_secs: 8,
            refresh_secs: 20 * 60,
            resync_secs: 3 * 60,
            report_secs: 20,
        }
    }
}

/// Inclusive range of extra cooldown milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl JitterRange {
    /// Create range
    #[inline]
    #[must_use]
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// Draw one jitter value
    #[must_use]
    pub fn sample(&self, rng: &mut impl rand::Rng) -> chrono::Duration {
        let ms = if self.max_ms <= self.min_ms {
            self.min_ms
        } else {
            rng.random_range(self.min_ms..=self.max_ms)
        };
        chrono::Duration::milliseconds(i64::from(u32::try_from(ms).unwrap_or(u32::MAX)))
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}
