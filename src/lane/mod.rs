//! Lanes: named non-production slices that share production infrastructure.
//!
//! A lane never appears in names when it is absent or `"prod"`; both spellings
//! normalize to `None` at construction, so every `Lane` value is a real,
//! non-production lane.
//!
//! The lane in effect for a piece of code is resolved in a fixed order:
//! explicit override, then the task-local ambient lane set with [`scope`],
//! then the environment default held by [`LaneContext`], then none.

pub mod router;

pub use router::{LaneRouter, RouteTable, ServiceRoute};

use serde::{Deserialize, Serialize};
use std::future::Future;

/// Name of the production lane. Equivalent to having no lane at all.
pub const PROD: &str = "prod";

/// Header used to forward lane identity to downstream services.
pub const LANE_HEADER: &str = "x-lane";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lane(String);

impl Lane {
    /// Returns `None` for empty names and for `"prod"`.
    pub fn new(name: impl AsRef<str>) -> Option<Self> {
        let name = name.as_ref().trim();
        if name.is_empty() || name == PROD {
            None
        } else {
            Some(Self(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a caller picks the lane for an outbound message.
///
/// `Ambient` and `Production` are deliberately separate: "I did not say"
/// follows the surrounding context, "I said production" never does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LaneOverride {
    #[default]
    Ambient,
    Production,
    Named(Lane),
}

impl LaneOverride {
    /// Parses a user-supplied lane name; `"prod"` and `""` mean `Production`.
    pub fn from_name(name: &str) -> Self {
        match Lane::new(name) {
            Some(lane) => Self::Named(lane),
            None => Self::Production,
        }
    }
}

tokio::task_local! {
    static CURRENT_LANE: Option<Lane>;
}

/// Run `fut` with `lane` as the ambient lane of the task.
pub async fn scope<F: Future>(lane: Option<Lane>, fut: F) -> F::Output {
    CURRENT_LANE.scope(lane, fut).await
}

/// The ambient lane of the current task, if one was set with [`scope`].
pub fn ambient() -> Option<Lane> {
    CURRENT_LANE.try_with(|lane| lane.clone()).ok().flatten()
}

/// Resolves the effective lane: override, ambient, environment default.
#[derive(Debug, Clone, Default)]
pub struct LaneContext {
    default: Option<Lane>,
}

impl LaneContext {
    pub fn new(default: Option<Lane>) -> Self {
        Self { default }
    }

    /// The environment default lane (from `LANE`).
    pub fn default_lane(&self) -> Option<&Lane> {
        self.default.as_ref()
    }

    /// Ambient lane, falling back to the environment default.
    pub fn current(&self) -> Option<Lane> {
        ambient().or_else(|| self.default.clone())
    }

    pub fn resolve(&self, choice: &LaneOverride) -> Option<Lane> {
        match choice {
            LaneOverride::Ambient => self.current(),
            LaneOverride::Production => None,
            LaneOverride::Named(lane) => Some(lane.clone()),
        }
    }
}

/// Routing key for `base` in `lane`: `base` in production, `base.lane` otherwise.
pub fn routing_key(base: &str, lane: Option<&Lane>) -> String {
    match lane {
        Some(lane) => format!("{base}.{lane}"),
        None => base.to_string(),
    }
}

/// Queue name for `base` in `lane`: `base` in production, `base_lane` otherwise.
pub fn queue_name(base: &str, lane: Option<&Lane>) -> String {
    match lane {
        Some(lane) => format!("{base}_{lane}"),
        None => base.to_string(),
    }
}
