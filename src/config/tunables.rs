//! Operational knobs, loaded from TOML.
//!
//! Every field has a default, so a missing file, a missing section or a
//! missing key all fall back to the values below.
//!
//! ```toml
//! [worker]
//! concurrency = 10
//!
//! [rescan]
//! batch_size = 100
//! max_total = 1000
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Tunables {
    pub database: DatabaseTunables,
    pub router: RouterTunables,
    pub worker: WorkerTunables,
    pub rescan: RescanTunables,
    pub consolidation: ConsolidationTunables,
    pub services: ServiceTunables,
}

impl Tunables {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("bad config file {}: {e}", path.display())))
    }

    /// Deserialize and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        let tunables: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        tunables.validate()?;
        Ok(tunables)
    }

    /// Reject values the workers cannot run with: zero intervals, sizes or
    /// timeouts, and recency windows past [`MAX_WINDOW_DAYS`].
    pub fn validate(&self) -> Result<()> {
        let d = &self.database;
        positive("database.max_connections", d.max_connections)?;
        positive("database.acquire_timeout_secs", d.acquire_timeout_secs)?;

        positive("router.poll_interval_secs", self.router.poll_interval_secs)?;
        positive("router.request_timeout_secs", self.router.request_timeout_secs)?;

        positive("worker.concurrency", self.worker.concurrency)?;

        let r = &self.rescan;
        positive("rescan.batch_size", r.batch_size)?;
        positive("rescan.max_total", r.max_total)?;
        positive("rescan.interval_secs", r.interval_secs)?;
        positive("rescan.lock_ttl_secs", r.lock_ttl_secs)?;
        if !(1..=MAX_WINDOW_DAYS).contains(&r.window_days) {
            return Err(Error::Config(format!(
                "rescan.window_days must be between 1 and {MAX_WINDOW_DAYS}, got {}",
                r.window_days
            )));
        }

        let c = &self.consolidation;
        positive("consolidation.lock_ttl_secs", c.lock_ttl_secs)?;
        positive("consolidation.min_events", c.min_events)?;
        positive("consolidation.max_subjects", c.max_subjects)?;
        positive("consolidation.concurrency", c.concurrency)?;
        positive("consolidation.evidence_limit", c.evidence_limit)?;
        positive("consolidation.max_facts", c.max_facts)?;
        positive("consolidation.interval_secs", c.interval_secs)?;

        positive("services.request_timeout_secs", self.services.request_timeout_secs)?;
        Ok(())
    }
}

/// Upper bound of the pending-rescan recency window.
pub const MAX_WINDOW_DAYS: i64 = 3650;

fn positive<T>(name: &str, value: T) -> Result<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value > T::default() {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must be greater than zero, got {value}")))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseTunables {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl DatabaseTunables {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl Default for DatabaseTunables {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterTunables {
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl RouterTunables {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for RouterTunables {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            request_timeout_secs: 5,
        }
    }
}

/// Consumer side. `concurrency` is both the admission-gate width and the
/// broker prefetch count.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerTunables {
    pub concurrency: u16,
    pub permission_ttl_secs: u64,
}

impl WorkerTunables {
    pub fn permission_ttl(&self) -> Duration {
        Duration::from_secs(self.permission_ttl_secs)
    }
}

impl Default for WorkerTunables {
    fn default() -> Self {
        Self {
            concurrency: 10,
            permission_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RescanTunables {
    pub batch_size: u32,
    pub max_total: u32,
    pub window_days: i64,
    pub batch_delay_ms: u64,
    pub interval_secs: u64,
    pub lock_ttl_secs: u64,
}

impl Default for RescanTunables {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_total: 1000,
            window_days: 7,
            batch_delay_ms: 1000,
            interval_secs: 600,
            lock_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsolidationTunables {
    pub lock_ttl_secs: u64,
    pub min_events: i64,
    pub max_subjects: i64,
    pub concurrency: usize,
    pub evidence_limit: i64,
    pub max_facts: usize,
    pub interval_secs: u64,
}

impl Default for ConsolidationTunables {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 1800,
            min_events: 10,
            max_subjects: 50,
            concurrency: 3,
            evidence_limit: 50,
            max_facts: 30,
            interval_secs: 4 * 60 * 60,
        }
    }
}

/// Registry names of the downstream services the workers call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceTunables {
    pub attachments: String,
    pub embeddings: String,
    pub vector_store: String,
    pub request_timeout_secs: u64,
}

impl ServiceTunables {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServiceTunables {
    fn default() -> Self {
        Self {
            attachments: "tool-service".to_string(),
            embeddings: "embedding-service".to_string(),
            vector_store: "qdrant".to_string(),
            request_timeout_secs: 30,
        }
    }
}
