//! Pending rescan: republishes recent messages still `pending`, recovering
//! work whose original publish or consumption was lost.

use super::control::{JobRun, run_every};
use crate::broker::topology::VECTORIZE;
use crate::broker::{Publish, PublishOptions};
use crate::config::tunables::RescanTunables;
use crate::db::WorkStore;
use crate::error::{Error, Result};
use crate::lock::DistributedLock;
use crate::model::work::PendingKey;
use crate::telemetry::metrics;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const LOCK_KEY: &str = "vectorize:pending_scan:lock";

pub struct PendingRescan {
    store: Arc<dyn WorkStore>,
    publisher: Arc<dyn Publish>,
    lock: DistributedLock,
    config: RescanTunables,
}

impl PendingRescan {
    pub fn new(
        store: Arc<dyn WorkStore>,
        publisher: Arc<dyn Publish>,
        lock: DistributedLock,
        config: RescanTunables,
    ) -> Self {
        Self {
            store,
            publisher,
            lock,
            config,
        }
    }

    /// One scan under the job lock. Returns the number of republished ids.
    pub async fn run_once(&self) -> Result<JobRun<usize>> {
        let ttl = Duration::from_secs(self.config.lock_ttl_secs);
        let Some(guard) = self.lock.try_acquire(LOCK_KEY, ttl).await? else {
            return Ok(JobRun::Skipped);
        };
        let result = self.scan().await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "rescan lock release failed, relying on TTL");
        }
        result.map(JobRun::Ran)
    }

    /// Page through pending ids newest first and republish each one.
    pub async fn scan(&self) -> Result<usize> {
        let since_ms = chrono::Duration::try_days(self.config.window_days)
            .and_then(|window| chrono::Utc::now().checked_sub_signed(window))
            .ok_or_else(|| {
                Error::Config(format!(
                    "rescan window of {} days is out of range",
                    self.config.window_days
                ))
            })?
            .timestamp_millis();
        let max_total = self.config.max_total as usize;
        let batch_size = self.config.batch_size.max(1) as usize;
        let batch_delay = Duration::from_millis(self.config.batch_delay_ms);

        let mut published = 0usize;
        let mut after: Option<PendingKey> = None;
        while published < max_total {
            let limit = batch_size.min(max_total - published);
            let batch = self
                .store
                .pending_since(since_ms, after.as_ref(), limit as i64)
                .await?;
            if batch.is_empty() {
                break;
            }

            for key in &batch {
                self.publisher
                    .publish(
                        VECTORIZE.base_routing_key,
                        &json!({ "message_id": key.message_id }),
                        PublishOptions::default(),
                    )
                    .await?;
                published += 1;
            }
            metrics::work_republished().add(batch.len() as u64, &[]);
            debug!(batch = batch.len(), published, "republished pending batch");

            let full = batch.len() == limit;
            after = batch.into_iter().last();
            if !full || published >= max_total {
                break;
            }
            tokio::time::sleep(batch_delay).await;
        }

        if published > 0 {
            info!(published, "pending rescan republished messages");
        }
        Ok(published)
    }

    pub async fn run_periodic(&self, stop: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.interval_secs);
        run_every("pending_rescan", interval, stop, || self.run_once()).await;
    }
}
