//! Periodic singleton jobs: a fixed-interval loop that runs until stopped.
//!
//! Mutual exclusion across replicas is the job's own business (each job
//! takes its distributed lock per run); this loop only schedules.

use crate::error::Result;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Result of one scheduled run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRun<T> {
    /// Another replica holds the job lock.
    Skipped,
    Ran(T),
}

impl<T> JobRun<T> {
    pub fn ran(self) -> Option<T> {
        match self {
            JobRun::Ran(value) => Some(value),
            JobRun::Skipped => None,
        }
    }
}

/// Call `run` now and then every `interval` until `stop` turns true or its
/// sender is dropped. Errors are logged and the schedule continues.
pub async fn run_every<T, F, Fut>(
    name: &'static str,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    mut run: F,
) where
    T: std::fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobRun<T>>>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(job = name, interval_secs = interval.as_secs(), "periodic job started");

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    info!(job = name, "periodic job stopped");
                    return;
                }
            }
            _ = ticker.tick() => {
                let started = Instant::now();
                let result = match run().await {
                    Ok(JobRun::Ran(summary)) => {
                        info!(job = name, ?summary, "job run finished");
                        "ok"
                    }
                    Ok(JobRun::Skipped) => {
                        info!(job = name, "job lock held elsewhere, skipping run");
                        "skipped"
                    }
                    Err(e) => {
                        error!(job = name, error = %e, "job run failed");
                        "error"
                    }
                };
                metrics::operation_duration_ms().record(
                    started.elapsed().as_secs_f64() * 1000.0,
                    &[
                        KeyValue::new("operation", name),
                        KeyValue::new("result", result),
                    ],
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_on_interval_until_stopped() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let job = tokio::spawn(run_every("test", Duration::from_secs(60), stop_rx, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(JobRun::Ran(()))
            }
        }));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        stop_tx.send(true).unwrap();
        job.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn errors_do_not_end_the_schedule() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let job = tokio::spawn(run_every::<(), _, _>(
            "failing",
            Duration::from_secs(10),
            stop_rx,
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(crate::error::Error::Other("boom".into()))
                }
            },
        ));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        drop(stop_tx);
        job.await.unwrap();
    }
}
