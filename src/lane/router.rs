//! Lane-aware service routing backed by a polled registry.
//!
//! The route table is fetched once at startup and then refreshed by a
//! background task. Readers never lock: the table lives behind an `ArcSwap`
//! and every refresh swaps in a complete new table, so a reader sees either
//! the old table or the new one, never a mix. A failed poll keeps the last
//! good table.

use super::{LANE_HEADER, Lane, LaneContext};
use crate::config::tunables::RouterTunables;
use crate::error::{Error, Result};
use crate::telemetry::metrics;
use arc_swap::ArcSwap;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Ports that are left out of resolved URLs.
const DEFAULT_HTTP_PORT: u16 = 80;

/// One registry entry: the service port and the lanes it is deployed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceRoute {
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub lanes: HashSet<String>,
}

pub type RouteTable = HashMap<String, ServiceRoute>;

/// Parse a registry response. Accepts `{"services": {...}}` as well as a
/// bare `{name: route}` mapping.
pub fn parse_route_table(body: serde_json::Value) -> Result<RouteTable> {
    let services = match body {
        serde_json::Value::Object(mut map) if map.contains_key("services") => map
            .remove("services")
            .unwrap_or(serde_json::Value::Null),
        other => other,
    };
    Ok(serde_json::from_value(services)?)
}

/// Fetches the route table from `{registry}/v1/routes`.
struct RegistryClient {
    http: reqwest::Client,
    routes_url: String,
}

impl RegistryClient {
    fn new(registry_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            routes_url: format!("{}/v1/routes", registry_url.trim_end_matches('/')),
        })
    }

    async fn fetch(&self) -> Result<RouteTable> {
        let response = self.http.get(&self.routes_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Other(format!("registry responded {status}")));
        }
        let body: serde_json::Value = response.json().await?;
        parse_route_table(body)
    }

    /// Fetch and swap. Failures are logged and leave the table untouched.
    async fn refresh(&self, table: &ArcSwap<RouteTable>) {
        match self.fetch().await {
            Ok(fresh) => {
                debug!(services = fresh.len(), "route table refreshed");
                table.store(Arc::new(fresh));
                metrics::route_refreshes().add(1, &[KeyValue::new("result", "ok")]);
            }
            Err(e) => {
                warn!(url = %self.routes_url, error = %e, "failed to poll registry, keeping last table");
                metrics::route_refreshes().add(1, &[KeyValue::new("result", "error")]);
            }
        }
    }
}

/// Resolves `service` + lane into a routable base URL.
pub struct LaneRouter {
    table: Arc<ArcSwap<RouteTable>>,
    lanes: LaneContext,
    stop: Arc<Notify>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl LaneRouter {
    /// Fetch the table once, then keep it fresh in a background task.
    ///
    /// Never fails on registry trouble: an unreachable registry yields an
    /// empty table that the next cycle retries. Without a registry URL the
    /// router resolves every service unqualified.
    pub async fn start(
        registry_url: Option<&str>,
        tunables: &RouterTunables,
        lanes: LaneContext,
    ) -> Result<Self> {
        let router = Self::with_table(RouteTable::new(), lanes);

        let Some(registry_url) = registry_url else {
            warn!("no registry configured, routing without lanes");
            return Ok(router);
        };

        let client = RegistryClient::new(registry_url, tunables.request_timeout())?;
        client.refresh(&router.table).await;
        info!(
            registry = registry_url,
            services = router.table.load().len(),
            "lane router ready"
        );

        let interval = tunables.poll_interval();
        let table = Arc::clone(&router.table);
        let stop = Arc::clone(&router.stop);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.notified() => {
                        debug!("route poller stopped");
                        return;
                    }
                    _ = ticker.tick() => client.refresh(&table).await,
                }
            }
        });
        *router.poller.lock() = Some(handle);

        Ok(router)
    }

    /// A router over a fixed table, with no background refresh.
    pub fn with_table(table: RouteTable, lanes: LaneContext) -> Self {
        Self {
            table: Arc::new(ArcSwap::from_pointee(table)),
            lanes,
            stop: Arc::new(Notify::new()),
            poller: Mutex::new(None),
        }
    }

    /// Replace the whole table.
    pub fn replace_table(&self, table: RouteTable) {
        self.table.store(Arc::new(table));
    }

    /// Current table snapshot.
    pub fn table(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    pub fn lanes(&self) -> &LaneContext {
        &self.lanes
    }

    /// Resolve `service` + `path` into a URL.
    ///
    /// `lane` overrides the ambient lane when given; `Some("prod")` forces
    /// the production host. A lane the service is not deployed in falls back
    /// to the production host.
    pub fn resolve_url(&self, service: &str, path: &str, lane: Option<&str>) -> String {
        let effective = match lane {
            Some(name) => Lane::new(name),
            None => self.lanes.current(),
        };

        let table = self.table.load();
        let route = table.get(service);

        let host = match (&effective, route) {
            (Some(lane), Some(route)) if route.lanes.contains(lane.as_str()) => {
                format!("{service}-{lane}")
            }
            _ => service.to_string(),
        };

        match route.map(|r| r.port) {
            Some(port) if port != 0 && port != DEFAULT_HTTP_PORT => {
                format!("http://{host}:{port}{path}")
            }
            _ => format!("http://{host}{path}"),
        }
    }

    /// `http://host[:port]` with no path.
    pub fn base_url(&self, service: &str, lane: Option<&str>) -> String {
        self.resolve_url(service, "", lane)
    }

    /// Headers to forward on outbound calls so the callee stays in our lane.
    pub fn headers(&self) -> HashMap<&'static str, String> {
        let mut headers = HashMap::new();
        if let Some(lane) = self.lanes.current() {
            headers.insert(LANE_HEADER, lane.to_string());
        }
        headers
    }

    /// Stop the background refresh. The last table stays readable.
    pub fn stop(&self) {
        self.stop.notify_one();
        self.poller.lock().take();
    }
}

impl Drop for LaneRouter {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.lock().take() {
            handle.abort();
        }
    }
}
