//! lanework CLI: runs the workers and periodic jobs, and pokes at lanes,
//! topology and the broker by hand.

use lanework::broker::topology::{self, TopologyPlan, VECTORIZE, WORK_QUEUES};
use lanework::broker::{Broker, DeliveryHandler, Publish, PublishOptions};
use lanework::clients::{
    HttpAttachmentFetcher, HttpEmbedder, LlmExtractor, QdrantSink, ServiceClient,
};
use lanework::config::{Config, Tunables};
use lanework::db::{Db, KnowledgeStore, PermissionSource, WorkStore};
use lanework::engine::{Consolidation, PendingRescan, VectorizeDeps, VectorizeWorker};
use lanework::kv::{KvStore, MemoryKv, RedisKv};
use lanework::lane::{Lane, LaneContext, LaneOverride, LaneRouter, PROD};
use lanework::lock::DistributedLock;
use lanework::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "lanework", about = "Lane-aware post-processing workers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a long-lived worker
    Serve {
        #[command(subcommand)]
        role: Role,
    },
    /// Republish pending messages once
    Rescan,
    /// Run one consolidation pass
    Consolidate,
    /// Publish a JSON message
    Publish {
        /// Base routing key, e.g. task.vectorize
        routing_key: String,
        /// JSON body
        body: String,
        /// Delivery delay in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Publish into this lane instead of the ambient one
        #[arg(long, conflicts_with = "prod")]
        lane: Option<String>,
        /// Publish to production keys regardless of the environment lane
        #[arg(long)]
        prod: bool,
    },
    /// Resolve a service URL through the registry
    Resolve {
        service: String,
        #[arg(default_value = "")]
        path: String,
        #[arg(long)]
        lane: Option<String>,
    },
    /// Print the broker topology for a lane without connecting
    Topology {
        #[arg(long)]
        lane: Option<String>,
    },
}

#[derive(Subcommand)]
enum Role {
    /// Vectorize consumer plus the periodic pending rescan
    Vectorize,
    /// Periodic consolidation
    Consolidate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Topology { lane } => {
            print_topology(lane.as_deref());
            Ok(())
        }
        command => {
            let config = Config::from_env()?;
            let tunables = config.tunables()?;
            let _guard = init_telemetry(TelemetryConfig {
                endpoint: config.otel_endpoint.clone(),
                service_name: "lanework".to_string(),
                default_filter: config.log_level.clone(),
                lane: config.lane.clone(),
            })?;
            run(command, config, tunables).await
        }
    }
}

async fn run(command: Command, config: Config, tunables: Tunables) -> anyhow::Result<()> {
    let lanes = LaneContext::new(config.lane.clone());

    match command {
        Command::Serve { role: Role::Vectorize } => serve_vectorize(&config, &tunables, lanes).await,
        Command::Serve { role: Role::Consolidate } => serve_consolidate(&config, &tunables).await,
        Command::Rescan => {
            let db = connect_db(&config, &tunables).await?;
            let broker = connect_broker(&config, &tunables, lanes).await?;
            let rescan = PendingRescan::new(
                db as Arc<dyn WorkStore>,
                Arc::clone(&broker) as Arc<dyn Publish>,
                lock(&config).await?,
                tunables.rescan.clone(),
            );
            let run = rescan.run_once().await;
            broker.close().await?;
            match run?.ran() {
                Some(published) => println!("republished {published} pending message(s)"),
                None => println!("rescan lock held elsewhere, nothing done"),
            }
            Ok(())
        }
        Command::Consolidate => {
            let consolidation = build_consolidation(&config, &tunables).await?;
            match consolidation.run_once().await?.ran() {
                Some(summary) => println!(
                    "eligible {}, updated {}, unchanged {}, failed {}",
                    summary.eligible, summary.updated, summary.unchanged, summary.failed
                ),
                None => println!("consolidation lock held elsewhere, nothing done"),
            }
            Ok(())
        }
        Command::Publish {
            routing_key,
            body,
            delay_ms,
            lane,
            prod,
        } => {
            let body: serde_json::Value = serde_json::from_str(&body)?;
            let choice = if prod {
                LaneOverride::Production
            } else {
                lane.as_deref().map(LaneOverride::from_name).unwrap_or_default()
            };
            let mut options = PublishOptions::default().lane(choice);
            if let Some(delay) = delay_ms {
                options = options.delay_ms(delay);
            }

            let broker = connect_broker(&config, &tunables, lanes).await?;
            let published = broker.publish(&routing_key, &body, options).await;
            broker.close().await?;
            published?;
            println!("published to {routing_key}");
            Ok(())
        }
        Command::Resolve {
            service,
            path,
            lane,
        } => {
            let router =
                LaneRouter::start(config.registry_url.as_deref(), &tunables.router, lanes).await?;
            println!("{}", router.resolve_url(&service, &path, lane.as_deref()));
            router.stop();
            Ok(())
        }
        Command::Topology { lane } => {
            print_topology(lane.as_deref());
            Ok(())
        }
    }
}

async fn serve_vectorize(
    config: &Config,
    tunables: &Tunables,
    lanes: LaneContext,
) -> anyhow::Result<()> {
    let db = connect_db(config, tunables).await?;
    let broker = connect_broker(config, tunables, lanes.clone()).await?;
    broker.declare_topology(lanes.default_lane().cloned()).await?;

    let router = Arc::new(
        LaneRouter::start(config.registry_url.as_deref(), &tunables.router, lanes).await?,
    );
    let services = ServiceClient::new(Arc::clone(&router), tunables.services.request_timeout())?;
    let worker = VectorizeWorker::new(
        VectorizeDeps {
            store: Arc::clone(&db) as Arc<dyn WorkStore>,
            permissions: Arc::clone(&db) as Arc<dyn PermissionSource>,
            fetcher: Arc::new(HttpAttachmentFetcher::new(
                services.clone(),
                &tunables.services.attachments,
            )),
            embedder: Arc::new(HttpEmbedder::new(
                services.clone(),
                &tunables.services.embeddings,
            )),
            sink: Arc::new(QdrantSink::new(services, &tunables.services.vector_store)),
        },
        usize::from(tunables.worker.concurrency),
        tunables.worker.permission_ttl(),
    );
    let rescan = PendingRescan::new(
        db as Arc<dyn WorkStore>,
        Arc::clone(&broker) as Arc<dyn Publish>,
        lock(config).await?,
        tunables.rescan.clone(),
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(shutdown_on_ctrl_c(stop_tx));

    let queue = broker.queue_for(&VECTORIZE);
    info!(queue = %queue, "vectorize worker starting");
    let handler: Arc<dyn DeliveryHandler> = Arc::new(worker);
    let (consumed, ()) = tokio::join!(
        broker.consume(&queue, handler, stop_rx.clone()),
        rescan.run_periodic(stop_rx),
    );

    router.stop();
    broker.close().await?;
    consumed?;
    Ok(())
}

async fn serve_consolidate(config: &Config, tunables: &Tunables) -> anyhow::Result<()> {
    let consolidation = build_consolidation(config, tunables).await?;
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(shutdown_on_ctrl_c(stop_tx));
    consolidation.run_periodic(stop_rx).await;
    Ok(())
}

async fn build_consolidation(config: &Config, tunables: &Tunables) -> anyhow::Result<Consolidation> {
    let api_key = config
        .anthropic_api_key
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY is required for consolidation"))?;
    let extractor = LlmExtractor::new(api_key, &config.extraction_model)?;
    info!(model = extractor.model(), "fact extractor ready");

    Ok(Consolidation::new(
        connect_db(config, tunables).await? as Arc<dyn KnowledgeStore>,
        Arc::new(extractor),
        lock(config).await?,
        tunables.consolidation.clone(),
    ))
}

async fn connect_db(config: &Config, tunables: &Tunables) -> anyhow::Result<Arc<Db>> {
    let db = Db::connect(config.database_url.expose_secret(), &tunables.database).await?;
    db.migrate().await?;
    Ok(Arc::new(db))
}

async fn connect_broker(
    config: &Config,
    tunables: &Tunables,
    lanes: LaneContext,
) -> anyhow::Result<Arc<Broker>> {
    let broker = Broker::new(config.amqp_url.clone(), lanes, tunables.worker.concurrency);
    broker.connect().await?;
    Ok(Arc::new(broker))
}

async fn lock(config: &Config) -> anyhow::Result<DistributedLock> {
    let store: Arc<dyn KvStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisKv::connect(url.expose_secret()).await?),
        None => {
            warn!("REDIS_URL not set, locks only exclude within this process");
            Arc::new(MemoryKv::new())
        }
    };
    Ok(DistributedLock::new(store))
}

async fn shutdown_on_ctrl_c(stop: watch::Sender<bool>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
    let _ = stop.send(true);
}

fn print_topology(lane: Option<&str>) {
    let lane = lane.and_then(Lane::new);
    let plan = TopologyPlan::for_lane(lane.as_ref(), &WORK_QUEUES);
    let name = lane.map_or_else(|| PROD.to_string(), |l| l.to_string());
    println!("lane: {name}");
    println!("exchanges:");
    for exchange in &plan.exchanges {
        println!("  {} ({:?}) {:?}", exchange.name, exchange.kind, exchange.arguments);
    }
    println!("queues:");
    for queue in &plan.queues {
        println!("  {} {:?}", queue.name, queue.arguments);
    }
    println!("bindings:");
    for binding in &plan.bindings {
        println!(
            "  {} -> {} [{}]",
            binding.exchange, binding.queue, binding.routing_key
        );
    }
    println!("dead letters: {}", topology::DEAD_LETTER_QUEUE);
}

