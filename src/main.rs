use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use forkjoin_cluster::abort::handlers::handle_abort;
use forkjoin_cluster::abort::protocol::ENDPOINT_ABORT;
use forkjoin_cluster::engine::handlers::{
    handle_job_abort, handle_job_status, handle_stats, handle_submit_job,
};
use forkjoin_cluster::engine::protocol::{
    ENDPOINT_JOB_ABORT, ENDPOINT_JOB_STATUS, ENDPOINT_STATS, ENDPOINT_SUBMIT_JOB,
};
use forkjoin_cluster::engine::registry::JobRegistry;
use forkjoin_cluster::engine::runtime::{Engine, EngineConfig, JobContext};
use forkjoin_cluster::grt::handlers::{handle_grt_get, handle_grt_replicate};
use forkjoin_cluster::grt::types::{ENDPOINT_GRT_GET, ENDPOINT_GRT_REPLICATE};
use forkjoin_cluster::membership::service::MembershipService;
use forkjoin_cluster::records::types::JobOutcome;
use forkjoin_cluster::steal::handlers::{handle_job_result, handle_steal};
use forkjoin_cluster::steal::protocol::{ENDPOINT_JOB_RESULT, ENDPOINT_STEAL};
use forkjoin_cluster::tuples::handlers::{handle_tuple_publish, handle_tuple_seq};
use forkjoin_cluster::tuples::types::{ENDPOINT_TUPLE_PUBLISH, ENDPOINT_TUPLE_SEQ};
use serde_json::json;
use std::net::SocketAddr;

/// Below this size the demo task stops spawning and computes inline; spawning
/// leaf-sized work would drown the cluster in records.
const FIB_SEQUENTIAL_CUTOFF: u64 = 12;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --bind <addr:port> [--seed <addr:port>] [--fault-tolerance] [--replication-factor <n>]",
            args[0]
        );
        eprintln!("Example: {} --bind 127.0.0.1:5000", args[0]);
        eprintln!(
            "Example: {} --bind 127.0.0.1:5001 --seed 127.0.0.1:5000 --fault-tolerance",
            args[0]
        );

        std::process::exit(1);
    }

    let mut bind_addr: Option<SocketAddr> = None;
    let mut seed_nodes: Vec<SocketAddr> = vec![];
    let mut fault_tolerance = false;
    let mut replication_factor: usize = 2;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                bind_addr = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--seed" => {
                seed_nodes.push(args[i + 1].parse()?);
                i += 2;
            }
            "--fault-tolerance" => {
                fault_tolerance = true;
                i += 1;
            }
            "--replication-factor" => {
                replication_factor = args[i + 1].parse()?;
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_addr.expect("--bind is required");

    tracing::info!("Starting node on {}", bind_addr);
    if !seed_nodes.is_empty() {
        tracing::info!("Seed nodes: {:?}", seed_nodes);
    } else {
        tracing::info!("Starting as seed node (founder)");
    }

    // 1. Membership (UDP gossip):
    let membership = MembershipService::new(bind_addr, seed_nodes).await?;
    tracing::info!("Node ID: {}", membership.local_node.id);

    // 2. Job handlers:
    let registry = JobRegistry::new();

    registry.register("fib", |ctx: JobContext, payload| async move {
        let n = payload["n"]
            .as_u64()
            .ok_or_else(|| anyhow::anyhow!("Missing n"))?;

        if n <= FIB_SEQUENTIAL_CUTOFF {
            return Ok(json!(fib_sequential(n)));
        }

        ctx.spawn("fib", json!({ "n": n - 1 }))?;
        ctx.spawn("fib", json!({ "n": n - 2 }))?;

        let mut total = 0u64;
        for child in ctx.sync().await? {
            match child.outcome {
                Some(JobOutcome::Completed { value }) => {
                    total += value.as_u64().unwrap_or(0);
                }
                Some(JobOutcome::Failed { error }) => anyhow::bail!(error),
                None => anyhow::bail!("Subtask {} was aborted", child.job_id),
            }
        }

        Ok(json!(total))
    });

    // 3. The engine:
    let engine = Engine::new(membership.clone(), registry, EngineConfig::default());
    if fault_tolerance {
        engine.enable_fault_tolerance(replication_factor);
    }
    engine.start();

    // 4. HTTP router:
    let app = Router::new()
        .route(ENDPOINT_SUBMIT_JOB, post(handle_submit_job))
        .route(&format!("{}/:id", ENDPOINT_JOB_STATUS), get(handle_job_status))
        .route(&format!("{}/:id", ENDPOINT_JOB_ABORT), post(handle_job_abort))
        .route(ENDPOINT_STATS, get(handle_stats))
        .route(ENDPOINT_STEAL, post(handle_steal))
        .route(ENDPOINT_JOB_RESULT, post(handle_job_result))
        .route(ENDPOINT_ABORT, post(handle_abort))
        .route(ENDPOINT_TUPLE_SEQ, post(handle_tuple_seq))
        .route(ENDPOINT_TUPLE_PUBLISH, post(handle_tuple_publish))
        .route(ENDPOINT_GRT_REPLICATE, post(handle_grt_replicate))
        .route(&format!("{}/:key", ENDPOINT_GRT_GET), get(handle_grt_get))
        .layer(Extension(engine.clone()))
        .layer(Extension(engine.tuples.clone()))
        .layer(Extension(engine.grt.clone()));

    // 5. Spawn membership service:
    let service_clone = membership.clone();
    tokio::spawn(async move {
        service_clone.start().await;
    });

    // 6. Spawn stats reporter:
    let reporter = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));

        loop {
            interval.tick().await;
            let alive = reporter.membership.get_alive_members();
            tracing::info!("Cluster stats: {} alive nodes", alive.len());
            reporter.stats.report();
        }
    });

    // 7. Start HTTP server:
    let http_addr = membership.local_node.http_addr;

    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn fib_sequential(n: u64) -> u64 {
    if n < 2 {
        n
    } else {
        fib_sequential(n - 1) + fib_sequential(n - 2)
    }
}
