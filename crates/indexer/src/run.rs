//! Composition root: builds the runtime, wires the indexer families to the
//! scheduler and fleet supervisors, and keeps the process alive until
//! shutdown.

use {
    crate::{
        arguments::{Arguments, Family},
        bargain::BargainJob,
        db::Postgres,
        families::{
            LogIndexer, gardening::GardeningIndexer, lp_staking::LpStakingIndexer,
            marketplace::{MarketplaceConfig, MarketplaceIndexer}, pve::PveIndexer,
            tournaments::{TournamentConfig, TournamentIndexer},
        },
        fleet::{self, FleetConfig, FleetHandle},
        runtime::IndexerRuntime,
        scheduler::Scheduler,
        summoning::SummonEngine,
        worker::Worker,
    },
    anyhow::{Context, Result, anyhow},
    contracts::deployments::{POOL_IDS, networks},
    ethrpc::RpcPool,
    observe::metrics::LivenessChecking,
    std::{collections::HashMap, sync::Arc, time::Duration},
};

/// Stagger between launching consecutive pool fleets.
const POOL_LAUNCH_STAGGER: Duration = Duration::from_secs(1);

/// Collaborator engines the service itself does not implement. Injected by
/// the embedding binary; absent engines disable the jobs that need them.
#[derive(Default)]
pub struct ExternalEngines {
    pub summon: Option<Arc<dyn SummonEngine>>,
}

impl ExternalEngines {
    pub fn none() -> Self {
        Self::default()
    }
}

struct Liveness {
    cancel: crate::runtime::Cancellation,
}

#[async_trait::async_trait]
impl LivenessChecking for Liveness {
    async fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

pub async fn run(args: Arguments, engines: ExternalEngines) {
    let db = Postgres::new(args.db_url.as_str())
        .await
        .expect("connect database");
    db.initialize_schema().await.expect("initialize schema");

    let rpc = Arc::new(RpcPool::new(HashMap::from([
        (networks::DFK_CHAIN, args.dfk_rpc_url.clone()),
        (networks::METIS, args.metis_rpc_url.clone()),
        (networks::HARMONY, args.harmony_rpc_url.clone()),
    ])));
    let runtime = Arc::new(IndexerRuntime::new(db, rpc));

    if let Some(target) = &args.reset_progress {
        if let Err(err) = reset_progress(&runtime, target).await {
            tracing::error!(?err, reset = %target, "reset failed");
            std::process::exit(1);
        }
        return;
    }
    if let Some(family) = args.run_once {
        if let Err(err) = run_family_once(&runtime, &args, family).await {
            tracing::error!(?err, ?family, "manual run failed");
            std::process::exit(1);
        }
        return;
    }
    if args.run_bargain {
        if let Err(err) = run_bargain_once(&runtime, &engines).await {
            tracing::error!(?err, "bargain run failed");
            std::process::exit(1);
        }
        return;
    }

    let fleets = launch_fleets(&runtime, &args).await;
    let scheduler = register_triggers(&runtime, &args, &engines);

    let liveness = Arc::new(Liveness {
        cancel: runtime.cancel.clone(),
    });
    let serve_metrics = observe::metrics::serve_metrics(liveness, args.metrics_address);

    tokio::select! {
        _ = serve_metrics => tracing::error!("metrics server exited"),
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown requested"),
    }

    // cooperative shutdown: workers notice the flag at their next poll point
    runtime.cancel.cancel();
    scheduler.stop_all();
    runtime.leases.clear();
    runtime.progress.clear();
    for handle in &fleets {
        handle.abort();
    }
}

/// Launches every enabled block-scanning fleet; a fleet that refuses to
/// start is logged and skipped, it never takes the process down.
async fn launch_fleets(runtime: &Arc<IndexerRuntime>, args: &Arguments) -> Vec<FleetHandle> {
    let interval = args.indexer_interval;
    let mut planned: Vec<(Arc<dyn LogIndexer>, FleetConfig)> = Vec::new();

    if args.enabled(Family::Unified) {
        for pid in POOL_IDS {
            planned.push((
                Arc::new(LpStakingIndexer::dfk(
                    runtime.db.clone(),
                    Arc::clone(&runtime.rpc),
                    pid,
                )),
                FleetConfig {
                    workers: crate::families::lp_staking::WORKERS,
                    min_workers: crate::families::lp_staking::MIN_WORKERS,
                    interval,
                },
            ));
        }
    }
    if args.enabled(Family::HarmonyLp) {
        for pid in POOL_IDS {
            planned.push((
                Arc::new(LpStakingIndexer::harmony(
                    runtime.db.clone(),
                    Arc::clone(&runtime.rpc),
                    pid,
                )),
                FleetConfig {
                    workers: crate::families::lp_staking::WORKERS,
                    min_workers: crate::families::lp_staking::MIN_WORKERS,
                    interval,
                },
            ));
        }
    }
    for (family, constructor) in [
        (Family::SwapOnly, LpStakingIndexer::swaps_only as fn(_, _, _) -> _),
        (Family::RewardOnly, LpStakingIndexer::rewards_only),
    ] {
        if !args.enabled(family) {
            continue;
        }
        for pid in POOL_IDS {
            planned.push((
                Arc::new(constructor(
                    runtime.db.clone(),
                    Arc::clone(&runtime.rpc),
                    pid,
                )),
                FleetConfig {
                    workers: crate::families::lp_staking::WORKERS,
                    min_workers: crate::families::lp_staking::MIN_WORKERS,
                    interval,
                },
            ));
        }
    }
    if args.enabled(Family::Pve) {
        let config = FleetConfig {
            workers: crate::families::pve::WORKERS,
            min_workers: crate::families::pve::MIN_WORKERS,
            interval,
        };
        planned.push((
            Arc::new(PveIndexer::dfk_hunts(
                runtime.db.clone(),
                Arc::clone(&runtime.rpc),
            )),
            config,
        ));
        planned.push((
            Arc::new(PveIndexer::metis_patrols(
                runtime.db.clone(),
                Arc::clone(&runtime.rpc),
            )),
            config,
        ));
    }
    if args.enabled(Family::Gardening) {
        planned.push((
            Arc::new(GardeningIndexer::dfk(
                runtime.db.clone(),
                Arc::clone(&runtime.rpc),
            )),
            FleetConfig {
                workers: crate::families::gardening::WORKERS,
                min_workers: crate::families::gardening::MIN_WORKERS,
                interval,
            },
        ));
    }

    let mut handles = Vec::new();
    for (indexer, config) in planned {
        match fleet::launch(Arc::clone(runtime), indexer, config).await {
            Ok(handle) => {
                Metrics::get()
                    .live_workers
                    .with_label_values(&[handle.fleet_key.as_str()])
                    .set(i64::try_from(handle.effective_workers).unwrap_or(i64::MAX));
                handles.push(handle);
            }
            Err(err) => tracing::error!(?err, "fleet failed to launch, skipping"),
        }
        tokio::time::sleep(POOL_LAUNCH_STAGGER).await;
    }
    log_worker_count_summary(&handles);
    handles
}

/// The per-pool effective worker counts after failsafe down-steps, in one
/// log line for the operator.
fn log_worker_count_summary(handles: &[FleetHandle]) {
    let summary: Vec<String> = handles
        .iter()
        .map(|handle| format!("{}={}", handle.fleet_key, handle.effective_workers))
        .collect();
    tracing::info!(fleets = handles.len(), workers = %summary.join(" "), "worker count summary");
}

fn register_triggers(
    runtime: &Arc<IndexerRuntime>,
    args: &Arguments,
    engines: &ExternalEngines,
) -> Arc<Scheduler> {
    let scheduler = Arc::new(Scheduler::default());

    if args.enabled(Family::Marketplace) {
        let marketplace = Arc::new(MarketplaceIndexer::new(
            Arc::clone(runtime),
            MarketplaceConfig {
                api_url: args.marketplace_api_url.clone(),
                graphql_url: args.genes_graphql_url.clone(),
                fetch_workers: args.marketplace_fetch_workers,
                gene_workers: args.gene_backfill_workers,
            },
        ));
        {
            let marketplace = Arc::clone(&marketplace);
            scheduler.register(
                "marketplace_snapshot",
                args.marketplace_interval,
                runtime.cancel.clone(),
                move || {
                    let marketplace = Arc::clone(&marketplace);
                    async move {
                        if let Err(err) = marketplace.run_snapshot().await {
                            tracing::error!(?err, "marketplace snapshot failed");
                        }
                    }
                },
            );
        }
        scheduler.register(
            "gene_backfill",
            args.gene_backfill_interval,
            runtime.cancel.clone(),
            move || {
                let marketplace = Arc::clone(&marketplace);
                async move {
                    if let Err(err) = marketplace.run_gene_backfill().await {
                        tracing::error!(?err, "gene backfill failed");
                    }
                }
            },
        );
    }

    if args.enabled(Family::Tournaments) {
        let tournaments = Arc::new(TournamentIndexer::new(
            Arc::clone(runtime),
            TournamentConfig {
                graphql_url: args.battles_graphql_url.clone(),
                workers: args.tournament_workers,
            },
        ));
        scheduler.register(
            "tournaments",
            args.tournament_interval,
            runtime.cancel.clone(),
            move || {
                let tournaments = Arc::clone(&tournaments);
                async move {
                    if let Err(err) = tournaments.run().await {
                        tracing::error!(?err, "tournament pass failed");
                    }
                }
            },
        );
    }

    if let Some(engine) = &engines.summon {
        let job = Arc::new(BargainJob::new(runtime.db.clone(), Arc::clone(engine)));
        scheduler.register(
            "bargain_pairs",
            Duration::from_secs(6 * 3600),
            runtime.cancel.clone(),
            move || {
                let job = Arc::clone(&job);
                async move {
                    if let Err(err) = job.run().await {
                        tracing::error!(?err, "bargain scoring failed");
                    }
                }
            },
        );
    }

    scheduler
}

/// `--reset-progress <family>:<scope>`: deleting the checkpoints is the only
/// legal rewind; the next launch re-divides the range from scratch.
async fn reset_progress(runtime: &IndexerRuntime, target: &str) -> Result<()> {
    let (indexer_type, scope) = target
        .split_once(':')
        .ok_or_else(|| anyhow!("expected <family>:<scope>, got {target:?}"))?;
    let deleted = runtime
        .db
        .delete_checkpoints(indexer_type, scope)
        .await
        .context("delete checkpoints")?;
    tracing::info!(indexer_type, scope, deleted, "progress reset");
    Ok(())
}

async fn run_bargain_once(runtime: &IndexerRuntime, engines: &ExternalEngines) -> Result<()> {
    let engine = engines
        .summon
        .as_ref()
        .ok_or_else(|| anyhow!("no summoning engine configured; bargain scoring unavailable"))?;
    let job = BargainJob::new(runtime.db.clone(), Arc::clone(engine));
    let summary = job.run().await?;
    tracing::info!(?summary, "bargain run finished");
    Ok(())
}

/// One manual pass of a family: every worker of every fleet ticks once.
async fn run_family_once(
    runtime: &Arc<IndexerRuntime>,
    args: &Arguments,
    family: Family,
) -> Result<()> {
    match family {
        Family::Marketplace => {
            let marketplace = Arc::new(MarketplaceIndexer::new(
                Arc::clone(runtime),
                MarketplaceConfig {
                    api_url: args.marketplace_api_url.clone(),
                    graphql_url: args.genes_graphql_url.clone(),
                    fetch_workers: args.marketplace_fetch_workers,
                    gene_workers: args.gene_backfill_workers,
                },
            ));
            let snapshot = marketplace.run_snapshot().await?;
            let genes = marketplace.run_gene_backfill().await?;
            tracing::info!(?snapshot, ?genes, "marketplace run finished");
        }
        Family::Tournaments => {
            let tournaments = TournamentIndexer::new(
                Arc::clone(runtime),
                TournamentConfig {
                    graphql_url: args.battles_graphql_url.clone(),
                    workers: args.tournament_workers,
                },
            );
            let summary = tournaments.run().await?;
            tracing::info!(?summary, "tournament run finished");
        }
        Family::Unified | Family::HarmonyLp | Family::SwapOnly | Family::RewardOnly => {
            let constructor = match family {
                Family::Unified => LpStakingIndexer::dfk,
                Family::HarmonyLp => LpStakingIndexer::harmony,
                Family::SwapOnly => LpStakingIndexer::swaps_only,
                _ => LpStakingIndexer::rewards_only,
            };
            for pid in POOL_IDS {
                let indexer: Arc<dyn LogIndexer> = Arc::new(constructor(
                    runtime.db.clone(),
                    Arc::clone(&runtime.rpc),
                    pid,
                ));
                tick_fleet_once(runtime, indexer, crate::families::lp_staking::WORKERS).await?;
            }
        }
        Family::Pve => {
            let hunts: Arc<dyn LogIndexer> = Arc::new(PveIndexer::dfk_hunts(
                runtime.db.clone(),
                Arc::clone(&runtime.rpc),
            ));
            tick_fleet_once(runtime, hunts, crate::families::pve::WORKERS).await?;
            let patrols: Arc<dyn LogIndexer> = Arc::new(PveIndexer::metis_patrols(
                runtime.db.clone(),
                Arc::clone(&runtime.rpc),
            ));
            tick_fleet_once(runtime, patrols, crate::families::pve::WORKERS).await?;
        }
        Family::Gardening => {
            let indexer: Arc<dyn LogIndexer> = Arc::new(GardeningIndexer::dfk(
                runtime.db.clone(),
                Arc::clone(&runtime.rpc),
            ));
            tick_fleet_once(runtime, indexer, crate::families::gardening::WORKERS).await?;
        }
    }
    Ok(())
}

async fn tick_fleet_once(
    runtime: &Arc<IndexerRuntime>,
    indexer: Arc<dyn LogIndexer>,
    workers: usize,
) -> Result<()> {
    let head = runtime.rpc.current_block(indexer.chain_id()).await?;
    let genesis = indexer.genesis_block();
    for index in 0..workers {
        let worker = Worker::new(Arc::clone(runtime), Arc::clone(&indexer), index);
        let (start, end) = fleet::worker_range(genesis, head, index, workers);
        worker.register(start, end).await?;
        let outcome = worker.tick().await?;
        tracing::info!(worker = %worker.name(), ?outcome, "manual tick finished");
    }
    Ok(())
}

#[derive(prometheus_metric_storage::MetricStorage)]
struct Metrics {
    /// Effective workers per fleet after failsafe down-steps.
    #[metric(name = "indexer_live_workers", labels("fleet"))]
    live_workers: prometheus::IntGaugeVec,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}
