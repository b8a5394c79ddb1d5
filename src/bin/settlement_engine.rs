use anyhow::{Context, Result};
use corretora_engine::bin_common::{
    parse_args, print_banner, print_shutdown, resolve_config_path, ConfigType, RunConfig,
};
use option_engine::{init_tracing, EngineConfig, SettlementEngine};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = resolve_config_path(&parse_args(), ConfigType::Engine)?;
    let config = EngineConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    init_tracing(&config.log_level);
    config.log();

    let run = RunConfig::new("Settlement Engine")
        .with_heartbeat(config.heartbeat_interval_secs)
        .with_detail("Config", config_path.display())
        .with_detail("Storage", format!("{:?}", config.storage.backend))
        .with_detail("Tick (ms)", config.scheduler.tick_ms);
    let mut engine = SettlementEngine::new(config).await?;

    print_banner(&run);

    let feed = engine.spawn_feed();
    let scheduler = engine.spawn_scheduler();

    while engine.shutdown.interruptible_sleep(Duration::from_secs(1)).await {
        engine.maybe_heartbeat();
    }

    join_task("scheduler", scheduler).await;
    if let Some(feed) = feed {
        join_task("kline feed", feed).await;
    }

    let stats = engine.scheduler.stats();
    print_shutdown(
        &run,
        Some(&format!(
            "Ticks: {} | Settled: {} | Failed: {} | Outbox replayed: {}",
            stats.ticks(),
            stats.settled(),
            stats.failed(),
            stats.outbox_applied()
        )),
    );

    Ok(())
}

async fn join_task(name: &str, handle: JoinHandle<()>) {
    match handle.await {
        Ok(()) => info!("{} stopped", name),
        Err(e) => warn!("{} task ended abnormally: {}", name, e),
    }
}
