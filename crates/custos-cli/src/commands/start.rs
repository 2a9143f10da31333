use std::sync::Arc;
use tracing::{error, info};

use custos_config::CustosConfig;
use custos_runtime::{SystemClock, VaultService};
use custos_store::Store;

pub(super) async fn cmd_start(config: CustosConfig, no_server: bool) -> custos_core::Result<()> {
    println!("🛡  Custos v{}", env!("CARGO_PKG_VERSION"));
    println!("   Store: {}", config.store.db_path.display());
    println!(
        "   Executor: {}",
        if config.execution.dry_run { "dry-run" } else { "disconnected" }
    );
    println!();

    let store = Store::open(&config.store.db_path)?;
    let service = Arc::new(VaultService::new(
        &config,
        store,
        super::executor_for(&config),
        Arc::new(SystemClock),
    )?);

    let recovered = service.recover_interrupted().await?;
    if recovered > 0 {
        println!("   Failed {recovered} action(s) interrupted by the last shutdown");
    }

    let scheduler = service.scheduler();
    let scheduler_handle = if config.renewal.enabled {
        println!(
            "   Renewal scheduler: every {}s",
            config.renewal.tick_interval_secs
        );
        Some(tokio::spawn(Arc::clone(&scheduler).run()))
    } else {
        println!("   Renewal scheduler: disabled");
        None
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown requested");
    };

    let served = if no_server {
        println!("   API server: disabled (ctrl-c to stop)");
        shutdown.await;
        Ok(())
    } else {
        println!("   API server: http://{}", config.server.listen);
        custos_server::start_server(config.server.clone(), Arc::clone(&service), shutdown).await
    };

    scheduler.shutdown();
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "renewal scheduler task panicked");
        }
    }

    served
}
