use anyhow::Context;
use atlas::config::StoreConfig;
use atlas::{
    AppState, AtlasConfigManager, CatalogUpdater, ChannelScheduler, FsStore, InMemoryQueue,
    MemoryStore, ModelCatalog, ObjectStore, QueueReceiver, ResearchWorker, RetryScheduler,
    SynthesisCoordinator, SynthesisOutcome,
};
use std::env;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path = env::var("ATLAS_CONFIG").unwrap_or_else(|_| "atlas.toml".to_string());
    let config_manager =
        Arc::new(AtlasConfigManager::new(&config_path).context("Failed to load configuration")?);
    let config = config_manager.config();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "atlas={level},tower_http={level}",
            level = config.server.log_level
        ))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(config = %config_path, version = env!("CARGO_PKG_VERSION"), "Starting A.T.L.A.S");

    let store: Arc<dyn ObjectStore> = match &config.store {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::Fs { root } => {
            info!(root = %root.display(), "Using filesystem store");
            Arc::new(FsStore::new(root.clone()))
        }
    };

    let catalog = Arc::new(ModelCatalog::new(store.clone()));
    catalog.log_status().await;
    spawn_catalog_updater(config_manager.clone(), store.clone(), catalog.clone());

    let (queue, receiver) = InMemoryQueue::channel();
    let (scheduler, retry_rx) = ChannelScheduler::channel();
    let scheduler: Arc<dyn RetryScheduler> = Arc::new(scheduler);

    spawn_workers(&config_manager, store.clone(), Arc::new(receiver)).await?;
    spawn_synthesis_loop(
        config_manager.clone(),
        store.clone(),
        scheduler.clone(),
        retry_rx,
    );

    let state = AppState {
        config_manager: config_manager.clone(),
        store,
        queue: Arc::new(queue),
        scheduler,
        catalog,
    };
    let app = atlas::create_app(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "Listening");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

/// Periodically fetch the model catalog document so lookups stay off the
/// fallback table. The first update runs at startup; an interval of 0
/// disables the schedule entirely.
fn spawn_catalog_updater(
    config_manager: Arc<AtlasConfigManager>,
    store: Arc<dyn ObjectStore>,
    catalog: Arc<ModelCatalog>,
) {
    let interval_hours = config_manager.config().metadata.update_interval_hours;
    if interval_hours == 0 {
        info!("Scheduled catalog updates disabled");
        return;
    }

    tokio::spawn(async move {
        let period = std::time::Duration::from_secs(interval_hours * 3600);
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let config = config_manager.config();
            let updater = CatalogUpdater::new(store.clone(), config.metadata.catalog_url.clone());
            match updater.update().await {
                Ok(models) => {
                    catalog.refresh().await;
                    info!(models, "Scheduled catalog update complete");
                }
                Err(e) => error!("Scheduled catalog update failed: {e}"),
            }
        }
    });
}

/// Spawn the configured number of work-item consumers over a shared receiver.
async fn spawn_workers(
    config_manager: &AtlasConfigManager,
    store: Arc<dyn ObjectStore>,
    receiver: Arc<QueueReceiver>,
) -> anyhow::Result<()> {
    let config = config_manager.config();

    let search_key = env::var(&config.search.api_key_env).unwrap_or_else(|_| {
        error!(
            "Environment variable {} is not set; search calls will be rejected upstream",
            config.search.api_key_env
        );
        String::new()
    });
    let search = Arc::new(atlas::HttpSearchProvider::new(
        config.search.endpoint.clone(),
        search_key,
        config.search.max_results,
    ));

    let provider = config
        .provider
        .provider(config.research_prompts.model.as_deref())
        .context("Failed to resolve worker LLM provider")?;
    let llm: Arc<dyn atlas::LLMClient> = Arc::from(
        provider
            .create_client()
            .await
            .context("Failed to create worker LLM client")?,
    );

    let worker = Arc::new(ResearchWorker::new(store, search, llm));
    info!(workers = config.server.workers, "Spawning research workers");
    for _ in 0..config.server.workers.max(1) {
        let worker = worker.clone();
        let receiver = receiver.clone();
        tokio::spawn(async move { worker.run(&receiver).await });
    }
    Ok(())
}

/// Consume rescheduled synthesis requests and re-run the coordinator for
/// each. Failures are logged; the loop never dies with the request.
fn spawn_synthesis_loop(
    config_manager: Arc<AtlasConfigManager>,
    store: Arc<dyn ObjectStore>,
    scheduler: Arc<dyn RetryScheduler>,
    mut retry_rx: mpsc::UnboundedReceiver<atlas::types::SynthesisRequest>,
) {
    tokio::spawn(async move {
        while let Some(request) = retry_rx.recv().await {
            let config = config_manager.config();

            let llm = match config
                .provider
                .provider(config.synthesis.model.as_deref())
            {
                Ok(provider) => match provider.create_client().await {
                    Ok(client) => Arc::from(client),
                    Err(e) => {
                        error!("Dropping synthesis retry, LLM client unavailable: {e}");
                        continue;
                    }
                },
                Err(e) => {
                    error!("Dropping synthesis retry, provider misconfigured: {e}");
                    continue;
                }
            };

            let coordinator =
                SynthesisCoordinator::new(store.clone(), llm, scheduler.clone());
            match coordinator.synthesize(&config.synthesis, request).await {
                Ok(SynthesisOutcome::Completed(done)) => {
                    info!(run_id = %done.run_id, report = %done.report_location, "Retry synthesis completed");
                }
                Ok(SynthesisOutcome::InProgress(progress)) => {
                    info!(retry = progress.retry_count, "Synthesis still waiting on completion");
                }
                Err(e) => error!("Retry synthesis failed: {e}"),
            }
        }
    });
}
