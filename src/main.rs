//! Fuse Task Queue worker binary

use fuse_task_queue::config::{Config, StorageBackend};
use fuse_task_queue::storage::memory::MemoryStore;
use fuse_task_queue::storage::Store;
use fuse_task_queue::{TaskManager, TracingEventSink, WorkerPool};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Fuse Task Queue");
    info!(
        "Initialized with {} workers, backend {:?}, prefix {}",
        config.worker_count, config.storage_backend, config.key_prefix
    );

    let store = build_store(&config).await?;
    if !store.health_check().await {
        return Err("storage health check failed".into());
    }

    let manager = TaskManager::new(store, &config, Arc::new(TracingEventSink));
    manager
        .register_fn("echo", |task| async move { anyhow::Ok(task.payload) })
        .await;

    let mut worker_pool =
        WorkerPool::new(config.worker_count).with_poll_interval(config.poll_interval());
    worker_pool.start(Arc::clone(manager.executor())).await?;

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C");

    worker_pool.shutdown(config.shutdown_timeout()).await?;
    Ok(())
}

async fn build_store(config: &Config) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    match config.storage_backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "redis")]
        StorageBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or("redis backend requires redis_url")?;
            let store = fuse_task_queue::storage::redis::RedisStore::connect(url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StorageBackend::Redis => Err("built without the `redis` feature".into()),
    }
}
