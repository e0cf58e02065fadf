//! Adapter wiring and node lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use recon_gateway::adapters::{
    ActorProfile, CachedUserDirectory, CaptureRegistry, JsonFileStorage, LocalExecutionHost,
    OfflineQueueStore,
};
use recon_gateway::ports::SystemTimeSource;
use recon_gateway::{GatewayDependencies, GatewayService};
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::dispatcher::BuiltinDispatcher;

/// A running node: gateway service plus the reference adapters behind it.
pub struct NodeRuntime {
    service: GatewayService,
    host: Arc<LocalExecutionHost>,
    queue: Arc<OfflineQueueStore>,
    directory: Arc<CachedUserDirectory<JsonFileStorage>>,
    resident_actors: Vec<String>,
}

impl NodeRuntime {
    /// Open storage, start the execution host and build the gateway.
    pub async fn build(config: NodeConfig) -> Result<Self> {
        let storage = &config.gateway.storage;

        let directory = Arc::new(
            CachedUserDirectory::open(JsonFileStorage::new(&storage.users_path))
                .await
                .with_context(|| {
                    format!("Failed to open user directory {}", storage.users_path.display())
                })?,
        );
        if directory.is_empty() {
            warn!(
                path = %storage.users_path.display(),
                "User directory is empty; every request will be rejected"
            );
        }

        let queue = Arc::new(
            OfflineQueueStore::open(&storage.queue_path, config.gateway.execution.queue_expiry)
                .await
                .with_context(|| {
                    format!("Failed to open offline queue {}", storage.queue_path.display())
                })?,
        );

        let capture = Arc::new(CaptureRegistry::new());
        let host = Arc::new(
            LocalExecutionHost::start(
                config.host.partitions,
                Arc::new(BuiltinDispatcher),
                Arc::clone(&capture),
            )
            .context("Failed to start execution host")?,
        );

        let deps = GatewayDependencies {
            directory: directory.clone(),
            queue: queue.clone(),
            host: host.clone(),
            capture,
            clock: Arc::new(SystemTimeSource),
            arrivals: Some(host.subscribe_arrivals()),
        };
        let service =
            GatewayService::new(config.gateway, deps).context("Failed to build gateway")?;

        Ok(Self {
            service,
            host,
            queue,
            directory,
            resident_actors: config.host.resident_actors,
        })
    }

    /// Start serving and bring resident actors online.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let addr = self.service.start().await.context("Failed to start gateway")?;

        for actor in &self.resident_actors {
            self.host
                .join_actor(ActorProfile::new(actor.clone()))
                .with_context(|| format!("Failed to bring actor {actor} online"))?;
        }

        info!("===========================================");
        info!("  Recon Node v{}", recon_gateway::VERSION);
        info!("===========================================");
        info!(%addr, users = self.directory.len(), "Gateway ready");
        Ok(addr)
    }

    /// Stop the gateway and persist the offline queue.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Initiating graceful shutdown...");
        self.service.shutdown().await;
        self.queue
            .flush()
            .await
            .context("Failed to persist offline queue")?;
        info!(pending = self.queue.total_pending(), "Shutdown complete");
        Ok(())
    }

    pub fn host(&self) -> Arc<LocalExecutionHost> {
        Arc::clone(&self.host)
    }

    pub fn service(&self) -> &GatewayService {
        &self.service
    }
}
