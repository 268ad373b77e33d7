//! Data node server

use crate::common::{retry_with_backoff, shard_group_name, shutdown_signal, DataNodeConfig, Result};
use crate::coordination::{register_data_node, spawn_membership_watch, Coordination, RemoteSession};
use crate::datanode::backups::BackupTracker;
use crate::datanode::engine::DataNodeEngine;
use crate::datanode::http::{create_router, DataNodeState};
use crate::datanode::sequence_path;
use crate::transport::{GrpcTransport, KvNodeGrpcService, PeerTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;

/// One replica and its cluster membership.
///
/// The engine exists before registration so the node can already answer
/// the master's log version query when its membership becomes visible.
pub struct DataNode {
    engine: Arc<DataNodeEngine>,
    tracker: Arc<BackupTracker>,
    coord: Arc<dyn Coordination>,
    root: String,
    shard_id: u32,
    registered_as: Option<String>,
    watch: Option<JoinHandle<()>>,
}

impl DataNode {
    pub fn new(
        config: &DataNodeConfig,
        coord: Arc<dyn Coordination>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        let root = config.membership_root.clone();
        let tracker = Arc::new(BackupTracker::new(
            coord.clone(),
            &root,
            &shard_group_name(config.shard_id),
            &config.advertise_addr,
        ));
        let engine = Arc::new(DataNodeEngine::new(
            tracker.clone(),
            coord.clone(),
            sequence_path(&root),
            transport,
            config.replication,
        ));
        Self {
            engine,
            tracker,
            coord,
            root,
            shard_id: config.shard_id,
            registered_as: None,
            watch: None,
        }
    }

    pub fn engine(&self) -> &Arc<DataNodeEngine> {
        &self.engine
    }

    pub fn session(&self) -> &Arc<dyn Coordination> {
        &self.coord
    }

    pub fn registered_as(&self) -> Option<&str> {
        self.registered_as.as_deref()
    }

    /// Register under the membership root, load the current backup set and
    /// start following membership changes.
    pub async fn join(&mut self) -> Result<String> {
        let path = register_data_node(
            self.coord.as_ref(),
            &self.root,
            self.shard_id,
            self.tracker.self_addr(),
        )
        .await?;
        self.tracker.rebuild().await?;
        self.watch = Some(spawn_membership_watch(
            self.coord.clone(),
            self.root.clone(),
            self.tracker.clone(),
        ));
        self.registered_as = Some(path.clone());
        Ok(path)
    }

    /// Hand the log off if needed, stop watching and leave the cluster.
    pub async fn shutdown(mut self) -> Result<()> {
        for report in self.engine.handoff_before_exit().await {
            tracing::info!(
                "Handed off to {}: {} accepted, {} rejected",
                report.target,
                report.accepted,
                report.rejected
            );
        }
        if let Some(watch) = self.watch.take() {
            watch.abort();
        }
        self.coord.close().await?;
        tracing::info!("Left cluster ({})", self.registered_as.as_deref().unwrap_or("-"));
        Ok(())
    }
}

impl Drop for DataNode {
    fn drop(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.abort();
        }
    }
}

pub struct DataNodeServer {
    config: DataNodeConfig,
}

impl DataNodeServer {
    pub fn new(config: DataNodeConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        let config = self.config;
        config.validate()?;
        tracing::info!("Starting data node for {}", shard_group_name(config.shard_id));
        tracing::info!("  gRPC API: {}", config.bind_addr);
        tracing::info!("  Advertised as: {}", config.advertise_addr);
        tracing::info!("  Coordinator: {}", config.coordinator);
        tracing::info!("  Replication: {:?}", config.replication);

        let session = retry_with_backoff(
            || {
                RemoteSession::connect(
                    &config.coordinator,
                    config.connect_timeout(),
                    config.sync_timeout(),
                )
            },
            5,
            Duration::from_millis(200),
        )
        .await?;
        let coord: Arc<dyn Coordination> = Arc::new(session);
        let transport = Arc::new(GrpcTransport::new(
            config.connect_timeout(),
            config.sync_timeout(),
        ));
        let mut node = DataNode::new(&config, coord, transport);

        let http_handle = match config.http_addr {
            Some(addr) => {
                let router = create_router(DataNodeState {
                    engine: node.engine().clone(),
                });
                let listener = tokio::net::TcpListener::bind(addr).await?;
                tracing::info!("  HTTP API: {}", addr);
                Some(tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, router).await {
                        tracing::error!("HTTP server error: {}", e);
                    }
                }))
            }
            None => None,
        };

        let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
        let grpc_server = tokio::spawn(
            tonic::transport::Server::builder()
                .add_service(KvNodeGrpcService::new(node.engine().clone()).into_server())
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown_signal()),
        );

        let path = node.join().await?;
        tracing::info!("✓ Data node ready as {}", path);

        match grpc_server.await {
            Ok(Err(e)) => tracing::error!("gRPC server error: {}", e),
            Err(e) => tracing::error!("gRPC server task failed: {}", e),
            Ok(Ok(())) => {}
        }

        if let Some(handle) = http_handle {
            handle.abort();
        }
        node.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;

    #[tokio::test]
    async fn test_serve_refuses_shard_zero() {
        let config = DataNodeConfig {
            shard_id: 0,
            ..Default::default()
        };
        let err = DataNodeServer::new(config).serve().await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
