//! Master server
//!
//! Hosts the coordination tree for the cluster and answers keyed requests
//! with redirects to shard primaries.

use crate::common::{shutdown_signal, MasterConfig, Result};
use crate::coordination::{
    spawn_membership_watch, spawn_session_keepalive, spawn_session_reaper, Coordination,
    CoordinationGrpcService, CoordinationTree,
};
use crate::master::http::{create_router, MasterState};
use crate::master::routing::Router;
use crate::transport::{GrpcTransport, KvNodeGrpcService};
use std::sync::Arc;

pub struct MasterServer {
    config: MasterConfig,
}

impl MasterServer {
    pub fn new(config: MasterConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        let config = self.config;
        tracing::info!("Starting master");
        tracing::info!("  gRPC API: {}", config.grpc_addr);
        tracing::info!("  Membership root: {}", config.membership_root);
        match config.shard_count {
            Some(count) => tracing::info!("  Shard count: {}", count),
            None => tracing::info!("  Shard count: from routing table"),
        }

        let tree = Arc::new(CoordinationTree::new(config.session_timeout()));
        let reaper = spawn_session_reaper(tree.clone());

        let session = tree.connect();
        let keepalive = spawn_session_keepalive(tree.clone(), session.session_id().to_string());
        let coord: Arc<dyn Coordination> = Arc::new(session);
        coord.ensure_path(&config.membership_root).await?;

        let transport = Arc::new(
            GrpcTransport::new(config.rpc_timeout(), config.rpc_timeout())
                .with_bulk_timeout(config.bulk_timeout()),
        );
        let router = Arc::new(Router::new(
            coord.clone(),
            transport,
            &config.membership_root,
            config.shard_count,
        ));
        let watch = spawn_membership_watch(
            coord.clone(),
            config.membership_root.clone(),
            router.clone(),
        );

        let http_handle = match config.http_addr {
            Some(addr) => {
                let app = create_router(MasterState {
                    router: router.clone(),
                });
                let listener = tokio::net::TcpListener::bind(addr).await?;
                tracing::info!("  HTTP API: {}", addr);
                Some(tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, app).await {
                        tracing::error!("HTTP server error: {}", e);
                    }
                }))
            }
            None => None,
        };

        let grpc_server = tonic::transport::Server::builder()
            .add_service(KvNodeGrpcService::new(router).into_server())
            .add_service(CoordinationGrpcService::new(tree).into_server())
            .serve_with_shutdown(config.grpc_addr, shutdown_signal());

        tracing::info!("✓ Master ready");

        if let Err(e) = grpc_server.await {
            tracing::error!("gRPC server error: {}", e);
        }

        watch.abort();
        reaper.abort();
        keepalive.abort();
        if let Some(handle) = http_handle {
            handle.abort();
        }
        coord.delete_tree(&config.membership_root).await?;
        tracing::info!("Removed {}", config.membership_root);
        Ok(())
    }
}
