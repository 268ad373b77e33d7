//! Coordination service over gRPC
//!
//! [`CoordinationGrpcService`] exposes a [`CoordinationTree`] hosted by the
//! master. [`RemoteSession`] is the data node side: one remote session,
//! kept alive by a background task.

use crate::common::{Error, Result};
use crate::coordination::tree::version_stream;
use crate::coordination::{Coordination, CoordinationTree, Subscription};
use crate::proto::coordination_client::CoordinationClient;
use crate::proto::coordination_server::{Coordination as CoordinationRpc, CoordinationServer};
use crate::proto::*;
use crate::transport::grpc::endpoint;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tonic::transport::Channel;
use tonic::{Code, Request, Response, Status};

/// Serves a shared tree to remote sessions.
pub struct CoordinationGrpcService {
    tree: Arc<CoordinationTree>,
}

impl CoordinationGrpcService {
    pub fn new(tree: Arc<CoordinationTree>) -> Self {
        Self { tree }
    }

    pub fn into_server(self) -> CoordinationServer<Self> {
        CoordinationServer::new(self)
    }

    /// Count the call as session activity. Anonymous calls are allowed.
    fn touch(&self, session_id: &str) -> std::result::Result<(), Status> {
        if session_id.is_empty() {
            return Ok(());
        }
        self.tree
            .keep_alive(session_id)
            .map_err(|e| e.to_grpc_status())
    }
}

fn ok() -> Response<SessionResponse> {
    Response::new(SessionResponse { ok: true })
}

#[tonic::async_trait]
impl CoordinationRpc for CoordinationGrpcService {
    async fn open_session(
        &self,
        _req: Request<OpenSessionRequest>,
    ) -> std::result::Result<Response<OpenSessionResponse>, Status> {
        let session_id = self.tree.open_session();
        Ok(Response::new(OpenSessionResponse {
            session_id,
            timeout_ms: self.tree.session_timeout().as_millis() as u64,
        }))
    }

    async fn keep_alive(
        &self,
        req: Request<SessionRequest>,
    ) -> std::result::Result<Response<SessionResponse>, Status> {
        let req = req.into_inner();
        self.tree
            .keep_alive(&req.session_id)
            .map_err(|e| e.to_grpc_status())?;
        Ok(ok())
    }

    async fn close_session(
        &self,
        req: Request<SessionRequest>,
    ) -> std::result::Result<Response<SessionResponse>, Status> {
        self.tree.close_session(&req.into_inner().session_id);
        Ok(ok())
    }

    async fn ensure_path(
        &self,
        req: Request<PathRequest>,
    ) -> std::result::Result<Response<SessionResponse>, Status> {
        let req = req.into_inner();
        self.touch(&req.session_id)?;
        self.tree
            .ensure_path(&req.path)
            .map_err(|e| e.to_grpc_status())?;
        Ok(ok())
    }

    async fn create_node(
        &self,
        req: Request<CreateNodeRequest>,
    ) -> std::result::Result<Response<CreateNodeResponse>, Status> {
        let req = req.into_inner();
        self.touch(&req.session_id)?;
        let owner = req.ephemeral.then_some(req.session_id.as_str());
        let path = self
            .tree
            .create(&req.path, &req.value, owner, req.sequential)
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(CreateNodeResponse { path }))
    }

    async fn get_children(
        &self,
        req: Request<PathRequest>,
    ) -> std::result::Result<Response<ChildrenResponse>, Status> {
        let req = req.into_inner();
        self.touch(&req.session_id)?;
        let children = self
            .tree
            .children(&req.path)
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(ChildrenResponse { children }))
    }

    async fn get_data(
        &self,
        req: Request<PathRequest>,
    ) -> std::result::Result<Response<DataResponse>, Status> {
        let req = req.into_inner();
        self.touch(&req.session_id)?;
        let resp = match self.tree.get_data(&req.path) {
            Some(value) => DataResponse {
                exists: true,
                value,
            },
            None => DataResponse::default(),
        };
        Ok(Response::new(resp))
    }

    async fn next_sequence(
        &self,
        req: Request<PathRequest>,
    ) -> std::result::Result<Response<SequenceResponse>, Status> {
        let req = req.into_inner();
        self.touch(&req.session_id)?;
        let value = self.tree.next_sequence(&req.path);
        Ok(Response::new(SequenceResponse { value }))
    }

    async fn delete_tree(
        &self,
        req: Request<PathRequest>,
    ) -> std::result::Result<Response<SessionResponse>, Status> {
        let req = req.into_inner();
        self.touch(&req.session_id)?;
        self.tree
            .delete_tree(&req.path)
            .map_err(|e| e.to_grpc_status())?;
        Ok(ok())
    }

    type WatchChildrenStream =
        Pin<Box<dyn Stream<Item = std::result::Result<ChildrenChanged, Status>> + Send>>;

    async fn watch_children(
        &self,
        req: Request<PathRequest>,
    ) -> std::result::Result<Response<Self::WatchChildrenStream>, Status> {
        let path = req.into_inner().path;
        let rx = self.tree.subscribe(&path);
        let stream = version_stream(rx).map(move |version| {
            Ok(ChildrenChanged {
                path: path.clone(),
                version,
            })
        });
        Ok(Response::new(Box::pin(stream)))
    }
}

/// Client session against a remote coordination service.
pub struct RemoteSession {
    client: CoordinationClient<Channel>,
    session_id: String,
    rpc_timeout: Duration,
    keepalive: JoinHandle<()>,
}

impl RemoteSession {
    /// Connect to `addr` and open a session.
    pub async fn connect(addr: &str, connect_timeout: Duration, rpc_timeout: Duration) -> Result<Self> {
        let channel = endpoint(addr)?
            .connect_timeout(connect_timeout)
            .connect()
            .await?;
        let mut client = CoordinationClient::new(channel);

        let mut req = Request::new(OpenSessionRequest {});
        req.set_timeout(rpc_timeout);
        let opened = client
            .open_session(req)
            .await
            .map_err(Error::from_status)?
            .into_inner();

        let session_timeout = Duration::from_millis(opened.timeout_ms.max(3));
        tracing::info!(
            "Opened coordination session {} at {} (timeout {:?})",
            opened.session_id,
            addr,
            session_timeout
        );

        let keepalive = tokio::spawn(keep_alive_loop(
            client.clone(),
            opened.session_id.clone(),
            session_timeout / 3,
        ));

        Ok(Self {
            client,
            session_id: opened.session_id,
            rpc_timeout,
            keepalive,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut req = Request::new(message);
        req.set_timeout(self.rpc_timeout);
        req
    }

    fn path_request(&self, path: &str) -> Request<PathRequest> {
        self.request(PathRequest {
            session_id: self.session_id.clone(),
            path: path.to_string(),
        })
    }
}

async fn keep_alive_loop(mut client: CoordinationClient<Channel>, session_id: String, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let mut req = Request::new(SessionRequest {
            session_id: session_id.clone(),
        });
        req.set_timeout(period);
        match client.keep_alive(req).await {
            Ok(_) => {}
            Err(status) if status.code() == Code::FailedPrecondition => {
                tracing::error!("Coordination session {} expired", session_id);
                return;
            }
            Err(status) => {
                tracing::warn!("Keep-alive for session {} failed: {}", session_id, status);
            }
        }
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}

#[tonic::async_trait]
impl Coordination for RemoteSession {
    async fn ensure_path(&self, path: &str) -> Result<()> {
        self.client
            .clone()
            .ensure_path(self.path_request(path))
            .await
            .map_err(Error::from_status)?;
        Ok(())
    }

    async fn create_ephemeral(&self, path: &str, value: &str, sequential: bool) -> Result<String> {
        let req = self.request(CreateNodeRequest {
            session_id: self.session_id.clone(),
            path: path.to_string(),
            value: value.to_string(),
            ephemeral: true,
            sequential,
        });
        let resp = self
            .client
            .clone()
            .create_node(req)
            .await
            .map_err(Error::from_status)?;
        Ok(resp.into_inner().path)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let resp = self
            .client
            .clone()
            .get_children(self.path_request(path))
            .await
            .map_err(Error::from_status)?;
        Ok(resp.into_inner().children)
    }

    async fn subscribe_children(&self, path: &str) -> Result<Subscription> {
        // No deadline: the stream lives until the session or server ends it.
        let req = Request::new(PathRequest {
            session_id: self.session_id.clone(),
            path: path.to_string(),
        });
        let stream = self
            .client
            .clone()
            .watch_children(req)
            .await
            .map_err(Error::from_status)?
            .into_inner();
        Ok(Subscription::new(stream.map(|event| {
            event
                .map(|changed| changed.version)
                .map_err(Error::from_status)
        })))
    }

    async fn get_data(&self, path: &str) -> Result<Option<String>> {
        let resp = self
            .client
            .clone()
            .get_data(self.path_request(path))
            .await
            .map_err(Error::from_status)?
            .into_inner();
        Ok(resp.exists.then_some(resp.value))
    }

    async fn next_sequence(&self, path: &str) -> Result<u64> {
        let resp = self
            .client
            .clone()
            .next_sequence(self.path_request(path))
            .await
            .map_err(Error::from_status)?;
        Ok(resp.into_inner().value)
    }

    async fn delete_tree(&self, path: &str) -> Result<()> {
        self.client
            .clone()
            .delete_tree(self.path_request(path))
            .await
            .map_err(Error::from_status)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.keepalive.abort();
        let req = self.request(SessionRequest {
            session_id: self.session_id.clone(),
        });
        self.client
            .clone()
            .close_session(req)
            .await
            .map_err(Error::from_status)?;
        tracing::info!("Closed coordination session {}", self.session_id);
        Ok(())
    }
}
