//! gRPC transport
//!
//! Clients are cached per address and connect lazily; every call carries
//! a deadline so an unreachable peer costs at most one RPC timeout.
//! `CloneTo` and `BecomePrimary` make the peer push its whole log and get
//! the longer bulk deadline.

use crate::common::{Error, LogEntry, OpKind, Operation, Reply, Result, SyncCode};
use crate::proto::kv_node_client::KvNodeClient;
use crate::proto::kv_node_server::{KvNode, KvNodeServer};
use crate::proto::*;
use crate::transport::{hello_message, KvService, PeerTransport};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Response, Status};

/// Endpoint for a `host:port` (or full URI) address.
pub fn endpoint(addr: &str) -> Result<Endpoint> {
    let uri = if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    };
    Endpoint::from_shared(uri)
        .map_err(|e| Error::InvalidConfig(format!("invalid address {}: {}", addr, e)))
}

/// Default deadline for requests that push a whole log.
pub const DEFAULT_BULK_TIMEOUT: Duration = Duration::from_secs(300);

pub struct GrpcTransport {
    clients: Mutex<HashMap<String, KvNodeClient<Channel>>>,
    connect_timeout: Duration,
    rpc_timeout: Duration,
    bulk_timeout: Duration,
}

impl GrpcTransport {
    pub fn new(connect_timeout: Duration, rpc_timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            connect_timeout,
            rpc_timeout,
            bulk_timeout: DEFAULT_BULK_TIMEOUT.max(rpc_timeout),
        }
    }

    /// Deadline for `CloneTo` and `BecomePrimary`.
    pub fn with_bulk_timeout(mut self, bulk_timeout: Duration) -> Self {
        self.bulk_timeout = bulk_timeout.max(self.rpc_timeout);
        self
    }

    fn client(&self, addr: &str) -> Result<KvNodeClient<Channel>> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(addr) {
            return Ok(client.clone());
        }
        let channel = endpoint(addr)?
            .connect_timeout(self.connect_timeout)
            .connect_lazy();
        let client = KvNodeClient::new(channel);
        clients.insert(addr.to_string(), client.clone());
        Ok(client)
    }

    fn deadline_for(&self, kind: OpKind) -> Duration {
        match kind {
            OpKind::CloneTo | OpKind::BecomePrimary => self.bulk_timeout,
            _ => self.rpc_timeout,
        }
    }
}

fn with_deadline<T>(message: T, deadline: Duration) -> Request<T> {
    let mut req = Request::new(message);
    req.set_timeout(deadline);
    req
}

/// Await `call`, giving up after `deadline` on the client side as well.
async fn bounded<T, F>(addr: &str, deadline: Duration, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<Response<T>, Status>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(Ok(resp)) => Ok(resp.into_inner()),
        Ok(Err(status)) => Err(map_status(addr, status)),
        Err(_) => Err(Error::Timeout(format!(
            "{}: no answer within {:?}",
            addr, deadline
        ))),
    }
}

fn map_status(addr: &str, status: Status) -> Error {
    match status.code() {
        Code::DeadlineExceeded => Error::Timeout(format!("{}: {}", addr, status.message())),
        Code::Unavailable => Error::ConnectionFailed(format!("{}: {}", addr, status.message())),
        _ => Error::Grpc(status),
    }
}

#[tonic::async_trait]
impl PeerTransport for GrpcTransport {
    async fn hello(&self, addr: &str, name: &str) -> Result<String> {
        let req = with_deadline(
            HelloRequest {
                name: name.to_string(),
            },
            self.rpc_timeout,
        );
        let mut client = self.client(addr)?;
        let reply = bounded(addr, self.rpc_timeout, client.say_hello(req)).await?;
        Ok(reply.message)
    }

    async fn request(&self, addr: &str, op: Operation) -> Result<Reply> {
        let deadline = self.deadline_for(op.kind);
        let req = with_deadline(RequestContent::from(op), deadline);
        let mut client = self.client(addr)?;
        Reply::try_from(bounded(addr, deadline, client.request(req)).await?)
    }

    async fn sync(&self, addr: &str, entry: LogEntry) -> Result<SyncCode> {
        let req = with_deadline(SyncEntry::from(entry), self.rpc_timeout);
        let mut client = self.client(addr)?;
        SyncCode::try_from(bounded(addr, self.rpc_timeout, client.sync(req)).await?.err)
    }
}

/// Serves any [`KvService`] as the `KvNode` gRPC service.
pub struct KvNodeGrpcService<S> {
    service: Arc<S>,
}

impl<S: KvService> KvNodeGrpcService<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    pub fn into_server(self) -> KvNodeServer<Self> {
        KvNodeServer::new(self)
    }
}

#[tonic::async_trait]
impl<S: KvService> KvNode for KvNodeGrpcService<S> {
    async fn say_hello(
        &self,
        req: Request<HelloRequest>,
    ) -> std::result::Result<Response<HelloReply>, Status> {
        let name = req.into_inner().name;
        Ok(Response::new(HelloReply {
            message: hello_message(&name, self.service.role()),
        }))
    }

    async fn request(
        &self,
        req: Request<RequestContent>,
    ) -> std::result::Result<Response<RequestResult>, Status> {
        let op = Operation::try_from(req.into_inner()).map_err(|e| e.to_grpc_status())?;
        let reply = self
            .service
            .request(op)
            .await
            .map_err(|e| e.to_grpc_status())?;
        Ok(Response::new(reply.into()))
    }

    async fn sync(
        &self,
        req: Request<SyncEntry>,
    ) -> std::result::Result<Response<SyncResult>, Status> {
        let entry = LogEntry::try_from(req.into_inner()).map_err(|e| e.to_grpc_status())?;
        let code = self.service.sync(entry).await;
        Ok(Response::new(SyncResult { err: code as i32 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_adds_scheme() {
        let ep = endpoint("127.0.0.1:50052").unwrap();
        assert_eq!(ep.uri().scheme_str(), Some("http"));
        assert_eq!(ep.uri().port_u16(), Some(50052));
        let ep = endpoint("http://localhost:1").unwrap();
        assert_eq!(ep.uri().host(), Some("localhost"));
    }

    #[test]
    fn test_log_pushing_requests_get_bulk_deadline() {
        let transport = GrpcTransport::new(Duration::from_millis(100), Duration::from_millis(50))
            .with_bulk_timeout(Duration::from_secs(60));
        assert_eq!(transport.deadline_for(OpKind::CloneTo), Duration::from_secs(60));
        assert_eq!(
            transport.deadline_for(OpKind::BecomePrimary),
            Duration::from_secs(60)
        );
        assert_eq!(transport.deadline_for(OpKind::Put), Duration::from_millis(50));
        assert_eq!(
            transport.deadline_for(OpKind::LogVersionQuery),
            Duration::from_millis(50)
        );

        let transport = GrpcTransport::new(Duration::from_secs(1), Duration::from_secs(2));
        assert_eq!(transport.deadline_for(OpKind::CloneTo), DEFAULT_BULK_TIMEOUT);
    }

    #[tokio::test]
    async fn test_unanswered_call_times_out() {
        let err = bounded(
            "a:1",
            Duration::from_millis(10),
            std::future::pending::<std::result::Result<Response<()>, Status>>(),
        )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_status_mapping() {
        let err = map_status("a:1", Status::deadline_exceeded("slow"));
        assert!(matches!(err, Error::Timeout(_)));
        let err = map_status("a:1", Status::unavailable("down"));
        assert!(matches!(err, Error::ConnectionFailed(_)));
        let err = map_status("a:1", Status::cancelled("no shards"));
        assert!(matches!(err, Error::Grpc(_)));
    }
}
