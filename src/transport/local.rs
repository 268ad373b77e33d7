//! In-process transport
//!
//! Routes calls to services registered under an address. Detaching an
//! address makes it unreachable, which is how tests simulate a crash.

use crate::common::{Error, LogEntry, Operation, Reply, Result, SyncCode};
use crate::transport::{hello_message, KvService, PeerTransport};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Default)]
pub struct LocalTransport {
    nodes: RwLock<HashMap<String, Arc<dyn KvService>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, addr: &str, service: Arc<dyn KvService>) {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(addr.to_string(), service);
    }

    pub fn detach(&self, addr: &str) -> Option<Arc<dyn KvService>> {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(addr)
    }

    fn node(&self, addr: &str) -> Result<Arc<dyn KvService>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(addr)
            .cloned()
            .ok_or_else(|| Error::ConnectionFailed(format!("{}: no such node", addr)))
    }
}

#[tonic::async_trait]
impl PeerTransport for LocalTransport {
    async fn hello(&self, addr: &str, name: &str) -> Result<String> {
        let node = self.node(addr)?;
        Ok(hello_message(name, node.role()))
    }

    async fn request(&self, addr: &str, op: Operation) -> Result<Reply> {
        self.node(addr)?.request(op).await
    }

    async fn sync(&self, addr: &str, entry: LogEntry) -> Result<SyncCode> {
        Ok(self.node(addr)?.sync(entry).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[tonic::async_trait]
    impl KvService for Echo {
        fn role(&self) -> &'static str {
            "echo"
        }

        async fn request(&self, op: Operation) -> Result<Reply> {
            Ok(Reply::Ok(op.key))
        }

        async fn sync(&self, _entry: LogEntry) -> SyncCode {
            SyncCode::SyncSuccess
        }
    }

    #[tokio::test]
    async fn test_attach_and_detach() {
        let transport = LocalTransport::new();
        transport.attach("n1", Arc::new(Echo));

        assert_eq!(transport.hello("n1", "Hello ").await.unwrap(), "Hello echo");
        assert_eq!(
            transport.request("n1", Operation::read("k")).await.unwrap(),
            Reply::Ok("k".into())
        );

        transport.detach("n1");
        let err = transport
            .sync("n1", LogEntry::placeholder(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed(_)));
    }
}
