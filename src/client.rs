//! Client for a shardkv cluster
//!
//! Requests go to the configured target (normally the master). A redirect
//! answer is followed once: the identical operation is repeated against the
//! redirect target, and the next request starts at the master again.

use crate::common::{Error, Operation, Reply, Result};
use crate::transport::PeerTransport;
use std::sync::Arc;

/// Successful answer to a keyed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok(String),
    NotFound,
}

impl Outcome {
    pub fn value(&self) -> Option<&str> {
        match self {
            Outcome::Ok(value) => Some(value),
            Outcome::NotFound => None,
        }
    }
}

pub struct KvClient {
    transport: Arc<dyn PeerTransport>,
    target: String,
}

impl KvClient {
    pub fn new(transport: Arc<dyn PeerTransport>, target: impl Into<String>) -> Self {
        Self {
            transport,
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Connection check against the target.
    pub async fn hello(&self, name: &str) -> Result<String> {
        self.transport.hello(&self.target, name).await
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<Outcome> {
        self.execute(Operation::put(key, value)).await
    }

    pub async fn read(&self, key: &str) -> Result<Outcome> {
        self.execute(Operation::read(key)).await
    }

    pub async fn delete(&self, key: &str) -> Result<Outcome> {
        self.execute(Operation::delete(key)).await
    }

    pub async fn execute(&self, op: Operation) -> Result<Outcome> {
        match self.transport.request(&self.target, op.clone()).await? {
            Reply::Redirect(addr) => {
                tracing::debug!("{} {:?} redirected to {}", op.kind, op.key, addr);
                match self.transport.request(&addr, op).await? {
                    Reply::Redirect(again) => Err(Error::RedirectLoop(format!(
                        "{} redirected again to {}",
                        addr, again
                    ))),
                    reply => finish(reply),
                }
            }
            reply => finish(reply),
        }
    }
}

fn finish(reply: Reply) -> Result<Outcome> {
    match reply {
        Reply::Ok(value) => Ok(Outcome::Ok(value)),
        Reply::NotFound => Ok(Outcome::NotFound),
        Reply::Failed(reason) => Err(Error::RequestFailed(reason)),
        Reply::Redirect(addr) => Err(Error::RedirectLoop(addr)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{LogEntry, SyncCode};
    use crate::transport::{KvService, LocalTransport};

    /// Always answers with the same reply.
    struct Fixed(Reply);

    #[tonic::async_trait]
    impl KvService for Fixed {
        fn role(&self) -> &'static str {
            "fixed"
        }

        async fn request(&self, _op: Operation) -> Result<Reply> {
            Ok(self.0.clone())
        }

        async fn sync(&self, _entry: LogEntry) -> SyncCode {
            SyncCode::SyncFail
        }
    }

    #[tokio::test]
    async fn test_follows_one_redirect() {
        let transport = Arc::new(LocalTransport::new());
        transport.attach("master", Arc::new(Fixed(Reply::Redirect("node".into()))));
        transport.attach("node", Arc::new(Fixed(Reply::Ok("v".into()))));

        let client = KvClient::new(transport, "master");
        assert_eq!(client.read("k").await.unwrap(), Outcome::Ok("v".into()));
        assert_eq!(client.target(), "master");
    }

    #[tokio::test]
    async fn test_second_redirect_is_an_error() {
        let transport = Arc::new(LocalTransport::new());
        transport.attach("master", Arc::new(Fixed(Reply::Redirect("node".into()))));
        transport.attach("node", Arc::new(Fixed(Reply::Redirect("other".into()))));

        let client = KvClient::new(transport, "master");
        assert!(matches!(
            client.put("k", "v").await,
            Err(Error::RedirectLoop(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_and_not_found() {
        let transport = Arc::new(LocalTransport::new());
        transport.attach("a", Arc::new(Fixed(Reply::Failed("quorum".into()))));
        transport.attach("b", Arc::new(Fixed(Reply::NotFound)));

        let client = KvClient::new(transport.clone(), "a");
        assert!(matches!(
            client.delete("k").await,
            Err(Error::RequestFailed(_))
        ));
        let client = KvClient::new(transport, "b");
        assert_eq!(client.read("k").await.unwrap(), Outcome::NotFound);
    }

    #[tokio::test]
    async fn test_hello() {
        let transport = Arc::new(LocalTransport::new());
        transport.attach("a", Arc::new(Fixed(Reply::ok())));
        let client = KvClient::new(transport, "a");
        assert_eq!(client.hello("Hello ").await.unwrap(), "Hello fixed");
    }
}
