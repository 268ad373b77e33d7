//! Error types for shardkv

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Coordination Errors ===
    #[error("Coordination node not found: {0}")]
    NoNode(String),

    #[error("Coordination node already exists: {0}")]
    NodeExists(String),

    #[error("Coordination session expired: {0}")]
    SessionExpired(String),

    #[error("Coordination error: {0}")]
    Coordination(String),

    // === Replication Errors ===
    #[error("Sync rejected: entry {index} is not after last index {last}")]
    SyncRejected { index: u64, last: u64 },

    #[error("Quorum not reached: {acks} of {backups} backups acknowledged")]
    QuorumNotReached { acks: usize, backups: usize },

    // === Routing Errors ===
    #[error("No shards available")]
    NoShardsAvailable,

    #[error("Shard has no known primary: {0}")]
    ShardUnavailable(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    // === Client Errors ===
    #[error("Redirected twice: {0}")]
    RedirectLoop(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Verify failed: {0}")]
    VerifyFailed(String),

    // === Network Errors ===
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Config Errors ===
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::Transport(_) => true,
            Error::Grpc(status) => matches!(
                status.code(),
                tonic::Code::Unavailable | tonic::Code::DeadlineExceeded
            ),
            _ => false,
        }
    }

    /// Convert to gRPC status for RPC responses
    pub fn to_grpc_status(&self) -> tonic::Status {
        use tonic::Code;
        match self {
            Error::ProtocolViolation(_) | Error::NoShardsAvailable | Error::ShardUnavailable(_) => {
                tonic::Status::new(Code::Cancelled, self.to_string())
            }
            Error::NoNode(path) => tonic::Status::new(Code::NotFound, path.clone()),
            Error::NodeExists(path) => tonic::Status::new(Code::AlreadyExists, path.clone()),
            Error::SessionExpired(id) => tonic::Status::new(Code::FailedPrecondition, id.clone()),
            Error::InvalidConfig(_) => tonic::Status::new(Code::InvalidArgument, self.to_string()),
            Error::Timeout(_) => tonic::Status::new(Code::DeadlineExceeded, self.to_string()),
            Error::ConnectionFailed(_) | Error::Transport(_) => {
                tonic::Status::new(Code::Unavailable, self.to_string())
            }
            Error::Grpc(status) => status.clone(),
            _ => tonic::Status::new(Code::Internal, self.to_string()),
        }
    }

    /// Rebuild a coordination error from a status returned by a remote
    /// coordination service.
    pub fn from_status(status: tonic::Status) -> Self {
        use tonic::Code;
        match status.code() {
            Code::NotFound => Error::NoNode(status.message().to_string()),
            Code::AlreadyExists => Error::NodeExists(status.message().to_string()),
            Code::FailedPrecondition => Error::SessionExpired(status.message().to_string()),
            _ => Error::Grpc(status),
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_cancel() {
        let status = Error::ProtocolViolation("op 999".into()).to_grpc_status();
        assert_eq!(status.code(), tonic::Code::Cancelled);
        let status = Error::NoShardsAvailable.to_grpc_status();
        assert_eq!(status.code(), tonic::Code::Cancelled);
    }

    #[test]
    fn test_coordination_status_round_trip() {
        let status = Error::NodeExists("/shardkv/data1".into()).to_grpc_status();
        match Error::from_status(status) {
            Error::NodeExists(path) => assert_eq!(path, "/shardkv/data1"),
            other => panic!("unexpected error: {other}"),
        }

        let status = Error::SessionExpired("abc".into()).to_grpc_status();
        assert!(matches!(Error::from_status(status), Error::SessionExpired(_)));
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Timeout("sync".into()).is_retryable());
        assert!(Error::Grpc(tonic::Status::unavailable("down")).is_retryable());
        assert!(!Error::SyncRejected { index: 1, last: 2 }.is_retryable());
        assert!(!Error::NoShardsAvailable.is_retryable());
    }
}
