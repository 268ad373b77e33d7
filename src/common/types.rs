//! Operations, log entries and result codes
//!
//! The integer codes are the wire values carried in `RequestContent.op`,
//! `RequestResult.err` and `SyncResult.err`.

use crate::common::{Error, Result};
use crate::proto;
use serde::{Deserialize, Serialize};

/// Operation kinds, with their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Put = 200,
    Read = 201,
    Delete = 202,
    LogVersionQuery = 203,
    BecomePrimary = 204,
    CloneTo = 205,
}

impl OpKind {
    /// Only these mutate the dictionary and are logged.
    pub fn is_mutation(&self) -> bool {
        matches!(self, OpKind::Put | OpKind::Delete)
    }

    /// Operations the master redirects to a shard primary.
    pub fn is_keyed(&self) -> bool {
        matches!(self, OpKind::Put | OpKind::Read | OpKind::Delete)
    }
}

impl TryFrom<i32> for OpKind {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            200 => Ok(OpKind::Put),
            201 => Ok(OpKind::Read),
            202 => Ok(OpKind::Delete),
            203 => Ok(OpKind::LogVersionQuery),
            204 => Ok(OpKind::BecomePrimary),
            205 => Ok(OpKind::CloneTo),
            other => Err(Error::ProtocolViolation(format!("unknown op code {}", other))),
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Put => write!(f, "put"),
            OpKind::Read => write!(f, "read"),
            OpKind::Delete => write!(f, "delete"),
            OpKind::LogVersionQuery => write!(f, "log-version"),
            OpKind::BecomePrimary => write!(f, "become-primary"),
            OpKind::CloneTo => write!(f, "clone-to"),
        }
    }
}

/// Result codes of `Request`.
pub const ERR_OK: i32 = 0;
pub const ERR_NOT_FOUND: i32 = 1;
pub const ERR_REDIRECT: i32 = 2;
pub const ERR_FAILED: i32 = 3;

/// Result of a passive `Sync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncCode {
    SyncSuccess = 300,
    SyncFail = 301,
}

impl SyncCode {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncCode::SyncSuccess)
    }
}

impl TryFrom<i32> for SyncCode {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            300 => Ok(SyncCode::SyncSuccess),
            301 => Ok(SyncCode::SyncFail),
            other => Err(Error::ProtocolViolation(format!("unknown sync code {}", other))),
        }
    }
}

/// A client or internal operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OpKind,
    pub key: String,
    pub value: String,
}

impl Operation {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: OpKind::Put,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn read(key: impl Into<String>) -> Self {
        Self::keyed(OpKind::Read, key)
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::keyed(OpKind::Delete, key)
    }

    pub fn log_version() -> Self {
        Self::keyed(OpKind::LogVersionQuery, "")
    }

    pub fn become_primary() -> Self {
        Self::keyed(OpKind::BecomePrimary, "")
    }

    /// Clone the receiver's full log onto `target`.
    pub fn clone_to(target: impl Into<String>) -> Self {
        Self {
            kind: OpKind::CloneTo,
            key: String::new(),
            value: target.into(),
        }
    }

    fn keyed(kind: OpKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            value: String::new(),
        }
    }
}

/// One slot of the replication log. `request` is `None` for placeholder
/// entries, which are never applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub request: Option<Operation>,
}

impl LogEntry {
    pub fn new(index: u64, request: Operation) -> Self {
        Self {
            index,
            request: Some(request),
        }
    }

    pub fn placeholder(index: u64) -> Self {
        Self {
            index,
            request: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.request.is_none()
    }
}

/// Answer to a `Request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Ok(String),
    NotFound,
    /// Repeat the request against this address.
    Redirect(String),
    Failed(String),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Ok(String::new())
    }
}

// === Wire conversions ===

impl From<Operation> for proto::RequestContent {
    fn from(op: Operation) -> Self {
        proto::RequestContent {
            op: op.kind as i32,
            key: op.key,
            value: op.value,
        }
    }
}

impl TryFrom<proto::RequestContent> for Operation {
    type Error = Error;

    fn try_from(content: proto::RequestContent) -> Result<Self> {
        Ok(Operation {
            kind: OpKind::try_from(content.op)?,
            key: content.key,
            value: content.value,
        })
    }
}

impl From<LogEntry> for proto::SyncEntry {
    fn from(entry: LogEntry) -> Self {
        proto::SyncEntry {
            index: entry.index,
            request: entry.request.map(Into::into),
        }
    }
}

impl TryFrom<proto::SyncEntry> for LogEntry {
    type Error = Error;

    fn try_from(entry: proto::SyncEntry) -> Result<Self> {
        Ok(LogEntry {
            index: entry.index,
            request: entry.request.map(Operation::try_from).transpose()?,
        })
    }
}

impl From<Reply> for proto::RequestResult {
    fn from(reply: Reply) -> Self {
        let (err, value) = match reply {
            Reply::Ok(value) => (ERR_OK, value),
            Reply::NotFound => (ERR_NOT_FOUND, String::new()),
            Reply::Redirect(addr) => (ERR_REDIRECT, addr),
            Reply::Failed(reason) => (ERR_FAILED, reason),
        };
        proto::RequestResult { err, value }
    }
}

impl TryFrom<proto::RequestResult> for Reply {
    type Error = Error;

    fn try_from(result: proto::RequestResult) -> Result<Self> {
        match result.err {
            ERR_OK => Ok(Reply::Ok(result.value)),
            ERR_NOT_FOUND => Ok(Reply::NotFound),
            ERR_REDIRECT => Ok(Reply::Redirect(result.value)),
            ERR_FAILED => Ok(Reply::Failed(result.value)),
            other => Err(Error::ProtocolViolation(format!(
                "unknown result code {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes() {
        assert_eq!(OpKind::Put as i32, 200);
        assert_eq!(OpKind::BecomePrimary as i32, 204);
        assert_eq!(SyncCode::SyncFail as i32, 301);
        assert_eq!(OpKind::try_from(202).unwrap(), OpKind::Delete);
        assert!(OpKind::try_from(199).is_err());
    }

    #[test]
    fn test_placeholder_survives_wire() {
        let wire: proto::SyncEntry = LogEntry::placeholder(7).into();
        assert!(wire.request.is_none());
        let entry = LogEntry::try_from(wire).unwrap();
        assert!(entry.is_placeholder());
        assert_eq!(entry.index, 7);
    }

    #[test]
    fn test_unknown_op_in_sync_entry_is_rejected() {
        let wire = proto::SyncEntry {
            index: 3,
            request: Some(proto::RequestContent {
                op: 42,
                key: "k".into(),
                value: String::new(),
            }),
        };
        assert!(matches!(
            LogEntry::try_from(wire),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_only_put_and_delete_mutate() {
        assert!(OpKind::Put.is_mutation());
        assert!(OpKind::Delete.is_mutation());
        assert!(!OpKind::Read.is_mutation());
        assert!(!OpKind::CloneTo.is_mutation());
    }
}
