//! Membership registry layout
//!
//! Every data node registers one ephemeral child of the membership root,
//! holding its `host:port`. The first replica of shard `N` takes the name
//! `data<N>`; later replicas fall back to a sequential `data<N>_backup<seq>`.

use crate::common::{shard_group_name, Error, Result};
use crate::coordination::{join_path, Coordination};
use serde::Serialize;

/// Separates the shard id from the replica suffix in a child name.
pub const BACKUP_MARKER: &str = "_backup";

/// One registered replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    /// Child name under the membership root
    pub name: String,
    /// Shard group id (`data<N>`)
    pub shard: String,
    /// Registered `host:port`
    pub addr: String,
}

/// Shard group id of a membership child name.
pub fn shard_group_of(name: &str) -> &str {
    match name.find(BACKUP_MARKER) {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// Read all members under `root`, sorted by child name. Children that
/// vanished between listing and reading, or that carry no address, are
/// skipped.
pub async fn list_members(coord: &dyn Coordination, root: &str) -> Result<Vec<Member>> {
    let mut names = coord.children(root).await?;
    names.sort();

    let mut members = Vec::with_capacity(names.len());
    for name in names {
        let addr = match coord.get_data(&join_path(root, &name)).await? {
            Some(addr) if !addr.is_empty() => addr,
            _ => continue,
        };
        members.push(Member {
            shard: shard_group_of(&name).to_string(),
            name,
            addr,
        });
    }
    Ok(members)
}

/// Register this node under `root` and return the created path.
pub async fn register_data_node(
    coord: &dyn Coordination,
    root: &str,
    shard_id: u32,
    addr: &str,
) -> Result<String> {
    coord.ensure_path(root).await?;

    let primary_path = join_path(root, &shard_group_name(shard_id));
    match coord.create_ephemeral(&primary_path, addr, false).await {
        Ok(path) => {
            tracing::info!("Registered {} as {}", addr, path);
            Ok(path)
        }
        Err(Error::NodeExists(_)) => {
            let backup_path = format!("{}{}", primary_path, BACKUP_MARKER);
            let path = coord.create_ephemeral(&backup_path, addr, true).await?;
            tracing::info!("Registered {} as backup {}", addr, path);
            Ok(path)
        }
        Err(e) => Err(e),
    }
}
