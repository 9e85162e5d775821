//! Shared wire types: cluster actions, node states, and request/response
//! bodies for the master, node, and discovery HTTP surfaces.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Cluster-change action driven by the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Whole shards relocate between servers (server added/removed).
    MoveShards,
    /// Hash fragments relocate because the shard count changed.
    RearrangeShards,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::MoveShards => write!(f, "move-shards"),
            Action::RearrangeShards => write!(f, "rearrange-shards"),
        }
    }
}

/// Phase within an action's protocol run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Prepare,
    Process,
    Apply,
    Rollback,
}

/// Node lifecycle state. Exactly one holds per node at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Init,
    Running,
    MovePreparing,
    MovePrepared,
    MoveProcessing,
    MoveProcessed,
    MoveApplying,
    MoveRollingBack,
    RearrangePreparing,
    RearrangePrepared,
    RearrangeProcessing,
    RearrangeProcessed,
    RearrangeApplying,
    RearrangeRollingBack,
    Dead,
}

impl NodeState {
    /// The in-flight action, if this is a phase state.
    pub fn action(&self) -> Option<Action> {
        use NodeState::*;
        match self {
            MovePreparing | MovePrepared | MoveProcessing | MoveProcessed | MoveApplying
            | MoveRollingBack => Some(Action::MoveShards),
            RearrangePreparing | RearrangePrepared | RearrangeProcessing | RearrangeProcessed
            | RearrangeApplying | RearrangeRollingBack => Some(Action::RearrangeShards),
            _ => None,
        }
    }

    /// The current phase, if this is a phase state.
    pub fn phase(&self) -> Option<Phase> {
        use NodeState::*;
        match self {
            MovePreparing | MovePrepared | RearrangePreparing | RearrangePrepared => {
                Some(Phase::Prepare)
            }
            MoveProcessing | MoveProcessed | RearrangeProcessing | RearrangeProcessed => {
                Some(Phase::Process)
            }
            MoveApplying | RearrangeApplying => Some(Phase::Apply),
            MoveRollingBack | RearrangeRollingBack => Some(Phase::Rollback),
            _ => None,
        }
    }

    pub fn preparing(action: Action) -> NodeState {
        match action {
            Action::MoveShards => NodeState::MovePreparing,
            Action::RearrangeShards => NodeState::RearrangePreparing,
        }
    }

    pub fn prepared(action: Action) -> NodeState {
        match action {
            Action::MoveShards => NodeState::MovePrepared,
            Action::RearrangeShards => NodeState::RearrangePrepared,
        }
    }

    pub fn processing(action: Action) -> NodeState {
        match action {
            Action::MoveShards => NodeState::MoveProcessing,
            Action::RearrangeShards => NodeState::RearrangeProcessing,
        }
    }

    pub fn processed(action: Action) -> NodeState {
        match action {
            Action::MoveShards => NodeState::MoveProcessed,
            Action::RearrangeShards => NodeState::RearrangeProcessed,
        }
    }

    pub fn applying(action: Action) -> NodeState {
        match action {
            Action::MoveShards => NodeState::MoveApplying,
            Action::RearrangeShards => NodeState::RearrangeApplying,
        }
    }

    pub fn rolling_back(action: Action) -> NodeState {
        match action {
            Action::MoveShards => NodeState::MoveRollingBack,
            Action::RearrangeShards => NodeState::RearrangeRollingBack,
        }
    }
}

impl std::fmt::Display for NodeState {
    // Display through the serde snake_case names so logs match wire bodies.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// A contiguous hash sub-range moving from one shard's current host to
/// another shard's future host during a shard-count change.
///
/// `range_from` is exclusive, `range_to` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub old_shard: u32,
    pub new_shard: u32,
    pub range_from: i64,
    pub range_to: i64,
}

impl Fragment {
    /// Does this fragment's range contain `hash`?
    pub fn contains(&self, hash: i64) -> bool {
        // The first fragment's lower bound is i64::MIN itself, which the
        // exclusive comparison would otherwise drop.
        (hash > self.range_from || (self.range_from == i64::MIN && hash == i64::MIN))
            && hash <= self.range_to
    }
}

/// Generic success/message pair returned by every mutating call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
}

impl StatusResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

// === Master -> node management bodies ===

/// One whole-shard transfer a node must perform during `MoveShards`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SendShardTask {
    pub shard_id: u32,
    pub target_server: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareMoveRequest {
    /// Shards this node will receive into staged storage.
    pub receive_shard_ids: Vec<u32>,
    /// Shards this node must push out during Process.
    pub send_tasks: Vec<SendShardTask>,
    /// Total shard count after the change (unchanged for moves).
    pub full_shard_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRearrangeRequest {
    /// Fragments whose old shard lives on this node.
    pub fragments: Vec<Fragment>,
    /// Future owner of each new shard referenced by the fragments.
    pub server_by_shard: HashMap<u32, u32>,
    /// This node's slice of the new shard -> boundary scheme.
    pub shard_to_hash: BTreeMap<u32, i64>,
    /// Total shard count after the change.
    pub full_shard_count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: Action,
}

// === Node client surface bodies ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetStatus {
    Success,
    Error,
    /// Accepted into a pending queue; the destination is not finalized yet.
    Queued,
    /// The key now belongs to another server; redirect there.
    Transfer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetResponse {
    pub status: SetStatus,
    /// Destination server for `Transfer`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_server: Option<u32>,
    pub message: String,
}

impl SetResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: SetStatus::Success,
            target_server: None,
            message: message.into(),
        }
    }

    pub fn queued(message: impl Into<String>) -> Self {
        Self {
            status: SetStatus::Queued,
            target_server: None,
            message: message.into(),
        }
    }

    pub fn transfer(target_server: u32) -> Self {
        Self {
            status: SetStatus::Transfer,
            target_server: Some(target_server),
            message: "Entry should be applied on another server".into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SetStatus::Error,
            target_server: None,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GetStatus {
    Success,
    Error,
    /// The key is not (yet) owned here; refresh topology and retry elsewhere.
    WrongNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResponse {
    pub status: GetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetKeyRequest {
    pub value: String,
    /// Client-side wall clock, used to order queued writes.
    pub timestamp: u64,
}

// === Node -> node bodies ===

/// A whole shard or a fragment of one, pushed into the receiver's staged
/// storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardPayload {
    pub shard_id: u32,
    pub entries: HashMap<String, String>,
}

// === Status / health ===

/// Per-shard statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStats {
    pub entries: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub state: NodeState,
    pub shard_stats: BTreeMap<u32, ShardStats>,
    pub staged_shard_stats: BTreeMap<u32, ShardStats>,
    pub apply_queue_size: usize,
    pub rollback_queue_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub healthy: bool,
    pub server_timestamp: u64,
    pub message: String,
}

// === Discovery ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Master,
    Node,
    Client,
}

/// A service registration: id + where to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub id: u32,
    pub kind: ServiceKind,
    pub host: String,
    pub port: u16,
}

impl ServiceDescriptor {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {} at {}:{}", self.kind, self.id, self.host, self.port)
    }
}
