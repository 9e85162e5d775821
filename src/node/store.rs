//! Node-local storage and read/write classification
//!
//! `NodeStore` is the data half of a storage node: the live shard container,
//! the staged container built up during a rebalance, the two write queues,
//! and the state machine that decides how every get/set is classified.
//!
//! The staged container only ever ends one of two ways: promoted wholesale
//! by `swap_with_staged` when the master orders Apply, or discarded by
//! `clear_staged` on Rollback.

use crate::common::hash;
use crate::common::types::{
    Fragment, GetResponse, GetStatus, NodeState, NodeStatus, PrepareMoveRequest,
    PrepareRearrangeRequest, SendShardTask, SetResponse, ShardPayload,
};
use crate::node::shard::ShardContainer;
use crate::node::state::AtomicState;
use crate::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// A write accepted while a rebalance was in flight, replayed later in
/// timestamp order.
#[derive(Debug, Clone)]
pub struct QueuedWrite {
    pub key: String,
    pub value: String,
    pub timestamp: u64,
}

/// The instructions received at Prepare time, kept until Apply or Rollback.
#[derive(Debug, Clone)]
pub enum RebalancePlan {
    Move {
        receive_shard_ids: Vec<u32>,
        send_tasks: Vec<SendShardTask>,
        full_shard_count: u32,
    },
    Rearrange {
        fragments: Vec<Fragment>,
        server_by_shard: HashMap<u32, u32>,
        full_shard_count: u32,
    },
}

pub struct NodeStore {
    node_id: u32,
    state: AtomicState,
    shard_count: AtomicU32,
    live: Mutex<ShardContainer>,
    staged: Mutex<ShardContainer>,
    /// Writes queued while shards were moving between servers; replayed into
    /// live storage after the Apply swap.
    apply_queue: Mutex<Vec<QueuedWrite>>,
    /// Writes accepted into staged storage during a rearrange; replayed into
    /// live storage if the rearrange rolls back.
    rollback_queue: Mutex<Vec<QueuedWrite>>,
    plan: Mutex<Option<RebalancePlan>>,
}

impl NodeStore {
    pub fn new(node_id: u32) -> Self {
        Self {
            node_id,
            state: AtomicState::new(NodeState::Running),
            shard_count: AtomicU32::new(0),
            live: Mutex::new(ShardContainer::new()),
            staged: Mutex::new(ShardContainer::new()),
            apply_queue: Mutex::new(Vec::new()),
            rollback_queue: Mutex::new(Vec::new()),
            plan: Mutex::new(None),
        }
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn state(&self) -> NodeState {
        self.state.get()
    }

    pub fn state_machine(&self) -> &AtomicState {
        &self.state
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count.load(Ordering::SeqCst)
    }

    pub fn plan(&self) -> Option<RebalancePlan> {
        self.plan.lock().unwrap().clone()
    }

    pub fn set_plan(&self, plan: RebalancePlan) {
        *self.plan.lock().unwrap() = Some(plan);
    }

    pub fn take_plan(&self) -> Option<RebalancePlan> {
        self.plan.lock().unwrap().take()
    }

    pub fn live_shard_ids(&self) -> Vec<u32> {
        self.live.lock().unwrap().shard_ids()
    }

    /// Seed the live container, used when a node joins an empty cluster or a
    /// test builds a populated node directly.
    pub fn install_shards(&self, shard_ids: impl IntoIterator<Item = u32>, shard_count: u32) {
        let mut live = self.live.lock().unwrap();
        for id in shard_ids {
            live.ensure_shard(id);
        }
        self.shard_count.store(shard_count, Ordering::SeqCst);
    }

    // === client surface ===

    /// Classify and execute a write against the current state.
    pub fn set(&self, key: &str, value: &str, timestamp: u64) -> SetResponse {
        use NodeState::*;
        match self.state.get() {
            Running | MovePreparing | MovePrepared | RearrangePreparing | RearrangePrepared => {
                self.set_live(key, value)
            }
            RearrangeProcessing | RearrangeProcessed => self.set_rearranging(key, value, timestamp),
            MoveProcessing | MoveProcessed => {
                self.apply_queue.lock().unwrap().push(QueuedWrite {
                    key: key.to_string(),
                    value: value.to_string(),
                    timestamp,
                });
                SetResponse::queued("Write queued until the shard move completes")
            }
            Dead => SetResponse::error("Node is dead"),
            state => SetResponse::error(format!("Node is busy in state {state}")),
        }
    }

    fn set_live(&self, key: &str, value: &str) -> SetResponse {
        let count = self.shard_count();
        let Some(shard_id) = hash::shard_for_key(key, count) else {
            return SetResponse::error("Node holds no shards");
        };
        let mut live = self.live.lock().unwrap();
        match live.shard_mut(shard_id) {
            Some(shard) => {
                shard.set(key.to_string(), value.to_string());
                SetResponse::success("OK")
            }
            None => SetResponse::error(format!("Shard {shard_id} is not held by this node")),
        }
    }

    /// During a rearrange the new topology is authoritative for writes: a key
    /// this node will own lands in staged storage (and in the rollback queue
    /// in case staged is discarded); a foreign key is redirected.
    fn set_rearranging(&self, key: &str, value: &str, timestamp: u64) -> SetResponse {
        let plan = self.plan.lock().unwrap().clone();
        let Some(RebalancePlan::Rearrange {
            server_by_shard,
            full_shard_count,
            ..
        }) = plan
        else {
            return SetResponse::error("No rearrange in progress");
        };
        let Some(new_shard) = hash::shard_for_key(key, full_shard_count) else {
            return SetResponse::error("Target topology holds no shards");
        };
        match server_by_shard.get(&new_shard) {
            Some(&owner) if owner == self.node_id => {
                self.staged
                    .lock()
                    .unwrap()
                    .ensure_shard(new_shard)
                    .set(key.to_string(), value.to_string());
                self.rollback_queue.lock().unwrap().push(QueuedWrite {
                    key: key.to_string(),
                    value: value.to_string(),
                    timestamp,
                });
                SetResponse::success("OK")
            }
            Some(&owner) => SetResponse::transfer(owner),
            None => SetResponse::error(format!("No owner for shard {new_shard}")),
        }
    }

    /// Classify and execute a read against the current state.
    pub fn get(&self, key: &str) -> GetResponse {
        use NodeState::*;
        match self.state.get() {
            Running | MovePreparing | MovePrepared | RearrangePreparing | RearrangePrepared => {
                self.get_live(key)
            }
            RearrangeProcessing | RearrangeProcessed => self.get_rearranging(key),
            MoveProcessing | MoveProcessed => self.get_moving(key),
            Dead => GetResponse {
                status: GetStatus::Error,
                value: None,
            },
            _ => GetResponse {
                status: GetStatus::Error,
                value: None,
            },
        }
    }

    fn get_live(&self, key: &str) -> GetResponse {
        let count = self.shard_count();
        let Some(shard_id) = hash::shard_for_key(key, count) else {
            return GetResponse {
                status: GetStatus::WrongNode,
                value: None,
            };
        };
        let live = self.live.lock().unwrap();
        match live.shard(shard_id) {
            Some(shard) => GetResponse {
                status: GetStatus::Success,
                value: shard.get(key).cloned(),
            },
            None => GetResponse {
                status: GetStatus::WrongNode,
                value: None,
            },
        }
    }

    /// During a rearrange, keys this node will own are served from staged
    /// storage first (fresh writes land there) with live as fallback for
    /// data whose fragment has not arrived yet.
    fn get_rearranging(&self, key: &str) -> GetResponse {
        let plan = self.plan.lock().unwrap().clone();
        let Some(RebalancePlan::Rearrange {
            server_by_shard,
            full_shard_count,
            ..
        }) = plan
        else {
            return GetResponse {
                status: GetStatus::Error,
                value: None,
            };
        };
        let Some(new_shard) = hash::shard_for_key(key, full_shard_count) else {
            return GetResponse {
                status: GetStatus::WrongNode,
                value: None,
            };
        };
        if server_by_shard.get(&new_shard) != Some(&self.node_id) {
            return GetResponse {
                status: GetStatus::WrongNode,
                value: None,
            };
        }
        if let Some(value) = self
            .staged
            .lock()
            .unwrap()
            .shard(new_shard)
            .and_then(|s| s.get(key).cloned())
        {
            return GetResponse {
                status: GetStatus::Success,
                value: Some(value),
            };
        }
        let count = self.shard_count();
        let live_value = hash::shard_for_key(key, count).and_then(|old_shard| {
            self.live
                .lock()
                .unwrap()
                .shard(old_shard)
                .and_then(|s| s.get(key).cloned())
        });
        GetResponse {
            status: GetStatus::Success,
            value: live_value,
        }
    }

    /// During a shard move only shards neither sent nor received are still
    /// served locally; everything in flight is the next owner's problem.
    fn get_moving(&self, key: &str) -> GetResponse {
        let plan = self.plan.lock().unwrap().clone();
        let Some(RebalancePlan::Move { send_tasks, .. }) = plan else {
            return GetResponse {
                status: GetStatus::Error,
                value: None,
            };
        };
        let count = self.shard_count();
        let Some(shard_id) = hash::shard_for_key(key, count) else {
            return GetResponse {
                status: GetStatus::WrongNode,
                value: None,
            };
        };
        if send_tasks.iter().any(|t| t.shard_id == shard_id) {
            return GetResponse {
                status: GetStatus::WrongNode,
                value: None,
            };
        }
        let live = self.live.lock().unwrap();
        match live.shard(shard_id) {
            Some(shard) => GetResponse {
                status: GetStatus::Success,
                value: shard.get(key).cloned(),
            },
            None => GetResponse {
                status: GetStatus::WrongNode,
                value: None,
            },
        }
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            state: self.state.get(),
            shard_stats: self.live.lock().unwrap().stats(),
            staged_shard_stats: self.staged.lock().unwrap().stats(),
            apply_queue_size: self.apply_queue.lock().unwrap().len(),
            rollback_queue_size: self.rollback_queue.lock().unwrap().len(),
        }
    }

    // === peer surface ===

    /// Merge an incoming shard or fragment into staged storage.
    pub fn receive_into_staged(&self, payload: ShardPayload) {
        let mut staged = self.staged.lock().unwrap();
        let shard = staged.ensure_shard(payload.shard_id);
        for (key, value) in payload.entries {
            shard.set(key, value);
        }
    }

    // === rebalance internals, driven by NodeManager ===

    /// Copy out the data of a shard about to be sent away. The live copy
    /// stays untouched so a rollback needs no undo.
    pub fn snapshot_shard(&self, shard_id: u32) -> Result<HashMap<String, String>> {
        let live = self.live.lock().unwrap();
        live.shard(shard_id)
            .map(|s| s.entries().clone())
            .ok_or(crate::Error::ShardNotFound(shard_id))
    }

    /// Copy out the entries of a live shard falling inside a fragment range.
    pub fn snapshot_fragment(&self, fragment: &Fragment) -> HashMap<String, String> {
        let live = self.live.lock().unwrap();
        match live.shard(fragment.old_shard) {
            Some(shard) => shard
                .entries()
                .iter()
                .filter(|(k, _)| fragment.contains(hash::hash_key(k)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => HashMap::new(),
        }
    }

    pub fn stage_empty_shards(&self, shard_ids: &[u32]) {
        let mut staged = self.staged.lock().unwrap();
        for &id in shard_ids {
            staged.ensure_shard(id);
        }
    }

    /// Apply for MOVE_SHARDS: received shards become live, sent shards are
    /// dropped, queued writes are replayed in timestamp order.
    pub fn apply_move(&self, send_tasks: &[SendShardTask], full_shard_count: u32) {
        let mut live = self.live.lock().unwrap();
        let mut staged = self.staged.lock().unwrap();
        for &shard_id in &staged.shard_ids() {
            if let Some(data) = staged.remove_shard(shard_id) {
                live.insert_shard(shard_id, data);
            }
        }
        for task in send_tasks {
            live.remove_shard(task.shard_id);
        }
        staged.clear();
        self.shard_count.store(full_shard_count, Ordering::SeqCst);

        let mut queued = std::mem::take(&mut *self.apply_queue.lock().unwrap());
        queued.sort_by_key(|w| w.timestamp);
        for write in queued {
            match hash::shard_for_key(&write.key, full_shard_count) {
                Some(shard_id) if live.holds(shard_id) => {
                    live.shard_mut(shard_id)
                        .map(|s| s.set(write.key, write.value));
                }
                _ => {
                    // The shard left with another server together with its
                    // queued writes' destiny; the client will retry there.
                    debug!(key = %write.key, "dropping queued write for a departed shard");
                }
            }
        }
        self.rollback_queue.lock().unwrap().clear();
    }

    /// Apply for REARRANGE_SHARDS: staged storage wholesale replaces live.
    pub fn swap_with_staged(&self, full_shard_count: u32) {
        let mut live = self.live.lock().unwrap();
        let mut staged = self.staged.lock().unwrap();
        *live = std::mem::take(&mut *staged);
        self.shard_count.store(full_shard_count, Ordering::SeqCst);
        self.apply_queue.lock().unwrap().clear();
        self.rollback_queue.lock().unwrap().clear();
    }

    /// Rollback: discard staged storage and replay every write accepted
    /// during the aborted rebalance back into the old topology.
    pub fn clear_staged(&self) {
        self.staged.lock().unwrap().clear();

        let count = self.shard_count();
        let mut replays = std::mem::take(&mut *self.rollback_queue.lock().unwrap());
        replays.extend(std::mem::take(&mut *self.apply_queue.lock().unwrap()));
        replays.sort_by_key(|w| w.timestamp);

        let mut live = self.live.lock().unwrap();
        for write in replays {
            match hash::shard_for_key(&write.key, count) {
                Some(shard_id) if live.holds(shard_id) => {
                    live.shard_mut(shard_id)
                        .map(|s| s.set(write.key, write.value));
                }
                _ => {
                    warn!(key = %write.key, "dropping queued write not owned under the restored topology");
                }
            }
        }
    }

    /// Validate a move plan against what this node actually holds.
    pub fn check_move_plan(&self, req: &PrepareMoveRequest) -> Result<()> {
        let live = self.live.lock().unwrap();
        for task in &req.send_tasks {
            if !live.holds(task.shard_id) {
                return Err(crate::Error::ShardNotFound(task.shard_id));
            }
        }
        for &shard_id in &req.receive_shard_ids {
            if live.holds(shard_id) {
                return Err(crate::Error::Internal(format!(
                    "Shard {shard_id} to be received is already held"
                )));
            }
        }
        Ok(())
    }

    /// Validate a rearrange plan: every fragment sourced here must name a
    /// shard this node holds, and the announced boundaries must match what
    /// this node would compute for the same shard count.
    pub fn check_rearrange_plan(&self, req: &PrepareRearrangeRequest) -> Result<()> {
        let live = self.live.lock().unwrap();
        for fragment in &req.fragments {
            if !live.holds(fragment.old_shard) {
                return Err(crate::Error::ShardNotFound(fragment.old_shard));
            }
        }
        let expected = hash::partition(req.full_shard_count);
        for (&shard_id, &boundary) in &req.shard_to_hash {
            if expected.get(shard_id as usize) != Some(&boundary) {
                return Err(crate::Error::Internal(format!(
                    "Boundary mismatch for shard {shard_id}: announced {boundary}"
                )));
            }
        }
        Ok(())
    }
}
