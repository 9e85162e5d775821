//! Rebalance phase execution on a storage node
//!
//! `NodeManager` executes the master's Prepare/Process/Apply/Rollback orders
//! against the local `NodeStore`. Peer traffic goes through the
//! `PeerTransport` trait so integration tests can run a whole cluster
//! in-process with an in-memory transport.

use crate::common::types::{
    Action, NodeState, PrepareMoveRequest, PrepareRearrangeRequest, ShardPayload,
};
use crate::node::store::{NodeStore, RebalancePlan};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Node-to-node data transfer during the Process phase.
pub trait PeerTransport: Send + Sync {
    /// Deliver a whole shard into the target's staged storage.
    fn send_shard(
        &self,
        target_server: u32,
        payload: ShardPayload,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Deliver a fragment of a shard into the target's staged storage.
    fn send_fragment(
        &self,
        target_server: u32,
        payload: ShardPayload,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub struct NodeManager<P: PeerTransport> {
    store: Arc<NodeStore>,
    peers: P,
}

impl<P: PeerTransport> NodeManager<P> {
    pub fn new(store: Arc<NodeStore>, peers: P) -> Self {
        Self { store, peers }
    }

    pub fn store(&self) -> &Arc<NodeStore> {
        &self.store
    }

    /// Prepare for MOVE_SHARDS: validate the plan against local holdings,
    /// stage empty receive shards, and stash the plan for later phases.
    #[instrument(skip(self, req), fields(node_id = self.store.node_id()))]
    pub fn prepare_move(&self, req: PrepareMoveRequest) -> Result<()> {
        self.store
            .state_machine()
            .transition(NodeState::Running, NodeState::MovePreparing)?;

        self.store.check_move_plan(&req)?;
        self.store.stage_empty_shards(&req.receive_shard_ids);
        info!(
            receive = ?req.receive_shard_ids,
            send = req.send_tasks.len(),
            "prepared for shard move"
        );
        self.store.set_plan(RebalancePlan::Move {
            receive_shard_ids: req.receive_shard_ids,
            send_tasks: req.send_tasks,
            full_shard_count: req.full_shard_count,
        });

        self.store
            .state_machine()
            .transition(NodeState::MovePreparing, NodeState::MovePrepared)
    }

    /// Prepare for REARRANGE_SHARDS: validate fragment sources and stage the
    /// shards this node will own under the new topology.
    #[instrument(skip(self, req), fields(node_id = self.store.node_id()))]
    pub fn prepare_rearrange(&self, req: PrepareRearrangeRequest) -> Result<()> {
        self.store
            .state_machine()
            .transition(NodeState::Running, NodeState::RearrangePreparing)?;

        self.store.check_rearrange_plan(&req)?;
        let own_shards: Vec<u32> = req
            .server_by_shard
            .iter()
            .filter(|(_, &server)| server == self.store.node_id())
            .map(|(&shard, _)| shard)
            .collect();
        self.store.stage_empty_shards(&own_shards);
        info!(
            fragments = req.fragments.len(),
            staged = own_shards.len(),
            new_count = req.full_shard_count,
            "prepared for shard rearrange"
        );
        self.store.set_plan(RebalancePlan::Rearrange {
            fragments: req.fragments,
            server_by_shard: req.server_by_shard,
            full_shard_count: req.full_shard_count,
        });

        self.store
            .state_machine()
            .transition(NodeState::RearrangePreparing, NodeState::RearrangePrepared)
    }

    /// Process phase: push the outgoing data to its new owners. The local
    /// live copy stays untouched so Rollback needs no undo.
    #[instrument(skip(self), fields(node_id = self.store.node_id()))]
    pub async fn process(&self, action: Action) -> Result<()> {
        self.store
            .state_machine()
            .transition(NodeState::prepared(action), NodeState::processing(action))?;

        match self.plan_for(action)? {
            RebalancePlan::Move { send_tasks, .. } => {
                for task in &send_tasks {
                    let entries = self.store.snapshot_shard(task.shard_id)?;
                    info!(
                        shard_id = task.shard_id,
                        target = task.target_server,
                        entries = entries.len(),
                        "sending shard"
                    );
                    self.peers
                        .send_shard(
                            task.target_server,
                            ShardPayload {
                                shard_id: task.shard_id,
                                entries,
                            },
                        )
                        .await?;
                }
            }
            RebalancePlan::Rearrange {
                fragments,
                server_by_shard,
                ..
            } => {
                for fragment in &fragments {
                    let entries = self.store.snapshot_fragment(fragment);
                    let target = *server_by_shard
                        .get(&fragment.new_shard)
                        .ok_or_else(|| {
                            Error::Internal(format!("no owner for shard {}", fragment.new_shard))
                        })?;
                    let payload = ShardPayload {
                        shard_id: fragment.new_shard,
                        entries,
                    };
                    if target == self.store.node_id() {
                        self.store.receive_into_staged(payload);
                    } else {
                        self.peers.send_fragment(target, payload).await?;
                    }
                }
            }
        }

        self.store
            .state_machine()
            .transition(NodeState::processing(action), NodeState::processed(action))
    }

    /// Apply phase: commit staged data and drop the plan. Any failure here
    /// leaves the node `Dead`; there is no rollback out of Apply.
    #[instrument(skip(self), fields(node_id = self.store.node_id()))]
    pub fn apply(&self, action: Action) -> Result<()> {
        self.store
            .state_machine()
            .transition(NodeState::processed(action), NodeState::applying(action))?;

        let result = (|| -> Result<()> {
            match self.plan_for(action)? {
                RebalancePlan::Move {
                    send_tasks,
                    full_shard_count,
                    ..
                } => self.store.apply_move(&send_tasks, full_shard_count),
                RebalancePlan::Rearrange {
                    full_shard_count, ..
                } => self.store.swap_with_staged(full_shard_count),
            }
            self.store.take_plan();
            self.store
                .state_machine()
                .transition(NodeState::applying(action), NodeState::Running)
        })();

        if let Err(e) = &result {
            error!(error = %e, "apply failed, node is now dead");
            self.store.state_machine().force_dead();
        }
        result
    }

    /// Rollback out of any pre-Apply phase: discard staged data, replay
    /// queued writes into the unchanged live topology.
    #[instrument(skip(self), fields(node_id = self.store.node_id()))]
    pub fn rollback(&self, action: Action) -> Result<()> {
        // A node whose prepare never arrived has nothing to undo.
        if self.store.state() == NodeState::Running {
            return Ok(());
        }
        self.store.state_machine().transition_any(
            &[
                NodeState::preparing(action),
                NodeState::prepared(action),
                NodeState::processing(action),
                NodeState::processed(action),
            ],
            NodeState::rolling_back(action),
        )?;

        self.store.clear_staged();
        self.store.take_plan();
        info!("rebalance rolled back");
        self.store
            .state_machine()
            .transition(NodeState::rolling_back(action), NodeState::Running)
    }

    fn plan_for(&self, action: Action) -> Result<RebalancePlan> {
        match (action, self.store.plan()) {
            (Action::MoveShards, Some(plan @ RebalancePlan::Move { .. })) => Ok(plan),
            (Action::RearrangeShards, Some(plan @ RebalancePlan::Rearrange { .. })) => Ok(plan),
            (_, Some(_)) => Err(Error::Internal(format!(
                "stored plan does not match action {action}"
            ))),
            (_, None) => Err(Error::StagedMissing(format!(
                "no plan stored for action {action}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Captures peer traffic instead of sending it.
    #[derive(Default)]
    struct RecordingPeers {
        sent: Mutex<Vec<(u32, ShardPayload)>>,
    }

    impl PeerTransport for &RecordingPeers {
        async fn send_shard(&self, target_server: u32, payload: ShardPayload) -> Result<()> {
            self.sent.lock().unwrap().push((target_server, payload));
            Ok(())
        }

        async fn send_fragment(&self, target_server: u32, payload: ShardPayload) -> Result<()> {
            self.sent.lock().unwrap().push((target_server, payload));
            Ok(())
        }
    }

    fn populated_store(node_id: u32, shards: &[u32], count: u32) -> Arc<NodeStore> {
        let store = Arc::new(NodeStore::new(node_id));
        store.install_shards(shards.iter().copied(), count);
        store
    }

    #[tokio::test]
    async fn test_move_full_protocol_sends_and_drops_shard() {
        let store = populated_store(1, &[0, 1], 2);
        // Seed shard data directly through the client surface.
        for i in 0..32 {
            store.set(&format!("key-{i}"), "v", i);
        }
        let peers = RecordingPeers::default();
        let manager = NodeManager::new(store.clone(), &peers);

        manager
            .prepare_move(PrepareMoveRequest {
                receive_shard_ids: vec![],
                send_tasks: vec![crate::common::types::SendShardTask {
                    shard_id: 1,
                    target_server: 2,
                }],
                full_shard_count: 2,
            })
            .unwrap();
        manager.process(Action::MoveShards).await.unwrap();
        manager.apply(Action::MoveShards).unwrap();

        assert_eq!(store.state(), NodeState::Running);
        assert_eq!(store.live_shard_ids(), vec![0]);
        let sent = peers.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 2);
        assert_eq!(sent[0].1.shard_id, 1);
    }

    #[tokio::test]
    async fn test_rollback_after_process_restores_running() {
        let store = populated_store(1, &[0, 1], 2);
        store.set("alpha", "1", 1);
        let peers = RecordingPeers::default();
        let manager = NodeManager::new(store.clone(), &peers);

        manager
            .prepare_move(PrepareMoveRequest {
                receive_shard_ids: vec![],
                send_tasks: vec![crate::common::types::SendShardTask {
                    shard_id: 0,
                    target_server: 2,
                }],
                full_shard_count: 2,
            })
            .unwrap();
        manager.process(Action::MoveShards).await.unwrap();
        manager.rollback(Action::MoveShards).unwrap();

        assert_eq!(store.state(), NodeState::Running);
        assert_eq!(store.live_shard_ids(), vec![0, 1]);
        assert!(store.plan().is_none());
        // Data survived because Process only copies.
        assert_eq!(store.get("alpha").value.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_apply_without_plan_kills_node() {
        let store = populated_store(1, &[0], 1);
        let peers = RecordingPeers::default();
        let manager = NodeManager::new(store.clone(), &peers);

        // Walk the state machine into Processed without storing a plan.
        let sm = store.state_machine();
        sm.transition(NodeState::Running, NodeState::MovePreparing).unwrap();
        sm.transition(NodeState::MovePreparing, NodeState::MovePrepared).unwrap();
        sm.transition(NodeState::MovePrepared, NodeState::MoveProcessing).unwrap();
        sm.transition(NodeState::MoveProcessing, NodeState::MoveProcessed).unwrap();

        assert!(manager.apply(Action::MoveShards).is_err());
        assert_eq!(store.state(), NodeState::Dead);
    }

    #[tokio::test]
    async fn test_rearrange_local_fragments_stay_local() {
        // Single node going from 1 shard to 2: no peer traffic at all.
        let store = populated_store(1, &[0], 1);
        for i in 0..32 {
            store.set(&format!("key-{i}"), &format!("v-{i}"), i);
        }
        let peers = RecordingPeers::default();
        let manager = NodeManager::new(store.clone(), &peers);

        let old: std::collections::BTreeMap<u32, i64> =
            crate::common::hash::partition(1).into_iter().enumerate()
                .map(|(i, b)| (i as u32, b))
                .collect();
        let new: std::collections::BTreeMap<u32, i64> =
            crate::common::hash::partition(2).into_iter().enumerate()
                .map(|(i, b)| (i as u32, b))
                .collect();
        let fragments = crate::master::topology::plan_fragments(&old, &new);
        let server_by_shard: HashMap<u32, u32> = [(0, 1), (1, 1)].into();

        manager
            .prepare_rearrange(PrepareRearrangeRequest {
                fragments,
                server_by_shard,
                shard_to_hash: new,
                full_shard_count: 2,
            })
            .unwrap();
        manager.process(Action::RearrangeShards).await.unwrap();
        manager.apply(Action::RearrangeShards).unwrap();

        assert_eq!(store.state(), NodeState::Running);
        assert_eq!(store.live_shard_ids(), vec![0, 1]);
        assert!(peers.sent.lock().unwrap().is_empty());
        for i in 0..32 {
            assert_eq!(
                store.get(&format!("key-{i}")).value.as_deref(),
                Some(format!("v-{i}").as_str())
            );
        }
    }
}
