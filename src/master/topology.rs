//! Topology bookkeeping and rebalance planning
//!
//! Pure functions over the two master-owned maps: server -> owned shards and
//! shard -> upper hash boundary. Everything here is deterministic so the
//! orchestrator can compute a complete plan before touching any node.

use crate::common::hash;
use crate::common::types::{
    Action, Fragment, NodeState, PrepareMoveRequest, PrepareRearrangeRequest, SendShardTask,
};
use crate::master::orchestrator::{NodeControl, NodePlan, Orchestrator};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::info;

/// Round-robin shard assignment: shards ascending, servers in the given
/// order starting at index 0. Per-server counts differ by at most one.
pub fn redistribute(server_ids: &[u32], shard_ids: &[u32]) -> HashMap<u32, Vec<u32>> {
    if server_ids.is_empty() {
        return HashMap::new();
    }
    let mut assignment: HashMap<u32, Vec<u32>> =
        server_ids.iter().map(|&s| (s, Vec::new())).collect();

    let mut shards: Vec<u32> = shard_ids.to_vec();
    shards.sort_unstable();
    for (i, shard) in shards.into_iter().enumerate() {
        let server = server_ids[i % server_ids.len()];
        assignment.get_mut(&server).map(|v| v.push(shard));
    }
    assignment
}

/// Build the shard -> boundary map for `shard_count` evenly sized ranges.
pub fn partition_map(shard_count: u32) -> BTreeMap<u32, i64> {
    hash::partition(shard_count)
        .into_iter()
        .enumerate()
        .map(|(i, boundary)| (i as u32, boundary))
        .collect()
}

/// Split the hash space into fragments: maximal sub-ranges on which both the
/// old and the new shard stay constant. Adjacent segments mapping to the
/// same (old, new) pair are coalesced. Output is sorted by `range_from` and
/// tiles `(i64::MIN, i64::MAX]` exactly.
pub fn plan_fragments(old: &BTreeMap<u32, i64>, new: &BTreeMap<u32, i64>) -> Vec<Fragment> {
    if old.is_empty() || new.is_empty() {
        return Vec::new();
    }
    let old_count = old.len() as u32;
    let new_count = new.len() as u32;

    let mut boundaries: Vec<i64> = old.values().chain(new.values()).copied().collect();
    boundaries.sort_unstable();
    boundaries.dedup();

    let mut fragments: Vec<Fragment> = Vec::new();
    let mut from = i64::MIN;
    for to in boundaries {
        // Both partitions are constant on (from, to]; any hash inside
        // identifies the pair. `to` itself is in-range since upper bounds
        // are inclusive.
        let old_shard = hash::shard_for_hash(to, old_count).unwrap_or(0);
        let new_shard = hash::shard_for_hash(to, new_count).unwrap_or(0);

        match fragments.last_mut() {
            Some(last) if last.old_shard == old_shard && last.new_shard == new_shard => {
                last.range_to = to;
            }
            _ => fragments.push(Fragment {
                old_shard,
                new_shard,
                range_from: from,
                range_to: to,
            }),
        }
        from = to;
    }
    fragments
}

/// The master's record of the cluster layout.
#[derive(Debug, Clone, Default)]
pub struct TopologyMaps {
    /// Which shards each registered server owns.
    pub server_to_shards: HashMap<u32, Vec<u32>>,
    /// Upper (inclusive) hash boundary of each shard.
    pub shard_to_hash: BTreeMap<u32, i64>,
}

impl TopologyMaps {
    pub fn shard_count(&self) -> u32 {
        self.shard_to_hash.len() as u32
    }

    pub fn server_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.server_to_shards.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn shard_ids(&self) -> Vec<u32> {
        self.shard_to_hash.keys().copied().collect()
    }

    /// Inverse of `server_to_shards`.
    pub fn shard_to_server(&self) -> HashMap<u32, u32> {
        let mut owners = HashMap::new();
        for (&server, shards) in &self.server_to_shards {
            for &shard in shards {
                owners.insert(shard, server);
            }
        }
        owners
    }

    pub fn server_for_key(&self, key: &str) -> Option<u32> {
        let shard = hash::shard_for_key(key, self.shard_count())?;
        self.shard_to_server().get(&shard).copied()
    }
}


/// The authoritative topology service: owns the maps and the per-node state
/// record, serializes every mutation through one write lock held across the
/// whole rebalance protocol.
pub struct Topology<C: NodeControl> {
    inner: RwLock<TopologyState>,
    orchestrator: Orchestrator<C>,
}

#[derive(Debug, Default)]
struct TopologyState {
    maps: TopologyMaps,
    states: HashMap<u32, NodeState>,
}

impl<C: NodeControl> Topology<C> {
    pub fn new(initial_shard_count: u32, control: C) -> Self {
        Self {
            inner: RwLock::new(TopologyState {
                maps: TopologyMaps {
                    server_to_shards: HashMap::new(),
                    shard_to_hash: partition_map(initial_shard_count),
                },
                states: HashMap::new(),
            }),
            orchestrator: Orchestrator::new(control),
        }
    }

    // === reads, concurrent under the read lock ===

    pub async fn server_to_shards(&self) -> HashMap<u32, Vec<u32>> {
        self.inner.read().await.maps.server_to_shards.clone()
    }

    pub async fn shard_to_hash(&self) -> BTreeMap<u32, i64> {
        self.inner.read().await.maps.shard_to_hash.clone()
    }

    pub async fn node_states(&self) -> HashMap<u32, NodeState> {
        self.inner.read().await.states.clone()
    }

    pub async fn maps(&self) -> TopologyMaps {
        self.inner.read().await.maps.clone()
    }

    // === mutations, serialized end to end ===

    /// Register a new server and move it its share of the shards.
    pub async fn add_server(&self, server_id: u32) -> Result<()> {
        let mut guard = self.inner.write().await;
        if guard.maps.server_to_shards.contains_key(&server_id) {
            return Err(Error::ServerExists(server_id));
        }

        let mut servers = guard.maps.server_ids();
        servers.push(server_id);
        servers.sort_unstable();

        let new_assignment = redistribute(&servers, &guard.maps.shard_ids());
        let plans = move_plans(&guard.maps, &new_assignment);
        info!(server_id, servers = servers.len(), "adding server");

        let TopologyState { maps, states } = &mut *guard;
        // The joiner is known from here on; the protocol moves it to
        // Running once its shards arrive.
        states.insert(server_id, NodeState::Init);
        self.orchestrator
            .run(Action::MoveShards, plans, states)
            .await?;

        maps.server_to_shards = new_assignment;
        Ok(())
    }

    /// Drain a departing server's shards to the remaining ones and drop it.
    pub async fn delete_server(&self, server_id: u32) -> Result<()> {
        let mut guard = self.inner.write().await;
        if !guard.maps.server_to_shards.contains_key(&server_id) {
            return Err(Error::ServerUnknown(server_id));
        }
        let remaining: Vec<u32> = guard
            .maps
            .server_ids()
            .into_iter()
            .filter(|&s| s != server_id)
            .collect();
        if remaining.is_empty() {
            return Err(Error::Other(
                "cannot delete the last remaining server".into(),
            ));
        }

        let new_assignment = redistribute(&remaining, &guard.maps.shard_ids());
        let plans = move_plans(&guard.maps, &new_assignment);
        info!(server_id, remaining = remaining.len(), "deleting server");

        let TopologyState { maps, states } = &mut *guard;
        self.orchestrator
            .run(Action::MoveShards, plans, states)
            .await?;

        maps.server_to_shards = new_assignment;
        states.remove(&server_id);
        Ok(())
    }

    /// Re-partition the hash space into `new_count` shards and rearrange
    /// all data accordingly.
    pub async fn change_shard_count(&self, new_count: u32) -> Result<()> {
        let mut guard = self.inner.write().await;
        if new_count == 0 || new_count == guard.maps.shard_count() {
            return Err(Error::InvalidShardCount(new_count));
        }

        let new_map = partition_map(new_count);
        let servers = guard.maps.server_ids();
        if servers.is_empty() {
            // Nothing holds data yet; just adopt the new partition.
            guard.maps.shard_to_hash = new_map;
            return Ok(());
        }

        let shard_ids: Vec<u32> = new_map.keys().copied().collect();
        let new_assignment = redistribute(&servers, &shard_ids);
        let fragments = plan_fragments(&guard.maps.shard_to_hash, &new_map);
        let plans = rearrange_plans(&guard.maps, &new_assignment, &new_map, &fragments);
        info!(
            old_count = guard.maps.shard_count(),
            new_count, "changing shard count"
        );

        let TopologyState { maps, states } = &mut *guard;
        self.orchestrator
            .run(Action::RearrangeShards, plans, states)
            .await?;

        maps.shard_to_hash = new_map;
        maps.server_to_shards = new_assignment;
        Ok(())
    }
}

/// Per-node MOVE_SHARDS plans for the transition `maps -> new_assignment`.
/// Only shards whose owner changes travel, and only servers that send or
/// receive at least one shard participate in the protocol.
fn move_plans(
    maps: &TopologyMaps,
    new_assignment: &HashMap<u32, Vec<u32>>,
) -> HashMap<u32, NodePlan> {
    let old_owners = maps.shard_to_server();
    let mut new_owners: HashMap<u32, u32> = HashMap::new();
    for (&server, shards) in new_assignment {
        for &shard in shards {
            new_owners.insert(shard, server);
        }
    }

    let full_shard_count = maps.shard_count();
    let mut plans: HashMap<u32, PrepareMoveRequest> = HashMap::new();
    let participants = maps
        .server_to_shards
        .keys()
        .chain(new_assignment.keys())
        .copied();
    for server in participants {
        plans.entry(server).or_insert_with(|| PrepareMoveRequest {
            receive_shard_ids: vec![],
            send_tasks: vec![],
            full_shard_count,
        });
    }

    for (&shard, &new_owner) in &new_owners {
        match old_owners.get(&shard) {
            Some(&old_owner) if old_owner == new_owner => {}
            Some(&old_owner) => {
                plans.get_mut(&old_owner).map(|p| {
                    p.send_tasks.push(SendShardTask {
                        shard_id: shard,
                        target_server: new_owner,
                    })
                });
                plans
                    .get_mut(&new_owner)
                    .map(|p| p.receive_shard_ids.push(shard));
            }
            // A shard nobody owned yet (first server joining) just
            // materializes empty at its new owner.
            None => {
                plans
                    .get_mut(&new_owner)
                    .map(|p| p.receive_shard_ids.push(shard));
            }
        }
    }

    for plan in plans.values_mut() {
        plan.receive_shard_ids.sort_unstable();
        plan.send_tasks.sort_by_key(|t| t.shard_id);
    }
    plans
        .into_iter()
        .filter(|(_, plan)| !plan.receive_shard_ids.is_empty() || !plan.send_tasks.is_empty())
        .map(|(server, plan)| (server, NodePlan::Move(plan)))
        .collect()
}

/// Per-node REARRANGE_SHARDS plans: each node gets the fragments sourced
/// from shards it currently holds, plus the full new layout.
fn rearrange_plans(
    maps: &TopologyMaps,
    new_assignment: &HashMap<u32, Vec<u32>>,
    new_map: &BTreeMap<u32, i64>,
    fragments: &[Fragment],
) -> HashMap<u32, NodePlan> {
    let mut server_by_shard: HashMap<u32, u32> = HashMap::new();
    for (&server, shards) in new_assignment {
        for &shard in shards {
            server_by_shard.insert(shard, server);
        }
    }

    maps.server_to_shards
        .iter()
        .map(|(&server, owned)| {
            let own: Vec<Fragment> = fragments
                .iter()
                .filter(|f| owned.contains(&f.old_shard))
                .cloned()
                .collect();
            (
                server,
                NodePlan::Rearrange(PrepareRearrangeRequest {
                    fragments: own,
                    server_by_shard: server_by_shard.clone(),
                    shard_to_hash: new_map.clone(),
                    full_shard_count: new_map.len() as u32,
                }),
            )
        })
        .collect()
}
