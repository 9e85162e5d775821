//! End-to-end rebalance protocol over an in-process cluster: real Topology,
//! real NodeManagers, in-memory transports, injectable faults.

use shardkv::client::{ClusterTransport, RoutingClient};
use shardkv::common::types::{
    Action, GetResponse, NodeState, PrepareMoveRequest, PrepareRearrangeRequest, SetResponse,
    ShardPayload,
};
use shardkv::master::{NodeControl, Topology, TopologyMaps};
use shardkv::node::{NodeManager, NodeStore, PeerTransport};
use shardkv::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Peer transport delivering straight into the target store.
#[derive(Clone, Default)]
struct MemoryPeers {
    stores: Arc<Mutex<HashMap<u32, Arc<NodeStore>>>>,
}

impl MemoryPeers {
    fn store(&self, id: u32) -> Result<Arc<NodeStore>> {
        self.stores
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotRegistered(format!("node {id}")))
    }
}

impl PeerTransport for MemoryPeers {
    async fn send_shard(&self, target_server: u32, payload: ShardPayload) -> Result<()> {
        self.store(target_server)?.receive_into_staged(payload);
        Ok(())
    }

    async fn send_fragment(&self, target_server: u32, payload: ShardPayload) -> Result<()> {
        self.store(target_server)?.receive_into_staged(payload);
        Ok(())
    }
}

/// The whole cluster in one value: node managers keyed by server id plus
/// fault injection switches. Implements `NodeControl` so the real
/// orchestrator drives the real node state machines.
#[derive(Clone, Default)]
struct FakeCluster {
    peers: MemoryPeers,
    managers: Arc<Mutex<HashMap<u32, Arc<NodeManager<MemoryPeers>>>>>,
    fail_prepare: Arc<Mutex<HashSet<u32>>>,
    fail_process: Arc<Mutex<HashSet<u32>>>,
    fail_apply: Arc<Mutex<HashSet<u32>>>,
    fail_rollback: Arc<Mutex<HashSet<u32>>>,
}

impl FakeCluster {
    fn add_node(&self, id: u32) {
        let store = Arc::new(NodeStore::new(id));
        self.peers.stores.lock().unwrap().insert(id, store.clone());
        self.managers
            .lock()
            .unwrap()
            .insert(id, Arc::new(NodeManager::new(store, self.peers.clone())));
    }

    fn manager(&self, id: u32) -> Result<Arc<NodeManager<MemoryPeers>>> {
        self.managers
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotRegistered(format!("node {id}")))
    }

    fn store(&self, id: u32) -> Arc<NodeStore> {
        self.peers.store(id).unwrap()
    }

    fn flagged(&self, flags: &Mutex<HashSet<u32>>, id: u32) -> bool {
        flags.lock().unwrap().contains(&id)
    }
}

impl NodeControl for FakeCluster {
    async fn prepare_move(&self, server_id: u32, req: PrepareMoveRequest) -> Result<()> {
        if self.flagged(&self.fail_prepare, server_id) {
            return Err(Error::ConnectionFailed(format!("injected: node {server_id}")));
        }
        self.manager(server_id)?.prepare_move(req)
    }

    async fn prepare_rearrange(&self, server_id: u32, req: PrepareRearrangeRequest) -> Result<()> {
        if self.flagged(&self.fail_prepare, server_id) {
            return Err(Error::ConnectionFailed(format!("injected: node {server_id}")));
        }
        self.manager(server_id)?.prepare_rearrange(req)
    }

    async fn process(&self, server_id: u32, action: Action) -> Result<()> {
        if self.flagged(&self.fail_process, server_id) {
            return Err(Error::ConnectionFailed(format!("injected: node {server_id}")));
        }
        self.manager(server_id)?.process(action).await
    }

    async fn apply(&self, server_id: u32, action: Action) -> Result<()> {
        if self.flagged(&self.fail_apply, server_id) {
            // The node dies mid-commit.
            self.store(server_id).state_machine().force_dead();
            return Err(Error::ConnectionFailed(format!("injected: node {server_id}")));
        }
        self.manager(server_id)?.apply(action)
    }

    async fn rollback(&self, server_id: u32, action: Action) -> Result<()> {
        if self.flagged(&self.fail_rollback, server_id) {
            return Err(Error::ConnectionFailed(format!("injected: node {server_id}")));
        }
        self.manager(server_id)?.rollback(action)
    }
}

/// Routing-client transport going straight at the in-process cluster.
#[derive(Clone)]
struct FakeTransport {
    topology: Arc<Topology<FakeCluster>>,
    cluster: FakeCluster,
}

impl ClusterTransport for FakeTransport {
    async fn fetch_topology(&self) -> Result<TopologyMaps> {
        Ok(self.topology.maps().await)
    }

    async fn set(&self, server_id: u32, key: &str, value: &str, timestamp: u64) -> Result<SetResponse> {
        Ok(self.cluster.store(server_id).set(key, value, timestamp))
    }

    async fn get(&self, server_id: u32, key: &str) -> Result<GetResponse> {
        Ok(self.cluster.store(server_id).get(key))
    }
}

fn cluster_with_shards(shard_count: u32) -> (FakeCluster, Arc<Topology<FakeCluster>>) {
    let cluster = FakeCluster::default();
    let topology = Arc::new(Topology::new(shard_count, cluster.clone()));
    (cluster, topology)
}

async fn join(cluster: &FakeCluster, topology: &Topology<FakeCluster>, id: u32) {
    cluster.add_node(id);
    topology.add_server(id).await.unwrap();
}

fn client(
    topology: Arc<Topology<FakeCluster>>,
    cluster: FakeCluster,
) -> RoutingClient<FakeTransport> {
    RoutingClient::new(FakeTransport { topology, cluster })
        .with_cache_ttl(Duration::from_millis(50))
}

#[tokio::test]
async fn first_server_receives_all_shards() {
    let (cluster, topology) = cluster_with_shards(4);
    join(&cluster, &topology, 1).await;

    let servers = topology.server_to_shards().await;
    assert_eq!(servers[&1], vec![0, 1, 2, 3]);
    assert_eq!(cluster.store(1).live_shard_ids(), vec![0, 1, 2, 3]);
    assert_eq!(cluster.store(1).shard_count(), 4);
    assert_eq!(topology.node_states().await[&1], NodeState::Running);
}

#[tokio::test]
async fn add_server_rebalances_and_keeps_data() {
    let (cluster, topology) = cluster_with_shards(4);
    join(&cluster, &topology, 1).await;

    let kv = client(topology.clone(), cluster.clone());
    for i in 0..100 {
        kv.set(&format!("key-{i}"), &format!("value-{i}")).await.unwrap();
    }

    join(&cluster, &topology, 2).await;

    let servers = topology.server_to_shards().await;
    assert_eq!(servers.len(), 2);
    let counts: Vec<usize> = servers.values().map(|v| v.len()).collect();
    assert!(counts.iter().max().unwrap() - counts.iter().min().unwrap() <= 1);

    for i in 0..100 {
        assert_eq!(
            kv.get(&format!("key-{i}")).await.unwrap().as_deref(),
            Some(format!("value-{i}").as_str())
        );
    }
}

#[tokio::test]
async fn add_server_with_no_shards_to_take_leaves_cluster_untouched() {
    let (cluster, topology) = cluster_with_shards(2);
    join(&cluster, &topology, 1).await;
    join(&cluster, &topology, 2).await;

    let kv = client(topology.clone(), cluster.clone());
    for i in 0..20 {
        kv.set(&format!("ik-{i}"), &format!("iv-{i}")).await.unwrap();
    }

    // Two shards across three servers: the joiner gets nothing, so no
    // node goes through the protocol.
    join(&cluster, &topology, 3).await;

    let servers = topology.server_to_shards().await;
    assert_eq!(servers[&3], Vec::<u32>::new());
    let states = topology.node_states().await;
    assert_eq!(states[&1], NodeState::Running);
    assert_eq!(states[&2], NodeState::Running);
    assert_eq!(states[&3], NodeState::Init);
    assert_eq!(cluster.store(1).state(), NodeState::Running);
    assert_eq!(cluster.store(2).state(), NodeState::Running);

    for i in 0..20 {
        assert_eq!(
            kv.get(&format!("ik-{i}")).await.unwrap().as_deref(),
            Some(format!("iv-{i}").as_str())
        );
    }
}

#[tokio::test]
async fn delete_server_drains_and_keeps_data() {
    let (cluster, topology) = cluster_with_shards(4);
    join(&cluster, &topology, 1).await;
    join(&cluster, &topology, 2).await;

    let kv = client(topology.clone(), cluster.clone());
    for i in 0..100 {
        kv.set(&format!("dk-{i}"), &format!("dv-{i}")).await.unwrap();
    }

    topology.delete_server(2).await.unwrap();

    let servers = topology.server_to_shards().await;
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[&1], vec![0, 1, 2, 3]);
    assert!(!topology.node_states().await.contains_key(&2));

    for i in 0..100 {
        assert_eq!(
            kv.get(&format!("dk-{i}")).await.unwrap().as_deref(),
            Some(format!("dv-{i}").as_str())
        );
    }
}

#[tokio::test]
async fn delete_last_server_is_rejected() {
    let (cluster, topology) = cluster_with_shards(4);
    join(&cluster, &topology, 1).await;
    assert!(topology.delete_server(1).await.is_err());
    assert_eq!(topology.server_to_shards().await.len(), 1);
}

#[tokio::test]
async fn add_existing_server_is_rejected() {
    let (cluster, topology) = cluster_with_shards(4);
    join(&cluster, &topology, 1).await;
    assert!(matches!(
        topology.add_server(1).await,
        Err(Error::ServerExists(1))
    ));
}

#[tokio::test]
async fn change_shard_count_keeps_data() {
    let (cluster, topology) = cluster_with_shards(4);
    join(&cluster, &topology, 1).await;
    join(&cluster, &topology, 2).await;

    let kv = client(topology.clone(), cluster.clone());
    for i in 0..150 {
        kv.set(&format!("ck-{i}"), &format!("cv-{i}")).await.unwrap();
    }

    topology.change_shard_count(7).await.unwrap();

    assert_eq!(topology.shard_to_hash().await.len(), 7);
    let servers = topology.server_to_shards().await;
    let total: usize = servers.values().map(|v| v.len()).sum();
    assert_eq!(total, 7);

    for i in 0..150 {
        assert_eq!(
            kv.get(&format!("ck-{i}")).await.unwrap().as_deref(),
            Some(format!("cv-{i}").as_str())
        );
    }
}

#[tokio::test]
async fn change_shard_count_rejects_same_and_zero() {
    let (cluster, topology) = cluster_with_shards(4);
    join(&cluster, &topology, 1).await;
    assert!(matches!(
        topology.change_shard_count(4).await,
        Err(Error::InvalidShardCount(4))
    ));
    assert!(matches!(
        topology.change_shard_count(0).await,
        Err(Error::InvalidShardCount(0))
    ));
}

#[tokio::test]
async fn process_failure_rolls_back_topology_and_nodes() {
    let (cluster, topology) = cluster_with_shards(4);
    join(&cluster, &topology, 1).await;
    join(&cluster, &topology, 2).await;

    let kv = client(topology.clone(), cluster.clone());
    for i in 0..50 {
        kv.set(&format!("pk-{i}"), &format!("pv-{i}")).await.unwrap();
    }
    let servers_before = topology.server_to_shards().await;
    let shards_before = topology.shard_to_hash().await;

    cluster.fail_process.lock().unwrap().insert(2);
    let err = topology.change_shard_count(8).await.unwrap_err();
    assert!(err.to_string().contains("server 2"));
    cluster.fail_process.lock().unwrap().clear();

    // Maps unchanged, all nodes back in Running, data intact.
    assert_eq!(topology.server_to_shards().await, servers_before);
    assert_eq!(topology.shard_to_hash().await, shards_before);
    for (_, state) in topology.node_states().await {
        assert_eq!(state, NodeState::Running);
    }
    for i in 0..50 {
        assert_eq!(
            kv.get(&format!("pk-{i}")).await.unwrap().as_deref(),
            Some(format!("pv-{i}").as_str())
        );
    }

    // The cluster is healthy enough to run the same rebalance again.
    topology.change_shard_count(8).await.unwrap();
    assert_eq!(topology.shard_to_hash().await.len(), 8);
}

#[tokio::test]
async fn rollback_failure_marks_that_node_dead_others_recover() {
    let (cluster, topology) = cluster_with_shards(4);
    join(&cluster, &topology, 1).await;
    join(&cluster, &topology, 2).await;

    let kv = client(topology.clone(), cluster.clone());
    for i in 0..50 {
        kv.set(&format!("rk-{i}"), &format!("rv-{i}")).await.unwrap();
    }
    let servers_before = topology.server_to_shards().await;
    let shards_before = topology.shard_to_hash().await;

    // Node 2 fails its Process, then becomes unreachable for the rollback.
    cluster.fail_process.lock().unwrap().insert(2);
    cluster.fail_rollback.lock().unwrap().insert(2);
    let err = topology.change_shard_count(8).await.unwrap_err();
    assert!(err.to_string().contains("server 2"));

    let states = topology.node_states().await;
    assert_eq!(states[&1], NodeState::Running);
    assert_eq!(states[&2], NodeState::Dead);
    assert_eq!(topology.server_to_shards().await, servers_before);
    assert_eq!(topology.shard_to_hash().await, shards_before);

    // Node 1 rolled back cleanly and still serves its shards.
    assert_eq!(cluster.store(1).state(), NodeState::Running);
    assert_eq!(cluster.store(1).shard_count(), 4);
}

#[tokio::test]
async fn prepare_failure_rolls_back_before_any_transfer() {
    let (cluster, topology) = cluster_with_shards(4);
    join(&cluster, &topology, 1).await;
    cluster.add_node(2);

    cluster.fail_prepare.lock().unwrap().insert(2);
    assert!(topology.add_server(2).await.is_err());

    let servers = topology.server_to_shards().await;
    assert_eq!(servers.len(), 1);
    assert_eq!(cluster.store(1).live_shard_ids(), vec![0, 1, 2, 3]);
    assert_eq!(cluster.store(1).state(), NodeState::Running);
}

#[tokio::test]
async fn apply_failure_marks_node_dead_without_rollback() {
    let (cluster, topology) = cluster_with_shards(4);
    join(&cluster, &topology, 1).await;
    join(&cluster, &topology, 2).await;

    cluster.fail_apply.lock().unwrap().insert(2);
    let err = topology.change_shard_count(6).await.unwrap_err();
    assert!(err.to_string().contains("server 2"));

    let states = topology.node_states().await;
    assert_eq!(states[&2], NodeState::Dead);
    // Node 1 already committed and keeps its new data; the master still
    // reports the old topology. This inconsistency is the documented cost
    // of a non-transactional Apply.
    assert_eq!(states[&1], NodeState::Running);
    assert_eq!(topology.shard_to_hash().await.len(), 4);
    assert_eq!(cluster.store(1).shard_count(), 6);
    assert_eq!(cluster.store(2).state(), NodeState::Dead);
}

#[tokio::test]
async fn example_scenario_two_then_three_servers() {
    let (cluster, topology) = cluster_with_shards(4);
    join(&cluster, &topology, 1).await;
    join(&cluster, &topology, 2).await;

    topology.change_shard_count(2).await.unwrap();
    let shards = topology.shard_to_hash().await;
    assert_eq!(shards.len(), 2);
    assert_eq!(shards[&1], i64::MAX);
    // First boundary within 0.1% of the space midpoint.
    let tolerance = (u64::MAX / 1000) as i128;
    assert!((shards[&0] as i128).abs() <= tolerance);

    let kv = client(topology.clone(), cluster.clone());
    kv.set("k", "v").await.unwrap();
    assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));

    join(&cluster, &topology, 3).await;
    topology.change_shard_count(3).await.unwrap();
    assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_data_loss_under_interleaved_traffic() {
    let (cluster, topology) = cluster_with_shards(4);
    join(&cluster, &topology, 1).await;
    join(&cluster, &topology, 2).await;

    let kv = Arc::new(client(topology.clone(), cluster.clone()));
    for i in 0..100 {
        kv.set(&format!("base-{i}"), &format!("bv-{i}")).await.unwrap();
    }

    // Fresh keys keep arriving while the cluster re-partitions.
    let writer_kv = kv.clone();
    let writer = tokio::spawn(async move {
        for i in 0..60 {
            writer_kv
                .set(&format!("live-{i}"), &format!("lv-{i}"))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    topology.change_shard_count(9).await.unwrap();
    cluster.add_node(3);
    topology.add_server(3).await.unwrap();
    writer.await.unwrap();

    for i in 0..100 {
        assert_eq!(
            kv.get(&format!("base-{i}")).await.unwrap().as_deref(),
            Some(format!("bv-{i}").as_str()),
            "pre-rebalance key base-{i} lost"
        );
    }
    for i in 0..60 {
        assert_eq!(
            kv.get(&format!("live-{i}")).await.unwrap().as_deref(),
            Some(format!("lv-{i}").as_str()),
            "interleaved key live-{i} lost"
        );
    }
}
