//! Three-phase rebalance driver
//!
//! The orchestrator walks every participating node through
//! Prepare -> Process -> Apply, sequentially per node within each phase.
//! A failure during Prepare or Process rolls every participant back; a
//! failure during Apply is past the point of no return, so the failing node
//! is written off as dead and the call reports the partial damage.
//!
//! Remote calls go through the `NodeControl` trait; production wires in the
//! HTTP client, tests wire in fakes with injected faults.

use crate::common::types::{Action, NodeState, PrepareMoveRequest, PrepareRearrangeRequest};
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Master-to-node control calls for the rebalance protocol.
pub trait NodeControl: Send + Sync {
    fn prepare_move(
        &self,
        server_id: u32,
        req: PrepareMoveRequest,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn prepare_rearrange(
        &self,
        server_id: u32,
        req: PrepareRearrangeRequest,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn process(
        &self,
        server_id: u32,
        action: Action,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn apply(
        &self,
        server_id: u32,
        action: Action,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    fn rollback(
        &self,
        server_id: u32,
        action: Action,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Per-node Prepare payload for one rebalance run.
#[derive(Debug, Clone)]
pub enum NodePlan {
    Move(PrepareMoveRequest),
    Rearrange(PrepareRearrangeRequest),
}

pub struct Orchestrator<C: NodeControl> {
    control: C,
}

impl<C: NodeControl> Orchestrator<C> {
    pub fn new(control: C) -> Self {
        Self { control }
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// Run the full protocol over `plans`, updating `states` with the
    /// per-node outcome as it goes. Nodes are visited in ascending id order
    /// so failures are reproducible.
    pub async fn run(
        &self,
        action: Action,
        plans: HashMap<u32, NodePlan>,
        states: &mut HashMap<u32, NodeState>,
    ) -> Result<()> {
        let mut order: Vec<u32> = plans.keys().copied().collect();
        order.sort_unstable();

        // Prepare
        let mut failures = Vec::new();
        for &server_id in &order {
            states.insert(server_id, NodeState::preparing(action));
            let result = match plans.get(&server_id) {
                Some(NodePlan::Move(req)) => {
                    self.control.prepare_move(server_id, req.clone()).await
                }
                Some(NodePlan::Rearrange(req)) => {
                    self.control.prepare_rearrange(server_id, req.clone()).await
                }
                None => unreachable!("order built from plans"),
            };
            match result {
                Ok(()) => {
                    states.insert(server_id, NodeState::prepared(action));
                }
                Err(e) => failures.push((server_id, e)),
            }
        }
        if !failures.is_empty() {
            warn!(action = %action, failed = failures.len(), "prepare phase failed, rolling back");
            self.rollback_all(action, &order, states).await;
            return Err(aggregate(failures));
        }

        // Process
        for &server_id in &order {
            states.insert(server_id, NodeState::processing(action));
            match self.control.process(server_id, action).await {
                Ok(()) => {
                    states.insert(server_id, NodeState::processed(action));
                }
                Err(e) => failures.push((server_id, e)),
            }
        }
        if !failures.is_empty() {
            warn!(action = %action, failed = failures.len(), "process phase failed, rolling back");
            self.rollback_all(action, &order, states).await;
            return Err(aggregate(failures));
        }

        // Apply. No rollback from here on: a node that cannot commit is
        // dead, and nodes that already applied keep their new data.
        for &server_id in &order {
            states.insert(server_id, NodeState::applying(action));
            match self.control.apply(server_id, action).await {
                Ok(()) => {
                    states.insert(server_id, NodeState::Running);
                }
                Err(e) => {
                    error!(server_id, error = %e, "apply failed, marking node dead");
                    states.insert(server_id, NodeState::Dead);
                    failures.push((server_id, e));
                }
            }
        }
        if !failures.is_empty() {
            return Err(aggregate(failures));
        }

        info!(action = %action, nodes = order.len(), "rebalance complete");
        Ok(())
    }

    /// Roll every participant back. A node that also fails its rollback is
    /// in an unknown state and gets marked dead.
    async fn rollback_all(
        &self,
        action: Action,
        order: &[u32],
        states: &mut HashMap<u32, NodeState>,
    ) {
        for &server_id in order {
            states.insert(server_id, NodeState::rolling_back(action));
            match self.control.rollback(server_id, action).await {
                Ok(()) => {
                    states.insert(server_id, NodeState::Running);
                }
                Err(e) => {
                    error!(server_id, error = %e, "rollback failed, marking node dead");
                    states.insert(server_id, NodeState::Dead);
                }
            }
        }
    }
}

/// One line per failing node, joined with newlines.
fn aggregate(failures: Vec<(u32, Error)>) -> Error {
    let joined = failures
        .iter()
        .map(|(server_id, e)| format!("server {server_id}: {e}"))
        .collect::<Vec<_>>()
        .join("\n");
    Error::PhaseFailed(joined)
}
