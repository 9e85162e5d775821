//! Node state machine
//!
//! The state is a single atomic word; every transition is a checked
//! compare-and-set from an expected current state. The legal edges live in
//! one transition table so an illegal request fails at the CAS site without
//! mutating anything.

use crate::common::types::NodeState;
use crate::{Error, Result};
use std::sync::atomic::{AtomicU8, Ordering};

fn encode(state: NodeState) -> u8 {
    use NodeState::*;
    match state {
        Init => 0,
        Running => 1,
        MovePreparing => 2,
        MovePrepared => 3,
        MoveProcessing => 4,
        MoveProcessed => 5,
        MoveApplying => 6,
        MoveRollingBack => 7,
        RearrangePreparing => 8,
        RearrangePrepared => 9,
        RearrangeProcessing => 10,
        RearrangeProcessed => 11,
        RearrangeApplying => 12,
        RearrangeRollingBack => 13,
        Dead => 14,
    }
}

fn decode(raw: u8) -> NodeState {
    use NodeState::*;
    match raw {
        0 => Init,
        1 => Running,
        2 => MovePreparing,
        3 => MovePrepared,
        4 => MoveProcessing,
        5 => MoveProcessed,
        6 => MoveApplying,
        7 => MoveRollingBack,
        8 => RearrangePreparing,
        9 => RearrangePrepared,
        10 => RearrangeProcessing,
        11 => RearrangeProcessed,
        12 => RearrangeApplying,
        13 => RearrangeRollingBack,
        _ => Dead,
    }
}

/// States a node may move to from `from`. `Dead` is terminal; `Applying`
/// has no rollback edge.
pub fn allowed_transitions(from: NodeState) -> &'static [NodeState] {
    use NodeState::*;
    match from {
        Init => &[Running],
        Running => &[MovePreparing, RearrangePreparing],
        MovePreparing => &[MovePrepared, MoveRollingBack],
        MovePrepared => &[MoveProcessing, MoveRollingBack],
        MoveProcessing => &[MoveProcessed, MoveRollingBack],
        MoveProcessed => &[MoveApplying, MoveRollingBack],
        MoveApplying => &[Running, Dead],
        MoveRollingBack => &[Running],
        RearrangePreparing => &[RearrangePrepared, RearrangeRollingBack],
        RearrangePrepared => &[RearrangeProcessing, RearrangeRollingBack],
        RearrangeProcessing => &[RearrangeProcessed, RearrangeRollingBack],
        RearrangeProcessed => &[RearrangeApplying, RearrangeRollingBack],
        RearrangeApplying => &[Running, Dead],
        RearrangeRollingBack => &[Running],
        Dead => &[],
    }
}

/// Atomic holder for the node state.
pub struct AtomicState {
    raw: AtomicU8,
}

impl AtomicState {
    pub fn new(state: NodeState) -> Self {
        Self {
            raw: AtomicU8::new(encode(state)),
        }
    }

    pub fn get(&self) -> NodeState {
        decode(self.raw.load(Ordering::SeqCst))
    }

    /// Transition `from -> to`. Fails without mutating if the edge is not in
    /// the table or the current state is not `from`.
    pub fn transition(&self, from: NodeState, to: NodeState) -> Result<()> {
        if !allowed_transitions(from).contains(&to) {
            return Err(Error::StateTransition(format!(
                "{} -> {} is not a legal transition",
                from, to
            )));
        }

        self.raw
            .compare_exchange(encode(from), encode(to), Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|actual| {
                Error::StateTransition(format!(
                    "Could not change state {} -> {}, actual state was {}",
                    from,
                    to,
                    decode(actual)
                ))
            })
    }

    /// Transition to `to` from the first matching state in `from_any`.
    pub fn transition_any(&self, from_any: &[NodeState], to: NodeState) -> Result<()> {
        for from in from_any {
            if self.transition(*from, to).is_ok() {
                return Ok(());
            }
        }

        Err(Error::StateTransition(format!(
            "Could not change state {:?} -> {}, actual state was {}",
            from_any,
            to,
            self.get()
        )))
    }

    /// Unconditional drop into `Dead`, the terminal state.
    pub fn force_dead(&self) {
        self.raw.store(encode(NodeState::Dead), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Action;

    #[test]
    fn test_codec_roundtrip() {
        use NodeState::*;
        for state in [
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
        ] {
            assert_eq!(decode(encode(state)), state);
        }
    }

    #[test]
    fn test_success_path() {
        for action in [Action::MoveShards, Action::RearrangeShards] {
            let state = AtomicState::new(NodeState::Init);
            state.transition(NodeState::Init, NodeState::Running).unwrap();
            state
                .transition(NodeState::Running, NodeState::preparing(action))
                .unwrap();
            state
                .transition(NodeState::preparing(action), NodeState::prepared(action))
                .unwrap();
            state
                .transition(NodeState::prepared(action), NodeState::processing(action))
                .unwrap();
            state
                .transition(NodeState::processing(action), NodeState::processed(action))
                .unwrap();
            state
                .transition(NodeState::processed(action), NodeState::applying(action))
                .unwrap();
            state
                .transition(NodeState::applying(action), NodeState::Running)
                .unwrap();
            assert_eq!(state.get(), NodeState::Running);
        }
    }

    #[test]
    fn test_wrong_current_state_fails_without_mutation() {
        let state = AtomicState::new(NodeState::Running);
        let err = state
            .transition(NodeState::MovePrepared, NodeState::MoveProcessing)
            .unwrap_err();
        assert!(matches!(err, Error::StateTransition(_)));
        assert_eq!(state.get(), NodeState::Running);
    }

    #[test]
    fn test_illegal_edge_rejected() {
        // Skipping phases is not allowed even from the right current state.
        let state = AtomicState::new(NodeState::MovePreparing);
        assert!(state
            .transition(NodeState::MovePreparing, NodeState::MoveApplying)
            .is_err());
        assert_eq!(state.get(), NodeState::MovePreparing);
    }

    #[test]
    fn test_applying_has_no_rollback_edge() {
        for action in [Action::MoveShards, Action::RearrangeShards] {
            let state = AtomicState::new(NodeState::applying(action));
            assert!(state
                .transition(NodeState::applying(action), NodeState::rolling_back(action))
                .is_err());
        }
    }

    #[test]
    fn test_dead_is_terminal() {
        let state = AtomicState::new(NodeState::Dead);
        assert!(state.transition(NodeState::Dead, NodeState::Running).is_err());
        assert!(allowed_transitions(NodeState::Dead).is_empty());
    }

    #[test]
    fn test_rollback_from_any_phase() {
        use NodeState::*;
        for from in [MovePreparing, MovePrepared, MoveProcessing, MoveProcessed] {
            let state = AtomicState::new(from);
            state
                .transition_any(
                    &[MovePreparing, MovePrepared, MoveProcessing, MoveProcessed],
                    MoveRollingBack,
                )
                .unwrap();
            assert_eq!(state.get(), MoveRollingBack);
        }
    }
}
