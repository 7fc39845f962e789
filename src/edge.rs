use crate::{
    graph::RunScope,
    sync::{AtomicI32, AtomicU8, Ordering},
    types::{SlotId, VertexId},
};
use tracing::trace;

const GATE_UNKNOWN: u8 = 0;
const GATE_OPEN: u8 = 1;
const GATE_CLOSED: u8 = 2;

/// What an edge has to do after a transition of its counter.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Action {
    /// The edge is resolved: release one unit of the consumer's wait count.
    Fire,
    /// Only the data is missing: pull the data slot into the run.
    PullData,
    /// The condition is missing: pull the condition slot into the run.
    PullCondition,
    /// Another arrival is still due.
    Wait,
}

/// Lock-free resolution state of one edge.
///
/// `pending` starts at zero each run and only moves by atomic add/sub.
/// Activation adds one unit per input the edge needs (data, plus the
/// condition for a gated edge); every arrival subtracts one. A false
/// condition subtracts two, since the data no longer matters. Arrivals may
/// come before activation and drive the counter negative, so the edge fires
/// on whichever transition brings it to zero or below from activation.
#[derive(Debug)]
pub(crate) struct EdgeState {
    pending: AtomicI32,
    gate: AtomicU8,
}

impl Default for EdgeState {
    fn default() -> Self {
        Self {
            pending: AtomicI32::new(0),
            gate: AtomicU8::new(GATE_UNKNOWN),
        }
    }
}

impl EdgeState {
    pub(crate) fn activate(&self, gated: bool) -> (i32, Action) {
        let num = if gated { 2 } else { 1 };
        let pending = self.pending.fetch_add(num, Ordering::AcqRel) + num;
        let action = match pending {
            ..=0 => Action::Fire,
            1 if !gated => Action::PullData,
            // One input already arrived: the condition (open), the data, or a
            // closed condition halfway through its double decrement.
            1 => match self.gate.load(Ordering::Acquire) {
                GATE_OPEN => Action::PullData,
                GATE_CLOSED => Action::Wait,
                _ => Action::PullCondition,
            },
            2 => Action::PullCondition,
            _ => unreachable!("EdgeState::activate: pending = {pending}"),
        };
        (pending, action)
    }

    pub(crate) fn data_arrived(&self) -> (i32, Action) {
        let pending = self.pending.fetch_sub(1, Ordering::AcqRel) - 1;
        let action = if pending == 0 { Action::Fire } else { Action::Wait };
        (pending, action)
    }

    pub(crate) fn condition_arrived(&self, open: bool) -> (i32, Action) {
        self.gate.store(
            if open { GATE_OPEN } else { GATE_CLOSED },
            Ordering::Release,
        );
        let pending = self.pending.fetch_sub(1, Ordering::AcqRel) - 1;
        if pending == 0 {
            return (pending, Action::Fire);
        }
        if !open {
            let pending = self.pending.fetch_sub(1, Ordering::AcqRel) - 1;
            let action = if pending == 0 { Action::Fire } else { Action::Wait };
            return (pending, action);
        }
        // Activated and still waiting for the data only.
        let action = if pending == 1 { Action::PullData } else { Action::Wait };
        (pending, action)
    }

    /// Whether a condition closed this edge in the current run.
    pub(crate) fn is_closed(&self) -> bool {
        self.gate.load(Ordering::Acquire) == GATE_CLOSED
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> i32 {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn reset(&self) {
        self.pending.store(0, Ordering::Relaxed);
        self.gate.store(GATE_UNKNOWN, Ordering::Relaxed);
    }
}

/// Dependency of a consuming vertex on a data slot, optionally gated by a
/// condition slot.
#[derive(Debug)]
pub(crate) struct Edge {
    consumer: VertexId,
    data: SlotId,
    condition: Option<SlotId>,
    optional: bool,
    state: EdgeState,
}

impl Edge {
    pub(crate) fn new(
        consumer: VertexId,
        data: SlotId,
        condition: Option<SlotId>,
        optional: bool,
    ) -> Self {
        Self {
            consumer,
            data,
            condition,
            optional,
            state: EdgeState::default(),
        }
    }

    pub(crate) fn data(&self) -> SlotId {
        self.data
    }

    pub(crate) fn is_optional(&self) -> bool {
        self.optional
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.condition.is_some() && self.state.is_closed()
    }

    pub(crate) fn activate(&self, scope: RunScope<'_>, frontier: &mut Vec<VertexId>) {
        let (pending, action) = self.state.activate(self.condition.is_some());
        trace!(consumer = %self.consumer, data = %self.data, pending, ?action, "edge activated");
        match action {
            Action::Fire => scope.fire(self.consumer),
            Action::PullData => scope.graph.slot(self.data).activate(scope, frontier),
            Action::PullCondition => {
                let condition = self.condition.expect("Edge::activate");
                scope.graph.slot(condition).activate(scope, frontier);
            }
            Action::Wait => {}
        }
    }

    pub(crate) fn data_arrived(&self, scope: RunScope<'_>) {
        let (pending, action) = self.state.data_arrived();
        trace!(consumer = %self.consumer, data = %self.data, pending, "edge data arrived");
        if action == Action::Fire {
            scope.fire(self.consumer);
        }
    }

    pub(crate) fn condition_arrived(&self, scope: RunScope<'_>, open: bool) {
        let (pending, action) = self.state.condition_arrived(open);
        trace!(consumer = %self.consumer, data = %self.data, open, pending, ?action, "edge condition arrived");
        match action {
            Action::Fire => scope.fire(self.consumer),
            Action::PullData => {
                scope.activate_and_dispatch(self.data);
            }
            Action::PullCondition | Action::Wait => {}
        }
    }

    pub(crate) fn reset(&self) {
        self.state.reset();
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Activate,
        Data,
        Condition(bool),
    }

    /// Replays `steps` on a fresh edge and returns the actions taken.
    fn replay(gated: bool, steps: &[Step]) -> Vec<Action> {
        let state = EdgeState::default();
        steps
            .iter()
            .map(|step| match *step {
                Step::Activate => state.activate(gated).1,
                Step::Data => state.data_arrived().1,
                Step::Condition(open) => state.condition_arrived(open).1,
            })
            .collect()
    }

    fn fires(actions: &[Action]) -> usize {
        actions.iter().filter(|a| **a == Action::Fire).count()
    }

    #[test]
    fn activate_then_true_condition_then_data() {
        let state = EdgeState::default();
        assert_eq!(state.activate(true), (2, Action::PullCondition));
        assert_eq!(state.condition_arrived(true), (1, Action::PullData));
        assert_eq!(state.data_arrived(), (0, Action::Fire));
    }

    #[test]
    fn false_condition_before_activation() {
        let state = EdgeState::default();
        assert_eq!(state.condition_arrived(false), (-2, Action::Wait));
        assert_eq!(state.pending(), -2);
        assert_eq!(state.activate(true), (0, Action::Fire));
    }

    #[test]
    fn data_and_false_condition_before_activation() {
        let state = EdgeState::default();
        assert_eq!(state.data_arrived(), (-1, Action::Wait));
        assert_eq!(state.condition_arrived(false), (-3, Action::Wait));
        assert_eq!(state.activate(true), (-1, Action::Fire));
    }

    #[test]
    fn data_before_activation_pulls_the_condition() {
        let state = EdgeState::default();
        assert_eq!(state.data_arrived(), (-1, Action::Wait));
        assert_eq!(state.activate(true), (1, Action::PullCondition));
        assert_eq!(state.condition_arrived(true), (0, Action::Fire));
    }

    #[test]
    fn true_condition_before_activation_pulls_the_data() {
        let state = EdgeState::default();
        assert_eq!(state.condition_arrived(true), (-1, Action::Wait));
        assert_eq!(state.activate(true), (1, Action::PullData));
        assert_eq!(state.data_arrived(), (0, Action::Fire));
    }

    #[test]
    fn false_condition_after_activation_short_circuits() {
        let actions = replay(true, &[Step::Activate, Step::Condition(false), Step::Data]);
        assert_eq!(
            actions,
            [Action::PullCondition, Action::Fire, Action::Wait],
            "the data producer is never pulled"
        );
    }

    #[test]
    fn ungated_orders() {
        assert_eq!(
            replay(false, &[Step::Activate, Step::Data]),
            [Action::PullData, Action::Fire]
        );
        assert_eq!(
            replay(false, &[Step::Data, Step::Activate]),
            [Action::Wait, Action::Fire]
        );
    }

    #[test]
    fn every_gated_order_fires_exactly_once() {
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for open in [true, false] {
            let events = [Step::Activate, Step::Data, Step::Condition(open)];
            for order in orders {
                let steps = order.map(|i| events[i]);
                let actions = replay(true, &steps);
                assert_eq!(fires(&actions), 1, "{steps:?} -> {actions:?}");
                if !open {
                    assert!(
                        !actions.contains(&Action::PullData),
                        "closed gate pulled data: {steps:?} -> {actions:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn closed_gate_is_visible_until_reset() {
        let state = EdgeState::default();
        state.activate(true);
        state.condition_arrived(false);
        assert!(state.is_closed());
        state.reset();
        assert!(!state.is_closed());
        assert_eq!(state.pending(), 0);
    }
}
