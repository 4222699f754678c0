// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Stack-depth lattice for the verifier. Depth is tracked in bytes
//! relative to function entry; Unknown and Untracked are sticky once
//! reached.

use crate::z80::StackDelta;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    /// Entry-relative depth in bytes.
    Known(i32),
    /// A join saw two different Known depths. No numbers survive.
    Unknown,
    /// SP was written by a non-modeled instruction (`ld sp, hl`).
    Untracked,
}

/// What a control-flow join has to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeReport {
    Clean,
    /// Two distinct Known depths met; the result degrades to Unknown.
    Mismatch(i32, i32),
    /// At least one side was already Unknown.
    AlreadyUnknown,
}

impl Depth {
    pub fn apply(self, delta: StackDelta) -> Depth {
        match (self, delta) {
            (_, StackDelta::Untracked) => Depth::Untracked,
            (Depth::Known(n), StackDelta::Net(d)) => Depth::Known(n + d),
            (sticky, StackDelta::Net(_)) => sticky,
        }
    }

    /// Join two predecessor states. Untracked absorbs silently (the
    /// boundary diagnostic carries the blame); Unknown absorbs loudly.
    pub fn merge(a: Depth, b: Depth) -> (Depth, MergeReport) {
        match (a, b) {
            (Depth::Untracked, _) | (_, Depth::Untracked) => {
                (Depth::Untracked, MergeReport::Clean)
            }
            (Depth::Unknown, _) | (_, Depth::Unknown) => {
                (Depth::Unknown, MergeReport::AlreadyUnknown)
            }
            (Depth::Known(x), Depth::Known(y)) if x == y => (Depth::Known(x), MergeReport::Clean),
            (Depth::Known(x), Depth::Known(y)) => (Depth::Unknown, MergeReport::Mismatch(x, y)),
        }
    }

    /// Classify this state against the depth a boundary requires.
    pub fn fault_against(self, required: i32) -> Option<BoundaryFault> {
        match self {
            Depth::Untracked => Some(BoundaryFault::Untracked),
            Depth::Unknown => Some(BoundaryFault::Unknown),
            Depth::Known(n) if n != required => Some(BoundaryFault::NonZero(n - required)),
            Depth::Known(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryFault {
    Untracked,
    Unknown,
    NonZero(i32),
}

/// Message for a faulted join, if the report warrants one.
pub fn join_message(kind: &str, report: MergeReport) -> Option<String> {
    match report {
        MergeReport::Clean => None,
        MergeReport::Mismatch(a, b) => {
            Some(format!("Stack depth mismatch at {kind} ({a} vs {b})"))
        }
        MergeReport::AlreadyUnknown => Some(format!(
            "Cannot verify stack depth at {kind} due to unknown stack state"
        )),
    }
}

/// Message for a faulted exit boundary. `subject` names the boundary:
/// "Return", "Function fallthrough", "Call", "Rst", or a typed-call /
/// op-expansion phrase carrying its symbol.
pub fn boundary_message(subject: &str, fault: BoundaryFault) -> String {
    match fault {
        BoundaryFault::Untracked => {
            format!("{subject} reached after untracked SP mutation; cannot verify stack depth")
        }
        BoundaryFault::Unknown => {
            format!("{subject} reached with unknown stack depth; cannot verify stack cleanup")
        }
        BoundaryFault::NonZero(n) => {
            format!("{subject} with non-zero tracked stack delta ({n})")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn push_pop_round_trips() {
        let d = Depth::Known(0)
            .apply(StackDelta::Net(2))
            .apply(StackDelta::Net(2))
            .apply(StackDelta::Net(-2));
        assert_eq!(d, Depth::Known(2));
        assert_eq!(d.fault_against(0), Some(BoundaryFault::NonZero(2)));
        assert_eq!(d.apply(StackDelta::Net(-2)).fault_against(0), None);
    }

    #[test]
    fn untracked_write_is_sticky() {
        let d = Depth::Known(4).apply(StackDelta::Untracked);
        assert_eq!(d, Depth::Untracked);
        assert_eq!(d.apply(StackDelta::Net(-2)), Depth::Untracked);
        assert_eq!(d.fault_against(0), Some(BoundaryFault::Untracked));
    }

    #[test]
    fn mismatched_join_degrades_to_unknown() {
        let (d, report) = Depth::merge(Depth::Known(2), Depth::Known(0));
        assert_eq!(d, Depth::Unknown);
        assert_eq!(report, MergeReport::Mismatch(2, 0));
        assert_eq!(
            join_message("if/else join", report).as_deref(),
            Some("Stack depth mismatch at if/else join (2 vs 0)")
        );

        // The next join carries no numbers.
        let (d, report) = Depth::merge(d, Depth::Known(0));
        assert_eq!(d, Depth::Unknown);
        assert_eq!(
            join_message("while back-edge", report).as_deref(),
            Some("Cannot verify stack depth at while back-edge due to unknown stack state")
        );
    }

    #[test]
    fn untracked_joins_quietly() {
        let (d, report) = Depth::merge(Depth::Untracked, Depth::Known(0));
        assert_eq!(d, Depth::Untracked);
        assert_eq!(report, MergeReport::Clean);
        assert_eq!(join_message("select join", report), None);
    }

    #[test]
    fn boundary_messages() {
        assert_eq!(
            boundary_message("Return", BoundaryFault::NonZero(2)),
            "Return with non-zero tracked stack delta (2)"
        );
        assert_eq!(
            boundary_message("Typed call \"draw\"", BoundaryFault::Untracked),
            "Typed call \"draw\" reached after untracked SP mutation; cannot verify stack depth"
        );
        assert_eq!(
            boundary_message("Function fallthrough", BoundaryFault::Unknown),
            "Function fallthrough reached with unknown stack depth; cannot verify stack cleanup"
        );
    }

    fn arb_depth() -> impl Strategy<Value = Depth> {
        prop_oneof![
            (-64i32..64).prop_map(Depth::Known),
            Just(Depth::Unknown),
            Just(Depth::Untracked),
        ]
    }

    proptest! {
        #[test]
        fn merge_is_commutative(a in arb_depth(), b in arb_depth()) {
            let (ab, _) = Depth::merge(a, b);
            let (ba, _) = Depth::merge(b, a);
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn merge_is_idempotent(a in arb_depth()) {
            let (aa, report) = Depth::merge(a, a);
            prop_assert_eq!(aa, a);
            if matches!(a, Depth::Known(_)) {
                prop_assert_eq!(report, MergeReport::Clean);
            }
        }

        #[test]
        fn untracked_absorbs_everything(a in arb_depth()) {
            let (d, report) = Depth::merge(a, Depth::Untracked);
            prop_assert_eq!(d, Depth::Untracked);
            prop_assert_eq!(report, MergeReport::Clean);
        }

        #[test]
        fn sticky_states_ignore_net_deltas(delta in -8i32..8) {
            prop_assert_eq!(Depth::Unknown.apply(StackDelta::Net(delta)), Depth::Unknown);
            prop_assert_eq!(Depth::Untracked.apply(StackDelta::Net(delta)), Depth::Untracked);
        }

        #[test]
        fn known_depth_accumulates(start in -32i32..32, delta in -8i32..8) {
            prop_assert_eq!(
                Depth::Known(start).apply(StackDelta::Net(delta)),
                Depth::Known(start + delta)
            );
        }
    }
}
