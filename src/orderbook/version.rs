//! Version-continuity gate over the depth delta stream
//!
//! The aggregated depth feed is best-effort: frames may arrive late, ahead of
//! the bootstrap snapshot, or one-sided before the book is usable. The gate
//! decides per frame whether applying it keeps the replica coherent.
//!
//! `admit` is read-only and returns a plan; `record_applied` is the only
//! mutation point and runs after the book mutation succeeded, so a rejected
//! frame leaves both the book and the gate untouched.

use tracing::{debug, warn};

use crate::parser::DepthFrame;

/// Largest forward gap tolerated on the first frame after a snapshot.
const MAX_SNAPSHOT_GAP: i64 = 5000;
/// Largest forward gap tolerated between consecutive frames before realigning.
const MAX_STREAM_GAP: i64 = 100;
/// How far behind the expected version a frame may be before it is stale.
const MAX_STALE_GAP: i64 = 100;

/// How an admitted frame must be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Replace both ladders
    Snapshot,
    /// Per-level absolute updates
    Delta,
}

/// Why a frame was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateReject {
    /// First frame after a snapshot is too far ahead; applying it would leave
    /// unknown levels in the replica.
    FarAheadOfSnapshot { gap: i64 },
    /// Frame predates the current replica state.
    Stale { gap: i64 },
    /// One-sided delta while the book is not yet valid.
    OneSidedBootstrap,
}

impl std::fmt::Display for GateReject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateReject::FarAheadOfSnapshot { gap } => {
                write!(f, "{gap} versions ahead of snapshot baseline")
            }
            GateReject::Stale { gap } => write!(f, "{} versions behind expected", -gap),
            GateReject::OneSidedBootstrap => {
                write!(f, "one-sided delta before the book is valid")
            }
        }
    }
}

/// Admission plan for one frame
#[derive(Debug, Clone, Copy)]
pub struct GateOutcome {
    pub kind: FrameKind,
    /// Update id the book mutation should carry
    pub update_id: i64,
    to_version: Option<i64>,
    /// First-frame forward gap: move the snapshot baseline to `from - 1`
    adjust_snapshot_to: Option<i64>,
}

/// Continuity state for one symbol's delta stream
#[derive(Debug, Default)]
pub struct VersionGate {
    snapshot_version: i64,
    last_to_version: Option<i64>,
}

impl VersionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchor the gate to a freshly applied REST snapshot.
    pub fn reset_to_snapshot(&mut self, version: i64) {
        self.snapshot_version = version;
        self.last_to_version = None;
    }

    pub fn snapshot_version(&self) -> i64 {
        self.snapshot_version
    }

    pub fn last_to_version(&self) -> Option<i64> {
        self.last_to_version
    }

    /// Decide whether `frame` may be applied, given the book's current shape.
    ///
    /// Does not mutate the gate; pass the outcome to [`record_applied`] once
    /// the book mutation is done.
    ///
    /// [`record_applied`]: VersionGate::record_applied
    pub fn admit(
        &self,
        frame: &DepthFrame,
        book_empty: bool,
        book_valid: bool,
    ) -> Result<GateOutcome, GateReject> {
        let from = frame.from_version.as_deref().and_then(|v| v.parse::<i64>().ok());
        let to = frame.to_version.as_deref().and_then(|v| v.parse::<i64>().ok());

        let update_id = to
            .or(from)
            .or(frame.update_id)
            .unwrap_or(0);

        let kind = if book_empty && frame.has_both_sides() {
            FrameKind::Snapshot
        } else {
            FrameKind::Delta
        };

        let mut adjust_snapshot_to = None;

        if let (Some(from), Some(_to)) = (from, to) {
            match self.last_to_version {
                Some(last) => {
                    let expected = last + 1;
                    let gap = from - expected;
                    if gap > MAX_STREAM_GAP {
                        warn!(
                            gap,
                            expected,
                            from,
                            "large version gap in depth stream; realigning baseline, book may be stale"
                        );
                        // Realignment is implicit: last_to_version advances to
                        // this frame's to_version on record_applied.
                    } else if gap < -MAX_STALE_GAP {
                        return Err(GateReject::Stale { gap });
                    } else if gap != 0 {
                        debug!(gap, "tolerating small version gap");
                    }
                }
                None if self.snapshot_version > 0 => {
                    let expected = self.snapshot_version + 1;
                    let gap = from - expected;
                    if gap > MAX_SNAPSHOT_GAP {
                        return Err(GateReject::FarAheadOfSnapshot { gap });
                    } else if gap > 0 {
                        adjust_snapshot_to = Some(from - 1);
                    } else if gap < -MAX_STALE_GAP {
                        return Err(GateReject::Stale { gap });
                    }
                }
                None => {
                    // No snapshot baseline yet; adopt this frame as one.
                    if from > 0 {
                        adjust_snapshot_to = Some(from - 1);
                    }
                }
            }
        }

        if kind == FrameKind::Delta && !book_valid && !frame.has_both_sides() {
            return Err(GateReject::OneSidedBootstrap);
        }

        Ok(GateOutcome {
            kind,
            update_id,
            to_version: to,
            adjust_snapshot_to,
        })
    }

    /// Commit an admitted frame after the book mutation it describes is
    /// visible. `last_to_version` only ever advances here.
    pub fn record_applied(&mut self, outcome: &GateOutcome) {
        if let Some(baseline) = outcome.adjust_snapshot_to {
            self.snapshot_version = baseline;
        }
        if outcome.kind == FrameKind::Snapshot {
            self.snapshot_version = outcome.update_id;
        }
        if let Some(to) = outcome.to_version {
            self.last_to_version = Some(to);
        } else if outcome.update_id > 0 {
            self.last_to_version = Some(outcome.update_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PriceLevel;
    use rust_decimal_macros::dec;

    fn frame(from: Option<i64>, to: Option<i64>, bids: bool, asks: bool) -> DepthFrame {
        let level = vec![PriceLevel::new(dec!(100), dec!(1))];
        DepthFrame {
            bids: bids.then(|| level.clone()),
            asks: asks.then(|| level),
            from_version: from.map(|v| v.to_string()),
            to_version: to.map(|v| v.to_string()),
            update_id: None,
        }
    }

    fn gate_at_snapshot(version: i64) -> VersionGate {
        let mut gate = VersionGate::new();
        gate.reset_to_snapshot(version);
        gate
    }

    #[test]
    fn test_update_id_derivation() {
        let gate = gate_at_snapshot(1000);
        let outcome = gate
            .admit(&frame(Some(1001), Some(1005), true, true), false, true)
            .unwrap();
        assert_eq!(outcome.update_id, 1005);

        let mut no_to = frame(Some(1001), None, true, true);
        let outcome = gate.admit(&no_to, false, true).unwrap();
        assert_eq!(outcome.update_id, 1001);

        no_to.from_version = None;
        no_to.update_id = Some(77);
        let outcome = gate.admit(&no_to, false, true).unwrap();
        assert_eq!(outcome.update_id, 77);
    }

    #[test]
    fn test_empty_book_both_sides_is_snapshot() {
        let gate = VersionGate::new();
        let outcome = gate.admit(&frame(None, None, true, true), true, false).unwrap();
        assert_eq!(outcome.kind, FrameKind::Snapshot);

        let outcome = gate
            .admit(&frame(None, None, true, true), false, true)
            .unwrap();
        assert_eq!(outcome.kind, FrameKind::Delta);
    }

    #[test]
    fn test_first_frame_gap_boundaries() {
        // snapshot at 1000, expected from = 1001
        let gate = gate_at_snapshot(1000);

        // gap exactly 5000 accepted with baseline adjustment
        let outcome = gate
            .admit(&frame(Some(6001), Some(6002), true, true), false, true)
            .unwrap();
        assert_eq!(outcome.adjust_snapshot_to, Some(6000));

        // gap 5001 rejected
        let err = gate
            .admit(&frame(Some(6002), Some(6003), true, true), false, true)
            .unwrap_err();
        assert_eq!(err, GateReject::FarAheadOfSnapshot { gap: 5001 });

        // gap exactly -100 accepted
        assert!(gate
            .admit(&frame(Some(901), Some(902), true, true), false, true)
            .is_ok());

        // gap -101 rejected as stale
        let err = gate
            .admit(&frame(Some(900), Some(901), true, true), false, true)
            .unwrap_err();
        assert_eq!(err, GateReject::Stale { gap: -101 });

        // contiguous frame needs no adjustment
        let outcome = gate
            .admit(&frame(Some(1001), Some(1002), true, true), false, true)
            .unwrap();
        assert_eq!(outcome.adjust_snapshot_to, None);
    }

    #[test]
    fn test_subsequent_frame_gap_boundaries() {
        let mut gate = gate_at_snapshot(1000);
        let outcome = gate
            .admit(&frame(Some(1001), Some(1010), true, true), false, true)
            .unwrap();
        gate.record_applied(&outcome);
        assert_eq!(gate.last_to_version(), Some(1010));

        // expected from = 1011; gap 100 accepted
        assert!(gate
            .admit(&frame(Some(1111), Some(1112), true, true), false, true)
            .is_ok());

        // gap 101 accepted with realignment (no rejection)
        assert!(gate
            .admit(&frame(Some(1112), Some(1113), true, true), false, true)
            .is_ok());

        // gap -101 rejected as stale
        let err = gate
            .admit(&frame(Some(910), Some(911), true, true), false, true)
            .unwrap_err();
        assert_eq!(err, GateReject::Stale { gap: -101 });
    }

    #[test]
    fn test_reject_leaves_gate_unchanged() {
        let gate = gate_at_snapshot(1000);
        let _ = gate.admit(&frame(Some(7000), Some(7001), true, true), false, true);
        assert_eq!(gate.snapshot_version(), 1000);
        assert_eq!(gate.last_to_version(), None);
    }

    #[test]
    fn test_one_sided_delta_on_invalid_book_rejected() {
        let gate = VersionGate::new();
        let err = gate
            .admit(&frame(None, None, true, false), true, false)
            .unwrap_err();
        assert_eq!(err, GateReject::OneSidedBootstrap);

        // fine once the book is valid
        assert!(gate.admit(&frame(None, None, true, false), false, true).is_ok());
    }

    #[test]
    fn test_record_applied_advances_versions() {
        let mut gate = gate_at_snapshot(1000);

        // forward-gap first frame adopts the new baseline then the to_version
        let outcome = gate
            .admit(&frame(Some(1150), Some(1151), true, true), false, true)
            .unwrap();
        gate.record_applied(&outcome);
        assert_eq!(gate.snapshot_version(), 1149);
        assert_eq!(gate.last_to_version(), Some(1151));

        // frame without versions but with a positive update id still advances
        let mut bare = frame(None, None, true, true);
        bare.update_id = Some(1200);
        let outcome = gate.admit(&bare, false, true).unwrap();
        gate.record_applied(&outcome);
        assert_eq!(gate.last_to_version(), Some(1200));

        // zero update id leaves the cursor alone
        let bare = frame(None, None, true, true);
        let outcome = gate.admit(&bare, false, true).unwrap();
        gate.record_applied(&outcome);
        assert_eq!(gate.last_to_version(), Some(1200));
    }

    #[test]
    fn test_snapshot_kind_sets_snapshot_version() {
        let mut gate = VersionGate::new();
        let mut snap = frame(None, None, true, true);
        snap.update_id = Some(500);
        let outcome = gate.admit(&snap, true, false).unwrap();
        assert_eq!(outcome.kind, FrameKind::Snapshot);
        gate.record_applied(&outcome);
        assert_eq!(gate.snapshot_version(), 500);
        assert_eq!(gate.last_to_version(), Some(500));
    }
}
