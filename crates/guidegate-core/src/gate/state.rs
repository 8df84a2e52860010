//! ============================================================================
//! Gate State - Per-request state machine for the delivery gate
//! ============================================================================
//! Idle ──request──▶ AwaitingDecision ──▶ Blocked
//!                                    └──▶ Delivering ──▶ Delivered | Failed
//! Blocked ──recheck──▶ AwaitingDecision (same paths as above)
//! ============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::ledger::DeliveryReceipt;
use crate::types::UserId;

/// Callback data for the "request asset" button
pub const REQUEST_ASSET: &str = "request_asset";
/// Callback data for the "I've subscribed" button
pub const RECHECK_MEMBERSHIP: &str = "recheck_membership";

/// Gate states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Idle,
    AwaitingDecision,
    Blocked,
    Delivering,
    Delivered,
    Failed,
}

impl GateState {
    pub fn can_transition_to(&self, next: GateState) -> bool {
        use GateState::*;
        matches!(
            (self, next),
            (Idle, AwaitingDecision)
                | (Blocked, AwaitingDecision)
                | (AwaitingDecision, Blocked)
                | (AwaitingDecision, Delivering)
                | (Delivering, Delivered)
                | (Delivering, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GateState::Blocked | GateState::Delivered | GateState::Failed)
    }
}

/// User actions arriving as callback data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    RequestAsset,
    RecheckMembership,
}

impl GateAction {
    /// Parse callback data; `download` / `check` are older button payloads
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            REQUEST_ASSET | "download" => Some(GateAction::RequestAsset),
            RECHECK_MEMBERSHIP | "check" => Some(GateAction::RecheckMembership),
            _ => None,
        }
    }
}

/// Why a request ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Asset file absent or unreadable
    AssetMissing,
    /// The platform rejected the upload
    Transport,
    /// Delivered, but the ledger could not record it
    Storage,
}

/// Terminal result of one gate run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Not eligible. `notice_only` when a recheck left the prompt in place.
    Blocked { notice_only: bool },
    Delivered(DeliveryReceipt),
    Failed(FailureReason),
}

impl GateOutcome {
    pub fn state(&self) -> GateState {
        match self {
            GateOutcome::Blocked { .. } => GateState::Blocked,
            GateOutcome::Delivered(_) => GateState::Delivered,
            GateOutcome::Failed(_) => GateState::Failed,
        }
    }
}

/// Outcome plus the states visited on the way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateReport {
    pub outcome: GateOutcome,
    pub trail: Vec<GateState>,
}

/// One running instance of the machine, scoped to a single request
#[derive(Debug)]
pub(crate) struct GateRun {
    user: UserId,
    trail: Vec<GateState>,
}

impl GateRun {
    pub(crate) fn start(user: UserId, initial: GateState) -> Self {
        Self {
            user,
            trail: vec![initial],
        }
    }

    pub(crate) fn state(&self) -> GateState {
        self.trail.last().copied().unwrap_or(GateState::Idle)
    }

    /// Move to `next`. Illegal transitions are refused and leave the run as is.
    pub(crate) fn advance(&mut self, next: GateState) -> bool {
        let current = self.state();
        if !current.can_transition_to(next) {
            warn!("Illegal gate transition for {}: {:?} -> {:?}", self.user, current, next);
            return false;
        }
        debug!("Gate {}: {:?} -> {:?}", self.user, current, next);
        self.trail.push(next);
        true
    }

    pub(crate) fn finish(mut self, outcome: GateOutcome) -> GateReport {
        let terminal = outcome.state();
        if self.state() != terminal {
            self.advance(terminal);
        }
        GateReport {
            outcome,
            trail: self.trail,
        }
    }
}
