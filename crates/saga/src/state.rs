//! Settlement state machine.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// The state of one settlement run.
///
/// State transitions:
/// ```text
/// DecidedAccept ──► StockAdjusted ──┐
///                                   ├──► StatusUpdated ──┬──► Notified ──► Terminal
/// DecidedReject ────────────────────┘                    └──────────────► Terminal
/// ```
///
/// A run that finds the order already terminal goes straight from a decided
/// state to `Terminal`. `StatusUpdated → Terminal` is taken when the
/// notification could not be published, which never fails the settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementState {
    DecidedAccept,
    DecidedReject,
    StockAdjusted,
    StatusUpdated,
    Notified,
    Terminal,
}

impl SettlementState {
    /// The entry state for a payment outcome.
    pub fn decided(accepted: bool) -> Self {
        if accepted {
            SettlementState::DecidedAccept
        } else {
            SettlementState::DecidedReject
        }
    }

    /// Returns true if the run may move from this state to `to`.
    pub fn can_transition_to(&self, to: SettlementState) -> bool {
        use SettlementState::*;
        matches!(
            (self, to),
            (DecidedAccept, StockAdjusted | Terminal)
                | (DecidedReject, StatusUpdated | Terminal)
                | (StockAdjusted, StatusUpdated)
                | (StatusUpdated, Notified | Terminal)
                | (Notified, Terminal)
        )
    }

    /// Returns true if this is the terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SettlementState::Terminal)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementState::DecidedAccept => "DECIDED_ACCEPT",
            SettlementState::DecidedReject => "DECIDED_REJECT",
            SettlementState::StockAdjusted => "STOCK_ADJUSTED",
            SettlementState::StatusUpdated => "STATUS_UPDATED",
            SettlementState::Notified => "NOTIFIED",
            SettlementState::Terminal => "TERMINAL",
        }
    }
}

impl std::fmt::Display for SettlementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The states a settlement run passed through, in order.
///
/// The coordinator keeps no persistent state; the trail only describes the
/// current run and is returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettlementTrail(Vec<SettlementState>);

impl SettlementTrail {
    /// Starts a trail at the decided state for `accepted`.
    pub fn start(accepted: bool) -> Self {
        Self(vec![SettlementState::decided(accepted)])
    }

    /// Returns the latest state.
    pub fn current(&self) -> SettlementState {
        // The trail is never empty: it is created with an entry state.
        self.0
            .last()
            .copied()
            .unwrap_or(SettlementState::Terminal)
    }

    /// Records a transition, rejecting moves the state machine forbids.
    pub fn advance(&mut self, to: SettlementState) -> Result<()> {
        let from = self.current();
        if !from.can_transition_to(to) {
            return Err(SagaError::InvalidState { from, to });
        }
        self.0.push(to);
        Ok(())
    }

    pub fn states(&self) -> &[SettlementState] {
        &self.0
    }

    pub fn contains(&self, state: SettlementState) -> bool {
        self.0.contains(&state)
    }
}
