//! External submission state for artifacts
//!
//! Each artifact carries two independent sub-machines, one per external
//! repository. Whether a sub-machine exists at all is fixed at creation:
//!
//! - EBI: NotSubmitted → Submitted, driven by writing run accessions.
//!   Submitted is terminal; accessions are written once, in aggregate.
//! - VAMPS: a plain boolean flag that may be flipped either way.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use lineage_common::StateError;

/// EBI run accessions keyed by sample id
pub type EbiRunAccessions = BTreeMap<String, String>;

/// A creation-time capability gating access to its state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "capability", content = "state", rename_all = "snake_case")]
pub enum Capability<S> {
    Unsupported,
    Supported(S),
}

impl<S> Capability<S> {
    /// Build from the stored capability flag; `state` is only loaded when
    /// the capability is present.
    pub fn from_flag(flag: bool, state: impl FnOnce() -> S) -> Self {
        if flag {
            Capability::Supported(state())
        } else {
            Capability::Unsupported
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Capability::Supported(_))
    }
}

/// EBI submission sub-machine
pub type EbiSubmission = Capability<EbiRunAccessions>;

/// VAMPS submission sub-machine
pub type VampsSubmission = Capability<bool>;

/// EBI submission states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EbiState {
    NotSubmitted,
    Submitted,
}

impl EbiState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted)
    }

    /// Get all valid next states from current state
    pub fn valid_transitions(&self) -> &'static [EbiState] {
        match self {
            Self::NotSubmitted => &[Self::Submitted],
            Self::Submitted => &[],
        }
    }
}

impl std::fmt::Display for EbiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotSubmitted => write!(f, "not_submitted"),
            Self::Submitted => write!(f, "submitted"),
        }
    }
}

/// Events that trigger EBI state transitions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EbiEvent {
    /// Run accessions received from EBI
    RecordAccessions,
}

impl std::fmt::Display for EbiEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RecordAccessions => write!(f, "record_accessions"),
        }
    }
}

/// EBI state machine
pub struct EbiStateMachine;

impl EbiStateMachine {
    /// Attempt a state transition
    pub fn transition(current: EbiState, event: EbiEvent) -> Result<EbiState, StateError> {
        if current.is_terminal() {
            return Err(StateError::TerminalState(current.to_string()));
        }

        match (current, event) {
            (EbiState::NotSubmitted, EbiEvent::RecordAccessions) => Ok(EbiState::Submitted),
            (EbiState::Submitted, _) => Err(StateError::InvalidTransition {
                from: current.to_string(),
                to: EbiState::Submitted.to_string(),
                event: event.to_string(),
            }),
        }
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition(current: EbiState, event: &EbiEvent) -> bool {
        Self::transition(current, *event).is_ok()
    }
}

impl EbiSubmission {
    /// Current EBI state; `Submitted` once any accession is recorded
    pub fn state(&self) -> Result<EbiState, StateError> {
        let accessions = self.run_accessions()?;
        Ok(if accessions.is_empty() {
            EbiState::NotSubmitted
        } else {
            EbiState::Submitted
        })
    }

    pub fn run_accessions(&self) -> Result<&EbiRunAccessions, StateError> {
        match self {
            Capability::Supported(accessions) => Ok(accessions),
            Capability::Unsupported => Err(StateError::Unsupported("EBI submission".to_string())),
        }
    }

    /// Whether deletion must be refused on EBI grounds
    pub fn blocks_deletion(&self) -> bool {
        matches!(self, Capability::Supported(accessions) if !accessions.is_empty())
    }

    /// Validate recording `accessions` and return the resulting state.
    ///
    /// The caller persists the accessions only when this succeeds.
    pub fn record(&self, accessions: &EbiRunAccessions) -> Result<EbiState, StateError> {
        let current = self.state()?;
        if accessions.is_empty() {
            return Err(StateError::GuardFailed(
                "at least one EBI run accession is required".to_string(),
            ));
        }
        EbiStateMachine::transition(current, EbiEvent::RecordAccessions)
    }
}

impl VampsSubmission {
    pub fn is_submitted(&self) -> Result<bool, StateError> {
        match self {
            Capability::Supported(submitted) => Ok(*submitted),
            Capability::Unsupported => {
                Err(StateError::Unsupported("VAMPS submission".to_string()))
            }
        }
    }

    /// Whether deletion must be refused on VAMPS grounds
    pub fn blocks_deletion(&self) -> bool {
        matches!(self, Capability::Supported(true))
    }

    /// Set the submitted flag; no history guard applies.
    pub fn set_submitted(&mut self, value: bool) -> Result<(), StateError> {
        match self {
            Capability::Supported(submitted) => {
                *submitted = value;
                Ok(())
            }
            Capability::Unsupported => {
                Err(StateError::Unsupported("VAMPS submission".to_string()))
            }
        }
    }
}
