use std::fmt;

use serde::{Deserialize, Serialize};

/// The states of the upload orchestrator.
///
/// Each job flows through: IDLE → WAITING_FOR_HOST_READY →
/// WAITING_FOR_DEPENDENCY_READY → PREFLIGHT_CONSENT → PUBLISHING →
/// SUCCEEDED | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Idle,
    WaitingForHostReady,
    WaitingForDependencyReady,
    PreflightConsent,
    Publishing,
    Succeeded,
    Failed,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Succeeded | State::Failed)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Idle => write!(f, "IDLE"),
            State::WaitingForHostReady => write!(f, "WAITING_FOR_HOST_READY"),
            State::WaitingForDependencyReady => write!(f, "WAITING_FOR_DEPENDENCY_READY"),
            State::PreflightConsent => write!(f, "PREFLIGHT_CONSENT"),
            State::Publishing => write!(f, "PUBLISHING"),
            State::Succeeded => write!(f, "SUCCEEDED"),
            State::Failed => write!(f, "FAILED"),
        }
    }
}

/// Something that happened while the orchestrator was in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A fresh job was persisted.
    Started,
    /// A pending record from an earlier run was found.
    Resumed,
    HostActivated,
    BuilderReady,
    ConsentConfirmed,
    Published,
    /// Any step failed for good.
    Failed,
}

/// The result of evaluating a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Advance to a non-terminal state.
    Next(State),
    /// Reach a terminal state.
    Complete(State),
    /// The event is not legal in the current state.
    Invalid { state: State, event: Event },
}

/// Pure transition table for the orchestrator.
pub struct StateMachine;

impl StateMachine {
    /// Compute the transition for `event` observed in `state`.
    ///
    /// `Failed` is legal from every state between start and a terminal
    /// outcome; terminal states accept nothing.
    pub fn next(state: State, event: Event) -> Transition {
        use Event as E;
        use State as S;

        match (state, event) {
            (S::Idle, E::Started | E::Resumed) => Transition::Next(S::WaitingForHostReady),
            (S::WaitingForHostReady, E::HostActivated) => {
                Transition::Next(S::WaitingForDependencyReady)
            }
            (S::WaitingForDependencyReady, E::BuilderReady) => {
                Transition::Next(S::PreflightConsent)
            }
            (S::PreflightConsent, E::ConsentConfirmed) => Transition::Next(S::Publishing),
            (S::Publishing, E::Published) => Transition::Complete(S::Succeeded),
            (
                S::WaitingForHostReady
                | S::WaitingForDependencyReady
                | S::PreflightConsent
                | S::Publishing,
                E::Failed,
            ) => Transition::Complete(S::Failed),
            (state, event) => Transition::Invalid { state, event },
        }
    }
}
