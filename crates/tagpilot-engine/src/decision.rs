//! Pure upgrade decision and reconciliation state machine
//!
//! No I/O happens here. The runtime feeds observations and events in and
//! executes the returned actions.
//!
//! - `should_upgrade` compares the candidate against the applied release
//! - `transition(state, event) -> (state, actions)` drives one cycle
//! - Invalid transitions go to `Aborting` (never panic)

use std::cmp::Ordering;
use tagpilot_core::{tag, Result};

/// What the runtime knows about the candidate and the applied release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation<'a> {
    pub candidate_tag: &'a str,
    pub candidate_commit: Option<&'a str>,
    pub applied_tag: &'a str,
    pub applied_commit: Option<&'a str>,
    pub prefix: &'a str,
}

/// Why an upgrade is due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeReason {
    /// The candidate decodes higher than the applied tag
    NewerVersion,
    /// Same tag, but it now points at a different commit
    TagMoved,
}

/// Decide whether the candidate must be released.
///
/// A candidate without a commit (nothing in the repository carries that tag)
/// is never released. Equal tags trigger only when both commits are known
/// and differ.
pub fn should_upgrade(obs: &Observation<'_>) -> Result<Option<UpgradeReason>> {
    let Some(candidate_commit) = obs.candidate_commit else {
        return Ok(None);
    };

    match tag::compare(obs.candidate_tag, obs.applied_tag, obs.prefix)? {
        Ordering::Greater => Ok(Some(UpgradeReason::NewerVersion)),
        Ordering::Equal => {
            let moved = obs.candidate_tag == obs.applied_tag
                && obs
                    .applied_commit
                    .is_some_and(|applied| applied != candidate_commit);
            Ok(moved.then_some(UpgradeReason::TagMoved))
        }
        Ordering::Less => Ok(None),
    }
}

/// Reconciliation state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Between cycles
    Idle,
    /// Refreshing tags and comparing against the applied release
    Evaluating,
    /// Running the release pipeline for a candidate
    Upgrading { candidate: String },
    /// Unrecoverable; the job stops
    Aborting { error: String },
}

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CycleStarted,
    Evaluated {
        candidate: String,
        upgrade: Option<UpgradeReason>,
    },
    EvaluationFailed { message: String },
    /// Release applied and persisted
    ReleaseCommitted,
    /// Release not ready yet; retry budget remains
    ReleasePending { attempts: u32 },
    ReleaseFailed { message: String },
}

/// Actions to execute as side effects of transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    RunPipeline {
        candidate: String,
        reason: UpgradeReason,
    },
    Log { message: String },
    Abort { error: String },
}

/// Pure state transition function
pub fn transition(state: State, event: Event) -> (State, Vec<Action>) {
    match (state, event) {
        (State::Idle, Event::CycleStarted) => (State::Evaluating, vec![]),

        (State::Evaluating, Event::Evaluated { candidate, upgrade: None }) => (
            State::Idle,
            vec![Action::Log {
                message: format!("{} is current, nothing to do", candidate),
            }],
        ),

        (
            State::Evaluating,
            Event::Evaluated {
                candidate,
                upgrade: Some(reason),
            },
        ) => {
            let actions = vec![
                Action::Log {
                    message: format!("Releasing {} ({:?})", candidate, reason),
                },
                Action::RunPipeline {
                    candidate: candidate.clone(),
                    reason,
                },
            ];
            (State::Upgrading { candidate }, actions)
        }

        (State::Upgrading { candidate }, Event::ReleaseCommitted) => (
            State::Idle,
            vec![Action::Log {
                message: format!("Release {} committed", candidate),
            }],
        ),

        (State::Upgrading { candidate }, Event::ReleasePending { attempts }) => (
            State::Idle,
            vec![Action::Log {
                message: format!(
                    "Release {} not applied yet (attempt {}), retrying next cycle",
                    candidate, attempts
                ),
            }],
        ),

        (State::Evaluating, Event::EvaluationFailed { message })
        | (State::Upgrading { .. }, Event::ReleaseFailed { message }) => (
            State::Aborting {
                error: message.clone(),
            },
            vec![Action::Abort { error: message }],
        ),

        (State::Aborting { error }, _) => (State::Aborting { error }, vec![]),

        (state, event) => {
            let error = format!("Invalid transition: {:?} + {:?}", state, event);
            (
                State::Aborting {
                    error: error.clone(),
                },
                vec![Action::Abort { error }],
            )
        }
    }
}
