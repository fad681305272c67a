//! Conformance checks over recorded signal logs.
//!
//! A pure walk over an ordered signal list verifying the stream
//! contract: monotonic ids and timestamps, causality references to
//! earlier ids only, balanced `provider:start`/`provider:end`
//! brackets, delta-before-complete text discipline, tool call/result
//! pairing, and well-formed known payloads. Used by tests and the
//! `recordings check` CLI against replay fixtures.

use orchid_domain::payload::causality_holds;
use orchid_domain::{KnownPayload, Signal, SignalId};

/// One contract violation at a log position.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    NonMonotonicId {
        position: usize,
        id: SignalId,
    },
    NonMonotonicTimestamp {
        position: usize,
    },
    CausalityOrder {
        position: usize,
        caused_by: SignalId,
        id: SignalId,
    },
    NestedProviderStart {
        position: usize,
    },
    EndWithoutStart {
        position: usize,
    },
    UnclosedProviderRun {
        start_position: usize,
    },
    TextDeltaAfterComplete {
        position: usize,
    },
    DuplicateTextComplete {
        position: usize,
    },
    OrphanToolResult {
        position: usize,
        tool_use_id: String,
    },
    OrphanToolProgress {
        position: usize,
        tool_use_id: String,
    },
    MalformedPayload {
        position: usize,
        name: String,
        error: String,
    },
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonMonotonicId { position, id } => {
                write!(f, "signal {position}: id {id} does not increase")
            }
            Self::NonMonotonicTimestamp { position } => {
                write!(f, "signal {position}: timestamp regresses")
            }
            Self::CausalityOrder {
                position,
                caused_by,
                id,
            } => write!(
                f,
                "signal {position}: causedBy {caused_by} is not earlier than {id}"
            ),
            Self::NestedProviderStart { position } => {
                write!(f, "signal {position}: provider:start inside an open run")
            }
            Self::EndWithoutStart { position } => {
                write!(f, "signal {position}: provider:end without a start")
            }
            Self::UnclosedProviderRun { start_position } => {
                write!(f, "provider run at {start_position} never ends")
            }
            Self::TextDeltaAfterComplete { position } => {
                write!(f, "signal {position}: text:delta after text:complete")
            }
            Self::DuplicateTextComplete { position } => {
                write!(f, "signal {position}: second text:complete in one run")
            }
            Self::OrphanToolResult {
                position,
                tool_use_id,
            } => write!(
                f,
                "signal {position}: tool:result without tool:call ({tool_use_id})"
            ),
            Self::OrphanToolProgress {
                position,
                tool_use_id,
            } => write!(
                f,
                "signal {position}: tool:progress without tool:call ({tool_use_id})"
            ),
            Self::MalformedPayload {
                position,
                name,
                error,
            } => write!(f, "signal {position}: malformed `{name}` payload: {error}"),
        }
    }
}

/// Walk a signal log and collect every violation.
pub fn check(signals: &[Signal]) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut last_id: Option<SignalId> = None;
    let mut last_timestamp = None;

    let mut run_start: Option<usize> = None;
    let mut text_completed = false;
    let mut open_tools: Vec<String> = Vec::new();

    for (position, signal) in signals.iter().enumerate() {
        if let Some(last) = last_id {
            if signal.id <= last {
                violations.push(Violation::NonMonotonicId {
                    position,
                    id: signal.id,
                });
            }
        }
        last_id = Some(signal.id);

        if let Some(last) = last_timestamp {
            if signal.timestamp < last {
                violations.push(Violation::NonMonotonicTimestamp { position });
            }
        }
        last_timestamp = Some(signal.timestamp);

        if !causality_holds(signal.caused_by, signal.id) {
            if let Some(caused_by) = signal.caused_by {
                violations.push(Violation::CausalityOrder {
                    position,
                    caused_by,
                    id: signal.id,
                });
            }
        }

        let payload = match KnownPayload::parse(&signal.name, &signal.payload) {
            Ok(payload) => payload,
            Err(malformed) => {
                violations.push(Violation::MalformedPayload {
                    position,
                    name: malformed.name,
                    error: malformed.error,
                });
                continue;
            }
        };

        match payload {
            KnownPayload::ProviderStart(_) => {
                if run_start.is_some() {
                    violations.push(Violation::NestedProviderStart { position });
                }
                run_start = Some(position);
                text_completed = false;
                open_tools.clear();
            }
            KnownPayload::ProviderEnd(_) => {
                if run_start.take().is_none() {
                    violations.push(Violation::EndWithoutStart { position });
                }
            }
            KnownPayload::TextDelta(_) if run_start.is_some() => {
                if text_completed {
                    violations.push(Violation::TextDeltaAfterComplete { position });
                }
            }
            KnownPayload::TextComplete(_) if run_start.is_some() => {
                if text_completed {
                    violations.push(Violation::DuplicateTextComplete { position });
                }
                text_completed = true;
            }
            KnownPayload::ToolCall(call) => {
                open_tools.push(call.tool_use_id);
            }
            KnownPayload::ToolProgress(progress) => {
                if !open_tools.contains(&progress.tool_use_id) {
                    violations.push(Violation::OrphanToolProgress {
                        position,
                        tool_use_id: progress.tool_use_id,
                    });
                }
            }
            KnownPayload::ToolResult(result) => {
                match open_tools.iter().position(|id| id == &result.tool_use_id) {
                    Some(index) => {
                        open_tools.remove(index);
                    }
                    None => {
                        violations.push(Violation::OrphanToolResult {
                            position,
                            tool_use_id: result.tool_use_id,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(start_position) = run_start {
        violations.push(Violation::UnclosedProviderRun { start_position });
    }

    violations
}
