use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::core::ids::InstructionId;

/// Kind of lifecycle action an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    CustodianAssigned,
    CcpAssigned,
    NettingStarted,
    NettingCompleted,
    ProcessingStarted,
    Settled,
    Failed,
    RetryScheduled,
    Cancelled,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            EventType::Created => "CREATED",
            EventType::CustodianAssigned => "CUSTODIAN_ASSIGNED",
            EventType::CcpAssigned => "CCP_ASSIGNED",
            EventType::NettingStarted => "NETTING_STARTED",
            EventType::NettingCompleted => "NETTING_COMPLETED",
            EventType::ProcessingStarted => "PROCESSING_STARTED",
            EventType::Settled => "SETTLED",
            EventType::Failed => "FAILED",
            EventType::RetryScheduled => "RETRY_SCHEDULED",
            EventType::Cancelled => "CANCELLED",
        };
        write!(f, "{}", tag)
    }
}

/// Outcome tag attached to each recorded event.
///
/// A refused action is recorded with `Failed` outcome and the refusal
/// message, so audit history shows attempts as well as transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventOutcome {
    Processing,
    Success,
    Failed,
    Pending,
    Cancelled,
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            EventOutcome::Processing => "PROCESSING",
            EventOutcome::Success => "SUCCESS",
            EventOutcome::Failed => "FAILED",
            EventOutcome::Pending => "PENDING",
            EventOutcome::Cancelled => "CANCELLED",
        };
        write!(f, "{}", tag)
    }
}

/// One audit record for one lifecycle action on one instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementEvent {
    pub event_type: EventType,
    pub outcome: EventOutcome,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

impl SettlementEvent {
    pub fn new(event_type: EventType, outcome: EventOutcome, description: impl Into<String>) -> Self {
        Self {
            event_type,
            outcome,
            description: description.into(),
            occurred_at: Utc::now(),
        }
    }
}

impl fmt::Display for SettlementEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}: {}",
            self.occurred_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.event_type,
            self.outcome,
            self.description
        )
    }
}

/// Append-only audit history for all instructions, keyed by instruction ID.
///
/// Events live here rather than inside each instruction, so loading an
/// instruction never drags its full history along and history survives
/// the instruction being re-fetched or rebuilt.
///
/// # Examples
///
/// ```
/// use settlement_engine::core::event::{EventLog, EventOutcome, EventType, SettlementEvent};
/// use settlement_engine::core::ids::InstructionId;
///
/// let mut log = EventLog::new();
/// let id = InstructionId::generate();
/// log.record(id, SettlementEvent::new(EventType::Created, EventOutcome::Pending, "created"));
/// assert_eq!(log.for_instruction(id).len(), 1);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    entries: HashMap<InstructionId, Vec<SettlementEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to an instruction's history.
    pub fn record(&mut self, id: InstructionId, event: SettlementEvent) {
        self.entries.entry(id).or_default().push(event);
    }

    /// Full history for one instruction, oldest first. Empty slice if
    /// the instruction has never been seen.
    pub fn for_instruction(&self, id: InstructionId) -> &[SettlementEvent] {
        self.entries.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The most recent event for an instruction, if any.
    pub fn last_for(&self, id: InstructionId) -> Option<&SettlementEvent> {
        self.entries.get(&id).and_then(|events| events.last())
    }

    /// Number of instructions with at least one event.
    pub fn instruction_count(&self) -> usize {
        self.entries.len()
    }

    /// Total number of events across all instructions.
    pub fn total_events(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}
