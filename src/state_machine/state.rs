//! Conversation flow state types

use crate::currency::Currency;
use crate::db::{ChatId, OperationKind};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// Per-flow steps
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum RegistrationStep {
    WaitingForName,
}

/// Each step carries what the earlier steps collected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum AddOperationStep {
    WaitingForType,
    WaitingForAmount {
        kind: OperationKind,
    },
    WaitingForDate {
        kind: OperationKind,
        amount: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum UpdateOperationStep {
    WaitingForOperationId,
    /// The id has already passed the ownership check
    WaitingForNewAmount { operation_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ReportStep {
    WaitingForCurrency,
    WaitingForPeriod { currency: Currency },
}

// ============================================================================
// Flow State
// ============================================================================

/// What a chat is currently doing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "flow", rename_all = "snake_case")]
pub enum FlowState {
    /// No flow active, top-level commands accepted
    #[default]
    Idle,

    Registration { step: RegistrationStep },

    AddOperation { step: AddOperationStep },

    UpdateOperation { step: UpdateOperationStep },

    Report { step: ReportStep },
}

impl FlowState {
    pub fn is_idle(&self) -> bool {
        matches!(self, FlowState::Idle)
    }

    /// Flow name for logging
    pub fn flow_name(&self) -> &'static str {
        match self {
            FlowState::Idle => "idle",
            FlowState::Registration { .. } => "registration",
            FlowState::AddOperation { .. } => "add_operation",
            FlowState::UpdateOperation { .. } => "update_operation",
            FlowState::Report { .. } => "report",
        }
    }

    /// Step name for logging
    pub fn step_name(&self) -> &'static str {
        match self {
            FlowState::Idle => "none",
            FlowState::Registration {
                step: RegistrationStep::WaitingForName,
            } => "waiting_for_name",
            FlowState::AddOperation { step } => match step {
                AddOperationStep::WaitingForType => "waiting_for_type",
                AddOperationStep::WaitingForAmount { .. } => "waiting_for_amount",
                AddOperationStep::WaitingForDate { .. } => "waiting_for_date",
            },
            FlowState::UpdateOperation { step } => match step {
                UpdateOperationStep::WaitingForOperationId => "waiting_for_operation_id",
                UpdateOperationStep::WaitingForNewAmount { .. } => "waiting_for_new_amount",
            },
            FlowState::Report { step } => match step {
                ReportStep::WaitingForCurrency => "waiting_for_currency",
                ReportStep::WaitingForPeriod { .. } => "waiting_for_period",
            },
        }
    }
}

// ============================================================================
// Chat Context
// ============================================================================

/// Facts about the message being handled (immutable during a transition)
#[derive(Debug, Clone)]
pub struct ChatContext {
    pub chat_id: ChatId,
    /// Local wall-clock time the message is handled at
    pub now: NaiveDateTime,
    /// Display name supplied by the transport, offered during registration
    pub sender_name: Option<String>,
}

impl ChatContext {
    pub fn new(chat_id: ChatId, now: NaiveDateTime) -> Self {
        Self {
            chat_id,
            now,
            sender_name: None,
        }
    }

    pub fn with_sender_name(mut self, name: Option<String>) -> Self {
        self.sender_name = name.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date()
    }
}
