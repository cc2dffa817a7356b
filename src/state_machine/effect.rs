//! Effects produced by state transitions

use crate::db::{ChatId, OperationKind};
use crate::replies::{Keyboard, OutboundMessage};
use crate::report::ReportRequest;
use crate::state_machine::event::Intent;
use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Effects to be executed after a state transition. Every effect except
/// `Reply` produces exactly one follow-up event.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a message on the outbound bus
    Reply(OutboundMessage),

    /// Ask the ledger whether the chat has a user
    CheckRegistration { intent: Intent },

    CreateUser { name: String },

    LoadRecentOperations { limit: usize },

    /// Ownership check for the update flow
    CheckOwnership { operation_id: i64 },

    CreateOperation {
        kind: OperationKind,
        amount: Decimal,
        date: NaiveDate,
    },

    UpdateAmount { operation_id: i64, amount: Decimal },

    BuildReport { request: ReportRequest },
}

impl Effect {
    pub fn reply(chat_id: ChatId, text: impl Into<String>) -> Self {
        Effect::Reply(OutboundMessage::new(chat_id, text))
    }

    pub fn reply_with_keyboard(
        chat_id: ChatId,
        text: impl Into<String>,
        keyboard: Keyboard,
    ) -> Self {
        Effect::Reply(OutboundMessage::new(chat_id, text).with_keyboard(keyboard))
    }

    /// Effects that write to the ledger
    #[allow(dead_code)] // Used by tests
    pub fn is_commit(&self) -> bool {
        matches!(
            self,
            Effect::CreateUser { .. } | Effect::CreateOperation { .. } | Effect::UpdateAmount { .. }
        )
    }
}
