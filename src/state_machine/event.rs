//! Events that can occur in a chat

use crate::db::{Operation, User};
use crate::report::Report;

/// Top-level action waiting on the registration check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Start,
    Register,
    AddOperation,
    UpdateOperation,
}

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // Inbound bus
    UserMessage {
        text: String,
    },

    // Ledger results
    RegistrationChecked {
        intent: Intent,
        registered: bool,
    },
    UserCreated {
        user: User,
    },
    UserAlreadyExists,
    RecentOperationsLoaded {
        operations: Vec<Operation>,
    },
    OwnershipChecked {
        operation_id: i64,
        owned: bool,
    },
    OperationCreated {
        operation: Operation,
    },
    OperationUpdated {
        operation: Operation,
    },
    /// The update matched no row owned by this chat
    OperationNotFound,

    // Report generator
    ReportReady {
        report: Report,
    },

    /// Ledger unreachable or too slow
    DependencyFailed,
}

impl Event {
    pub fn user_message(text: impl Into<String>) -> Self {
        Event::UserMessage { text: text.into() }
    }
}
