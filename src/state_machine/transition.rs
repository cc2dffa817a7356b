//! Pure state transition function
//!
//! Given the chat's flow state, the message context and one event, decide
//! the next state and the effects to run. No I/O happens here; ledger and
//! gateway results come back in as events.

use super::event::Intent;
use super::input::{
    is_cancel, parse_amount, parse_date, parse_kind, parse_operation_id, parse_top_level,
    validate_name, TopLevel,
};
use super::state::{
    AddOperationStep, ChatContext, FlowState, RegistrationStep, ReportStep, UpdateOperationStep,
};
use super::{Effect, Event};
use crate::currency::Currency;
use crate::db::ChatId;
use crate::replies::{self, Keyboard};
use crate::report::{ReportPeriod, ReportRequest};
use thiserror::Error;

/// How many operations the update flow lists
pub const RECENT_OPERATIONS_LIMIT: usize = 10;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: FlowState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: FlowState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
#[allow(clippy::too_many_lines)]
pub fn transition(
    state: &FlowState,
    ctx: &ChatContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    let chat_id = ctx.chat_id;

    match (state, event) {
        // A failed dependency abandons whatever was in progress
        (_, Event::DependencyFailed) => Ok(idle_reply(chat_id, replies::TRY_LATER)),

        // ============================================================
        // Cancellation (any non-idle step)
        // ============================================================
        (state, Event::UserMessage { text }) if !state.is_idle() && is_cancel(&text) => {
            Ok(idle_reply(chat_id, replies::cancelled(state.flow_name())))
        }

        // ============================================================
        // Idle: top-level commands and buttons
        // ============================================================
        (FlowState::Idle, Event::UserMessage { text }) => Ok(handle_top_level(chat_id, &text)),

        (FlowState::Idle, Event::RegistrationChecked { intent, registered }) => {
            Ok(handle_registration_checked(ctx, intent, registered))
        }

        // ============================================================
        // Registration
        // ============================================================
        (
            FlowState::Registration {
                step: RegistrationStep::WaitingForName,
            },
            Event::UserMessage { text },
        ) => Ok(match validate_name(&text) {
            Ok(name) => TransitionResult::new(FlowState::Idle)
                .with_effect(Effect::CreateUser { name }),
            Err(e) => stay(
                state,
                chat_id,
                replies::invalid_name(&e),
                replies::name_keyboard(ctx.sender_name.as_deref()),
            ),
        }),

        (FlowState::Idle, Event::UserCreated { user }) => {
            Ok(idle_reply(chat_id, replies::registered(&user)))
        }

        (FlowState::Idle, Event::UserAlreadyExists) => {
            Ok(idle_reply(chat_id, replies::ALREADY_REGISTERED))
        }

        // ============================================================
        // Add operation
        // ============================================================
        (FlowState::AddOperation { step }, Event::UserMessage { text }) => {
            Ok(handle_add_operation(state, step, ctx, &text))
        }

        (FlowState::Idle, Event::OperationCreated { operation }) => {
            Ok(idle_reply(chat_id, replies::operation_added(&operation)))
        }

        // ============================================================
        // Update operation
        // ============================================================
        (FlowState::Idle, Event::RecentOperationsLoaded { operations }) => {
            if operations.is_empty() {
                return Ok(idle_reply(chat_id, replies::NO_OPERATIONS_TO_UPDATE));
            }
            Ok(TransitionResult::new(FlowState::UpdateOperation {
                step: UpdateOperationStep::WaitingForOperationId,
            })
            .with_effect(Effect::reply_with_keyboard(
                chat_id,
                replies::recent_operations(&operations),
                replies::cancel_keyboard(),
            )))
        }

        (
            FlowState::UpdateOperation {
                step: UpdateOperationStep::WaitingForOperationId,
            },
            Event::UserMessage { text },
        ) => Ok(match parse_operation_id(&text) {
            // Stay put until the ledger confirms ownership
            Some(operation_id) => TransitionResult::new(state.clone())
                .with_effect(Effect::CheckOwnership { operation_id }),
            None => stay(
                state,
                chat_id,
                replies::INVALID_OPERATION_ID,
                replies::cancel_keyboard(),
            ),
        }),

        (
            FlowState::UpdateOperation {
                step: UpdateOperationStep::WaitingForOperationId,
            },
            Event::OwnershipChecked {
                operation_id,
                owned,
            },
        ) => {
            if !owned {
                return Ok(idle_reply(chat_id, replies::OPERATION_NOT_FOUND));
            }
            Ok(TransitionResult::new(FlowState::UpdateOperation {
                step: UpdateOperationStep::WaitingForNewAmount { operation_id },
            })
            .with_effect(Effect::reply_with_keyboard(
                chat_id,
                replies::ASK_NEW_AMOUNT,
                replies::cancel_keyboard(),
            )))
        }

        (
            FlowState::UpdateOperation {
                step: UpdateOperationStep::WaitingForNewAmount { operation_id },
            },
            Event::UserMessage { text },
        ) => Ok(match parse_amount(&text) {
            Ok(amount) => TransitionResult::new(FlowState::Idle).with_effect(Effect::UpdateAmount {
                operation_id: *operation_id,
                amount,
            }),
            Err(e) => stay(
                state,
                chat_id,
                replies::invalid_amount(&e),
                replies::cancel_keyboard(),
            ),
        }),

        (FlowState::Idle, Event::OperationUpdated { operation }) => {
            Ok(idle_reply(chat_id, replies::operation_updated(&operation)))
        }

        (FlowState::Idle, Event::OperationNotFound) => {
            Ok(idle_reply(chat_id, replies::OPERATION_NOT_FOUND))
        }

        // ============================================================
        // Report
        // ============================================================
        (FlowState::Report { step }, Event::UserMessage { text }) => {
            Ok(handle_report(state, step, ctx, &text))
        }

        (FlowState::Idle, Event::ReportReady { report }) => {
            let mut result = TransitionResult::new(FlowState::Idle);
            if report.fell_back() {
                result = result.with_effect(Effect::reply(
                    chat_id,
                    replies::rate_fallback(report.requested_currency),
                ));
            }
            Ok(result.with_effect(Effect::reply_with_keyboard(
                chat_id,
                replies::report(&report),
                replies::main_keyboard(),
            )))
        }

        // ============================================================
        // Invalid
        // ============================================================
        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "no transition from {}/{} on {event:?}",
            state.flow_name(),
            state.step_name()
        ))),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Back to idle with the main keyboard
fn idle_reply(chat_id: ChatId, text: impl Into<String>) -> TransitionResult {
    TransitionResult::new(FlowState::Idle).with_effect(Effect::reply_with_keyboard(
        chat_id,
        text,
        replies::main_keyboard(),
    ))
}

/// Re-prompt without advancing; collected fields are kept
fn stay(state: &FlowState, chat_id: ChatId, text: &str, keyboard: Keyboard) -> TransitionResult {
    TransitionResult::new(state.clone()).with_effect(Effect::reply_with_keyboard(
        chat_id, text, keyboard,
    ))
}

fn advance(state: FlowState, chat_id: ChatId, text: &str, keyboard: Keyboard) -> TransitionResult {
    TransitionResult::new(state).with_effect(Effect::reply_with_keyboard(chat_id, text, keyboard))
}

fn handle_top_level(chat_id: ChatId, text: &str) -> TransitionResult {
    let check = |intent| {
        TransitionResult::new(FlowState::Idle).with_effect(Effect::CheckRegistration { intent })
    };

    match parse_top_level(text) {
        Some(TopLevel::Start) => check(Intent::Start),
        Some(TopLevel::Register) => check(Intent::Register),
        Some(TopLevel::AddOperation) => check(Intent::AddOperation),
        Some(TopLevel::UpdateOperation) => check(Intent::UpdateOperation),
        Some(TopLevel::Help) => idle_reply(chat_id, replies::HELP_TEXT),
        Some(TopLevel::Reports) => advance(
            FlowState::Report {
                step: ReportStep::WaitingForCurrency,
            },
            chat_id,
            replies::ASK_CURRENCY,
            replies::currency_keyboard(),
        ),
        None => idle_reply(chat_id, replies::UNRECOGNIZED),
    }
}

fn handle_registration_checked(
    ctx: &ChatContext,
    intent: Intent,
    registered: bool,
) -> TransitionResult {
    let chat_id = ctx.chat_id;

    match (intent, registered) {
        (Intent::Start, true) => idle_reply(chat_id, replies::ALREADY_RUNNING),
        (Intent::Start, false) => TransitionResult::new(FlowState::Idle)
            .with_effect(Effect::reply(chat_id, replies::WELCOME_UNREGISTERED)),

        (Intent::Register, true) => idle_reply(chat_id, replies::ALREADY_REGISTERED),
        (Intent::Register, false) => advance(
            FlowState::Registration {
                step: RegistrationStep::WaitingForName,
            },
            chat_id,
            replies::ASK_NAME,
            replies::name_keyboard(ctx.sender_name.as_deref()),
        ),

        (Intent::AddOperation | Intent::UpdateOperation, false) => {
            idle_reply(chat_id, replies::REGISTER_FIRST)
        }
        (Intent::AddOperation, true) => advance(
            FlowState::AddOperation {
                step: AddOperationStep::WaitingForType,
            },
            chat_id,
            replies::ASK_OPERATION_TYPE,
            replies::operation_type_keyboard(),
        ),
        (Intent::UpdateOperation, true) => TransitionResult::new(FlowState::Idle)
            .with_effect(Effect::LoadRecentOperations {
                limit: RECENT_OPERATIONS_LIMIT,
            }),
    }
}

fn handle_add_operation(
    state: &FlowState,
    step: &AddOperationStep,
    ctx: &ChatContext,
    text: &str,
) -> TransitionResult {
    let chat_id = ctx.chat_id;

    match step {
        AddOperationStep::WaitingForType => match parse_kind(text) {
            Some(kind) => advance(
                FlowState::AddOperation {
                    step: AddOperationStep::WaitingForAmount { kind },
                },
                chat_id,
                replies::ASK_AMOUNT,
                replies::cancel_keyboard(),
            ),
            None => stay(
                state,
                chat_id,
                replies::INVALID_TYPE,
                replies::operation_type_keyboard(),
            ),
        },

        AddOperationStep::WaitingForAmount { kind } => match parse_amount(text) {
            Ok(amount) => advance(
                FlowState::AddOperation {
                    step: AddOperationStep::WaitingForDate {
                        kind: *kind,
                        amount,
                    },
                },
                chat_id,
                replies::ASK_DATE,
                replies::date_keyboard(),
            ),
            Err(e) => stay(
                state,
                chat_id,
                replies::invalid_amount(&e),
                replies::cancel_keyboard(),
            ),
        },

        AddOperationStep::WaitingForDate { kind, amount } => {
            match parse_date(text, ctx.today()) {
                Some(date) => {
                    TransitionResult::new(FlowState::Idle).with_effect(Effect::CreateOperation {
                        kind: *kind,
                        amount: *amount,
                        date,
                    })
                }
                None => stay(state, chat_id, replies::INVALID_DATE, replies::date_keyboard()),
            }
        }
    }
}

fn handle_report(
    state: &FlowState,
    step: &ReportStep,
    ctx: &ChatContext,
    text: &str,
) -> TransitionResult {
    let chat_id = ctx.chat_id;

    match step {
        ReportStep::WaitingForCurrency => match Currency::parse(text) {
            Some(currency) => advance(
                FlowState::Report {
                    step: ReportStep::WaitingForPeriod { currency },
                },
                chat_id,
                replies::ASK_PERIOD,
                replies::period_keyboard(),
            ),
            None => stay(
                state,
                chat_id,
                replies::INVALID_CURRENCY,
                replies::currency_keyboard(),
            ),
        },

        ReportStep::WaitingForPeriod { currency } => match ReportPeriod::parse(text) {
            Some(period) => TransitionResult::new(FlowState::Idle).with_effect(Effect::BuildReport {
                request: ReportRequest::new(*currency, period, ctx.now),
            }),
            None => stay(
                state,
                chat_id,
                replies::INVALID_PERIOD,
                replies::period_keyboard(),
            ),
        },
    }
}
