//! Outbound texts and suggested-reply keyboards

use crate::currency::{Currency, BASE_CURRENCY};
use crate::db::{ChatId, Operation, OperationKind, User};
use crate::report::{Report, ReportPeriod};
use crate::state_machine::input::{AmountError, NameError};
use serde::Serialize;
use std::fmt::Write as _;

pub const BUTTON_ADD_OPERATION: &str = "Add operation";
pub const BUTTON_REPORTS: &str = "Reports";
pub const BUTTON_HELP: &str = "Help";
pub const CANCEL: &str = "Cancel";
pub const TODAY: &str = "Today";

/// Rows of suggested replies for the transport to render as buttons
pub type Keyboard = Vec<Vec<String>>;

/// Message for the outbound bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub chat_id: ChatId,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_replies: Option<Keyboard>,
}

impl OutboundMessage {
    pub fn new(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            suggested_replies: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.suggested_replies = Some(keyboard);
        self
    }
}

fn rows(rows: &[&[&str]]) -> Keyboard {
    rows.iter()
        .map(|row| row.iter().map(|label| (*label).to_string()).collect())
        .collect()
}

// ============================================================================
// Keyboards
// ============================================================================

pub fn main_keyboard() -> Keyboard {
    rows(&[&[BUTTON_ADD_OPERATION, BUTTON_REPORTS], &[BUTTON_HELP]])
}

pub fn operation_type_keyboard() -> Keyboard {
    rows(&[
        &[OperationKind::Income.label(), OperationKind::Expense.label()],
        &[CANCEL],
    ])
}

pub fn date_keyboard() -> Keyboard {
    rows(&[&[TODAY], &[CANCEL]])
}

pub fn currency_keyboard() -> Keyboard {
    let [rub, usd, eur, cny] = Currency::ALL.map(Currency::code);
    rows(&[&[rub, usd, eur], &[cny, CANCEL]])
}

pub fn period_keyboard() -> Keyboard {
    let [today, week, month, all] = ReportPeriod::ALL.map(ReportPeriod::label);
    rows(&[&[today, week], &[month, all], &[CANCEL]])
}

pub fn cancel_keyboard() -> Keyboard {
    rows(&[&[CANCEL]])
}

/// Offer the transport-supplied display name as a one-tap answer
pub fn name_keyboard(sender_name: Option<&str>) -> Keyboard {
    match sender_name {
        Some(name) => rows(&[&[name], &[CANCEL]]),
        None => cancel_keyboard(),
    }
}

// ============================================================================
// Texts
// ============================================================================

pub const HELP_TEXT: &str = "Finance Bot help\n\n\
    Commands:\n\
    /start - start the bot\n\
    /register - register\n\
    /update_operation - change the amount of an operation\n\
    /help - show this message\n\n\
    Buttons:\n\
    Add operation - record an income or an expense\n\
    Reports - operations for a period, in the currency of your choice\n\n\
    To add an operation enter:\n\
    1. Type (income/expense)\n\
    2. Amount\n\
    3. Date\n\n\
    Type Cancel at any step to stop.";

pub const WELCOME_UNREGISTERED: &str =
    "Welcome to Finance Bot!\n\nPlease register with the /register command";
pub const ALREADY_RUNNING: &str = "The bot is already running.\nUse the buttons below.";
pub const ALREADY_REGISTERED: &str = "You are already registered!";
pub const REGISTER_FIRST: &str = "Please register first with /register";
pub const ASK_NAME: &str = "Enter your name to register:";
pub const ASK_OPERATION_TYPE: &str = "Choose the operation type:";
pub const ASK_AMOUNT: &str = "Enter the operation amount:";
pub const ASK_DATE: &str = "Enter the operation date as DD.MM.YYYY or press Today";
pub const ASK_NEW_AMOUNT: &str = "Enter the new amount for the operation:";
pub const ASK_CURRENCY: &str = "Choose the report currency:";
pub const ASK_PERIOD: &str = "Choose the report period:";
pub const NO_OPERATIONS_TO_UPDATE: &str = "You have no operations to change yet";
pub const INVALID_TYPE: &str = "Please choose the operation type using the buttons";
pub const INVALID_DATE: &str = "Invalid date format. Use DD.MM.YYYY or the Today button";
pub const INVALID_OPERATION_ID: &str = "Please enter a valid operation ID (a whole number)";
pub const OPERATION_NOT_FOUND: &str =
    "No operation with this ID was found among your operations. Nothing was changed.";
pub const INVALID_CURRENCY: &str = "Please choose a currency from the options";
pub const INVALID_PERIOD: &str = "Please choose a period from the options";
pub const UNRECOGNIZED: &str =
    "I don't understand this command. Please use the menu buttons or /help";
pub const TRY_LATER: &str = "Something went wrong. Please try again later.";

pub fn cancelled(flow: &str) -> String {
    let what = match flow {
        "registration" => "Registration",
        "add_operation" => "Adding the operation",
        "update_operation" => "Changing the operation",
        "report" => "The report",
        _ => "The action",
    };
    format!("{what} was cancelled")
}

pub fn invalid_name(err: &NameError) -> &'static str {
    match err {
        NameError::Empty => "The name cannot be empty. Enter your name:",
        NameError::TooLong => "The name is too long. Enter a shorter name:",
        NameError::Command => "Please enter your name, not a command:",
    }
}

pub fn invalid_amount(err: &AmountError) -> &'static str {
    match err {
        AmountError::NotPositive => "The amount must be greater than zero. Try again.",
        AmountError::NotANumber => "Please enter a valid amount (for example: 1500.50)",
        AmountError::TooPrecise => "Use at most two decimal places (for example: 1500.50)",
        AmountError::TooLarge => "The amount is too large. Try again.",
    }
}

pub fn registered(user: &User) -> String {
    format!(
        "Registration complete, {}!\nYou can now start tracking your finances.",
        user.name
    )
}

fn operation_summary(operation: &Operation) -> String {
    format!(
        "Type: {}\nAmount: {:.2} {}\nDate: {}",
        operation.kind.label().to_lowercase(),
        operation.amount,
        BASE_CURRENCY,
        operation.date.format("%d.%m.%Y")
    )
}

pub fn operation_added(operation: &Operation) -> String {
    format!("Operation added!\n\n{}", operation_summary(operation))
}

pub fn operation_updated(operation: &Operation) -> String {
    format!("Operation updated!\n\n{}", operation_summary(operation))
}

/// Listing shown before asking which operation to change
pub fn recent_operations(operations: &[Operation]) -> String {
    let mut text = String::from("Your recent operations (ID - Date - Amount - Type):\n");
    for op in operations {
        let _ = writeln!(
            text,
            "#{} - {} - {:.2} {} - {}",
            op.id,
            op.date.format("%d.%m.%Y"),
            op.amount,
            BASE_CURRENCY,
            op.kind.label()
        );
    }
    text.push_str("\nEnter the ID of the operation you want to change:");
    text
}

pub fn rate_fallback(requested: Currency) -> String {
    format!("Could not get the {requested} exchange rate. The report will be in {BASE_CURRENCY}.")
}

pub fn report(report: &Report) -> String {
    let period = report.period.label().to_lowercase();
    if report.lines.is_empty() {
        return format!("No operations for the selected period ({period})");
    }

    let mut text = format!("Report for {period} ({}):\n", report.currency);
    for line in &report.lines {
        let arrow = match line.kind {
            OperationKind::Income => "⬆️",
            OperationKind::Expense => "⬇️",
        };
        let _ = write!(
            text,
            "\n{arrow} {} - {:.2} {}",
            line.date.format("%d.%m.%Y"),
            line.amount,
            report.currency
        );
    }
    text
}
