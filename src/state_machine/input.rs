//! Parsing and validation of free-text step input

use crate::db::OperationKind;
use crate::replies::{BUTTON_ADD_OPERATION, BUTTON_HELP, BUTTON_REPORTS, CANCEL, TODAY};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

/// Largest amount a single operation may carry
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0); // 1e12

pub const MAX_NAME_CHARS: usize = 64;

/// Entry points into the state machine from the idle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopLevel {
    Start,
    Register,
    UpdateOperation,
    Help,
    AddOperation,
    Reports,
}

/// Slash command or main-keyboard button
pub fn parse_top_level(text: &str) -> Option<TopLevel> {
    let text = text.trim();

    if let Some(command) = text.strip_prefix('/') {
        // "/start@finance_bot extra" -> "start"
        let command = command.split_whitespace().next().unwrap_or_default();
        let command = command.split('@').next().unwrap_or_default();
        return match command.to_ascii_lowercase().as_str() {
            "start" => Some(TopLevel::Start),
            "register" => Some(TopLevel::Register),
            "update_operation" => Some(TopLevel::UpdateOperation),
            "help" => Some(TopLevel::Help),
            _ => None,
        };
    }

    if keyword_eq(text, BUTTON_ADD_OPERATION) {
        Some(TopLevel::AddOperation)
    } else if keyword_eq(text, BUTTON_REPORTS) {
        Some(TopLevel::Reports)
    } else if keyword_eq(text, BUTTON_HELP) {
        Some(TopLevel::Help)
    } else {
        None
    }
}

/// Case-insensitive keyword match ignoring surrounding whitespace
pub fn keyword_eq(text: &str, keyword: &str) -> bool {
    text.trim().eq_ignore_ascii_case(keyword)
}

pub fn is_cancel(text: &str) -> bool {
    keyword_eq(text, CANCEL)
}

pub fn parse_kind(text: &str) -> Option<OperationKind> {
    [OperationKind::Income, OperationKind::Expense]
        .into_iter()
        .find(|kind| keyword_eq(text, kind.label()))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("not a number")]
    NotANumber,
    #[error("amount must be greater than zero")]
    NotPositive,
    #[error("at most two decimal places")]
    TooPrecise,
    #[error("amount too large")]
    TooLarge,
}

/// Positive amount with `.` or `,` as the decimal separator
pub fn parse_amount(text: &str) -> Result<Decimal, AmountError> {
    let normalized = text.trim().replace(',', ".");
    let (negative, digits) = match normalized.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, normalized.as_str()),
    };
    if !is_plain_number(digits) {
        return Err(AmountError::NotANumber);
    }
    if negative {
        return Err(AmountError::NotPositive);
    }

    let amount = Decimal::from_str(digits).map_err(|_| AmountError::NotANumber)?;
    if amount <= Decimal::ZERO {
        return Err(AmountError::NotPositive);
    }
    if amount.normalize().scale() > 2 {
        return Err(AmountError::TooPrecise);
    }
    if amount > MAX_AMOUNT {
        return Err(AmountError::TooLarge);
    }
    Ok(amount)
}

/// Digits with at most one `.`; no signs, exponents or `_` grouping
fn is_plain_number(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
        && text.chars().all(|c| c.is_ascii_digit() || c == '.')
        && text.matches('.').count() <= 1
}

/// `DD.MM.YYYY`, ISO `YYYY-MM-DD`, or the `Today` keyword
pub fn parse_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let text = text.trim();
    if keyword_eq(text, TODAY) {
        return Some(today);
    }
    NaiveDate::parse_from_str(text, "%d.%m.%Y")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
        .ok()
}

/// Operation ids are positive integers
pub fn parse_operation_id(text: &str) -> Option<i64> {
    let text = text.trim().trim_start_matches('#');
    text.parse::<i64>().ok().filter(|id| *id > 0)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("name is empty")]
    Empty,
    #[error("name is too long")]
    TooLong,
    #[error("name looks like a command")]
    Command,
}

pub fn validate_name(text: &str) -> Result<String, NameError> {
    let name = text.trim();
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.starts_with('/') {
        return Err(NameError::Command);
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(NameError::TooLong);
    }
    Ok(name.to_string())
}
