//! Report generation
//!
//! A report lists a chat's operations for a period, newest first, with
//! every amount divided by the rate of the requested currency. When the
//! rate is unavailable the report silently falls back to the base currency.

use crate::currency::{Currency, CurrencyGateway, BASE_CURRENCY};
use crate::db::{ChatId, DbResult, Operation, OperationKind};
use crate::runtime::Ledger;
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportPeriod {
    Today,
    Last7Days,
    Last30Days,
    AllTime,
}

impl ReportPeriod {
    pub const ALL: [ReportPeriod; 4] = [
        ReportPeriod::Today,
        ReportPeriod::Last7Days,
        ReportPeriod::Last30Days,
        ReportPeriod::AllTime,
    ];

    /// Button text
    pub fn label(self) -> &'static str {
        match self {
            ReportPeriod::Today => "Today",
            ReportPeriod::Last7Days => "Last 7 days",
            ReportPeriod::Last30Days => "Last 30 days",
            ReportPeriod::AllTime => "All time",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        Self::ALL
            .into_iter()
            .find(|period| period.label().eq_ignore_ascii_case(text))
    }

    /// How far back from "now" the period reaches; `None` is unbounded
    pub fn lookback(self) -> Option<TimeDelta> {
        match self {
            ReportPeriod::Today => Some(TimeDelta::days(1)),
            ReportPeriod::Last7Days => Some(TimeDelta::days(7)),
            ReportPeriod::Last30Days => Some(TimeDelta::days(30)),
            ReportPeriod::AllTime => None,
        }
    }

    /// First calendar date whose midnight is not earlier than `now - lookback`
    pub fn since(self, now: NaiveDateTime) -> Option<NaiveDate> {
        let cutoff = now.checked_sub_signed(self.lookback()?)?;
        let date = cutoff.date();
        if cutoff.time() == NaiveTime::MIN {
            Some(date)
        } else {
            date.checked_add_days(Days::new(1))
        }
    }
}

/// What the user asked for, with the period already resolved against the clock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub currency: Currency,
    pub period: ReportPeriod,
    pub since: Option<NaiveDate>,
}

impl ReportRequest {
    pub fn new(currency: Currency, period: ReportPeriod, now: NaiveDateTime) -> Self {
        Self {
            currency,
            period,
            since: period.since(now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLine {
    pub kind: OperationKind,
    pub date: NaiveDate,
    /// Amount in the report currency
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub period: ReportPeriod,
    pub requested_currency: Currency,
    /// Currency the lines are expressed in
    pub currency: Currency,
    pub lines: Vec<ReportLine>,
}

impl Report {
    pub fn fell_back(&self) -> bool {
        self.requested_currency != self.currency
    }
}

/// Rate for `requested`, or the base currency at 1 when it cannot be had
pub async fn resolve_rate<G: CurrencyGateway + ?Sized>(
    gateway: &G,
    requested: Currency,
) -> (Currency, Decimal) {
    match gateway.rate(requested).await {
        Ok(rate) => match Decimal::from_f64(rate) {
            Some(rate) if rate > Decimal::ZERO => (requested, rate),
            _ => {
                tracing::warn!(
                    currency = %requested,
                    rate,
                    "Unrepresentable rate, using base currency"
                );
                (BASE_CURRENCY, Decimal::ONE)
            }
        },
        Err(e) => {
            tracing::warn!(
                currency = %requested,
                error = %e,
                "Rate unavailable, using base currency"
            );
            (BASE_CURRENCY, Decimal::ONE)
        }
    }
}

/// Base amount expressed in a currency worth `rate` base units, to cents
pub fn convert(amount: Decimal, rate: Decimal) -> Decimal {
    if rate == Decimal::ONE {
        return amount;
    }
    amount.checked_div(rate).unwrap_or(amount).round_dp(2)
}

/// Assemble a report from already-fetched operations, keeping their order
pub fn build(
    operations: &[Operation],
    request: &ReportRequest,
    currency: Currency,
    rate: Decimal,
) -> Report {
    Report {
        period: request.period,
        requested_currency: request.currency,
        currency,
        lines: operations
            .iter()
            .map(|op| ReportLine {
                kind: op.kind,
                date: op.date,
                amount: convert(op.amount, rate),
            })
            .collect(),
    }
}

/// Fetch the rate and the matching operations, then build the report.
/// Only a ledger failure is an error; a missing rate degrades.
pub async fn generate<L, G>(
    ledger: &L,
    gateway: &G,
    chat_id: ChatId,
    request: &ReportRequest,
) -> DbResult<Report>
where
    L: Ledger + ?Sized,
    G: CurrencyGateway + ?Sized,
{
    let (currency, rate) = resolve_rate(gateway, request.currency).await;
    let operations = ledger.list_operations_since(chat_id, request.since).await?;

    tracing::debug!(
        chat_id = %chat_id,
        period = ?request.period,
        currency = %currency,
        count = operations.len(),
        "Report generated"
    );

    Ok(build(&operations, request, currency, rate))
}
