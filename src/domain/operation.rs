use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, WalletId};

pub type OperationId = i64;

/// Whether money enters (credit) or leaves (debit) a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    /// Numeric code persisted in the `direction` column (0 = credit, 1 = debit).
    pub fn code(&self) -> i64 {
        match self {
            Direction::Credit => 0,
            Direction::Debit => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Direction::Credit),
            1 => Some(Direction::Debit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Credit => "credit",
            Direction::Debit => "debit",
        }
    }

    /// Accepts either the name or the numeric code.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "credit" | "0" => Some(Direction::Credit),
            "debit" | "1" => Some(Direction::Debit),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable ledger entry. Created in the same transaction as the balance
/// change it causes and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub wallet_id: WalletId,
    /// Magnitude in minor units (always positive); the sign comes from `direction`.
    pub amount_cents: Cents,
    pub direction: Direction,
    pub idempotency_key: String,
    pub occurred_at: DateTime<Utc>,
}

impl Operation {
    /// Signed effect of this operation on its wallet's balance.
    pub fn signed_amount(&self) -> Cents {
        match self.direction {
            Direction::Credit => self.amount_cents,
            Direction::Debit => -self.amount_cents,
        }
    }
}

/// A bounded window over a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: limit.min(Self::MAX_LIMIT),
            offset,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(Self::MAX_LIMIT, 0)
    }
}

/// Exact-match filter for operation queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFilter {
    pub wallet_id: WalletId,
    /// Calendar date (UTC) the operation occurred on.
    pub date: NaiveDate,
    pub direction: Direction,
    /// `None` returns every match.
    pub page: Option<Page>,
}
