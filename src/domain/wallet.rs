use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Cents;

/// Surrogate wallet identifier, assigned by the store on creation.
pub type WalletId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    /// Client-supplied key of the request that created this wallet.
    /// Unique across all wallets.
    pub idempotency_key: String,
    /// Running total of committed operations, in minor units. Never negative.
    pub balance: Cents,
    pub created_at: DateTime<Utc>,
}
