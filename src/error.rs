use thiserror::Error;

use crate::domain::{Cents, WalletId};

pub type LedgerResult<T> = Result<T, LedgerError>;

/// The ledger action an error was raised by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CreateWallet,
    Deposit,
    Transfer,
    ListOperations,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreateWallet => "create wallet",
            Action::Deposit => "deposit",
            Action::Transfer => "transfer",
            Action::ListOperations => "list operations",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    InsufficientFunds,
    NotFound,
    Storage,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Malformed or missing request field. Raised before any storage access.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The idempotency key was already used for this action. Retrying the
    /// same request is safe: nothing was applied the second time.
    #[error("Idempotency key '{key}' already used ({action})")]
    Conflict { action: Action, key: String },

    #[error("Insufficient funds in wallet {wallet_id}: balance {balance}, required {required}")]
    InsufficientFunds {
        wallet_id: WalletId,
        balance: Cents,
        required: Cents,
    },

    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    /// Connectivity, transaction or unclassified constraint failure.
    #[error("Storage error during {action}")]
    Storage {
        action: Action,
        #[source]
        source: anyhow::Error,
    },
}

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation(message.into())
    }

    pub fn storage(action: Action, source: impl Into<anyhow::Error>) -> Self {
        LedgerError::Storage {
            action,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::Conflict { .. } => ErrorKind::Conflict,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::WalletNotFound(_) => ErrorKind::NotFound,
            LedgerError::Storage { .. } => ErrorKind::Storage,
        }
    }

    /// True when the request itself was at fault; only storage failures are
    /// reported as server-side errors.
    pub fn is_client_error(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Storage)
    }
}
