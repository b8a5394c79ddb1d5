//! Engine and store errors

use thiserror::Error;

// ==================== STORE ====================

/// Errors surfaced by the outbound ports (stores, wallet mutator, outbox)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Insufficient funds: required {required:.2}, available {available:.2}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn unavailable<E: std::fmt::Display>(err: E) -> Self {
        StoreError::Unavailable(err.to_string())
    }

    /// Retrying cannot help; only `Unavailable` is transient
    pub fn is_permanent(&self) -> bool {
        !matches!(self, StoreError::Unavailable(_))
    }
}

// ==================== ENGINE ====================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("No price available for {0}")]
    NoPriceAvailable(String),

    #[error("Insufficient funds: stake {required:.2} exceeds available {available:.2}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Wager already settled: {0}")]
    AlreadySettled(String),

    #[error("Invalid direction ({0}), only up and down are allowed")]
    InvalidDirection(String),

    #[error("Invalid interval ({0}), only 1m, 5m and 15m are allowed")]
    InvalidInterval(String),

    #[error("Invalid stake: {0}")]
    InvalidStake(f64),

    #[error("Instrument not offered: {0}")]
    UnknownInstrument(String),

    #[error("Account on cooldown for another {remaining_ms}ms")]
    CooldownActive { remaining_ms: i64 },

    #[error("Wager not found: {0}")]
    WagerNotFound(String),

    #[error("Wager {wager_id} matures in another {remaining_ms}ms")]
    NotMatured { wager_id: String, remaining_ms: i64 },

    #[error("Deposit not found: {0}")]
    DepositNotFound(String),

    #[error("Deposit already verified: {0}")]
    DepositNotPending(String),

    #[error("Downstream write failed for {operation_id}: {source}")]
    DownstreamWriteFailure {
        operation_id: String,
        source: StoreError,
    },

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl EngineError {
    /// Stable machine-readable reason for client responses
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::NoPriceAvailable(_) => "NO_PRICE_AVAILABLE",
            EngineError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            EngineError::AlreadySettled(_) => "ALREADY_SETTLED",
            EngineError::InvalidDirection(_) => "INVALID_DIRECTION",
            EngineError::InvalidInterval(_) => "INVALID_INTERVAL",
            EngineError::InvalidStake(_) => "INVALID_STAKE",
            EngineError::UnknownInstrument(_) => "UNKNOWN_INSTRUMENT",
            EngineError::CooldownActive { .. } => "COOLDOWN_ACTIVE",
            EngineError::WagerNotFound(_) => "WAGER_NOT_FOUND",
            EngineError::NotMatured { .. } => "NOT_MATURED",
            EngineError::DepositNotFound(_) => "DEPOSIT_NOT_FOUND",
            EngineError::DepositNotPending(_) => "DEPOSIT_NOT_PENDING",
            EngineError::DownstreamWriteFailure { .. } => "DOWNSTREAM_WRITE_FAILURE",
            EngineError::Store(_) => "STORE_ERROR",
        }
    }

    /// Rejected before any state changed
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidDirection(_)
                | EngineError::InvalidInterval(_)
                | EngineError::InvalidStake(_)
                | EngineError::UnknownInstrument(_)
                | EngineError::CooldownActive { .. }
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientFunds {
                required,
                available,
            } => EngineError::InsufficientFunds {
                required,
                available,
            },
            other => EngineError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
