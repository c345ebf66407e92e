use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::currency::{CurrencyCode, FxError};
use crate::core::ids::{BatchId, InstructionId, NettingId, Symbol};
use crate::core::instruction::{InstructionStatus, SettlementType};

/// Convenience alias used throughout the engine.
pub type Result<T> = std::result::Result<T, SettlementError>;

/// Which leg of a two-leg transfer an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferLeg {
    Security,
    Cash,
}

impl fmt::Display for TransferLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferLeg::Security => write!(f, "security"),
            TransferLeg::Cash => write!(f, "cash"),
        }
    }
}

/// Errors produced by settlement operations.
///
/// State-machine refusals and validation failures are returned to the
/// caller synchronously; the refusing instruction also records them in
/// its event history, so the error value itself never needs replaying.
#[derive(Debug, Error)]
pub enum SettlementError {
    /// The requested lifecycle transition is not legal from the
    /// instruction's current status.
    #[error("cannot {action} an instruction in {from} state")]
    InvalidTransition {
        action: &'static str,
        from: InstructionStatus,
    },

    /// A DVP-only operation was invoked for a different settlement type.
    #[error("settlement type {0} does not settle delivery-versus-payment")]
    NotDvp(SettlementType),

    /// The buyer's cash balance cannot cover the payment leg.
    #[error("insufficient cash: need {required} {currency}, available {available}")]
    InsufficientCash {
        currency: CurrencyCode,
        required: Decimal,
        available: Decimal,
    },

    /// The seller's securities position cannot cover the delivery leg.
    #[error("insufficient securities: need {required} {symbol}, available {available}")]
    InsufficientSecurity {
        symbol: Symbol,
        required: Decimal,
        available: Decimal,
    },

    /// A custodian transfer was refused or lost mid-flight.
    #[error("{leg} leg transfer failed: {reason}")]
    TransferFailure { leg: TransferLeg, reason: String },

    /// Retry was requested but the budget is spent.
    #[error("retry limit reached: {retries} of {max_retry} attempts used")]
    MaxRetryExceeded { retries: u32, max_retry: u32 },

    /// A mutation was requested on an instruction that already settled.
    #[error("instruction {0} is already settled")]
    AlreadySettled(InstructionId),

    #[error("instruction {0} not found")]
    InstructionNotFound(InstructionId),

    #[error("netting result {0} not found")]
    NettingNotFound(NettingId),

    #[error("batch {0} not found")]
    BatchNotFound(BatchId),

    /// An operation outlived its session deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Fx(#[from] FxError),

    /// Input data failed structural validation.
    #[error("invalid instruction: {0}")]
    Validation(String),

    /// A repository rejected or failed a read/write.
    #[error("storage error: {0}")]
    Storage(String),
}

impl SettlementError {
    /// Whether a failed settlement attempt with this error is worth
    /// retrying at all. Refusals that are deterministic (bad input,
    /// illegal transition, wrong settlement type) will fail the same
    /// way every time; transient transport and liquidity conditions
    /// may clear up.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettlementError::InsufficientCash { .. }
                | SettlementError::InsufficientSecurity { .. }
                | SettlementError::TransferFailure { .. }
                | SettlementError::Timeout(_)
                | SettlementError::Storage(_)
        )
    }
}
