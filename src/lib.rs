//! # settlement-engine
//!
//! Post-trade settlement and clearing engine.
//!
//! Takes matched trade confirmations through the full post-trade
//! lifecycle: instruction creation, multilateral netting per account
//! and currency, delivery-versus-payment execution with compensating
//! reversal, end-of-day batch settlement, and FX exposure hedging.
//!
//! ## Architecture
//!
//! - **core**: identifiers, currencies and FX rates, the instruction
//!   aggregate and its event log, configuration, errors
//! - **ports**: traits for the external collaborators (repositories,
//!   custodian, CCP, notifications) and in-memory adapters
//! - **engine**: netting, balance validation, DVP execution, batch
//!   orchestration, FX exposure, and the facade service
//! - **simulation**: random trade population generation

pub mod core;
pub mod engine;
pub mod ports;
pub mod simulation;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::core::config::EngineConfig;
    pub use crate::core::currency::{CurrencyCode, FxRate, FxRateBook};
    pub use crate::core::error::{Result, SettlementError};
    pub use crate::core::event::{EventLog, SettlementEvent};
    pub use crate::core::ids::{AccountId, BatchId, InstructionId, NettingId, Symbol, TradeId};
    pub use crate::core::instruction::{
        InstructionStatus, SettlementInstruction, SettlementType, TradeConfirmation,
    };
    pub use crate::engine::batch::{BatchOutcome, SettlementBatch};
    pub use crate::engine::dvp::DvpReceipt;
    pub use crate::engine::exposure::{FxExposureReport, HedgeInstruction};
    pub use crate::engine::netting::NettingResult;
    pub use crate::engine::service::SettlementService;
    pub use crate::ports::memory::MemoryPorts;
    pub use crate::ports::{Ports, Session};
}
