//! External interfaces the engine settles through: repositories for
//! instructions, netting results, batches, and FX rates, plus the
//! custodian, CCP, and notification services.
//!
//! Repository and service calls all take a [`Session`], the explicit
//! unit-of-work token for one engine operation. An adapter backed by a
//! transactional store can key its transaction on the session; the
//! in-memory adapters use it for deadline checks and log correlation.

pub mod memory;
pub mod traits;

pub use traits::{
    BatchRepository, CcpService, CustodianService, FxRateRepository, NettingRepository,
    NotificationService, Ports, Session, SettlementRepository,
};
