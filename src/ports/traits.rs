use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::currency::{CurrencyCode, FxRate};
use crate::core::error::{Result, SettlementError};
use crate::core::ids::{AccountId, BatchId, InstructionId, NettingId, Symbol, TradeId};
use crate::core::instruction::{InstructionStatus, SettlementInstruction};
use crate::engine::batch::SettlementBatch;
use crate::engine::netting::NettingResult;

/// Unit-of-work token for one engine operation.
///
/// Created once at the top of an operation and passed to every port
/// call it makes, so an adapter can tie all of them to one transaction
/// or trace. Carries an optional deadline; engines check it between
/// pipeline steps and adapters are expected to refuse work once it has
/// passed.
///
/// # Examples
///
/// ```
/// use settlement_engine::ports::Session;
///
/// let session = Session::begin("batch-settle");
/// assert!(!session.expired());
/// ```
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    label: String,
    opened_at: DateTime<Utc>,
    deadline: Option<DateTime<Utc>>,
}

impl Session {
    /// Open a session with no deadline.
    pub fn begin(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            opened_at: Utc::now(),
            deadline: None,
        }
    }

    /// Set an absolute deadline after which the session refuses work.
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// Whether the deadline, if any, has passed.
    pub fn expired(&self) -> bool {
        self.deadline.map_or(false, |d| Utc::now() >= d)
    }

    /// Error if the deadline has passed, for use at pipeline step
    /// boundaries.
    pub fn check(&self) -> Result<()> {
        if self.expired() {
            Err(SettlementError::Timeout(format!(
                "session {} exceeded its deadline",
                self
            )))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, &self.id.to_string()[..8])
    }
}

/// Persistence for settlement instructions.
///
/// `find_pending_*` return instructions still awaiting settlement,
/// meaning status Pending or Cleared; instructions mid-netting, failed,
/// or terminal are excluded.
pub trait SettlementRepository: Send + Sync {
    /// Insert a new instruction. Fails if the ID already exists.
    fn save(&self, session: &Session, instruction: &SettlementInstruction) -> Result<()>;

    /// Overwrite an existing instruction's state.
    fn update(&self, session: &Session, instruction: &SettlementInstruction) -> Result<()>;

    /// Narrow write used when only the status changed.
    fn update_status(
        &self,
        session: &Session,
        id: InstructionId,
        status: InstructionStatus,
    ) -> Result<()>;

    /// Fetch one instruction by ID.
    fn get(&self, session: &Session, id: InstructionId) -> Result<SettlementInstruction>;

    /// All instructions created from a given trade, oldest first.
    fn get_by_trade_id(
        &self,
        session: &Session,
        trade_id: &TradeId,
    ) -> Result<Vec<SettlementInstruction>>;

    /// Up to `limit` awaiting instructions due on or before the date,
    /// ordered by settlement date then creation time.
    fn find_pending_by_date(
        &self,
        session: &Session,
        due: NaiveDate,
        limit: usize,
    ) -> Result<Vec<SettlementInstruction>>;

    /// Up to `limit` awaiting instructions where the account is buyer
    /// or seller, ordered by settlement date then creation time.
    fn find_pending_by_account(
        &self,
        session: &Session,
        account: &AccountId,
        limit: usize,
    ) -> Result<Vec<SettlementInstruction>>;
}

/// Persistence for netting results.
pub trait NettingRepository: Send + Sync {
    fn save(&self, session: &Session, result: &NettingResult) -> Result<()>;

    fn get(&self, session: &Session, id: NettingId) -> Result<NettingResult>;

    /// All results for one account and currency, newest first.
    fn get_by_account_and_currency(
        &self,
        session: &Session,
        account: &AccountId,
        currency: &CurrencyCode,
    ) -> Result<Vec<NettingResult>>;
}

/// Persistence for settlement batches. `save` upserts: a batch is
/// written once when it starts and again when it completes.
pub trait BatchRepository: Send + Sync {
    fn save(&self, session: &Session, batch: &SettlementBatch) -> Result<()>;

    fn get(&self, session: &Session, id: BatchId) -> Result<SettlementBatch>;

    /// All batches run for a settlement date.
    fn get_by_date(&self, session: &Session, date: NaiveDate) -> Result<Vec<SettlementBatch>>;
}

/// Source of FX rate quotes.
pub trait FxRateRepository: Send + Sync {
    /// The quote currently usable for the pair, direct or inverted.
    fn rate(&self, session: &Session, from: &CurrencyCode, to: &CurrencyCode) -> Result<FxRate>;
}

/// Custodian holding cash balances and securities positions.
///
/// Each transfer is atomic on the custodian side; the engine composes
/// them and owns compensation when a later leg fails.
pub trait CustodianService: Send + Sync {
    fn transfer_security(
        &self,
        session: &Session,
        from: &AccountId,
        to: &AccountId,
        symbol: &Symbol,
        quantity: Decimal,
    ) -> Result<()>;

    fn transfer_cash(
        &self,
        session: &Session,
        from: &AccountId,
        to: &AccountId,
        amount: Decimal,
        currency: &CurrencyCode,
    ) -> Result<()>;

    fn account_balance(
        &self,
        session: &Session,
        account: &AccountId,
        currency: &CurrencyCode,
    ) -> Result<Decimal>;

    fn security_position(
        &self,
        session: &Session,
        account: &AccountId,
        symbol: &Symbol,
    ) -> Result<Decimal>;

    /// Block an account from sending or receiving.
    fn freeze_account(&self, session: &Session, account: &AccountId) -> Result<()>;

    fn unfreeze_account(&self, session: &Session, account: &AccountId) -> Result<()>;
}

/// Central counterparty the engine reports novated trades to.
pub trait CcpService: Send + Sync {
    fn register_trade(
        &self,
        session: &Session,
        instruction: &SettlementInstruction,
    ) -> Result<()>;

    /// Initial margin the CCP requires for the trade.
    fn calculate_margin(
        &self,
        session: &Session,
        instruction: &SettlementInstruction,
    ) -> Result<Decimal>;
}

/// Downstream notification sink. Outcomes are reported after the fact;
/// a failure to notify never fails the settlement itself, so callers
/// log and swallow errors from these methods.
pub trait NotificationService: Send + Sync {
    fn settlement_completed(&self, instruction: &SettlementInstruction) -> Result<()>;

    fn settlement_failed(&self, instruction: &SettlementInstruction, reason: &str) -> Result<()>;
}

/// The full set of ports one engine instance settles through.
#[derive(Clone)]
pub struct Ports {
    pub instructions: Arc<dyn SettlementRepository>,
    pub nettings: Arc<dyn NettingRepository>,
    pub batches: Arc<dyn BatchRepository>,
    pub fx_rates: Arc<dyn FxRateRepository>,
    pub custodian: Arc<dyn CustodianService>,
    pub ccp: Arc<dyn CcpService>,
    pub notifications: Arc<dyn NotificationService>,
}
