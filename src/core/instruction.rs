use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::config::EngineConfig;
use crate::core::currency::CurrencyCode;
use crate::core::error::{Result, SettlementError};
use crate::core::event::{EventLog, EventOutcome, EventType, SettlementEvent};
use crate::core::ids::{AccountId, BatchId, InstructionId, NettingId, OrderId, Symbol, TradeId};

/// How an instruction's legs are exchanged at settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SettlementType {
    /// Delivery versus payment: securities move against cash, both
    /// legs routed through the custodian.
    Dvp,
    /// Free of payment: securities move, cash settles elsewhere.
    Fop,
    /// Receive versus payment: the receiving side's view of DVP; both
    /// legs are checked here but moved by the counterparty's system.
    Rvp,
    /// Free delivery with no movement obligations on either leg.
    Free,
}

/// What the engine must check and move for a given settlement type.
///
/// Per-type behavior lives in this one table; the pipeline reads the
/// profile instead of matching on the type at each decision point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeProfile {
    /// Verify the buyer's cash balance before settling.
    pub check_cash: bool,
    /// Verify the seller's securities position before settling.
    pub check_security: bool,
    /// Route delivery and payment through the custodian service.
    pub transfer_via_custodian: bool,
}

impl SettlementType {
    /// Behavior profile for this settlement type.
    pub const fn profile(&self) -> TypeProfile {
        match self {
            SettlementType::Dvp => TypeProfile {
                check_cash: true,
                check_security: true,
                transfer_via_custodian: true,
            },
            SettlementType::Rvp => TypeProfile {
                check_cash: true,
                check_security: true,
                transfer_via_custodian: false,
            },
            SettlementType::Fop => TypeProfile {
                check_cash: false,
                check_security: true,
                transfer_via_custodian: false,
            },
            SettlementType::Free => TypeProfile {
                check_cash: false,
                check_security: false,
                transfer_via_custodian: false,
            },
        }
    }
}

impl fmt::Display for SettlementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            SettlementType::Dvp => "DVP",
            SettlementType::Fop => "FOP",
            SettlementType::Rvp => "RVP",
            SettlementType::Free => "FREE",
        };
        write!(f, "{}", tag)
    }
}

impl FromStr for SettlementType {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DVP" => Ok(SettlementType::Dvp),
            "FOP" => Ok(SettlementType::Fop),
            "RVP" => Ok(SettlementType::Rvp),
            "FREE" => Ok(SettlementType::Free),
            other => Err(SettlementError::Validation(format!(
                "unknown settlement type '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle state of a settlement instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstructionStatus {
    /// Created and waiting to be netted or settled.
    Pending,
    /// Absorbed into an in-flight netting run.
    Netting,
    /// Netted and released for settlement.
    Cleared,
    /// A settlement attempt is in flight.
    Processing,
    /// Both legs completed. Terminal.
    Settled,
    /// The last attempt failed; eligible for retry.
    Failed,
    /// Withdrawn before settlement. Terminal.
    Cancelled,
}

impl InstructionStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstructionStatus::Settled | InstructionStatus::Cancelled)
    }
}

impl fmt::Display for InstructionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            InstructionStatus::Pending => "PENDING",
            InstructionStatus::Netting => "NETTING",
            InstructionStatus::Cleared => "CLEARED",
            InstructionStatus::Processing => "PROCESSING",
            InstructionStatus::Settled => "SETTLED",
            InstructionStatus::Failed => "FAILED",
            InstructionStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", tag)
    }
}

/// Upstream trade confirmation from which an instruction is built.
///
/// This is the engine's ingest format: a matched trade as the trading
/// system reports it, before any settlement enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeConfirmation {
    pub trade_id: TradeId,
    pub order_id: Option<OrderId>,
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub price: Decimal,
    pub currency: CurrencyCode,
    pub settlement_type: SettlementType,
    pub buyer_account: AccountId,
    pub seller_account: AccountId,
    pub trade_date: NaiveDate,
    pub fee_amount: Option<Decimal>,
    pub fee_currency: Option<CurrencyCode>,
    pub tax_amount: Option<Decimal>,
}

/// Custodian and settlement accounts for both sides of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodianAssignment {
    pub buyer_custodian: AccountId,
    pub buyer_settle_account: AccountId,
    pub seller_custodian: AccountId,
    pub seller_settle_account: AccountId,
}

/// A settlement instruction: one trade's journey from confirmation to
/// settlement.
///
/// The instruction owns its lifecycle. Every mutation goes through a
/// transition method that checks the current status, refuses illegal
/// moves, and records the attempt in the shared [`EventLog`] whether it
/// succeeded or not. Fields are only readable through accessors, so
/// once constructed an instruction cannot be placed in a state the
/// transitions cannot reach.
///
/// # Examples
///
/// ```
/// use settlement_engine::core::config::EngineConfig;
/// use settlement_engine::core::event::EventLog;
/// use settlement_engine::core::ids::{AccountId, Symbol, TradeId};
/// use settlement_engine::core::currency::CurrencyCode;
/// use settlement_engine::core::instruction::{
///     InstructionStatus, SettlementInstruction, SettlementType, TradeConfirmation,
/// };
/// use chrono::NaiveDate;
/// use rust_decimal_macros::dec;
///
/// let mut log = EventLog::new();
/// let confirmation = TradeConfirmation {
///     trade_id: TradeId::new("T-1"),
///     order_id: None,
///     symbol: Symbol::new("AAPL"),
///     quantity: dec!(100),
///     price: dec!(45.30),
///     currency: CurrencyCode::new("USD"),
///     settlement_type: SettlementType::Dvp,
///     buyer_account: AccountId::new("ACCT-B"),
///     seller_account: AccountId::new("ACCT-S"),
///     trade_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
///     fee_amount: None,
///     fee_currency: None,
///     tax_amount: None,
/// };
///
/// let instruction = SettlementInstruction::from_confirmation(
///     confirmation,
///     &EngineConfig::default(),
///     &mut log,
/// ).unwrap();
///
/// assert_eq!(instruction.status(), InstructionStatus::Pending);
/// assert_eq!(instruction.amount(), dec!(4530.00));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementInstruction {
    id: InstructionId,
    trade_id: TradeId,
    order_id: Option<OrderId>,
    symbol: Symbol,
    quantity: Decimal,
    price: Decimal,
    /// Cash consideration: quantity x price, fixed at creation.
    amount: Decimal,
    currency: CurrencyCode,
    settlement_type: SettlementType,
    buyer_account: AccountId,
    buyer_custodian: Option<AccountId>,
    buyer_settle_account: Option<AccountId>,
    seller_account: AccountId,
    seller_custodian: Option<AccountId>,
    seller_settle_account: Option<AccountId>,
    trade_date: NaiveDate,
    /// Contractual settlement date: trade date + settlement cycle.
    settlement_date: NaiveDate,
    status: InstructionStatus,
    /// Why the instruction most recently failed or was cancelled.
    fail_reason: Option<String>,
    retry_count: u32,
    max_retry: u32,
    /// Whether the trade is novated to a central counterparty.
    ccp_flag: bool,
    ccp_account: Option<AccountId>,
    netting_id: Option<NettingId>,
    batch_id: Option<BatchId>,
    fee_amount: Option<Decimal>,
    fee_currency: Option<CurrencyCode>,
    tax_amount: Option<Decimal>,
    created_at: DateTime<Utc>,
    confirmed_at: DateTime<Utc>,
    settled_at: Option<DateTime<Utc>>,
}

impl SettlementInstruction {
    /// Build a pending instruction from a trade confirmation.
    ///
    /// The cash amount is computed as quantity x price and the
    /// settlement date as trade date plus the configured cycle.
    /// Creation is recorded in the event log.
    pub fn from_confirmation(
        confirmation: TradeConfirmation,
        config: &EngineConfig,
        log: &mut EventLog,
    ) -> Result<Self> {
        if confirmation.quantity <= Decimal::ZERO {
            return Err(SettlementError::Validation(format!(
                "quantity must be positive, got {}",
                confirmation.quantity
            )));
        }
        if confirmation.price <= Decimal::ZERO {
            return Err(SettlementError::Validation(format!(
                "price must be positive, got {}",
                confirmation.price
            )));
        }
        if confirmation.buyer_account == confirmation.seller_account {
            return Err(SettlementError::Validation(format!(
                "buyer and seller accounts must differ, both are {}",
                confirmation.buyer_account
            )));
        }
        let settlement_date = confirmation
            .trade_date
            .checked_add_days(Days::new(u64::from(config.settlement_cycle_days)))
            .ok_or_else(|| {
                SettlementError::Validation(format!(
                    "settlement date overflows calendar from trade date {}",
                    confirmation.trade_date
                ))
            })?;

        let now = Utc::now();
        let instruction = Self {
            id: InstructionId::generate(),
            trade_id: confirmation.trade_id,
            order_id: confirmation.order_id,
            symbol: confirmation.symbol,
            quantity: confirmation.quantity,
            price: confirmation.price,
            amount: confirmation.quantity * confirmation.price,
            currency: confirmation.currency,
            settlement_type: confirmation.settlement_type,
            buyer_account: confirmation.buyer_account,
            buyer_custodian: None,
            buyer_settle_account: None,
            seller_account: confirmation.seller_account,
            seller_custodian: None,
            seller_settle_account: None,
            trade_date: confirmation.trade_date,
            settlement_date,
            status: InstructionStatus::Pending,
            fail_reason: None,
            retry_count: 0,
            max_retry: config.max_retry,
            ccp_flag: false,
            ccp_account: None,
            netting_id: None,
            batch_id: None,
            fee_amount: confirmation.fee_amount,
            fee_currency: confirmation.fee_currency,
            tax_amount: confirmation.tax_amount,
            created_at: now,
            confirmed_at: now,
            settled_at: None,
        };

        log.record(
            instruction.id,
            SettlementEvent::new(
                EventType::Created,
                EventOutcome::Pending,
                format!(
                    "created from trade {}: {} {} {} @ {} {}, settling {}",
                    instruction.trade_id,
                    instruction.settlement_type,
                    instruction.quantity,
                    instruction.symbol,
                    instruction.price,
                    instruction.currency,
                    instruction.settlement_date
                ),
            ),
        );
        Ok(instruction)
    }

    // --- Lifecycle transitions ---

    /// Pending -> Netting. Joins the given netting run.
    pub fn start_netting(&mut self, netting_id: NettingId, log: &mut EventLog) -> Result<()> {
        if self.status != InstructionStatus::Pending {
            return Err(self.refuse("net", EventType::NettingStarted, log));
        }
        self.status = InstructionStatus::Netting;
        self.netting_id = Some(netting_id);
        log.record(
            self.id,
            SettlementEvent::new(
                EventType::NettingStarted,
                EventOutcome::Processing,
                format!("joined netting run {}", netting_id),
            ),
        );
        Ok(())
    }

    /// Netting -> Cleared.
    pub fn complete_netting(&mut self, log: &mut EventLog) -> Result<()> {
        if self.status != InstructionStatus::Netting {
            return Err(self.refuse("clear", EventType::NettingCompleted, log));
        }
        self.status = InstructionStatus::Cleared;
        let run = match self.netting_id {
            Some(id) => format!("netting run {}", id),
            None => "netting".to_string(),
        };
        log.record(
            self.id,
            SettlementEvent::new(
                EventType::NettingCompleted,
                EventOutcome::Success,
                format!("cleared by {}", run),
            ),
        );
        Ok(())
    }

    /// Pending | Cleared -> Processing. Instructions that were never
    /// netted go straight from Pending into processing.
    pub fn start_processing(&mut self, batch_id: Option<BatchId>, log: &mut EventLog) -> Result<()> {
        if !matches!(
            self.status,
            InstructionStatus::Pending | InstructionStatus::Cleared
        ) {
            return Err(self.refuse("process", EventType::ProcessingStarted, log));
        }
        self.status = InstructionStatus::Processing;
        if batch_id.is_some() {
            self.batch_id = batch_id;
        }
        let context = match batch_id {
            Some(id) => format!(" in batch {}", id),
            None => String::new(),
        };
        log.record(
            self.id,
            SettlementEvent::new(
                EventType::ProcessingStarted,
                EventOutcome::Processing,
                format!("settlement processing started{}", context),
            ),
        );
        Ok(())
    }

    /// Processing -> Settled. Stamps the settlement timestamp.
    pub fn settle(&mut self, log: &mut EventLog) -> Result<()> {
        if self.status != InstructionStatus::Processing {
            return Err(self.refuse("settle", EventType::Settled, log));
        }
        self.status = InstructionStatus::Settled;
        self.settled_at = Some(Utc::now());
        log.record(
            self.id,
            SettlementEvent::new(
                EventType::Settled,
                EventOutcome::Success,
                format!(
                    "settled: {} {} delivered against {} {}",
                    self.quantity, self.symbol, self.amount, self.currency
                ),
            ),
        );
        Ok(())
    }

    /// Any non-terminal state -> Failed, with the reason preserved.
    pub fn fail(&mut self, reason: &str, log: &mut EventLog) -> Result<()> {
        if self.status.is_terminal() {
            return Err(self.refuse("fail", EventType::Failed, log));
        }
        self.status = InstructionStatus::Failed;
        self.fail_reason = Some(reason.to_string());
        log.record(
            self.id,
            SettlementEvent::new(EventType::Failed, EventOutcome::Failed, reason),
        );
        Ok(())
    }

    /// Failed -> Pending, consuming one retry attempt.
    ///
    /// Refused with [`SettlementError::MaxRetryExceeded`] once the
    /// retry budget is spent.
    pub fn retry(&mut self, log: &mut EventLog) -> Result<()> {
        if self.status != InstructionStatus::Failed {
            return Err(self.refuse("retry", EventType::RetryScheduled, log));
        }
        if self.retry_count >= self.max_retry {
            let err = SettlementError::MaxRetryExceeded {
                retries: self.retry_count,
                max_retry: self.max_retry,
            };
            log.record(
                self.id,
                SettlementEvent::new(EventType::RetryScheduled, EventOutcome::Failed, err.to_string()),
            );
            return Err(err);
        }
        self.retry_count += 1;
        self.status = InstructionStatus::Pending;
        self.fail_reason = None;
        log.record(
            self.id,
            SettlementEvent::new(
                EventType::RetryScheduled,
                EventOutcome::Pending,
                format!(
                    "retry {} of {}: instruction reset to pending",
                    self.retry_count, self.max_retry
                ),
            ),
        );
        Ok(())
    }

    /// Any state except Settled -> Cancelled.
    ///
    /// Cancelling a settled instruction is refused with
    /// [`SettlementError::AlreadySettled`]; assets have moved and only
    /// a compensating trade can unwind them.
    pub fn cancel(&mut self, reason: &str, log: &mut EventLog) -> Result<()> {
        match self.status {
            InstructionStatus::Settled => {
                let err = SettlementError::AlreadySettled(self.id);
                log.record(
                    self.id,
                    SettlementEvent::new(EventType::Cancelled, EventOutcome::Failed, err.to_string()),
                );
                Err(err)
            }
            InstructionStatus::Cancelled => Err(self.refuse("cancel", EventType::Cancelled, log)),
            _ => {
                self.status = InstructionStatus::Cancelled;
                self.fail_reason = Some(reason.to_string());
                log.record(
                    self.id,
                    SettlementEvent::new(EventType::Cancelled, EventOutcome::Cancelled, reason),
                );
                Ok(())
            }
        }
    }

    /// Whether a retry would currently be accepted.
    pub fn can_retry(&self) -> bool {
        self.status == InstructionStatus::Failed && self.retry_count < self.max_retry
    }

    // --- Enrichment ---

    /// Assign custodian and settlement accounts for both sides.
    /// Refused once the instruction is terminal.
    pub fn set_custodian(
        &mut self,
        assignment: CustodianAssignment,
        log: &mut EventLog,
    ) -> Result<()> {
        self.guard_enrichment("assign custodians to", EventType::CustodianAssigned, log)?;
        let description = format!(
            "custodians assigned: buyer {} settles via {}, seller {} settles via {}",
            assignment.buyer_custodian,
            assignment.buyer_settle_account,
            assignment.seller_custodian,
            assignment.seller_settle_account
        );
        self.buyer_custodian = Some(assignment.buyer_custodian);
        self.buyer_settle_account = Some(assignment.buyer_settle_account);
        self.seller_custodian = Some(assignment.seller_custodian);
        self.seller_settle_account = Some(assignment.seller_settle_account);
        log.record(
            self.id,
            SettlementEvent::new(EventType::CustodianAssigned, EventOutcome::Success, description),
        );
        Ok(())
    }

    /// Novate the trade to a central counterparty. Both legs will
    /// settle against the CCP account instead of the counterparties.
    /// Refused once the instruction is terminal.
    pub fn set_ccp(&mut self, ccp_account: AccountId, log: &mut EventLog) -> Result<()> {
        self.guard_enrichment("novate", EventType::CcpAssigned, log)?;
        let description = format!("novated to central counterparty account {}", ccp_account);
        self.ccp_flag = true;
        self.ccp_account = Some(ccp_account);
        log.record(
            self.id,
            SettlementEvent::new(EventType::CcpAssigned, EventOutcome::Success, description),
        );
        Ok(())
    }

    /// Account the security leg is delivered to and the cash leg paid
    /// from. The CCP account when novated, otherwise the buyer's
    /// settlement account, falling back to the trading account.
    pub fn effective_buyer(&self) -> AccountId {
        if self.ccp_flag {
            if let Some(ccp) = &self.ccp_account {
                return ccp.clone();
            }
        }
        self.buyer_settle_account
            .clone()
            .unwrap_or_else(|| self.buyer_account.clone())
    }

    /// Account the security leg is delivered from and the cash leg
    /// paid to. Mirrors [`Self::effective_buyer`].
    pub fn effective_seller(&self) -> AccountId {
        if self.ccp_flag {
            if let Some(ccp) = &self.ccp_account {
                return ccp.clone();
            }
        }
        self.seller_settle_account
            .clone()
            .unwrap_or_else(|| self.seller_account.clone())
    }

    /// Storage-side status write, not a lifecycle transition. Adapters
    /// use this to apply a narrow status update to a stored row; engine
    /// code goes through the transition methods.
    pub(crate) fn force_status(&mut self, status: InstructionStatus) {
        self.status = status;
    }

    fn refuse(
        &self,
        action: &'static str,
        event_type: EventType,
        log: &mut EventLog,
    ) -> SettlementError {
        let err = SettlementError::InvalidTransition {
            action,
            from: self.status,
        };
        log.record(
            self.id,
            SettlementEvent::new(event_type, EventOutcome::Failed, err.to_string()),
        );
        err
    }

    fn guard_enrichment(
        &self,
        action: &'static str,
        event_type: EventType,
        log: &mut EventLog,
    ) -> Result<()> {
        match self.status {
            InstructionStatus::Settled => {
                let err = SettlementError::AlreadySettled(self.id);
                log.record(
                    self.id,
                    SettlementEvent::new(event_type, EventOutcome::Failed, err.to_string()),
                );
                Err(err)
            }
            InstructionStatus::Cancelled => Err(self.refuse(action, event_type, log)),
            _ => Ok(()),
        }
    }

    // --- Accessors ---

    pub fn id(&self) -> InstructionId {
        self.id
    }

    pub fn trade_id(&self) -> &TradeId {
        &self.trade_id
    }

    pub fn order_id(&self) -> Option<&OrderId> {
        self.order_id.as_ref()
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &CurrencyCode {
        &self.currency
    }

    pub fn settlement_type(&self) -> SettlementType {
        self.settlement_type
    }

    pub fn buyer_account(&self) -> &AccountId {
        &self.buyer_account
    }

    pub fn buyer_custodian(&self) -> Option<&AccountId> {
        self.buyer_custodian.as_ref()
    }

    pub fn buyer_settle_account(&self) -> Option<&AccountId> {
        self.buyer_settle_account.as_ref()
    }

    pub fn seller_account(&self) -> &AccountId {
        &self.seller_account
    }

    pub fn seller_custodian(&self) -> Option<&AccountId> {
        self.seller_custodian.as_ref()
    }

    pub fn seller_settle_account(&self) -> Option<&AccountId> {
        self.seller_settle_account.as_ref()
    }

    pub fn trade_date(&self) -> NaiveDate {
        self.trade_date
    }

    pub fn settlement_date(&self) -> NaiveDate {
        self.settlement_date
    }

    pub fn status(&self) -> InstructionStatus {
        self.status
    }

    pub fn fail_reason(&self) -> Option<&str> {
        self.fail_reason.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    pub fn ccp_flag(&self) -> bool {
        self.ccp_flag
    }

    pub fn ccp_account(&self) -> Option<&AccountId> {
        self.ccp_account.as_ref()
    }

    pub fn netting_id(&self) -> Option<NettingId> {
        self.netting_id
    }

    pub fn batch_id(&self) -> Option<BatchId> {
        self.batch_id
    }

    pub fn fee_amount(&self) -> Option<Decimal> {
        self.fee_amount
    }

    pub fn fee_currency(&self) -> Option<&CurrencyCode> {
        self.fee_currency.as_ref()
    }

    pub fn tax_amount(&self) -> Option<Decimal> {
        self.tax_amount
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn confirmed_at(&self) -> DateTime<Utc> {
        self.confirmed_at
    }

    pub fn settled_at(&self) -> Option<DateTime<Utc>> {
        self.settled_at
    }
}

impl fmt::Display for SettlementInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} {} {} @ {} {} ({} -> {}) {}",
            self.id,
            self.settlement_type,
            self.status,
            self.quantity,
            self.symbol,
            self.price,
            self.currency,
            self.seller_account,
            self.buyer_account,
            self.settlement_date
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_confirmation() -> TradeConfirmation {
        TradeConfirmation {
            trade_id: TradeId::new("T-1001"),
            order_id: Some(OrderId::new("O-77")),
            symbol: Symbol::new("AAPL"),
            quantity: dec!(100),
            price: dec!(45.30),
            currency: CurrencyCode::new("USD"),
            settlement_type: SettlementType::Dvp,
            buyer_account: AccountId::new("ACCT-BUY"),
            seller_account: AccountId::new("ACCT-SELL"),
            trade_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            fee_amount: Some(dec!(2.50)),
            fee_currency: Some(CurrencyCode::new("USD")),
            tax_amount: None,
        }
    }

    fn sample_instruction(log: &mut EventLog) -> SettlementInstruction {
        SettlementInstruction::from_confirmation(
            sample_confirmation(),
            &EngineConfig::default(),
            log,
        )
        .unwrap()
    }

    #[test]
    fn test_creation_computes_amount_and_date() {
        let mut log = EventLog::new();
        let instruction = sample_instruction(&mut log);

        assert_eq!(instruction.status(), InstructionStatus::Pending);
        assert_eq!(instruction.amount(), dec!(4530.00));
        assert_eq!(
            instruction.settlement_date(),
            NaiveDate::from_ymd_opt(2024, 1, 17).unwrap()
        );
        assert_eq!(instruction.retry_count(), 0);
        assert_eq!(instruction.max_retry(), 3);
        assert!(!instruction.ccp_flag());
        assert!(instruction.settled_at().is_none());

        let history = log.for_instruction(instruction.id());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type, EventType::Created);
        assert_eq!(history[0].outcome, EventOutcome::Pending);
    }

    #[test]
    fn test_creation_rejects_bad_input() {
        let mut log = EventLog::new();
        let config = EngineConfig::default();

        let mut zero_qty = sample_confirmation();
        zero_qty.quantity = Decimal::ZERO;
        assert!(matches!(
            SettlementInstruction::from_confirmation(zero_qty, &config, &mut log),
            Err(SettlementError::Validation(_))
        ));

        let mut negative_price = sample_confirmation();
        negative_price.price = dec!(-1);
        assert!(SettlementInstruction::from_confirmation(negative_price, &config, &mut log).is_err());

        let mut self_trade = sample_confirmation();
        self_trade.seller_account = self_trade.buyer_account.clone();
        assert!(SettlementInstruction::from_confirmation(self_trade, &config, &mut log).is_err());
    }

    #[test]
    fn test_full_lifecycle_with_netting() {
        let mut log = EventLog::new();
        let mut instruction = sample_instruction(&mut log);
        let netting_id = NettingId::generate();
        let batch_id = BatchId::generate();

        instruction.start_netting(netting_id, &mut log).unwrap();
        assert_eq!(instruction.status(), InstructionStatus::Netting);
        assert_eq!(instruction.netting_id(), Some(netting_id));

        instruction.complete_netting(&mut log).unwrap();
        assert_eq!(instruction.status(), InstructionStatus::Cleared);

        instruction.start_processing(Some(batch_id), &mut log).unwrap();
        assert_eq!(instruction.status(), InstructionStatus::Processing);
        assert_eq!(instruction.batch_id(), Some(batch_id));

        instruction.settle(&mut log).unwrap();
        assert_eq!(instruction.status(), InstructionStatus::Settled);
        assert!(instruction.settled_at().is_some());

        // Created, netting x2, processing, settled.
        assert_eq!(log.for_instruction(instruction.id()).len(), 5);
    }

    #[test]
    fn test_direct_processing_skips_netting() {
        let mut log = EventLog::new();
        let mut instruction = sample_instruction(&mut log);

        instruction.start_processing(None, &mut log).unwrap();
        assert_eq!(instruction.status(), InstructionStatus::Processing);
        assert_eq!(instruction.batch_id(), None);
        assert_eq!(instruction.netting_id(), None);
    }

    #[test]
    fn test_illegal_transition_is_refused_and_recorded() {
        let mut log = EventLog::new();
        let mut instruction = sample_instruction(&mut log);

        let err = instruction.settle(&mut log).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::InvalidTransition {
                from: InstructionStatus::Pending,
                ..
            }
        ));
        // Status unchanged, refusal recorded.
        assert_eq!(instruction.status(), InstructionStatus::Pending);
        let last = log.last_for(instruction.id()).unwrap();
        assert_eq!(last.event_type, EventType::Settled);
        assert_eq!(last.outcome, EventOutcome::Failed);
    }

    #[test]
    fn test_netting_twice_is_refused() {
        let mut log = EventLog::new();
        let mut instruction = sample_instruction(&mut log);
        instruction
            .start_netting(NettingId::generate(), &mut log)
            .unwrap();

        let err = instruction
            .start_netting(NettingId::generate(), &mut log)
            .unwrap_err();
        assert!(matches!(err, SettlementError::InvalidTransition { .. }));
        assert_eq!(instruction.status(), InstructionStatus::Netting);
    }

    #[test]
    fn test_fail_and_retry_round_trip() {
        let mut log = EventLog::new();
        let mut instruction = sample_instruction(&mut log);

        instruction.start_processing(None, &mut log).unwrap();
        instruction.fail("custodian link down", &mut log).unwrap();
        assert_eq!(instruction.status(), InstructionStatus::Failed);
        assert_eq!(instruction.fail_reason(), Some("custodian link down"));
        assert!(instruction.can_retry());

        instruction.retry(&mut log).unwrap();
        assert_eq!(instruction.status(), InstructionStatus::Pending);
        assert_eq!(instruction.retry_count(), 1);
        assert_eq!(instruction.fail_reason(), None);
    }

    #[test]
    fn test_retry_budget_exhausts() {
        let mut log = EventLog::new();
        let mut instruction = sample_instruction(&mut log);

        for attempt in 1..=3 {
            instruction.start_processing(None, &mut log).unwrap();
            instruction.fail("no liquidity", &mut log).unwrap();
            instruction.retry(&mut log).unwrap();
            assert_eq!(instruction.retry_count(), attempt);
        }

        instruction.start_processing(None, &mut log).unwrap();
        instruction.fail("no liquidity", &mut log).unwrap();
        assert!(!instruction.can_retry());
        let err = instruction.retry(&mut log).unwrap_err();
        assert!(matches!(
            err,
            SettlementError::MaxRetryExceeded {
                retries: 3,
                max_retry: 3
            }
        ));
        assert_eq!(instruction.status(), InstructionStatus::Failed);
    }

    #[test]
    fn test_retry_from_non_failed_is_refused() {
        let mut log = EventLog::new();
        let mut instruction = sample_instruction(&mut log);
        assert!(instruction.retry(&mut log).is_err());
        assert_eq!(instruction.retry_count(), 0);
    }

    #[test]
    fn test_cancel_before_settlement() {
        let mut log = EventLog::new();
        let mut instruction = sample_instruction(&mut log);

        instruction.cancel("trade busted upstream", &mut log).unwrap();
        assert_eq!(instruction.status(), InstructionStatus::Cancelled);
        assert_eq!(instruction.fail_reason(), Some("trade busted upstream"));

        // Terminal: nothing moves anymore.
        assert!(instruction.start_processing(None, &mut log).is_err());
        assert!(instruction.fail("x", &mut log).is_err());
        assert!(instruction.cancel("again", &mut log).is_err());
    }

    #[test]
    fn test_cancel_after_settlement_is_refused() {
        let mut log = EventLog::new();
        let mut instruction = sample_instruction(&mut log);
        instruction.start_processing(None, &mut log).unwrap();
        instruction.settle(&mut log).unwrap();

        let err = instruction.cancel("too late", &mut log).unwrap_err();
        assert!(matches!(err, SettlementError::AlreadySettled(_)));
        assert_eq!(instruction.status(), InstructionStatus::Settled);
    }

    #[test]
    fn test_fail_from_failed_updates_reason() {
        let mut log = EventLog::new();
        let mut instruction = sample_instruction(&mut log);
        instruction.start_processing(None, &mut log).unwrap();
        instruction.fail("first", &mut log).unwrap();
        instruction.fail("second", &mut log).unwrap();
        assert_eq!(instruction.fail_reason(), Some("second"));
        assert_eq!(instruction.status(), InstructionStatus::Failed);
    }

    #[test]
    fn test_custodian_assignment() {
        let mut log = EventLog::new();
        let mut instruction = sample_instruction(&mut log);

        instruction
            .set_custodian(
                CustodianAssignment {
                    buyer_custodian: AccountId::new("CUST-B"),
                    buyer_settle_account: AccountId::new("SETTLE-B"),
                    seller_custodian: AccountId::new("CUST-S"),
                    seller_settle_account: AccountId::new("SETTLE-S"),
                },
                &mut log,
            )
            .unwrap();

        assert_eq!(instruction.buyer_custodian().unwrap().as_str(), "CUST-B");
        assert_eq!(instruction.effective_buyer().as_str(), "SETTLE-B");
        assert_eq!(instruction.effective_seller().as_str(), "SETTLE-S");
    }

    #[test]
    fn test_effective_accounts_default_to_trading_accounts() {
        let mut log = EventLog::new();
        let instruction = sample_instruction(&mut log);
        assert_eq!(instruction.effective_buyer().as_str(), "ACCT-BUY");
        assert_eq!(instruction.effective_seller().as_str(), "ACCT-SELL");
    }

    #[test]
    fn test_ccp_novation_overrides_both_sides() {
        let mut log = EventLog::new();
        let mut instruction = sample_instruction(&mut log);
        instruction
            .set_ccp(AccountId::new("CCP-MAIN"), &mut log)
            .unwrap();

        assert!(instruction.ccp_flag());
        assert_eq!(instruction.effective_buyer().as_str(), "CCP-MAIN");
        assert_eq!(instruction.effective_seller().as_str(), "CCP-MAIN");
    }

    #[test]
    fn test_enrichment_refused_after_settlement() {
        let mut log = EventLog::new();
        let mut instruction = sample_instruction(&mut log);
        instruction.start_processing(None, &mut log).unwrap();
        instruction.settle(&mut log).unwrap();

        let err = instruction
            .set_ccp(AccountId::new("CCP-MAIN"), &mut log)
            .unwrap_err();
        assert!(matches!(err, SettlementError::AlreadySettled(_)));
    }

    #[test]
    fn test_type_profiles() {
        assert_eq!(
            SettlementType::Dvp.profile(),
            TypeProfile {
                check_cash: true,
                check_security: true,
                transfer_via_custodian: true
            }
        );
        assert_eq!(
            SettlementType::Rvp.profile(),
            TypeProfile {
                check_cash: true,
                check_security: true,
                transfer_via_custodian: false
            }
        );
        assert_eq!(
            SettlementType::Fop.profile(),
            TypeProfile {
                check_cash: false,
                check_security: true,
                transfer_via_custodian: false
            }
        );
        assert_eq!(
            SettlementType::Free.profile(),
            TypeProfile {
                check_cash: false,
                check_security: false,
                transfer_via_custodian: false
            }
        );
    }

    #[test]
    fn test_settlement_type_parsing() {
        assert_eq!("dvp".parse::<SettlementType>().unwrap(), SettlementType::Dvp);
        assert_eq!("FOP".parse::<SettlementType>().unwrap(), SettlementType::Fop);
        assert!("PVP".parse::<SettlementType>().is_err());
    }

    #[test]
    fn test_status_serde_tags() {
        let json = serde_json::to_string(&InstructionStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
        let json = serde_json::to_string(&SettlementType::Free).unwrap();
        assert_eq!(json, "\"FREE\"");
    }
}
