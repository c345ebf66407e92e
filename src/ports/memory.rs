//! In-memory port adapters for tests, demos, and the CLI.
//!
//! Each adapter keeps its rows behind a [`parking_lot::RwLock`] and
//! honors the session deadline by refusing work once it has passed.
//! The custodian additionally keeps a transfer journal and supports
//! scripted outages, so failure handling can be exercised end to end.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::core::currency::{CurrencyCode, FxRate, FxRateBook};
use crate::core::error::{Result, SettlementError, TransferLeg};
use crate::core::ids::{AccountId, BatchId, InstructionId, NettingId, Symbol, TradeId};
use crate::core::instruction::{InstructionStatus, SettlementInstruction};
use crate::engine::batch::SettlementBatch;
use crate::engine::netting::NettingResult;
use crate::ports::traits::{
    BatchRepository, CcpService, CustodianService, FxRateRepository, NettingRepository,
    NotificationService, Ports, Session, SettlementRepository,
};

fn awaiting_settlement(status: InstructionStatus) -> bool {
    matches!(
        status,
        InstructionStatus::Pending | InstructionStatus::Cleared
    )
}

/// Instruction store backed by a hash map.
#[derive(Debug, Default)]
pub struct MemorySettlementStore {
    rows: RwLock<HashMap<InstructionId, SettlementInstruction>>,
}

impl MemorySettlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl SettlementRepository for MemorySettlementStore {
    fn save(&self, session: &Session, instruction: &SettlementInstruction) -> Result<()> {
        session.check()?;
        let mut rows = self.rows.write();
        if rows.contains_key(&instruction.id()) {
            return Err(SettlementError::Storage(format!(
                "instruction {} already exists",
                instruction.id()
            )));
        }
        rows.insert(instruction.id(), instruction.clone());
        Ok(())
    }

    fn update(&self, session: &Session, instruction: &SettlementInstruction) -> Result<()> {
        session.check()?;
        let mut rows = self.rows.write();
        if !rows.contains_key(&instruction.id()) {
            return Err(SettlementError::InstructionNotFound(instruction.id()));
        }
        rows.insert(instruction.id(), instruction.clone());
        Ok(())
    }

    fn update_status(
        &self,
        session: &Session,
        id: InstructionId,
        status: InstructionStatus,
    ) -> Result<()> {
        session.check()?;
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(&id)
            .ok_or(SettlementError::InstructionNotFound(id))?;
        row.force_status(status);
        Ok(())
    }

    fn get(&self, session: &Session, id: InstructionId) -> Result<SettlementInstruction> {
        session.check()?;
        self.rows
            .read()
            .get(&id)
            .cloned()
            .ok_or(SettlementError::InstructionNotFound(id))
    }

    fn get_by_trade_id(
        &self,
        session: &Session,
        trade_id: &TradeId,
    ) -> Result<Vec<SettlementInstruction>> {
        session.check()?;
        let mut matches: Vec<SettlementInstruction> = self
            .rows
            .read()
            .values()
            .filter(|i| i.trade_id() == trade_id)
            .cloned()
            .collect();
        matches.sort_by_key(|i| i.created_at());
        Ok(matches)
    }

    fn find_pending_by_date(
        &self,
        session: &Session,
        due: NaiveDate,
        limit: usize,
    ) -> Result<Vec<SettlementInstruction>> {
        session.check()?;
        let mut matches: Vec<SettlementInstruction> = self
            .rows
            .read()
            .values()
            .filter(|i| awaiting_settlement(i.status()) && i.settlement_date() <= due)
            .cloned()
            .collect();
        matches.sort_by_key(|i| (i.settlement_date(), i.created_at()));
        matches.truncate(limit);
        Ok(matches)
    }

    fn find_pending_by_account(
        &self,
        session: &Session,
        account: &AccountId,
        limit: usize,
    ) -> Result<Vec<SettlementInstruction>> {
        session.check()?;
        let mut matches: Vec<SettlementInstruction> = self
            .rows
            .read()
            .values()
            .filter(|i| {
                awaiting_settlement(i.status())
                    && (i.buyer_account() == account || i.seller_account() == account)
            })
            .cloned()
            .collect();
        matches.sort_by_key(|i| (i.settlement_date(), i.created_at()));
        matches.truncate(limit);
        Ok(matches)
    }
}

/// Netting result store backed by a hash map.
#[derive(Debug, Default)]
pub struct MemoryNettingStore {
    rows: RwLock<HashMap<NettingId, NettingResult>>,
}

impl MemoryNettingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }
}

impl NettingRepository for MemoryNettingStore {
    fn save(&self, session: &Session, result: &NettingResult) -> Result<()> {
        session.check()?;
        let mut rows = self.rows.write();
        if rows.contains_key(&result.netting_id()) {
            return Err(SettlementError::Storage(format!(
                "netting result {} already exists",
                result.netting_id()
            )));
        }
        rows.insert(result.netting_id(), result.clone());
        Ok(())
    }

    fn get(&self, session: &Session, id: NettingId) -> Result<NettingResult> {
        session.check()?;
        self.rows
            .read()
            .get(&id)
            .cloned()
            .ok_or(SettlementError::NettingNotFound(id))
    }

    fn get_by_account_and_currency(
        &self,
        session: &Session,
        account: &AccountId,
        currency: &CurrencyCode,
    ) -> Result<Vec<NettingResult>> {
        session.check()?;
        let mut matches: Vec<NettingResult> = self
            .rows
            .read()
            .values()
            .filter(|r| r.account_id() == account && r.currency() == currency)
            .cloned()
            .collect();
        matches.sort_by_key(|r| std::cmp::Reverse(r.computed_at()));
        Ok(matches)
    }
}

/// Batch store backed by a hash map. `save` upserts, since a batch is
/// written at start and rewritten at completion.
#[derive(Debug, Default)]
pub struct MemoryBatchStore {
    rows: RwLock<HashMap<BatchId, SettlementBatch>>,
}

impl MemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }
}

impl BatchRepository for MemoryBatchStore {
    fn save(&self, session: &Session, batch: &SettlementBatch) -> Result<()> {
        session.check()?;
        self.rows.write().insert(batch.batch_id(), batch.clone());
        Ok(())
    }

    fn get(&self, session: &Session, id: BatchId) -> Result<SettlementBatch> {
        session.check()?;
        self.rows
            .read()
            .get(&id)
            .cloned()
            .ok_or(SettlementError::BatchNotFound(id))
    }

    fn get_by_date(&self, session: &Session, date: NaiveDate) -> Result<Vec<SettlementBatch>> {
        session.check()?;
        let mut matches: Vec<SettlementBatch> = self
            .rows
            .read()
            .values()
            .filter(|b| b.settlement_date() == date)
            .cloned()
            .collect();
        matches.sort_by_key(|b| b.started_at());
        Ok(matches)
    }
}

/// FX rate source backed by an in-memory [`FxRateBook`].
#[derive(Debug, Default)]
pub struct MemoryFxRates {
    book: RwLock<FxRateBook>,
}

impl MemoryFxRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, rate: FxRate) {
        self.book.write().insert(rate);
    }

    pub fn quote_count(&self) -> usize {
        self.book.read().len()
    }
}

impl FxRateRepository for MemoryFxRates {
    fn rate(&self, session: &Session, from: &CurrencyCode, to: &CurrencyCode) -> Result<FxRate> {
        session.check()?;
        Ok(self.book.read().latest(from, to)?)
    }
}

/// One booked movement at the in-memory custodian.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub leg: TransferLeg,
    pub from: AccountId,
    pub to: AccountId,
    pub symbol: Option<Symbol>,
    pub currency: Option<CurrencyCode>,
    pub amount: Decimal,
    pub booked_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CustodianBooks {
    cash: HashMap<(AccountId, CurrencyCode), Decimal>,
    positions: HashMap<(AccountId, Symbol), Decimal>,
    frozen: HashSet<AccountId>,
    journal: Vec<TransferRecord>,
    cash_outage: Option<String>,
    security_outage: Option<String>,
    /// Number of further security transfers allowed before an armed
    /// security outage starts biting.
    security_outage_delay: u32,
}

impl CustodianBooks {
    fn ensure_active(&self, leg: TransferLeg, account: &AccountId) -> Result<()> {
        if self.frozen.contains(account) {
            return Err(SettlementError::TransferFailure {
                leg,
                reason: format!("account {} is frozen", account),
            });
        }
        Ok(())
    }
}

/// Custodian adapter holding cash and securities books in memory.
///
/// Transfers debit and credit atomically under one lock, refuse frozen
/// accounts and overdrafts, and append to a journal tests can inspect.
/// `set_cash_outage` / `set_security_outage` make the next transfers
/// fail with the given reason, which is how the compensation path is
/// exercised.
#[derive(Debug, Default)]
pub struct MemoryCustodian {
    books: RwLock<CustodianBooks>,
}

impl MemoryCustodian {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit_cash(&self, account: &AccountId, currency: &CurrencyCode, amount: Decimal) {
        let mut books = self.books.write();
        *books
            .cash
            .entry((account.clone(), currency.clone()))
            .or_insert(Decimal::ZERO) += amount;
    }

    pub fn credit_security(&self, account: &AccountId, symbol: &Symbol, quantity: Decimal) {
        let mut books = self.books.write();
        *books
            .positions
            .entry((account.clone(), symbol.clone()))
            .or_insert(Decimal::ZERO) += quantity;
    }

    /// Direct balance peek for assertions, bypassing the port.
    pub fn balance_of(&self, account: &AccountId, currency: &CurrencyCode) -> Decimal {
        self.books
            .read()
            .cash
            .get(&(account.clone(), currency.clone()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Direct position peek for assertions, bypassing the port.
    pub fn position_of(&self, account: &AccountId, symbol: &Symbol) -> Decimal {
        self.books
            .read()
            .positions
            .get(&(account.clone(), symbol.clone()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn journal(&self) -> Vec<TransferRecord> {
        self.books.read().journal.clone()
    }

    /// Make subsequent cash transfers fail with the given reason.
    /// `None` clears the outage.
    pub fn set_cash_outage(&self, reason: Option<&str>) {
        self.books.write().cash_outage = reason.map(str::to_string);
    }

    /// Make subsequent security transfers fail with the given reason.
    /// `None` clears the outage.
    pub fn set_security_outage(&self, reason: Option<&str>) {
        let mut books = self.books.write();
        books.security_outage = reason.map(str::to_string);
        books.security_outage_delay = 0;
    }

    /// Allow `transfers` more security transfers, then fail the rest
    /// with the given reason. Lets tests break the second leg of a
    /// sequence while the first succeeds.
    pub fn set_security_outage_after(&self, transfers: u32, reason: &str) {
        let mut books = self.books.write();
        books.security_outage = Some(reason.to_string());
        books.security_outage_delay = transfers;
    }
}

impl CustodianService for MemoryCustodian {
    fn transfer_security(
        &self,
        session: &Session,
        from: &AccountId,
        to: &AccountId,
        symbol: &Symbol,
        quantity: Decimal,
    ) -> Result<()> {
        session.check()?;
        let mut books = self.books.write();
        if books.security_outage.is_some() && books.security_outage_delay > 0 {
            books.security_outage_delay -= 1;
        } else if let Some(reason) = &books.security_outage {
            return Err(SettlementError::TransferFailure {
                leg: TransferLeg::Security,
                reason: reason.clone(),
            });
        }
        books.ensure_active(TransferLeg::Security, from)?;
        books.ensure_active(TransferLeg::Security, to)?;

        let held = books
            .positions
            .get(&(from.clone(), symbol.clone()))
            .copied()
            .unwrap_or(Decimal::ZERO);
        if held < quantity {
            return Err(SettlementError::TransferFailure {
                leg: TransferLeg::Security,
                reason: format!(
                    "position short at custodian: {} holds {} {}, transfer needs {}",
                    from, held, symbol, quantity
                ),
            });
        }
        books
            .positions
            .insert((from.clone(), symbol.clone()), held - quantity);
        *books
            .positions
            .entry((to.clone(), symbol.clone()))
            .or_insert(Decimal::ZERO) += quantity;
        books.journal.push(TransferRecord {
            leg: TransferLeg::Security,
            from: from.clone(),
            to: to.clone(),
            symbol: Some(symbol.clone()),
            currency: None,
            amount: quantity,
            booked_at: Utc::now(),
        });
        Ok(())
    }

    fn transfer_cash(
        &self,
        session: &Session,
        from: &AccountId,
        to: &AccountId,
        amount: Decimal,
        currency: &CurrencyCode,
    ) -> Result<()> {
        session.check()?;
        let mut books = self.books.write();
        if let Some(reason) = &books.cash_outage {
            return Err(SettlementError::TransferFailure {
                leg: TransferLeg::Cash,
                reason: reason.clone(),
            });
        }
        books.ensure_active(TransferLeg::Cash, from)?;
        books.ensure_active(TransferLeg::Cash, to)?;

        let held = books
            .cash
            .get(&(from.clone(), currency.clone()))
            .copied()
            .unwrap_or(Decimal::ZERO);
        if held < amount {
            return Err(SettlementError::TransferFailure {
                leg: TransferLeg::Cash,
                reason: format!(
                    "cash short at custodian: {} holds {} {}, transfer needs {}",
                    from, held, currency, amount
                ),
            });
        }
        books
            .cash
            .insert((from.clone(), currency.clone()), held - amount);
        *books
            .cash
            .entry((to.clone(), currency.clone()))
            .or_insert(Decimal::ZERO) += amount;
        books.journal.push(TransferRecord {
            leg: TransferLeg::Cash,
            from: from.clone(),
            to: to.clone(),
            symbol: None,
            currency: Some(currency.clone()),
            amount,
            booked_at: Utc::now(),
        });
        Ok(())
    }

    fn account_balance(
        &self,
        session: &Session,
        account: &AccountId,
        currency: &CurrencyCode,
    ) -> Result<Decimal> {
        session.check()?;
        Ok(self.balance_of(account, currency))
    }

    fn security_position(
        &self,
        session: &Session,
        account: &AccountId,
        symbol: &Symbol,
    ) -> Result<Decimal> {
        session.check()?;
        Ok(self.position_of(account, symbol))
    }

    fn freeze_account(&self, session: &Session, account: &AccountId) -> Result<()> {
        session.check()?;
        self.books.write().frozen.insert(account.clone());
        Ok(())
    }

    fn unfreeze_account(&self, session: &Session, account: &AccountId) -> Result<()> {
        session.check()?;
        self.books.write().frozen.remove(account);
        Ok(())
    }
}

/// CCP adapter that records registrations and quotes a flat initial
/// margin as a fraction of notional.
#[derive(Debug)]
pub struct MemoryCcp {
    margin_fraction: Decimal,
    registered: RwLock<Vec<InstructionId>>,
}

impl MemoryCcp {
    pub fn new() -> Self {
        // 5% of notional.
        Self::with_margin_fraction(Decimal::new(5, 2))
    }

    pub fn with_margin_fraction(margin_fraction: Decimal) -> Self {
        Self {
            margin_fraction,
            registered: RwLock::new(Vec::new()),
        }
    }

    pub fn registered(&self) -> Vec<InstructionId> {
        self.registered.read().clone()
    }
}

impl Default for MemoryCcp {
    fn default() -> Self {
        Self::new()
    }
}

impl CcpService for MemoryCcp {
    fn register_trade(
        &self,
        session: &Session,
        instruction: &SettlementInstruction,
    ) -> Result<()> {
        session.check()?;
        self.registered.write().push(instruction.id());
        Ok(())
    }

    fn calculate_margin(
        &self,
        session: &Session,
        instruction: &SettlementInstruction,
    ) -> Result<Decimal> {
        session.check()?;
        Ok(instruction.amount() * self.margin_fraction)
    }
}

/// Notification sink that records deliveries, with a switch to simulate
/// a broken channel.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    completed: RwLock<Vec<InstructionId>>,
    failed: RwLock<Vec<(InstructionId, String)>>,
    broken: RwLock<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn break_channel(&self, broken: bool) {
        *self.broken.write() = broken;
    }

    pub fn completed(&self) -> Vec<InstructionId> {
        self.completed.read().clone()
    }

    pub fn failed(&self) -> Vec<(InstructionId, String)> {
        self.failed.read().clone()
    }
}

impl NotificationService for RecordingNotifier {
    fn settlement_completed(&self, instruction: &SettlementInstruction) -> Result<()> {
        if *self.broken.read() {
            return Err(SettlementError::Storage(
                "notification channel unavailable".into(),
            ));
        }
        self.completed.write().push(instruction.id());
        Ok(())
    }

    fn settlement_failed(&self, instruction: &SettlementInstruction, reason: &str) -> Result<()> {
        if *self.broken.read() {
            return Err(SettlementError::Storage(
                "notification channel unavailable".into(),
            ));
        }
        self.failed
            .write()
            .push((instruction.id(), reason.to_string()));
        Ok(())
    }
}

/// Bundle of concrete in-memory adapters plus the trait-object view an
/// engine consumes. Tests keep the concrete handles for seeding and
/// inspection.
#[derive(Clone)]
pub struct MemoryPorts {
    pub instructions: Arc<MemorySettlementStore>,
    pub nettings: Arc<MemoryNettingStore>,
    pub batches: Arc<MemoryBatchStore>,
    pub fx_rates: Arc<MemoryFxRates>,
    pub custodian: Arc<MemoryCustodian>,
    pub ccp: Arc<MemoryCcp>,
    pub notifications: Arc<RecordingNotifier>,
}

impl MemoryPorts {
    pub fn new() -> Self {
        Self {
            instructions: Arc::new(MemorySettlementStore::new()),
            nettings: Arc::new(MemoryNettingStore::new()),
            batches: Arc::new(MemoryBatchStore::new()),
            fx_rates: Arc::new(MemoryFxRates::new()),
            custodian: Arc::new(MemoryCustodian::new()),
            ccp: Arc::new(MemoryCcp::new()),
            notifications: Arc::new(RecordingNotifier::new()),
        }
    }

    /// The same adapters as trait objects, for wiring into an engine.
    pub fn ports(&self) -> Ports {
        Ports {
            instructions: self.instructions.clone(),
            nettings: self.nettings.clone(),
            batches: self.batches.clone(),
            fx_rates: self.fx_rates.clone(),
            custodian: self.custodian.clone(),
            ccp: self.ccp.clone(),
            notifications: self.notifications.clone(),
        }
    }
}

impl Default for MemoryPorts {
    fn default() -> Self {
        Self::new()
    }
}
