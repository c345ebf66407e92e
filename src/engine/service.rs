use chrono::NaiveDate;
use log::info;
use rust_decimal::Decimal;

use crate::core::config::EngineConfig;
use crate::core::currency::CurrencyCode;
use crate::core::error::Result;
use crate::core::event::{EventLog, SettlementEvent};
use crate::core::ids::{AccountId, BatchId, InstructionId, NettingId, TradeId};
use crate::core::instruction::{CustodianAssignment, SettlementInstruction, TradeConfirmation};
use crate::engine::batch::{BatchOrchestrator, BatchOutcome, SettlementBatch};
use crate::engine::dvp::DvpReceipt;
use crate::engine::exposure::{FxExposureEngine, FxExposureReport};
use crate::engine::netting::{NettingEngine, NettingResult};
use crate::ports::memory::MemoryPorts;
use crate::ports::{Ports, Session};

/// The settlement engine's front door.
///
/// Owns the event log and wires the netting engine, batch
/// orchestrator, and FX exposure engine over one set of ports. Every
/// operation opens its own unit-of-work session, re-fetches the
/// instruction it mutates, and persists before returning, so callers
/// never hold stale aggregate state between calls.
///
/// # Examples
///
/// ```
/// use settlement_engine::core::config::EngineConfig;
/// use settlement_engine::core::currency::CurrencyCode;
/// use settlement_engine::core::ids::{AccountId, Symbol, TradeId};
/// use settlement_engine::core::instruction::{SettlementType, TradeConfirmation};
/// use settlement_engine::engine::service::SettlementService;
/// use chrono::NaiveDate;
/// use rust_decimal_macros::dec;
///
/// let (mut service, _ports) = SettlementService::in_memory(EngineConfig::default());
/// let instruction = service
///     .create_instruction(TradeConfirmation {
///         trade_id: TradeId::new("T-1"),
///         order_id: None,
///         symbol: Symbol::new("AAPL"),
///         quantity: dec!(100),
///         price: dec!(50),
///         currency: CurrencyCode::new("USD"),
///         settlement_type: SettlementType::Dvp,
///         buyer_account: AccountId::new("ACCT-B"),
///         seller_account: AccountId::new("ACCT-S"),
///         trade_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
///         fee_amount: None,
///         fee_currency: None,
///         tax_amount: None,
///     })
///     .unwrap();
///
/// assert_eq!(service.events_for(instruction.id()).len(), 1);
/// ```
pub struct SettlementService {
    ports: Ports,
    netting: NettingEngine,
    orchestrator: BatchOrchestrator,
    exposure: FxExposureEngine,
    events: EventLog,
    config: EngineConfig,
}

impl SettlementService {
    pub fn new(ports: Ports, config: EngineConfig) -> Self {
        let netting = NettingEngine::new(
            ports.instructions.clone(),
            ports.nettings.clone(),
            config.clone(),
        );
        let orchestrator = BatchOrchestrator::new(
            ports.instructions.clone(),
            ports.batches.clone(),
            ports.custodian.clone(),
            ports.ccp.clone(),
            ports.notifications.clone(),
            config.clone(),
        );
        let exposure = FxExposureEngine::new(config.base_currency.clone());
        Self {
            ports,
            netting,
            orchestrator,
            exposure,
            events: EventLog::new(),
            config,
        }
    }

    /// A service wired entirely to in-memory adapters, returned with
    /// the adapter bundle so tests and demos can seed balances and
    /// inspect what the engine did.
    pub fn in_memory(config: EngineConfig) -> (Self, MemoryPorts) {
        let ports = MemoryPorts::new();
        (Self::new(ports.ports(), config), ports)
    }

    fn session(&self, label: &str) -> Session {
        super::operation_session(label, &self.config)
    }

    // --- Instruction lifecycle ---

    /// Ingest a trade confirmation as a new Pending instruction.
    pub fn create_instruction(
        &mut self,
        confirmation: TradeConfirmation,
    ) -> Result<SettlementInstruction> {
        let session = self.session("create-instruction");
        let instruction =
            SettlementInstruction::from_confirmation(confirmation, &self.config, &mut self.events)?;
        self.ports.instructions.save(&session, &instruction)?;
        info!(
            "instruction {} created for trade {} ({} {} @ {})",
            instruction.id(),
            instruction.trade_id(),
            instruction.quantity(),
            instruction.symbol(),
            instruction.price()
        );
        Ok(instruction)
    }

    /// Attach custodian routing to an unsettled instruction.
    pub fn set_custodian(
        &mut self,
        id: InstructionId,
        assignment: CustodianAssignment,
    ) -> Result<SettlementInstruction> {
        let session = self.session("set-custodian");
        let mut instruction = self.ports.instructions.get(&session, id)?;
        instruction.set_custodian(assignment, &mut self.events)?;
        self.ports.instructions.update(&session, &instruction)?;
        Ok(instruction)
    }

    /// Novate an unsettled instruction to a central counterparty.
    pub fn set_ccp(
        &mut self,
        id: InstructionId,
        ccp_account: AccountId,
    ) -> Result<SettlementInstruction> {
        let session = self.session("set-ccp");
        let mut instruction = self.ports.instructions.get(&session, id)?;
        instruction.set_ccp(ccp_account, &mut self.events)?;
        self.ports.instructions.update(&session, &instruction)?;
        Ok(instruction)
    }

    /// Settle one instruction immediately, outside any batch.
    pub fn process_settlement(&mut self, id: InstructionId) -> Result<Option<DvpReceipt>> {
        let session = self.session("process-settlement");
        let instruction = self.ports.instructions.get(&session, id)?;
        self.orchestrator
            .settle_one(&mut self.events, &session, instruction, None)
    }

    /// Re-arm a Failed instruction for another attempt.
    pub fn retry_settlement(&mut self, id: InstructionId) -> Result<SettlementInstruction> {
        let session = self.session("retry-settlement");
        let mut instruction = self.ports.instructions.get(&session, id)?;
        instruction.retry(&mut self.events)?;
        self.ports.instructions.update(&session, &instruction)?;
        info!(
            "instruction {} re-armed for retry {} of {}",
            id,
            instruction.retry_count(),
            instruction.max_retry()
        );
        Ok(instruction)
    }

    /// Withdraw an instruction that has not settled.
    pub fn cancel_settlement(
        &mut self,
        id: InstructionId,
        reason: &str,
    ) -> Result<SettlementInstruction> {
        let session = self.session("cancel-settlement");
        let mut instruction = self.ports.instructions.get(&session, id)?;
        instruction.cancel(reason, &mut self.events)?;
        self.ports.instructions.update(&session, &instruction)?;
        Ok(instruction)
    }

    // --- Engine runs ---

    /// Settle everything due on or before the date, one batch.
    pub fn batch_settle(&mut self, target_date: NaiveDate) -> Result<BatchOutcome> {
        self.orchestrator.run(&mut self.events, target_date)
    }

    /// Net an account's pending instructions in one currency.
    pub fn perform_netting(
        &mut self,
        account: &AccountId,
        currency: &CurrencyCode,
    ) -> Result<NettingResult> {
        self.netting.run(&mut self.events, account, currency)
    }

    /// Exposures and hedges for a set of netting results.
    pub fn hedge_plan(&self, results: &[NettingResult]) -> FxExposureReport {
        self.exposure.hedge_plan(results)
    }

    /// Convert an amount at the current quote for the pair.
    pub fn convert_currency(
        &self,
        amount: Decimal,
        from: &CurrencyCode,
        to: &CurrencyCode,
    ) -> Result<Decimal> {
        let session = self.session("convert-currency");
        let quote = self.ports.fx_rates.rate(&session, from, to)?;
        Ok(amount * quote.rate)
    }

    // --- Lookups ---

    pub fn instruction(&self, id: InstructionId) -> Result<SettlementInstruction> {
        self.ports.instructions.get(&self.session("get-instruction"), id)
    }

    pub fn instructions_for_trade(&self, trade_id: &TradeId) -> Result<Vec<SettlementInstruction>> {
        self.ports
            .instructions
            .get_by_trade_id(&self.session("get-by-trade"), trade_id)
    }

    /// Instructions awaiting settlement for an account, oldest due
    /// first.
    pub fn pending_instructions(
        &self,
        account: &AccountId,
        limit: usize,
    ) -> Result<Vec<SettlementInstruction>> {
        self.ports
            .instructions
            .find_pending_by_account(&self.session("pending-by-account"), account, limit)
    }

    pub fn netting_result(&self, id: NettingId) -> Result<NettingResult> {
        self.ports.nettings.get(&self.session("get-netting"), id)
    }

    /// Past netting results for the account and currency, newest
    /// first.
    pub fn netting_results(
        &self,
        account: &AccountId,
        currency: &CurrencyCode,
    ) -> Result<Vec<NettingResult>> {
        self.ports.nettings.get_by_account_and_currency(
            &self.session("nettings-by-account"),
            account,
            currency,
        )
    }

    pub fn batch(&self, id: BatchId) -> Result<SettlementBatch> {
        self.ports.batches.get(&self.session("get-batch"), id)
    }

    pub fn batches_on(&self, date: NaiveDate) -> Result<Vec<SettlementBatch>> {
        self.ports
            .batches
            .get_by_date(&self.session("batches-by-date"), date)
    }

    /// The recorded lifecycle of one instruction, oldest first.
    pub fn events_for(&self, id: InstructionId) -> &[SettlementEvent] {
        self.events.for_instruction(id)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::currency::FxRate;
    use crate::core::error::SettlementError;
    use crate::core::event::EventType;
    use crate::core::ids::Symbol;
    use crate::core::instruction::{InstructionStatus, SettlementType};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn confirmation(trade: &str, buyer: &str, seller: &str) -> TradeConfirmation {
        TradeConfirmation {
            trade_id: TradeId::new(trade),
            order_id: None,
            symbol: Symbol::new("AAPL"),
            quantity: dec!(100),
            price: dec!(10),
            currency: CurrencyCode::new("USD"),
            settlement_type: SettlementType::Dvp,
            buyer_account: AccountId::new(buyer),
            seller_account: AccountId::new(seller),
            trade_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            fee_amount: None,
            fee_currency: None,
            tax_amount: None,
        }
    }

    fn fund(ports: &MemoryPorts, buyer: &str, seller: &str) {
        ports.custodian.credit_cash(
            &AccountId::new(buyer),
            &CurrencyCode::new("USD"),
            dec!(100000),
        );
        ports
            .custodian
            .credit_security(&AccountId::new(seller), &Symbol::new("AAPL"), dec!(1000));
    }

    #[test]
    fn test_create_then_fetch_round_trips() {
        let (mut service, _ports) = SettlementService::in_memory(EngineConfig::default());
        let created = service
            .create_instruction(confirmation("T-1", "ALICE", "BOB"))
            .unwrap();

        let fetched = service.instruction(created.id()).unwrap();
        assert_eq!(fetched.id(), created.id());
        assert_eq!(fetched.status(), InstructionStatus::Pending);
        assert_eq!(fetched.amount(), dec!(1000));

        let by_trade = service
            .instructions_for_trade(&TradeId::new("T-1"))
            .unwrap();
        assert_eq!(by_trade.len(), 1);
    }

    #[test]
    fn test_process_settlement_settles_funded_instruction() {
        let (mut service, ports) = SettlementService::in_memory(EngineConfig::default());
        fund(&ports, "ALICE", "BOB");
        let created = service
            .create_instruction(confirmation("T-1", "ALICE", "BOB"))
            .unwrap();

        let receipt = service.process_settlement(created.id()).unwrap();
        assert!(receipt.is_some());

        let settled = service.instruction(created.id()).unwrap();
        assert_eq!(settled.status(), InstructionStatus::Settled);
        // Direct settlement belongs to no batch.
        assert_eq!(settled.batch_id(), None);
    }

    #[test]
    fn test_failed_settlement_can_be_retried_after_funding() {
        let (mut service, ports) = SettlementService::in_memory(EngineConfig::default());
        let created = service
            .create_instruction(confirmation("T-1", "ALICE", "BOB"))
            .unwrap();

        // Nothing funded: the attempt fails on the cash check.
        let err = service.process_settlement(created.id()).unwrap_err();
        assert!(matches!(err, SettlementError::InsufficientCash { .. }));
        let failed = service.instruction(created.id()).unwrap();
        assert_eq!(failed.status(), InstructionStatus::Failed);

        let rearmed = service.retry_settlement(created.id()).unwrap();
        assert_eq!(rearmed.status(), InstructionStatus::Pending);
        assert_eq!(rearmed.retry_count(), 1);
        assert_eq!(rearmed.fail_reason(), None);

        fund(&ports, "ALICE", "BOB");
        service.process_settlement(created.id()).unwrap();
        let settled = service.instruction(created.id()).unwrap();
        assert_eq!(settled.status(), InstructionStatus::Settled);
    }

    #[test]
    fn test_cancel_settlement_is_terminal() {
        let (mut service, _ports) = SettlementService::in_memory(EngineConfig::default());
        let created = service
            .create_instruction(confirmation("T-1", "ALICE", "BOB"))
            .unwrap();

        let cancelled = service
            .cancel_settlement(created.id(), "client withdrew the order")
            .unwrap();
        assert_eq!(cancelled.status(), InstructionStatus::Cancelled);

        let err = service.process_settlement(created.id()).unwrap_err();
        assert!(matches!(err, SettlementError::InvalidTransition { .. }));
    }

    #[test]
    fn test_netting_then_batch_settles_cleared_instructions() {
        let (mut service, ports) = SettlementService::in_memory(EngineConfig::default());
        fund(&ports, "ALICE", "BOB");
        // ALICE buys twice and sells once in USD.
        service
            .create_instruction(confirmation("T-1", "ALICE", "BOB"))
            .unwrap();
        service
            .create_instruction(confirmation("T-2", "ALICE", "BOB"))
            .unwrap();
        service
            .create_instruction(confirmation("T-3", "BOB", "ALICE"))
            .unwrap();
        ports
            .custodian
            .credit_cash(&AccountId::new("BOB"), &CurrencyCode::new("USD"), dec!(1000));
        ports
            .custodian
            .credit_security(&AccountId::new("ALICE"), &Symbol::new("AAPL"), dec!(100));

        let alice = AccountId::new("ALICE");
        let usd = CurrencyCode::new("USD");
        let result = service.perform_netting(&alice, &usd).unwrap();
        assert_eq!(result.instruction_count(), 3);
        assert_eq!(result.buy_amount(), dec!(2000));
        assert_eq!(result.sell_amount(), dec!(1000));
        assert_eq!(result.net_amount(), dec!(1000));

        // Cleared instructions are still due for batch settlement.
        let outcome = service
            .batch_settle(NaiveDate::from_ymd_opt(2024, 3, 3).unwrap())
            .unwrap();
        assert_eq!(outcome.batch().total_count(), 3);
        assert!(outcome.is_clean());

        let stored = service.netting_results(&alice, &usd).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].netting_id(), result.netting_id());
    }

    #[test]
    fn test_batch_lookup_by_date() {
        let (mut service, ports) = SettlementService::in_memory(EngineConfig::default());
        fund(&ports, "ALICE", "BOB");
        service
            .create_instruction(confirmation("T-1", "ALICE", "BOB"))
            .unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 3, 3).unwrap();
        let outcome = service.batch_settle(date).unwrap();

        let fetched = service.batch(outcome.batch().batch_id()).unwrap();
        assert_eq!(fetched.total_count(), 1);
        let on_date = service.batches_on(date).unwrap();
        assert_eq!(on_date.len(), 1);
    }

    #[test]
    fn test_event_log_spans_the_whole_lifecycle() {
        let (mut service, ports) = SettlementService::in_memory(EngineConfig::default());
        fund(&ports, "ALICE", "BOB");
        let created = service
            .create_instruction(confirmation("T-1", "ALICE", "BOB"))
            .unwrap();
        service.process_settlement(created.id()).unwrap();

        let kinds: Vec<EventType> = service
            .events_for(created.id())
            .iter()
            .map(|event| event.event_type)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventType::Created,
                EventType::ProcessingStarted,
                EventType::Settled,
            ]
        );
    }

    #[test]
    fn test_convert_currency_uses_stored_quote() {
        let (service, ports) = SettlementService::in_memory(EngineConfig::default());
        let eur = CurrencyCode::new("EUR");
        let usd = CurrencyCode::new("USD");
        ports.fx_rates.insert(
            FxRate::new(eur.clone(), usd.clone(), dec!(1.10), Utc::now()).unwrap(),
        );

        let converted = service.convert_currency(dec!(200), &eur, &usd).unwrap();
        assert_eq!(converted, dec!(220.00));

        // Inverse direction falls back to the inverted quote.
        let back = service.convert_currency(dec!(220), &usd, &eur).unwrap();
        assert_eq!(back, dec!(220) * (Decimal::ONE / dec!(1.10)));
    }

    #[test]
    fn test_missing_rate_is_an_fx_error() {
        let (service, _ports) = SettlementService::in_memory(EngineConfig::default());
        let err = service
            .convert_currency(
                dec!(1),
                &CurrencyCode::new("EUR"),
                &CurrencyCode::new("CHF"),
            )
            .unwrap_err();
        assert!(matches!(err, SettlementError::Fx(_)));
    }

    #[test]
    fn test_hedge_plan_passes_through_to_fx_engine() {
        let (mut service, _ports) = SettlementService::in_memory(EngineConfig::default());
        let mut conf = confirmation("T-1", "ALICE", "BOB");
        conf.currency = CurrencyCode::new("EUR");
        service.create_instruction(conf).unwrap();

        let alice = AccountId::new("ALICE");
        let eur = CurrencyCode::new("EUR");
        let result = service.perform_netting(&alice, &eur).unwrap();
        let report = service.hedge_plan(std::slice::from_ref(&result));

        assert_eq!(report.exposures.len(), 1);
        assert_eq!(report.exposures[0].net_amount, dec!(1000));
        assert_eq!(report.hedges.len(), 1);
    }

    #[test]
    fn test_pending_instructions_visible_for_both_sides() {
        let (mut service, _ports) = SettlementService::in_memory(EngineConfig::default());
        service
            .create_instruction(confirmation("T-1", "ALICE", "BOB"))
            .unwrap();
        service
            .create_instruction(confirmation("T-2", "CAROL", "BOB"))
            .unwrap();

        let bob = service
            .pending_instructions(&AccountId::new("BOB"), 10)
            .unwrap();
        assert_eq!(bob.len(), 2);
        let alice = service
            .pending_instructions(&AccountId::new("ALICE"), 10)
            .unwrap();
        assert_eq!(alice.len(), 1);
    }
}
