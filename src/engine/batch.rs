use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::core::config::EngineConfig;
use crate::core::error::Result;
use crate::core::event::EventLog;
use crate::core::ids::{BatchId, InstructionId};
use crate::core::instruction::SettlementInstruction;
use crate::engine::dvp::{DvpExecutor, DvpReceipt};
use crate::engine::validator::BalanceValidator;
use crate::ports::{
    BatchRepository, CcpService, CustodianService, NotificationService, Session,
    SettlementRepository,
};

/// Lifecycle of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchStatus {
    Processing,
    Completed,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Processing => write!(f, "PROCESSING"),
            BatchStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// One end-of-day settlement run over the instructions due on a date.
///
/// Written once when the run opens and rewritten when it completes;
/// the counts are set at completion, so `total_count` always equals
/// successes plus failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementBatch {
    batch_id: BatchId,
    settlement_date: NaiveDate,
    total_count: usize,
    success_count: usize,
    failed_count: usize,
    status: BatchStatus,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl SettlementBatch {
    /// Open a new run for the date.
    pub fn start(batch_id: BatchId, settlement_date: NaiveDate) -> Self {
        Self {
            batch_id,
            settlement_date,
            total_count: 0,
            success_count: 0,
            failed_count: 0,
            status: BatchStatus::Processing,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Close the run with its final counts.
    pub fn complete(&mut self, success_count: usize, failed_count: usize) {
        self.success_count = success_count;
        self.failed_count = failed_count;
        self.total_count = success_count + failed_count;
        self.status = BatchStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    // --- Accessors ---

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    pub fn settlement_date(&self) -> NaiveDate {
        self.settlement_date
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn success_count(&self) -> usize {
        self.success_count
    }

    pub fn failed_count(&self) -> usize {
        self.failed_count
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}

impl fmt::Display for SettlementBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "batch {} [{}] for {}: {} settled, {} failed, {} total",
            self.batch_id,
            self.status,
            self.settlement_date,
            self.success_count,
            self.failed_count,
            self.total_count
        )
    }
}

/// Result of one batch run: the closed batch plus the reason each
/// failed instruction failed.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    batch: SettlementBatch,
    failures: Vec<(InstructionId, String)>,
}

impl BatchOutcome {
    pub fn batch(&self) -> &SettlementBatch {
        &self.batch
    }

    pub fn failures(&self) -> &[(InstructionId, String)] {
        &self.failures
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Batch Settlement ===")?;
        writeln!(f, "{}", self.batch)?;
        if !self.failures.is_empty() {
            writeln!(f, "Failures:")?;
            for (id, reason) in &self.failures {
                writeln!(f, "  {}: {}", id, reason)?;
            }
        }
        Ok(())
    }
}

/// Drives instructions due on a date through the settlement pipeline.
///
/// Failures are isolated per instruction: a failed one is marked
/// Failed with its reason and the run moves on, so one bad instruction
/// never poisons the batch.
pub struct BatchOrchestrator {
    instructions: Arc<dyn SettlementRepository>,
    batches: Arc<dyn BatchRepository>,
    executor: DvpExecutor,
    validator: BalanceValidator,
    notifications: Arc<dyn NotificationService>,
    config: EngineConfig,
}

impl BatchOrchestrator {
    pub fn new(
        instructions: Arc<dyn SettlementRepository>,
        batches: Arc<dyn BatchRepository>,
        custodian: Arc<dyn CustodianService>,
        ccp: Arc<dyn CcpService>,
        notifications: Arc<dyn NotificationService>,
        config: EngineConfig,
    ) -> Self {
        Self {
            instructions,
            batches,
            executor: DvpExecutor::new(custodian.clone(), ccp),
            validator: BalanceValidator::new(custodian),
            notifications,
            config,
        }
    }

    /// Run one settlement batch for everything due on or before the
    /// target date.
    ///
    /// Fetches up to the configured batch size, settles each
    /// instruction independently, and closes the batch with the final
    /// counts however many failed.
    pub fn run(&self, log: &mut EventLog, target_date: NaiveDate) -> Result<BatchOutcome> {
        let session = super::operation_session("batch-settle", &self.config);
        let mut batch = SettlementBatch::start(BatchId::generate(), target_date);
        self.batches.save(&session, &batch)?;

        let due =
            self.instructions
                .find_pending_by_date(&session, target_date, self.config.batch_size)?;
        info!(
            "batch {} opened for {}: {} instructions due",
            batch.batch_id(),
            target_date,
            due.len()
        );

        let mut succeeded = 0usize;
        let mut failures: Vec<(InstructionId, String)> = Vec::new();
        for instruction in due {
            let id = instruction.id();
            match self.settle_one(log, &session, instruction, Some(batch.batch_id())) {
                Ok(_) => succeeded += 1,
                Err(err) => {
                    warn!(
                        "batch {}: instruction {} failed ({}): {}",
                        batch.batch_id(),
                        id,
                        if err.is_retryable() { "retryable" } else { "permanent" },
                        err
                    );
                    failures.push((id, err.to_string()));
                }
            }
        }

        batch.complete(succeeded, failures.len());
        self.batches.save(&session, &batch)?;
        info!("{}", batch);
        Ok(BatchOutcome { batch, failures })
    }

    /// Settle one instruction through the full pipeline.
    ///
    /// On success the instruction is Settled, persisted, and the
    /// completion notice sent. On any error it is marked Failed with
    /// the error as reason, persisted, and the failure notice sent;
    /// the error is returned to the caller. Notices that cannot be
    /// delivered are logged and dropped.
    pub fn settle_one(
        &self,
        log: &mut EventLog,
        session: &Session,
        mut instruction: SettlementInstruction,
        batch_id: Option<BatchId>,
    ) -> Result<Option<DvpReceipt>> {
        match self.pipeline(log, session, &mut instruction, batch_id) {
            Ok(receipt) => {
                if let Err(err) = self.notifications.settlement_completed(&instruction) {
                    warn!(
                        "instruction {}: completion notice dropped: {}",
                        instruction.id(),
                        err
                    );
                }
                Ok(receipt)
            }
            Err(err) => {
                let reason = err.to_string();
                if let Err(fail_err) = instruction.fail(&reason, log) {
                    warn!(
                        "instruction {}: could not mark failed: {}",
                        instruction.id(),
                        fail_err
                    );
                } else {
                    // An expired session would refuse the write and
                    // strand the instruction in Processing; record the
                    // failure under a fresh one.
                    let rescue;
                    let persist_session = if session.expired() {
                        rescue = Session::begin("fail-persist");
                        &rescue
                    } else {
                        session
                    };
                    if let Err(persist_err) =
                        self.instructions.update(persist_session, &instruction)
                    {
                        warn!(
                            "instruction {}: failed state not persisted: {}",
                            instruction.id(),
                            persist_err
                        );
                    }
                }
                if let Err(notice_err) = self
                    .notifications
                    .settlement_failed(&instruction, &reason)
                {
                    warn!(
                        "instruction {}: failure notice dropped: {}",
                        instruction.id(),
                        notice_err
                    );
                }
                Err(err)
            }
        }
    }

    /// The pipeline proper: transition to Processing, move value,
    /// transition to Settled, persisting after each state change. The
    /// session deadline is checked at every step boundary.
    fn pipeline(
        &self,
        log: &mut EventLog,
        session: &Session,
        instruction: &mut SettlementInstruction,
        batch_id: Option<BatchId>,
    ) -> Result<Option<DvpReceipt>> {
        session.check()?;
        instruction.start_processing(batch_id, log)?;
        self.instructions.update(session, instruction)?;

        session.check()?;
        let receipt = if instruction.settlement_type().profile().transfer_via_custodian {
            Some(self.executor.execute(session, instruction)?)
        } else {
            // Non-DVP types settle off-custodian; balances are still
            // verified per the type's profile.
            self.validator.validate(session, instruction)?;
            None
        };

        session.check()?;
        instruction.settle(log)?;
        self.instructions.update(session, instruction)?;
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::currency::CurrencyCode;
    use crate::core::error::SettlementError;
    use crate::core::ids::{AccountId, Symbol, TradeId};
    use crate::core::instruction::{InstructionStatus, SettlementType, TradeConfirmation};
    use crate::ports::memory::MemoryPorts;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn trade_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn due_date() -> NaiveDate {
        // T+2 from the trade date.
        NaiveDate::from_ymd_opt(2024, 3, 3).unwrap()
    }

    fn confirmation(
        trade: &str,
        buyer: &str,
        seller: &str,
        quantity: Decimal,
        settlement_type: SettlementType,
    ) -> TradeConfirmation {
        TradeConfirmation {
            trade_id: TradeId::new(trade),
            order_id: None,
            symbol: Symbol::new("AAPL"),
            quantity,
            price: dec!(10),
            currency: CurrencyCode::new("USD"),
            settlement_type,
            buyer_account: AccountId::new(buyer),
            seller_account: AccountId::new(seller),
            trade_date: trade_date(),
            fee_amount: None,
            fee_currency: None,
            tax_amount: None,
        }
    }

    fn orchestrator(ports: &MemoryPorts, config: EngineConfig) -> BatchOrchestrator {
        BatchOrchestrator::new(
            ports.instructions.clone(),
            ports.batches.clone(),
            ports.custodian.clone(),
            ports.ccp.clone(),
            ports.notifications.clone(),
            config,
        )
    }

    fn seed(
        ports: &MemoryPorts,
        log: &mut EventLog,
        conf: TradeConfirmation,
    ) -> SettlementInstruction {
        let session = Session::begin("seed");
        let instruction =
            SettlementInstruction::from_confirmation(conf, &EngineConfig::default(), log).unwrap();
        ports.instructions.save(&session, &instruction).unwrap();
        instruction
    }

    fn fund(ports: &MemoryPorts, account: &str, cash: Decimal, position: Decimal) {
        let account = AccountId::new(account);
        ports
            .custodian
            .credit_cash(&account, &CurrencyCode::new("USD"), cash);
        ports
            .custodian
            .credit_security(&account, &Symbol::new("AAPL"), position);
    }

    #[test]
    fn test_clean_batch_settles_everything() {
        let ports = MemoryPorts::new();
        let mut log = EventLog::new();
        fund(&ports, "ALICE", dec!(10000), Decimal::ZERO);
        fund(&ports, "BOB", Decimal::ZERO, dec!(1000));

        let a = seed(&ports, &mut log, confirmation("T-1", "ALICE", "BOB", dec!(100), SettlementType::Dvp));
        let b = seed(&ports, &mut log, confirmation("T-2", "ALICE", "BOB", dec!(50), SettlementType::Dvp));

        let outcome = orchestrator(&ports, EngineConfig::default())
            .run(&mut log, due_date())
            .unwrap();

        assert!(outcome.is_clean());
        assert_eq!(outcome.batch().total_count(), 2);
        assert_eq!(outcome.batch().success_count(), 2);
        assert_eq!(outcome.batch().failed_count(), 0);
        assert_eq!(outcome.batch().status(), BatchStatus::Completed);
        assert!(outcome.batch().completed_at().is_some());

        let session = Session::begin("verify");
        for id in [a.id(), b.id()] {
            let stored = ports.instructions.get(&session, id).unwrap();
            assert_eq!(stored.status(), InstructionStatus::Settled);
            assert_eq!(stored.batch_id(), Some(outcome.batch().batch_id()));
            assert!(stored.settled_at().is_some());
        }

        // Batch persisted in its completed form.
        let stored_batch = ports
            .batches
            .get(&session, outcome.batch().batch_id())
            .unwrap();
        assert_eq!(stored_batch.status(), BatchStatus::Completed);
        assert_eq!(stored_batch.total_count(), 2);

        assert_eq!(ports.notifications.completed().len(), 2);
        assert!(ports.notifications.failed().is_empty());
    }

    #[test]
    fn test_one_failure_does_not_poison_the_batch() {
        let ports = MemoryPorts::new();
        let mut log = EventLog::new();
        // ALICE can cover two of the three trades at 1000 each.
        fund(&ports, "ALICE", dec!(2000), Decimal::ZERO);
        fund(&ports, "BOB", Decimal::ZERO, dec!(1000));

        let ids: Vec<InstructionId> = (0..3)
            .map(|n| {
                seed(
                    &ports,
                    &mut log,
                    confirmation(&format!("T-{n}"), "ALICE", "BOB", dec!(100), SettlementType::Dvp),
                )
                .id()
            })
            .collect();

        let outcome = orchestrator(&ports, EngineConfig::default())
            .run(&mut log, due_date())
            .unwrap();

        assert_eq!(outcome.batch().total_count(), 3);
        assert_eq!(outcome.batch().success_count(), 2);
        assert_eq!(outcome.batch().failed_count(), 1);
        assert_eq!(outcome.failures().len(), 1);

        let (failed_id, reason) = &outcome.failures()[0];
        assert!(reason.contains("insufficient cash"));

        let session = Session::begin("verify");
        let failed = ports.instructions.get(&session, *failed_id).unwrap();
        assert_eq!(failed.status(), InstructionStatus::Failed);
        assert_eq!(failed.fail_reason(), Some(reason.as_str()));
        assert!(ids.contains(failed_id));

        assert_eq!(ports.notifications.completed().len(), 2);
        assert_eq!(ports.notifications.failed().len(), 1);
    }

    #[test]
    fn test_non_dvp_types_settle_without_custodian_movement() {
        let ports = MemoryPorts::new();
        let mut log = EventLog::new();
        // FOP needs only the seller's securities; FREE needs nothing.
        fund(&ports, "BOB", Decimal::ZERO, dec!(1000));

        let fop = seed(&ports, &mut log, confirmation("T-fop", "ALICE", "BOB", dec!(100), SettlementType::Fop));
        let free = seed(&ports, &mut log, confirmation("T-free", "ALICE", "BOB", dec!(100), SettlementType::Free));

        let outcome = orchestrator(&ports, EngineConfig::default())
            .run(&mut log, due_date())
            .unwrap();

        assert!(outcome.is_clean());
        assert_eq!(outcome.batch().success_count(), 2);

        // Settled, but the custodian never moved anything.
        let session = Session::begin("verify");
        for id in [fop.id(), free.id()] {
            let stored = ports.instructions.get(&session, id).unwrap();
            assert_eq!(stored.status(), InstructionStatus::Settled);
        }
        assert!(ports.custodian.journal().is_empty());
    }

    #[test]
    fn test_rvp_shortfall_fails_validation_only() {
        let ports = MemoryPorts::new();
        let mut log = EventLog::new();
        // RVP checks both legs; nothing is funded.
        let rvp = seed(&ports, &mut log, confirmation("T-rvp", "ALICE", "BOB", dec!(100), SettlementType::Rvp));

        let outcome = orchestrator(&ports, EngineConfig::default())
            .run(&mut log, due_date())
            .unwrap();

        assert_eq!(outcome.batch().failed_count(), 1);
        let session = Session::begin("verify");
        let stored = ports.instructions.get(&session, rvp.id()).unwrap();
        assert_eq!(stored.status(), InstructionStatus::Failed);
        assert!(ports.custodian.journal().is_empty());
    }

    #[test]
    fn test_batch_respects_size_limit() {
        let ports = MemoryPorts::new();
        let mut log = EventLog::new();
        fund(&ports, "ALICE", dec!(10000), Decimal::ZERO);
        fund(&ports, "BOB", Decimal::ZERO, dec!(1000));

        for n in 0..5 {
            seed(
                &ports,
                &mut log,
                confirmation(&format!("T-{n}"), "ALICE", "BOB", dec!(10), SettlementType::Dvp),
            );
        }

        let config = EngineConfig {
            batch_size: 3,
            ..EngineConfig::default()
        };
        let outcome = orchestrator(&ports, config)
            .run(&mut log, due_date())
            .unwrap();
        assert_eq!(outcome.batch().total_count(), 3);

        // The remainder settles on the next run.
        let second = orchestrator(&ports, EngineConfig::default())
            .run(&mut log, due_date())
            .unwrap();
        assert_eq!(second.batch().total_count(), 2);
    }

    #[test]
    fn test_instructions_due_later_are_not_touched() {
        let ports = MemoryPorts::new();
        let mut log = EventLog::new();
        fund(&ports, "ALICE", dec!(10000), Decimal::ZERO);
        fund(&ports, "BOB", Decimal::ZERO, dec!(1000));
        let instruction = seed(&ports, &mut log, confirmation("T-1", "ALICE", "BOB", dec!(10), SettlementType::Dvp));

        // Run a day before the instruction's settlement date.
        let outcome = orchestrator(&ports, EngineConfig::default())
            .run(&mut log, due_date().pred_opt().unwrap())
            .unwrap();

        assert_eq!(outcome.batch().total_count(), 0);
        let session = Session::begin("verify");
        let stored = ports.instructions.get(&session, instruction.id()).unwrap();
        assert_eq!(stored.status(), InstructionStatus::Pending);
    }

    #[test]
    fn test_empty_batch_completes_with_zero_counts() {
        let ports = MemoryPorts::new();
        let mut log = EventLog::new();
        let outcome = orchestrator(&ports, EngineConfig::default())
            .run(&mut log, due_date())
            .unwrap();
        assert_eq!(outcome.batch().total_count(), 0);
        assert_eq!(outcome.batch().status(), BatchStatus::Completed);
    }

    #[test]
    fn test_broken_notifications_never_fail_settlement() {
        let ports = MemoryPorts::new();
        let mut log = EventLog::new();
        fund(&ports, "ALICE", dec!(10000), Decimal::ZERO);
        fund(&ports, "BOB", Decimal::ZERO, dec!(1000));
        seed(&ports, &mut log, confirmation("T-1", "ALICE", "BOB", dec!(10), SettlementType::Dvp));

        ports.notifications.break_channel(true);
        let outcome = orchestrator(&ports, EngineConfig::default())
            .run(&mut log, due_date())
            .unwrap();

        assert!(outcome.is_clean());
        assert_eq!(outcome.batch().success_count(), 1);
        assert!(ports.notifications.completed().is_empty());
    }

    #[test]
    fn test_expired_session_fails_instruction_with_timeout_reason() {
        let ports = MemoryPorts::new();
        let mut log = EventLog::new();
        fund(&ports, "ALICE", dec!(10000), Decimal::ZERO);
        fund(&ports, "BOB", Decimal::ZERO, dec!(1000));
        let instruction = seed(&ports, &mut log, confirmation("T-1", "ALICE", "BOB", dec!(10), SettlementType::Dvp));

        let orch = orchestrator(&ports, EngineConfig::default());
        let expired = Session::begin("batch-settle").with_deadline(Utc::now() - Duration::seconds(1));
        let err = orch
            .settle_one(&mut log, &expired, instruction.clone(), None)
            .unwrap_err();
        assert!(matches!(err, SettlementError::Timeout(_)));

        // Never stranded mid-pipeline: the stored row is Failed with a
        // timeout reason, not Processing.
        let session = Session::begin("verify");
        let stored = ports.instructions.get(&session, instruction.id()).unwrap();
        assert_eq!(stored.status(), InstructionStatus::Failed);
        assert!(stored.fail_reason().unwrap_or_default().contains("timed out"));
    }

    #[test]
    fn test_batch_counts_always_reconcile() {
        let ports = MemoryPorts::new();
        let mut log = EventLog::new();
        // Half funded: odd quantities fail on securities.
        fund(&ports, "ALICE", dec!(100000), Decimal::ZERO);
        fund(&ports, "BOB", Decimal::ZERO, dec!(150));

        seed(&ports, &mut log, confirmation("T-1", "ALICE", "BOB", dec!(100), SettlementType::Dvp));
        seed(&ports, &mut log, confirmation("T-2", "ALICE", "BOB", dec!(100), SettlementType::Dvp));
        seed(&ports, &mut log, confirmation("T-3", "ALICE", "BOB", dec!(50), SettlementType::Dvp));

        let outcome = orchestrator(&ports, EngineConfig::default())
            .run(&mut log, due_date())
            .unwrap();
        let batch = outcome.batch();
        assert_eq!(
            batch.success_count() + batch.failed_count(),
            batch.total_count()
        );
        assert_eq!(batch.total_count(), 3);
    }
}
