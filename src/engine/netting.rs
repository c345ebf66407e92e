use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::core::config::EngineConfig;
use crate::core::currency::CurrencyCode;
use crate::core::error::Result;
use crate::core::event::EventLog;
use crate::core::ids::{AccountId, InstructionId, NettingId};
use crate::ports::{NettingRepository, SettlementRepository};

/// Status of a persisted netting run. Results are built in one pass
/// and never reopened, so a stored result is always complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NettingStatus {
    Completed,
}

/// Aggregated position from one netting run for one account in one
/// currency.
///
/// Sign convention: `net_amount` is buy minus sell, so positive means
/// the account pays cash net and receives securities net; negative
/// means it delivers net and is paid. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NettingResult {
    netting_id: NettingId,
    account_id: AccountId,
    currency: CurrencyCode,
    buy_amount: Decimal,
    sell_amount: Decimal,
    buy_quantity: Decimal,
    sell_quantity: Decimal,
    /// Total money movement avoided or required before offsetting.
    gross_amount: Decimal,
    net_amount: Decimal,
    net_quantity: Decimal,
    instruction_ids: Vec<InstructionId>,
    status: NettingStatus,
    computed_at: DateTime<Utc>,
}

impl NettingResult {
    /// Build a completed result from the four accumulators. The gross
    /// and net figures are derived here, so they cannot disagree with
    /// the components.
    pub fn new(
        netting_id: NettingId,
        account_id: AccountId,
        currency: CurrencyCode,
        buy_amount: Decimal,
        buy_quantity: Decimal,
        sell_amount: Decimal,
        sell_quantity: Decimal,
        instruction_ids: Vec<InstructionId>,
    ) -> Self {
        Self {
            netting_id,
            account_id,
            currency,
            buy_amount,
            sell_amount,
            buy_quantity,
            sell_quantity,
            gross_amount: buy_amount + sell_amount,
            net_amount: buy_amount - sell_amount,
            net_quantity: buy_quantity - sell_quantity,
            instruction_ids,
            status: NettingStatus::Completed,
            computed_at: Utc::now(),
        }
    }

    /// Liquidity saved versus settling every instruction gross.
    pub fn savings(&self) -> Decimal {
        self.gross_amount - self.net_amount.abs()
    }

    /// Savings as a percentage of gross.
    pub fn savings_percent(&self) -> f64 {
        if self.gross_amount == Decimal::ZERO {
            return 0.0;
        }
        let pct = self.savings() * Decimal::from(100) / self.gross_amount;
        pct.to_string().parse::<f64>().unwrap_or(0.0)
    }

    pub fn instruction_count(&self) -> usize {
        self.instruction_ids.len()
    }

    // --- Accessors ---

    pub fn netting_id(&self) -> NettingId {
        self.netting_id
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn currency(&self) -> &CurrencyCode {
        &self.currency
    }

    pub fn buy_amount(&self) -> Decimal {
        self.buy_amount
    }

    pub fn sell_amount(&self) -> Decimal {
        self.sell_amount
    }

    pub fn buy_quantity(&self) -> Decimal {
        self.buy_quantity
    }

    pub fn sell_quantity(&self) -> Decimal {
        self.sell_quantity
    }

    pub fn gross_amount(&self) -> Decimal {
        self.gross_amount
    }

    pub fn net_amount(&self) -> Decimal {
        self.net_amount
    }

    pub fn net_quantity(&self) -> Decimal {
        self.net_quantity
    }

    pub fn instruction_ids(&self) -> &[InstructionId] {
        &self.instruction_ids
    }

    pub fn status(&self) -> NettingStatus {
        self.status
    }

    pub fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }
}

impl fmt::Display for NettingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Netting Result {} ===", self.netting_id)?;
        writeln!(f, "Account:       {}", self.account_id)?;
        writeln!(f, "Currency:      {}", self.currency)?;
        writeln!(f, "Instructions:  {}", self.instruction_count())?;
        writeln!(
            f,
            "Buy:           {} ({} units)",
            self.buy_amount, self.buy_quantity
        )?;
        writeln!(
            f,
            "Sell:          {} ({} units)",
            self.sell_amount, self.sell_quantity
        )?;
        writeln!(f, "Gross:         {}", self.gross_amount)?;
        writeln!(
            f,
            "Net:           {} ({} units)",
            self.net_amount, self.net_quantity
        )?;
        writeln!(f, "Savings:       {} ({:.1}%)", self.savings(), self.savings_percent())
    }
}

/// Multilateral netting across one account's pending instructions in
/// one currency.
pub struct NettingEngine {
    instructions: Arc<dyn SettlementRepository>,
    nettings: Arc<dyn NettingRepository>,
    config: EngineConfig,
}

impl NettingEngine {
    pub fn new(
        instructions: Arc<dyn SettlementRepository>,
        nettings: Arc<dyn NettingRepository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            instructions,
            nettings,
            config,
        }
    }

    /// Run one netting pass for the account and currency.
    ///
    /// # Algorithm
    ///
    /// 1. Fetch the account's pending instructions and keep those in
    ///    the requested currency.
    /// 2. For each, step it through Netting into Cleared, persisting
    ///    the new state individually.
    /// 3. Accumulate buys where the account bought and sells where it
    ///    sold. Instructions that refuse the transition (already
    ///    netted, cancelled, mid-processing) are skipped; instructions
    ///    whose persist fails are excluded from the totals and left in
    ///    whatever state the failed write produced.
    /// 4. Build one completed [`NettingResult`] from the survivors and
    ///    persist it once.
    ///
    /// A pass over zero eligible instructions still produces and saves
    /// an all-zero result for the run.
    pub fn run(
        &self,
        log: &mut EventLog,
        account: &AccountId,
        currency: &CurrencyCode,
    ) -> Result<NettingResult> {
        let session = super::operation_session("netting", &self.config);
        let netting_id = NettingId::generate();

        let pending =
            self.instructions
                .find_pending_by_account(&session, account, self.config.batch_size)?;
        debug!(
            "netting run {} for {}/{}: {} candidate instructions",
            netting_id,
            account,
            currency,
            pending.len()
        );

        let mut buy_amount = Decimal::ZERO;
        let mut buy_quantity = Decimal::ZERO;
        let mut sell_amount = Decimal::ZERO;
        let mut sell_quantity = Decimal::ZERO;
        let mut absorbed = Vec::new();

        for mut instruction in pending {
            if instruction.currency() != currency {
                continue;
            }
            if let Err(err) = instruction.start_netting(netting_id, log) {
                debug!(
                    "netting run {} skips instruction {}: {}",
                    netting_id,
                    instruction.id(),
                    err
                );
                continue;
            }
            if let Err(err) = self.instructions.update(&session, &instruction) {
                warn!(
                    "netting run {} excludes instruction {}: persist failed mid-netting: {}",
                    netting_id,
                    instruction.id(),
                    err
                );
                continue;
            }
            if let Err(err) = instruction.complete_netting(log) {
                warn!(
                    "netting run {} excludes instruction {}: {}",
                    netting_id,
                    instruction.id(),
                    err
                );
                continue;
            }
            if let Err(err) =
                self.instructions
                    .update_status(&session, instruction.id(), instruction.status())
            {
                warn!(
                    "netting run {} excludes instruction {}: persist failed after clearing, \
                     instruction left as stored: {}",
                    netting_id,
                    instruction.id(),
                    err
                );
                continue;
            }

            if instruction.buyer_account() == account {
                buy_amount += instruction.amount();
                buy_quantity += instruction.quantity();
            }
            if instruction.seller_account() == account {
                sell_amount += instruction.amount();
                sell_quantity += instruction.quantity();
            }
            absorbed.push(instruction.id());
        }

        let result = NettingResult::new(
            netting_id,
            account.clone(),
            currency.clone(),
            buy_amount,
            buy_quantity,
            sell_amount,
            sell_quantity,
            absorbed,
        );
        self.nettings.save(&session, &result)?;
        info!(
            "netting run {} for {}/{}: {} instructions absorbed, net {}",
            netting_id,
            account,
            currency,
            result.instruction_count(),
            result.net_amount()
        );
        Ok(result)
    }
}
