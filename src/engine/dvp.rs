use chrono::{DateTime, Utc};
use log::{info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::core::currency::CurrencyCode;
use crate::core::error::{Result, SettlementError};
use crate::core::ids::{AccountId, InstructionId, Symbol};
use crate::core::instruction::{SettlementInstruction, SettlementType};
use crate::engine::validator::BalanceValidator;
use crate::ports::{CcpService, CustodianService, Session};

/// Proof of a completed delivery-versus-payment exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DvpReceipt {
    pub instruction_id: InstructionId,
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub amount: Decimal,
    pub currency: CurrencyCode,
    /// Account securities were delivered from and cash paid to.
    pub seller: AccountId,
    /// Account securities were delivered to and cash paid from.
    pub buyer: AccountId,
    pub via_ccp: bool,
    pub executed_at: DateTime<Utc>,
}

impl fmt::Display for DvpReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DVP {}: {} {} from {} to {} against {} {}{}",
            self.instruction_id,
            self.quantity,
            self.symbol,
            self.seller,
            self.buyer,
            self.amount,
            self.currency,
            if self.via_ccp { " (via CCP)" } else { "" }
        )
    }
}

/// Executes the two legs of a DVP settlement against the custodian.
///
/// The legs are not atomic: the security leg books first, and if the
/// cash leg then fails, a compensating security reversal is attempted
/// exactly once. A failed reversal is logged and the original cash
/// error returned, which can leave the books inconsistent until
/// reconciliation. Callers needing a stronger guarantee must get it
/// from a custodian-level two-leg primitive, not from this executor.
pub struct DvpExecutor {
    custodian: Arc<dyn CustodianService>,
    ccp: Arc<dyn CcpService>,
    validator: BalanceValidator,
}

impl DvpExecutor {
    pub fn new(custodian: Arc<dyn CustodianService>, ccp: Arc<dyn CcpService>) -> Self {
        let validator = BalanceValidator::new(custodian.clone());
        Self {
            custodian,
            ccp,
            validator,
        }
    }

    /// Execute both legs of a DVP instruction.
    ///
    /// Steps, in order: refuse non-DVP types, report to the CCP when
    /// novated, validate both balances, deliver securities seller to
    /// buyer, pay cash buyer to seller. The instruction's lifecycle is
    /// untouched; the caller transitions it based on the outcome.
    pub fn execute(
        &self,
        session: &Session,
        instruction: &SettlementInstruction,
    ) -> Result<DvpReceipt> {
        if instruction.settlement_type() != SettlementType::Dvp {
            return Err(SettlementError::NotDvp(instruction.settlement_type()));
        }

        if instruction.ccp_flag() {
            self.report_to_ccp(session, instruction);
        }

        self.validator.validate(session, instruction)?;

        let buyer = instruction.effective_buyer();
        let seller = instruction.effective_seller();

        self.custodian.transfer_security(
            session,
            &seller,
            &buyer,
            instruction.symbol(),
            instruction.quantity(),
        )?;

        if let Err(cash_err) = self.custodian.transfer_cash(
            session,
            &buyer,
            &seller,
            instruction.amount(),
            instruction.currency(),
        ) {
            match self.custodian.transfer_security(
                session,
                &buyer,
                &seller,
                instruction.symbol(),
                instruction.quantity(),
            ) {
                Ok(()) => warn!(
                    "instruction {}: cash leg failed, security leg reversed: {}",
                    instruction.id(),
                    cash_err
                ),
                Err(reversal_err) => warn!(
                    "instruction {}: cash leg failed AND security reversal failed, \
                     books need reconciliation: cash: {}; reversal: {}",
                    instruction.id(),
                    cash_err,
                    reversal_err
                ),
            }
            return Err(cash_err);
        }

        let receipt = DvpReceipt {
            instruction_id: instruction.id(),
            symbol: instruction.symbol().clone(),
            quantity: instruction.quantity(),
            amount: instruction.amount(),
            currency: instruction.currency().clone(),
            seller,
            buyer,
            via_ccp: instruction.ccp_flag(),
            executed_at: Utc::now(),
        };
        info!("{}", receipt);
        Ok(receipt)
    }

    /// Register a novated trade with the CCP and ask for its margin.
    /// CCP unavailability never blocks settlement; problems are logged
    /// and the exchange proceeds.
    fn report_to_ccp(&self, session: &Session, instruction: &SettlementInstruction) {
        if let Err(err) = self.ccp.register_trade(session, instruction) {
            warn!(
                "instruction {}: CCP registration failed: {}",
                instruction.id(),
                err
            );
            return;
        }
        match self.ccp.calculate_margin(session, instruction) {
            Ok(margin) => info!(
                "instruction {}: CCP margin requirement {} {}",
                instruction.id(),
                margin,
                instruction.currency()
            ),
            Err(err) => warn!(
                "instruction {}: CCP margin calculation failed: {}",
                instruction.id(),
                err
            ),
        }
    }
}
