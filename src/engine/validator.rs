use log::debug;
use std::sync::Arc;

use crate::core::error::{Result, SettlementError};
use crate::core::instruction::SettlementInstruction;
use crate::ports::{CustodianService, Session};

/// Pre-settlement balance checks against the custodian.
///
/// What gets checked is driven by the instruction's settlement type
/// profile: DVP and RVP check both legs, FOP checks only the security
/// leg, FREE checks nothing. Checks read the effective accounts, so a
/// novated instruction is validated against the CCP account.
pub struct BalanceValidator {
    custodian: Arc<dyn CustodianService>,
}

impl BalanceValidator {
    pub fn new(custodian: Arc<dyn CustodianService>) -> Self {
        Self { custodian }
    }

    /// Verify the instruction is coverable right now.
    ///
    /// Returns [`SettlementError::InsufficientCash`] or
    /// [`SettlementError::InsufficientSecurity`] with the required and
    /// available amounts when a leg is short.
    pub fn validate(&self, session: &Session, instruction: &SettlementInstruction) -> Result<()> {
        let profile = instruction.settlement_type().profile();
        let buyer = instruction.effective_buyer();
        let seller = instruction.effective_seller();

        if profile.check_cash {
            let available =
                self.custodian
                    .account_balance(session, &buyer, instruction.currency())?;
            if available < instruction.amount() {
                return Err(SettlementError::InsufficientCash {
                    currency: instruction.currency().clone(),
                    required: instruction.amount(),
                    available,
                });
            }
        }

        if profile.check_security {
            let position =
                self.custodian
                    .security_position(session, &seller, instruction.symbol())?;
            if position < instruction.quantity() {
                return Err(SettlementError::InsufficientSecurity {
                    symbol: instruction.symbol().clone(),
                    required: instruction.quantity(),
                    available: position,
                });
            }
        }

        debug!(
            "instruction {} validated: {} profile, buyer {}, seller {}",
            instruction.id(),
            instruction.settlement_type(),
            buyer,
            seller
        );
        Ok(())
    }
}
