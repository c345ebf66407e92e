//! Random trade population generation.
//!
//! Generates trade confirmations and funds the in-memory custodian to
//! cover them, for demos, benchmarks, and stress runs.

use chrono::{NaiveDate, Utc};
use rand::Rng;
use rust_decimal::Decimal;

use crate::core::currency::CurrencyCode;
use crate::core::ids::{AccountId, Symbol, TradeId};
use crate::core::instruction::{SettlementType, TradeConfirmation};
use crate::ports::memory::MemoryCustodian;

/// Configuration for generating a random trade population.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Number of confirmations to generate.
    pub trade_count: usize,
    /// Number of trading accounts to draw counterparties from.
    pub account_count: usize,
    /// Symbols traded.
    pub symbols: Vec<Symbol>,
    /// Currencies invoiced.
    pub currencies: Vec<CurrencyCode>,
    /// Settlement types drawn from.
    pub settlement_types: Vec<SettlementType>,
    /// Minimum trade price.
    pub min_price: Decimal,
    /// Maximum trade price.
    pub max_price: Decimal,
    /// Minimum share quantity.
    pub min_quantity: u32,
    /// Maximum share quantity.
    pub max_quantity: u32,
    /// Trade date stamped on every confirmation.
    pub trade_date: NaiveDate,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            trade_count: 50,
            account_count: 10,
            symbols: vec![
                Symbol::new("AAPL"),
                Symbol::new("MSFT"),
                Symbol::new("TSLA"),
            ],
            currencies: vec![CurrencyCode::new("USD")],
            settlement_types: vec![SettlementType::Dvp],
            min_price: Decimal::from(10),
            max_price: Decimal::from(500),
            min_quantity: 1,
            max_quantity: 1_000,
            trade_date: Utc::now().date_naive(),
        }
    }
}

/// Generate a random population of trade confirmations.
pub fn generate_confirmations(config: &ScenarioConfig) -> Vec<TradeConfirmation> {
    let mut rng = rand::thread_rng();

    // Two accounts minimum so buyer and seller can differ.
    let account_count = config.account_count.max(2);
    let accounts: Vec<AccountId> = (0..account_count)
        .map(|i| AccountId::new(format!("ACCT-{:03}", i)))
        .collect();

    (0..config.trade_count)
        .map(|n| {
            let buyer_idx = rng.gen_range(0..accounts.len());
            let mut seller_idx = rng.gen_range(0..accounts.len());
            while seller_idx == buyer_idx {
                seller_idx = rng.gen_range(0..accounts.len());
            }

            let symbol_idx = rng.gen_range(0..config.symbols.len());
            let currency_idx = rng.gen_range(0..config.currencies.len());
            let type_idx = rng.gen_range(0..config.settlement_types.len());

            let min_f64: f64 = config.min_price.to_string().parse().unwrap_or(10.0);
            let max_f64: f64 = config.max_price.to_string().parse().unwrap_or(500.0);
            let price = Decimal::from_f64_retain(rng.gen_range(min_f64..max_f64))
                .unwrap_or(Decimal::from(100))
                .round_dp(2);
            let quantity =
                Decimal::from(rng.gen_range(config.min_quantity..=config.max_quantity));

            TradeConfirmation {
                trade_id: TradeId::new(format!("TRD-{:05}", n)),
                order_id: None,
                symbol: config.symbols[symbol_idx].clone(),
                quantity,
                price,
                currency: config.currencies[currency_idx].clone(),
                settlement_type: config.settlement_types[type_idx],
                buyer_account: accounts[buyer_idx].clone(),
                seller_account: accounts[seller_idx].clone(),
                trade_date: config.trade_date,
                fee_amount: None,
                fee_currency: None,
                tax_amount: None,
            }
        })
        .collect()
}

/// Credit the custodian with exactly enough cash and securities to
/// cover every confirmation in full, per each type's checks.
pub fn fund_accounts(custodian: &MemoryCustodian, confirmations: &[TradeConfirmation]) {
    for confirmation in confirmations {
        let profile = confirmation.settlement_type.profile();
        if profile.check_cash {
            custodian.credit_cash(
                &confirmation.buyer_account,
                &confirmation.currency,
                confirmation.quantity * confirmation.price,
            );
        }
        if profile.check_security {
            custodian.credit_security(
                &confirmation.seller_account,
                &confirmation.symbol,
                confirmation.quantity,
            );
        }
    }
}
