//! End-of-day batch walk-through.
//!
//! Builds a multi-currency trade book, nets one desk's positions per
//! currency, settles everything due in one batch, and prints the FX
//! exposure report with its hedge plan.

use settlement_engine::core::config::EngineConfig;
use settlement_engine::core::currency::CurrencyCode;
use settlement_engine::core::ids::AccountId;
use settlement_engine::core::instruction::SettlementType;
use settlement_engine::engine::service::SettlementService;
use settlement_engine::simulation::scenario::{
    fund_accounts, generate_confirmations, ScenarioConfig,
};
use chrono::Days;

fn main() {
    println!("╔══════════════════════════════════════════════════╗");
    println!("║  settlement-engine: End-of-Day Batch Example     ║");
    println!("╚══════════════════════════════════════════════════╝\n");

    // --- Build the day's book ---
    println!("━━━ Today's Book ━━━\n");

    let scenario = ScenarioConfig {
        trade_count: 40,
        account_count: 2,
        currencies: vec![
            CurrencyCode::new("USD"),
            CurrencyCode::new("EUR"),
            CurrencyCode::new("JPY"),
        ],
        settlement_types: vec![SettlementType::Dvp, SettlementType::Fop],
        ..ScenarioConfig::default()
    };
    let confirmations = generate_confirmations(&scenario);

    let (mut service, ports) = SettlementService::in_memory(EngineConfig::default());
    fund_accounts(&ports.custodian, &confirmations);
    for confirmation in confirmations {
        service.create_instruction(confirmation).unwrap();
    }
    println!("  {} trades booked across USD, EUR, JPY\n", scenario.trade_count);

    // --- Net the desk's positions per currency ---
    println!("━━━ Netting (ACCT-000) ━━━\n");

    let desk = AccountId::new("ACCT-000");
    let mut results = Vec::new();
    for code in ["USD", "EUR", "JPY"] {
        let result = service
            .perform_netting(&desk, &CurrencyCode::new(code))
            .unwrap();
        println!(
            "  {:<4} buy {:>14}  sell {:>14}  net {:>14}  saved {:.1}%",
            code,
            result.buy_amount(),
            result.sell_amount(),
            result.net_amount(),
            result.savings_percent()
        );
        results.push(result);
    }
    println!();

    // --- Settle everything due ---
    println!("━━━ Batch Settlement ━━━\n");

    let due = scenario
        .trade_date
        .checked_add_days(Days::new(2))
        .unwrap();
    let outcome = service.batch_settle(due).unwrap();
    println!("{}", outcome);

    // --- FX exposure and hedge plan ---
    let report = service.hedge_plan(&results);
    println!("{}", report);

    println!("━━━ Interpretation ━━━\n");
    println!("  Netting compresses the desk's gross obligations per currency;");
    println!("  the residual net amounts are what actually needs liquidity.");
    println!("  Non-USD residuals are hedged back into the base currency.");
}
