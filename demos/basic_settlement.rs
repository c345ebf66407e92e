//! Basic settlement walk-through.
//!
//! Demonstrates the instruction lifecycle: creation from a trade
//! confirmation, DVP execution, a failed attempt with retry, and CCP
//! novation.

use settlement_engine::core::config::EngineConfig;
use settlement_engine::core::currency::CurrencyCode;
use settlement_engine::core::ids::{AccountId, Symbol, TradeId};
use settlement_engine::core::instruction::{SettlementType, TradeConfirmation};
use settlement_engine::engine::service::SettlementService;
use chrono::NaiveDate;
use rust_decimal_macros::dec;

fn confirmation(trade: &str, buyer: &str, seller: &str) -> TradeConfirmation {
    TradeConfirmation {
        trade_id: TradeId::new(trade),
        order_id: None,
        symbol: Symbol::new("AAPL"),
        quantity: dec!(100),
        price: dec!(45.30),
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

fn main() {
    println!("╔══════════════════════════════════════════════════╗");
    println!("║  settlement-engine: Basic Settlement Example     ║");
    println!("╚══════════════════════════════════════════════════╝\n");

    let (mut service, ports) = SettlementService::in_memory(EngineConfig::default());
    let usd = CurrencyCode::new("USD");
    let aapl = Symbol::new("AAPL");
    let alpha = AccountId::new("ALPHA-FUND");
    let beta = AccountId::new("BETA-BROKER");

    // --- Scenario 1: straight-through DVP ---
    println!("━━━ Scenario 1: Straight-Through DVP ━━━\n");

    ports.custodian.credit_cash(&alpha, &usd, dec!(10_000));
    ports.custodian.credit_security(&beta, &aapl, dec!(100));

    let instruction = service
        .create_instruction(confirmation("TRD-001", "ALPHA-FUND", "BETA-BROKER"))
        .unwrap();
    println!("Created:            {}", instruction);

    let receipt = service.process_settlement(instruction.id()).unwrap().unwrap();
    println!("Executed:           {}", receipt);
    println!(
        "Buyer cash left:    {} USD",
        ports.custodian.balance_of(&alpha, &usd)
    );
    println!(
        "Buyer position:     {} AAPL",
        ports.custodian.position_of(&alpha, &aapl)
    );
    println!(
        "Seller cash:        {} USD\n",
        ports.custodian.balance_of(&beta, &usd)
    );

    // --- Scenario 2: failure and retry ---
    println!("━━━ Scenario 2: Failure and Retry ━━━\n");

    let retry_me = service
        .create_instruction(confirmation("TRD-002", "ALPHA-FUND", "BETA-BROKER"))
        .unwrap();

    // The first trade took the seller's whole inventory, so this one fails.
    let err = service.process_settlement(retry_me.id()).unwrap_err();
    println!("First attempt:      {}", err);

    service.retry_settlement(retry_me.id()).unwrap();
    ports.custodian.credit_cash(&alpha, &usd, dec!(5_000));
    ports.custodian.credit_security(&beta, &aapl, dec!(100));
    service.process_settlement(retry_me.id()).unwrap();
    let settled = service.instruction(retry_me.id()).unwrap();
    println!(
        "After retry:        {} (retry {} of {})\n",
        settled.status(),
        settled.retry_count(),
        settled.max_retry()
    );

    // --- Scenario 3: CCP novation ---
    println!("━━━ Scenario 3: CCP Novation ━━━\n");

    let ccp = AccountId::new("CCP-MAIN");
    ports.custodian.credit_cash(&ccp, &usd, dec!(10_000));
    ports.custodian.credit_security(&ccp, &aapl, dec!(100));

    let novated = service
        .create_instruction(confirmation("TRD-003", "ALPHA-FUND", "BETA-BROKER"))
        .unwrap();
    service.set_ccp(novated.id(), ccp.clone()).unwrap();
    let receipt = service.process_settlement(novated.id()).unwrap().unwrap();
    println!("Executed:           {}", receipt);
    println!("Registered at CCP:  {} trade(s)\n", ports.ccp.registered().len());

    // --- Event trail ---
    println!("━━━ Event Trail (TRD-002) ━━━\n");
    for event in service.events_for(retry_me.id()) {
        println!("  {}", event);
    }
}
