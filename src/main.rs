//! settlement-engine CLI
//!
//! Run the settlement pipeline from the command line against the
//! in-memory adapters. Account balances are seeded to cover the input
//! trades, so the pipeline itself is what is being exercised.
//!
//! # Usage
//!
//! ```bash
//! # Batch-settle trades from a JSON file
//! settlement-engine settle --input trades.json
//!
//! # Net one account's trades in one currency
//! settlement-engine net --input trades.json --account ACCT-001
//!
//! # FX exposure and hedge plan for one account's book
//! settlement-engine exposure --input trades.json --account ACCT-001
//!
//! # Generate a random trade file for testing
//! settlement-engine generate --trades 50 --accounts 10
//! ```

use settlement_engine::core::config::EngineConfig;
use settlement_engine::core::currency::CurrencyCode;
use settlement_engine::core::ids::AccountId;
use settlement_engine::core::instruction::{
    SettlementInstruction, SettlementType, TradeConfirmation,
};
use settlement_engine::engine::service::SettlementService;
use settlement_engine::ports::memory::MemoryPorts;
use settlement_engine::simulation::scenario::{
    fund_accounts, generate_confirmations, ScenarioConfig,
};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fs;
use std::process;
use std::str::FromStr;

fn print_usage() {
    eprintln!(
        r#"settlement-engine: post-trade settlement and clearing

USAGE:
    settlement-engine <COMMAND> [OPTIONS]

COMMANDS:
    settle      Batch-settle the trades due on a date
    net         Net one account's trades in one currency
    exposure    FX exposure and hedge plan for one account's book
    generate    Generate a random trade file (for testing)
    help        Show this message

OPTIONS (settle):
    --input <FILE>      Path to JSON trades file
    --config <FILE>     Path to JSON engine config (default: built-in defaults)
    --date <DATE>       Settlement date, YYYY-MM-DD (default: latest due date in the file)
    --format <FORMAT>   Output format: text (default) or json

OPTIONS (net):
    --input <FILE>      Path to JSON trades file
    --config <FILE>     Path to JSON engine config (default: built-in defaults)
    --account <ID>      Account to net (required)
    --currency <CODE>   Currency to net (default: USD)
    --format <FORMAT>   Output format: text (default) or json

OPTIONS (exposure):
    --input <FILE>      Path to JSON trades file
    --config <FILE>     Path to JSON engine config (default: built-in defaults)
    --account <ID>      Account whose book is measured (required)
    --base <CODE>       Base currency (default: the config's, USD out of the box)
    --format <FORMAT>   Output format: text (default) or json

OPTIONS (generate):
    --trades <N>        Number of trades (default: 50)
    --accounts <N>      Number of accounts (default: 10)
    --currencies <LIST> Comma-separated currency codes (default: USD)
    --types <LIST>      Comma-separated settlement types (default: DVP)
    --output <FILE>     Write to file instead of stdout

EXAMPLES:
    settlement-engine settle --input trades.json
    settlement-engine settle --input trades.json --date 2024-03-03 --format json
    settlement-engine settle --input trades.json --config engine.json
    settlement-engine net --input trades.json --account ACCT-001 --currency EUR
    settlement-engine exposure --input trades.json --account ACCT-001
    settlement-engine generate --trades 100 --currencies USD,EUR --output trades.json"#
    );
}

/// JSON schema for input trade files.
#[derive(serde::Deserialize)]
struct TradesFile {
    trades: Vec<TradeConfirmation>,
}

/// JSON output schema for batch settlement.
#[derive(serde::Serialize)]
struct SettleOutput {
    batch_id: String,
    settlement_date: String,
    total: usize,
    settled: usize,
    failed: usize,
    status: String,
    failures: Vec<FailureOutput>,
}

#[derive(serde::Serialize)]
struct FailureOutput {
    instruction_id: String,
    reason: String,
}

/// JSON output schema for netting results.
#[derive(serde::Serialize)]
struct NettingOutput {
    netting_id: String,
    account: String,
    currency: String,
    buy_amount: String,
    sell_amount: String,
    gross_amount: String,
    net_amount: String,
    net_quantity: String,
    savings: String,
    savings_percent: f64,
    instructions: usize,
}

fn load_trades(path: &str) -> Vec<TradeConfirmation> {
    let content = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading file '{}': {}", path, e);
        process::exit(1);
    });

    let file: TradesFile = serde_json::from_str(&content).unwrap_or_else(|e| {
        eprintln!("Error parsing JSON: {}", e);
        eprintln!("Expected format:");
        eprintln!(
            r#"{{
  "trades": [
    {{
      "trade_id": "TRD-00001",
      "symbol": "AAPL",
      "quantity": "100",
      "price": "45.30",
      "currency": "USD",
      "settlement_type": "DVP",
      "buyer_account": "ACCT-001",
      "seller_account": "ACCT-002",
      "trade_date": "2024-03-01"
    }}
  ]
}}"#
        );
        process::exit(1);
    });

    if file.trades.is_empty() {
        eprintln!("No trades in '{}'", path);
        process::exit(1);
    }
    file.trades
}

fn load_config(path: Option<&str>) -> EngineConfig {
    let path = match path {
        Some(path) => path,
        None => return EngineConfig::default(),
    };
    let content = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading config '{}': {}", path, e);
        process::exit(1);
    });
    serde_json::from_str(&content).unwrap_or_else(|e| {
        eprintln!("Error parsing config '{}': {}", path, e);
        process::exit(1);
    })
}

/// Build a seeded service holding the input trades as Pending
/// instructions, with the custodian funded to cover them.
fn seed_service(
    config: EngineConfig,
    trades: Vec<TradeConfirmation>,
) -> (SettlementService, MemoryPorts, Vec<SettlementInstruction>) {
    let (mut service, ports) = SettlementService::in_memory(config);
    fund_accounts(&ports.custodian, &trades);

    let mut instructions = Vec::with_capacity(trades.len());
    for trade in trades {
        let instruction = service.create_instruction(trade).unwrap_or_else(|e| {
            eprintln!("Invalid trade: {}", e);
            process::exit(1);
        });
        instructions.push(instruction);
    }
    (service, ports, instructions)
}

fn cmd_settle(args: &[String]) {
    let mut input_path = None;
    let mut config_path: Option<String> = None;
    let mut date_str: Option<String> = None;
    let mut format = "text".to_string();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" => {
                i += 1;
                input_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--input requires a file path");
                    process::exit(1);
                }));
            }
            "--config" => {
                i += 1;
                config_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--config requires a file path");
                    process::exit(1);
                }));
            }
            "--date" => {
                i += 1;
                date_str = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--date requires YYYY-MM-DD");
                    process::exit(1);
                }));
            }
            "--format" => {
                i += 1;
                format = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--format requires 'text' or 'json'");
                    process::exit(1);
                });
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let path = input_path.unwrap_or_else(|| {
        eprintln!("Error: --input <FILE> is required");
        process::exit(1);
    });

    let trades = load_trades(&path);
    let (mut service, _ports, instructions) =
        seed_service(load_config(config_path.as_deref()), trades);

    let target_date = match date_str {
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d").unwrap_or_else(|e| {
            eprintln!("Invalid date '{}': {}", s, e);
            process::exit(1);
        }),
        None => instructions
            .iter()
            .map(|instruction| instruction.settlement_date())
            .max()
            .unwrap_or_else(|| {
                eprintln!("No instructions to settle");
                process::exit(1);
            }),
    };

    let outcome = service.batch_settle(target_date).unwrap_or_else(|e| {
        eprintln!("Batch settlement failed: {}", e);
        process::exit(1);
    });

    if format == "json" {
        let batch = outcome.batch();
        let output = SettleOutput {
            batch_id: batch.batch_id().to_string(),
            settlement_date: batch.settlement_date().to_string(),
            total: batch.total_count(),
            settled: batch.success_count(),
            failed: batch.failed_count(),
            status: batch.status().to_string(),
            failures: outcome
                .failures()
                .iter()
                .map(|(id, reason)| FailureOutput {
                    instruction_id: id.to_string(),
                    reason: reason.clone(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&output).unwrap());
    } else {
        println!("{}", outcome);
    }
}

fn cmd_net(args: &[String]) {
    let mut input_path = None;
    let mut config_path: Option<String> = None;
    let mut account: Option<String> = None;
    let mut currency = "USD".to_string();
    let mut format = "text".to_string();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" => {
                i += 1;
                input_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--input requires a file path");
                    process::exit(1);
                }));
            }
            "--config" => {
                i += 1;
                config_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--config requires a file path");
                    process::exit(1);
                }));
            }
            "--account" => {
                i += 1;
                account = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--account requires an account id");
                    process::exit(1);
                }));
            }
            "--currency" => {
                i += 1;
                currency = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--currency requires a currency code");
                    process::exit(1);
                });
            }
            "--format" => {
                i += 1;
                format = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--format requires 'text' or 'json'");
                    process::exit(1);
                });
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let path = input_path.unwrap_or_else(|| {
        eprintln!("Error: --input <FILE> is required");
        process::exit(1);
    });
    let account = AccountId::new(account.unwrap_or_else(|| {
        eprintln!("Error: --account <ID> is required");
        process::exit(1);
    }));
    let currency = CurrencyCode::new(currency);

    let trades = load_trades(&path);
    let (mut service, _ports, _instructions) =
        seed_service(load_config(config_path.as_deref()), trades);

    let result = service.perform_netting(&account, &currency).unwrap_or_else(|e| {
        eprintln!("Netting failed: {}", e);
        process::exit(1);
    });

    if format == "json" {
        let output = NettingOutput {
            netting_id: result.netting_id().to_string(),
            account: result.account_id().to_string(),
            currency: result.currency().to_string(),
            buy_amount: result.buy_amount().to_string(),
            sell_amount: result.sell_amount().to_string(),
            gross_amount: result.gross_amount().to_string(),
            net_amount: result.net_amount().to_string(),
            net_quantity: result.net_quantity().to_string(),
            savings: result.savings().to_string(),
            savings_percent: result.savings_percent(),
            instructions: result.instruction_count(),
        };
        println!("{}", serde_json::to_string_pretty(&output).unwrap());
    } else {
        println!("{}", result);
    }
}

fn cmd_exposure(args: &[String]) {
    let mut input_path = None;
    let mut config_path: Option<String> = None;
    let mut account: Option<String> = None;
    let mut base: Option<String> = None;
    let mut format = "text".to_string();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--input" => {
                i += 1;
                input_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--input requires a file path");
                    process::exit(1);
                }));
            }
            "--config" => {
                i += 1;
                config_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--config requires a file path");
                    process::exit(1);
                }));
            }
            "--account" => {
                i += 1;
                account = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--account requires an account id");
                    process::exit(1);
                }));
            }
            "--base" => {
                i += 1;
                base = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--base requires a currency code");
                    process::exit(1);
                }));
            }
            "--format" => {
                i += 1;
                format = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--format requires 'text' or 'json'");
                    process::exit(1);
                });
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let path = input_path.unwrap_or_else(|| {
        eprintln!("Error: --input <FILE> is required");
        process::exit(1);
    });
    let account = AccountId::new(account.unwrap_or_else(|| {
        eprintln!("Error: --account <ID> is required");
        process::exit(1);
    }));

    let trades = load_trades(&path);
    let currencies: BTreeSet<CurrencyCode> = trades
        .iter()
        .filter(|trade| trade.buyer_account == account || trade.seller_account == account)
        .map(|trade| trade.currency.clone())
        .collect();
    if currencies.is_empty() {
        eprintln!("Account {} has no trades in '{}'", account, path);
        process::exit(1);
    }

    let mut config = load_config(config_path.as_deref());
    if let Some(base) = base {
        config.base_currency = CurrencyCode::new(base);
    }
    let (mut service, _ports, _instructions) = seed_service(config, trades);

    let mut results = Vec::new();
    for currency in &currencies {
        let result = service.perform_netting(&account, currency).unwrap_or_else(|e| {
            eprintln!("Netting failed for {}: {}", currency, e);
            process::exit(1);
        });
        results.push(result);
    }

    let report = service.hedge_plan(&results);
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report).unwrap());
    } else {
        println!("{}", report);
    }
}

fn cmd_generate(args: &[String]) {
    let mut trades = 50usize;
    let mut accounts = 10usize;
    let mut currencies_str = "USD".to_string();
    let mut types_str = "DVP".to_string();
    let mut output_path: Option<String> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--trades" => {
                i += 1;
                trades = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--trades requires a number");
                    process::exit(1);
                });
            }
            "--accounts" => {
                i += 1;
                accounts = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--accounts requires a number");
                    process::exit(1);
                });
            }
            "--currencies" => {
                i += 1;
                currencies_str = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--currencies requires a comma-separated list");
                    process::exit(1);
                });
            }
            "--types" => {
                i += 1;
                types_str = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--types requires a comma-separated list");
                    process::exit(1);
                });
            }
            "--output" => {
                i += 1;
                output_path = Some(args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--output requires a file path");
                    process::exit(1);
                }));
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                process::exit(1);
            }
        }
        i += 1;
    }

    let currencies: Vec<CurrencyCode> = currencies_str
        .split(',')
        .map(|s| CurrencyCode::new(s.trim()))
        .collect();
    let settlement_types: Vec<SettlementType> = types_str
        .split(',')
        .map(|s| {
            SettlementType::from_str(s.trim()).unwrap_or_else(|e| {
                eprintln!("{}", e);
                process::exit(1);
            })
        })
        .collect();

    let config = ScenarioConfig {
        trade_count: trades,
        account_count: accounts,
        currencies,
        settlement_types,
        ..ScenarioConfig::default()
    };
    let confirmations = generate_confirmations(&config);

    #[derive(serde::Serialize)]
    struct OutputFile {
        trades: Vec<TradeConfirmation>,
    }

    let count = confirmations.len();
    let json = serde_json::to_string_pretty(&OutputFile {
        trades: confirmations,
    })
    .unwrap();

    if let Some(path) = output_path {
        fs::write(&path, &json).unwrap_or_else(|e| {
            eprintln!("Error writing to '{}': {}", path, e);
            process::exit(1);
        });
        eprintln!("Generated {} trades across {} accounts into {}", count, accounts, path);
    } else {
        println!("{}", json);
    }
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let command = args[1].as_str();
    let rest = &args[2..];

    match command {
        "settle" => cmd_settle(rest),
        "net" => cmd_net(rest),
        "exposure" => cmd_exposure(rest),
        "generate" => cmd_generate(rest),
        "help" | "--help" | "-h" => print_usage(),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            process::exit(1);
        }
    }
}
