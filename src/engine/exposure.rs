use chrono::{DateTime, Utc};
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::currency::CurrencyCode;
use crate::engine::netting::NettingResult;

/// Net position in a single non-base currency, accumulated across
/// netting results. Derived on demand, never persisted.
///
/// A negative amount is a net payable (the firm owes that currency);
/// a positive amount is a net receivable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FxExposure {
    pub currency: CurrencyCode,
    pub net_amount: Decimal,
}

impl fmt::Display for FxExposure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.currency, self.net_amount)
    }
}

/// Direction of the hedge trade that flattens an exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HedgeSide {
    Buy,
    Sell,
}

impl fmt::Display for HedgeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HedgeSide::Buy => write!(f, "BUY"),
            HedgeSide::Sell => write!(f, "SELL"),
        }
    }
}

/// One FX trade to execute against the base currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HedgeInstruction {
    pub currency: CurrencyCode,
    pub side: HedgeSide,
    pub amount: Decimal,
}

impl fmt::Display for HedgeInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.side, self.amount, self.currency)
    }
}

/// Exposures and the hedges that flatten them, in one report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxExposureReport {
    pub base_currency: CurrencyCode,
    pub exposures: Vec<FxExposure>,
    pub hedges: Vec<HedgeInstruction>,
    pub generated_at: DateTime<Utc>,
}

impl fmt::Display for FxExposureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== FX Exposure Report ===")?;
        writeln!(f, "Base currency:  {}", self.base_currency)?;
        if self.exposures.is_empty() {
            writeln!(f, "No open exposure.")?;
            return Ok(());
        }
        writeln!(f, "Exposures:")?;
        for exposure in &self.exposures {
            writeln!(f, "  {}", exposure)?;
        }
        writeln!(f, "Hedges:")?;
        for hedge in &self.hedges {
            writeln!(f, "  {}", hedge)?;
        }
        Ok(())
    }
}

/// Rolls netting results up into per-currency exposures and the hedge
/// trades that bring the book back to the base currency.
///
/// The base currency itself carries no exposure and is skipped, as are
/// currencies whose accumulated net is exactly zero.
#[derive(Debug, Clone)]
pub struct FxExposureEngine {
    base_currency: CurrencyCode,
}

impl FxExposureEngine {
    pub fn new(base_currency: CurrencyCode) -> Self {
        Self { base_currency }
    }

    pub fn base_currency(&self) -> &CurrencyCode {
        &self.base_currency
    }

    /// Accumulate net amounts per currency across the results.
    ///
    /// Output is sorted by currency code so repeated runs over the
    /// same inputs produce identical reports.
    pub fn exposures(&self, results: &[NettingResult]) -> Vec<FxExposure> {
        let mut totals: BTreeMap<CurrencyCode, Decimal> = BTreeMap::new();
        for result in results {
            if *result.currency() == self.base_currency {
                continue;
            }
            *totals
                .entry(result.currency().clone())
                .or_insert(Decimal::ZERO) += result.net_amount();
        }
        totals.retain(|_, net| !net.is_zero());
        debug!(
            "accumulated {} exposure(s) from {} netting result(s)",
            totals.len(),
            results.len()
        );
        totals
            .into_iter()
            .map(|(currency, net_amount)| FxExposure {
                currency,
                net_amount,
            })
            .collect()
    }

    /// One hedge per exposure: buy what the book owes, sell what it is
    /// owed, always for the absolute exposure amount.
    pub fn hedge_instructions(&self, exposures: &[FxExposure]) -> Vec<HedgeInstruction> {
        exposures
            .iter()
            .filter(|exposure| !exposure.net_amount.is_zero())
            .map(|exposure| HedgeInstruction {
                currency: exposure.currency.clone(),
                side: if exposure.net_amount < Decimal::ZERO {
                    HedgeSide::Buy
                } else {
                    HedgeSide::Sell
                },
                amount: exposure.net_amount.abs(),
            })
            .collect()
    }

    /// Exposures and hedges in one pass.
    pub fn hedge_plan(&self, results: &[NettingResult]) -> FxExposureReport {
        let exposures = self.exposures(results);
        let hedges = self.hedge_instructions(&exposures);
        FxExposureReport {
            base_currency: self.base_currency.clone(),
            exposures,
            hedges,
            generated_at: Utc::now(),
        }
    }
}
