use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// ISO 4217-style currency code.
///
/// Supports standard fiat currencies (USD, EUR, JPY, etc.) as well as
/// arbitrary identifiers for digital currencies or internal settlement
/// units.
///
/// # Examples
///
/// ```
/// use settlement_engine::core::currency::CurrencyCode;
///
/// let usd = CurrencyCode::new("USD");
/// let eur = CurrencyCode::new("EUR");
/// assert_ne!(usd, eur);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CurrencyCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Errors arising from FX rate operations.
#[derive(Debug, Error)]
pub enum FxError {
    #[error("no FX rate available for {from} -> {to}")]
    RateNotFound {
        from: CurrencyCode,
        to: CurrencyCode,
    },
    #[error("FX rate must be positive, got {rate} for {from} -> {to}")]
    InvalidRate {
        from: CurrencyCode,
        to: CurrencyCode,
        rate: Decimal,
    },
}

/// A pair of currencies representing an exchange rate direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: CurrencyCode,
    pub quote: CurrencyCode,
}

impl CurrencyPair {
    pub fn new(base: CurrencyCode, quote: CurrencyCode) -> Self {
        Self { base, quote }
    }

    /// The same pair read in the opposite direction.
    pub fn inverted(&self) -> Self {
        Self::new(self.quote.clone(), self.base.clone())
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// A dated exchange rate quote: 1 unit of `from` = `rate` units of `to`.
///
/// A quote becomes usable at `effective_at` and, if `expires_at` is set,
/// stops being usable at that instant. Optional bid/ask fields carry the
/// dealing spread when the source publishes one; the mid `rate` is what
/// conversions use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxRate {
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    pub rate: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub effective_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl FxRate {
    /// Create a quote effective from the given instant, with no expiry.
    pub fn new(
        from: CurrencyCode,
        to: CurrencyCode,
        rate: Decimal,
        effective_at: DateTime<Utc>,
    ) -> Result<Self, FxError> {
        if rate <= Decimal::ZERO {
            return Err(FxError::InvalidRate { from, to, rate });
        }
        Ok(Self {
            from,
            to,
            rate,
            bid: None,
            ask: None,
            effective_at,
            expires_at: None,
        })
    }

    /// Attach a bid/ask spread to the quote.
    pub fn with_spread(mut self, bid: Decimal, ask: Decimal) -> Self {
        self.bid = Some(bid);
        self.ask = Some(ask);
        self
    }

    /// Limit the quote's validity window.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether this quote is usable at the given instant.
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.effective_at <= at && self.expires_at.map_or(true, |exp| at < exp)
    }

    /// The same quote read in the opposite direction.
    ///
    /// Bid and ask swap roles when inverted: the price at which the
    /// quoting side buys `from` becomes the price at which it sells `to`.
    pub fn inverted(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
            rate: Decimal::ONE / self.rate,
            bid: self
                .ask
                .filter(|a| *a > Decimal::ZERO)
                .map(|a| Decimal::ONE / a),
            ask: self
                .bid
                .filter(|b| *b > Decimal::ZERO)
                .map(|b| Decimal::ONE / b),
            effective_at: self.effective_at,
            expires_at: self.expires_at,
        }
    }
}

impl fmt::Display for FxRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} @ {}", self.from, self.to, self.rate)
    }
}

/// Versioned FX rate book.
///
/// Keeps every quote ever inserted and answers lookups as of a given
/// instant: the usable quote with the latest `effective_at` wins. When
/// no direct quote exists the inverse pair is consulted and inverted.
///
/// # Examples
///
/// ```
/// use settlement_engine::core::currency::{CurrencyCode, FxRate, FxRateBook};
/// use chrono::Utc;
/// use rust_decimal_macros::dec;
///
/// let mut book = FxRateBook::new();
/// let now = Utc::now();
/// book.insert(FxRate::new(
///     CurrencyCode::new("EUR"),
///     CurrencyCode::new("USD"),
///     dec!(1.10),
///     now,
/// ).unwrap());
///
/// let converted = book.convert_as_of(
///     dec!(1000),
///     &CurrencyCode::new("EUR"),
///     &CurrencyCode::new("USD"),
///     now,
/// ).unwrap();
/// assert_eq!(converted, dec!(1100));
/// ```
#[derive(Debug, Clone, Default)]
pub struct FxRateBook {
    rates: HashMap<CurrencyPair, Vec<FxRate>>,
}

impl FxRateBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a quote. Existing quotes for the pair are kept; lookups
    /// pick the most recently effective one for the requested instant.
    pub fn insert(&mut self, rate: FxRate) {
        let pair = CurrencyPair::new(rate.from.clone(), rate.to.clone());
        self.rates.entry(pair).or_default().push(rate);
    }

    /// Number of quotes across all pairs.
    pub fn len(&self) -> usize {
        self.rates.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    fn best_direct(&self, pair: &CurrencyPair, at: DateTime<Utc>) -> Option<&FxRate> {
        self.rates
            .get(pair)?
            .iter()
            .filter(|r| r.covers(at))
            .max_by_key(|r| r.effective_at)
    }

    /// Resolve the quote for `from` -> `to` usable at the given instant.
    ///
    /// Same-currency lookups yield a synthetic unit quote. A direct quote
    /// is preferred; otherwise the inverse pair is inverted.
    pub fn rate_as_of(
        &self,
        from: &CurrencyCode,
        to: &CurrencyCode,
        at: DateTime<Utc>,
    ) -> Result<FxRate, FxError> {
        if from == to {
            return FxRate::new(from.clone(), to.clone(), Decimal::ONE, at);
        }
        let pair = CurrencyPair::new(from.clone(), to.clone());
        if let Some(rate) = self.best_direct(&pair, at) {
            return Ok(rate.clone());
        }
        if let Some(rate) = self.best_direct(&pair.inverted(), at) {
            return Ok(rate.inverted());
        }
        Err(FxError::RateNotFound {
            from: from.clone(),
            to: to.clone(),
        })
    }

    /// Resolve the quote usable right now.
    pub fn latest(&self, from: &CurrencyCode, to: &CurrencyCode) -> Result<FxRate, FxError> {
        self.rate_as_of(from, to, Utc::now())
    }

    /// Convert an amount between currencies as of the given instant.
    pub fn convert_as_of(
        &self,
        amount: Decimal,
        from: &CurrencyCode,
        to: &CurrencyCode,
        at: DateTime<Utc>,
    ) -> Result<Decimal, FxError> {
        let rate = self.rate_as_of(from, to, at)?;
        Ok(amount * rate.rate)
    }
}
