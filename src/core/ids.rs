use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a settlement instruction.
///
/// Generated internally when an instruction is created from a trade
/// confirmation. Never derived from upstream identifiers, so two
/// confirmations for the same trade still yield distinct instructions.
///
/// # Examples
///
/// ```
/// use settlement_engine::core::ids::InstructionId;
///
/// let a = InstructionId::generate();
/// let b = InstructionId::generate();
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstructionId(Uuid);

/// Unique identifier for a netting run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NettingId(Uuid);

/// Unique identifier for a settlement batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

macro_rules! uuid_id {
    ($name:ident) => {
        impl $name {
            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID, e.g. one read back from storage.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(InstructionId);
uuid_id!(NettingId);
uuid_id!(BatchId);

/// Identifier of the upstream trade a confirmation refers to.
///
/// Opaque to the engine: it is carried for reconciliation and lookup
/// but never parsed or interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeId(String);

/// Identifier of the originating order, when the upstream system supplies one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

/// Account identifier for a settlement party.
///
/// Used for trading accounts, custodian settlement accounts, and CCP
/// accounts alike; the role is determined by the field it occupies on
/// an instruction, not by the identifier itself.
///
/// # Examples
///
/// ```
/// use settlement_engine::core::ids::AccountId;
///
/// let buyer = AccountId::new("ACCT-00042");
/// assert_eq!(buyer.as_str(), "ACCT-00042");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

/// Instrument symbol of the security leg (e.g. "AAPL", "XS0123456789").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            /// Create a new identifier from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the string representation of this identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

string_id!(TradeId);
string_id!(OrderId);
string_id!(AccountId);
string_id!(Symbol);
