//! Foundational settlement types: identifiers, currencies and FX rates,
//! the instruction aggregate, audit events, errors, and configuration.

pub mod config;
pub mod currency;
pub mod error;
pub mod event;
pub mod ids;
pub mod instruction;
