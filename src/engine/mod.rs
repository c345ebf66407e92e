//! Settlement engines: balance validation, DVP execution, netting,
//! batch orchestration, FX exposure, and the facade service that ties
//! them together.

pub mod batch;
pub mod dvp;
pub mod exposure;
pub mod netting;
pub mod service;
pub mod validator;

use chrono::{Duration, Utc};

use crate::core::config::EngineConfig;
use crate::ports::Session;

/// Open the session for one engine operation, applying the configured
/// operation deadline when one is set.
pub(crate) fn operation_session(label: &str, config: &EngineConfig) -> Session {
    let session = Session::begin(label);
    match config.operation_timeout_secs {
        Some(secs) => session.with_deadline(Utc::now() + Duration::seconds(secs as i64)),
        None => session,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_session_applies_deadline() {
        let without = operation_session("op", &EngineConfig::default());
        assert!(without.deadline().is_none());

        let config = EngineConfig {
            operation_timeout_secs: Some(30),
            ..EngineConfig::default()
        };
        let with = operation_session("op", &config);
        assert!(with.deadline().is_some());
        assert!(!with.expired());
    }
}
