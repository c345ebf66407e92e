//! Scenario generation for exercising the settlement pipeline.

pub mod scenario;
