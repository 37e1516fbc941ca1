pub mod metrics;
pub mod validation;
