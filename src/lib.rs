pub mod algorithms;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod snapshot;
pub mod utils;

pub use config::Config;
pub use error::{DataLoadError, Error, InvalidInputError, Result};
pub use models::*;
pub use services::recommendation::{recommend_personalized, recommend_popular, RecommendationService};
pub use services::training::{prepare, TrainingService};
pub use snapshot::Snapshot;

/// Installs the global fmt subscriber. `RUST_LOG` wins over `default_level`.
/// Calling it twice is harmless.
pub fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
