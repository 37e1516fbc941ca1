use crate::algorithms::similarity::SimilarityTransform;
use crate::error::DataLoadError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data: DataConfig,
    pub similarity: SimilarityConfig,
    pub popularity: PopularityConfig,
    pub recommendation: RecommendationConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub ratings_path: PathBuf,
    pub movies_path: Option<PathBuf>,
    pub delimiter: String,
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub top_k: usize,
    pub min_common_raters: usize,
    pub transform: SimilarityTransform,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopularityConfig {
    pub min_support: u32,
    pub prior_weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationConfig {
    pub default_count: usize,
    pub rating_min: f32,
    pub rating_max: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            similarity: SimilarityConfig::default(),
            popularity: PopularityConfig::default(),
            recommendation: RecommendationConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            ratings_path: PathBuf::from("data/ratings.dat"),
            movies_path: Some(PathBuf::from("data/movies.dat")),
            delimiter: "::".to_string(),
            snapshot_path: None,
        }
    }
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            top_k: 30,
            min_common_raters: 3,
            transform: SimilarityTransform::Raw,
        }
    }
}

impl Default for PopularityConfig {
    fn default() -> Self {
        Self {
            min_support: 20,
            prior_weight: 10.0,
        }
    }
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            default_count: 10,
            rating_min: 1.0,
            rating_max: 5.0,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(environment())
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when it exists, otherwise defaults overlaid with the environment.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(path).exists() {
            return Self::from_file(path);
        }

        tracing::info!("Config file {} not found, using default configuration", path);
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(environment())
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DataLoadError> {
        crate::utils::validation::validate_config(self)
    }
}

/// `MOVIEREC_SIMILARITY__TOP_K=20` overrides `similarity.top_k`.
fn environment() -> config::Environment {
    config::Environment::with_prefix("MOVIEREC")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
