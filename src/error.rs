use crate::models::ItemId;
use std::fmt;
use std::path::PathBuf;

/// Raised while preparing the engine. Preparation aborts and nothing is published.
#[derive(thiserror::Error, Debug)]
pub enum DataLoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No valid ratings found in {path}")]
    NoRatings { path: PathBuf },

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DataLoadError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DataLoadError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A caller-supplied rating vector referenced unknown items or carried
/// ratings outside the configured scale.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Default)]
#[error("Invalid rating input: {}", self.describe())]
pub struct InvalidInputError {
    pub unknown_items: Vec<ItemId>,
    pub out_of_range: Vec<(ItemId, f32)>,
}

impl InvalidInputError {
    pub fn is_empty(&self) -> bool {
        self.unknown_items.is_empty() && self.out_of_range.is_empty()
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.unknown_items.is_empty() {
            parts.push(format!("unknown items [{}]", join(&self.unknown_items)));
        }
        if !self.out_of_range.is_empty() {
            let ratings: Vec<String> = self
                .out_of_range
                .iter()
                .map(|(item, value)| format!("{}={}", item, value))
                .collect();
            parts.push(format!("out-of-range ratings [{}]", ratings.join(", ")));
        }
        parts.join("; ")
    }
}

fn join<T: fmt::Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    DataLoad(#[from] DataLoadError),

    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),
}

pub type Result<T> = std::result::Result<T, Error>;
