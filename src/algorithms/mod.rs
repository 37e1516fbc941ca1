pub mod popularity;
pub mod predictor;
pub mod similarity;

use crate::models::{ItemId, Recommendation};
use std::collections::BTreeMap;

pub use popularity::{PopularityParams, PopularityRanker, PopularityRanking};
pub use predictor::{IbcfPredictor, UndefinedPrediction};
pub use similarity::{
    NeighborTable, SimilarityBuilder, SimilarityParams, SimilarityTransform, UndefinedSimilarity,
};

/// Anything that turns a validated rating vector into an ordered item list.
pub trait Recommender: Send + Sync {
    fn name(&self) -> &'static str;
    fn recommend(&self, ratings: &BTreeMap<ItemId, f32>, count: usize) -> Vec<Recommendation>;
}

impl Recommender for IbcfPredictor<'_> {
    fn name(&self) -> &'static str {
        "ibcf"
    }

    fn recommend(&self, ratings: &BTreeMap<ItemId, f32>, count: usize) -> Vec<Recommendation> {
        IbcfPredictor::recommend(self, ratings, count)
    }
}

/// Non-personalized baseline: the ranking minus what the user already rated.
impl Recommender for PopularityRanking {
    fn name(&self) -> &'static str {
        "popularity"
    }

    fn recommend(&self, ratings: &BTreeMap<ItemId, f32>, count: usize) -> Vec<Recommendation> {
        self.entries()
            .iter()
            .filter(|e| !ratings.contains_key(&e.item))
            .take(count)
            .map(|e| Recommendation::popular(e.item, e.score))
            .collect()
    }
}
