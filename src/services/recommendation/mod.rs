use crate::algorithms::{NeighborTable, PopularityRanking};
use crate::error::InvalidInputError;
use crate::models::*;
use crate::snapshot::Snapshot;
use crate::utils::validation::validate_rating_vector;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Candidate pool for rating prompts, as a multiple of the requested size.
const CANDIDATE_POOL_FACTOR: usize = 4;

/// First `count` items of the popularity ranking.
pub fn recommend_popular(ranking: &PopularityRanking, count: usize) -> Vec<ItemId> {
    ranking.top(count).iter().map(|e| e.item).collect()
}

/// Validates `ratings` against the neighbor table's item universe and `scale`,
/// then runs item-based CF with popularity fill.
pub fn recommend_personalized(
    ratings: &BTreeMap<ItemId, f32>,
    neighbors: &NeighborTable,
    ranking: &PopularityRanking,
    scale: RatingScale,
    count: usize,
) -> Result<Vec<ItemId>, InvalidInputError> {
    validate_rating_vector(ratings, |item| neighbors.items().binary_search(&item).is_ok(), scale)?;
    let predictor = crate::algorithms::IbcfPredictor::new(neighbors, ranking);
    Ok(item_ids(&predictor.recommend(ratings, count)))
}

/// Serving facade over one prepared snapshot. Cheap to clone; every call only
/// reads the shared snapshot.
#[derive(Clone)]
pub struct RecommendationService {
    snapshot: Arc<Snapshot>,
    default_count: usize,
}

impl RecommendationService {
    pub fn new(snapshot: Arc<Snapshot>, default_count: usize) -> Self {
        Self {
            snapshot,
            default_count,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn default_count(&self) -> usize {
        self.default_count
    }

    pub fn recommend_popular(&self, count: usize) -> Vec<Recommendation> {
        self.snapshot
            .popularity
            .top(count)
            .iter()
            .map(|e| Recommendation::popular(e.item, e.score))
            .collect()
    }

    /// Tagged recommendations for a new user. Rejects the whole call, listing
    /// every offending key, if any rating is for an unknown item or off-scale.
    pub fn recommend_personalized(
        &self,
        ratings: &BTreeMap<ItemId, f32>,
        count: usize,
    ) -> Result<Vec<Recommendation>, InvalidInputError> {
        let snapshot = &self.snapshot;
        if let Err(e) = validate_rating_vector(
            ratings,
            |item| snapshot.ratings.contains_item(item),
            snapshot.scale(),
        ) {
            warn!("Rejected rating vector: {}", e);
            return Err(e);
        }

        let recommendations = snapshot.predictor().recommend(ratings, count);
        debug!(
            "Snapshot {}: {} recommendations, {} from fallback",
            snapshot.meta.snapshot_id,
            recommendations.len(),
            recommendations.iter().filter(|r| r.is_fallback()).count()
        );
        Ok(recommendations)
    }

    /// Joins recommendations with catalog metadata, keeping their order.
    pub fn resolve(&self, recommendations: &[Recommendation]) -> Vec<RecommendedMovie> {
        recommendations
            .iter()
            .map(|r| {
                let movie = self
                    .snapshot
                    .catalog
                    .get(r.item)
                    .cloned()
                    .unwrap_or_else(|| Movie::untitled(r.item));
                RecommendedMovie {
                    item: r.item,
                    title: movie.title,
                    genres: movie.genres,
                    predicted_rating: r.predicted_rating(),
                }
            })
            .collect()
    }

    /// `n` distinct well-known movies for a new user to rate, drawn with a
    /// seeded RNG from the head of the popularity ranking and returned in
    /// ranking order.
    pub fn rating_candidates(&self, n: usize, seed: u64) -> Vec<Movie> {
        let pool = self.snapshot.popularity.top(n.saturating_mul(CANDIDATE_POOL_FACTOR));
        let mut rng = StdRng::seed_from_u64(seed);
        let mut picked: Vec<(usize, ItemId)> = pool
            .iter()
            .enumerate()
            .collect::<Vec<_>>()
            .choose_multiple(&mut rng, n)
            .map(|&(rank, entry)| (rank, entry.item))
            .collect();
        picked.sort_unstable();

        picked
            .into_iter()
            .map(|(_, item)| {
                self.snapshot
                    .catalog
                    .get(item)
                    .cloned()
                    .unwrap_or_else(|| Movie::untitled(item))
            })
            .collect()
    }
}
