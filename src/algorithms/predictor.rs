use crate::algorithms::popularity::PopularityRanking;
use crate::algorithms::similarity::NeighborTable;
use crate::models::{ItemId, Neighbor, Recommendation};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Similarity mass at or below this cannot carry a weighted average.
const MIN_WEIGHT: f64 = 1e-9;

/// Why an item got no prediction. Such items are left to the popularity fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndefinedPrediction {
    NoRatedNeighbors,
    NonPositiveWeight,
}

/// Similarity-weighted average of the user's ratings over the positively
/// similar neighbors they rated: `sum(s_ij * r_j) / sum(s_ij)` for `s_ij > 0`.
/// The result always lies between the lowest and highest rating it averages.
pub fn predict_item(
    neighbors: &[Neighbor],
    ratings: &BTreeMap<ItemId, f32>,
) -> Result<f64, UndefinedPrediction> {
    let mut weighted = 0.0f64;
    let mut weight = 0.0f64;
    let mut rated = 0usize;
    let mut lowest = f64::INFINITY;
    let mut highest = f64::NEG_INFINITY;

    for neighbor in neighbors {
        let Some(&rating) = ratings.get(&neighbor.item) else {
            continue;
        };
        rated += 1;
        // Only positive similarities carry weight.
        if neighbor.similarity <= 0.0 {
            continue;
        }
        let rating = rating as f64;
        weighted += neighbor.similarity * rating;
        weight += neighbor.similarity;
        lowest = lowest.min(rating);
        highest = highest.max(rating);
    }

    if rated == 0 {
        return Err(UndefinedPrediction::NoRatedNeighbors);
    }
    if weight <= MIN_WEIGHT {
        return Err(UndefinedPrediction::NonPositiveWeight);
    }
    let prediction = weighted / weight;
    if !prediction.is_finite() {
        return Err(UndefinedPrediction::NonPositiveWeight);
    }
    Ok(prediction.clamp(lowest, highest))
}

/// Descending prediction, then ascending item id.
fn prediction_order(a: &(ItemId, f64), b: &(ItemId, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

/// Item-based CF over a prepared neighbor table, with popularity fill.
/// Holds only shared references; every call is independent.
pub struct IbcfPredictor<'a> {
    neighbors: &'a NeighborTable,
    popularity: &'a PopularityRanking,
}

impl<'a> IbcfPredictor<'a> {
    pub fn new(neighbors: &'a NeighborTable, popularity: &'a PopularityRanking) -> Self {
        Self {
            neighbors,
            popularity,
        }
    }

    /// Defined predictions for every item the user has not rated, best first.
    pub fn predict_all(&self, ratings: &BTreeMap<ItemId, f32>) -> Vec<(ItemId, f64)> {
        if ratings.is_empty() {
            return Vec::new();
        }

        let mut predictions: Vec<(ItemId, f64)> = self
            .neighbors
            .iter()
            .filter(|(item, _)| !ratings.contains_key(item))
            .filter_map(|(item, neighbors)| {
                predict_item(neighbors, ratings).ok().map(|p| (item, p))
            })
            .collect();
        predictions.sort_by(prediction_order);
        predictions
    }

    /// Up to `count` items: personalized predictions first, then the popularity
    /// ranking, never repeating an item or returning one the user rated.
    pub fn recommend(&self, ratings: &BTreeMap<ItemId, f32>, count: usize) -> Vec<Recommendation> {
        if count == 0 {
            return Vec::new();
        }

        let mut selected: Vec<Recommendation> = self
            .predict_all(ratings)
            .into_iter()
            .take(count)
            .map(|(item, predicted)| Recommendation::personalized(item, predicted))
            .collect();
        let personalized = selected.len();

        if selected.len() < count {
            let mut seen: HashSet<ItemId> = selected.iter().map(|r| r.item).collect();
            for entry in self.popularity.entries() {
                if selected.len() >= count {
                    break;
                }
                if ratings.contains_key(&entry.item) || !seen.insert(entry.item) {
                    continue;
                }
                selected.push(Recommendation::popular(entry.item, entry.score));
            }
        }

        debug!(
            "Recommended {} items for {} input ratings ({} personalized, {} popularity fill)",
            selected.len(),
            ratings.len(),
            personalized,
            selected.len() - personalized
        );
        selected
    }
}
