use crate::models::{ItemId, PopularItem};
use crate::services::rating_store::RatingMatrix;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopularityParams {
    /// Items with fewer ratings rank after every supported item.
    pub min_support: u32,
    /// Pseudo-count of global-mean ratings blended into each item's mean.
    pub prior_weight: f64,
}

impl Default for PopularityParams {
    fn default() -> Self {
        Self {
            min_support: 20,
            prior_weight: 10.0,
        }
    }
}

impl From<&crate::config::PopularityConfig> for PopularityParams {
    fn from(config: &crate::config::PopularityConfig) -> Self {
        Self {
            min_support: config.min_support,
            prior_weight: config.prior_weight,
        }
    }
}

/// Bayesian average: `(w * global_mean + sum) / (w + count)`.
pub fn bayesian_score(sum: f64, count: u32, global_mean: f64, prior_weight: f64) -> f64 {
    let denominator = prior_weight + count as f64;
    if denominator <= 0.0 {
        return global_mean;
    }
    (prior_weight * global_mean + sum) / denominator
}

/// Every item of the universe, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopularityRanking {
    entries: Vec<PopularItem>,
    global_mean: f64,
}

impl PopularityRanking {
    pub fn entries(&self) -> &[PopularItem] {
        &self.entries
    }

    pub fn global_mean(&self) -> f64 {
        self.global_mean
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The first `count` entries; any prefix of the full ranking.
    pub fn top(&self, count: usize) -> &[PopularItem] {
        &self.entries[..count.min(self.entries.len())]
    }

    pub fn position(&self, item: ItemId) -> Option<usize> {
        self.entries.iter().position(|e| e.item == item)
    }
}

pub struct PopularityRanker {
    params: PopularityParams,
}

impl PopularityRanker {
    pub fn new(params: PopularityParams) -> Self {
        Self { params }
    }

    /// Ranks all items: supported items first, each group by descending
    /// Bayesian score, ties by ascending item id.
    pub fn rank(&self, matrix: &RatingMatrix) -> PopularityRanking {
        let mut sums = vec![0.0f64; matrix.num_items()];
        let mut counts = vec![0u32; matrix.num_items()];
        for u in 0..matrix.num_users() {
            for &(i, r) in matrix.row(u) {
                sums[i as usize] += r as f64;
                counts[i as usize] += 1;
            }
        }

        let total: u64 = counts.iter().map(|&c| c as u64).sum();
        let global_mean = if total > 0 {
            sums.iter().sum::<f64>() / total as f64
        } else {
            0.0
        };

        let mut entries: Vec<PopularItem> = matrix
            .items()
            .iter()
            .enumerate()
            .map(|(i, &item)| {
                let count = counts[i];
                PopularItem {
                    item,
                    rating_count: count,
                    mean_rating: if count > 0 { sums[i] / count as f64 } else { 0.0 },
                    score: bayesian_score(sums[i], count, global_mean, self.params.prior_weight),
                    supported: count >= self.params.min_support && count > 0,
                }
            })
            .collect();

        entries.sort_by(|a, b| {
            b.supported
                .cmp(&a.supported)
                .then_with(|| b.score.total_cmp(&a.score))
                .then_with(|| a.item.cmp(&b.item))
        });

        let supported = entries.iter().filter(|e| e.supported).count();
        info!(
            "Ranked {} items by popularity ({} meet min support {}, global mean {:.3})",
            entries.len(),
            supported,
            self.params.min_support,
            global_mean
        );

        PopularityRanking {
            entries,
            global_mean,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use crate::services::rating_store::RatingRecord;

    fn matrix(ratings: &[(u32, u32, f32)], extra: &[ItemId]) -> RatingMatrix {
        let records = ratings.iter().map(|&(u, i, r)| RatingRecord {
            user: UserId(u),
            item: ItemId(i),
            rating: r,
        });
        RatingMatrix::from_records(records, extra).0
    }

    #[test]
    fn test_volume_beats_a_lucky_handful() {
        let mut ratings = vec![(1, 1, 5.0), (2, 1, 5.0)];
        for user in 1..=50 {
            ratings.push((user, 2, 4.0));
        }
        let m = matrix(&ratings, &[]);
        let ranking = PopularityRanker::new(PopularityParams {
            min_support: 5,
            prior_weight: 10.0,
        })
        .rank(&m);

        assert_eq!(ranking.entries()[0].item, ItemId(2));
        assert!(ranking.entries()[0].supported);
        assert!(!ranking.entries()[1].supported);
        assert_eq!(ranking.entries()[1].rating_count, 2);
    }

    #[test]
    fn test_shrinkage_orders_within_support() {
        // Without a floor, the Bayesian term alone keeps 2x5.0 below 50x4.0
        // once the global mean sits well under both.
        let mut ratings = vec![(1, 1, 5.0), (2, 1, 5.0)];
        for user in 1..=50 {
            ratings.push((user, 2, 4.0));
            ratings.push((user, 3, 2.0));
        }
        let m = matrix(&ratings, &[]);
        let ranking = PopularityRanker::new(PopularityParams {
            min_support: 0,
            prior_weight: 10.0,
        })
        .rank(&m);
        assert_eq!(ranking.entries()[0].item, ItemId(2));
    }

    #[test]
    fn test_ranking_covers_unrated_items_and_breaks_ties_by_id() {
        let m = matrix(&[(1, 7, 3.0), (1, 3, 3.0)], &[ItemId(11)]);
        let ranking = PopularityRanker::new(PopularityParams {
            min_support: 1,
            prior_weight: 0.0,
        })
        .rank(&m);
        let order: Vec<ItemId> = ranking.entries().iter().map(|e| e.item).collect();
        assert_eq!(order, vec![ItemId(3), ItemId(7), ItemId(11)]);
        assert_eq!(ranking.top(2).len(), 2);
        assert_eq!(ranking.top(99).len(), 3);
        assert!(ranking.top(0).is_empty());
        assert_eq!(ranking.position(ItemId(11)), Some(2));
    }

    #[test]
    fn test_bayesian_score_limits() {
        assert_eq!(bayesian_score(0.0, 0, 3.5, 10.0), 3.5);
        assert_eq!(bayesian_score(12.0, 3, 3.5, 0.0), 4.0);
        assert_eq!(bayesian_score(0.0, 0, 3.5, 0.0), 3.5);
    }
}
