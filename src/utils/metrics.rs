use crate::models::ItemId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationMetrics {
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    pub f1_score: f64,
    pub ndcg_at_k: f64,
    pub map_score: f64,
}

#[derive(Debug, Clone)]
pub struct MetricsCalculator {
    k: usize,
}

impl MetricsCalculator {
    pub fn new(k: usize) -> Self {
        Self { k }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn calculate_precision_at_k(&self, recommended: &[ItemId], relevant: &HashSet<ItemId>) -> f64 {
        let considered = self.k.min(recommended.len());
        if considered == 0 {
            return 0.0;
        }

        let hits = recommended
            .iter()
            .take(self.k)
            .filter(|item| relevant.contains(item))
            .count();

        hits as f64 / considered as f64
    }

    pub fn calculate_recall_at_k(&self, recommended: &[ItemId], relevant: &HashSet<ItemId>) -> f64 {
        if relevant.is_empty() {
            return 0.0;
        }

        let hits = recommended
            .iter()
            .take(self.k)
            .filter(|item| relevant.contains(item))
            .count();

        hits as f64 / relevant.len() as f64
    }

    pub fn calculate_f1_score(&self, precision: f64, recall: f64) -> f64 {
        if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        }
    }

    /// Graded NDCG@k with gains taken from `relevance`; items absent from it gain 0.
    pub fn calculate_ndcg_at_k(&self, recommended: &[ItemId], relevance: &HashMap<ItemId, f64>) -> f64 {
        let idcg = self.calculate_ideal_dcg(relevance);
        if idcg == 0.0 {
            0.0
        } else {
            self.calculate_dcg(recommended, relevance) / idcg
        }
    }

    fn calculate_dcg(&self, recommended: &[ItemId], relevance: &HashMap<ItemId, f64>) -> f64 {
        recommended
            .iter()
            .take(self.k)
            .enumerate()
            .map(|(i, item)| {
                let gain = relevance.get(item).copied().unwrap_or(0.0);
                gain / ((i + 2) as f64).log2()
            })
            .sum()
    }

    fn calculate_ideal_dcg(&self, relevance: &HashMap<ItemId, f64>) -> f64 {
        let mut gains: Vec<f64> = relevance.values().copied().collect();
        gains.sort_by(|a, b| b.total_cmp(a));

        gains
            .iter()
            .take(self.k)
            .enumerate()
            .map(|(i, &gain)| gain / ((i + 2) as f64).log2())
            .sum()
    }

    pub fn calculate_average_precision(&self, recommended: &[ItemId], relevant: &HashSet<ItemId>) -> f64 {
        if relevant.is_empty() {
            return 0.0;
        }

        let mut hits = 0;
        let mut precision_sum = 0.0;
        for (i, item) in recommended.iter().take(self.k).enumerate() {
            if relevant.contains(item) {
                hits += 1;
                precision_sum += hits as f64 / (i + 1) as f64;
            }
        }

        precision_sum / relevant.len().min(self.k) as f64
    }

    /// Share of `catalog_size` items that appear in at least one list.
    pub fn calculate_coverage<'a, I>(&self, lists: I, catalog_size: usize) -> f64
    where
        I: IntoIterator<Item = &'a [ItemId]>,
    {
        if catalog_size == 0 {
            return 0.0;
        }

        let covered: HashSet<ItemId> = lists
            .into_iter()
            .flat_map(|list| list.iter().take(self.k).copied())
            .collect();
        covered.len() as f64 / catalog_size as f64
    }

    pub fn calculate_all_metrics(
        &self,
        recommended: &[ItemId],
        relevance: &HashMap<ItemId, f64>,
    ) -> RecommendationMetrics {
        let relevant: HashSet<ItemId> = relevance.keys().copied().collect();
        let precision = self.calculate_precision_at_k(recommended, &relevant);
        let recall = self.calculate_recall_at_k(recommended, &relevant);

        RecommendationMetrics {
            precision_at_k: precision,
            recall_at_k: recall,
            f1_score: self.calculate_f1_score(precision, recall),
            ndcg_at_k: self.calculate_ndcg_at_k(recommended, relevance),
            map_score: self.calculate_average_precision(recommended, &relevant),
        }
    }
}

/// Running mean of per-user metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    total: RecommendationMetrics,
    users: usize,
}

impl MetricsAccumulator {
    pub fn add(&mut self, metrics: &RecommendationMetrics) {
        self.total.precision_at_k += metrics.precision_at_k;
        self.total.recall_at_k += metrics.recall_at_k;
        self.total.f1_score += metrics.f1_score;
        self.total.ndcg_at_k += metrics.ndcg_at_k;
        self.total.map_score += metrics.map_score;
        self.users += 1;
    }

    pub fn users(&self) -> usize {
        self.users
    }

    pub fn mean(&self) -> RecommendationMetrics {
        if self.users == 0 {
            return RecommendationMetrics::default();
        }
        let n = self.users as f64;
        RecommendationMetrics {
            precision_at_k: self.total.precision_at_k / n,
            recall_at_k: self.total.recall_at_k / n,
            f1_score: self.total.f1_score / n,
            ndcg_at_k: self.total.ndcg_at_k / n,
            map_score: self.total.map_score / n,
        }
    }
}
