use crate::algorithms::Recommender;
use crate::models::{item_ids, ItemId, UserId};
use crate::services::rating_store::{LoadedData, RatingMatrix, RatingRecord};
use crate::services::training::TrainingService;
use crate::utils::metrics::{MetricsAccumulator, MetricsCalculator, RecommendationMetrics};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Share of each evaluation user's ratings hidden from the build.
    pub holdout_fraction: f64,
    /// Held-out ratings at or above this count as relevant.
    pub like_threshold: f32,
    pub k: usize,
    pub max_users: usize,
    pub min_user_ratings: usize,
    pub seed: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            holdout_fraction: 0.2,
            like_threshold: 4.0,
            k: 10,
            max_users: 500,
            min_user_ratings: 10,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub recommender: String,
    pub users: usize,
    pub metrics: RecommendationMetrics,
    pub coverage: f64,
    /// Share of returned items that came from the popularity fill.
    pub fallback_share: f64,
}

pub struct HoldoutSplit {
    pub train: RatingMatrix,
    pub held_out: BTreeMap<UserId, BTreeMap<ItemId, f32>>,
}

/// Hides a seeded random share of the ratings of up to `max_users` users that
/// have at least `min_user_ratings`. Every chosen user keeps at least one
/// rating and loses at least one. The item universe is unchanged.
pub fn holdout_split(matrix: &RatingMatrix, config: &EvaluationConfig) -> HoldoutSplit {
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut candidates: Vec<usize> = (0..matrix.num_users())
        .filter(|&u| matrix.row(u).len() >= config.min_user_ratings.max(2))
        .collect();
    candidates.shuffle(&mut rng);
    candidates.truncate(config.max_users);
    let chosen: HashSet<usize> = candidates.iter().copied().collect();

    let mut train = Vec::with_capacity(matrix.num_ratings());
    let mut held_out = BTreeMap::new();

    for u in 0..matrix.num_users() {
        let user = matrix.users()[u];
        let mut row: Vec<(u32, f32)> = matrix.row(u).to_vec();

        let hidden = if chosen.contains(&u) {
            row.shuffle(&mut rng);
            let n = (row.len() as f64 * config.holdout_fraction).round() as usize;
            n.clamp(1, row.len() - 1)
        } else {
            0
        };

        let (hide, keep) = row.split_at(hidden);
        if !hide.is_empty() {
            held_out.insert(
                user,
                hide.iter()
                    .map(|&(i, r)| (matrix.item_at(i as usize), r))
                    .collect(),
            );
        }
        train.extend(keep.iter().map(|&(i, rating)| RatingRecord {
            user,
            item: matrix.item_at(i as usize),
            rating,
        }));
    }

    let (train, _) = RatingMatrix::from_records(train, matrix.items());
    HoldoutSplit { train, held_out }
}

/// Scores each recommender on the held-out users of `split`.
pub fn evaluate(
    recommenders: &[&dyn Recommender],
    split: &HoldoutSplit,
    config: &EvaluationConfig,
) -> Vec<EvaluationReport> {
    let calculator = MetricsCalculator::new(config.k);

    // Graded relevance: a rating exactly at the threshold gains 1.
    let relevance: Vec<(UserId, HashMap<ItemId, f64>)> = split
        .held_out
        .iter()
        .map(|(&user, hidden)| {
            let gains = hidden
                .iter()
                .filter(|(_, &r)| r >= config.like_threshold)
                .map(|(&item, &r)| (item, (r - config.like_threshold) as f64 + 1.0))
                .collect::<HashMap<_, _>>();
            (user, gains)
        })
        .filter(|(_, gains)| !gains.is_empty())
        .collect();

    recommenders
        .iter()
        .map(|recommender| {
            let mut accumulator = MetricsAccumulator::default();
            let mut lists: Vec<Vec<ItemId>> = Vec::with_capacity(relevance.len());
            let mut returned = 0usize;
            let mut fallback = 0usize;

            for (user, gains) in &relevance {
                let input = split.train.user_ratings(*user);
                let recommendations = recommender.recommend(&input, config.k);
                returned += recommendations.len();
                fallback += recommendations.iter().filter(|r| r.is_fallback()).count();

                let ids = item_ids(&recommendations);
                accumulator.add(&calculator.calculate_all_metrics(&ids, gains));
                lists.push(ids);
            }

            let report = EvaluationReport {
                recommender: recommender.name().to_string(),
                users: accumulator.users(),
                metrics: accumulator.mean(),
                coverage: calculator.calculate_coverage(
                    lists.iter().map(Vec::as_slice),
                    split.train.num_items(),
                ),
                fallback_share: if returned > 0 {
                    fallback as f64 / returned as f64
                } else {
                    0.0
                },
            };
            info!(
                "{}: precision@{} {:.4}, recall@{} {:.4}, ndcg@{} {:.4} over {} users",
                report.recommender,
                calculator.k(),
                report.metrics.precision_at_k,
                calculator.k(),
                report.metrics.recall_at_k,
                calculator.k(),
                report.metrics.ndcg_at_k,
                report.users
            );
            report
        })
        .collect()
}

/// Builds a snapshot from the training part of a hold-out split and scores the
/// IBCF predictor against the popularity baseline.
pub struct EvaluationService {
    training: TrainingService,
}

impl EvaluationService {
    pub fn new(training: TrainingService) -> Self {
        Self { training }
    }

    pub fn run(&self, loaded: LoadedData, config: &EvaluationConfig) -> Vec<EvaluationReport> {
        let split = holdout_split(&loaded.matrix, config);
        info!(
            "Holding out ratings of {} users ({:.0}% each)",
            split.held_out.len(),
            config.holdout_fraction * 100.0
        );

        let train = LoadedData {
            catalog: loaded.catalog,
            matrix: split.train.clone(),
            report: loaded.report,
        };
        let snapshot = self.training.build_from(train, "holdout".to_string());
        let predictor = snapshot.predictor();

        evaluate(&[&predictor, &snapshot.popularity], &split, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> RatingMatrix {
        let mut records = Vec::new();
        for user in 1..=30u32 {
            for item in 1..=20u32 {
                if (user * 3 + item) % 4 != 0 {
                    records.push(RatingRecord {
                        user: UserId(user),
                        item: ItemId(item),
                        rating: 1.0 + ((user + item * 2) % 5) as f32,
                    });
                }
            }
        }
        RatingMatrix::from_records(records, &[]).0
    }

    #[test]
    fn test_holdout_split_partitions_ratings() {
        let m = matrix();
        let config = EvaluationConfig {
            max_users: 10,
            ..EvaluationConfig::default()
        };
        let split = holdout_split(&m, &config);

        let hidden: usize = split.held_out.values().map(BTreeMap::len).sum();
        assert_eq!(split.held_out.len(), 10);
        assert_eq!(split.train.num_ratings() + hidden, m.num_ratings());
        assert_eq!(split.train.items(), m.items());

        for (user, items) in &split.held_out {
            let kept = split.train.user_ratings(*user);
            assert!(!kept.is_empty());
            assert!(items.keys().all(|item| !kept.contains_key(item)));
        }
    }

    #[test]
    fn test_holdout_split_is_seeded() {
        let m = matrix();
        let config = EvaluationConfig::default();
        let a = holdout_split(&m, &config);
        let b = holdout_split(&m, &config);
        assert_eq!(a.held_out, b.held_out);
    }

    #[test]
    fn test_evaluate_reports_each_recommender() {
        let m = matrix();
        let config = EvaluationConfig {
            k: 5,
            ..EvaluationConfig::default()
        };
        let split = holdout_split(&m, &config);
        let snapshot = crate::snapshot::Snapshot::build(
            LoadedData {
                catalog: Default::default(),
                matrix: split.train.clone(),
                report: Default::default(),
            },
            crate::snapshot::BuildParams {
                similarity: Default::default(),
                popularity: crate::algorithms::PopularityParams {
                    min_support: 1,
                    prior_weight: 1.0,
                },
                scale: Default::default(),
            },
            String::new(),
        );
        let predictor = snapshot.predictor();
        let reports = evaluate(&[&predictor, &snapshot.popularity], &split, &config);

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].recommender, "ibcf");
        assert_eq!(reports[1].recommender, "popularity");
        assert_eq!(reports[1].fallback_share, 1.0);
        for report in &reports {
            assert!(report.users > 0);
            assert!((0.0..=1.0).contains(&report.metrics.precision_at_k));
            assert!((0.0..=1.0).contains(&report.coverage));
        }
    }
}
