use crate::models::{ItemId, Neighbor};
use crate::services::rating_store::RatingMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;
use tracing::{debug, info};

/// Centered norms at or below this are treated as zero variance.
const VARIANCE_EPSILON: f64 = 1e-12;

/// How a clamped cosine is stored in the neighbor table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityTransform {
    /// Cosine as is, in [-1, 1].
    #[default]
    Raw,
    /// `(1 + cos) / 2`, in [0, 1]; keeps every weight non-negative.
    Shifted,
}

impl SimilarityTransform {
    pub fn apply(self, cosine: f64) -> f64 {
        let cosine = cosine.clamp(-1.0, 1.0);
        match self {
            SimilarityTransform::Raw => cosine,
            SimilarityTransform::Shifted => (1.0 + cosine) / 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityParams {
    pub top_k: usize,
    pub min_common_raters: usize,
    pub transform: SimilarityTransform,
}

impl Default for SimilarityParams {
    fn default() -> Self {
        Self {
            top_k: 30,
            min_common_raters: 3,
            transform: SimilarityTransform::Raw,
        }
    }
}

impl From<&crate::config::SimilarityConfig> for SimilarityParams {
    fn from(config: &crate::config::SimilarityConfig) -> Self {
        Self {
            top_k: config.top_k,
            min_common_raters: config.min_common_raters,
            transform: config.transform,
        }
    }
}

/// Why a pair of items has no similarity. Such pairs are left out of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndefinedSimilarity {
    TooFewCommonRaters,
    ZeroVariance,
}

/// Co-rating statistics of one item pair over centered ratings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PairStats {
    dot: f64,
    norm_a: f64,
    norm_b: f64,
    common: u32,
}

impl PairStats {
    fn add(&mut self, a: f64, b: f64) {
        self.dot += a * b;
        self.norm_a += a * a;
        self.norm_b += b * b;
        self.common += 1;
    }

    fn similarity(&self, params: &SimilarityParams) -> Result<f64, UndefinedSimilarity> {
        if (self.common as usize) < params.min_common_raters {
            return Err(UndefinedSimilarity::TooFewCommonRaters);
        }
        if self.norm_a <= VARIANCE_EPSILON || self.norm_b <= VARIANCE_EPSILON {
            return Err(UndefinedSimilarity::ZeroVariance);
        }
        let cosine = self.dot / (self.norm_a.sqrt() * self.norm_b.sqrt());
        Ok(params.transform.apply(cosine))
    }
}

/// Centered cosine of two co-rated vectors (already mean-centered per user).
pub fn centered_cosine(
    a: &[f64],
    b: &[f64],
    params: &SimilarityParams,
) -> Result<f64, UndefinedSimilarity> {
    let mut stats = PairStats::default();
    for (&x, &y) in a.iter().zip(b.iter()) {
        stats.add(x, y);
    }
    stats.similarity(params)
}

/// Neighbor order: descending similarity, then ascending item id.
pub fn neighbor_order(a: &Neighbor, b: &Neighbor) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| a.item.cmp(&b.item))
}

/// The per-item top-k neighbor table. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborTable {
    items: Vec<ItemId>,
    lists: Vec<Vec<Neighbor>>,
    top_k: usize,
}

impl NeighborTable {
    pub fn from_lists(items: Vec<ItemId>, lists: Vec<Vec<Neighbor>>, top_k: usize) -> Self {
        debug_assert_eq!(items.len(), lists.len());
        Self {
            items,
            lists,
            top_k,
        }
    }

    /// Neighbors of `item`, best first. Empty for unknown items.
    pub fn get(&self, item: ItemId) -> &[Neighbor] {
        match self.items.binary_search(&item) {
            Ok(position) => &self.lists[position],
            Err(_) => &[],
        }
    }

    pub fn items(&self) -> &[ItemId] {
        &self.items
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ItemId, &[Neighbor])> {
        self.items
            .iter()
            .copied()
            .zip(self.lists.iter().map(Vec::as_slice))
    }

    pub fn num_entries(&self) -> usize {
        self.lists.iter().map(Vec::len).sum()
    }

    /// Checks the shape a deserialized table must have before `get` is safe.
    pub fn validate(&self) -> Result<(), String> {
        if self.lists.len() != self.items.len() {
            return Err(format!(
                "{} neighbor lists for {} items",
                self.lists.len(),
                self.items.len()
            ));
        }
        if self.items.windows(2).any(|w| w[0] >= w[1]) {
            return Err("neighbor table items are not strictly ascending".to_string());
        }
        for (item, list) in self.iter() {
            if list.len() > self.top_k {
                return Err(format!("{} has {} neighbors, limit {}", item, list.len(), self.top_k));
            }
            if let Some(bad) = list.iter().find(|n| {
                n.item == item
                    || !n.similarity.is_finite()
                    || self.items.binary_search(&n.item).is_err()
            }) {
                return Err(format!("{} has invalid neighbor {}", item, bad.item));
            }
        }
        Ok(())
    }
}

/// Dense scratch space for one item's row of pair statistics. Only touched
/// columns are visited and reset.
struct RowAccumulator {
    stats: Vec<PairStats>,
    touched: Vec<u32>,
}

impl RowAccumulator {
    fn new(num_items: usize) -> Self {
        Self {
            stats: vec![PairStats::default(); num_items],
            touched: Vec::new(),
        }
    }

    fn add(&mut self, column: u32, a: f64, b: f64) {
        let slot = &mut self.stats[column as usize];
        if slot.common == 0 {
            self.touched.push(column);
        }
        slot.add(a, b);
    }

    fn drain_top_k(&mut self, items: &[ItemId], params: &SimilarityParams) -> Vec<Neighbor> {
        let mut candidates: Vec<Neighbor> = Vec::with_capacity(self.touched.len());
        for &column in &self.touched {
            let slot = &mut self.stats[column as usize];
            if let Ok(similarity) = slot.similarity(params) {
                candidates.push(Neighbor {
                    item: items[column as usize],
                    similarity,
                });
            }
            *slot = PairStats::default();
        }
        self.touched.clear();

        let take = params.top_k.min(candidates.len());
        if take == 0 {
            return Vec::new();
        }
        if take < candidates.len() {
            candidates.select_nth_unstable_by(take - 1, neighbor_order);
            candidates.truncate(take);
        }
        candidates.sort_unstable_by(neighbor_order);
        candidates
    }
}

pub struct SimilarityBuilder {
    params: SimilarityParams,
}

impl SimilarityBuilder {
    pub fn new(params: SimilarityParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SimilarityParams {
        &self.params
    }

    /// Builds the neighbor table. For each item only the items sharing at least
    /// one rater with it are visited; a user's ratings are centered on that
    /// user's mean before accumulation.
    pub fn build(&self, matrix: &RatingMatrix) -> NeighborTable {
        let started = Instant::now();
        let means = user_means(matrix);
        let centered = centered_rows(matrix, &means);
        let columns: Vec<Vec<(u32, f64)>> = matrix
            .columns()
            .into_iter()
            .map(|column| {
                column
                    .into_iter()
                    .map(|(u, r)| (u, r as f64 - means[u as usize]))
                    .collect()
            })
            .collect();

        let items = matrix.items();
        let params = self.params;
        let lists: Vec<Vec<Neighbor>> = (0..matrix.num_items())
            .into_par_iter()
            .map_init(
                || RowAccumulator::new(items.len()),
                |acc, a| {
                    for &(u, value_a) in &columns[a] {
                        for &(b, value_b) in &centered[u as usize] {
                            if b as usize != a {
                                acc.add(b, value_a, value_b);
                            }
                        }
                    }
                    acc.drain_top_k(items, &params)
                },
            )
            .collect();

        let table = NeighborTable::from_lists(items.to_vec(), lists, params.top_k);
        info!(
            "Built top-{} neighbor table for {} items ({} entries) in {:?}",
            params.top_k,
            table.len(),
            table.num_entries(),
            started.elapsed()
        );
        table
    }

    /// Similarity of a single pair, computed directly from the co-rated users.
    pub fn pair_similarity(
        &self,
        matrix: &RatingMatrix,
        a: ItemId,
        b: ItemId,
    ) -> Result<f64, UndefinedSimilarity> {
        let (Some(pa), Some(pb)) = (matrix.item_position(a), matrix.item_position(b)) else {
            return Err(UndefinedSimilarity::TooFewCommonRaters);
        };
        let (pa, pb) = (pa as u32, pb as u32);

        let mut va = Vec::new();
        let mut vb = Vec::new();
        for row in centered_rows(matrix, &user_means(matrix)) {
            let lookup = |p: u32| {
                row.binary_search_by_key(&p, |&(i, _)| i)
                    .ok()
                    .map(|found| row[found].1)
            };
            if let (Some(x), Some(y)) = (lookup(pa), lookup(pb)) {
                va.push(x);
                vb.push(y);
            }
        }
        let result = centered_cosine(&va, &vb, &self.params);
        debug!("similarity({}, {}) over {} common raters: {:?}", a, b, va.len(), result);
        result
    }
}

/// Mean rating per user position; users without ratings get 0.
fn user_means(matrix: &RatingMatrix) -> Vec<f64> {
    (0..matrix.num_users())
        .map(|u| matrix.user_mean(u).unwrap_or(0.0))
        .collect()
}

/// Each user's ratings minus that user's mean.
fn centered_rows(matrix: &RatingMatrix, means: &[f64]) -> Vec<Vec<(u32, f64)>> {
    (0..matrix.num_users())
        .map(|u| {
            matrix
                .row(u)
                .iter()
                .map(|&(i, r)| (i, r as f64 - means[u]))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use crate::services::rating_store::RatingRecord;

    fn matrix(ratings: &[(u32, u32, f32)]) -> RatingMatrix {
        let records = ratings.iter().map(|&(u, i, r)| RatingRecord {
            user: UserId(u),
            item: ItemId(i),
            rating: r,
        });
        RatingMatrix::from_records(records, &[]).0
    }

    #[test]
    fn test_transform_clamps_drift() {
        assert_eq!(SimilarityTransform::Raw.apply(1.0000000002), 1.0);
        assert_eq!(SimilarityTransform::Raw.apply(-1.5), -1.0);
        assert_eq!(SimilarityTransform::Shifted.apply(-1.0), 0.0);
        assert_eq!(SimilarityTransform::Shifted.apply(0.0), 0.5);
    }

    #[test]
    fn test_centered_cosine_edge_cases() {
        let params = SimilarityParams::default();
        assert_eq!(
            centered_cosine(&[1.0, -1.0], &[1.0, -1.0], &params),
            Err(UndefinedSimilarity::TooFewCommonRaters)
        );
        assert_eq!(
            centered_cosine(&[0.0, 0.0, 0.0], &[1.0, -1.0, 0.5], &params),
            Err(UndefinedSimilarity::ZeroVariance)
        );
        let sim = centered_cosine(&[1.0, -1.0, 2.0], &[2.0, -2.0, 4.0], &params).unwrap();
        assert!((sim - 1.0).abs() < 1e-12);
        let sim = centered_cosine(&[1.0, -1.0, 2.0], &[-1.0, 1.0, -2.0], &params).unwrap();
        assert!((sim + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_perfectly_correlated_items_are_mutual_neighbors() {
        // Items 1 and 2 move together across users 1..3; item 3 is the opposite.
        let m = matrix(&[
            (1, 1, 5.0), (1, 2, 5.0), (1, 3, 1.0),
            (2, 1, 1.0), (2, 2, 1.0), (2, 3, 5.0),
            (3, 1, 4.0), (3, 2, 4.0), (3, 3, 2.0),
            (4, 4, 3.0), (5, 4, 4.0),
        ]);
        let builder = SimilarityBuilder::new(SimilarityParams::default());
        let table = builder.build(&m);

        let of_1 = table.get(ItemId(1));
        assert_eq!(of_1[0].item, ItemId(2));
        assert!((of_1[0].similarity - 1.0).abs() < 1e-9);
        assert!(table.get(ItemId(2)).iter().any(|n| n.item == ItemId(1)));
        assert!(table.get(ItemId(4)).is_empty());

        let direct = builder.pair_similarity(&m, ItemId(1), ItemId(2)).unwrap();
        assert!((direct - of_1[0].similarity).abs() < 1e-12);
    }

    #[test]
    fn test_pairs_below_min_common_raters_are_excluded() {
        let m = matrix(&[
            (1, 1, 5.0), (1, 2, 1.0),
            (2, 1, 1.0), (2, 2, 5.0),
        ]);
        let table = SimilarityBuilder::new(SimilarityParams::default()).build(&m);
        assert!(table.get(ItemId(1)).is_empty());
        assert!(table.get(ItemId(2)).is_empty());

        let relaxed = SimilarityParams {
            min_common_raters: 2,
            ..SimilarityParams::default()
        };
        let table = SimilarityBuilder::new(relaxed).build(&m);
        assert_eq!(table.get(ItemId(1)).len(), 1);
    }

    #[test]
    fn test_lists_are_bounded_and_ordered() {
        let mut ratings = Vec::new();
        for user in 1..=6u32 {
            for item in 1..=8u32 {
                let rating = 1.0 + ((user * 7 + item * item * 3) % 5) as f32;
                ratings.push((user, item, rating));
            }
        }
        let m = matrix(&ratings);
        let params = SimilarityParams {
            top_k: 3,
            ..SimilarityParams::default()
        };
        let table = SimilarityBuilder::new(params).build(&m);
        for (item, neighbors) in table.iter() {
            assert!(neighbors.len() <= 3);
            assert!(neighbors.iter().all(|n| n.item != item));
            assert!(neighbors.iter().all(|n| (-1.0..=1.0).contains(&n.similarity)));
            for pair in neighbors.windows(2) {
                assert_ne!(neighbor_order(&pair[0], &pair[1]), Ordering::Greater);
            }
        }
    }

    #[test]
    fn test_ties_break_by_ascending_item() {
        let mut a = vec![
            Neighbor { item: ItemId(9), similarity: 0.5 },
            Neighbor { item: ItemId(3), similarity: 0.5 },
            Neighbor { item: ItemId(5), similarity: 0.9 },
        ];
        a.sort_by(neighbor_order);
        let order: Vec<u32> = a.iter().map(|n| n.item.raw()).collect();
        assert_eq!(order, vec![5, 3, 9]);
    }
}
