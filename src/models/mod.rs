use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Catalog-wide movie identifier. Displays as the prefixed rating key (`m1193`)
/// and parses from either the prefixed or the raw form, so both key spaces map
/// onto the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u32);

pub const ITEM_KEY_PREFIX: char = 'm';

impl ItemId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ITEM_KEY_PREFIX, self.0)
    }
}

impl FromStr for ItemId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s.strip_prefix(ITEM_KEY_PREFIX).unwrap_or(s);
        digits.parse().map(ItemId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u32);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// Inclusive bounds of the ordinal rating scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingScale {
    pub min: f32,
    pub max: f32,
}

impl RatingScale {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// NaN and infinities are never in range.
    pub fn contains(&self, value: f32) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

impl Default for RatingScale {
    fn default() -> Self {
        Self::new(1.0, 5.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: ItemId,
    pub title: String,
    pub genres: Vec<String>,
}

impl Movie {
    pub fn new(id: ItemId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            genres: Vec::new(),
        }
    }

    pub fn with_genres(mut self, genres: Vec<String>) -> Self {
        self.genres = genres;
        self
    }

    /// Placeholder for items that appear in ratings but not in the catalog file.
    pub fn untitled(id: ItemId) -> Self {
        Self::new(id, format!("Movie {}", id.raw()))
    }
}

/// One entry of an item's neighbor list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub item: ItemId,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularItem {
    pub item: ItemId,
    pub rating_count: u32,
    pub mean_rating: f64,
    pub score: f64,
    /// Whether the item met the minimum-support floor.
    pub supported: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecommendationSource {
    Personalized { predicted: f64 },
    Popular { score: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub item: ItemId,
    pub source: RecommendationSource,
}

impl Recommendation {
    pub fn personalized(item: ItemId, predicted: f64) -> Self {
        Self {
            item,
            source: RecommendationSource::Personalized { predicted },
        }
    }

    pub fn popular(item: ItemId, score: f64) -> Self {
        Self {
            item,
            source: RecommendationSource::Popular { score },
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.source, RecommendationSource::Popular { .. })
    }

    pub fn predicted_rating(&self) -> Option<f64> {
        match self.source {
            RecommendationSource::Personalized { predicted } => Some(predicted),
            RecommendationSource::Popular { .. } => None,
        }
    }
}

/// A recommendation joined with its catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedMovie {
    pub item: ItemId,
    pub title: String,
    pub genres: Vec<String>,
    pub predicted_rating: Option<f64>,
}

pub fn item_ids(recommendations: &[Recommendation]) -> Vec<ItemId> {
    recommendations.iter().map(|r| r.item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_id_key_forms_agree() {
        let prefixed: ItemId = "m1193".parse().unwrap();
        let raw: ItemId = "1193".parse().unwrap();
        assert_eq!(prefixed, raw);
        assert_eq!(prefixed.to_string(), "m1193");
        assert!("mx1".parse::<ItemId>().is_err());
    }

    #[test]
    fn test_rating_scale_rejects_non_finite() {
        let scale = RatingScale::default();
        assert!(scale.contains(1.0));
        assert!(scale.contains(5.0));
        assert!(!scale.contains(0.0));
        assert!(!scale.contains(5.5));
        assert!(!scale.contains(f32::NAN));
    }

    #[test]
    fn test_recommendation_tags() {
        let p = Recommendation::personalized(ItemId(1), 4.5);
        let f = Recommendation::popular(ItemId(2), 4.1);
        assert!(!p.is_fallback());
        assert!(f.is_fallback());
        assert_eq!(p.predicted_rating(), Some(4.5));
        assert_eq!(f.predicted_rating(), None);
        assert_eq!(item_ids(&[p, f]), vec![ItemId(1), ItemId(2)]);
    }
}
