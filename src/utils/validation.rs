use crate::config::Config;
use crate::error::{DataLoadError, InvalidInputError};
use crate::models::{ItemId, RatingScale};
use std::collections::BTreeMap;

/// Collects every unknown item and every off-scale rating; the vector is
/// accepted only if both lists are empty. Ratings are never coerced.
pub fn validate_rating_vector<F>(
    ratings: &BTreeMap<ItemId, f32>,
    is_known: F,
    scale: RatingScale,
) -> Result<(), InvalidInputError>
where
    F: Fn(ItemId) -> bool,
{
    let mut error = InvalidInputError::default();
    for (&item, &rating) in ratings {
        if !is_known(item) {
            error.unknown_items.push(item);
        } else if !scale.contains(rating) {
            error.out_of_range.push((item, rating));
        }
    }

    if error.is_empty() {
        Ok(())
    } else {
        Err(error)
    }
}

/// Parses `key=value` rating pairs such as `m1193=5` or `2355=4`.
pub fn parse_rating_pair(input: &str) -> Result<(ItemId, f32), String> {
    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| format!("Expected ITEM=RATING, got {:?}", input))?;
    let item = key
        .parse::<ItemId>()
        .map_err(|_| format!("Invalid item key {:?}", key))?;
    let rating = value
        .trim()
        .parse::<f32>()
        .map_err(|_| format!("Invalid rating {:?} for {}", value, item))?;
    Ok((item, rating))
}

pub fn validate_config(config: &Config) -> Result<(), DataLoadError> {
    let invalid = |msg: String| Err(DataLoadError::InvalidConfig(msg));

    if config.similarity.top_k == 0 {
        return invalid("similarity.top_k must be greater than 0".to_string());
    }

    if config.similarity.min_common_raters == 0 {
        return invalid("similarity.min_common_raters must be at least 1".to_string());
    }

    let rec = &config.recommendation;
    if !rec.rating_min.is_finite() || !rec.rating_max.is_finite() || rec.rating_min >= rec.rating_max {
        return invalid(format!(
            "recommendation.rating_min ({}) must be below rating_max ({})",
            rec.rating_min, rec.rating_max
        ));
    }

    if !(config.popularity.prior_weight >= 0.0) {
        return invalid(format!(
            "popularity.prior_weight must be non-negative, got {}",
            config.popularity.prior_weight
        ));
    }

    if config.data.delimiter.is_empty() {
        return invalid("data.delimiter cannot be empty".to_string());
    }

    if config.runtime.workers == 0 {
        return invalid("runtime.workers must be at least 1".to_string());
    }

    Ok(())
}
