use crate::config::DataConfig;
use crate::error::DataLoadError;
use crate::models::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{info, warn};

/// Number of malformed lines echoed to the log before going quiet.
const MAX_LOGGED_REJECTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingRecord {
    pub user: UserId,
    pub item: ItemId,
    pub rating: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub accepted: usize,
    pub malformed: usize,
    pub out_of_range: usize,
    /// Duplicate (user, item) pairs; the later record wins.
    pub overridden: usize,
    /// Malformed catalog lines.
    pub catalog_skipped: usize,
}

/// Sparse user x item rating matrix. Rows are users, each row sorted by item
/// position; an absent cell is "unrated", never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MatrixRepr", into = "MatrixRepr")]
pub struct RatingMatrix {
    items: Vec<ItemId>,
    users: Vec<UserId>,
    rows: Vec<Vec<(u32, f32)>>,
    item_index: HashMap<ItemId, u32>,
    user_index: HashMap<UserId, u32>,
}

#[derive(Serialize, Deserialize)]
struct MatrixRepr {
    items: Vec<ItemId>,
    users: Vec<UserId>,
    rows: Vec<Vec<(u32, f32)>>,
}

impl From<MatrixRepr> for RatingMatrix {
    fn from(repr: MatrixRepr) -> Self {
        let item_index = index_of(&repr.items);
        let user_index = index_of(&repr.users);
        Self {
            items: repr.items,
            users: repr.users,
            rows: repr.rows,
            item_index,
            user_index,
        }
    }
}

impl From<RatingMatrix> for MatrixRepr {
    fn from(matrix: RatingMatrix) -> Self {
        Self {
            items: matrix.items,
            users: matrix.users,
            rows: matrix.rows,
        }
    }
}

fn index_of<K: Copy + Eq + std::hash::Hash>(keys: &[K]) -> HashMap<K, u32> {
    keys.iter()
        .enumerate()
        .map(|(i, &k)| (k, i as u32))
        .collect()
}

impl RatingMatrix {
    /// Builds the matrix from already-validated records. `extra_items` widens the
    /// item universe with catalog entries nobody rated. Duplicate (user, item)
    /// pairs resolve last-write-wins; the number of overrides is returned.
    pub fn from_records<I>(records: I, extra_items: &[ItemId]) -> (Self, usize)
    where
        I: IntoIterator<Item = RatingRecord>,
    {
        let mut cells: BTreeMap<UserId, BTreeMap<ItemId, f32>> = BTreeMap::new();
        let mut universe: BTreeSet<ItemId> = extra_items.iter().copied().collect();
        let mut overridden = 0;

        for record in records {
            universe.insert(record.item);
            if cells
                .entry(record.user)
                .or_default()
                .insert(record.item, record.rating)
                .is_some()
            {
                overridden += 1;
            }
        }

        let items: Vec<ItemId> = universe.into_iter().collect();
        let item_index = index_of(&items);

        let mut users = Vec::with_capacity(cells.len());
        let mut rows = Vec::with_capacity(cells.len());
        for (user, ratings) in cells {
            users.push(user);
            // BTreeMap order on ItemId matches item position order.
            rows.push(
                ratings
                    .into_iter()
                    .map(|(item, rating)| (item_index[&item], rating))
                    .collect(),
            );
        }
        let user_index = index_of(&users);

        (
            Self {
                items,
                users,
                rows,
                item_index,
                user_index,
            },
            overridden,
        )
    }

    pub fn items(&self) -> &[ItemId] {
        &self.items
    }

    pub fn users(&self) -> &[UserId] {
        &self.users
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    pub fn num_ratings(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn contains_item(&self, item: ItemId) -> bool {
        self.item_index.contains_key(&item)
    }

    pub fn item_position(&self, item: ItemId) -> Option<usize> {
        self.item_index.get(&item).map(|&i| i as usize)
    }

    pub fn item_at(&self, position: usize) -> ItemId {
        self.items[position]
    }

    pub fn rating(&self, user: UserId, item: ItemId) -> Option<f32> {
        let row = &self.rows[*self.user_index.get(&user)? as usize];
        let position = *self.item_index.get(&item)?;
        row.binary_search_by_key(&position, |&(i, _)| i)
            .ok()
            .map(|found| row[found].1)
    }

    /// Ratings of the user at `position`, as (item position, rating) pairs.
    pub fn row(&self, position: usize) -> &[(u32, f32)] {
        &self.rows[position]
    }

    /// Ratings of `user` keyed by item, the shape a new-user vector takes.
    pub fn user_ratings(&self, user: UserId) -> BTreeMap<ItemId, f32> {
        self.user_index
            .get(&user)
            .map(|&u| {
                self.rows[u as usize]
                    .iter()
                    .map(|&(i, r)| (self.items[i as usize], r))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Mean rating of the user at `position`; `None` for an all-missing row.
    pub fn user_mean(&self, position: usize) -> Option<f64> {
        let row = &self.rows[position];
        if row.is_empty() {
            return None;
        }
        Some(row.iter().map(|&(_, r)| r as f64).sum::<f64>() / row.len() as f64)
    }

    /// Column view: for each item position, the (user position, rating) pairs
    /// in ascending user order.
    pub fn columns(&self) -> Vec<Vec<(u32, f32)>> {
        let mut columns = vec![Vec::new(); self.items.len()];
        for (u, row) in self.rows.iter().enumerate() {
            for &(i, r) in row {
                columns[i as usize].push((u as u32, r));
            }
        }
        columns
    }

    /// Checks the shape a deserialized matrix must have before lookups are safe.
    pub fn validate(&self) -> Result<(), String> {
        if self.rows.len() != self.users.len() {
            return Err(format!("{} rows for {} users", self.rows.len(), self.users.len()));
        }
        if self.items.windows(2).any(|w| w[0] >= w[1]) {
            return Err("matrix items are not strictly ascending".to_string());
        }
        if self.users.windows(2).any(|w| w[0] >= w[1]) {
            return Err("matrix users are not strictly ascending".to_string());
        }
        for (user, row) in self.users.iter().zip(&self.rows) {
            if row.iter().any(|&(i, r)| i as usize >= self.items.len() || !r.is_finite()) {
                return Err(format!("row of {} references an invalid cell", user));
            }
            if row.windows(2).any(|w| w[0].0 >= w[1].0) {
                return Err(format!("row of {} is not sorted by item", user));
            }
        }
        Ok(())
    }

    pub fn records(&self) -> impl Iterator<Item = RatingRecord> + '_ {
        self.rows.iter().enumerate().flat_map(move |(u, row)| {
            row.iter().map(move |&(i, rating)| RatingRecord {
                user: self.users[u],
                item: self.items[i as usize],
                rating,
            })
        })
    }
}

/// Movie metadata, sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    movies: Vec<Movie>,
}

impl Catalog {
    pub fn from_movies(mut movies: Vec<Movie>) -> Self {
        movies.sort_by_key(|m| m.id);
        movies.dedup_by_key(|m| m.id);
        Self { movies }
    }

    pub fn get(&self, id: ItemId) -> Option<&Movie> {
        self.movies
            .binary_search_by_key(&id, |m| m.id)
            .ok()
            .map(|i| &self.movies[i])
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.movies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.movies.is_empty()
    }

    pub fn ids(&self) -> Vec<ItemId> {
        self.movies.iter().map(|m| m.id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Movie> {
        self.movies.iter()
    }

    /// Adds untitled entries for any of `items` missing from the catalog.
    /// Returns how many were added.
    pub fn fill_missing(&mut self, items: &[ItemId]) -> usize {
        let missing: Vec<Movie> = items
            .iter()
            .filter(|&&id| !self.contains(id))
            .map(|&id| Movie::untitled(id))
            .collect();
        let added = missing.len();
        if added > 0 {
            self.movies.extend(missing);
            self.movies.sort_by_key(|m| m.id);
        }
        added
    }
}

/// Parses `UserID<delim>MovieID<delim>Rating[<delim>Timestamp]` lines.
/// Malformed and out-of-scale lines are skipped and counted.
pub fn parse_ratings(
    content: &str,
    delimiter: &str,
    scale: RatingScale,
) -> (Vec<RatingRecord>, LoadReport) {
    let mut records = Vec::new();
    let mut report = LoadReport::default();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split(delimiter).map(str::trim);
        let parsed = match (fields.next(), fields.next(), fields.next()) {
            (Some(user), Some(item), Some(rating)) => {
                match (user.parse::<u32>(), item.parse::<u32>(), rating.parse::<f32>()) {
                    (Ok(user), Ok(item), Ok(rating)) => Some((UserId(user), ItemId(item), rating)),
                    _ => None,
                }
            }
            _ => None,
        };

        match parsed {
            Some((user, item, rating)) if scale.contains(rating) => {
                records.push(RatingRecord { user, item, rating });
                report.accepted += 1;
            }
            Some((user, item, rating)) => {
                report.out_of_range += 1;
                if report.malformed + report.out_of_range <= MAX_LOGGED_REJECTS {
                    warn!(
                        "Skipping line {}: rating {} for {}/{} outside [{}, {}]",
                        line_no + 1,
                        rating,
                        user,
                        item,
                        scale.min,
                        scale.max
                    );
                }
            }
            None => {
                report.malformed += 1;
                if report.malformed + report.out_of_range <= MAX_LOGGED_REJECTS {
                    warn!("Skipping malformed rating line {}: {:?}", line_no + 1, line);
                }
            }
        }
    }

    (records, report)
}

/// Parses `MovieID<delim>Title<delim>Genre|Genre` lines. Returns the catalog and
/// the number of skipped lines.
pub fn parse_movies(content: &str, delimiter: &str) -> (Catalog, usize) {
    let mut movies = Vec::new();
    let mut skipped = 0;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.splitn(3, delimiter);
        let id = fields.next().and_then(|f| f.trim().parse::<ItemId>().ok());
        let title = fields.next().map(str::trim).filter(|t| !t.is_empty());
        match (id, title) {
            (Some(id), Some(title)) => {
                let genres = fields
                    .next()
                    .map(|g| {
                        g.split('|')
                            .map(str::trim)
                            .filter(|g| !g.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                movies.push(Movie::new(id, title).with_genres(genres));
            }
            _ => skipped += 1,
        }
    }

    (Catalog::from_movies(movies), skipped)
}

/// MovieLens files are Latin-1; decode lossily instead of failing on them.
fn read_lossy(path: &Path) -> Result<String, DataLoadError> {
    let bytes = std::fs::read(path).map_err(|e| DataLoadError::io(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, Clone)]
pub struct LoadedData {
    pub catalog: Catalog,
    pub matrix: RatingMatrix,
    pub report: LoadReport,
}

pub struct RatingStore;

impl RatingStore {
    pub fn load(config: &DataConfig, scale: RatingScale) -> Result<LoadedData, DataLoadError> {
        let content = read_lossy(&config.ratings_path)?;
        let mut loaded = Self::from_sources(&content, None, &config.delimiter, scale)
            .map_err(|e| match e {
                DataLoadError::NoRatings { .. } => DataLoadError::NoRatings {
                    path: config.ratings_path.clone(),
                },
                other => other,
            })?;

        if let Some(movies_path) = &config.movies_path {
            let movies = read_lossy(movies_path)?;
            let (mut catalog, skipped) = parse_movies(&movies, &config.delimiter);
            if skipped > 0 {
                warn!("Skipped {} malformed catalog lines in {}", skipped, movies_path.display());
            }
            loaded.report.catalog_skipped = skipped;
            info!("Loaded {} catalog entries from {}", catalog.len(), movies_path.display());

            let untitled = catalog.fill_missing(loaded.matrix.items());
            if untitled > 0 {
                warn!("{} rated items are missing from the catalog", untitled);
            }
            // Rebuild so the item universe also covers unrated catalog entries.
            let (matrix, _) =
                RatingMatrix::from_records(loaded.matrix.records(), &catalog.ids());
            loaded.matrix = matrix;
            loaded.catalog = catalog;
        }

        Ok(loaded)
    }

    /// Builds store contents from in-memory ratings (and optional catalog) text.
    pub fn from_sources(
        ratings: &str,
        movies: Option<&str>,
        delimiter: &str,
        scale: RatingScale,
    ) -> Result<LoadedData, DataLoadError> {
        let (records, mut report) = parse_ratings(ratings, delimiter, scale);
        if records.is_empty() {
            return Err(DataLoadError::NoRatings {
                path: "<memory>".into(),
            });
        }

        let catalog_items = match movies {
            Some(movies) => {
                let (catalog, skipped) = parse_movies(movies, delimiter);
                if skipped > 0 {
                    warn!("Skipped {} malformed catalog lines", skipped);
                }
                report.catalog_skipped = skipped;
                catalog
            }
            None => Catalog::default(),
        };
        let (matrix, overridden) = RatingMatrix::from_records(records, &catalog_items.ids());
        report.overridden = overridden;

        let mut catalog = catalog_items;
        catalog.fill_missing(matrix.items());

        if report.overridden > 0 {
            warn!(
                "{} duplicate (user, item) ratings resolved last-write-wins",
                report.overridden
            );
        }
        info!(
            "Loaded {} ratings from {} users over {} items ({} malformed, {} out of range)",
            report.accepted,
            matrix.num_users(),
            matrix.num_items(),
            report.malformed,
            report.out_of_range
        );

        Ok(LoadedData {
            catalog,
            matrix,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATINGS: &str = "1::10::5::978300760\n\
                           1::20::3::978302109\n\
                           2::10::4::978301968\n\
                           2::30::six::978300275\n\
                           3::20::9::978824291\n\
                           garbage line\n\
                           1::20::4::978302111\n";

    #[test]
    fn test_parse_ratings_skips_bad_lines() {
        let (records, report) = parse_ratings(RATINGS, "::", RatingScale::default());
        assert_eq!(records.len(), 4);
        assert_eq!(report.accepted, 4);
        assert_eq!(report.malformed, 2);
        assert_eq!(report.out_of_range, 1);
    }

    #[test]
    fn test_duplicates_resolve_last_write_wins() {
        let loaded = RatingStore::from_sources(RATINGS, None, "::", RatingScale::default()).unwrap();
        assert_eq!(loaded.report.overridden, 1);
        assert_eq!(loaded.matrix.rating(UserId(1), ItemId(20)), Some(4.0));
        assert_eq!(loaded.matrix.rating(UserId(2), ItemId(20)), None);
        assert_eq!(loaded.matrix.rating(UserId(9), ItemId(10)), None);
        assert_eq!(loaded.matrix.num_ratings(), 3);
    }

    #[test]
    fn test_empty_source_is_rejected() {
        let result = RatingStore::from_sources("bad\n", None, "::", RatingScale::default());
        assert!(matches!(result, Err(DataLoadError::NoRatings { .. })));
    }

    #[test]
    fn test_catalog_widens_item_universe() {
        let movies = "10::Toy Story (1995)::Animation|Children's|Comedy\n\
                      40::Heat (1995)::Action|Crime|Thriller\n";
        let loaded =
            RatingStore::from_sources(RATINGS, Some(movies), "::", RatingScale::default()).unwrap();
        assert_eq!(
            loaded.matrix.items(),
            &[ItemId(10), ItemId(20), ItemId(40)]
        );
        assert_eq!(loaded.catalog.get(ItemId(10)).unwrap().genres.len(), 3);
        assert_eq!(loaded.catalog.get(ItemId(20)).unwrap().title, "Movie 20");
        assert_eq!(loaded.report.catalog_skipped, 0);
    }

    #[test]
    fn test_malformed_catalog_lines_are_reported() {
        let movies = "10::Toy Story (1995)::Animation\n\
                      abc::Bad Id (1995)::Drama\n\
                      40\n";
        let loaded =
            RatingStore::from_sources(RATINGS, Some(movies), "::", RatingScale::default()).unwrap();
        assert_eq!(loaded.report.catalog_skipped, 2);
        assert_eq!(loaded.catalog.get(ItemId(10)).unwrap().title, "Toy Story (1995)");
    }

    #[test]
    fn test_validate_rejects_out_of_range_cells() {
        let loaded = RatingStore::from_sources(RATINGS, None, "::", RatingScale::default()).unwrap();
        assert!(loaded.matrix.validate().is_ok());

        let json = serde_json::to_string(&loaded.matrix).unwrap();
        let broken = json.replacen("[[0,5.0]", "[[7,5.0]", 1);
        assert_ne!(broken, json);
        let back: RatingMatrix = serde_json::from_str(&broken).unwrap();
        assert!(back.validate().is_err());
    }

    #[test]
    fn test_columns_follow_user_order() {
        let loaded = RatingStore::from_sources(RATINGS, None, "::", RatingScale::default()).unwrap();
        let columns = loaded.matrix.columns();
        let col = &columns[loaded.matrix.item_position(ItemId(10)).unwrap()];
        assert_eq!(col, &vec![(0, 5.0), (1, 4.0)]);
        assert_eq!(loaded.matrix.user_mean(0), Some(4.5));
    }

    #[test]
    fn test_matrix_serde_rebuilds_indexes() {
        let loaded = RatingStore::from_sources(RATINGS, None, "::", RatingScale::default()).unwrap();
        let json = serde_json::to_string(&loaded.matrix).unwrap();
        let back: RatingMatrix = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rating(UserId(2), ItemId(10)), Some(4.0));
        assert_eq!(back, loaded.matrix);
    }

    #[test]
    fn test_load_missing_file_is_data_load_error() {
        let config = DataConfig {
            ratings_path: "/nonexistent/ratings.dat".into(),
            ..DataConfig::default()
        };
        let result = RatingStore::load(&config, RatingScale::default());
        assert!(matches!(result, Err(DataLoadError::Io { .. })));
    }
}
