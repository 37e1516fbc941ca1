use crate::algorithms::{
    IbcfPredictor, NeighborTable, PopularityParams, PopularityRanker, PopularityRanking,
    SimilarityBuilder, SimilarityParams,
};
use crate::config::Config;
use crate::error::DataLoadError;
use crate::models::{ItemId, RatingScale};
use crate::services::rating_store::{Catalog, LoadedData, RatingMatrix};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Bumped whenever the serialized layout changes.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Everything that shapes the prepared structures besides the source data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuildParams {
    pub similarity: SimilarityParams,
    pub popularity: PopularityParams,
    pub scale: RatingScale,
}

impl From<&Config> for BuildParams {
    fn from(config: &Config) -> Self {
        Self {
            similarity: SimilarityParams::from(&config.similarity),
            popularity: PopularityParams::from(&config.popularity),
            scale: RatingScale::new(
                config.recommendation.rating_min,
                config.recommendation.rating_max,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub format_version: u32,
    pub snapshot_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub source_fingerprint: String,
    pub params: BuildParams,
    pub num_users: usize,
    pub num_items: usize,
    pub num_ratings: usize,
}

/// The prepared engine state: rating matrix, neighbor table and popularity
/// ranking from one build, plus the catalog they describe. Immutable; share it
/// behind an `Arc` and read it from any number of threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub catalog: Catalog,
    pub ratings: RatingMatrix,
    pub neighbors: NeighborTable,
    pub popularity: PopularityRanking,
}

impl Snapshot {
    pub fn build(loaded: LoadedData, params: BuildParams, source_fingerprint: String) -> Self {
        let LoadedData {
            catalog, matrix, ..
        } = loaded;

        let neighbors = SimilarityBuilder::new(params.similarity).build(&matrix);
        let popularity = PopularityRanker::new(params.popularity).rank(&matrix);

        let meta = SnapshotMeta {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot_id: Uuid::new_v4(),
            created_at: Utc::now(),
            source_fingerprint,
            params,
            num_users: matrix.num_users(),
            num_items: matrix.num_items(),
            num_ratings: matrix.num_ratings(),
        };

        Self {
            meta,
            catalog,
            ratings: matrix,
            neighbors,
            popularity,
        }
    }

    pub fn scale(&self) -> RatingScale {
        self.meta.params.scale
    }

    pub fn predictor(&self) -> IbcfPredictor<'_> {
        IbcfPredictor::new(&self.neighbors, &self.popularity)
    }

    /// Whether this snapshot was built from the same sources with the same parameters.
    pub fn matches(&self, source_fingerprint: &str, params: &BuildParams) -> bool {
        self.meta.format_version == SNAPSHOT_FORMAT_VERSION
            && self.meta.source_fingerprint == source_fingerprint
            && &self.meta.params == params
    }

    /// Writes to a sibling temp file and renames it over `path`, so readers see
    /// either the old snapshot or the new one.
    pub fn save(&self, path: &Path) -> Result<(), DataLoadError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| DataLoadError::io(parent, e))?;
        }

        let tmp = temp_path(path);
        let result = (|| {
            let file = fs::File::create(&tmp).map_err(|e| DataLoadError::io(&tmp, e))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self)
                .map_err(|e| DataLoadError::Snapshot(e.to_string()))?;
            writer.flush().map_err(|e| DataLoadError::io(&tmp, e))?;
            fs::rename(&tmp, path).map_err(|e| DataLoadError::io(path, e))
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result?;

        info!(
            "Saved snapshot {} ({} items) to {}",
            self.meta.snapshot_id,
            self.meta.num_items,
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, DataLoadError> {
        let file = fs::File::open(path).map_err(|e| DataLoadError::io(path, e))?;
        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| DataLoadError::Snapshot(format!("{}: {}", path.display(), e)))?;

        if snapshot.meta.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(DataLoadError::Snapshot(format!(
                "{} has format version {}, expected {}",
                path.display(),
                snapshot.meta.format_version,
                SNAPSHOT_FORMAT_VERSION
            )));
        }
        snapshot.check_consistency()?;

        info!(
            "Loaded snapshot {} built {} from {}",
            snapshot.meta.snapshot_id,
            snapshot.meta.created_at,
            path.display()
        );
        Ok(snapshot)
    }

    /// The three structures must describe the same item universe and be
    /// internally well formed.
    fn check_consistency(&self) -> Result<(), DataLoadError> {
        self.ratings.validate().map_err(DataLoadError::Snapshot)?;
        self.neighbors.validate().map_err(DataLoadError::Snapshot)?;

        let items = self.ratings.items();
        if self.neighbors.items() != items {
            return Err(DataLoadError::Snapshot(
                "neighbor table and rating matrix disagree on items".to_string(),
            ));
        }

        let mut ranked: Vec<ItemId> = self.popularity.entries().iter().map(|e| e.item).collect();
        ranked.sort_unstable();
        if ranked != items {
            return Err(DataLoadError::Snapshot(
                "popularity ranking and rating matrix disagree on items".to_string(),
            ));
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

/// SHA-256 over the contents of every source file, in order.
pub fn fingerprint_sources(paths: &[&Path]) -> Result<String, DataLoadError> {
    let mut hasher = Sha256::new();
    for path in paths {
        let bytes = fs::read(path).map_err(|e| DataLoadError::io(*path, e))?;
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rating_store::RatingStore;

    const RATINGS: &str = "1::1::5\n1::2::4\n1::3::1\n\
                           2::1::4\n2::2::5\n2::3::2\n\
                           3::1::1\n3::2::2\n3::3::5\n\
                           4::1::5\n4::3::1\n";

    fn snapshot() -> Snapshot {
        let loaded =
            RatingStore::from_sources(RATINGS, None, "::", RatingScale::default()).unwrap();
        let params = BuildParams {
            similarity: SimilarityParams::default(),
            popularity: PopularityParams {
                min_support: 1,
                prior_weight: 2.0,
            },
            scale: RatingScale::default(),
        };
        Snapshot::build(loaded, params, "abc".to_string())
    }

    #[test]
    fn test_save_load_preserves_structures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snapshot.json");
        let original = snapshot();
        original.save(&path).unwrap();

        let loaded = Snapshot::load(&path).unwrap();
        assert_eq!(loaded.meta, original.meta);
        assert_eq!(loaded.neighbors, original.neighbors);
        assert_eq!(loaded.popularity, original.popularity);
        assert_eq!(loaded.ratings, original.ratings);

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_floats_survive_round_trip_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let original = snapshot();
        original.save(&path).unwrap();
        let loaded = Snapshot::load(&path).unwrap();

        let bits = |s: &Snapshot| -> Vec<u64> {
            let similarities = s
                .neighbors
                .iter()
                .flat_map(|(_, list)| list.iter().map(|n| n.similarity.to_bits()));
            let scores = s
                .popularity
                .entries()
                .iter()
                .flat_map(|e| [e.score.to_bits(), e.mean_rating.to_bits()]);
            similarities
                .chain(scores)
                .chain([s.popularity.global_mean().to_bits()])
                .collect()
        };
        assert_eq!(bits(&loaded), bits(&original));
    }

    fn corrupted(edit: impl FnOnce(&mut serde_json::Value)) -> Result<Snapshot, DataLoadError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        snapshot().save(&path).unwrap();

        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        edit(&mut value);
        fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();
        Snapshot::load(&path)
    }

    #[test]
    fn test_corrupt_structures_are_rejected() {
        assert!(corrupted(|_| {}).is_ok());

        let missing_lists = corrupted(|v| v["neighbors"]["lists"] = serde_json::json!([]));
        assert!(matches!(missing_lists, Err(DataLoadError::Snapshot(_))));

        let stray_neighbor = corrupted(|v| {
            v["neighbors"]["lists"][0] = serde_json::json!([{ "item": 77, "similarity": 0.5 }])
        });
        assert!(matches!(stray_neighbor, Err(DataLoadError::Snapshot(_))));

        let bad_row = corrupted(|v| v["ratings"]["rows"][0][0][0] = serde_json::json!(999));
        assert!(matches!(bad_row, Err(DataLoadError::Snapshot(_))));

        let foreign_item = corrupted(|v| v["popularity"]["entries"][0]["item"] = serde_json::json!(999));
        assert!(matches!(foreign_item, Err(DataLoadError::Snapshot(_))));
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let mut stale = snapshot();
        stale.meta.format_version = SNAPSHOT_FORMAT_VERSION + 1;
        stale.save(&path).unwrap();
        assert!(matches!(Snapshot::load(&path), Err(DataLoadError::Snapshot(_))));
    }

    #[test]
    fn test_matches_requires_same_sources_and_params() {
        let snap = snapshot();
        let params = snap.meta.params;
        assert!(snap.matches("abc", &params));
        assert!(!snap.matches("abd", &params));

        let mut other = params;
        other.similarity.top_k = 10;
        assert!(!snap.matches("abc", &other));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.dat");
        fs::write(&a, "1::1::5\n").unwrap();
        let first = fingerprint_sources(&[a.as_path()]).unwrap();
        assert_eq!(first.len(), 64);
        assert_eq!(first, fingerprint_sources(&[a.as_path()]).unwrap());

        fs::write(&a, "1::1::4\n").unwrap();
        assert_ne!(first, fingerprint_sources(&[a.as_path()]).unwrap());
    }
}
