use crate::config::Config;
use crate::error::DataLoadError;
use crate::services::rating_store::{LoadedData, RatingStore};
use crate::snapshot::{fingerprint_sources, BuildParams, Snapshot};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Runs the offline preparation stage: load, build, rank.
#[derive(Clone)]
pub struct TrainingService {
    config: Arc<Config>,
}

impl TrainingService {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn build_params(&self) -> BuildParams {
        BuildParams::from(self.config.as_ref())
    }

    /// Builds a fresh snapshot from the configured sources. Calling it again on
    /// unchanged sources yields the same neighbor table and ranking.
    pub fn prepare(&self) -> Result<Snapshot, DataLoadError> {
        self.config.validate()?;
        let started = Instant::now();

        let fingerprint = self.fingerprint()?;
        let loaded = RatingStore::load(&self.config.data, self.build_params().scale)?;
        let snapshot = self.build_from(loaded, fingerprint);

        info!(
            "Prepared snapshot {} ({} users, {} items, {} ratings) in {:?}",
            snapshot.meta.snapshot_id,
            snapshot.meta.num_users,
            snapshot.meta.num_items,
            snapshot.meta.num_ratings,
            started.elapsed()
        );
        Ok(snapshot)
    }

    /// Reuses the stored snapshot when it was built from the same sources with
    /// the same parameters; otherwise rebuilds and replaces it.
    pub fn prepare_cached(&self) -> Result<Snapshot, DataLoadError> {
        let Some(path) = self.config.data.snapshot_path.as_deref() else {
            return self.prepare();
        };

        if path.exists() {
            let fingerprint = self.fingerprint()?;
            match Snapshot::load(path) {
                Ok(snapshot) if snapshot.matches(&fingerprint, &self.build_params()) => {
                    info!("Reusing snapshot {} from {}", snapshot.meta.snapshot_id, path.display());
                    return Ok(snapshot);
                }
                Ok(snapshot) => {
                    info!(
                        "Snapshot {} at {} is stale, rebuilding",
                        snapshot.meta.snapshot_id,
                        path.display()
                    );
                }
                Err(e) => warn!("Ignoring unreadable snapshot: {}", e),
            }
        }

        let snapshot = self.prepare()?;
        snapshot.save(path)?;
        Ok(snapshot)
    }

    /// Builds from already-loaded data on a pool sized by `runtime.workers`.
    pub fn build_from(&self, loaded: LoadedData, fingerprint: String) -> Snapshot {
        let params = self.build_params();
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.runtime.workers)
            .build()
        {
            Ok(pool) => pool.install(|| Snapshot::build(loaded, params, fingerprint)),
            Err(e) => {
                warn!("Falling back to the global rayon pool: {}", e);
                Snapshot::build(loaded, params, fingerprint)
            }
        }
    }

    fn fingerprint(&self) -> Result<String, DataLoadError> {
        let data = &self.config.data;
        let mut sources: Vec<&Path> = vec![data.ratings_path.as_path()];
        if let Some(movies) = &data.movies_path {
            sources.push(movies.as_path());
        }
        fingerprint_sources(&sources)
    }
}

/// One-shot preparation with the given configuration.
pub fn prepare(config: &Config) -> Result<Snapshot, DataLoadError> {
    TrainingService::new(Arc::new(config.clone())).prepare_cached()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_sources(dir: &Path) -> Config {
        let ratings = dir.join("ratings.dat");
        let movies = dir.join("movies.dat");
        fs::write(
            &ratings,
            "1::1::5::0\n1::2::4::0\n1::3::1::0\n\
             2::1::4::0\n2::2::5::0\n2::3::2::0\n\
             3::1::1::0\n3::2::2::0\n3::3::5::0\n",
        )
        .unwrap();
        fs::write(&movies, "1::A (2000)::Drama\n2::B (2001)::Comedy\n3::C (2002)::Horror\n4::D (2003)::Drama\n").unwrap();

        let mut config = Config::default();
        config.data.ratings_path = ratings;
        config.data.movies_path = Some(movies);
        config.data.snapshot_path = Some(dir.join("snapshot.json"));
        config.popularity.min_support = 1;
        config.runtime.workers = 2;
        config
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let service = TrainingService::new(Arc::new(write_sources(dir.path())));
        let first = service.prepare().unwrap();
        let second = service.prepare().unwrap();
        assert_eq!(first.neighbors, second.neighbors);
        assert_eq!(first.popularity, second.popularity);
        assert_eq!(first.meta.source_fingerprint, second.meta.source_fingerprint);
        assert_eq!(first.catalog.len(), 4);
    }

    #[test]
    fn test_cached_snapshot_is_reused_until_sources_change() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_sources(dir.path());
        let service = TrainingService::new(Arc::new(config.clone()));

        let built = service.prepare_cached().unwrap();
        let reused = service.prepare_cached().unwrap();
        assert_eq!(built.meta.snapshot_id, reused.meta.snapshot_id);

        fs::write(&config.data.ratings_path, "1::1::5::0\n2::1::3::0\n").unwrap();
        let rebuilt = service.prepare_cached().unwrap();
        assert_ne!(rebuilt.meta.snapshot_id, built.meta.snapshot_id);
        assert_eq!(rebuilt.meta.num_ratings, 2);
    }

    #[test]
    fn test_missing_sources_fail_preparation() {
        let mut config = Config::default();
        config.data.ratings_path = "/nonexistent/ratings.dat".into();
        config.data.movies_path = None;
        assert!(matches!(prepare(&config), Err(DataLoadError::Io { .. })));
    }
}
