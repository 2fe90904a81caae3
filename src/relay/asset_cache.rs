use std::{
    io,
    path::{Component, Path, PathBuf},
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset path `{0}` escapes the asset root")]
    InvalidPath(String),

    #[error("asset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheReport {
    pub removed_versions: Vec<String>,
    pub cached: usize,
    pub failed: usize,
}

/// Offline copies of the app's static assets, one directory per version tag.
#[derive(Debug, Clone)]
pub struct AssetCache {
    cache_dir: PathBuf,
    version: String,
    source_dir: PathBuf,
    assets: Vec<String>,
}

impl AssetCache {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        version: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        assets: Vec<String>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            version: version.into(),
            source_dir: source_dir.into(),
            assets,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn version_dir(&self) -> PathBuf {
        self.cache_dir.join(&self.version)
    }

    /// Drops every cache of another version, then fills the current one.
    /// Individual asset failures are logged and counted, never returned.
    pub async fn activate(&self) -> Result<CacheReport, AssetError> {
        let mut report = CacheReport::default();
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|source| io_error(&self.cache_dir, source))?;

        let mut entries = tokio::fs::read_dir(&self.cache_dir)
            .await
            .map_err(|source| io_error(&self.cache_dir, source))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io_error(&self.cache_dir, source))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == self.version {
                continue;
            }

            log::info!("Deleting stale asset cache {name}");
            let is_dir = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_dir())
                .unwrap_or(false);
            let removed = if is_dir {
                tokio::fs::remove_dir_all(entry.path()).await
            } else {
                tokio::fs::remove_file(entry.path()).await
            };
            match removed {
                Ok(()) => report.removed_versions.push(name),
                Err(error) => log::warn!("Failed to delete stale asset cache {name}: {error}"),
            }
        }

        for asset in &self.assets {
            match self.populate(asset).await {
                Ok(()) => report.cached += 1,
                Err(error) => {
                    log::warn!("Failed to cache {asset}: {error}");
                    report.failed += 1;
                }
            }
        }

        log::debug!(
            "Asset cache {} ready: {} cached, {} failed",
            self.version,
            report.cached,
            report.failed
        );
        Ok(report)
    }

    /// Cache-first lookup; a miss reads the source copy and stores it.
    pub async fn fetch(&self, asset: &str) -> Result<Vec<u8>, AssetError> {
        let relative = relative_path(asset)?;
        let cached = self.version_dir().join(&relative);

        match tokio::fs::read(&cached).await {
            Ok(bytes) => return Ok(bytes),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(io_error(&cached, source)),
        }

        let bytes = self.read_source(&relative).await?;
        if let Err(error) = self.store(&cached, &bytes).await {
            log::warn!("Serving {asset} uncached: {error}");
        }
        Ok(bytes)
    }

    async fn populate(&self, asset: &str) -> Result<(), AssetError> {
        let relative = relative_path(asset)?;
        let bytes = self.read_source(&relative).await?;
        self.store(&self.version_dir().join(&relative), &bytes).await
    }

    async fn read_source(&self, relative: &Path) -> Result<Vec<u8>, AssetError> {
        let source = self.source_dir.join(relative);
        tokio::fs::read(&source)
            .await
            .map_err(|error| io_error(&source, error))
    }

    async fn store(&self, target: &Path, bytes: &[u8]) -> Result<(), AssetError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| io_error(parent, source))?;
        }
        tokio::fs::write(target, bytes)
            .await
            .map_err(|source| io_error(target, source))
    }
}

fn io_error(path: &Path, source: io::Error) -> AssetError {
    AssetError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Maps a request path such as `/icon-72.png` onto a path below the asset root.
fn relative_path(asset: &str) -> Result<PathBuf, AssetError> {
    let trimmed = asset.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(PathBuf::from("index.html"));
    }

    let path = Path::new(trimmed);
    if path
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
    {
        Ok(path.to_path_buf())
    } else {
        Err(AssetError::InvalidPath(asset.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::TempDir;

    use super::*;

    fn cache(dir: &TempDir, version: &str, assets: &[&str]) -> AssetCache {
        AssetCache::new(
            dir.path().join("cache"),
            version,
            dir.path().join("public"),
            assets.iter().map(|a| a.to_string()).collect(),
        )
    }

    fn write_source(dir: &TempDir, name: &str, content: &str) {
        let public = dir.path().join("public");
        std::fs::create_dir_all(&public).unwrap();
        std::fs::write(public.join(name), content).unwrap();
    }

    #[tokio::test]
    async fn activation_replaces_stale_versions() {
        let dir = TempDir::new("assets-activate");
        write_source(&dir, "index.html", "<html>");
        write_source(&dir, "manifest.json", "{}");
        std::fs::create_dir_all(dir.path().join("cache").join("study-checkin-v0.9.0")).unwrap();

        let report = cache(
            &dir,
            "study-checkin-v1.0.0",
            &["/", "/manifest.json", "/icon-512.png"],
        )
        .activate()
        .await
        .unwrap();

        assert_eq!(report.removed_versions, ["study-checkin-v0.9.0"]);
        assert_eq!(report.cached, 2);
        assert_eq!(report.failed, 1);
        assert!(
            dir.path()
                .join("cache/study-checkin-v1.0.0/index.html")
                .exists()
        );
    }

    #[tokio::test]
    async fn fetch_prefers_the_cached_copy() {
        let dir = TempDir::new("assets-fetch");
        write_source(&dir, "index.html", "v1");
        let cache = cache(&dir, "v1", &["/index.html"]);
        cache.activate().await.unwrap();

        write_source(&dir, "index.html", "v2");

        assert_eq!(cache.fetch("/").await.unwrap(), b"v1");
        assert!(matches!(
            cache.fetch("/../secret").await,
            Err(AssetError::InvalidPath(_))
        ));
        assert!(matches!(
            cache.fetch("/missing.png").await,
            Err(AssetError::Io { .. })
        ));
    }
}
