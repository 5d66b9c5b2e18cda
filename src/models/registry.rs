use crate::config::schema::{MatchPolicy, ModelsConfig};
use crate::error::ScanError;
use crate::models::download::format_bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// A well-known model that can be fetched over HTTPS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteModel {
    pub name: &'static str,
    pub url: &'static str,
}

/// Built-in catalog of downloadable models
pub const REMOTE_MODELS: &[RemoteModel] = &[RemoteModel {
    name: "capybarahermes-2.5-mistral-7b.Q4_0",
    url: "https://huggingface.co/TheBloke/CapybaraHermes-2.5-Mistral-7B-GGUF/resolve/main/capybarahermes-2.5-mistral-7b.Q4_0.gguf",
}];

/// Where a catalog entry resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOrigin {
    Local,
    Remote,
}

/// One user-visible model and what it resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEntry {
    pub name: String,
    pub origin: ModelOrigin,
    pub local_path: Option<PathBuf>,
    pub remote_url: Option<String>,
}

impl ModelEntry {
    /// Only models with a local file can be handed to the inference engine
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.local_path.is_some()
    }
}

/// Catalog of local model files and remotely downloadable models.
///
/// Built once per session by scanning the bundled and download directories.
/// Afterwards the local list only grows through [`ModelRegistry::register`].
#[derive(Debug)]
pub struct ModelRegistry {
    local_paths: Vec<PathBuf>,
    remote: BTreeMap<String, String>,
    extension: String,
    policy: MatchPolicy,
    scan_errors: Vec<ScanError>,
}

impl ModelRegistry {
    /// Create a registry with no local models and the built-in remote catalog
    #[must_use]
    pub fn new(extension: &str, policy: MatchPolicy) -> Self {
        let remote = REMOTE_MODELS
            .iter()
            .map(|m| (m.name.to_string(), m.url.to_string()))
            .collect();

        Self {
            local_paths: Vec::new(),
            remote,
            extension: extension.to_string(),
            policy,
            scan_errors: Vec::new(),
        }
    }

    /// Add or replace a remote catalog entry
    #[must_use]
    pub fn with_remote(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.remote.insert(name.into(), url.into());
        self
    }

    /// Drop every remote entry, including the built-in ones
    #[must_use]
    pub fn without_builtin_remotes(mut self) -> Self {
        self.remote.clear();
        self
    }

    /// Scan bundled and downloaded models.
    ///
    /// Scan failures are never fatal: they are logged and kept in
    /// [`ModelRegistry::scan_errors`], and the registry starts with whatever it found.
    #[must_use]
    pub fn initialize(config: &ModelsConfig, download_dir: &Path) -> Self {
        let mut registry = Self::new(&config.extension, config.match_policy);
        registry
            .remote
            .extend(config.remote.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(bundled_dir) = &config.bundled_dir {
            let bundled = registry.scan_dir(bundled_dir);
            for path in &bundled {
                if let Some(size) = file_size(path) {
                    tracing::debug!("Bundled model {} ({})", path.display(), format_bytes(size));
                }
            }
            registry.local_paths.extend(bundled);
        }

        if let Err(source) = fs::create_dir_all(download_dir) {
            registry.record(ScanError::CreateDir {
                path: download_dir.to_path_buf(),
                source,
            });
        }
        let downloaded = registry.scan_dir(download_dir);
        registry.local_paths.extend(downloaded);

        tracing::info!(
            "Found {} local model(s), {} remote model(s)",
            registry.local_paths.len(),
            registry.remote.len()
        );
        for path in &registry.local_paths {
            tracing::debug!("Local model: {}", path.display());
        }

        registry
    }

    fn scan_dir(&mut self, dir: &Path) -> Vec<PathBuf> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(source) => {
                self.record(ScanError::ReadDir {
                    path: dir.to_path_buf(),
                    source,
                });
                return Vec::new();
            }
        };

        let mut found: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == self.extension)
            })
            .collect();

        // read_dir order is platform dependent
        found.sort();
        found
    }

    fn record(&mut self, error: ScanError) {
        tracing::warn!("{error}");
        self.scan_errors.push(error);
    }

    /// Append a local model path. Not idempotent: the same path may appear twice.
    pub fn register(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        tracing::info!("Registered model {}", path.display());
        self.local_paths.push(path);
    }

    /// Deduplicated union of local model names and remote catalog names
    #[must_use]
    pub fn models(&self) -> BTreeSet<String> {
        self.local_paths
            .iter()
            .filter_map(|p| derive_name(p))
            .chain(self.remote.keys().cloned())
            .collect()
    }

    /// Check whether a model can be used without downloading it
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        let found = self.local_path(name).is_some();
        tracing::debug!("Model {name} exists locally: {found}");
        found
    }

    /// First registered path matching `name`, in insertion order
    #[must_use]
    pub fn local_path(&self, name: &str) -> Option<&Path> {
        self.local_paths
            .iter()
            .find(|p| self.matches(p, name))
            .map(PathBuf::as_path)
    }

    /// Download URL for a remote catalog entry
    #[must_use]
    pub fn remote_url(&self, name: &str) -> Option<&str> {
        self.remote.get(name).map(String::as_str)
    }

    /// Resolve a name to a catalog entry, preferring a local file
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<ModelEntry> {
        let local_path = self.local_path(name).map(Path::to_path_buf);
        let remote_url = self.remote_url(name).map(str::to_string);

        let origin = match (&local_path, &remote_url) {
            (Some(_), _) => ModelOrigin::Local,
            (None, Some(_)) => ModelOrigin::Remote,
            (None, None) => return None,
        };

        Some(ModelEntry {
            name: name.to_string(),
            origin,
            local_path,
            remote_url,
        })
    }

    /// Every catalog name resolved to an entry, sorted by name
    #[must_use]
    pub fn entries(&self) -> Vec<ModelEntry> {
        self.models()
            .iter()
            .filter_map(|name| self.resolve(name))
            .collect()
    }

    /// Closest catalog name within two edits
    #[must_use]
    pub fn suggest(&self, name: &str) -> Option<String> {
        if name.is_empty() {
            return None;
        }

        self.models()
            .into_iter()
            .map(|m| {
                let dist = levenshtein_distance(name, &m);
                (m, dist)
            })
            .min_by_key(|(_, dist)| *dist)
            .filter(|(_, dist)| *dist <= 2)
            .map(|(model_name, _)| model_name)
    }

    #[must_use]
    pub fn local_paths(&self) -> &[PathBuf] {
        &self.local_paths
    }

    #[must_use]
    pub fn scan_errors(&self) -> &[ScanError] {
        &self.scan_errors
    }

    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    #[must_use]
    pub const fn match_policy(&self) -> MatchPolicy {
        self.policy
    }

    fn matches(&self, path: &Path, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }

        match self.policy {
            MatchPolicy::Exact => derive_name(path).as_deref() == Some(name),
            MatchPolicy::Containment => path.to_string_lossy().contains(name),
        }
    }
}

/// Model name for a local path: the last segment without its extension
#[must_use]
pub fn derive_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

/// Size of a file on disk, logging instead of failing
#[must_use]
pub fn file_size(path: &Path) -> Option<u64> {
    match fs::metadata(path) {
        Ok(metadata) => Some(metadata.len()),
        Err(e) => {
            tracing::warn!("Failed to read size of {}: {e}", path.display());
            None
        }
    }
}

/// Calculate Levenshtein distance between two strings
#[allow(clippy::needless_range_loop)]
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let len1 = s1.chars().count();
    let len2 = s2.chars().count();

    if len1 == 0 {
        return len2;
    }
    if len2 == 0 {
        return len1;
    }

    let mut matrix = vec![vec![0; len2 + 1]; len1 + 1];

    for i in 0..=len1 {
        matrix[i][0] = i;
    }
    for j in 0..=len2 {
        matrix[0][j] = j;
    }

    for (i, c1) in s1.chars().enumerate() {
        for (j, c2) in s2.chars().enumerate() {
            let cost = usize::from(c1 != c2);
            matrix[i + 1][j + 1] = (matrix[i][j + 1] + 1)
                .min(matrix[i + 1][j] + 1)
                .min(matrix[i][j] + cost);
        }
    }

    matrix[len1][len2]
}
