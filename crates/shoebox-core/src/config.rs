use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

const DEFAULT_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "heic", "heif", "webp", "dng", "cr2",
    "cr3", "nef", "arw", "orf", "rw2", "raf", "mp4", "mov", "m4v", "avi", "mts", "m2ts", "3gp",
    "mkv",
];

/// Per-library settings. Every `Library` owns its own copy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Extensions admitted by staging, without the leading dot. Compared case-insensitively.
    pub allowed_extensions: BTreeSet<String>,
    /// Glob patterns skipped entirely while listing an import folder.
    pub ignore_patterns: Vec<String>,
    pub propagate_provenance: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            ignore_patterns: Vec::new(),
            propagate_provenance: true,
        }
    }
}

impl LibraryConfig {
    /// Replace the allowed set. Leading dots and case are normalized away.
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = extensions
            .into_iter()
            .map(|e| normalize_extension(e.as_ref()))
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn is_allowed(&self, path: &Path) -> bool {
        match path.extension() {
            Some(ext) => self
                .allowed_extensions
                .contains(&normalize_extension(&ext.to_string_lossy())),
            None => false,
        }
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// Settings for the command-line front end.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub library_root: String,
    /// argv of an external metadata extractor; the file path is appended as the last argument.
    #[serde(default)]
    pub metadata_command: Option<Vec<String>>,
    #[serde(default)]
    pub library: LibraryConfig,
}

/// Load `Shoebox.toml` (optional) overlaid by `SHOEBOX_*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .set_default("library_root", ".")?
        .add_source(ConfigFile::with_name("Shoebox").required(false))
        .add_source(
            Environment::with_prefix("SHOEBOX")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}
