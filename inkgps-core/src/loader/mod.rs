//! Track file loaders, dispatched by file extension.
//!
//! A `LoaderRegistry` maps lowercase extensions to `Loader` implementations.
//! Single-file loads of an unregistered extension fail with
//! `ExtensionNotSupported`; folder loads skip such files with a warning.

pub mod gpx;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::map::Waypoint;
use crate::track::Track;
use crate::types::{GpsError, Result};

pub use self::gpx::GpxLoader;

/// Everything read from one file, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedFile {
    pub source: PathBuf,
    pub waypoints: Vec<Waypoint>,
    pub tracks: Vec<Track>,
}

impl LoadedFile {
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty() && self.tracks.is_empty()
    }
}

/// A file format that yields points of interest and named tracks.
pub trait Loader: Send + Sync {
    fn load(&self, path: &Path) -> Result<LoadedFile>;
}

pub struct LoaderRegistry {
    loaders: HashMap<String, Box<dyn Loader>>,
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        LoaderRegistry::with_defaults()
    }
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("extensions", &self.extensions())
            .finish()
    }
}

impl LoaderRegistry {
    /// Registry without any formats.
    pub fn empty() -> Self {
        LoaderRegistry {
            loaders: HashMap::new(),
        }
    }

    /// Registry with every built-in format.
    pub fn with_defaults() -> Self {
        let mut registry = LoaderRegistry::empty();
        registry.register("gpx", GpxLoader);
        registry
    }

    /// Register `loader` for `extension` (without the dot, any case).
    /// Replaces an earlier loader for the same extension.
    pub fn register(&mut self, extension: &str, loader: impl Loader + 'static) {
        let key = extension.trim_start_matches('.').to_ascii_lowercase();
        self.loaders.insert(key, Box::new(loader));
    }

    /// Registered extensions, sorted.
    pub fn extensions(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self.loaders.keys().map(String::as_str).collect();
        exts.sort_unstable();
        exts
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.loader_for(path).is_ok()
    }

    fn loader_for(&self, path: &Path) -> Result<&dyn Loader> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        self.loaders
            .get(&extension)
            .map(|l| l.as_ref())
            .ok_or_else(|| GpsError::ExtensionNotSupported {
                extension,
                path: path.display().to_string(),
            })
    }

    /// Load a single file.
    pub fn load(&self, path: &Path) -> Result<LoadedFile> {
        let loader = self.loader_for(path)?;
        let loaded = loader.load(path)?;
        debug!(
            path = %path.display(),
            waypoints = loaded.waypoints.len(),
            tracks = loaded.tracks.len(),
            "Loaded track file"
        );
        Ok(loaded)
    }

    /// Load every supported file directly inside `dir`, in file name order.
    pub fn load_folder(&self, dir: &Path) -> Result<Vec<LoadedFile>> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut files = Vec::new();
        for path in paths {
            match self.load(&path) {
                Ok(loaded) => files.push(loaded),
                Err(GpsError::ExtensionNotSupported { .. }) => {
                    warn!(path = %path.display(), "Skipping file, format not supported");
                }
                Err(e) => return Err(e),
            }
        }
        info!(dir = %dir.display(), files = files.len(), "Loaded track folder");
        Ok(files)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
