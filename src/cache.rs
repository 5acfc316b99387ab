//! Plugin metadata cache
//!
//! One JSON cache file per scanned candidate, at a location derived from the
//! candidate's identity hash. A cache file is only trusted when the stored
//! identity matches the candidate, the ABI tag matches the running process,
//! the schema version is still accepted for the format, and the plugin
//! binary has not been modified since the cache was written. Anything else
//! is treated as "no cache" and forces rescan eligibility.
//!
//! Writes go through a temp file and rename, so a reader never observes a
//! half-written cache.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use crate::config::ensure_dir;
use crate::types::{Candidate, PluginFormat, PluginRecord, ScanError, ScanResult};

/// ABI tag of the running process
pub fn current_arch() -> String {
    format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}

/// On-disk cache record for one candidate
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheFile {
    /// Identity string of the scanned candidate
    pub path: String,
    /// ABI tag of the process that produced this cache
    pub arch: String,
    /// Cache schema version
    pub version: u32,
    /// Plugins found in the candidate (several for shell/batch modules)
    pub plugins: Vec<PluginRecord>,
}

/// Why a cache lookup did not produce a usable file
#[derive(Debug)]
pub enum CacheCheck {
    /// Cache is present, matching and current
    Valid(CacheFile),
    /// No cache file exists for this candidate
    Missing,
    /// Cache exists but its schema version is below the format's minimum
    StaleVersion,
    /// Cache was produced by a different ABI
    ArchMismatch,
    /// Cache rejected for another reason (identity mismatch, unparseable,
    /// binary newer than cache)
    Rejected(String),
}

/// Cache file store rooted in the cache directory
#[derive(Clone, Debug)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            root: cache_dir.join("cache"),
        }
    }

    /// Deterministic cache file location for a candidate
    pub fn cache_path_for(&self, format: PluginFormat, candidate: &Candidate) -> PathBuf {
        let digest = Sha256::digest(candidate.id_string().as_bytes());
        let mut hex = String::with_capacity(32);
        for byte in &digest[..16] {
            let _ = write!(hex, "{:02x}", byte);
        }
        self.root
            .join(format.as_str())
            .join(format!("{}.json", hex))
    }

    /// Full validity check, reporting why a cache cannot be used
    pub fn check(&self, format: PluginFormat, candidate: &Candidate) -> CacheCheck {
        let path = self.cache_path_for(format, candidate);
        if !path.is_file() {
            return CacheCheck::Missing;
        }

        let cache: CacheFile = match fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
        {
            Ok(c) => c,
            Err(e) => return CacheCheck::Rejected(format!("unreadable cache file: {}", e)),
        };

        if cache.path != candidate.id_string() {
            return CacheCheck::Rejected(format!(
                "cache holds metadata for {}, not {}",
                cache.path, candidate
            ));
        }
        if cache.arch != current_arch() {
            return CacheCheck::ArchMismatch;
        }
        if cache.version < format.min_cache_version() {
            return CacheCheck::StaleVersion;
        }
        if let Some(candidate_path) = candidate.as_path() {
            if binary_newer_than_cache(candidate_path, &path) {
                return CacheCheck::Rejected("plugin binary is newer than its cache".to_string());
            }
        }

        CacheCheck::Valid(cache)
    }

    /// Location of the trusted cache file for a candidate, if one exists
    pub fn valid_cache_for(&self, format: PluginFormat, candidate: &Candidate) -> Option<PathBuf> {
        match self.check(format, candidate) {
            CacheCheck::Valid(_) => Some(self.cache_path_for(format, candidate)),
            _ => None,
        }
    }

    /// Read and validate the cache for a candidate
    pub fn read(&self, format: PluginFormat, candidate: &Candidate) -> ScanResult<CacheFile> {
        match self.check(format, candidate) {
            CacheCheck::Valid(cache) => Ok(cache),
            CacheCheck::Missing => Err(ScanError::CacheInvalid("no cache file".to_string())),
            CacheCheck::StaleVersion => {
                Err(ScanError::CacheInvalid("stale schema version".to_string()))
            }
            CacheCheck::ArchMismatch => Err(ScanError::CacheInvalid("ABI mismatch".to_string())),
            CacheCheck::Rejected(reason) => Err(ScanError::CacheInvalid(reason)),
        }
    }

    /// Write a cache file for a candidate. The write is atomic: a temp file
    /// in the target directory is renamed into place.
    pub fn write(
        &self,
        format: PluginFormat,
        candidate: &Candidate,
        plugins: &[PluginRecord],
    ) -> ScanResult<PathBuf> {
        let cache = CacheFile {
            path: candidate.id_string(),
            arch: current_arch(),
            version: format.cache_version(),
            plugins: plugins.to_vec(),
        };

        let path = self.cache_path_for(format, candidate);
        if let Some(parent) = path.parent() {
            ensure_dir(parent);
        }

        let text = serde_json::to_string_pretty(&cache).map_err(|e| ScanError::Serde(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &path)?;
        debug!("wrote cache file {}", path.display());
        Ok(path)
    }

    /// Delete a candidate's cache file, if present
    pub fn remove(&self, format: PluginFormat, candidate: &Candidate) -> ScanResult<()> {
        let path = self.cache_path_for(format, candidate);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Drop every cache file for a format (explicit user command)
    pub fn clear_format(&self, format: PluginFormat) -> ScanResult<()> {
        let dir = self.root.join(format.as_str());
        if dir.is_dir() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

fn binary_newer_than_cache(binary: &Path, cache: &Path) -> bool {
    fn mtime(p: &Path) -> Option<SystemTime> {
        fs::metadata(p).and_then(|m| m.modified()).ok()
    }
    match (mtime(binary), mtime(cache)) {
        (Some(b), Some(c)) => b > c,
        // a candidate that vanished or an unreadable mtime cannot validate
        // the cache
        _ => true,
    }
}
