//! Engine configuration
//!
//! Persisted settings for the discovery engine. Stored as TOML in the user
//! config directory; the cache directory (cache files, blacklists, scan log)
//! lives separately under the user cache directory so it can be wiped without
//! losing configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::types::{ScanError, ScanResult};

/// Settings file name inside the config directory
const SETTINGS_FILE: &str = "polaron.toml";

/// Discovery engine settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Version for future compatibility
    pub version: u32,

    /// Scan timeout in deciseconds; zero or negative disables the timeout
    pub scan_timeout: i64,

    /// Emit one log line per candidate while scanning
    pub verbose_plugin_scan: bool,

    /// Hide a VST2 plugin when a VST3 plugin by the same creator and name
    /// was also discovered
    pub conceal_vst2_if_vst3_exists: bool,

    /// Allow automatic Audio Unit discovery. Cleared on disk while an AU
    /// scan runs, so a crash mid-scan leaves discovery off.
    pub discover_audio_units: bool,

    /// External scanner binary; when unset, out-of-process formats fall back
    /// to the in-process probe (degraded: no timeout enforcement)
    pub scanner_bin_path: Option<PathBuf>,

    /// Search paths per format; when set they replace the platform defaults
    pub vst2_paths: Vec<PathBuf>,
    pub vst3_paths: Vec<PathBuf>,
    pub lv2_paths: Vec<PathBuf>,
    pub clap_paths: Vec<PathBuf>,

    /// Where cache files, blacklists and the scan log live
    #[serde(skip)]
    pub cache_dir: PathBuf,

    /// Where the settings file and the status/tags/stats stores live
    #[serde(skip)]
    pub config_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            scan_timeout: 150,
            verbose_plugin_scan: false,
            conceal_vst2_if_vst3_exists: true,
            discover_audio_units: true,
            scanner_bin_path: None,
            vst2_paths: Vec::new(),
            vst3_paths: Vec::new(),
            lv2_paths: Vec::new(),
            clap_paths: Vec::new(),
            cache_dir: default_cache_dir(),
            config_dir: default_config_dir(),
        }
    }
}

impl Settings {
    /// Current settings version
    pub const CURRENT_VERSION: u32 = 1;

    /// Settings rooted at explicit directories (tests, portable installs)
    pub fn with_dirs(config_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// Load settings from `<config_dir>/polaron.toml`, falling back to
    /// defaults when the file is missing or unreadable
    pub fn load(config_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        let config_dir = config_dir.into();
        let cache_dir = cache_dir.into();
        let path = config_dir.join(SETTINGS_FILE);

        let mut settings = match fs::read_to_string(&path) {
            Ok(text) => match toml::from_str::<Settings>(&text) {
                Ok(s) => s,
                Err(e) => {
                    warn!("ignoring malformed settings file {}: {}", path.display(), e);
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        };

        settings.config_dir = config_dir;
        settings.cache_dir = cache_dir;
        settings
    }

    /// Load settings from the default user directories
    pub fn load_default() -> Self {
        Self::load(default_config_dir(), default_cache_dir())
    }

    /// Write settings to `<config_dir>/polaron.toml`
    pub fn save(&self) -> ScanResult<()> {
        fs::create_dir_all(&self.config_dir)?;
        let text = toml::to_string_pretty(self).map_err(|e| ScanError::Serde(e.to_string()))?;
        fs::write(self.config_dir.join(SETTINGS_FILE), text)?;
        Ok(())
    }

    /// Whether the scan timeout is disabled outright
    pub fn no_timeout(&self) -> bool {
        self.scan_timeout <= 0
    }

    /// Path of a store file inside the config directory
    pub fn config_file(&self, name: &str) -> PathBuf {
        self.config_dir.join(name)
    }

    /// Path of a store file or directory inside the cache directory
    pub fn cache_file(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("polaron")
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("polaron")
}

/// Create a directory if needed, warning instead of failing; scanning can
/// proceed without a writable store, just without persistence
pub(crate) fn ensure_dir(dir: &Path) {
    if !dir.is_dir() {
        if let Err(e) = fs::create_dir_all(dir) {
            warn!("cannot create directory {}: {}", dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_settings_roundtrip() {
        let dir = tempdir().unwrap();
        let mut settings = Settings::with_dirs(dir.path(), dir.path().join("cache"));
        settings.scan_timeout = 42;
        settings.vst2_paths.push(PathBuf::from("/opt/vst"));
        settings.save().unwrap();

        let loaded = Settings::load(dir.path(), dir.path().join("cache"));
        assert_eq!(loaded.scan_timeout, 42);
        assert_eq!(loaded.vst2_paths, vec![PathBuf::from("/opt/vst")]);
        assert_eq!(loaded.config_dir, dir.path());
    }

    #[test]
    fn test_malformed_settings_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "not toml [").unwrap();

        let loaded = Settings::load(dir.path(), dir.path());
        assert_eq!(loaded.scan_timeout, Settings::default().scan_timeout);
    }

    #[test]
    fn test_no_timeout() {
        let mut s = Settings::default();
        assert!(!s.no_timeout());
        s.scan_timeout = 0;
        assert!(s.no_timeout());
        s.scan_timeout = -1;
        assert!(s.no_timeout());
    }
}
