//! Core types for plugin discovery
//!
//! Defines the fundamental types used throughout the discovery engine:
//! - Plugin formats and scan candidates
//! - Discovered plugin metadata (records, channel configurations)
//! - Scan outcome classification and error types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Supported plugin formats
///
/// Declared in scan order: the in-process formats come first, the formats
/// that need the isolated scanner process follow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PluginFormat {
    /// Linux Audio Plugins (LV2), probed in-process
    Lv2,
    /// CLAP (CLever Audio Plugin), probed in-process
    Clap,
    /// Legacy Steinberg VST2 format (deprecated but widely installed)
    Vst2,
    /// Steinberg VST3 bundle format
    Vst3,
    /// Apple Audio Unit, identified by a type/subtype/vendor code
    AudioUnit,
}

impl PluginFormat {
    /// All formats, in the order a refresh pass visits them
    pub const ALL: [PluginFormat; 5] = [
        PluginFormat::Lv2,
        PluginFormat::Clap,
        PluginFormat::Vst2,
        PluginFormat::Vst3,
        PluginFormat::AudioUnit,
    ];

    /// Short identifier used in file names and on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginFormat::Lv2 => "LV2",
            PluginFormat::Clap => "CLAP",
            PluginFormat::Vst2 => "VST2",
            PluginFormat::Vst3 => "VST3",
            PluginFormat::AudioUnit => "AU",
        }
    }

    /// Whether this format is probed by the isolated scanner process.
    ///
    /// In-process formats never launch a child; they are probed directly
    /// inside the host, which also makes them the fast startup path.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            PluginFormat::Vst2 | PluginFormat::Vst3 | PluginFormat::AudioUnit
        )
    }

    /// Minimum cache schema version this build still accepts.
    ///
    /// A cache file carrying an older version is treated as absent and the
    /// candidate becomes eligible for a rescan.
    pub fn min_cache_version(&self) -> u32 {
        match self {
            PluginFormat::Vst2 => 1,
            PluginFormat::Vst3 => 2,
            PluginFormat::AudioUnit => 2,
            PluginFormat::Lv2 | PluginFormat::Clap => 1,
        }
    }

    /// Cache schema version written by this build.
    pub fn cache_version(&self) -> u32 {
        match self {
            PluginFormat::Vst2 => 1,
            PluginFormat::Vst3 => 2,
            PluginFormat::AudioUnit => 2,
            PluginFormat::Lv2 | PluginFormat::Clap => 1,
        }
    }
}

impl fmt::Display for PluginFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PluginFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LV2" => Ok(PluginFormat::Lv2),
            "CLAP" => Ok(PluginFormat::Clap),
            "VST2" | "VST" => Ok(PluginFormat::Vst2),
            "VST3" => Ok(PluginFormat::Vst3),
            "AU" | "AUDIOUNIT" => Ok(PluginFormat::AudioUnit),
            other => Err(format!("unknown plugin format: {}", other)),
        }
    }
}

/// One thing that might be a plugin of a given format
///
/// Most formats identify candidates by a filesystem path (a module file or a
/// bundle directory). Audio Units are identified by the component registry's
/// three-part code instead.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Candidate {
    /// Plugin binary or bundle on disk
    Path(PathBuf),
    /// Audio Unit component descriptor (type, subtype, vendor)
    Descriptor {
        ctype: String,
        subtype: String,
        vendor: String,
    },
}

impl Candidate {
    pub fn path(p: impl Into<PathBuf>) -> Self {
        Candidate::Path(p.into())
    }

    /// Stable identity string, used for blacklist lines, cache hashing and
    /// scan log keys.
    pub fn id_string(&self) -> String {
        match self {
            Candidate::Path(p) => p.to_string_lossy().into_owned(),
            Candidate::Descriptor {
                ctype,
                subtype,
                vendor,
            } => format!("{}:{}:{}", ctype, subtype, vendor),
        }
    }

    /// Filesystem path, if this candidate is path-identified
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Candidate::Path(p) => Some(p.as_path()),
            Candidate::Descriptor { .. } => None,
        }
    }

    /// Whether the candidate still exists (descriptors are assumed alive;
    /// only the component registry can say otherwise)
    pub fn exists(&self) -> bool {
        match self {
            Candidate::Path(p) => p.exists(),
            Candidate::Descriptor { .. } => true,
        }
    }

    /// File stem of a path candidate, used as a name of last resort when a
    /// plugin reports an empty or placeholder name
    pub fn file_stem(&self) -> Option<String> {
        self.as_path()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id_string())
    }
}

/// Identity of a discovered plugin: `(format, unique_id)`
///
/// This is the key for the status, tag and stats stores and the unit of
/// deduplication within one discovery pass.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginKey {
    pub format: PluginFormat,
    pub unique_id: String,
}

impl PluginKey {
    pub fn new(format: PluginFormat, unique_id: impl Into<String>) -> Self {
        Self {
            format,
            unique_id: unique_id.into(),
        }
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.format, self.unique_id)
    }
}

/// One audio I/O configuration a plugin supports
///
/// A negative member is a wildcard: the plugin accepts any count there, with
/// `outs == WILDCARD` meaning "as many outputs as inputs".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoConfig {
    pub ins: i32,
    pub outs: i32,
}

impl IoConfig {
    pub const WILDCARD: i32 = -1;

    pub fn new(ins: i32, outs: i32) -> Self {
        Self { ins, outs }
    }

    /// Concrete output count, if one can be determined for this pair
    pub fn resolved_outs(&self) -> Option<i32> {
        if self.outs >= 0 {
            Some(self.outs)
        } else if self.ins >= 0 {
            // "same as inputs" wildcard
            Some(self.ins)
        } else {
            None
        }
    }
}

/// Metadata for one discovered plugin
///
/// Built by a format discoverer from a live probe or a cache file, owned by
/// the manager's per-format list, and rebuilt wholesale on every refresh.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PluginRecord {
    pub format: PluginFormat,
    /// Format-specific stable identifier
    pub unique_id: String,
    pub name: String,
    pub creator: String,
    pub category: String,
    pub version: i32,
    pub n_audio_inputs: i32,
    pub n_audio_outputs: i32,
    pub n_midi_inputs: i32,
    pub n_midi_outputs: i32,
    /// Supported (inputs, outputs) pairs, in the plugin's preference order
    #[serde(default)]
    pub io_configs: Vec<IoConfig>,
    /// Module or bundle path (descriptor string for Audio Units)
    pub path: String,
    /// Display flag: another plugin of the same format shares this name
    #[serde(skip)]
    pub name_ambiguous: bool,
    /// Display flag: another format offers a plugin with this name
    #[serde(skip)]
    pub type_ambiguous: bool,
}

impl PluginRecord {
    pub fn key(&self) -> PluginKey {
        PluginKey::new(self.format, self.unique_id.clone())
    }

    /// Largest output count this plugin can be configured for.
    ///
    /// Used by the UI to disambiguate same-name plugins; falls back to the
    /// fixed output count when no io_configs were reported.
    pub fn max_outputs(&self) -> i32 {
        self.io_configs
            .iter()
            .filter_map(|c| c.resolved_outs())
            .max()
            .unwrap_or(self.n_audio_outputs)
    }
}

impl fmt::Display for PluginRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.format)
    }
}

/// Roll-up classification of the most recent scan attempt for a candidate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanOutcome {
    /// Scanned (or loaded from cache) successfully
    Ok,
    /// Never scanned: no cache file exists yet
    New,
    /// Cache exists but its schema version is no longer accepted
    Updated,
    /// Scan or parse failure; see the message trail
    Error,
    /// On the deny ledger, not scanned
    Blacklisted,
    /// Scanner process exceeded the scan timeout
    TimedOut,
    /// ABI/architecture mismatch
    Incompatible,
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanOutcome::Ok => "OK",
            ScanOutcome::New => "New",
            ScanOutcome::Updated => "Updated",
            ScanOutcome::Error => "Error",
            ScanOutcome::Blacklisted => "Blacklisted",
            ScanOutcome::TimedOut => "Timed Out",
            ScanOutcome::Incompatible => "Incompatible",
        };
        write!(f, "{}", s)
    }
}

/// Discovery engine error types
#[derive(Debug)]
pub enum ScanError {
    /// IO error
    Io(std::io::Error),
    /// Serialization error
    Serde(String),
    /// The probe rejected or failed to read the candidate
    Probe(String),
    /// The isolated scanner process failed
    Scanner(String),
    /// The scanner process exceeded the scan timeout
    TimedOut,
    /// The scan was cancelled by the operator
    Cancelled,
    /// Candidate is on the deny ledger
    Blacklisted,
    /// Cache file exists but cannot be trusted
    CacheInvalid(String),
    /// Configured scanner binary does not exist
    MissingScanner(PathBuf),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Io(e) => write!(f, "IO error: {}", e),
            ScanError::Serde(msg) => write!(f, "Serialization error: {}", msg),
            ScanError::Probe(msg) => write!(f, "Probe failed: {}", msg),
            ScanError::Scanner(msg) => write!(f, "Scanner process failed: {}", msg),
            ScanError::TimedOut => write!(f, "Scan timed out"),
            ScanError::Cancelled => write!(f, "Scan was cancelled"),
            ScanError::Blacklisted => write!(f, "Candidate is blacklisted"),
            ScanError::CacheInvalid(msg) => write!(f, "Cache file rejected: {}", msg),
            ScanError::MissingScanner(p) => {
                write!(f, "Scanner binary not found: {}", p.display())
            }
        }
    }
}

impl std::error::Error for ScanError {}

impl From<std::io::Error> for ScanError {
    fn from(e: std::io::Error) -> Self {
        ScanError::Io(e)
    }
}

/// Result type for discovery operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Seconds since the UNIX epoch
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_display_roundtrip() {
        for f in PluginFormat::ALL {
            assert_eq!(f.as_str().parse::<PluginFormat>().unwrap(), f);
        }
        assert_eq!("vst".parse::<PluginFormat>().unwrap(), PluginFormat::Vst2);
        assert!("GME".parse::<PluginFormat>().is_err());
    }

    #[test]
    fn test_candidate_id_string() {
        let c = Candidate::path("/usr/lib/vst/comp.so");
        assert_eq!(c.id_string(), "/usr/lib/vst/comp.so");
        assert_eq!(c.file_stem().unwrap(), "comp");

        let d = Candidate::Descriptor {
            ctype: "aufx".to_string(),
            subtype: "dely".to_string(),
            vendor: "Appl".to_string(),
        };
        assert_eq!(d.id_string(), "aufx:dely:Appl");
        assert!(d.exists());
        assert!(d.file_stem().is_none());
    }

    #[test]
    fn test_max_outputs_wildcards() {
        let mut rec = PluginRecord {
            format: PluginFormat::AudioUnit,
            unique_id: "aufx:dely:Appl".to_string(),
            name: "Delay".to_string(),
            creator: "Apple".to_string(),
            category: "Effect".to_string(),
            version: 1,
            n_audio_inputs: 2,
            n_audio_outputs: 2,
            n_midi_inputs: 0,
            n_midi_outputs: 0,
            io_configs: vec![IoConfig::new(2, 2), IoConfig::new(8, IoConfig::WILDCARD)],
            path: "aufx:dely:Appl".to_string(),
            name_ambiguous: false,
            type_ambiguous: false,
        };

        // wildcard outs resolve to the paired input count
        assert_eq!(rec.max_outputs(), 8);

        // without io configs, fall back to the fixed count
        rec.io_configs.clear();
        assert_eq!(rec.max_outputs(), 2);

        // fully wildcard pairs contribute nothing
        rec.io_configs = vec![IoConfig::new(IoConfig::WILDCARD, IoConfig::WILDCARD)];
        assert_eq!(rec.max_outputs(), 2);
    }
}
