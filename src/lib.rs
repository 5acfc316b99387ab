//! # Polaron - Plugin Discovery Engine
//!
//! Polaron enumerates every native audio plugin visible to a host across
//! several incompatible binary formats (VST2, VST3, Audio Units, LV2, CLAP),
//! extracts metadata without ever letting a malformed or crashing plugin
//! take the host process down, and persists what it finds so subsequent
//! launches are fast.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  PluginManager: refresh, merge, ambiguity, status/tags/stats│
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  FormatDiscoverer (×5): walk paths, drive candidates through│
//! │  Blacklist → Cache → Scan                                   │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  polaron-scanner child process: probe one candidate, write  │
//! │  one cache file, exit                                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The scan pipeline is crash-safe by construction: a candidate is added to
//! its format's blacklist *before* the scanner child is spawned and removed
//! only after the child exited cleanly *and* a valid cache file was
//! confirmed on disk. If anything dies mid-scan, the next launch skips the
//! culprit instead of repeating the crash.
//!
//! ## Usage
//!
//! ```no_run
//! use polaron::{PluginFormat, PluginManager, Settings};
//!
//! let manager = PluginManager::new(Settings::load_default());
//! manager.refresh(true); // cache-only: fast, no scanner processes
//! for plugin in manager.plugins(PluginFormat::Vst3) {
//!     println!("{} by {}", plugin.name, plugin.creator);
//! }
//! ```

pub mod blacklist;
pub mod cache;
pub mod config;
pub mod discoverer;
pub mod manager;
pub mod paths;
pub mod probe;
pub mod process;
pub mod scan_log;
pub mod stats;
pub mod status;
pub mod tags;
pub mod types;

// Re-exports for convenience
pub use blacklist::Blacklist;
pub use cache::{CacheFile, CacheStore};
pub use config::Settings;
pub use discoverer::{
    AuDiscoverer, ClapDiscoverer, FormatDiscoverer, Lv2Discoverer, Vst2Discoverer, Vst3Discoverer,
};
pub use manager::{PluginManager, ScanEvent};
pub use probe::{FileProbe, MockProbe, PluginProbe};
pub use process::CancelControl;
pub use scan_log::{ScanLog, ScanLogEntry};
pub use stats::PluginStats;
pub use status::PluginStatusKind;
pub use tags::{PluginTag, TagType};
pub use types::{
    Candidate, IoConfig, PluginFormat, PluginKey, PluginRecord, ScanError, ScanOutcome, ScanResult,
};
