//! Scan log
//!
//! One entry per `(format, candidate)` recording the outcome of the most
//! recent scan attempt: a timestamped message trail plus a roll-up result.
//! The log is kept regardless of whether the scan succeeded, so a problem
//! ledger ("which plugins failed, and why") survives across launches.
//!
//! Entries are created lazily the first time a candidate is touched and
//! reused for repeated scans within one process lifetime. The whole log is
//! persisted once at the end of every full refresh.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::ensure_dir;
use crate::types::{unix_now, Candidate, PluginFormat, ScanOutcome, ScanResult};

/// Log file name inside the cache directory
const SCAN_LOG_FILE: &str = "scan_log.json";

/// One timestamped message in an entry's trail
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanLogMessage {
    /// UNIX timestamp (seconds)
    pub time: u64,
    pub kind: ScanOutcome,
    pub text: String,
}

/// Outcome record for one candidate
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanLogEntry {
    pub format: PluginFormat,
    pub candidate: Candidate,
    pub result: ScanOutcome,
    pub messages: Vec<ScanLogMessage>,
}

impl ScanLogEntry {
    fn new(format: PluginFormat, candidate: Candidate) -> Self {
        Self {
            format,
            candidate,
            result: ScanOutcome::New,
            messages: Vec::new(),
        }
    }

    /// Append a message and update the roll-up result
    pub fn msg(&mut self, kind: ScanOutcome, text: impl Into<String>) {
        self.result = kind;
        self.messages.push(ScanLogMessage {
            time: unix_now(),
            kind,
            text: text.into(),
        });
    }

    /// Append a message without changing the roll-up result
    pub fn note(&mut self, text: impl Into<String>) {
        self.messages.push(ScanLogMessage {
            time: unix_now(),
            kind: self.result,
            text: text.into(),
        });
    }

    /// Clear the message trail, preserving identity
    pub fn reset(&mut self) {
        self.messages.clear();
        self.result = ScanOutcome::New;
    }
}

/// Aggregated scan log for all formats
#[derive(Debug, Default)]
pub struct ScanLog {
    entries: HashMap<(PluginFormat, String), ScanLogEntry>,
    path: PathBuf,
}

impl ScanLog {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            entries: HashMap::new(),
            path: cache_dir.join(SCAN_LOG_FILE),
        }
    }

    /// Load persisted entries, merging into any already held in memory.
    /// In-memory entries win: they are newer than whatever is on disk.
    pub fn load(&mut self) {
        let list: Vec<ScanLogEntry> = match fs::read_to_string(&self.path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(list) => list,
                Err(e) => {
                    warn!("ignoring malformed scan log {}: {}", self.path.display(), e);
                    return;
                }
            },
            Err(_) => return,
        };

        for entry in list {
            let key = (entry.format, entry.candidate.id_string());
            self.entries.entry(key).or_insert(entry);
        }
        debug!("scan log: {} entries", self.entries.len());
    }

    /// Persist all entries
    pub fn save(&self) -> ScanResult<()> {
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent);
        }
        let mut list: Vec<&ScanLogEntry> = self.entries.values().collect();
        list.sort_by(|a, b| {
            (a.format, a.candidate.id_string()).cmp(&(b.format, b.candidate.id_string()))
        });
        let text = serde_json::to_string_pretty(&list)
            .map_err(|e| crate::types::ScanError::Serde(e.to_string()))?;
        fs::write(&self.path, text)?;
        Ok(())
    }

    /// Entry for a candidate, created lazily on first touch
    pub fn entry(&mut self, format: PluginFormat, candidate: &Candidate) -> &mut ScanLogEntry {
        self.entries
            .entry((format, candidate.id_string()))
            .or_insert_with(|| ScanLogEntry::new(format, candidate.clone()))
    }

    pub fn get(&self, format: PluginFormat, id: &str) -> Option<&ScanLogEntry> {
        self.entries.get(&(format, id.to_string()))
    }

    pub fn entries(&self) -> impl Iterator<Item = &ScanLogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose last scan did not succeed
    pub fn problems(&self) -> Vec<&ScanLogEntry> {
        self.entries
            .values()
            .filter(|e| e.result != ScanOutcome::Ok)
            .collect()
    }

    /// Drop entries whose candidate no longer exists on disk
    pub fn clear_stale(&mut self) {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.candidate.exists());
        debug!("scan log: pruned {} stale entries", before - self.entries.len());
    }
}
