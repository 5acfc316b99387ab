//! Plugin usage statistics
//!
//! Last-used timestamp and use count per plugin, bumped whenever a
//! collaborator instantiates a plugin. Loading prunes records that have
//! aged out relative to the rest of the corpus, so the file stays bounded
//! without dropping actively used plugins.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::ensure_dir;
use crate::types::{unix_now, PluginKey, ScanError, ScanResult};

/// Store file name inside the config directory
const STATS_FILE: &str = "plugin_stats.json";

const SECS_PER_DAY: u64 = 86_400;

/// Usage record for one plugin
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct PluginStats {
    /// UNIX timestamp of the most recent instantiation
    pub last_used: u64,
    pub use_count: u64,
}

#[derive(Serialize, Deserialize)]
struct StatsRecord {
    #[serde(flatten)]
    key: PluginKey,
    #[serde(flatten)]
    stats: PluginStats,
}

/// Usage map keyed by `(format, unique_id)`
#[derive(Debug, Default)]
pub struct StatsStore {
    stats: HashMap<PluginKey, PluginStats>,
    path: PathBuf,
}

impl StatsStore {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            stats: HashMap::new(),
            path: config_dir.join(STATS_FILE),
        }
    }

    /// Load persisted records, pruning aged-out ones
    pub fn load(&mut self) {
        let list: Vec<StatsRecord> = match fs::read_to_string(&self.path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(list) => list,
                Err(e) => {
                    warn!("ignoring malformed stats file {}: {}", self.path.display(), e);
                    return;
                }
            },
            Err(_) => return,
        };
        for rec in list {
            self.stats.insert(rec.key, rec.stats);
        }
        self.prune(unix_now());
    }

    pub fn save(&self) -> ScanResult<()> {
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent);
        }
        let mut list: Vec<StatsRecord> = self
            .stats
            .iter()
            .map(|(k, s)| StatsRecord {
                key: k.clone(),
                stats: *s,
            })
            .collect();
        list.sort_by(|a, b| {
            (a.key.format, &a.key.unique_id).cmp(&(b.key.format, &b.key.unique_id))
        });
        let text =
            serde_json::to_string_pretty(&list).map_err(|e| ScanError::Serde(e.to_string()))?;
        fs::write(&self.path, text)?;
        Ok(())
    }

    pub fn stats(&self, key: &PluginKey) -> Option<PluginStats> {
        self.stats.get(key).copied()
    }

    /// Record one instantiation
    pub fn bump(&mut self, key: PluginKey) {
        let entry = self.stats.entry(key).or_default();
        entry.last_used = unix_now();
        entry.use_count += 1;
    }

    /// Drop records that are both old and rarely used.
    ///
    /// A record goes when it is older than 30 days with a use count below
    /// half the corpus average, or older than 7 days with a use count below
    /// two. Actively used plugins are never dropped regardless of age.
    pub fn prune(&mut self, now: u64) {
        if self.stats.is_empty() {
            return;
        }
        let avg_use: f64 = self.stats.values().map(|s| s.use_count as f64).sum::<f64>()
            / self.stats.len() as f64;

        let before = self.stats.len();
        self.stats.retain(|_, s| {
            let age = now.saturating_sub(s.last_used);
            let old_and_rare =
                age > 30 * SECS_PER_DAY && (s.use_count as f64) < avg_use / 2.0;
            let stale_and_unused = age > 7 * SECS_PER_DAY && s.use_count < 2;
            !(old_and_rare || stale_and_unused)
        });
        if before != self.stats.len() {
            debug!("stats: pruned {} records", before - self.stats.len());
        }
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PluginFormat;
    use tempfile::tempdir;

    fn key(id: &str) -> PluginKey {
        PluginKey::new(PluginFormat::Lv2, id)
    }

    #[test]
    fn test_bump_accumulates() {
        let dir = tempdir().unwrap();
        let mut store = StatsStore::new(dir.path());
        store.bump(key("x"));
        store.bump(key("x"));
        let s = store.stats(&key("x")).unwrap();
        assert_eq!(s.use_count, 2);
        assert!(s.last_used > 0);
    }

    #[test]
    fn test_prune_drops_old_rarely_used() {
        let dir = tempdir().unwrap();
        let mut store = StatsStore::new(dir.path());
        let now = 100 * SECS_PER_DAY;

        // heavily used, recent
        store.stats.insert(
            key("hot"),
            PluginStats {
                last_used: now - SECS_PER_DAY,
                use_count: 100,
            },
        );
        // old but used enough to stay above half the average
        store.stats.insert(
            key("steady"),
            PluginStats {
                last_used: now - 40 * SECS_PER_DAY,
                use_count: 60,
            },
        );
        // old and far below half the average (avg = 41)
        store.stats.insert(
            key("dusty"),
            PluginStats {
                last_used: now - 40 * SECS_PER_DAY,
                use_count: 3,
            },
        );
        // stale and essentially unused
        store.stats.insert(
            key("once"),
            PluginStats {
                last_used: now - 8 * SECS_PER_DAY,
                use_count: 1,
            },
        );

        store.prune(now);
        assert!(store.stats(&key("hot")).is_some());
        assert!(store.stats(&key("steady")).is_some());
        assert!(store.stats(&key("dusty")).is_none());
        assert!(store.stats(&key("once")).is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut store = StatsStore::new(dir.path());
        store.bump(key("x"));
        store.save().unwrap();

        let mut reloaded = StatsStore::new(dir.path());
        reloaded.load();
        assert_eq!(reloaded.stats(&key("x")).unwrap().use_count, 1);
    }
}
