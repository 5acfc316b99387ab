//! Plugin status store
//!
//! User-facing status per plugin: favorite, hidden, or normal. `Concealed`
//! is assigned by the engine when a newer format supersedes a plugin; it is
//! held in memory like the others but never written to disk, so toggling
//! the conceal policy can always recompute it from scratch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::warn;

use crate::config::ensure_dir;
use crate::types::{PluginKey, ScanError, ScanResult};

/// Store file name inside the config directory
const STATUS_FILE: &str = "plugin_statuses.json";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginStatusKind {
    #[default]
    Normal,
    Favorite,
    Hidden,
    /// Superseded by a newer-format plugin of the same name; never persisted
    Concealed,
}

impl fmt::Display for PluginStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PluginStatusKind::Normal => "Normal",
            PluginStatusKind::Favorite => "Favorite",
            PluginStatusKind::Hidden => "Hidden",
            PluginStatusKind::Concealed => "Concealed",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PluginStatusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(PluginStatusKind::Normal),
            "favorite" => Ok(PluginStatusKind::Favorite),
            "hidden" => Ok(PluginStatusKind::Hidden),
            other => Err(format!("unknown plugin status: {}", other)),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StatusRecord {
    #[serde(flatten)]
    key: PluginKey,
    status: PluginStatusKind,
}

/// Status map keyed by `(format, unique_id)`
#[derive(Debug, Default)]
pub struct StatusStore {
    statuses: HashMap<PluginKey, PluginStatusKind>,
    path: PathBuf,
}

impl StatusStore {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            statuses: HashMap::new(),
            path: config_dir.join(STATUS_FILE),
        }
    }

    pub fn load(&mut self) {
        let list: Vec<StatusRecord> = match fs::read_to_string(&self.path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(list) => list,
                Err(e) => {
                    warn!("ignoring malformed status file {}: {}", self.path.display(), e);
                    return;
                }
            },
            Err(_) => return,
        };
        for rec in list {
            // a hand-edited file could smuggle in states that are not meant
            // to be persisted
            if matches!(
                rec.status,
                PluginStatusKind::Favorite | PluginStatusKind::Hidden
            ) {
                self.statuses.insert(rec.key, rec.status);
            }
        }
    }

    /// Persist all non-Normal, non-Concealed statuses
    pub fn save(&self) -> ScanResult<()> {
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent);
        }
        let mut list: Vec<StatusRecord> = self
            .statuses
            .iter()
            .filter(|(_, s)| {
                matches!(s, PluginStatusKind::Favorite | PluginStatusKind::Hidden)
            })
            .map(|(k, s)| StatusRecord {
                key: k.clone(),
                status: *s,
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

    pub fn status(&self, key: &PluginKey) -> PluginStatusKind {
        self.statuses.get(key).copied().unwrap_or_default()
    }

    /// Set a status; `Normal` removes the entry
    pub fn set_status(&mut self, key: PluginKey, status: PluginStatusKind) {
        if status == PluginStatusKind::Normal {
            self.statuses.remove(&key);
        } else {
            self.statuses.insert(key, status);
        }
    }

    /// Keys currently marked with a given status
    pub fn keys_with(&self, status: PluginStatusKind) -> Vec<PluginKey> {
        self.statuses
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(k, _)| k.clone())
            .collect()
    }
}
