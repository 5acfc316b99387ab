//! Plugin tag store
//!
//! Free-form lowercase tags per plugin, with a recorded origin. Origins form
//! a priority ladder: metadata reported by the plugin itself < the factory
//! tag file shipped with the application < the user's tag file < a live edit
//! in the GUI. A write only replaces the stored tags when its origin is at
//! least as strong, so a user's own tags survive rescans.
//!
//! A shadow copy of the strongest non-user tags is kept so that reverting a
//! user edit can offer the factory default again.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::ensure_dir;
use crate::types::{PluginKey, ScanError, ScanResult};

/// User tag file name inside the config directory
const TAGS_FILE: &str = "plugin_tags.json";

/// Factory-default shadow file, kept separately so user edits never
/// overwrite the value a revert would restore
const FACTORY_TAGS_FILE: &str = "plugin_factory_tags.json";

/// Tag origin, in ascending priority
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TagType {
    /// Derived from the plugin's own metadata (category etc.)
    FromPlug,
    /// From the factory tag file shipped with the application
    FromFactoryFile,
    /// From the user's persisted tag file
    FromUserFile,
    /// Set interactively in the GUI
    FromGui,
}

impl TagType {
    /// Whether tags of this origin belong in the user's tag file
    fn is_user(&self) -> bool {
        matches!(self, TagType::FromUserFile | TagType::FromGui)
    }
}

/// Tags for one plugin
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PluginTag {
    /// Space-separated lowercase tokens
    pub tags: String,
    pub tagtype: TagType,
}

#[derive(Serialize, Deserialize)]
struct TagRecord {
    #[serde(flatten)]
    key: PluginKey,
    tags: String,
}

/// Normalize a tag string: lowercase tokens, single spaces, stable order,
/// duplicates dropped
pub fn sanitize_tags(tags: &str) -> String {
    let mut seen = Vec::new();
    for token in tags.split_whitespace() {
        let token = token.to_lowercase();
        if !seen.contains(&token) {
            seen.push(token);
        }
    }
    seen.join(" ")
}

/// Tag map keyed by `(format, unique_id)`
#[derive(Debug, Default)]
pub struct TagStore {
    tags: HashMap<PluginKey, PluginTag>,
    /// Factory defaults, shadowing whatever the user overrode
    ftags: HashMap<PluginKey, String>,
    path: PathBuf,
    factory_path: PathBuf,
}

impl TagStore {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            tags: HashMap::new(),
            ftags: HashMap::new(),
            path: config_dir.join(TAGS_FILE),
            factory_path: config_dir.join(FACTORY_TAGS_FILE),
        }
    }

    fn read_records(path: &Path) -> Vec<TagRecord> {
        match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(list) => list,
                Err(e) => {
                    warn!("ignoring malformed tag file {}: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        }
    }

    fn write_records(path: &Path, mut list: Vec<TagRecord>) -> ScanResult<()> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent);
        }
        list.sort_by(|a, b| {
            (a.key.format, &a.key.unique_id).cmp(&(b.key.format, &b.key.unique_id))
        });
        let text =
            serde_json::to_string_pretty(&list).map_err(|e| ScanError::Serde(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Load the user tag file and the factory shadow
    pub fn load(&mut self) {
        for rec in Self::read_records(&self.path) {
            self.tags.insert(
                rec.key,
                PluginTag {
                    tags: sanitize_tags(&rec.tags),
                    tagtype: TagType::FromUserFile,
                },
            );
        }
        for rec in Self::read_records(&self.factory_path) {
            self.ftags.insert(rec.key, sanitize_tags(&rec.tags));
        }
    }

    /// Persist user-origin tags plus the factory shadow. Plugin-derived and
    /// factory tags themselves are reproduced on every scan.
    pub fn save(&self) -> ScanResult<()> {
        let user: Vec<TagRecord> = self
            .tags
            .iter()
            .filter(|(_, t)| t.tagtype.is_user())
            .map(|(k, t)| TagRecord {
                key: k.clone(),
                tags: t.tags.clone(),
            })
            .collect();
        Self::write_records(&self.path, user)?;

        let factory: Vec<TagRecord> = self
            .ftags
            .iter()
            .map(|(k, tags)| TagRecord {
                key: k.clone(),
                tags: tags.clone(),
            })
            .collect();
        Self::write_records(&self.factory_path, factory)
    }

    /// Set tags for a plugin. The write is dropped when tags of a stronger
    /// origin are already stored.
    pub fn set_tags(&mut self, key: PluginKey, tags: &str, tagtype: TagType) {
        let tags = sanitize_tags(tags);

        if !tagtype.is_user() {
            self.ftags.insert(key.clone(), tags.clone());
        }

        match self.tags.get(&key) {
            Some(existing) if existing.tagtype > tagtype => {}
            _ => {
                self.tags.insert(key, PluginTag { tags, tagtype });
            }
        }
    }

    pub fn tags(&self, key: &PluginKey) -> Option<&PluginTag> {
        self.tags.get(key)
    }

    /// Factory default for a plugin, if one was ever recorded
    pub fn factory_tags(&self, key: &PluginKey) -> Option<&str> {
        self.ftags.get(key).map(|s| s.as_str())
    }

    /// Replace a user edit with the factory default again
    pub fn reset_to_factory(&mut self, key: &PluginKey) {
        match self.ftags.get(key) {
            Some(factory) => {
                self.tags.insert(
                    key.clone(),
                    PluginTag {
                        tags: factory.clone(),
                        tagtype: TagType::FromFactoryFile,
                    },
                );
            }
            None => {
                self.tags.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PluginFormat;
    use tempfile::tempdir;

    fn key(id: &str) -> PluginKey {
        PluginKey::new(PluginFormat::Vst3, id)
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_tags("  Reverb  DELAY reverb "), "reverb delay");
        assert_eq!(sanitize_tags(""), "");
    }

    #[test]
    fn test_priority_ladder() {
        let dir = tempdir().unwrap();
        let mut store = TagStore::new(dir.path());
        let k = key("x");

        store.set_tags(k.clone(), "synth", TagType::FromPlug);
        store.set_tags(k.clone(), "synth analog", TagType::FromFactoryFile);
        assert_eq!(store.tags(&k).unwrap().tags, "synth analog");

        // user edit wins over factory
        store.set_tags(k.clone(), "bass", TagType::FromGui);
        assert_eq!(store.tags(&k).unwrap().tags, "bass");

        // a rescan's plugin-derived tags must not clobber the user edit
        store.set_tags(k.clone(), "synth", TagType::FromPlug);
        assert_eq!(store.tags(&k).unwrap().tags, "bass");

        // equal priority replaces
        store.set_tags(k.clone(), "lead", TagType::FromGui);
        assert_eq!(store.tags(&k).unwrap().tags, "lead");
    }

    #[test]
    fn test_factory_shadow_survives_user_edit() {
        let dir = tempdir().unwrap();
        let mut store = TagStore::new(dir.path());
        let k = key("x");

        store.set_tags(k.clone(), "synth analog", TagType::FromFactoryFile);
        store.set_tags(k.clone(), "bass", TagType::FromGui);
        assert_eq!(store.factory_tags(&k), Some("synth analog"));

        store.reset_to_factory(&k);
        assert_eq!(store.tags(&k).unwrap().tags, "synth analog");
        assert_eq!(store.tags(&k).unwrap().tagtype, TagType::FromFactoryFile);
    }

    #[test]
    fn test_only_user_tags_persist() {
        let dir = tempdir().unwrap();
        let mut store = TagStore::new(dir.path());
        store.set_tags(key("a"), "synth", TagType::FromPlug);
        store.set_tags(key("b"), "bass", TagType::FromGui);
        store.save().unwrap();

        let mut reloaded = TagStore::new(dir.path());
        reloaded.load();
        assert!(reloaded.tags(&key("a")).is_none());
        let b = reloaded.tags(&key("b")).unwrap();
        assert_eq!(b.tags, "bass");
        assert_eq!(b.tagtype, TagType::FromUserFile);

        // the factory shadow survives the reload, so a revert can still be
        // offered in a later session
        assert_eq!(reloaded.factory_tags(&key("a")), Some("synth"));
    }
}
