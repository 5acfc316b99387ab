//! Plugin blacklist ledger
//!
//! One append-only text file per plugin format, one candidate identity per
//! line. A listed candidate is never scanned automatically; removal
//! ("whitelisting") is an explicit user action.
//!
//! The ledger is the crash-safety anchor of the scan pipeline: a candidate
//! is written here *before* its scanner process is spawned and removed only
//! after a valid cache file has been confirmed, so a scan that takes down
//! the whole host leaves the culprit listed for the next launch.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::ensure_dir;
use crate::types::{Candidate, PluginFormat, ScanResult};

/// Per-format deny ledger rooted in the cache directory
#[derive(Clone, Debug)]
pub struct Blacklist {
    root: PathBuf,
}

impl Blacklist {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            root: cache_dir.join("blacklist"),
        }
    }

    /// Ledger file for one format
    pub fn file_for(&self, format: PluginFormat) -> PathBuf {
        self.root.join(format!("{}.txt", format.as_str()))
    }

    /// Exact-line membership test
    pub fn is_blacklisted(&self, format: PluginFormat, candidate: &Candidate) -> bool {
        let id = candidate.id_string();
        self.lines(format).iter().any(|l| *l == id)
    }

    /// Add a candidate; a no-op if it is already listed
    pub fn blacklist(&self, format: PluginFormat, candidate: &Candidate) -> ScanResult<()> {
        let id = candidate.id_string();
        let mut lines = self.lines(format);
        if lines.iter().any(|l| *l == id) {
            return Ok(());
        }
        info!("blacklisting {} candidate {}", format, id);
        lines.push(id);
        self.write_lines(format, &lines)
    }

    /// Remove a candidate, if listed
    pub fn whitelist(&self, format: PluginFormat, candidate: &Candidate) -> ScanResult<()> {
        let id = candidate.id_string();
        let lines = self.lines(format);
        if !lines.iter().any(|l| *l == id) {
            return Ok(());
        }
        let kept: Vec<String> = lines.into_iter().filter(|l| *l != id).collect();
        self.write_lines(format, &kept)
    }

    /// All listed identities for a format
    pub fn entries(&self, format: PluginFormat) -> Vec<String> {
        self.lines(format)
    }

    /// Drop the whole ledger for a format. Reserved for the explicit
    /// user-triggered "clear blacklist" command; never called while scanning.
    pub fn clear(&self, format: PluginFormat) -> ScanResult<()> {
        let path = self.file_for(format);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn lines(&self, format: PluginFormat) -> Vec<String> {
        match fs::read_to_string(self.file_for(format)) {
            Ok(text) => text
                .lines()
                .map(|l| l.trim_end().to_string())
                .filter(|l| !l.is_empty())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn write_lines(&self, format: PluginFormat, lines: &[String]) -> ScanResult<()> {
        ensure_dir(&self.root);
        let mut text = lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        fs::write(self.file_for(format), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_blacklist_roundtrip() {
        let dir = tempdir().unwrap();
        let bl = Blacklist::new(dir.path());
        let c = Candidate::path("/usr/lib/vst/broken.so");

        assert!(!bl.is_blacklisted(PluginFormat::Vst2, &c));

        bl.blacklist(PluginFormat::Vst2, &c).unwrap();
        assert!(bl.is_blacklisted(PluginFormat::Vst2, &c));

        // per-format isolation
        assert!(!bl.is_blacklisted(PluginFormat::Vst3, &c));

        bl.whitelist(PluginFormat::Vst2, &c).unwrap();
        assert!(!bl.is_blacklisted(PluginFormat::Vst2, &c));
    }

    #[test]
    fn test_blacklist_is_idempotent() {
        let dir = tempdir().unwrap();
        let bl = Blacklist::new(dir.path());
        let c = Candidate::path("/usr/lib/vst/broken.so");

        bl.blacklist(PluginFormat::Vst2, &c).unwrap();
        bl.blacklist(PluginFormat::Vst2, &c).unwrap();
        assert_eq!(bl.entries(PluginFormat::Vst2).len(), 1);
    }

    #[test]
    fn test_exact_line_match_only() {
        let dir = tempdir().unwrap();
        let bl = Blacklist::new(dir.path());
        bl.blacklist(PluginFormat::Vst2, &Candidate::path("/a/plug.so"))
            .unwrap();

        assert!(!bl.is_blacklisted(PluginFormat::Vst2, &Candidate::path("/a/plug")));
        assert!(!bl.is_blacklisted(PluginFormat::Vst2, &Candidate::path("/a/plug.so.bak")));
    }

    #[test]
    fn test_clear_removes_ledger() {
        let dir = tempdir().unwrap();
        let bl = Blacklist::new(dir.path());
        let c = Candidate::path("/a/plug.so");
        bl.blacklist(PluginFormat::Vst2, &c).unwrap();
        bl.clear(PluginFormat::Vst2).unwrap();
        assert!(!bl.is_blacklisted(PluginFormat::Vst2, &c));
        assert!(!bl.file_for(PluginFormat::Vst2).exists());
    }
}
