//! Plugin probes
//!
//! A probe extracts plugin metadata from one candidate. The real
//! format-specific probes live behind this trait: the isolated scanner
//! binary links them in, the in-process formats call them directly, and
//! tests substitute [`MockProbe`].
//!
//! [`FileProbe`] is the conservative built-in: it never loads the module,
//! only checks that the candidate points at a plausible native binary and
//! derives metadata from the filesystem. That is enough to reject corrupt
//! files and to give every real plugin a stable record until a deeper probe
//! is linked in.

use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::types::{Candidate, IoConfig, PluginFormat, PluginRecord, ScanError, ScanResult};

/// Metadata extraction for one candidate
pub trait PluginProbe: Send + Sync {
    /// Probe a candidate, returning every plugin it contains (shell/batch
    /// modules can hold several)
    fn probe(&self, format: PluginFormat, candidate: &Candidate) -> ScanResult<Vec<PluginRecord>>;
}

/// Built-in filesystem-level probe
#[derive(Debug, Default)]
pub struct FileProbe;

impl FileProbe {
    pub fn new() -> Self {
        Self
    }
}

impl PluginProbe for FileProbe {
    fn probe(&self, format: PluginFormat, candidate: &Candidate) -> ScanResult<Vec<PluginRecord>> {
        let path = match candidate.as_path() {
            Some(p) => p,
            None => {
                return Err(ScanError::Probe(
                    "descriptor candidates need a platform component registry".to_string(),
                ))
            }
        };

        let module = if path.is_dir() {
            bundle_entry_binary(path).ok_or_else(|| {
                ScanError::Probe(format!("no native binary inside bundle {}", path.display()))
            })?
        } else {
            path.to_path_buf()
        };

        if !is_native_binary(&module)? {
            return Err(ScanError::Probe(format!(
                "{} is not a recognized native binary",
                module.display()
            )));
        }

        let name = candidate
            .file_stem()
            .unwrap_or_else(|| "Unknown".to_string());
        debug!("file probe accepted {} as {}", candidate, name);

        Ok(vec![PluginRecord {
            format,
            unique_id: stable_id(candidate),
            name,
            creator: "Unknown".to_string(),
            category: "Unknown".to_string(),
            version: 0,
            n_audio_inputs: 2,
            n_audio_outputs: 2,
            n_midi_inputs: 0,
            n_midi_outputs: 0,
            io_configs: vec![IoConfig::new(2, 2)],
            path: candidate.id_string(),
            name_ambiguous: false,
            type_ambiguous: false,
        }])
    }
}

/// Identity-derived stable id, used when the module cannot be asked for one
fn stable_id(candidate: &Candidate) -> String {
    let digest = Sha256::digest(candidate.id_string().as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

/// First native shared object inside a bundle directory, searched a few
/// levels deep (VST3 keeps it under Contents/<arch>/)
fn bundle_entry_binary(bundle: &Path) -> Option<PathBuf> {
    fn walk(dir: &Path, depth: usize) -> Option<PathBuf> {
        let entries = fs::read_dir(dir).ok()?;
        let mut subdirs = Vec::new();
        for entry in entries.flatten() {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|e| e.to_str()) {
                    if matches!(ext, "so" | "dll" | "dylib") {
                        return Some(p);
                    }
                }
            } else if p.is_dir() && depth > 0 {
                subdirs.push(p);
            }
        }
        for sub in subdirs {
            if let Some(found) = walk(&sub, depth - 1) {
                return Some(found);
            }
        }
        None
    }
    walk(bundle, 3)
}

/// Magic-number check: ELF, PE, or Mach-O
fn is_native_binary(path: &Path) -> ScanResult<bool> {
    let mut file = fs::File::open(path)?;
    let mut magic = [0u8; 4];
    let n = file.read(&mut magic)?;
    if n < 4 {
        return Ok(false);
    }
    Ok(matches!(
        magic,
        [0x7f, b'E', b'L', b'F']
            | [b'M', b'Z', _, _]
            | [0xfe, 0xed, 0xfa, 0xce]
            | [0xfe, 0xed, 0xfa, 0xcf]
            | [0xce, 0xfa, 0xed, 0xfe]
            | [0xcf, 0xfa, 0xed, 0xfe]
            | [0xca, 0xfe, 0xba, 0xbe]
    ))
}

/// Scripted probe for tests: maps candidate identities to canned results
#[derive(Debug, Default)]
pub struct MockProbe {
    outcomes: std::collections::HashMap<String, Result<Vec<PluginRecord>, String>>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_success(mut self, id: &str, records: Vec<PluginRecord>) -> Self {
        self.outcomes.insert(id.to_string(), Ok(records));
        self
    }

    pub fn with_failure(mut self, id: &str, message: &str) -> Self {
        self.outcomes
            .insert(id.to_string(), Err(message.to_string()));
        self
    }

    /// Number of probe invocations so far
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Minimal record for scripted outcomes
    pub fn record(format: PluginFormat, id: &str, name: &str, path: &str) -> PluginRecord {
        PluginRecord {
            format,
            unique_id: id.to_string(),
            name: name.to_string(),
            creator: "Mock Audio".to_string(),
            category: "Effect".to_string(),
            version: 1,
            n_audio_inputs: 2,
            n_audio_outputs: 2,
            n_midi_inputs: 0,
            n_midi_outputs: 0,
            io_configs: vec![IoConfig::new(2, 2)],
            path: path.to_string(),
            name_ambiguous: false,
            type_ambiguous: false,
        }
    }
}

impl PluginProbe for MockProbe {
    fn probe(&self, _format: PluginFormat, candidate: &Candidate) -> ScanResult<Vec<PluginRecord>> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match self.outcomes.get(&candidate.id_string()) {
            Some(Ok(records)) => Ok(records.clone()),
            Some(Err(msg)) => Err(ScanError::Probe(msg.clone())),
            None => Err(ScanError::Probe(format!(
                "mock probe has no outcome for {}",
                candidate
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_probe_accepts_elf() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("comp.so");
        fs::write(&path, b"\x7fELF rest of module").unwrap();

        let records = FileProbe::new()
            .probe(PluginFormat::Vst2, &Candidate::path(&path))
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "comp");
        assert_eq!(records[0].format, PluginFormat::Vst2);
    }

    #[test]
    fn test_file_probe_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.so");
        fs::write(&path, b"this is not a shared object").unwrap();

        let err = FileProbe::new()
            .probe(PluginFormat::Vst2, &Candidate::path(&path))
            .unwrap_err();
        assert!(matches!(err, ScanError::Probe(_)));
    }

    #[test]
    fn test_file_probe_rejects_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.so");
        fs::write(&path, b"").unwrap();

        assert!(FileProbe::new()
            .probe(PluginFormat::Vst2, &Candidate::path(&path))
            .is_err());
    }

    #[test]
    fn test_file_probe_finds_bundle_entry() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("Comp.vst3");
        let inner = bundle.join("Contents").join("x86_64-linux");
        fs::create_dir_all(&inner).unwrap();
        fs::write(inner.join("Comp.so"), b"\x7fELF rest of module").unwrap();

        let records = FileProbe::new()
            .probe(PluginFormat::Vst3, &Candidate::path(&bundle))
            .unwrap();
        assert_eq!(records[0].name, "Comp");
    }

    #[test]
    fn test_file_probe_rejects_empty_bundle() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("Hollow.vst3");
        fs::create_dir_all(&bundle).unwrap();

        assert!(FileProbe::new()
            .probe(PluginFormat::Vst3, &Candidate::path(&bundle))
            .is_err());
    }

    #[test]
    fn test_mock_probe_scripted_outcomes() {
        let probe = MockProbe::new()
            .with_success(
                "/a/plug.so",
                vec![MockProbe::record(PluginFormat::Vst2, "1", "A", "/a/plug.so")],
            )
            .with_failure("/b/plug.so", "instantiation failed");

        assert!(probe
            .probe(PluginFormat::Vst2, &Candidate::path("/a/plug.so"))
            .is_ok());
        assert!(probe
            .probe(PluginFormat::Vst2, &Candidate::path("/b/plug.so"))
            .is_err());
        assert_eq!(probe.calls(), 2);
    }
}
