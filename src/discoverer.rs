//! Format discoverers
//!
//! One strategy object per plugin format: it knows how to enumerate
//! candidates for its format and which probe applies. The candidate
//! pipeline itself (blacklist check, cache check, scan, cache read-back,
//! deduplication) is shared and identical for every format:
//!
//! 1. A blacklisted candidate is skipped outright (no cache lookup, no scan).
//! 2. A valid cache file is deserialized directly; no process is launched.
//!    This is the fast path taken on every normal startup.
//! 3. Without a valid cache, a cache-only pass records why (`New` or
//!    `Updated`) and moves on.
//! 4. A full scan blacklists the candidate *first*, runs the isolated
//!    scanner (or the in-process probe when no scanner binary is
//!    configured), and only removes the blacklist entry once a valid cache
//!    file is confirmed on disk. A host crash mid-scan therefore leaves the
//!    culprit blacklisted for the next launch.
//! 5. A later candidate claiming an already-seen `(format, unique_id)` is
//!    dropped, first seen wins.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::blacklist::Blacklist;
use crate::cache::{CacheCheck, CacheStore};
use crate::config::Settings;
use crate::paths::search_paths;
use crate::probe::{FileProbe, PluginProbe};
use crate::process::{run_scanner, CancelControl, ScannerLaunch};
use crate::scan_log::ScanLog;
use crate::types::{Candidate, PluginFormat, PluginRecord, ScanError, ScanOutcome};

/// Discovery strategy for one plugin format
pub trait FormatDiscoverer: Send {
    fn format(&self) -> PluginFormat;

    /// All candidates visible along this format's search paths
    fn enumerate_candidates(&self, settings: &Settings) -> Vec<Candidate>;

    /// Probe used when the scan runs inside the host process: always for
    /// the in-process formats, as a degraded fallback for the external ones
    fn probe(&self) -> &dyn PluginProbe;
}

/// Shared stores and controls the pipeline needs
pub struct DiscoveryContext<'a> {
    pub settings: &'a Settings,
    pub blacklist: &'a Blacklist,
    pub cache: &'a CacheStore,
    pub scan_log: &'a mut ScanLog,
    pub cancel: &'a CancelControl,
    /// Invoked once per candidate before it is processed (scan progress UI)
    pub progress: Option<&'a dyn Fn(PluginFormat, &Candidate)>,
}

/// Run one discoverer over all of its candidates
pub fn discover_format(
    disc: &dyn FormatDiscoverer,
    ctx: &mut DiscoveryContext<'_>,
    cache_only: bool,
) -> Vec<PluginRecord> {
    let format = disc.format();

    if ctx.cancel.all_cancelled() {
        return Vec::new();
    }

    // a configured-but-missing scanner binary disables live scanning for
    // this format's pass; candidates with valid caches still load
    let mut cache_only = cache_only;
    if format.is_external() {
        if let Some(bin) = &ctx.settings.scanner_bin_path {
            if !bin.is_file() {
                error!(
                    "{}: scanner binary {} not found, live scans disabled for this pass",
                    format,
                    bin.display()
                );
                cache_only = true;
            }
        }
    }

    let candidates = disc.enumerate_candidates(ctx.settings);
    info!("{}: {} candidates", format, candidates.len());

    let mut records = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for candidate in candidates {
        if ctx.cancel.all_cancelled() {
            break;
        }
        ctx.cancel.reset_one();
        if let Some(progress) = ctx.progress {
            progress(format, &candidate);
        }

        let Some(found) = scan_candidate(disc, &candidate, ctx, cache_only) else {
            continue;
        };
        for record in found {
            if seen.contains(&record.unique_id) {
                warn!(
                    "{}: ignoring duplicate plugin \"{}\" ({}) from {}",
                    format, record.name, record.unique_id, candidate
                );
                ctx.scan_log.entry(format, &candidate).note(format!(
                    "duplicate id {} (\"{}\") already provided by another module",
                    record.unique_id, record.name
                ));
                continue;
            }
            seen.insert(record.unique_id.clone());
            records.push(record);
        }
    }

    records
}

/// Drive a single candidate through the Blacklist → Cache → Scan pipeline.
///
/// Returns `None` when the candidate contributed nothing to this pass; the
/// scan log entry holds the reason.
pub fn scan_candidate(
    disc: &dyn FormatDiscoverer,
    candidate: &Candidate,
    ctx: &mut DiscoveryContext<'_>,
    cache_only: bool,
) -> Option<Vec<PluginRecord>> {
    let format = disc.format();

    if ctx.blacklist.is_blacklisted(format, candidate) {
        ctx.scan_log
            .entry(format, candidate)
            .msg(ScanOutcome::Blacklisted, "on the blacklist, not scanned");
        return None;
    }

    let had_cache = match ctx.cache.check(format, candidate) {
        CacheCheck::Valid(cache) => {
            let entry = ctx.scan_log.entry(format, candidate);
            entry.reset();
            entry.msg(
                ScanOutcome::Ok,
                format!("loaded {} plugin(s) from cache", cache.plugins.len()),
            );
            return Some(normalize_records(cache.plugins, candidate));
        }
        CacheCheck::Missing => false,
        CacheCheck::StaleVersion => {
            if cache_only {
                ctx.scan_log
                    .entry(format, candidate)
                    .msg(ScanOutcome::Updated, "cache schema is stale, rescan needed");
                return None;
            }
            true
        }
        CacheCheck::ArchMismatch => {
            if cache_only {
                ctx.scan_log.entry(format, candidate).msg(
                    ScanOutcome::Incompatible,
                    "cache was produced by a different architecture",
                );
                return None;
            }
            true
        }
        CacheCheck::Rejected(reason) => {
            if cache_only {
                let entry = ctx.scan_log.entry(format, candidate);
                entry.msg(ScanOutcome::New, "no usable cache, scan needed");
                entry.note(reason);
                return None;
            }
            true
        }
    };

    if cache_only {
        ctx.scan_log
            .entry(format, candidate)
            .msg(ScanOutcome::New, "never scanned, skipped in cache-only pass");
        return None;
    }

    full_scan(disc, candidate, ctx, had_cache)
}

/// Full scan of one candidate: blacklist first, probe, confirm cache,
/// whitelist last
fn full_scan(
    disc: &dyn FormatDiscoverer,
    candidate: &Candidate,
    ctx: &mut DiscoveryContext<'_>,
    had_cache: bool,
) -> Option<Vec<PluginRecord>> {
    let format = disc.format();

    // crash safety: listed before anything can go wrong, delisted only
    // after the cache is confirmed
    if let Err(e) = ctx.blacklist.blacklist(format, candidate) {
        warn!("cannot write blacklist entry for {}: {}", candidate, e);
    }

    {
        let entry = ctx.scan_log.entry(format, candidate);
        entry.reset();
        entry.note(if had_cache {
            "rescanning: cache is no longer valid"
        } else {
            "scanning for the first time"
        });
    }

    let scanner_bin = if format.is_external() {
        ctx.settings
            .scanner_bin_path
            .as_ref()
            .filter(|p| p.is_file())
            .cloned()
    } else {
        None
    };

    let scanned = match scanner_bin {
        Some(bin) => {
            let launch = ScannerLaunch {
                bin: &bin,
                format,
                candidate,
                cache_dir: &ctx.settings.cache_dir,
                timeout_ds: ctx.settings.scan_timeout,
                verbose: ctx.settings.verbose_plugin_scan,
            };
            run_scanner(&launch, ctx.cancel, ctx.scan_log.entry(format, candidate))
        }
        None => {
            // in-process fallback: no timeout enforcement is possible here,
            // the same ledger discipline still applies
            disc.probe()
                .probe(format, candidate)
                .and_then(|records| {
                    let records = normalize_records(records, candidate);
                    ctx.cache.write(format, candidate, &records).map(|_| ())
                })
        }
    };

    match scanned {
        Ok(()) => {}
        Err(e) => {
            // a half-written cache must never be trusted
            let _ = ctx.cache.remove(format, candidate);
            let entry = ctx.scan_log.entry(format, candidate);
            match e {
                ScanError::TimedOut => entry.msg(
                    ScanOutcome::TimedOut,
                    "scan exceeded the timeout and was terminated",
                ),
                ScanError::Cancelled => {
                    entry.msg(ScanOutcome::Error, "scan was cancelled by the operator")
                }
                other => entry.msg(ScanOutcome::Error, other.to_string()),
            }
            return None;
        }
    }

    // the scanner's word is not enough; only a confirmed cache file counts
    match ctx.cache.check(format, candidate) {
        CacheCheck::Valid(cache) => {
            if let Err(e) = ctx.blacklist.whitelist(format, candidate) {
                warn!("cannot remove blacklist entry for {}: {}", candidate, e);
            }
            ctx.scan_log.entry(format, candidate).msg(
                ScanOutcome::Ok,
                format!("scan found {} plugin(s)", cache.plugins.len()),
            );
            Some(normalize_records(cache.plugins, candidate))
        }
        other => {
            let reason = match other {
                CacheCheck::Missing => "scan finished but produced no cache file".to_string(),
                CacheCheck::StaleVersion => {
                    "scan produced a cache with a stale schema version".to_string()
                }
                CacheCheck::ArchMismatch => {
                    "scan produced a cache for a different architecture".to_string()
                }
                CacheCheck::Rejected(r) => format!("scan produced an unusable cache: {}", r),
                CacheCheck::Valid(_) => unreachable!(),
            };
            ctx.scan_log
                .entry(format, candidate)
                .msg(ScanOutcome::Error, reason);
            None
        }
    }
}

/// Post-scan record fixups: empty or placeholder names fall back to the
/// module's file stem, and the source path always reflects the candidate
fn normalize_records(records: Vec<PluginRecord>, candidate: &Candidate) -> Vec<PluginRecord> {
    records
        .into_iter()
        .map(|mut r| {
            let name = r.name.trim();
            if name.is_empty() || name.eq_ignore_ascii_case("the unnamed plugin") {
                r.name = candidate
                    .file_stem()
                    .unwrap_or_else(|| "Unknown".to_string());
            }
            if r.path.is_empty() {
                r.path = candidate.id_string();
            }
            r
        })
        .collect()
}

fn is_dotfile(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true)
}

fn has_extension(path: &Path, wanted: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| wanted.iter().any(|w| e.eq_ignore_ascii_case(w)))
        .unwrap_or(false)
}

/// Recursive walk for module files, depth-limited against pathological trees
fn walk_modules(root: &Path, extensions: &[&str], out: &mut Vec<Candidate>, depth: usize) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if is_dotfile(&path) {
            continue;
        }
        if path.is_file() && has_extension(&path, extensions) {
            out.push(Candidate::Path(path));
        } else if path.is_dir() && depth > 0 {
            walk_modules(&path, extensions, out, depth - 1);
        }
    }
}

/// Walk for bundle directories (and Windows-style single-file bundles)
fn walk_bundles(root: &Path, extension: &str, out: &mut Vec<Candidate>, depth: usize) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if is_dotfile(&path) {
            continue;
        }
        if has_extension(&path, &[extension]) {
            out.push(Candidate::Path(path));
        } else if path.is_dir() && depth > 0 {
            walk_bundles(&path, extension, out, depth - 1);
        }
    }
}

fn sorted(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by_key(|c| c.id_string());
    candidates
}

/// VST2: `.dll` / `.so` module files along the VST2 search path
pub struct Vst2Discoverer {
    probe: Arc<dyn PluginProbe>,
}

impl Vst2Discoverer {
    pub fn new() -> Self {
        Self::with_probe(Arc::new(FileProbe::new()))
    }

    pub fn with_probe(probe: Arc<dyn PluginProbe>) -> Self {
        Self { probe }
    }
}

impl Default for Vst2Discoverer {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatDiscoverer for Vst2Discoverer {
    fn format(&self) -> PluginFormat {
        PluginFormat::Vst2
    }

    fn enumerate_candidates(&self, settings: &Settings) -> Vec<Candidate> {
        let mut out = Vec::new();
        for root in search_paths(PluginFormat::Vst2, settings) {
            walk_modules(&root, &["so", "dll"], &mut out, 5);
        }
        sorted(out)
    }

    fn probe(&self) -> &dyn PluginProbe {
        &*self.probe
    }
}

/// VST3: `.vst3` bundles along the VST3 search path
pub struct Vst3Discoverer {
    probe: Arc<dyn PluginProbe>,
}

impl Vst3Discoverer {
    pub fn new() -> Self {
        Self::with_probe(Arc::new(FileProbe::new()))
    }

    pub fn with_probe(probe: Arc<dyn PluginProbe>) -> Self {
        Self { probe }
    }
}

impl Default for Vst3Discoverer {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatDiscoverer for Vst3Discoverer {
    fn format(&self) -> PluginFormat {
        PluginFormat::Vst3
    }

    fn enumerate_candidates(&self, settings: &Settings) -> Vec<Candidate> {
        let mut out = Vec::new();
        for root in search_paths(PluginFormat::Vst3, settings) {
            walk_bundles(&root, "vst3", &mut out, 3);
        }
        sorted(out)
    }

    fn probe(&self) -> &dyn PluginProbe {
        &*self.probe
    }
}

/// LV2: `.lv2` bundle directories at the top of each search path entry
pub struct Lv2Discoverer {
    probe: Arc<dyn PluginProbe>,
}

impl Lv2Discoverer {
    pub fn new() -> Self {
        Self::with_probe(Arc::new(FileProbe::new()))
    }

    pub fn with_probe(probe: Arc<dyn PluginProbe>) -> Self {
        Self { probe }
    }
}

impl Default for Lv2Discoverer {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatDiscoverer for Lv2Discoverer {
    fn format(&self) -> PluginFormat {
        PluginFormat::Lv2
    }

    fn enumerate_candidates(&self, settings: &Settings) -> Vec<Candidate> {
        let mut out = Vec::new();
        for root in search_paths(PluginFormat::Lv2, settings) {
            // LV2 bundles sit at the top of each path entry, no recursion
            walk_bundles(&root, "lv2", &mut out, 0);
        }
        sorted(out)
    }

    fn probe(&self) -> &dyn PluginProbe {
        &*self.probe
    }
}

/// CLAP: `.clap` module files along the CLAP search path
pub struct ClapDiscoverer {
    probe: Arc<dyn PluginProbe>,
}

impl ClapDiscoverer {
    pub fn new() -> Self {
        Self::with_probe(Arc::new(FileProbe::new()))
    }

    pub fn with_probe(probe: Arc<dyn PluginProbe>) -> Self {
        Self { probe }
    }
}

impl Default for ClapDiscoverer {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatDiscoverer for ClapDiscoverer {
    fn format(&self) -> PluginFormat {
        PluginFormat::Clap
    }

    fn enumerate_candidates(&self, settings: &Settings) -> Vec<Candidate> {
        let mut out = Vec::new();
        for root in search_paths(PluginFormat::Clap, settings) {
            walk_modules(&root, &["clap"], &mut out, 5);
        }
        sorted(out)
    }

    fn probe(&self) -> &dyn PluginProbe {
        &*self.probe
    }
}

/// Audio Units: descriptor triples from the platform component registry.
///
/// The registry itself is an external collaborator; without an injected
/// enumerator this format contributes no candidates.
pub struct AuDiscoverer {
    probe: Arc<dyn PluginProbe>,
    enumerator: Option<Box<dyn Fn() -> Vec<Candidate> + Send>>,
}

impl AuDiscoverer {
    pub fn new() -> Self {
        Self {
            probe: Arc::new(FileProbe::new()),
            enumerator: None,
        }
    }

    pub fn with_enumerator(
        probe: Arc<dyn PluginProbe>,
        enumerator: Box<dyn Fn() -> Vec<Candidate> + Send>,
    ) -> Self {
        Self {
            probe,
            enumerator: Some(enumerator),
        }
    }
}

impl Default for AuDiscoverer {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatDiscoverer for AuDiscoverer {
    fn format(&self) -> PluginFormat {
        PluginFormat::AudioUnit
    }

    fn enumerate_candidates(&self, _settings: &Settings) -> Vec<Candidate> {
        match &self.enumerator {
            Some(enumerate) => sorted(enumerate()),
            None => {
                tracing::debug!("AU: no component registry available, skipping");
                Vec::new()
            }
        }
    }

    fn probe(&self) -> &dyn PluginProbe {
        &*self.probe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::MockProbe;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        settings: Settings,
        blacklist: Blacklist,
        cache: CacheStore,
        scan_log: ScanLog,
        cancel: CancelControl,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let plugins = dir.path().join("plugins");
            fs::create_dir_all(&plugins).unwrap();
            let mut settings =
                Settings::with_dirs(dir.path().join("config"), dir.path().join("cache"));
            settings.lv2_paths.push(plugins);
            let blacklist = Blacklist::new(&settings.cache_dir);
            let cache = CacheStore::new(&settings.cache_dir);
            let scan_log = ScanLog::new(&settings.cache_dir);
            Self {
                _dir: dir,
                settings,
                blacklist,
                cache,
                scan_log,
                cancel: CancelControl::new(),
            }
        }

        fn plugin_dir(&self) -> PathBuf {
            self.settings.lv2_paths[0].clone()
        }

        fn add_bundle(&self, name: &str) -> Candidate {
            let path = self.plugin_dir().join(name);
            fs::create_dir_all(&path).unwrap();
            Candidate::Path(path)
        }

        fn ctx(&mut self) -> DiscoveryContext<'_> {
            DiscoveryContext {
                settings: &self.settings,
                blacklist: &self.blacklist,
                cache: &self.cache,
                scan_log: &mut self.scan_log,
                cancel: &self.cancel,
                progress: None,
            }
        }
    }

    fn rec(id: &str, name: &str, path: &str) -> PluginRecord {
        MockProbe::record(PluginFormat::Lv2, id, name, path)
    }

    #[test]
    fn test_successful_scan_writes_cache_and_unblacklists() {
        let mut fx = Fixture::new();
        let c = fx.add_bundle("comp.lv2");
        let probe = Arc::new(
            MockProbe::new().with_success(&c.id_string(), vec![rec("u1", "Comp", "")]),
        );
        let disc = Lv2Discoverer::with_probe(probe.clone());

        let records = discover_format(&disc, &mut fx.ctx(), false);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].unique_id, "u1");
        // path fixup applied
        assert_eq!(records[0].path, c.id_string());

        assert!(!fx.blacklist.is_blacklisted(PluginFormat::Lv2, &c));
        assert!(fx.cache.valid_cache_for(PluginFormat::Lv2, &c).is_some());
        assert_eq!(
            fx.scan_log
                .get(PluginFormat::Lv2, &c.id_string())
                .unwrap()
                .result,
            ScanOutcome::Ok
        );
    }

    #[test]
    fn test_failed_probe_leaves_candidate_blacklisted() {
        let mut fx = Fixture::new();
        let c = fx.add_bundle("broken.lv2");
        let probe =
            Arc::new(MockProbe::new().with_failure(&c.id_string(), "instantiation failed"));
        let disc = Lv2Discoverer::with_probe(probe);

        let records = discover_format(&disc, &mut fx.ctx(), false);
        assert!(records.is_empty());
        assert!(fx.blacklist.is_blacklisted(PluginFormat::Lv2, &c));
        assert_eq!(
            fx.scan_log
                .get(PluginFormat::Lv2, &c.id_string())
                .unwrap()
                .result,
            ScanOutcome::Error
        );

        // the next pass must skip it without touching the probe
        let probe2 = Arc::new(MockProbe::new());
        let disc2 = Lv2Discoverer::with_probe(probe2.clone());
        let records = discover_format(&disc2, &mut fx.ctx(), false);
        assert!(records.is_empty());
        assert_eq!(probe2.calls(), 0);
        assert_eq!(
            fx.scan_log
                .get(PluginFormat::Lv2, &c.id_string())
                .unwrap()
                .result,
            ScanOutcome::Blacklisted
        );
    }

    #[test]
    fn test_cache_fast_path_skips_probe() {
        let mut fx = Fixture::new();
        let c = fx.add_bundle("comp.lv2");
        let probe = Arc::new(
            MockProbe::new().with_success(&c.id_string(), vec![rec("u1", "Comp", "")]),
        );
        let disc = Lv2Discoverer::with_probe(probe.clone());

        let first = discover_format(&disc, &mut fx.ctx(), false);
        assert_eq!(probe.calls(), 1);

        let second = discover_format(&disc, &mut fx.ctx(), false);
        assert_eq!(probe.calls(), 1, "second pass must come from cache");
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].unique_id, second[0].unique_id);
    }

    #[test]
    fn test_cache_only_skips_unscanned() {
        let mut fx = Fixture::new();
        let c = fx.add_bundle("comp.lv2");
        let probe = Arc::new(
            MockProbe::new().with_success(&c.id_string(), vec![rec("u1", "Comp", "")]),
        );
        let disc = Lv2Discoverer::with_probe(probe.clone());

        let records = discover_format(&disc, &mut fx.ctx(), true);
        assert!(records.is_empty());
        assert_eq!(probe.calls(), 0);
        assert_eq!(
            fx.scan_log
                .get(PluginFormat::Lv2, &c.id_string())
                .unwrap()
                .result,
            ScanOutcome::New
        );
    }

    #[test]
    fn test_duplicate_ids_first_seen_wins() {
        let mut fx = Fixture::new();
        let a = fx.add_bundle("alpha.lv2");
        let b = fx.add_bundle("beta.lv2");
        let probe = Arc::new(
            MockProbe::new()
                .with_success(&a.id_string(), vec![rec("same", "Alpha", "")])
                .with_success(&b.id_string(), vec![rec("same", "Beta", "")]),
        );
        let disc = Lv2Discoverer::with_probe(probe);

        let records = discover_format(&disc, &mut fx.ctx(), false);
        assert_eq!(records.len(), 1);
        // candidates are visited in sorted order: alpha before beta
        assert_eq!(records[0].name, "Alpha");

        let loser = fx.scan_log.get(PluginFormat::Lv2, &b.id_string()).unwrap();
        assert!(loser
            .messages
            .iter()
            .any(|m| m.text.contains("duplicate id")));
    }

    #[test]
    fn test_cancel_all_stops_enumeration() {
        let mut fx = Fixture::new();
        let a = fx.add_bundle("alpha.lv2");
        let probe = Arc::new(
            MockProbe::new().with_success(&a.id_string(), vec![rec("u1", "Alpha", "")]),
        );
        let disc = Lv2Discoverer::with_probe(probe.clone());

        fx.cancel.cancel_all();
        let records = discover_format(&disc, &mut fx.ctx(), false);
        assert!(records.is_empty());
        assert_eq!(probe.calls(), 0);
    }

    #[test]
    fn test_unnamed_plugin_renamed_from_stem() {
        let mut fx = Fixture::new();
        let c = fx.add_bundle("mystery.lv2");
        let probe = Arc::new(MockProbe::new().with_success(
            &c.id_string(),
            vec![rec("u1", "The Unnamed plugin", "")],
        ));
        let disc = Lv2Discoverer::with_probe(probe);

        let records = discover_format(&disc, &mut fx.ctx(), false);
        assert_eq!(records[0].name, "mystery");
    }
}
