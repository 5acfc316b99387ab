//! Discovery engine integration tests
//!
//! End-to-end scenarios over real temp directories: fresh-install scans,
//! cache idempotence, crash safety with a killed scanner, timeouts against
//! a hung scanner, and concealment toggling. External-scanner tests drive
//! the real `polaron-scanner` binary plus shell-script stand-ins for
//! crashing and hanging scanners.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use polaron::{
    Candidate, ClapDiscoverer, FileProbe, FormatDiscoverer, Lv2Discoverer, MockProbe,
    PluginFormat, PluginManager, PluginProbe, PluginStatusKind, ScanOutcome, ScanResult,
    Settings, Vst2Discoverer, Vst3Discoverer,
};
use tempfile::{tempdir, TempDir};

/// Probe wrapper that counts invocations, so tests can assert the cache
/// fast path really skipped probing
struct CountingProbe {
    inner: FileProbe,
    calls: AtomicUsize,
}

impl CountingProbe {
    fn new() -> Self {
        Self {
            inner: FileProbe::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PluginProbe for CountingProbe {
    fn probe(
        &self,
        format: PluginFormat,
        candidate: &Candidate,
    ) -> ScanResult<Vec<polaron::PluginRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.probe(format, candidate)
    }
}

struct Fixture {
    dir: TempDir,
    settings: Settings,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let settings = Settings::with_dirs(dir.path().join("config"), dir.path().join("cache"));
        Self { dir, settings }
    }

    fn plugin_dir(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::create_dir_all(&path).unwrap();
        path
    }

    fn write_elf(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"\x7fELF pretend shared object").unwrap();
        path
    }

    fn write_garbage(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"definitely not a shared object").unwrap();
        path
    }

    #[cfg(unix)]
    fn script(&self, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = self.dir.path().join("fake-scanner.sh");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}

#[test]
fn test_fresh_install_end_to_end() {
    let mut fx = Fixture::new();
    let plugins = fx.plugin_dir("clap");
    let good = fx.write_elf(&plugins, "good.clap");
    let bad = fx.write_garbage(&plugins, "bad.clap");
    fx.settings.clap_paths.push(plugins);

    let probe = Arc::new(CountingProbe::new());
    let manager = PluginManager::with_discoverers(
        fx.settings.clone(),
        vec![Box::new(ClapDiscoverer::with_probe(probe.clone()))],
    );

    // fresh install: no cache, no blacklist
    assert!(manager.refresh(false));

    let list = manager.plugins(PluginFormat::Clap);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].name, "good");

    let entries = manager.scan_log_entries();
    let outcome = |path: &Path| {
        entries
            .iter()
            .find(|e| e.candidate.id_string() == path.to_string_lossy())
            .unwrap()
            .result
    };
    assert_eq!(outcome(&good), ScanOutcome::Ok);
    assert_eq!(outcome(&bad), ScanOutcome::Error);

    // the corrupt module stays on the ledger
    let blacklisted = manager.blacklisted(PluginFormat::Clap);
    assert_eq!(blacklisted, vec![bad.to_string_lossy().to_string()]);

    // cache-only pass returns the same single-record list with zero probes
    let calls_before = probe.calls();
    assert!(manager.refresh(true));
    let again = manager.plugins(PluginFormat::Clap);
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].unique_id, list[0].unique_id);
    assert_eq!(probe.calls(), calls_before);
}

#[test]
fn test_cache_only_refresh_is_idempotent() {
    let mut fx = Fixture::new();
    let plugins = fx.plugin_dir("clap");
    fx.write_elf(&plugins, "one.clap");
    fx.settings.clap_paths.push(plugins);

    let probe = Arc::new(CountingProbe::new());
    let manager = PluginManager::with_discoverers(
        fx.settings.clone(),
        vec![Box::new(ClapDiscoverer::with_probe(probe.clone()))],
    );

    manager.refresh(false);
    assert_eq!(probe.calls(), 1);

    let first = manager.plugins(PluginFormat::Clap);
    manager.refresh(true);
    let second = manager.plugins(PluginFormat::Clap);
    manager.refresh(true);
    let third = manager.plugins(PluginFormat::Clap);

    assert_eq!(probe.calls(), 1, "cache-only passes must not probe");
    let ids =
        |l: &[polaron::PluginRecord]| l.iter().map(|r| r.unique_id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(&first), ids(&second));
    assert_eq!(ids(&second), ids(&third));
}

#[test]
fn test_schema_bump_forces_rescan() {
    let mut fx = Fixture::new();
    let plugins = fx.plugin_dir("clap");
    let module = fx.write_elf(&plugins, "one.clap");
    fx.settings.clap_paths.push(plugins);

    let probe = Arc::new(CountingProbe::new());
    let manager = PluginManager::with_discoverers(
        fx.settings.clone(),
        vec![Box::new(ClapDiscoverer::with_probe(probe.clone()))],
    );
    manager.refresh(false);
    assert_eq!(probe.calls(), 1);

    // sabotage the stored schema version
    let store = polaron::CacheStore::new(&fx.settings.cache_dir);
    let candidate = Candidate::path(&module);
    let cache_path = store.cache_path_for(PluginFormat::Clap, &candidate);
    let mut cache: polaron::CacheFile =
        serde_json::from_str(&fs::read_to_string(&cache_path).unwrap()).unwrap();
    cache.version = 0;
    fs::write(&cache_path, serde_json::to_string(&cache).unwrap()).unwrap();

    assert!(store
        .valid_cache_for(PluginFormat::Clap, &candidate)
        .is_none());

    // cache-only: the plugin is omitted and marked Updated
    manager.refresh(true);
    assert!(manager.plugins(PluginFormat::Clap).is_empty());
    assert_eq!(probe.calls(), 1);
    let entry = manager
        .scan_log_entries()
        .into_iter()
        .find(|e| e.candidate.id_string() == module.to_string_lossy())
        .unwrap();
    assert_eq!(entry.result, ScanOutcome::Updated);

    // full refresh probes again
    manager.refresh(false);
    assert_eq!(probe.calls(), 2);
    assert_eq!(manager.plugins(PluginFormat::Clap).len(), 1);
}

#[cfg(unix)]
#[test]
fn test_crashing_scanner_leaves_candidate_blacklisted() {
    let mut fx = Fixture::new();
    let plugins = fx.plugin_dir("vst");
    let module = fx.write_elf(&plugins, "crasher.so");
    fx.settings.vst2_paths.push(plugins);

    // simulated crash: counts invocations, writes no cache, dies
    let count_file = fx.dir.path().join("invocations");
    let scanner = fx.script(&format!("echo run >> {}\nexit 9", count_file.display()));
    fx.settings.scanner_bin_path = Some(scanner);

    let manager = PluginManager::with_discoverers(
        fx.settings.clone(),
        vec![Box::new(Vst2Discoverer::new())],
    );

    manager.refresh(false);
    assert!(manager.plugins(PluginFormat::Vst2).is_empty());
    assert_eq!(
        manager.blacklisted(PluginFormat::Vst2),
        vec![module.to_string_lossy().to_string()]
    );
    assert_eq!(invocations(&count_file), 1);

    // the next pass must not auto-retry the blacklisted candidate
    manager.refresh(false);
    assert_eq!(invocations(&count_file), 1);
    let entry = manager
        .scan_log_entries()
        .into_iter()
        .find(|e| e.candidate.id_string() == module.to_string_lossy())
        .unwrap();
    assert_eq!(entry.result, ScanOutcome::Blacklisted);

    // an explicit whitelist re-enables scanning
    manager
        .whitelist_candidate(PluginFormat::Vst2, &Candidate::path(&module))
        .unwrap();
    manager.refresh(false);
    assert_eq!(invocations(&count_file), 2);
}

#[cfg(unix)]
fn invocations(count_file: &Path) -> usize {
    fs::read_to_string(count_file)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[cfg(unix)]
#[test]
fn test_hung_scanner_times_out_and_is_blacklisted() {
    let mut fx = Fixture::new();
    let plugins = fx.plugin_dir("vst");
    let module = fx.write_elf(&plugins, "hanger.so");
    fx.settings.vst2_paths.push(plugins);
    fx.settings.scanner_bin_path = Some(fx.script("sleep 30"));
    fx.settings.scan_timeout = 3; // 0.3 s

    let manager = PluginManager::with_discoverers(
        fx.settings.clone(),
        vec![Box::new(Vst2Discoverer::new())],
    );

    let start = Instant::now();
    manager.refresh(false);
    assert!(start.elapsed() < Duration::from_secs(10));

    assert!(manager.plugins(PluginFormat::Vst2).is_empty());
    assert_eq!(
        manager.blacklisted(PluginFormat::Vst2),
        vec![module.to_string_lossy().to_string()]
    );
    let entry = manager
        .scan_log_entries()
        .into_iter()
        .find(|e| e.candidate.id_string() == module.to_string_lossy())
        .unwrap();
    assert_eq!(entry.result, ScanOutcome::TimedOut);
}

#[test]
fn test_real_scanner_binary_roundtrip() {
    let mut fx = Fixture::new();
    let plugins = fx.plugin_dir("vst");
    let module = fx.write_elf(&plugins, "RealComp.so");
    fx.settings.vst2_paths.push(plugins);
    fx.settings.scanner_bin_path = Some(PathBuf::from(env!("CARGO_BIN_EXE_polaron-scanner")));

    let manager = PluginManager::with_discoverers(
        fx.settings.clone(),
        vec![Box::new(Vst2Discoverer::new())],
    );

    manager.refresh(false);
    let list = manager.plugins(PluginFormat::Vst2);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].name, "RealComp");

    // the child wrote the cache, the supervisor confirmed and delisted
    assert!(manager.blacklisted(PluginFormat::Vst2).is_empty());
    let store = polaron::CacheStore::new(&fx.settings.cache_dir);
    assert!(store
        .valid_cache_for(PluginFormat::Vst2, &Candidate::path(&module))
        .is_some());

    // scanner output was folded into the scan log trail
    let entry = manager
        .scan_log_entries()
        .into_iter()
        .find(|e| e.candidate.id_string() == module.to_string_lossy())
        .unwrap();
    assert_eq!(entry.result, ScanOutcome::Ok);
    assert!(entry
        .messages
        .iter()
        .any(|m| m.text.contains("cache written")));
}

#[test]
fn test_duplicate_unique_ids_are_merged() {
    let mut fx = Fixture::new();
    let plugins = fx.plugin_dir("lv2");
    let a = plugins.join("alpha.lv2");
    let b = plugins.join("beta.lv2");
    fs::create_dir_all(&a).unwrap();
    fs::create_dir_all(&b).unwrap();
    fx.settings.lv2_paths.push(plugins);

    let probe = Arc::new(
        MockProbe::new()
            .with_success(
                &a.to_string_lossy(),
                vec![MockProbe::record(PluginFormat::Lv2, "dup", "Alpha", "")],
            )
            .with_success(
                &b.to_string_lossy(),
                vec![MockProbe::record(PluginFormat::Lv2, "dup", "Beta", "")],
            ),
    );
    let manager = PluginManager::with_discoverers(
        fx.settings.clone(),
        vec![Box::new(Lv2Discoverer::with_probe(probe))],
    );

    manager.refresh(false);
    let list = manager.plugins(PluginFormat::Lv2);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].name, "Alpha");

    let loser = manager
        .scan_log_entries()
        .into_iter()
        .find(|e| e.candidate.id_string() == b.to_string_lossy())
        .unwrap();
    assert!(loser.messages.iter().any(|m| m.text.contains("duplicate")));
}

fn same_name_pair_discoverers(
    fx: &mut Fixture,
) -> (Box<dyn FormatDiscoverer>, Box<dyn FormatDiscoverer>) {
    let vst2_dir = fx.plugin_dir("vst");
    let vst3_dir = fx.plugin_dir("vst3");
    let old = fx.write_elf(&vst2_dir, "Comp.so");
    let new = vst3_dir.join("Comp.vst3");
    fs::create_dir_all(&new).unwrap();
    fx.settings.vst2_paths.push(vst2_dir);
    fx.settings.vst3_paths.push(vst3_dir);

    let vst2_probe = Arc::new(MockProbe::new().with_success(
        &old.to_string_lossy(),
        vec![MockProbe::record(PluginFormat::Vst2, "legacy", "Comp", "")],
    ));
    let vst3_probe = Arc::new(MockProbe::new().with_success(
        &new.to_string_lossy(),
        vec![MockProbe::record(PluginFormat::Vst3, "modern", "Comp", "")],
    ));
    (
        Box::new(Vst2Discoverer::with_probe(vst2_probe)),
        Box::new(Vst3Discoverer::with_probe(vst3_probe)),
    )
}

#[test]
fn test_cross_format_twins_are_type_ambiguous() {
    let mut fx = Fixture::new();
    let (vst2, vst3) = same_name_pair_discoverers(&mut fx);
    fx.settings.conceal_vst2_if_vst3_exists = false;
    let manager = PluginManager::with_discoverers(fx.settings.clone(), vec![vst2, vst3]);

    manager.refresh(false);
    let all = manager.all_plugins();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|r| r.type_ambiguous));
    // equal max output counts: no name ambiguity
    assert!(all.iter().all(|r| !r.name_ambiguous));
}

#[test]
fn test_concealment_policy_toggle() {
    let mut fx = Fixture::new();
    let (vst2, vst3) = same_name_pair_discoverers(&mut fx);
    fx.settings.conceal_vst2_if_vst3_exists = true;
    let manager = PluginManager::with_discoverers(fx.settings.clone(), vec![vst2, vst3]);

    manager.refresh(false);
    let vst2_key = manager.plugins(PluginFormat::Vst2)[0].key();
    let vst3_key = manager.plugins(PluginFormat::Vst3)[0].key();

    // exactly one non-concealed record for the pair
    assert_eq!(manager.status(&vst2_key), PluginStatusKind::Concealed);
    assert_eq!(manager.status(&vst3_key), PluginStatusKind::Normal);

    // disabling the policy un-conceals without a rescan
    manager.set_conceal_policy(false);
    assert_eq!(manager.status(&vst2_key), PluginStatusKind::Normal);
}

#[test]
fn test_single_item_rescan() {
    let mut fx = Fixture::new();
    let plugins = fx.plugin_dir("clap");
    let module = fx.write_elf(&plugins, "one.clap");
    fx.settings.clap_paths.push(plugins);

    let probe = Arc::new(CountingProbe::new());
    let manager = PluginManager::with_discoverers(
        fx.settings.clone(),
        vec![Box::new(ClapDiscoverer::with_probe(probe.clone()))],
    );
    manager.refresh(false);
    assert_eq!(probe.calls(), 1);

    // rescan bypasses the valid cache and probes again
    assert!(manager.rescan(PluginFormat::Clap, &Candidate::path(&module)));
    assert_eq!(probe.calls(), 2);
    assert_eq!(manager.plugins(PluginFormat::Clap).len(), 1);
}

#[test]
fn test_status_tags_stats_roundtrip() {
    let fx = Fixture::new();
    let manager = PluginManager::with_discoverers(fx.settings.clone(), Vec::new());
    let key = polaron::PluginKey::new(PluginFormat::Vst3, "abc");

    manager.set_status(key.clone(), PluginStatusKind::Favorite);
    manager.set_tags(key.clone(), "Reverb HALL", polaron::TagType::FromGui);
    manager.bump_stats(key.clone());
    manager.bump_stats(key.clone());

    // a second manager over the same directories sees the persisted state
    let manager2 = PluginManager::with_discoverers(fx.settings.clone(), Vec::new());
    assert_eq!(manager2.status(&key), PluginStatusKind::Favorite);
    assert_eq!(manager2.tags(&key).unwrap().tags, "reverb hall");
    assert_eq!(manager2.stats(&key).unwrap().use_count, 2);
}
