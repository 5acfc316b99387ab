//! Plugin manager
//!
//! The orchestrator owns one discoverer per plugin format plus all the
//! persistent stores, serializes full refresh passes behind a non-blocking
//! try-lock, merges per-format results, detects name/type ambiguities and
//! format concealment, and exposes the read API collaborators use (plugin
//! lists, status, tags, usage stats).
//!
//! Collaborators subscribe to a channel rather than polling: every processed
//! candidate produces a progress event, and a completed refresh publishes a
//! list-changed event carrying the merged plugin count.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::blacklist::Blacklist;
use crate::cache::CacheStore;
use crate::config::Settings;
use crate::discoverer::{
    discover_format, scan_candidate, AuDiscoverer, ClapDiscoverer, DiscoveryContext,
    FormatDiscoverer, Lv2Discoverer, Vst2Discoverer, Vst3Discoverer,
};
use crate::process::CancelControl;
use crate::scan_log::{ScanLog, ScanLogEntry};
use crate::stats::{PluginStats, StatsStore};
use crate::status::{PluginStatusKind, StatusStore};
use crate::tags::{PluginTag, TagStore, TagType};
use crate::types::{Candidate, PluginFormat, PluginKey, PluginRecord, ScanResult};

/// Formats whose plugins are concealed when the same creator/name pair is
/// also available through a newer format
const SUPERSEDED: [(PluginFormat, PluginFormat); 1] = [(PluginFormat::Vst2, PluginFormat::Vst3)];

/// Events published to subscribers
#[derive(Clone, Debug)]
pub enum ScanEvent {
    /// A candidate is about to be processed
    Scanning {
        format: PluginFormat,
        candidate: String,
    },
    /// A refresh (or single-item rescan) finished; carries the merged count
    ListChanged { total: usize },
}

/// Everything a scan pass touches, guarded by the refresh try-lock
struct ScanShared {
    settings: Settings,
    blacklist: Blacklist,
    cache: CacheStore,
    scan_log: ScanLog,
    discoverers: Vec<Box<dyn FormatDiscoverer>>,
}

/// Status, tag and stats stores, independent of the scan lock
struct MetaStores {
    statuses: StatusStore,
    tags: TagStore,
    stats: StatsStore,
}

/// Discovery orchestrator
///
/// Constructed once at startup and shared by reference with collaborators;
/// its lists are rebuilt wholesale by `refresh` and handed out as clones.
pub struct PluginManager {
    scan: Mutex<ScanShared>,
    meta: Mutex<MetaStores>,
    lists: Mutex<HashMap<PluginFormat, Vec<PluginRecord>>>,
    cancel: CancelControl,
    subscribers: Mutex<Vec<Sender<ScanEvent>>>,
}

impl PluginManager {
    /// Manager with the standard discoverer per format
    pub fn new(settings: Settings) -> Self {
        let discoverers: Vec<Box<dyn FormatDiscoverer>> = vec![
            Box::new(Lv2Discoverer::new()),
            Box::new(ClapDiscoverer::new()),
            Box::new(Vst2Discoverer::new()),
            Box::new(Vst3Discoverer::new()),
            Box::new(AuDiscoverer::new()),
        ];
        Self::with_discoverers(settings, discoverers)
    }

    /// Manager with caller-supplied discoverers (tests, embedders)
    pub fn with_discoverers(
        settings: Settings,
        discoverers: Vec<Box<dyn FormatDiscoverer>>,
    ) -> Self {
        let blacklist = Blacklist::new(&settings.cache_dir);
        let cache = CacheStore::new(&settings.cache_dir);
        let mut scan_log = ScanLog::new(&settings.cache_dir);
        scan_log.load();

        let mut statuses = StatusStore::new(&settings.config_dir);
        statuses.load();
        let mut tags = TagStore::new(&settings.config_dir);
        tags.load();
        let mut stats = StatsStore::new(&settings.config_dir);
        stats.load();

        Self {
            scan: Mutex::new(ScanShared {
                settings,
                blacklist,
                cache,
                scan_log,
                discoverers,
            }),
            meta: Mutex::new(MetaStores {
                statuses,
                tags,
                stats,
            }),
            lists: Mutex::new(HashMap::new()),
            cancel: CancelControl::new(),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to scan progress and list-changed events
    pub fn subscribe(&self) -> Receiver<ScanEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    fn publish(&self, event: ScanEvent) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|s| s.send(event.clone()).is_ok());
    }

    /// Run a full discovery pass over every format.
    ///
    /// Returns `false` without doing anything when a pass is already in
    /// flight; the concurrent caller simply keeps seeing the previous
    /// pass's results. With `cache_only` no scanner process is launched and
    /// candidates lacking a valid cache are left out of this pass.
    pub fn refresh(&self, cache_only: bool) -> bool {
        let Ok(mut scan) = self.scan.try_lock() else {
            info!("refresh already running, ignoring");
            return false;
        };
        info!("plugin refresh started (cache_only: {})", cache_only);

        self.cancel.reset_pass();

        let shared = &mut *scan;
        shared.scan_log.load();

        // crash guard: automatic AU discovery is switched off on disk while
        // the scan runs, so a scan that kills the host leaves it off
        let au_live = !cache_only && shared.settings.discover_audio_units;
        if au_live {
            shared.settings.discover_audio_units = false;
            if let Err(e) = shared.settings.save() {
                warn!("cannot persist settings for AU crash guard: {}", e);
            }
        }

        let mut merged: HashMap<PluginFormat, Vec<PluginRecord>> = HashMap::new();
        let progress = |format: PluginFormat, candidate: &Candidate| {
            self.publish(ScanEvent::Scanning {
                format,
                candidate: candidate.id_string(),
            });
        };

        for disc in &shared.discoverers {
            let format = disc.format();
            let disc_cache_only = match format {
                // without the opt-in, Audio Units are never probed live
                PluginFormat::AudioUnit => cache_only || !au_live,
                _ => cache_only,
            };
            let mut ctx = DiscoveryContext {
                settings: &shared.settings,
                blacklist: &shared.blacklist,
                cache: &shared.cache,
                scan_log: &mut shared.scan_log,
                cancel: &self.cancel,
                progress: Some(&progress),
            };
            let records = discover_format(disc.as_ref(), &mut ctx, disc_cache_only);
            info!("{}: {} plugins", format, records.len());
            merged.insert(format, records);
        }

        if au_live {
            shared.settings.discover_audio_units = true;
            if let Err(e) = shared.settings.save() {
                warn!("cannot restore settings after AU scan: {}", e);
            }
        }

        if let Err(e) = shared.scan_log.save() {
            warn!("cannot persist scan log: {}", e);
        }

        detect_ambiguities(&mut merged);

        {
            let mut meta = self.meta.lock().unwrap();
            // seed tags from plugin metadata; user-origin tags outrank these
            // and are never clobbered
            for records in merged.values() {
                for record in records {
                    if !record.category.is_empty() && record.category != "Unknown" {
                        meta.tags
                            .set_tags(record.key(), &record.category, TagType::FromPlug);
                    }
                }
            }
            if let Err(e) = meta.tags.save() {
                warn!("cannot persist plugin tags: {}", e);
            }
            apply_concealment(
                &merged,
                &mut meta.statuses,
                shared.settings.conceal_vst2_if_vst3_exists,
            );
        }

        let total: usize = merged.values().map(|v| v.len()).sum();
        *self.lists.lock().unwrap() = merged;
        drop(scan);

        info!("plugin refresh complete: {} plugins", total);
        self.publish(ScanEvent::ListChanged { total });
        true
    }

    /// Rescan one candidate outside a full pass, with the same
    /// blacklist-before/confirm-after discipline. The candidate must first
    /// be whitelisted if it was blacklisted by an earlier failure.
    pub fn rescan(&self, format: PluginFormat, candidate: &Candidate) -> bool {
        let Ok(mut scan) = self.scan.try_lock() else {
            info!("refresh already running, ignoring rescan");
            return false;
        };
        self.cancel.reset_pass();

        let shared = &mut *scan;
        // force a live scan even if a cache exists
        if let Err(e) = shared.cache.remove(format, candidate) {
            warn!("cannot drop cache for {}: {}", candidate, e);
        }

        let Some(disc) = shared
            .discoverers
            .iter()
            .find(|d| d.format() == format)
        else {
            warn!("no discoverer for format {}", format);
            return false;
        };

        let mut ctx = DiscoveryContext {
            settings: &shared.settings,
            blacklist: &shared.blacklist,
            cache: &shared.cache,
            scan_log: &mut shared.scan_log,
            cancel: &self.cancel,
            progress: None,
        };
        let found = scan_candidate(disc.as_ref(), candidate, &mut ctx, false);

        if let Err(e) = shared.scan_log.save() {
            warn!("cannot persist scan log: {}", e);
        }

        let mut lists = self.lists.lock().unwrap();
        let records = lists.entry(format).or_default();
        // this candidate's previous records are replaced wholesale
        records.retain(|r| r.path != candidate.id_string());
        let mut changed = false;
        if let Some(found) = found {
            let seen: HashSet<String> = records.iter().map(|r| r.unique_id.clone()).collect();
            for record in found {
                if seen.contains(&record.unique_id) {
                    warn!(
                        "{}: ignoring duplicate plugin \"{}\" during rescan",
                        format, record.name
                    );
                    continue;
                }
                records.push(record);
                changed = true;
            }
        }

        detect_ambiguities(&mut lists);
        {
            let mut meta = self.meta.lock().unwrap();
            apply_concealment(
                &lists,
                &mut meta.statuses,
                shared.settings.conceal_vst2_if_vst3_exists,
            );
        }
        let total: usize = lists.values().map(|v| v.len()).sum();
        drop(lists);
        drop(scan);

        self.publish(ScanEvent::ListChanged { total });
        changed
    }

    /// Cancel the whole in-flight pass
    pub fn cancel_scan(&self) {
        self.cancel.cancel_all();
    }

    /// Cancel only the candidate currently being scanned
    pub fn cancel_scan_one(&self) {
        self.cancel.cancel_one();
    }

    /// Suspend or resume scan timeout enforcement, effective immediately
    /// for an in-flight scanner process
    pub fn set_timeout_disabled(&self, disabled: bool) {
        self.cancel.set_timeout_disabled(disabled);
    }

    /// Merged, deduplicated, ambiguity-annotated list for one format
    pub fn plugins(&self, format: PluginFormat) -> Vec<PluginRecord> {
        self.lists
            .lock()
            .unwrap()
            .get(&format)
            .cloned()
            .unwrap_or_default()
    }

    /// All plugins across formats, in format order
    pub fn all_plugins(&self) -> Vec<PluginRecord> {
        let lists = self.lists.lock().unwrap();
        let mut out = Vec::new();
        for format in PluginFormat::ALL {
            if let Some(records) = lists.get(&format) {
                out.extend(records.iter().cloned());
            }
        }
        out
    }

    pub fn status(&self, key: &PluginKey) -> PluginStatusKind {
        self.meta.lock().unwrap().statuses.status(key)
    }

    pub fn set_status(&self, key: PluginKey, status: PluginStatusKind) {
        let mut meta = self.meta.lock().unwrap();
        meta.statuses.set_status(key, status);
        if let Err(e) = meta.statuses.save() {
            warn!("cannot persist plugin statuses: {}", e);
        }
    }

    pub fn tags(&self, key: &PluginKey) -> Option<PluginTag> {
        self.meta.lock().unwrap().tags.tags(key).cloned()
    }

    pub fn factory_tags(&self, key: &PluginKey) -> Option<String> {
        self.meta
            .lock()
            .unwrap()
            .tags
            .factory_tags(key)
            .map(|s| s.to_string())
    }

    pub fn set_tags(&self, key: PluginKey, tags: &str, tagtype: TagType) {
        let mut meta = self.meta.lock().unwrap();
        meta.tags.set_tags(key, tags, tagtype);
        if let Err(e) = meta.tags.save() {
            warn!("cannot persist plugin tags: {}", e);
        }
    }

    pub fn stats(&self, key: &PluginKey) -> Option<PluginStats> {
        self.meta.lock().unwrap().stats.stats(key)
    }

    /// Record that a collaborator just instantiated a plugin
    pub fn bump_stats(&self, key: PluginKey) {
        let mut meta = self.meta.lock().unwrap();
        meta.stats.bump(key);
        if let Err(e) = meta.stats.save() {
            warn!("cannot persist plugin stats: {}", e);
        }
    }

    /// Scan log entries whose last attempt did not succeed
    pub fn problems(&self) -> Vec<ScanLogEntry> {
        let scan = self.scan.lock().unwrap();
        scan.scan_log.problems().into_iter().cloned().collect()
    }

    /// All scan log entries
    pub fn scan_log_entries(&self) -> Vec<ScanLogEntry> {
        let scan = self.scan.lock().unwrap();
        scan.scan_log.entries().cloned().collect()
    }

    /// Drop scan log entries whose candidate no longer exists
    pub fn clear_stale_scan_log(&self) -> ScanResult<()> {
        let mut scan = self.scan.lock().unwrap();
        scan.scan_log.clear_stale();
        scan.scan_log.save()
    }

    /// Current blacklist for one format
    pub fn blacklisted(&self, format: PluginFormat) -> Vec<String> {
        self.scan.lock().unwrap().blacklist.entries(format)
    }

    /// Explicit user command: add to the blacklist
    pub fn blacklist_candidate(
        &self,
        format: PluginFormat,
        candidate: &Candidate,
    ) -> ScanResult<()> {
        self.scan.lock().unwrap().blacklist.blacklist(format, candidate)
    }

    /// Explicit user command: remove from the blacklist so the next scan
    /// may retry the candidate
    pub fn whitelist_candidate(
        &self,
        format: PluginFormat,
        candidate: &Candidate,
    ) -> ScanResult<()> {
        self.scan.lock().unwrap().blacklist.whitelist(format, candidate)
    }

    /// Explicit user command: clear a format's whole blacklist
    pub fn clear_blacklist(&self, format: PluginFormat) -> ScanResult<()> {
        self.scan.lock().unwrap().blacklist.clear(format)
    }

    /// Explicit user command: drop every cache file for a format
    pub fn clear_cache(&self, format: PluginFormat) -> ScanResult<()> {
        self.scan.lock().unwrap().cache.clear_format(format)
    }

    /// Snapshot of the current settings
    pub fn settings(&self) -> Settings {
        self.scan.lock().unwrap().settings.clone()
    }

    /// Enable or disable concealment of superseded-format plugins.
    ///
    /// Recomputed immediately over the current lists: disabling un-conceals
    /// previously concealed plugins without any rescanning.
    pub fn set_conceal_policy(&self, conceal: bool) {
        let mut scan = self.scan.lock().unwrap();
        scan.settings.conceal_vst2_if_vst3_exists = conceal;
        if let Err(e) = scan.settings.save() {
            warn!("cannot persist settings: {}", e);
        }
        let lists = self.lists.lock().unwrap();
        let mut meta = self.meta.lock().unwrap();
        apply_concealment(&lists, &mut meta.statuses, conceal);
    }
}

/// Mark name ambiguity within each format, then type ambiguity across the
/// whole merged list.
///
/// Within one format, a run of equal (case-insensitive) names is only
/// flagged when the members' maximum output counts differ; identical counts
/// leave nothing for the UI to disambiguate on. Across formats, any run of
/// equal names spanning more than one format flags every member, and an
/// already name-ambiguous member spreads name ambiguity to the whole run
/// for display consistency.
fn detect_ambiguities(lists: &mut HashMap<PluginFormat, Vec<PluginRecord>>) {
    // the flags are per-pass; a rescan may have removed a twin
    for records in lists.values_mut() {
        for r in records.iter_mut() {
            r.name_ambiguous = false;
            r.type_ambiguous = false;
        }
    }

    for records in lists.values_mut() {
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, r) in records.iter().enumerate() {
            groups.entry(r.name.to_lowercase()).or_default().push(i);
        }
        for members in groups.values().filter(|m| m.len() > 1) {
            let outputs: HashSet<i32> = members.iter().map(|&i| records[i].max_outputs()).collect();
            if outputs.len() > 1 {
                for &i in members {
                    records[i].name_ambiguous = true;
                }
            }
        }
    }

    let mut groups: HashMap<String, Vec<(PluginFormat, usize)>> = HashMap::new();
    for (format, records) in lists.iter() {
        for (i, r) in records.iter().enumerate() {
            groups
                .entry(r.name.to_lowercase())
                .or_default()
                .push((*format, i));
        }
    }
    for members in groups.values().filter(|m| m.len() > 1) {
        let formats: HashSet<PluginFormat> = members.iter().map(|(f, _)| *f).collect();
        if formats.len() < 2 {
            continue;
        }
        let spread_name = members
            .iter()
            .any(|(f, i)| lists[f][*i].name_ambiguous);
        for (format, i) in members {
            let record = &mut lists.get_mut(format).unwrap()[*i];
            record.type_ambiguous = true;
            if spread_name {
                record.name_ambiguous = true;
            }
        }
    }
}

/// Conceal (or un-conceal) plugins whose creator/name pair is also served
/// by a superseding format
fn apply_concealment(
    lists: &HashMap<PluginFormat, Vec<PluginRecord>>,
    statuses: &mut StatusStore,
    conceal: bool,
) {
    for (older, newer) in SUPERSEDED {
        let Some(older_records) = lists.get(&older) else {
            continue;
        };
        let newer_pairs: HashSet<(String, String)> = lists
            .get(&newer)
            .map(|records| {
                records
                    .iter()
                    .map(|r| (r.creator.to_lowercase(), r.name.to_lowercase()))
                    .collect()
            })
            .unwrap_or_default();

        for record in older_records {
            let pair = (record.creator.to_lowercase(), record.name.to_lowercase());
            let key = record.key();
            if conceal && newer_pairs.contains(&pair) {
                statuses.set_status(key, PluginStatusKind::Concealed);
            } else if statuses.status(&key) == PluginStatusKind::Concealed {
                statuses.set_status(key, PluginStatusKind::Normal);
            }
        }
    }
}
