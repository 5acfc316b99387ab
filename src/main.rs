//! Polaron CLI - command-line interface for the plugin discovery engine

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use polaron::{
    Candidate, PluginFormat, PluginKey, PluginManager, PluginStatusKind, ScanEvent, Settings,
    TagType,
};

#[derive(Parser)]
#[command(name = "polaron")]
#[command(about = "Polaron plugin discovery engine", long_about = None)]
struct Cli {
    /// Override the config directory
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Override the cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a discovery pass over every enabled plugin format
    Scan {
        /// Use cached metadata only; never launch a scanner process
        #[arg(long)]
        cache_only: bool,

        /// Override the scan timeout in deciseconds (0 disables it)
        #[arg(short, long)]
        timeout: Option<i64>,
    },

    /// List discovered plugins
    List {
        /// Restrict to one format (VST2, VST3, AU, LV2, CLAP)
        #[arg(short, long)]
        format: Option<String>,

        /// Include hidden and concealed plugins
        #[arg(long)]
        all: bool,
    },

    /// Show or set a plugin's status
    Status {
        format: String,
        id: String,

        /// New status: normal, favorite or hidden
        #[arg(long)]
        set: Option<String>,
    },

    /// Show or set a plugin's tags
    Tags {
        format: String,
        id: String,

        /// Replace the tags (lowercase, space-separated)
        #[arg(long)]
        set: Option<String>,

        /// Revert to the factory default tags
        #[arg(long)]
        reset: bool,
    },

    /// Inspect or edit a format's blacklist
    Blacklist {
        format: String,

        /// Add a candidate to the blacklist
        #[arg(long)]
        add: Option<String>,

        /// Remove a candidate (whitelist it)
        #[arg(long)]
        remove: Option<String>,

        /// Clear the whole blacklist for this format
        #[arg(long)]
        clear: bool,
    },

    /// Rescan a single candidate, bypassing its cache
    Rescan { format: String, candidate: String },

    /// Show the scan log
    Log {
        /// Only entries whose last scan did not succeed
        #[arg(long)]
        problems: bool,

        /// Drop entries whose candidate no longer exists
        #[arg(long)]
        clear_stale: bool,
    },

    /// Drop cached plugin metadata
    ClearCache {
        /// Restrict to one format
        #[arg(short, long)]
        format: Option<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let settings = {
        let config_dir = cli
            .config_dir
            .clone()
            .unwrap_or_else(|| Settings::default().config_dir);
        let cache_dir = cli
            .cache_dir
            .clone()
            .unwrap_or_else(|| Settings::default().cache_dir);
        Settings::load(config_dir, cache_dir)
    };

    match run(cli.command, settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn parse_format(raw: &str) -> Result<PluginFormat, String> {
    raw.parse()
}

fn run(command: Commands, mut settings: Settings) -> Result<(), String> {
    match command {
        Commands::Scan {
            cache_only,
            timeout,
        } => {
            if let Some(timeout) = timeout {
                settings.scan_timeout = timeout;
            }
            let manager = PluginManager::new(settings);
            let events = manager.subscribe();

            let printer = std::thread::spawn(move || {
                for event in events {
                    match event {
                        ScanEvent::Scanning { format, candidate } => {
                            println!("scanning [{}] {}", format, candidate);
                        }
                        ScanEvent::ListChanged { total } => {
                            println!("scan complete: {} plugins", total);
                            break;
                        }
                    }
                }
            });

            let ran = manager.refresh(cache_only);
            printer.join().ok();
            if !ran {
                return Err("a scan is already running".to_string());
            }

            let problems = manager.problems();
            if !problems.is_empty() {
                println!("\n{} problem plugin(s):", problems.len());
                for entry in problems {
                    println!("  [{}] {} - {}", entry.format, entry.candidate, entry.result);
                }
            }
            Ok(())
        }

        Commands::List { format, all } => {
            let manager = PluginManager::new(settings);
            manager.refresh(true);

            let plugins = match format {
                Some(f) => manager.plugins(parse_format(&f)?),
                None => manager.all_plugins(),
            };
            for plugin in plugins {
                let status = manager.status(&plugin.key());
                if !all
                    && matches!(
                        status,
                        PluginStatusKind::Hidden | PluginStatusKind::Concealed
                    )
                {
                    continue;
                }
                let mut flags = String::new();
                if status == PluginStatusKind::Favorite {
                    flags.push('*');
                }
                if plugin.name_ambiguous {
                    flags.push('n');
                }
                if plugin.type_ambiguous {
                    flags.push('t');
                }
                println!(
                    "[{}] {:40} {:24} {:16} {}",
                    plugin.format, plugin.name, plugin.creator, flags, plugin.path
                );
            }
            Ok(())
        }

        Commands::Status { format, id, set } => {
            let format = parse_format(&format)?;
            let manager = PluginManager::new(settings);
            let key = PluginKey::new(format, id);
            match set {
                Some(raw) => {
                    let status: PluginStatusKind = raw.parse()?;
                    manager.set_status(key, status);
                }
                None => println!("{}", manager.status(&key)),
            }
            Ok(())
        }

        Commands::Tags {
            format,
            id,
            set,
            reset,
        } => {
            let format = parse_format(&format)?;
            let manager = PluginManager::new(settings);
            let key = PluginKey::new(format, id);
            if reset {
                match manager.factory_tags(&key) {
                    Some(factory) => manager.set_tags(key, &factory, TagType::FromGui),
                    None => return Err("no factory tags recorded for this plugin".to_string()),
                }
            } else if let Some(tags) = set {
                manager.set_tags(key, &tags, TagType::FromGui);
            } else {
                match manager.tags(&key) {
                    Some(tag) => println!("{}", tag.tags),
                    None => println!(),
                }
            }
            Ok(())
        }

        Commands::Blacklist {
            format,
            add,
            remove,
            clear,
        } => {
            let format = parse_format(&format)?;
            let manager = PluginManager::new(settings);
            if clear {
                manager.clear_blacklist(format).map_err(|e| e.to_string())?;
                return Ok(());
            }
            if let Some(candidate) = add {
                manager
                    .blacklist_candidate(format, &Candidate::path(candidate))
                    .map_err(|e| e.to_string())?;
                return Ok(());
            }
            if let Some(candidate) = remove {
                manager
                    .whitelist_candidate(format, &Candidate::path(candidate))
                    .map_err(|e| e.to_string())?;
                return Ok(());
            }
            for entry in manager.blacklisted(format) {
                println!("{}", entry);
            }
            Ok(())
        }

        Commands::Rescan { format, candidate } => {
            let format = parse_format(&format)?;
            let manager = PluginManager::new(settings);
            // restore the cached view of everything else first
            manager.refresh(true);
            if manager.rescan(format, &Candidate::path(candidate)) {
                println!("rescan succeeded");
                Ok(())
            } else {
                Err("rescan produced no plugins; see the scan log".to_string())
            }
        }

        Commands::Log {
            problems,
            clear_stale,
        } => {
            let manager = PluginManager::new(settings);
            if clear_stale {
                manager.clear_stale_scan_log().map_err(|e| e.to_string())?;
            }
            let entries = if problems {
                manager.problems()
            } else {
                manager.scan_log_entries()
            };
            for entry in entries {
                println!("[{}] {} - {}", entry.format, entry.candidate, entry.result);
                for message in &entry.messages {
                    println!("    {}", message.text);
                }
            }
            Ok(())
        }

        Commands::ClearCache { format } => {
            let manager = PluginManager::new(settings);
            let formats: Vec<PluginFormat> = match format {
                Some(f) => vec![parse_format(&f)?],
                None => PluginFormat::ALL.to_vec(),
            };
            for format in formats {
                manager.clear_cache(format).map_err(|e| e.to_string())?;
            }
            Ok(())
        }
    }
}
