//! Polaron scanner - isolated plugin probe process
//!
//! Probes exactly one candidate and writes one cache file, then exits. The
//! supervising host judges the scan purely by the exit status and by the
//! presence of a valid cache file; everything printed here is captured into
//! the host's scan log. Running the probe in this throwaway process is what
//! keeps a crashing or hanging plugin from taking the host down.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use polaron::cache::CacheStore;
use polaron::probe::{FileProbe, PluginProbe};
use polaron::types::{Candidate, PluginFormat};

#[derive(Parser)]
#[command(name = "polaron-scanner")]
#[command(about = "Probe one plugin candidate and write its cache file", long_about = None)]
struct Cli {
    /// Plugin format of the candidate (VST2, VST3, AU, LV2, CLAP)
    #[arg(short, long)]
    format: String,

    /// Print progress while probing
    #[arg(short, long)]
    verbose: bool,

    /// Candidate: a module/bundle path, or type:subtype:vendor for AU
    candidate: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let format: PluginFormat = match cli.format.parse() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let candidate = parse_candidate(format, &cli.candidate);

    // the supervising host exports the cache directory it will look in
    let cache_dir = std::env::var_os("POLARON_CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("polaron")
        });

    if cli.verbose {
        println!("probing {} candidate {}", format, candidate);
    }

    let plugins = match FileProbe::new().probe(format, &candidate) {
        Ok(plugins) => plugins,
        Err(e) => {
            println!("probe failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = CacheStore::new(&cache_dir);
    match store.write(format, &candidate, &plugins) {
        Ok(path) => {
            println!(
                "found {} plugin(s), cache written to {}",
                plugins.len(),
                path.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("cannot write cache file: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// AU candidates arrive as the component registry's three-part code;
/// everything else is a path
fn parse_candidate(format: PluginFormat, raw: &str) -> Candidate {
    if format == PluginFormat::AudioUnit {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() == 3 {
            return Candidate::Descriptor {
                ctype: parts[0].to_string(),
                subtype: parts[1].to_string(),
                vendor: parts[2].to_string(),
            };
        }
    }
    Candidate::path(raw)
}
