//! Plugin search paths
//!
//! Per-format search path resolution: an environment override wins outright,
//! then paths configured in [`Settings`](crate::config::Settings), then the
//! platform's standard install locations.

use std::env;
use std::path::PathBuf;

use crate::config::Settings;
use crate::types::PluginFormat;

/// Environment variable overriding the search path for a format
pub fn env_var_for(format: PluginFormat) -> &'static str {
    match format {
        PluginFormat::Lv2 => "POLARON_LV2_PATH",
        PluginFormat::Clap => "POLARON_CLAP_PATH",
        PluginFormat::Vst2 => "POLARON_VST2_PATH",
        PluginFormat::Vst3 => "POLARON_VST3_PATH",
        PluginFormat::AudioUnit => "POLARON_AU_PATH",
    }
}

/// Resolve the search path list for one format
pub fn search_paths(format: PluginFormat, settings: &Settings) -> Vec<PathBuf> {
    if let Ok(value) = env::var(env_var_for(format)) {
        if !value.is_empty() {
            return env::split_paths(&value).collect();
        }
    }

    let configured = match format {
        PluginFormat::Lv2 => &settings.lv2_paths,
        PluginFormat::Clap => &settings.clap_paths,
        PluginFormat::Vst2 => &settings.vst2_paths,
        PluginFormat::Vst3 => &settings.vst3_paths,
        PluginFormat::AudioUnit => return Vec::new(),
    };
    if !configured.is_empty() {
        return configured.clone();
    }
    default_paths(format)
}

/// Platform-standard install locations for a format
pub fn default_paths(format: PluginFormat) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "linux")]
    {
        let home = env::var("HOME").ok();
        let push_home = |paths: &mut Vec<PathBuf>, suffix: &str| {
            if let Some(h) = &home {
                paths.push(PathBuf::from(format!("{}/{}", h, suffix)));
            }
        };

        match format {
            PluginFormat::Lv2 => {
                push_home(&mut paths, ".lv2");
                paths.push(PathBuf::from("/usr/lib/lv2"));
                paths.push(PathBuf::from("/usr/local/lib/lv2"));
            }
            PluginFormat::Clap => {
                push_home(&mut paths, ".clap");
                paths.push(PathBuf::from("/usr/lib/clap"));
                paths.push(PathBuf::from("/usr/local/lib/clap"));
            }
            PluginFormat::Vst2 => {
                push_home(&mut paths, ".vst");
                paths.push(PathBuf::from("/usr/lib/vst"));
                paths.push(PathBuf::from("/usr/local/lib/vst"));
                paths.push(PathBuf::from("/usr/lib/lxvst"));
                paths.push(PathBuf::from("/usr/local/lib/lxvst"));
            }
            PluginFormat::Vst3 => {
                push_home(&mut paths, ".vst3");
                paths.push(PathBuf::from("/usr/lib/vst3"));
                paths.push(PathBuf::from("/usr/local/lib/vst3"));
            }
            PluginFormat::AudioUnit => {}
        }
    }

    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").ok();
        let push_home = |paths: &mut Vec<PathBuf>, suffix: &str| {
            if let Some(h) = &home {
                paths.push(PathBuf::from(format!("{}/{}", h, suffix)));
            }
        };

        match format {
            PluginFormat::Lv2 => {
                push_home(&mut paths, "Library/Audio/Plug-Ins/LV2");
                paths.push(PathBuf::from("/Library/Audio/Plug-Ins/LV2"));
            }
            PluginFormat::Clap => {
                push_home(&mut paths, "Library/Audio/Plug-Ins/CLAP");
                paths.push(PathBuf::from("/Library/Audio/Plug-Ins/CLAP"));
            }
            PluginFormat::Vst2 => {
                push_home(&mut paths, "Library/Audio/Plug-Ins/VST");
                paths.push(PathBuf::from("/Library/Audio/Plug-Ins/VST"));
            }
            PluginFormat::Vst3 => {
                push_home(&mut paths, "Library/Audio/Plug-Ins/VST3");
                paths.push(PathBuf::from("/Library/Audio/Plug-Ins/VST3"));
            }
            PluginFormat::AudioUnit => {}
        }
    }

    #[cfg(target_os = "windows")]
    {
        match format {
            PluginFormat::Lv2 => {
                paths.push(PathBuf::from("C:\\Program Files\\Common Files\\LV2"));
            }
            PluginFormat::Clap => {
                paths.push(PathBuf::from("C:\\Program Files\\Common Files\\CLAP"));
            }
            PluginFormat::Vst2 => {
                paths.push(PathBuf::from("C:\\Program Files\\Steinberg\\VstPlugins"));
                paths.push(PathBuf::from("C:\\Program Files\\Common Files\\VST2"));
            }
            PluginFormat::Vst3 => {
                paths.push(PathBuf::from("C:\\Program Files\\Common Files\\VST3"));
            }
            PluginFormat::AudioUnit => {}
        }
    }

    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_override_wins() {
        let mut settings = Settings::default();
        settings.clap_paths.push(PathBuf::from("/opt/clap"));
        env::set_var("POLARON_CLAP_PATH", "/tmp/clap-one:/tmp/clap-two");
        let paths = search_paths(PluginFormat::Clap, &settings);
        env::remove_var("POLARON_CLAP_PATH");

        assert_eq!(
            paths,
            vec![PathBuf::from("/tmp/clap-one"), PathBuf::from("/tmp/clap-two")]
        );
    }

    #[test]
    fn test_settings_paths_replace_defaults() {
        let mut settings = Settings::default();
        settings.vst3_paths.push(PathBuf::from("/opt/vst3"));
        let paths = search_paths(PluginFormat::Vst3, &settings);
        assert_eq!(paths, vec![PathBuf::from("/opt/vst3")]);
    }
}
