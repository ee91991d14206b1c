// Configuration module
// Reads INI-style configuration files with environment variable overrides,
// and resolves the data directories the terrain and navmesh caches read from

use anyhow::{bail, Context};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Configuration file parser
/// Supports INI-style files with environment variable override
pub struct Config {
    values: HashMap<String, String>,
    filename: String,
    env_prefix: String,
}

impl Config {
    pub fn new() -> Self {
        Config {
            values: HashMap::new(),
            filename: String::new(),
            env_prefix: String::new(),
        }
    }

    /// Load configuration from a file
    /// env_prefix is used to check environment variables (e.g., "MapNav_")
    pub fn set_source(&mut self, filename: &str, env_prefix: &str) -> anyhow::Result<()> {
        self.filename = filename.to_string();
        self.env_prefix = env_prefix.to_string();
        self.reload()
    }

    /// Reload the configuration file
    pub fn reload(&mut self) -> anyhow::Result<()> {
        let content = std::fs::read_to_string(Path::new(&self.filename))
            .with_context(|| format!("cannot read config file '{}'", self.filename))?;
        self.parse(&content);
        Ok(())
    }

    /// Replace the current values with the ones parsed from `content`
    pub fn parse(&mut self, content: &str) {
        self.values.clear();

        for line in content.lines() {
            let trimmed = line.trim();

            // Skip empty lines and comments
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            // Skip section headers [Section]
            if trimmed.starts_with('[') {
                continue;
            }

            if let Some((key, value)) = trimmed.split_once('=') {
                let mut value = value.trim();
                if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                    value = &value[1..value.len() - 1];
                }
                self.values.insert(key.trim().to_string(), value.to_string());
            }
        }
    }

    pub fn set_env_prefix(&mut self, env_prefix: &str) {
        self.env_prefix = env_prefix.to_string();
    }

    /// Value of `key`, empty when unset
    pub fn get_string(&self, key: &str) -> String {
        self.get_env_or_config(key).unwrap_or_default()
    }

    /// Try environment variable first, then config file
    fn get_env_or_config(&self, key: &str) -> Option<String> {
        // Convert key to env var name: replace '.' with '_', add prefix
        if !self.env_prefix.is_empty() {
            let env_key = format!("{}{}", self.env_prefix, key.replace('.', "_"));
            if let Ok(val) = std::env::var(&env_key) {
                return Some(val);
            }
        }

        self.values.get(key).cloned()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Root directories for each data kind.
///
/// `None` means the data kind is unconfigured: terrain falls back to default
/// tiles and path queries answer "no path".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataDirs {
    pub maps: Option<PathBuf>,
    pub vmaps: Option<PathBuf>,
    pub mmaps: Option<PathBuf>,
}

impl DataDirs {
    /// Resolve directories from `DataDir` plus the per-kind overrides
    /// `MapsDir`, `VMapsDir` and `MMapsDir`.
    pub fn from_config(config: &Config) -> Self {
        let base = non_empty(config.get_string("DataDir"));
        let resolve = |key: &str, sub: &str| {
            non_empty(config.get_string(key))
                .or_else(|| base.as_ref().map(|b| b.join(sub)))
        };

        DataDirs {
            maps: resolve("MapsDir", "maps"),
            vmaps: resolve("VMapsDir", "vmaps"),
            mmaps: resolve("MMapsDir", "mmaps"),
        }
    }

    /// Load a config file and resolve the directories from it
    pub fn from_file(filename: &str, env_prefix: &str) -> anyhow::Result<Self> {
        let mut config = Config::new();
        config.set_source(filename, env_prefix)?;
        let dirs = Self::from_config(&config);
        if dirs.maps.is_none() && dirs.mmaps.is_none() {
            bail!("'{}' configures neither DataDir, MapsDir nor MMapsDir", filename);
        }
        tracing::info!(
            "Data directories: maps={:?} vmaps={:?} mmaps={:?}",
            dirs.maps,
            dirs.vmaps,
            dirs.mmaps
        );
        Ok(dirs)
    }
}

fn non_empty(value: String) -> Option<PathBuf> {
    let value = value.trim();
    (!value.is_empty()).then(|| PathBuf::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_key_is_empty() {
        let config = Config::new();
        assert_eq!(config.get_string("nonexistent"), "");
    }

    #[test]
    fn test_parse_ini() {
        let mut config = Config::new();
        config.parse(
            "# comment\n[Paths]\nDataDir = \"/srv/data\"\n; other\nLogLevel=3\nBroken line\n",
        );
        assert_eq!(config.get_string("DataDir"), "/srv/data");
        assert_eq!(config.get_string("LogLevel"), "3");
        assert_eq!(config.get_string("Broken line"), "");
    }

    #[test]
    fn test_env_override() {
        let mut config = Config::new();
        config.parse("MMapsDir = /from/file\n");
        config.set_env_prefix("MapNavConfigTest_");
        // SAFETY: the variable name is unique to this test
        unsafe { std::env::set_var("MapNavConfigTest_MMapsDir", "/from/env") };
        assert_eq!(config.get_string("MMapsDir"), "/from/env");
        unsafe { std::env::remove_var("MapNavConfigTest_MMapsDir") };
    }

    #[test]
    fn test_data_dirs_resolution() {
        let mut config = Config::new();
        config.parse("DataDir = /data\nMMapsDir = /fast/mmaps\n");
        let dirs = DataDirs::from_config(&config);
        assert_eq!(dirs.maps, Some(PathBuf::from("/data/maps")));
        assert_eq!(dirs.vmaps, Some(PathBuf::from("/data/vmaps")));
        assert_eq!(dirs.mmaps, Some(PathBuf::from("/fast/mmaps")));

        let empty = DataDirs::from_config(&Config::new());
        assert_eq!(empty, DataDirs::default());
    }

    #[test]
    fn test_data_dirs_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapnav.conf");
        std::fs::write(&path, "MapsDir = /m\n").unwrap();
        let dirs = DataDirs::from_file(path.to_str().unwrap(), "").unwrap();
        assert_eq!(dirs.maps, Some(PathBuf::from("/m")));
        assert!(dirs.mmaps.is_none());

        std::fs::write(&path, "LogLevel = 2\n").unwrap();
        assert!(DataDirs::from_file(path.to_str().unwrap(), "").is_err());
        assert!(DataDirs::from_file("/nonexistent/mapnav.conf", "").is_err());
    }
}
