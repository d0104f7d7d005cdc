use super::types::*;
use clap::Args;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error_handling::types::ConfigError;

/// Command-line overrides for any persisted setting.
///
/// Every field mirrors a key of [`SETTINGS`]. A value given here wins over the
/// settings file for the lifetime of the process but is never written back.
///
/// # Command Line
/// Each key is exposed as `--<key-with-dashes> <VALUE>`, e.g. `--data-mount /srv/data`
/// or `--host-only false`. The options are global so they may follow the subcommand.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub image_name: Option<String>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub fixed_tag: Option<String>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub tag_prefix: Option<String>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub server_name: Option<String>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub data_mount: Option<PathBuf>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub data_bind: Option<String>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub token: Option<String>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub port: Option<u16>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub aux_port: Option<u16>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub container_cmd: Option<String>,
    #[arg(long, global = true, allow_hyphen_values = true, help_heading = "Setting overrides")]
    pub extra_flags: Option<String>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub host_only: Option<bool>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub registry_url: Option<String>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub send_pings: Option<bool>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub ping_url: Option<String>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub poll_interval_secs: Option<u64>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub control_port: Option<u16>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub min_token_length: Option<usize>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub require_unprivileged_port: Option<bool>,
    #[arg(long, global = true, help_heading = "Setting overrides")]
    pub colab_link: Option<String>,
}

impl Overrides {
    /// Writes every given override onto `config`.
    pub fn apply(&self, config: &mut LaunchConfig) {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(value) = &self.$field {
                        debug!("Command line override for {}", stringify!($field));
                        config.$field = value.clone();
                    }
                )*
            };
        }
        take!(
            image_name,
            tag_prefix,
            server_name,
            data_mount,
            data_bind,
            token,
            port,
            aux_port,
            container_cmd,
            extra_flags,
            host_only,
            registry_url,
            send_pings,
            ping_url,
            poll_interval_secs,
            control_port,
            min_token_length,
            require_unprivileged_port,
            colab_link,
        );
        if let Some(tag) = &self.fixed_tag {
            config.fixed_tag = Some(tag.clone());
        }
    }
}

/// Persisted settings backed by a TOML file.
///
/// Keys missing from the file fall back to [`LaunchConfig::default`], and a missing
/// file means "all defaults". Writes create the parent directory if needed.
#[derive(Debug, Clone)]
pub struct Settings {
    path: PathBuf,
    persisted: LaunchConfig,
}

impl Settings {
    /// `<config dir>/labs-launcher/settings.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("labs-launcher").join("settings.toml"))
            .ok_or(ConfigError::NoConfigDirectory)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let persisted = if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: LaunchConfig =
                toml::from_str(&content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
            info!("Loaded settings from {}", path.display());
            config
        } else {
            info!(
                "No settings file at {}, using defaults",
                path.display()
            );
            LaunchConfig::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            persisted,
        })
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(&self.persisted)
            .map_err(|e| ConfigError::TomlError(e.to_string()))?;
        fs::write(&self.path, content)?;
        debug!("Saved settings to {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn persisted(&self) -> &LaunchConfig {
        &self.persisted
    }

    pub fn get(&self, key: &str) -> Result<String, ConfigError> {
        self.persisted.get(key)
    }

    /// Updates a single key and writes the file.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.persisted.set(key, value)?;
        self.save()
    }

    /// Restores every key to its default and writes the file.
    pub fn reset(&mut self) -> Result<(), ConfigError> {
        self.persisted = LaunchConfig::default();
        self.save()
    }

    /// Resolves the effective configuration: CLI > persisted > default.
    pub fn resolve(&self, overrides: &Overrides) -> LaunchConfig {
        let mut config = self.persisted.clone();
        overrides.apply(&mut config);
        config
    }
}
