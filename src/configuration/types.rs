use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error_handling::types::ConfigError;

/// Value type of a setting, used when parsing `settings set` input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Str,
    OptStr,
    Path,
    Port,
    Int,
    Bool,
}

impl SettingKind {
    pub fn name(&self) -> &'static str {
        match self {
            SettingKind::Str => "string",
            SettingKind::OptStr => "string (optional)",
            SettingKind::Path => "path",
            SettingKind::Port => "port",
            SettingKind::Int => "integer",
            SettingKind::Bool => "bool",
        }
    }
}

/// One row of the settings table: key, type and description.
///
/// Defaults are taken from [`LaunchConfig::default`].
#[derive(Debug, Clone, Copy)]
pub struct SettingSpec {
    pub key: &'static str,
    pub kind: SettingKind,
    pub description: &'static str,
}

pub const SETTINGS: &[SettingSpec] = &[
    SettingSpec { key: "image_name", kind: SettingKind::Str, description: "Registry repository of the notebook server image." },
    SettingSpec { key: "fixed_tag", kind: SettingKind::OptStr, description: "Always use this image tag instead of the newest one." },
    SettingSpec { key: "tag_prefix", kind: SettingKind::Str, description: "Prefix of version tags in the registry." },
    SettingSpec { key: "server_name", kind: SettingKind::Str, description: "Name of the managed container." },
    SettingSpec { key: "data_mount", kind: SettingKind::Path, description: "Host directory made available to the server." },
    SettingSpec { key: "data_bind", kind: SettingKind::Str, description: "Location of the data directory inside the container." },
    SettingSpec { key: "token", kind: SettingKind::Str, description: "Security token required to connect to the server." },
    SettingSpec { key: "port", kind: SettingKind::Port, description: "Host port of the notebook server." },
    SettingSpec { key: "aux_port", kind: SettingKind::Port, description: "Auxiliary host port published by the container." },
    SettingSpec { key: "container_cmd", kind: SettingKind::Str, description: "Base command run inside the container." },
    SettingSpec { key: "extra_flags", kind: SettingKind::Str, description: "Additional flags appended to the container command." },
    SettingSpec { key: "host_only", kind: SettingKind::Bool, description: "Bind ports on localhost only." },
    SettingSpec { key: "registry_url", kind: SettingKind::Str, description: "Base URL of the registry repositories API." },
    SettingSpec { key: "send_pings", kind: SettingKind::Bool, description: "Send anonymous usage pings." },
    SettingSpec { key: "ping_url", kind: SettingKind::Str, description: "Endpoint receiving usage pings; empty disables them." },
    SettingSpec { key: "poll_interval_secs", kind: SettingKind::Int, description: "Seconds between container status checks." },
    SettingSpec { key: "control_port", kind: SettingKind::Port, description: "Port of the local control interface." },
    SettingSpec { key: "min_token_length", kind: SettingKind::Int, description: "Minimum number of characters in the token." },
    SettingSpec { key: "require_unprivileged_port", kind: SettingKind::Bool, description: "Reject server ports at or below 1024." },
    SettingSpec { key: "colab_link", kind: SettingKind::Str, description: "Welcome notebook opened after the server starts." },
];

pub fn setting_spec(key: &str) -> Option<&'static SettingSpec> {
    SETTINGS.iter().find(|s| s.key == key)
}

/// User-editable parameters of the notebook server and the launcher itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub image_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_tag: Option<String>,
    pub tag_prefix: String,
    pub server_name: String,
    pub data_mount: PathBuf,
    pub data_bind: String,
    pub token: String,
    pub port: u16,
    pub aux_port: u16,
    pub container_cmd: String,
    pub extra_flags: String,
    pub host_only: bool,
    pub registry_url: String,
    pub send_pings: bool,
    pub ping_url: String,
    pub poll_interval_secs: u64,
    pub control_port: u16,
    pub min_token_length: usize,
    pub require_unprivileged_port: bool,
    pub colab_link: String,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            image_name: "ontresearch/nanolabs-notebook".to_string(),
            fixed_tag: None,
            tag_prefix: "v".to_string(),
            server_name: "Epi2Me-Labs-Server".to_string(),
            data_mount: PathBuf::from("/data/"),
            data_bind: "/epi2melabs".to_string(),
            token: "epi2me".to_string(),
            port: 8888,
            aux_port: 8889,
            container_cmd: concat!(
                "start-notebook.sh ",
                "--NotebookApp.allow_origin='https://colab.research.google.com' ",
                "--NotebookApp.disable_check_xsrf=True ",
                "--NotebookApp.port_retries=0 ",
                "--ip=0.0.0.0 ",
                "--no-browser ",
                "--notebook-dir=/"
            )
            .to_string(),
            extra_flags: String::new(),
            host_only: true,
            registry_url: "https://hub.docker.com/v2/repositories".to_string(),
            send_pings: true,
            ping_url: String::new(),
            poll_interval_secs: 5,
            control_port: 8890,
            min_token_length: 1,
            require_unprivileged_port: true,
            colab_link: "https://colab.research.google.com/github/epi2me-labs/resources/blob/master/welcome.ipynb".to_string(),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("\"{}\" is not a boolean", other),
        )),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

impl LaunchConfig {
    /// Full image reference for `tag`.
    pub fn image_ref(&self, tag: &str) -> String {
        format!("{}:{}", self.image_name, tag)
    }

    /// Returns the current value of `key` rendered as a string.
    pub fn get(&self, key: &str) -> Result<String, ConfigError> {
        let value = match key {
            "image_name" => self.image_name.clone(),
            "fixed_tag" => self.fixed_tag.clone().unwrap_or_default(),
            "tag_prefix" => self.tag_prefix.clone(),
            "server_name" => self.server_name.clone(),
            "data_mount" => self.data_mount.display().to_string(),
            "data_bind" => self.data_bind.clone(),
            "token" => self.token.clone(),
            "port" => self.port.to_string(),
            "aux_port" => self.aux_port.to_string(),
            "container_cmd" => self.container_cmd.clone(),
            "extra_flags" => self.extra_flags.clone(),
            "host_only" => self.host_only.to_string(),
            "registry_url" => self.registry_url.clone(),
            "send_pings" => self.send_pings.to_string(),
            "ping_url" => self.ping_url.clone(),
            "poll_interval_secs" => self.poll_interval_secs.to_string(),
            "control_port" => self.control_port.to_string(),
            "min_token_length" => self.min_token_length.to_string(),
            "require_unprivileged_port" => self.require_unprivileged_port.to_string(),
            "colab_link" => self.colab_link.clone(),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        };
        Ok(value)
    }

    /// Parses `value` according to the type of `key` and stores it.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "image_name" => self.image_name = value.to_string(),
            "fixed_tag" => {
                self.fixed_tag = if value.trim().is_empty() {
                    None
                } else {
                    Some(value.trim().to_string())
                }
            }
            "tag_prefix" => self.tag_prefix = value.to_string(),
            "server_name" => self.server_name = value.to_string(),
            "data_mount" => self.data_mount = PathBuf::from(value),
            "data_bind" => self.data_bind = value.to_string(),
            "token" => self.token = value.to_string(),
            "port" => self.port = parse_num(key, value)?,
            "aux_port" => self.aux_port = parse_num(key, value)?,
            "container_cmd" => self.container_cmd = value.to_string(),
            "extra_flags" => self.extra_flags = value.to_string(),
            "host_only" => self.host_only = parse_bool(key, value)?,
            "registry_url" => self.registry_url = value.to_string(),
            "send_pings" => self.send_pings = parse_bool(key, value)?,
            "ping_url" => self.ping_url = value.to_string(),
            "poll_interval_secs" => self.poll_interval_secs = parse_num(key, value)?,
            "control_port" => self.control_port = parse_num(key, value)?,
            "min_token_length" => self.min_token_length = parse_num(key, value)?,
            "require_unprivileged_port" => self.require_unprivileged_port = parse_bool(key, value)?,
            "colab_link" => self.colab_link = value.to_string(),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }
}
