pub mod config;
pub mod types;

pub use config::{Overrides, Settings};
pub use types::{setting_spec, LaunchConfig, SettingKind, SettingSpec, SETTINGS};
