#[cfg(test)]
use std::fs;
#[cfg(test)]
use std::path::{Path, PathBuf};

mod env_parsing;
mod loader;
mod schema;
mod settings;

pub use self::loader::{
    apply_env_overrides, load_from_env_or_default, load_from_path, CONFIG_PATH_ENV,
};
pub use self::schema::{
    AppConfig, ChainsConfig, DetectorsConfig, ExplorerConfig, NotifyConfig, PipelineConfig,
    SqliteConfig, SystemConfig, WebConfig,
};
pub use self::settings::{IntSetting, SettingsError, SettingsHandle, StringSetting};
