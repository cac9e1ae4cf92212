use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

use super::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntSetting {
    RetryLimit,
    RetryInterval,
    RetryIntervalApi,
    ApiMaxRetries,
    MinimumScore,
    MaximumSimilar,
    RetryBlockDelay,
}

impl IntSetting {
    pub const ALL: [IntSetting; 7] = [
        IntSetting::RetryLimit,
        IntSetting::RetryInterval,
        IntSetting::RetryIntervalApi,
        IntSetting::ApiMaxRetries,
        IntSetting::MinimumScore,
        IntSetting::MaximumSimilar,
        IntSetting::RetryBlockDelay,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::RetryLimit => "RETRY_LIMIT",
            Self::RetryInterval => "RETRY_INTERVAL",
            Self::RetryIntervalApi => "RETRY_INTERVAL_API",
            Self::ApiMaxRetries => "API_MAX_RETRIES",
            Self::MinimumScore => "MINIMUM_SCORE",
            Self::MaximumSimilar => "MAXIMUM_SIMILAR",
            Self::RetryBlockDelay => "RETRY_BLOCK_DELAY",
        }
    }

    fn read(self, config: &PipelineConfig) -> i64 {
        match self {
            Self::RetryLimit => i64::from(config.retry_limit),
            Self::RetryInterval => saturating_i64(config.retry_interval_secs),
            Self::RetryIntervalApi => saturating_i64(config.retry_interval_api_secs),
            Self::ApiMaxRetries => i64::from(config.api_max_retries),
            Self::MinimumScore => config.minimum_score,
            Self::MaximumSimilar => saturating_i64(config.maximum_similar),
            Self::RetryBlockDelay => saturating_i64(config.retry_block_delay_secs),
        }
    }

    fn write(self, config: &mut PipelineConfig, value: i64) -> Result<(), SettingsError> {
        let key = self.key();
        match self {
            Self::MinimumScore => config.minimum_score = value,
            Self::RetryLimit => config.retry_limit = non_negative_u32(key, value)?,
            Self::ApiMaxRetries => {
                let attempts = non_negative_u32(key, value)?;
                if attempts == 0 {
                    return Err(SettingsError::OutOfRange {
                        key,
                        value,
                        detail: "must be at least 1",
                    });
                }
                config.api_max_retries = attempts;
            }
            Self::RetryInterval => config.retry_interval_secs = non_negative_u64(key, value)?,
            Self::RetryIntervalApi => {
                config.retry_interval_api_secs = non_negative_u64(key, value)?
            }
            Self::MaximumSimilar => config.maximum_similar = non_negative_u64(key, value)?,
            Self::RetryBlockDelay => config.retry_block_delay_secs = non_negative_u64(key, value)?,
        }
        Ok(())
    }
}

impl FromStr for IntSetting {
    type Err = SettingsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|setting| setting.key() == normalized)
            .ok_or(SettingsError::UnknownKey(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringSetting {
    NotifyChatId,
}

impl StringSetting {
    pub fn key(self) -> &'static str {
        match self {
            Self::NotifyChatId => "NOTIFY_CHAT_ID",
        }
    }
}

impl FromStr for StringSetting {
    type Err = SettingsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        match normalized.as_str() {
            "NOTIFY_CHAT_ID" => Ok(Self::NotifyChatId),
            _ => Err(SettingsError::UnknownKey(normalized)),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("unknown setting key: {0}")]
    UnknownKey(String),
    #[error("{key} must be an integer, got {raw:?}")]
    NotAnInteger { key: &'static str, raw: String },
    #[error("{key}={value} rejected: {detail}")]
    OutOfRange {
        key: &'static str,
        value: i64,
        detail: &'static str,
    },
    #[error("{key} must not be empty")]
    EmptyValue { key: &'static str },
}

fn non_negative_u64(key: &'static str, value: i64) -> Result<u64, SettingsError> {
    u64::try_from(value).map_err(|_| SettingsError::OutOfRange {
        key,
        value,
        detail: "must be non-negative",
    })
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn non_negative_u32(key: &'static str, value: i64) -> Result<u32, SettingsError> {
    u32::try_from(value).map_err(|_| SettingsError::OutOfRange {
        key,
        value,
        detail: "must fit a non-negative 32-bit integer",
    })
}

/// Shared, hot-editable pipeline settings. Readers take cheap snapshots so a
/// running retry loop never observes a half-applied update.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<PipelineConfig>>,
}

impl SettingsHandle {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> PipelineConfig {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get_int(&self, key: &str) -> Result<i64, SettingsError> {
        let setting = key.parse::<IntSetting>()?;
        Ok(setting.read(&self.snapshot()))
    }

    /// Parses `raw` as an integer and applies it; on any error the previous
    /// value is left untouched.
    pub fn set_int(&self, key: &str, raw: &str) -> Result<i64, SettingsError> {
        let setting = key.parse::<IntSetting>()?;
        let trimmed = raw.trim();
        let value = trimmed
            .parse::<i64>()
            .map_err(|_| SettingsError::NotAnInteger {
                key: setting.key(),
                raw: trimmed.to_string(),
            })?;
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut updated = guard.clone();
        setting.write(&mut updated, value)?;
        *guard = updated;
        Ok(value)
    }

    pub fn set_string(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let setting = key.parse::<StringSetting>()?;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(SettingsError::EmptyValue { key: setting.key() });
        }
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match setting {
            StringSetting::NotifyChatId => guard.chat_id = trimmed.to_string(),
        }
        Ok(())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot().retry_interval_secs)
    }

    pub fn retry_block_delay(&self) -> Duration {
        Duration::from_secs(self.snapshot().retry_block_delay_secs)
    }
}
