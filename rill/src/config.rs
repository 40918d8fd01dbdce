//! # **rill** 配置加载
//!
//! 配置按层叠加：`config/default`、`config/{RILL_ENV}`，最后是 `RILL__` 前缀的环境变量。

use crate::errors::ConfigError;
use config::{Config, Environment, File};
use serde::{Deserialize, de::DeserializeOwned};
use std::{collections::HashMap, path::PathBuf, time::Duration};
use validator::Validate;

/// 命名配置集合
#[derive(Debug, Clone, Default)]
pub struct NamedConfig<T> {
    configs: HashMap<String, T>,
}

impl<T> NamedConfig<T>
where
    T: DeserializeOwned + Validate + Clone + Send + Sync + Default + 'static,
{
    /// 获取指定名称的配置，不存在时返回默认配置
    pub fn get(&self, name: &str) -> T {
        self.configs.get(name).cloned().unwrap_or_default()
    }

    /// 是否存在指定名称的配置
    pub fn contains(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    /// 配置名称迭代器
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }
}

/// 构建分层配置
pub fn build_config(crate_dir: PathBuf) -> Result<Config, ConfigError> {
    let config_root = std::env::var("RILL_CONFIG_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| crate_dir.join("config"));
    let env = std::env::var("RILL_ENV").unwrap_or_else(|_| "dev".to_string());
    let config = Config::builder()
        .add_source(File::from(config_root.join("default")).required(false))
        .add_source(File::from(config_root.join(env)).required(false))
        .add_source(
            Environment::with_prefix("RILL")
                .separator("__")
                .list_separator(","),
        )
        .build()?;
    Ok(config)
}

/// 加载并验证命名配置节，配置节不存在时返回空集合
pub fn load_named_config<T>(config: &Config, section: &str) -> Result<NamedConfig<T>, ConfigError>
where
    T: DeserializeOwned + Validate + Clone + Default,
{
    let configs = match config.get::<HashMap<String, T>>(section) {
        Ok(configs) => configs,
        Err(config::ConfigError::NotFound(_)) => HashMap::new(),
        Err(e) => return Err(e.into()),
    };

    for (key, cfg) in &configs {
        cfg.validate().map_err(|e| ConfigError::ValidationError {
            section: section.to_string(),
            key: key.to_string(),
            message: e.to_string(),
        })?;
    }

    Ok(NamedConfig { configs })
}

/// 订阅配置
///
/// 时间单位均为毫秒。
#[derive(Debug, Deserialize, Validate, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SubscribeConfig {
    /// 批次最大消息数
    #[validate(range(min = 1))]
    pub batch_size: usize,
    /// 批次自首条消息起的最长等待时间
    pub batch_timeout: u64,
    /// 分区入队容量
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
    /// 关闭时等待排空的时间
    pub stop_timeout: u64,
    /// 失败重试的最大间隔
    #[validate(range(min = 1))]
    pub max_retry_delay: u64,
}

impl SubscribeConfig {
    /// 批次等待时间
    #[inline]
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout)
    }

    /// 关闭等待时间
    #[inline]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout)
    }

    /// 重试最大间隔
    #[inline]
    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay)
    }
}

impl Default for SubscribeConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            batch_timeout: 10_000,
            queue_capacity: 100,
            stop_timeout: 1_000,
            max_retry_delay: 60_000,
        }
    }
}
