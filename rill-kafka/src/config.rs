//! ## 消费者配置
//!
//! 从分层配置加载，配置项示例：
//!
//! ```toml
//! bootstrap = "localhost:9092"
//! group = "orders-service"
//! poll_timeout = 100
//!
//! [subscriptions.orders]
//! batch_size = 50
//! batch_timeout = 500
//!
//! [cc]
//! "session.timeout.ms" = "10000"
//! ```

use rill::{
    config::{NamedConfig, SubscribeConfig, build_config, load_named_config},
    errors::ConfigError,
};
use std::{collections::HashMap, path::PathBuf, time::Duration};

const DEFAULT_POLL_TIMEOUT: u64 = 100;

/// 消费者配置
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Kafka 服务地址
    pub bootstrap: String,
    /// 消费组
    pub group: String,
    /// 单次拉取的最长等待时间
    pub poll_timeout: Duration,
    /// 命名订阅配置
    pub subscriptions: NamedConfig<SubscribeConfig>,
    /// 透传给 librdkafka 的客户端配置
    pub cc: HashMap<String, String>,
}

impl ConsumerConfig {
    /// 从配置目录加载
    pub fn load(crate_dir: PathBuf) -> Result<Self, ConfigError> {
        let config = build_config(crate_dir)?;
        Self::from_config(&config)
    }

    /// 从已构建的配置加载
    pub fn from_config(config: &config::Config) -> Result<Self, ConfigError> {
        let bootstrap = config.get_string("bootstrap")?;
        if bootstrap.trim().is_empty() {
            return Err("'bootstrap'不能为空".into());
        }
        let group = config.get_string("group")?;
        if group.trim().is_empty() {
            return Err("'group'不能为空".into());
        }
        let poll_timeout = match config.get::<u64>("poll_timeout") {
            Ok(millis) => millis,
            Err(config::ConfigError::NotFound(_)) => DEFAULT_POLL_TIMEOUT,
            Err(e) => return Err(e.into()),
        };
        let subscriptions = load_named_config(config, "subscriptions")?;
        let cc = match config.get::<HashMap<String, String>>("cc") {
            Ok(cc) => cc,
            Err(config::ConfigError::NotFound(_)) => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            bootstrap,
            group,
            poll_timeout: Duration::from_millis(poll_timeout),
            subscriptions,
            cc,
        })
    }
}
