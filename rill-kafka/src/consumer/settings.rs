use super::{ConsumerInfo, DisposedHook, DropHandler, FixedRecovery, RecoveryBehaviour};
use crate::{config::ConsumerConfig, errors::ConsumerError, subscription::SubscriptionOptions};
use gethostname::gethostname;
use rdkafka::ClientConfig;
use rill::{
    config::{NamedConfig, SubscribeConfig},
    domain::{Clock, SystemClock},
    errors::ConfigError,
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use uuid::Uuid;

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// 默认客户端配置，可被自定义配置覆盖
const CLIENT_DEFAULTS: [(&str, &str); 6] = [
    ("auto.offset.reset", "earliest"),
    ("enable.auto.commit", "true"),
    ("enable.auto.offset.store", "false"),
    ("auto.commit.interval.ms", "2000"),
    ("enable.partition.eof", "true"),
    ("statistics.interval.ms", "0"),
];

fn host_name() -> String {
    gethostname()
        .into_string()
        .ok()
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn default_client_id() -> String {
    let host = host_name();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{host}-rill@{}-{}", env!("CARGO_PKG_VERSION"), &suffix[..5])
}

/// 消费者设置
pub struct ConsumerSettings {
    bootstrap: String,
    group_id: String,
    client_id: String,
    pub(crate) poll_timeout: Duration,
    client: HashMap<String, String>,
    named: NamedConfig<SubscribeConfig>,
    subscriptions: Vec<Arc<SubscriptionOptions>>,
    pub(crate) drop_handler: Arc<dyn DropHandler>,
    pub(crate) disposed_hook: Option<Arc<dyn DisposedHook>>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl ConsumerSettings {
    /// 构造函数
    pub fn new(bootstrap: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            bootstrap: bootstrap.into(),
            group_id: group_id.into(),
            client_id: default_client_id(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            client: HashMap::new(),
            named: NamedConfig::default(),
            subscriptions: Vec::new(),
            drop_handler: Arc::new(FixedRecovery(RecoveryBehaviour::Stop)),
            disposed_hook: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// 由消费者配置构造
    pub fn from_config(config: &ConsumerConfig) -> Self {
        let mut settings = Self::new(config.bootstrap.clone(), config.group.clone());
        settings.poll_timeout = config.poll_timeout;
        settings.client = config.cc.clone();
        settings.named = config.subscriptions.clone();
        settings
    }

    /// 客户端 Id
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// 单次拉取的最长等待时间
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// 设置 librdkafka 客户端配置
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.client.insert(key.into(), value.into());
        self
    }

    /// 添加订阅
    pub fn subscribe(mut self, options: SubscriptionOptions) -> Self {
        self.subscriptions.push(Arc::new(options));
        self
    }

    /// 添加订阅，批次参数取自同名的订阅配置
    pub fn subscribe_named(self, name: &str, options: SubscriptionOptions) -> Self {
        let config = self.named.get(name);
        self.subscribe(options.configure(&config))
    }

    /// 掉线处理器，默认停止消费者
    pub fn on_consumer_dropped(mut self, handler: impl DropHandler) -> Self {
        self.drop_handler = Arc::new(handler);
        self
    }

    /// 关闭回调
    pub fn on_disposed(mut self, hook: impl DisposedHook) -> Self {
        self.disposed_hook = Some(Arc::new(hook));
        self
    }

    /// 时钟
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// 所有订阅的主题，按订阅顺序
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for topic in self.subscriptions.iter().flat_map(|s| s.topics()) {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }
        topics
    }

    /// 主题对应的订阅选项
    pub fn subscription_for(&self, topic: &str) -> Option<Arc<SubscriptionOptions>> {
        self.subscriptions
            .iter()
            .find(|s| s.topics().iter().any(|t| t == topic))
            .cloned()
    }

    /// 消费者标识
    pub fn info(&self) -> ConsumerInfo {
        ConsumerInfo {
            name: self.client_id.clone(),
            group_id: self.group_id.clone(),
        }
    }

    /// 检查设置
    pub fn validate(&self) -> Result<(), ConsumerError> {
        if self.bootstrap.trim().is_empty() {
            return Err(ConfigError::from("'bootstrap'不能为空").into());
        }
        if self.group_id.trim().is_empty() {
            return Err(ConfigError::from("'group'不能为空").into());
        }
        if self.subscriptions.is_empty() {
            return Err(ConsumerError::NoSubscription);
        }
        let mut seen: Vec<&str> = Vec::new();
        for topic in self.subscriptions.iter().flat_map(|s| s.topics()) {
            if topic.trim().is_empty() {
                return Err(ConfigError::from("订阅主题不能为空").into());
            }
            if seen.contains(&topic.as_str()) {
                return Err(ConfigError::Invalid(format!("主题'{topic}'重复订阅")).into());
            }
            seen.push(topic);
        }
        Ok(())
    }

    /// 生成 librdkafka 客户端配置
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap)
            .set("group.id", &self.group_id)
            .set("client.id", &self.client_id);
        for (key, value) in CLIENT_DEFAULTS {
            config.set(key, value);
        }
        for (key, value) in &self.client {
            config.set(key, value);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill::{domain::MessageBatch, errors::BoxError};
    use tokio_util::sync::CancellationToken;

    fn options(topics: &[&str]) -> SubscriptionOptions {
        let handler = |_: MessageBatch, _: CancellationToken| async { Ok::<(), BoxError>(()) };
        SubscriptionOptions::new(topics.iter().copied(), handler)
    }

    #[test]
    fn client_config_applies_defaults_and_overrides() {
        let settings = ConsumerSettings::new("localhost:9092", "orders")
            .client_id("svc-1")
            .set("auto.offset.reset", "latest");
        let config = settings.client_config();
        assert_eq!(config.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(config.get("group.id"), Some("orders"));
        assert_eq!(config.get("client.id"), Some("svc-1"));
        assert_eq!(config.get("auto.offset.reset"), Some("latest"));
        assert_eq!(config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(config.get("enable.partition.eof"), Some("true"));
    }

    #[test]
    fn default_client_id_names_host_and_version() {
        let id = ConsumerSettings::new("localhost:9092", "orders").info().name;
        let (host, rest) = id.rsplit_once("-rill@").unwrap();
        assert_eq!(host, host_name());
        assert!(!host.is_empty());
        assert!(rest.starts_with(env!("CARGO_PKG_VERSION")));
        assert_eq!(rest.rsplit('-').next().map(str::len), Some(5));
    }

    #[test]
    fn validate_requires_subscription() {
        let settings = ConsumerSettings::new("localhost:9092", "orders");
        assert!(matches!(
            settings.validate(),
            Err(ConsumerError::NoSubscription)
        ));
    }

    #[test]
    fn validate_rejects_duplicate_topics() {
        let settings = ConsumerSettings::new("localhost:9092", "orders")
            .subscribe(options(&["orders", "refunds"]))
            .subscribe(options(&["refunds"]));
        assert!(matches!(settings.validate(), Err(ConsumerError::Config(_))));
    }

    #[test]
    fn subscriptions_resolve_by_topic() {
        let settings = ConsumerSettings::new("localhost:9092", "orders")
            .subscribe(options(&["orders", "refunds"]))
            .subscribe(options(&["payments"]).batch_size(7));
        assert!(settings.validate().is_ok());
        assert_eq!(settings.topics(), ["orders", "refunds", "payments"]);
        assert_eq!(
            settings.subscription_for("payments").map(|s| s.batch_size),
            Some(7)
        );
        assert!(settings.subscription_for("unknown").is_none());
    }
}
