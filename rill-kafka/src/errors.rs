//! # **rill-kafka** 错误定义

use rdkafka::{error::KafkaError, types::RDKafkaErrorCode};
use rill::{TopicPartition, errors::ConfigError};
use thiserror::Error;

/// Kafka 客户端错误
///
/// 致命错误与未知主题分区错误视为消费者掉线，交由掉线处理器决定后续行为；
/// 其余错误均为瞬时错误。
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// 致命错误，消费者不可再用
    #[error("Kafka致命错误：{0}")]
    Fatal(String),
    /// 未知主题或分区
    #[error("未知主题或分区：{0}")]
    UnknownPartition(String),
    /// 消费者已不在消费组中
    #[error("消费者已不在消费组中：{0}")]
    NotMember(String),
    /// 瞬时错误
    #[error("Kafka错误：{0}")]
    Transient(String),
}

impl BrokerError {
    /// 是否为掉线错误
    #[inline]
    pub fn is_drop(&self) -> bool {
        matches!(self, BrokerError::Fatal(_) | BrokerError::UnknownPartition(_))
    }
}

impl From<KafkaError> for BrokerError {
    fn from(e: KafkaError) -> Self {
        let message = e.to_string();
        match e.rdkafka_error_code() {
            Some(RDKafkaErrorCode::Fatal) => BrokerError::Fatal(message),
            Some(
                RDKafkaErrorCode::UnknownTopicOrPartition
                | RDKafkaErrorCode::UnknownPartition
                | RDKafkaErrorCode::UnknownTopic,
            ) => BrokerError::UnknownPartition(message),
            Some(RDKafkaErrorCode::UnknownMemberId) => BrokerError::NotMember(message),
            _ => BrokerError::Transient(message),
        }
    }
}

impl From<&str> for BrokerError {
    fn from(s: &str) -> Self {
        BrokerError::Transient(s.to_owned())
    }
}

/// 分区工作者错误
#[derive(Debug, Error)]
pub enum WorkerError {
    /// 工作者已关闭
    #[error("分区 {0} 的工作者已关闭")]
    Disposed(TopicPartition),
    /// 工作者已取消
    #[error("分区 {0} 的工作者已取消")]
    Cancelled(TopicPartition),
}

/// 消费者错误
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// 配置错误
    #[error("消费者配置错误：{0}")]
    Config(#[from] ConfigError),
    /// 未配置订阅
    #[error("至少需要一个订阅")]
    NoSubscription,
    /// 订阅失败
    #[error("订阅主题失败：{0}")]
    Subscribe(BrokerError),
    /// 客户端创建失败
    #[error("消费者创建失败：{0}")]
    Create(#[from] KafkaError),
    /// 不在异步运行时中
    #[error("消费者须在异步运行时中启动：{0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
    /// 重复启动
    #[error("消费者已启动")]
    AlreadyStarted,
    /// 已关闭
    #[error("消费者已关闭")]
    Disposed,
}
