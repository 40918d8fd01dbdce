//! ## 消息代理抽象
//!
//! 消费者编排、状态管理与分区工作者只通过 [`Broker`] 访问 Kafka 客户端，
//! 生产实现见 [`KafkaBroker`]。

mod kafka;

pub use kafka::{KafkaBroker, RebalanceContext};

use crate::errors::BrokerError;
use bytes::Bytes;
use rill::{PartitionOffset, TopicPartition};
use std::{future::Future, sync::Weak, time::Duration};

/// 从代理读取的原始消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// 主题分区
    pub partition: TopicPartition,
    /// 偏移量
    pub offset: i64,
    /// 消息键
    pub key: Option<Bytes>,
    /// 消息体
    pub payload: Option<Bytes>,
    /// 消息头，值可以为空
    pub headers: Vec<(String, Option<Bytes>)>,
    /// 发布时间戳，毫秒
    pub timestamp: Option<i64>,
}

impl Record {
    /// 分区偏移量
    pub fn position(&self) -> PartitionOffset {
        PartitionOffset::new(self.partition.clone(), self.offset)
    }
}

/// 拉取结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// 消息
    Record(Record),
    /// 已读到分区末尾
    EndOfPartition(i32),
}

/// 再均衡监听特征
///
/// 回调在拉取过程中同步触发，与拉取串行执行。
pub trait RebalanceListener: Send + Sync {
    /// 分配分区，参数为分配后的完整分区集合
    fn on_assigned(&self, partitions: &[TopicPartition]);
    /// 撤销分区
    fn on_revoked(&self, partitions: &[TopicPartition]);
}

/// 消息代理特征
pub trait Broker: Send + Sync + 'static {
    /// 客户端名称
    fn name(&self) -> &str;

    /// 注册再均衡监听
    fn set_listener(&self, listener: Weak<dyn RebalanceListener>);

    /// 订阅主题
    fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError>;

    /// 在超时时间内拉取一条消息，超时返回 `None`
    fn poll(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<PollEvent>, BrokerError>> + Send;

    /// 暂停分区
    fn pause(&self, partitions: &[TopicPartition]) -> Result<(), BrokerError>;

    /// 恢复分区
    fn resume(&self, partitions: &[TopicPartition]) -> Result<(), BrokerError>;

    /// 重置分区读取位置
    fn seek(&self, position: &PartitionOffset) -> Result<(), BrokerError>;

    /// 本地标记提交位置，由自动提交或显式提交落盘
    fn store_offset(&self, position: &PartitionOffset) -> Result<(), BrokerError>;

    /// 同步提交
    fn commit(&self, positions: &[PartitionOffset]) -> Result<(), BrokerError>;

    /// 取消订阅
    fn unsubscribe(&self);

    /// 关闭客户端
    fn close(&self);
}
