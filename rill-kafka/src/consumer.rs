//! ## 消费者编排
//!
//! 消费者持有代理客户端，响应分区分配与撤销，运行拉取循环，
//! 按分区把消息分发给 [`PartitionWorker`](crate::worker::PartitionWorker)。

mod core;
mod settings;

pub use self::core::{KafkaConsumer, RdKafkaConsumer};
pub use self::settings::ConsumerSettings;

use crate::{errors::BrokerError, worker::PartitionWorker};
use futures::future::BoxFuture;
use rill::{TopicPartition, errors::BoxError};
use std::{future::Future, sync::Arc};

/// 掉线后的恢复行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryBehaviour {
    /// 继续拉取
    Retry,
    /// 停止并关闭消费者
    Stop,
}

/// 消费者标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    /// 客户端名称
    pub name: String,
    /// 消费组
    pub group_id: String,
}

/// 运行中消费者的只读视图
///
/// 掉线处理器经由它查看消费者。关闭消费者应返回 [`RecoveryBehaviour::Stop`]，
/// 而不是在处理器中等待关闭完成。
pub trait ConsumerView: Send + Sync {
    /// 消费者标识
    fn info(&self) -> &ConsumerInfo;

    /// 当前持有工作者的分区，按主题与分区号排序
    fn assigned(&self) -> Vec<TopicPartition>;

    /// 分区工作者
    fn worker(&self, partition: &TopicPartition) -> Option<Arc<PartitionWorker>>;

    /// 是否已关闭
    fn is_disposed(&self) -> bool;
}

/// 掉线处理特征
pub trait DropHandler: Send + Sync + 'static {
    /// 决定掉线后的恢复行为
    fn on_dropped(
        &self,
        consumer: Arc<dyn ConsumerView>,
        error: BrokerError,
    ) -> BoxFuture<'static, Result<RecoveryBehaviour, BoxError>>;
}

impl<F, Fut> DropHandler for F
where
    F: Fn(Arc<dyn ConsumerView>, BrokerError) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RecoveryBehaviour, BoxError>> + Send + 'static,
{
    fn on_dropped(
        &self,
        consumer: Arc<dyn ConsumerView>,
        error: BrokerError,
    ) -> BoxFuture<'static, Result<RecoveryBehaviour, BoxError>> {
        Box::pin(self(consumer, error))
    }
}

/// 固定恢复行为的掉线处理器
#[derive(Debug, Clone, Copy)]
pub struct FixedRecovery(pub RecoveryBehaviour);

impl DropHandler for FixedRecovery {
    fn on_dropped(
        &self,
        _: Arc<dyn ConsumerView>,
        _: BrokerError,
    ) -> BoxFuture<'static, Result<RecoveryBehaviour, BoxError>> {
        let behaviour = self.0;
        Box::pin(async move { Ok(behaviour) })
    }
}

/// 关闭回调特征
pub trait DisposedHook: Send + Sync + 'static {
    /// 消费者关闭后调用
    fn on_disposed(&self, consumer: ConsumerInfo) -> BoxFuture<'static, Result<(), BoxError>>;
}

impl<F, Fut> DisposedHook for F
where
    F: Fn(ConsumerInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn on_disposed(&self, consumer: ConsumerInfo) -> BoxFuture<'static, Result<(), BoxError>> {
        Box::pin(self(consumer))
    }
}
