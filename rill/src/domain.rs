//! # **rill** 特征

use crate::{errors::BoxError, message::IncomingMessage};
use futures::future::BoxFuture;
use std::{future::Future, sync::Arc};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// 一个批次的消息，按偏移量升序排列
pub type MessageBatch = Arc<[IncomingMessage]>;

/// 时钟特征
pub trait Clock: Send + Sync + 'static {
    /// 当前时间
    fn now(&self) -> OffsetDateTime;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

impl<F> Clock for F
where
    F: Fn() -> OffsetDateTime + Send + Sync + 'static,
{
    #[inline]
    fn now(&self) -> OffsetDateTime {
        self()
    }
}

/// 批处理特征
///
/// 同一分区的批次依次交付，处理失败时整个批次会被重试。
/// 取消令牌在消费者关闭时触发，处理器应尽快返回。
pub trait BatchHandler: Send + Sync + 'static {
    /// 处理一个批次
    fn handle(
        &self,
        messages: MessageBatch,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<(), BoxError>>;
}

impl<F, Fut> BatchHandler for F
where
    F: Fn(MessageBatch, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn handle(
        &self,
        messages: MessageBatch,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<(), BoxError>> {
        Box::pin(self(messages, cancel))
    }
}
