use crate::{
    context::MessageContext,
    domain::Clock,
    errors::PipelineError,
    message::{Headers, headers},
    pipeline::{Next, Step, StepResult},
};
use futures::future::BoxFuture;
use std::{sync::Arc, time::Duration};
use tracing::debug;

/// 延迟处理步骤
///
/// 消息同时带有发布时间与延迟秒数时，等到 `发布时间 + 延迟` 再继续处理。
pub struct DelayStep {
    clock: Arc<dyn Clock>,
}

impl DelayStep {
    /// 构造函数
    pub fn new(clock: impl Clock) -> Self {
        Self {
            clock: Arc::new(clock),
        }
    }

    /// 使用共享时钟
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn remaining(&self, values: &Headers) -> Option<Duration> {
        let published_at = values.get_datetime(headers::PUBLISHED_AT)?;
        let delay = values.get_as::<i64>(headers::DELAY_SECONDS)?;
        let due = published_at.checked_add(time::Duration::seconds(delay))?;
        let remaining = due - self.clock.now();
        remaining.is_positive().then(|| remaining.unsigned_abs())
    }
}

impl Step<MessageContext> for DelayStep {
    fn execute<'a>(
        &'a self,
        ctx: &'a mut MessageContext,
        next: Next<'a, MessageContext>,
    ) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            if let Some(wait) = self.remaining(&ctx.message.headers) {
                debug!("消息 {} 延迟 {wait:?} 处理", ctx.message.position());
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return Err(PipelineError::Cancelled.into()),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            next.run(ctx).await
        })
    }
}
