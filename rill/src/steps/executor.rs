use crate::{
    context::{BatchContext, Items, MessageContext},
    domain::{BatchHandler, MessageBatch},
    errors::{BoxError, PipelineError},
    message::IncomingMessage,
    pipeline::{Next, Pipeline, Step, StepResult},
};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// 逐条消息执行器
///
/// 按偏移量顺序为每条消息执行一次消息管道。并行度大于 1 时，
/// 消息以不超过并行度的数量同时执行，全部完成后才返回；
/// 出错时仍等待已启动的消息结束，再返回第一个错误。
#[derive(Clone)]
pub struct MessageExecutor {
    pipeline: Pipeline<MessageContext>,
    parallelism: usize,
}

impl MessageExecutor {
    /// 构造函数，依次执行
    pub fn new(pipeline: Pipeline<MessageContext>) -> Self {
        Self {
            pipeline,
            parallelism: 1,
        }
    }

    /// 指定并行度
    pub fn with_parallelism(
        pipeline: Pipeline<MessageContext>,
        parallelism: usize,
    ) -> Result<Self, PipelineError> {
        if parallelism == 0 {
            return Err(PipelineError::InvalidParallelism(parallelism));
        }
        Ok(Self {
            pipeline,
            parallelism,
        })
    }

    /// 并行度
    #[inline]
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// 执行一批消息
    #[instrument(name = "execute_messages", skip_all, fields(count = messages.len()))]
    pub async fn execute(
        &self,
        messages: &[IncomingMessage],
        cancel: &CancellationToken,
        items: &Items,
    ) -> StepResult {
        let mut ordered: Vec<&IncomingMessage> = messages.iter().collect();
        ordered.sort_by_key(|m| m.offset);

        if self.parallelism == 1 {
            for msg in ordered {
                let mut ctx = MessageContext::new(msg.clone(), cancel.clone(), items.clone());
                self.pipeline.execute(&mut ctx).await?;
            }
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();
        let mut failure: Option<BoxError> = None;
        for msg in ordered {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("执行已取消，停止分发消息");
                    failure = Some(PipelineError::Cancelled.into());
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit?,
            };
            let pipeline = self.pipeline.clone();
            let mut ctx = MessageContext::new(msg.clone(), cancel.clone(), items.clone());
            tasks.spawn(async move {
                let _permit = permit;
                pipeline.execute(&mut ctx).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(result) => result,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = outcome {
                failure.get_or_insert(e);
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl BatchHandler for MessageExecutor {
    fn handle(
        &self,
        messages: MessageBatch,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<(), BoxError>> {
        let executor = self.clone();
        Box::pin(async move { executor.execute(&messages, &cancel, &Items::new()).await })
    }
}

/// 批次拆分为单条消息执行，随后继续批次管道
pub struct BatchToMessages {
    executor: MessageExecutor,
}

impl BatchToMessages {
    /// 构造函数
    pub fn new(executor: MessageExecutor) -> Self {
        Self { executor }
    }
}

impl Step<BatchContext> for BatchToMessages {
    fn execute<'a>(
        &'a self,
        ctx: &'a mut BatchContext,
        next: Next<'a, BatchContext>,
    ) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            self.executor
                .execute(&ctx.messages, &ctx.cancel, &ctx.items)
                .await?;
            next.run(ctx).await
        })
    }
}
