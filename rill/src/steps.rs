//! # **rill** 常用处理步骤

mod compaction;
mod delay;
mod executor;

pub use compaction::KeyCompactionStep;
pub use delay::DelayStep;
pub use executor::{BatchToMessages, MessageExecutor};

use crate::{
    context::BatchContext,
    domain::{BatchHandler, MessageBatch},
    errors::BoxError,
    pipeline::Pipeline,
};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

impl BatchHandler for Pipeline<BatchContext> {
    fn handle(
        &self,
        messages: MessageBatch,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<(), BoxError>> {
        let pipeline = self.clone();
        Box::pin(async move {
            let mut ctx = BatchContext::new(messages.to_vec(), cancel);
            pipeline.execute(&mut ctx).await
        })
    }
}
