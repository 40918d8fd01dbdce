use crate::{
    context::BatchContext,
    message::IncomingMessage,
    pipeline::{Next, Step, StepResult},
};
use futures::future::BoxFuture;
use std::collections::HashMap;
use tracing::trace;

/// 按消息键压缩批次
///
/// 同一个键只保留时间戳最新的消息，时间戳相同时保留偏移量较大者。
/// 压缩后按键首次出现的顺序排列。
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyCompactionStep;

impl Step<BatchContext> for KeyCompactionStep {
    fn execute<'a>(
        &'a self,
        ctx: &'a mut BatchContext,
        next: Next<'a, BatchContext>,
    ) -> BoxFuture<'a, StepResult> {
        let before = ctx.messages.len();
        compact(&mut ctx.messages);
        trace!("批次压缩：{before} -> {}", ctx.messages.len());
        next.run(ctx)
    }
}

fn compact(messages: &mut Vec<IncomingMessage>) {
    let mut index: HashMap<Option<String>, usize> = HashMap::with_capacity(messages.len());
    let mut kept: Vec<IncomingMessage> = Vec::with_capacity(messages.len());
    for msg in messages.drain(..) {
        match index.get(&msg.key) {
            Some(&i) => {
                if msg.timestamp >= kept[i].timestamp {
                    kept[i] = msg;
                }
            }
            None => {
                index.insert(msg.key.clone(), kept.len());
                kept.push(msg);
            }
        }
    }
    *messages = kept;
}
