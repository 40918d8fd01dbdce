//! 以管道消费 `payments` 主题
//!
//! 批次先按键压缩，再逐条经过延迟投递与分支处理，最多 4 条并行。
//! 连接与批次参数取自 `demos/config`。

use rill::{
    BatchContext, MessageContext, PipelineBuilder,
    domain::SystemClock,
    errors::BoxError,
    message::headers,
    steps::{BatchToMessages, DelayStep, KeyCompactionStep, MessageExecutor},
};
use rill_kafka::{ConsumerSettings, RdKafkaConsumer, SubscriptionOptions, config::ConsumerConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking;
use tracing_subscriber::fmt;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let (non_blocking, _guard) = non_blocking(std::io::stdout());
    fmt()
        .with_writer(non_blocking)
        .with_target(false)
        .pretty()
        .init();

    let messages = PipelineBuilder::new()
        .use_step(DelayStep::new(SystemClock))
        .map(
            |ctx: &MessageContext| ctx.message.key.is_none(),
            |branch| {
                branch.use_fn(|ctx: &mut MessageContext, _| {
                    Box::pin(async move {
                        info!("忽略无键消息 {}", ctx.message);
                        Ok(())
                    })
                })
            },
        )
        .use_fn(|ctx: &mut MessageContext, next| {
            Box::pin(async move {
                let kind = ctx
                    .message
                    .headers
                    .get(headers::MESSAGE_TYPE)
                    .unwrap_or("unknown")
                    .to_string();
                info!("处理 {kind} 消息 {}", ctx.message);
                ctx.items.insert("kind".to_string(), kind);
                next.run(ctx).await
            })
        })
        .build();

    let batches = PipelineBuilder::new()
        .use_step(KeyCompactionStep)
        .use_fn(|ctx: &mut BatchContext, next| {
            Box::pin(async move {
                info!("压缩后剩余 {} 条消息", ctx.messages.len());
                next.run(ctx).await
            })
        })
        .use_step(BatchToMessages::new(MessageExecutor::with_parallelism(
            messages, 4,
        )?))
        .build();

    let config = ConsumerConfig::load(PathBuf::from(env!("CARGO_MANIFEST_DIR")))?;
    let settings = ConsumerSettings::from_config(&config)
        .subscribe_named("payments", SubscriptionOptions::batch_pipeline(["payments"], batches));

    let consumer = RdKafkaConsumer::create(settings)?;
    let shutdown = CancellationToken::new();
    consumer.start(&shutdown)?;

    tokio::signal::ctrl_c().await?;
    info!("收到中断信号");
    shutdown.cancel();
    consumer.dispose().await;
    Ok(())
}
