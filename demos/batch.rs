//! 以批处理器消费 `orders` 主题
//!
//! ```sh
//! KAFKA_BOOTSTRAP=localhost:9092 cargo run -p demos --example batch
//! ```

use rill::{domain::MessageBatch, errors::BoxError};
use rill_kafka::{
    ConsumerInfo, ConsumerSettings, ConsumerView, RdKafkaConsumer, RecoveryBehaviour,
    SubscriptionOptions, errors::BrokerError,
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking;
use tracing_subscriber::fmt;

async fn handle(batch: MessageBatch, cancel: CancellationToken) -> Result<(), BoxError> {
    let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
        return Ok(());
    };
    info!(
        "收到 {} 条消息：{} 至 {}",
        batch.len(),
        first.offset,
        last.offset
    );
    for msg in batch.iter() {
        if cancel.is_cancelled() {
            return Err("批次已取消".into());
        }
        info!("{msg}：{}", msg.body_str().unwrap_or("<二进制>"));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let (non_blocking, _guard) = non_blocking(std::io::stdout());
    fmt()
        .with_writer(non_blocking)
        .with_target(false)
        .pretty()
        .init();

    let bootstrap =
        std::env::var("KAFKA_BOOTSTRAP").unwrap_or_else(|_| "localhost:9092".to_string());
    let settings = ConsumerSettings::new(bootstrap, "rill-demo-batch")
        .subscribe(
            SubscriptionOptions::new(["orders"], handle)
                .batch_size(100)
                .batch_timeout(Duration::from_millis(500))
                .queue_capacity(500),
        )
        .on_consumer_dropped(|consumer: Arc<dyn ConsumerView>, e: BrokerError| async move {
            warn!("{} 掉线，持有分区 {:?}：{e}", consumer.info().name, consumer.assigned());
            Ok::<_, BoxError>(RecoveryBehaviour::Stop)
        })
        .on_disposed(|consumer: ConsumerInfo| async move {
            info!("{} 已退出消费组 {}", consumer.name, consumer.group_id);
            Ok::<(), BoxError>(())
        });

    let consumer = RdKafkaConsumer::create(settings)?;
    let shutdown = CancellationToken::new();
    consumer.start(&shutdown)?;

    tokio::signal::ctrl_c().await?;
    info!("收到中断信号");
    shutdown.cancel();
    consumer.dispose().await;
    Ok(())
}
