use super::{Broker, PollEvent, RebalanceListener, Record};
use crate::errors::BrokerError;
use bytes::Bytes;
use rdkafka::{
    ClientConfig, Message, Offset, TopicPartitionList,
    client::ClientContext,
    consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer},
    error::KafkaError,
    message::{BorrowedMessage, Headers},
    types::RDKafkaErrorCode,
};
use rill::{PartitionOffset, TopicPartition};
use std::{
    sync::{Arc, OnceLock, Weak},
    time::Duration,
};
use tracing::{debug, error, info, warn};

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// 把再均衡回调转发给监听者的客户端上下文
#[derive(Default)]
pub struct RebalanceContext {
    listener: OnceLock<Weak<dyn RebalanceListener>>,
}

impl RebalanceContext {
    fn listener(&self) -> Option<Arc<dyn RebalanceListener>> {
        self.listener.get().and_then(Weak::upgrade)
    }
}

impl ClientContext for RebalanceContext {
    fn error(&self, err: KafkaError, reason: &str) {
        match err.rdkafka_error_code() {
            Some(RDKafkaErrorCode::Fatal) => error!("Kafka客户端致命错误：{err}，{reason}"),
            _ => warn!("Kafka客户端错误：{err}，{reason}"),
        }
    }
}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, _: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(tpl) => {
                let partitions = partitions(tpl);
                info!("撤销 {} 个分区", partitions.len());
                if let Some(listener) = self.listener() {
                    listener.on_revoked(&partitions);
                }
            }
            Rebalance::Assign(_) => {}
            Rebalance::Error(e) => error!("再均衡错误：{e}"),
        }
    }

    fn post_rebalance(&self, _: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Assign(tpl) = rebalance {
            let partitions = partitions(tpl);
            info!("分配 {} 个分区", partitions.len());
            if let Some(listener) = self.listener() {
                listener.on_assigned(&partitions);
            }
        }
    }
}

fn partitions(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|e| TopicPartition::new(e.topic(), e.partition()))
        .collect()
}

fn partition_list(partitions: &[TopicPartition]) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::with_capacity(partitions.len());
    for tp in partitions {
        tpl.add_partition(tp.topic(), tp.partition());
    }
    tpl
}

fn offset_list(positions: &[PartitionOffset]) -> Result<TopicPartitionList, BrokerError> {
    let mut tpl = TopicPartitionList::with_capacity(positions.len());
    for pos in positions {
        tpl.add_partition_offset(
            pos.partition.topic(),
            pos.partition.partition(),
            Offset::Offset(pos.offset),
        )?;
    }
    Ok(tpl)
}

fn record(msg: &BorrowedMessage<'_>) -> Record {
    let headers = msg
        .headers()
        .map(|hs| {
            hs.iter()
                .map(|h| (h.key.to_string(), h.value.map(Bytes::copy_from_slice)))
                .collect()
        })
        .unwrap_or_default();
    Record {
        partition: TopicPartition::new(msg.topic(), msg.partition()),
        offset: msg.offset(),
        key: msg.key().map(Bytes::copy_from_slice),
        payload: msg.payload().map(Bytes::copy_from_slice),
        headers,
        timestamp: msg.timestamp().to_millis(),
    }
}

/// 基于 `rdkafka` 的消息代理
pub struct KafkaBroker {
    name: String,
    consumer: StreamConsumer<RebalanceContext>,
}

impl KafkaBroker {
    /// 构造函数
    pub fn new(config: &ClientConfig) -> Result<Self, KafkaError> {
        let name = config.get("client.id").unwrap_or("rill").to_string();
        let consumer = config.create_with_context(RebalanceContext::default())?;
        Ok(Self { name, consumer })
    }
}

impl Broker for KafkaBroker {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_listener(&self, listener: Weak<dyn RebalanceListener>) {
        if self.consumer.context().listener.set(listener).is_err() {
            warn!("再均衡监听已注册，忽略重复注册");
        }
    }

    fn subscribe(&self, topics: &[String]) -> Result<(), BrokerError> {
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics)?;
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Result<Option<PollEvent>, BrokerError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(msg)) => Ok(Some(PollEvent::Record(record(&msg)))),
            Ok(Err(KafkaError::PartitionEOF(partition))) => {
                Ok(Some(PollEvent::EndOfPartition(partition)))
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }

    fn pause(&self, partitions: &[TopicPartition]) -> Result<(), BrokerError> {
        self.consumer.pause(&partition_list(partitions))?;
        Ok(())
    }

    fn resume(&self, partitions: &[TopicPartition]) -> Result<(), BrokerError> {
        self.consumer.resume(&partition_list(partitions))?;
        Ok(())
    }

    fn seek(&self, position: &PartitionOffset) -> Result<(), BrokerError> {
        self.consumer.seek(
            position.partition.topic(),
            position.partition.partition(),
            Offset::Offset(position.offset),
            SEEK_TIMEOUT,
        )?;
        Ok(())
    }

    fn store_offset(&self, position: &PartitionOffset) -> Result<(), BrokerError> {
        let tpl = offset_list(std::slice::from_ref(position))?;
        self.consumer.store_offsets(&tpl)?;
        Ok(())
    }

    fn commit(&self, positions: &[PartitionOffset]) -> Result<(), BrokerError> {
        let tpl = offset_list(positions)?;
        self.consumer.commit(&tpl, CommitMode::Sync)?;
        Ok(())
    }

    fn unsubscribe(&self) {
        self.consumer.unsubscribe();
        debug!("{} 已取消订阅", self.name);
    }

    fn close(&self) {
        if let Err(e) = self.consumer.unassign() {
            warn!("{} 释放分区失败：{e}", self.name);
        }
        info!("{} 已关闭", self.name);
    }
}
