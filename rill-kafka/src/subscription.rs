//! ## 订阅选项
//!
//! 一个订阅对应一组主题，以及它们共用的批次参数、批处理器与消息转换器。

use crate::broker::Record;
use bytes::Bytes;
use rill::{
    BatchContext, Headers, IncomingMessage, MessageContext, Pipeline,
    config::SubscribeConfig,
    domain::BatchHandler,
    errors::PipelineError,
    steps::MessageExecutor,
};
use std::{sync::Arc, time::Duration};
use time::OffsetDateTime;

/// 消息转换特征
pub trait MessageConverter: Send + Sync + 'static {
    /// 原始消息转换为应用消息
    fn convert(&self, record: &Record) -> IncomingMessage;
}

impl<F> MessageConverter for F
where
    F: Fn(&Record) -> IncomingMessage + Send + Sync + 'static,
{
    fn convert(&self, record: &Record) -> IncomingMessage {
        self(record)
    }
}

/// 默认消息转换器
///
/// 键与消息头按 UTF-8 解码，值为空的消息头被忽略；缺失时间戳时取 Unix 纪元。
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConverter;

impl MessageConverter for DefaultConverter {
    fn convert(&self, record: &Record) -> IncomingMessage {
        let headers: Headers = record
            .headers
            .iter()
            .filter_map(|(k, v)| {
                v.as_ref()
                    .map(|v| (k.clone(), String::from_utf8_lossy(v).into_owned()))
            })
            .collect();
        let timestamp = record
            .timestamp
            .and_then(|ms| OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        IncomingMessage {
            partition: record.partition.clone(),
            offset: record.offset,
            key: record
                .key
                .as_ref()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            body: record.payload.clone().unwrap_or_else(Bytes::new),
            headers,
            timestamp,
        }
    }
}

/// 订阅选项
#[derive(Clone)]
pub struct SubscriptionOptions {
    topics: Vec<String>,
    pub(crate) batch_size: usize,
    pub(crate) batch_timeout: Duration,
    pub(crate) queue_capacity: usize,
    pub(crate) stop_timeout: Duration,
    pub(crate) max_retry_delay: Duration,
    pub(crate) handler: Arc<dyn BatchHandler>,
    pub(crate) converter: Arc<dyn MessageConverter>,
}

impl SubscriptionOptions {
    /// 构造函数，批次参数取默认值
    pub fn new<I, T>(topics: I, handler: impl BatchHandler) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::with_handler(topics, Arc::new(handler))
    }

    /// 使用共享批处理器
    pub fn with_handler<I, T>(topics: I, handler: Arc<dyn BatchHandler>) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let defaults = SubscribeConfig::default();
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            batch_size: defaults.batch_size,
            batch_timeout: defaults.batch_timeout(),
            queue_capacity: defaults.queue_capacity,
            stop_timeout: defaults.stop_timeout(),
            max_retry_delay: defaults.max_retry_delay(),
            handler,
            converter: Arc::new(DefaultConverter),
        }
    }

    /// 由批次管道处理
    pub fn batch_pipeline<I, T>(topics: I, pipeline: Pipeline<BatchContext>) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::new(topics, pipeline)
    }

    /// 由单条消息管道处理
    pub fn message_pipeline<I, T>(
        topics: I,
        pipeline: Pipeline<MessageContext>,
        parallelism: usize,
    ) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let executor = MessageExecutor::with_parallelism(pipeline, parallelism)?;
        Ok(Self::new(topics, executor))
    }

    /// 应用订阅配置
    pub fn configure(mut self, config: &SubscribeConfig) -> Self {
        self.batch_size = config.batch_size.max(1);
        self.batch_timeout = config.batch_timeout();
        self.queue_capacity = config.queue_capacity.max(1);
        self.stop_timeout = config.stop_timeout();
        self.max_retry_delay = config.max_retry_delay();
        self
    }

    /// 批次最大消息数
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// 批次等待时间
    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// 分区入队容量
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// 关闭等待时间
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// 重试最大间隔
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// 消息转换器
    pub fn converter(mut self, converter: impl MessageConverter) -> Self {
        self.converter = Arc::new(converter);
        self
    }

    /// 订阅的主题
    pub fn topics(&self) -> &[String] {
        &self.topics
    }
}
