//! # **rill** 消息模型

use bytes::Bytes;
use std::{
    collections::HashMap,
    fmt::{self, Display},
    str::FromStr,
    sync::Arc,
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// 常用消息头名称
pub mod headers {
    /// 发布时间，RFC 3339 格式
    pub const PUBLISHED_AT: &str = "X-PublishedAt";
    /// 消息类型
    pub const MESSAGE_TYPE: &str = "X-Type";
    /// 延迟处理的秒数，配合发布时间使用
    pub const DELAY_SECONDS: &str = "X-DelaySeconds";
}

/// 主题分区
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    topic: Arc<str>,
    partition: i32,
}

impl TopicPartition {
    /// 构造函数，负分区号取绝对值
    pub fn new(topic: impl Into<Arc<str>>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition: partition.saturating_abs(),
        }
    }

    /// 主题
    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 分区号
    #[inline]
    pub fn partition(&self) -> i32 {
        self.partition
    }
}

impl Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.topic, self.partition)
    }
}

/// 分区偏移量
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionOffset {
    /// 主题分区
    pub partition: TopicPartition,
    /// 偏移量
    pub offset: i64,
}

impl PartitionOffset {
    /// 构造函数
    pub fn new(partition: TopicPartition, offset: i64) -> Self {
        Self { partition, offset }
    }
}

impl Display for PartitionOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @{}", self.partition, self.offset)
    }
}

/// 消息头
///
/// 名称查找忽略 ASCII 大小写，保留写入时的原始名称。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: HashMap<String, (String, String)>,
}

impl Headers {
    /// 构造函数
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入消息头，同名（忽略大小写）时覆盖并返回旧值
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        self.entries
            .insert(name.to_ascii_lowercase(), (name, value.into()))
            .map(|(_, v)| v)
    }

    /// 读取消息头
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, v)| v.as_str())
    }

    /// 按类型解析消息头
    pub fn get_as<T: FromStr>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    /// 按 RFC 3339 解析时间消息头
    pub fn get_datetime(&self, name: &str) -> Option<OffsetDateTime> {
        self.get(name)
            .and_then(|v| OffsetDateTime::parse(v.trim(), &Rfc3339).ok())
    }

    /// 是否包含消息头
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// 移除消息头
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries
            .remove(&name.to_ascii_lowercase())
            .map(|(_, v)| v)
    }

    /// 消息头数量
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按原始名称迭代
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// 交付给应用的消息
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    /// 主题分区
    pub partition: TopicPartition,
    /// 偏移量
    pub offset: i64,
    /// 消息键
    pub key: Option<String>,
    /// 消息体
    pub body: Bytes,
    /// 消息头
    pub headers: Headers,
    /// 发布时间
    pub timestamp: OffsetDateTime,
}

impl IncomingMessage {
    /// 分区偏移量
    pub fn position(&self) -> PartitionOffset {
        PartitionOffset::new(self.partition.clone(), self.offset)
    }

    /// 消息体按 UTF-8 解码
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

impl Display for IncomingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key={}, {} @{}, timestamp={}",
            self.key.as_deref().unwrap_or(""),
            self.partition,
            self.offset,
            self.timestamp
        )
    }
}
