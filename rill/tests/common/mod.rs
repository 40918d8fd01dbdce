#![allow(dead_code)]

use bytes::Bytes;
use rill::{Headers, IncomingMessage, TopicPartition};
use std::sync::LazyLock;
use time::{Duration, OffsetDateTime, macros::datetime};
use tracing::{Level, info};
use tracing_subscriber::fmt;

pub const BASE_TIME: OffsetDateTime = datetime!(2024-05-01 10:00:00 UTC);

static SETUP: LazyLock<()> = LazyLock::new(|| {
    fmt().with_test_writer().with_max_level(Level::DEBUG).init();
    info!("启用 {} 测试日志输出", Level::DEBUG);
});

pub fn init() {
    LazyLock::force(&SETUP);
}

pub fn message(offset: i64, key: &str, seconds: i64) -> IncomingMessage {
    IncomingMessage {
        partition: TopicPartition::new("orders", 0),
        offset,
        key: Some(key.to_string()),
        body: Bytes::from(format!("body-{offset}")),
        headers: Headers::new(),
        timestamp: BASE_TIME + Duration::seconds(seconds),
    }
}
