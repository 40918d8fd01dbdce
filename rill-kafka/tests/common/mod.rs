#![allow(dead_code)]

use std::sync::LazyLock;
use tracing::{Level, info};
use tracing_subscriber::fmt;

static SETUP: LazyLock<()> = LazyLock::new(|| {
    fmt().with_test_writer().with_max_level(Level::DEBUG).init();
    info!("启用 {} 测试日志输出", Level::DEBUG);
});

pub fn init() {
    LazyLock::force(&SETUP);
}

pub fn parse(toml: &str) -> config::Config {
    config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()
        .unwrap()
}
