//! # **rill** 错误定义

use thiserror::Error;

/// 应用处理错误
///
/// 处理步骤与批处理器返回的错误类型，不限定具体错误。
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 配置错误枚举
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置加载错误
    #[error("配置加载错误：{0}")]
    Build(#[from] config::ConfigError),
    /// 配置验证错误
    #[error("配置'{section}.{key}'验证错误：{message}")]
    ValidationError {
        /// 配置节
        section: String,
        /// 配置名称
        key: String,
        /// 错误信息
        message: String,
    },
    /// 配置项不合法
    #[error("配置项不合法：{0}")]
    Invalid(String),
}

impl From<&str> for ConfigError {
    fn from(s: &str) -> Self {
        ConfigError::Invalid(s.to_owned())
    }
}

/// 管道错误枚举
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 执行已取消
    #[error("管道执行已取消")]
    Cancelled,
    /// 并行度不合法
    #[error("并行度必须大于零：{0}")]
    InvalidParallelism(usize),
}
