//! # **rill** 管道上下文

use crate::message::IncomingMessage;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// 步骤间共享的键值数据
pub type Items = HashMap<String, String>;

/// 批次上下文
#[derive(Debug, Clone)]
pub struct BatchContext {
    /// 批次消息，按偏移量升序
    pub messages: Vec<IncomingMessage>,
    /// 消费者关闭时触发
    pub cancel: CancellationToken,
    /// 共享数据
    pub items: Items,
}

impl BatchContext {
    /// 构造函数
    pub fn new(messages: Vec<IncomingMessage>, cancel: CancellationToken) -> Self {
        Self {
            messages,
            cancel,
            items: Items::new(),
        }
    }

    /// 消费者是否正在关闭
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// 单条消息上下文
#[derive(Debug, Clone)]
pub struct MessageContext {
    /// 消息
    pub message: IncomingMessage,
    /// 消费者关闭时触发
    pub cancel: CancellationToken,
    /// 共享数据，自批次上下文复制而来
    pub items: Items,
}

impl MessageContext {
    /// 构造函数
    pub fn new(message: IncomingMessage, cancel: CancellationToken, items: Items) -> Self {
        Self {
            message,
            cancel,
            items,
        }
    }

    /// 消费者是否正在关闭
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
