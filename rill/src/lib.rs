//! # **rill** 核心库
//!
//! 分区消息流消费所需的基础设施：消息模型、通用管道引擎、管道上下文与常用处理步骤。

#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod domain;
pub mod errors;
pub mod message;
pub mod pipeline;
pub mod steps;

pub use context::{BatchContext, Items, MessageContext};
pub use message::{Headers, IncomingMessage, PartitionOffset, TopicPartition};
pub use pipeline::{Next, Pipeline, PipelineBuilder, Step, StepResult};
