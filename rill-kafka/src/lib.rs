//! # **rill** 的 Kafka 实现
//!
//! 每个分配到的分区由一个工作者负责组批与处理，队列满时暂停分区，
//! 处理成功后存储提交位置，再均衡时提交并排空。

pub mod broker;
pub mod config;
pub mod consumer;
pub mod errors;
pub mod state;
pub mod subscription;
pub mod worker;


pub use consumer::{
    ConsumerInfo, ConsumerSettings, ConsumerView, DisposedHook, DropHandler, FixedRecovery,
    KafkaConsumer, RdKafkaConsumer, RecoveryBehaviour,
};
pub use subscription::{DefaultConverter, MessageConverter, SubscriptionOptions};
