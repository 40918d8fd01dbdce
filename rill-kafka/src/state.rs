//! ## 主题状态管理
//!
//! 按分区维护三类状态：最近存储的提交位置、暂停位置与分配时间。
//! 暂停、恢复与提交都经由状态管理器调用代理，失败只记录日志。

use crate::{broker::Broker, errors::BrokerError};
use ahash::RandomState;
use dashmap::{DashMap, mapref::entry::Entry};
use rill::{PartitionOffset, TopicPartition, domain::Clock};
use std::{slice, sync::Arc};
use time::OffsetDateTime;
use tracing::{debug, trace, warn};

type PartitionMap<V> = DashMap<TopicPartition, V, RandomState>;

/// 分区状态管理特征
pub trait StateManager: Send + Sync {
    /// 登记分区分配
    fn assign(&self, partition: &TopicPartition);

    /// 清除分区的全部状态
    fn revoke(&self, partition: &TopicPartition);

    /// 在指定偏移量暂停分区，已暂停时不做任何事
    fn pause(&self, position: &PartitionOffset);

    /// 恢复已暂停的分区，并把读取位置重置到暂停偏移量
    fn resume(&self, partition: &TopicPartition);

    /// 分区是否已暂停
    fn is_paused(&self, partition: &TopicPartition) -> bool;

    /// 存储已处理的偏移量
    fn store_offset(&self, position: &PartitionOffset);

    /// 最近存储的提交位置，即下一条待处理消息的偏移量
    fn latest_committed_offset(&self, partition: &TopicPartition) -> Option<i64>;

    /// 同步提交最近存储的提交位置
    fn commit_latest_stored_offset(&self, partition: &TopicPartition);
}

/// 主题状态管理器
pub struct TopicStateManager<B> {
    broker: Arc<B>,
    clock: Arc<dyn Clock>,
    paused: PartitionMap<i64>,
    offsets: PartitionMap<i64>,
    assigned: PartitionMap<OffsetDateTime>,
}

impl<B: Broker> TopicStateManager<B> {
    /// 构造函数
    pub fn new(broker: Arc<B>, clock: Arc<dyn Clock>) -> Self {
        Self {
            broker,
            clock,
            paused: DashMap::with_hasher(RandomState::new()),
            offsets: DashMap::with_hasher(RandomState::new()),
            assigned: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// 分区分配时间
    pub fn assigned_at(&self, partition: &TopicPartition) -> Option<OffsetDateTime> {
        self.assigned.get(partition).map(|at| *at)
    }

    /// 分区暂停时的偏移量
    pub fn paused_at(&self, partition: &TopicPartition) -> Option<i64> {
        self.paused.get(partition).map(|offset| *offset)
    }

    fn store(&self, position: &PartitionOffset) {
        match self.broker.store_offset(position) {
            Ok(()) => trace!("已存储提交位置 {position}"),
            Err(e) => warn!("存储提交位置 {position} 失败：{e}"),
        }
    }
}

impl<B: Broker> StateManager for TopicStateManager<B> {
    fn assign(&self, partition: &TopicPartition) {
        self.assigned.insert(partition.clone(), self.clock.now());
        debug!("登记分区 {partition}");
    }

    fn revoke(&self, partition: &TopicPartition) {
        self.paused.remove(partition);
        self.offsets.remove(partition);
        self.assigned.remove(partition);
        debug!("清除分区 {partition} 的状态");
    }

    fn pause(&self, position: &PartitionOffset) {
        match self.paused.entry(position.partition.clone()) {
            Entry::Occupied(_) => trace!("分区 {} 已暂停", position.partition),
            Entry::Vacant(entry) => {
                match self.broker.pause(slice::from_ref(&position.partition)) {
                    Ok(()) => {
                        entry.insert(position.offset);
                        debug!("暂停分区 {position}");
                    }
                    Err(e) => warn!("暂停分区 {position} 失败：{e}"),
                }
            }
        }
    }

    fn resume(&self, partition: &TopicPartition) {
        if let Entry::Occupied(entry) = self.paused.entry(partition.clone()) {
            let position = PartitionOffset::new(partition.clone(), *entry.get());
            if let Err(e) = self.broker.seek(&position) {
                warn!("重置分区 {position} 读取位置失败：{e}");
            }
            match self.broker.resume(slice::from_ref(partition)) {
                Ok(()) => debug!("恢复分区 {position}"),
                Err(e) => warn!("恢复分区 {position} 失败：{e}"),
            }
            entry.remove();
        }
    }

    fn is_paused(&self, partition: &TopicPartition) -> bool {
        self.paused.contains_key(partition)
    }

    fn store_offset(&self, position: &PartitionOffset) {
        let next = position.offset + 1;
        let target = PartitionOffset::new(position.partition.clone(), next);
        match self.offsets.entry(position.partition.clone()) {
            Entry::Occupied(mut entry) => {
                let cached = *entry.get();
                if next < cached {
                    warn!(
                        "分区 {} 的提交位置 {next} 落后于已存储的 {cached}，跳过存储",
                        position.partition
                    );
                    return;
                }
                self.store(&target);
                entry.insert(next);
            }
            Entry::Vacant(entry) => {
                self.store(&target);
                entry.insert(next);
            }
        }
    }

    fn latest_committed_offset(&self, partition: &TopicPartition) -> Option<i64> {
        self.offsets.get(partition).map(|offset| *offset)
    }

    fn commit_latest_stored_offset(&self, partition: &TopicPartition) {
        let Some(next) = self.latest_committed_offset(partition) else {
            trace!("分区 {partition} 没有待提交的偏移量");
            return;
        };
        let position = PartitionOffset::new(partition.clone(), next);
        match self.broker.commit(slice::from_ref(&position)) {
            Ok(()) => debug!("提交 {position}"),
            Err(BrokerError::NotMember(e)) => debug!("消费者已不在消费组中，忽略提交 {position}：{e}"),
            Err(e) => warn!("提交 {position} 失败：{e}"),
        }
    }
}
