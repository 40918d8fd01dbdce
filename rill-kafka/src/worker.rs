//! ## 分区工作者
//!
//! 每个已分配的分区对应一个工作者：入队、按数量或时间组批、依次处理。
//! 入队容量计入已接收但尚未处理完成的消息，队列满时暂停分区而不是阻塞拉取。

use crate::{
    broker::Record,
    errors::WorkerError,
    state::StateManager,
    subscription::SubscriptionOptions,
};
use parking_lot::Mutex;
use rand::Rng;
use rill::{PartitionOffset, TopicPartition, domain::MessageBatch};
use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, mpsc},
    task::JoinHandle,
    time::{Duration, Instant, sleep, timeout, timeout_at},
};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, error, info, instrument, trace, warn};

const MAX_QUEUE_ATTEMPTS: usize = 3;
const QUEUE_RETRY_DELAY: Duration = Duration::from_millis(10);

const ACTIVE: u8 = 0;
const DRAINING: u8 = 1;
const CLOSED: u8 = 2;

/// 工作者状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// 接收消息
    Active,
    /// 关闭中，不再接收消息
    Draining,
    /// 已关闭
    Closed,
}

struct Admitted {
    record: Record,
    _permit: OwnedSemaphorePermit,
}

/// 分区工作者
pub struct PartitionWorker {
    partition: TopicPartition,
    state: Arc<dyn StateManager>,
    stop_timeout: Duration,
    intake: Mutex<Option<mpsc::UnboundedSender<Admitted>>>,
    permits: Arc<Semaphore>,
    latest_queued: Mutex<Option<i64>>,
    status: AtomicU8,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PartitionWorker {
    /// 登记分区并启动批处理任务
    pub fn spawn(
        partition: TopicPartition,
        state: Arc<dyn StateManager>,
        options: Arc<SubscriptionOptions>,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        state.assign(&partition);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = parent.child_token();
        let batcher = Batcher {
            partition: partition.clone(),
            state: Arc::clone(&state),
            options: Arc::clone(&options),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(batcher.run(rx));
        info!("启动分区 {partition} 的工作者");
        Arc::new(Self {
            partition,
            state,
            stop_timeout: options.stop_timeout,
            intake: Mutex::new(Some(tx)),
            permits: Arc::new(Semaphore::new(options.queue_capacity)),
            latest_queued: Mutex::new(None),
            status: AtomicU8::new(ACTIVE),
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// 分区
    #[inline]
    pub fn partition(&self) -> &TopicPartition {
        &self.partition
    }

    /// 当前状态
    pub fn status(&self) -> WorkerStatus {
        match self.status.load(Ordering::Acquire) {
            ACTIVE => WorkerStatus::Active,
            DRAINING => WorkerStatus::Draining,
            _ => WorkerStatus::Closed,
        }
    }

    /// 最近入队的偏移量
    pub fn latest_queued_offset(&self) -> Option<i64> {
        *self.latest_queued.lock()
    }

    /// 消息入队
    ///
    /// 过期、重复或分区暂停期间的消息被直接忽略。队列满时短暂重试，
    /// 仍然失败则暂停分区，该消息在恢复后重新拉取。
    pub async fn enqueue(&self, record: Record) -> Result<(), WorkerError> {
        if self.status() != WorkerStatus::Active {
            return Err(WorkerError::Disposed(self.partition.clone()));
        }
        let offset = record.offset;
        if self.state.is_paused(&self.partition) {
            trace!("分区 {} 已暂停，忽略偏移量 {offset}", self.partition);
            return Ok(());
        }
        if let Some(committed) = self
            .state
            .latest_committed_offset(&self.partition)
            .filter(|committed| offset < *committed)
        {
            trace!("分区 {} 偏移量 {offset} 早于提交位置 {committed}，忽略", self.partition);
            return Ok(());
        }
        if let Some(queued) = self.latest_queued_offset().filter(|queued| offset <= *queued) {
            trace!("分区 {} 偏移量 {offset} 不晚于已入队的 {queued}，忽略", self.partition);
            return Ok(());
        }

        for attempt in 1..=MAX_QUEUE_ATTEMPTS {
            match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => return self.admit(record, permit),
                Err(TryAcquireError::Closed) => {
                    return Err(WorkerError::Disposed(self.partition.clone()));
                }
                Err(TryAcquireError::NoPermits) if attempt == MAX_QUEUE_ATTEMPTS => break,
                Err(TryAcquireError::NoPermits) => {}
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(WorkerError::Cancelled(self.partition.clone()));
                }
                _ = sleep(QUEUE_RETRY_DELAY) => {}
            }
        }

        debug!("分区 {} 队列已满，在偏移量 {offset} 暂停", self.partition);
        self.state.pause(&record.position());
        // 批次先释放容量再恢复分区，暂停晚于最后一次恢复时由这里补上
        if self.permits.available_permits() > 0 {
            debug!("分区 {} 暂停期间队列已有空位，立即恢复", self.partition);
            self.state.resume(&self.partition);
        }
        Ok(())
    }

    fn admit(&self, record: Record, permit: OwnedSemaphorePermit) -> Result<(), WorkerError> {
        let offset = record.offset;
        let intake = self.intake.lock();
        let Some(tx) = intake.as_ref() else {
            return Err(WorkerError::Disposed(self.partition.clone()));
        };
        tx.send(Admitted {
            record,
            _permit: permit,
        })
        .map_err(|_| WorkerError::Disposed(self.partition.clone()))?;
        *self.latest_queued.lock() = Some(offset);
        trace!("分区 {} 偏移量 {offset} 入队", self.partition);
        Ok(())
    }

    /// 关闭工作者
    ///
    /// 停止接收消息，在关闭等待时间内排空队列，超时则取消未完成的处理。
    /// 无论排空与否，最后都提交最近存储的偏移量、恢复分区并清除分区状态。
    #[instrument(name = "dispose_worker", skip_all, fields(partition = %self.partition))]
    pub async fn dispose(&self) {
        if self
            .status
            .compare_exchange(ACTIVE, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        info!("开始关闭工作者");
        self.intake.lock().take();

        let task = self.task.lock().take();
        let drained = match task {
            Some(mut task) => match timeout(self.stop_timeout, &mut task).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    error!("批处理任务异常结束：{e}");
                    true
                }
                Err(_) => {
                    self.cancel.cancel();
                    if let Err(e) = task.await {
                        error!("批处理任务异常结束：{e}");
                    }
                    false
                }
            },
            None => true,
        };
        self.cancel.cancel();

        self.state.commit_latest_stored_offset(&self.partition);
        self.state.resume(&self.partition);
        self.state.revoke(&self.partition);
        self.status.store(CLOSED, Ordering::Release);
        if drained {
            info!("工作者已排空并关闭");
        } else {
            warn!("工作者关闭超时，已取消未完成的批次");
        }
    }
}

struct Batcher {
    partition: TopicPartition,
    state: Arc<dyn StateManager>,
    options: Arc<SubscriptionOptions>,
    cancel: CancellationToken,
}

impl Batcher {
    #[instrument(name = "partition_worker", skip_all, fields(partition = %self.partition))]
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Admitted>) {
        let size = self.options.batch_size;
        loop {
            let first = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                admitted = rx.recv() => match admitted {
                    Some(admitted) => admitted,
                    None => break,
                },
            };
            let deadline = Instant::now() + self.options.batch_timeout;
            let mut batch = Vec::with_capacity(size);
            batch.push(first);
            while batch.len() < size {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    received = timeout_at(deadline, rx.recv()) => match received {
                        Ok(Some(admitted)) => batch.push(admitted),
                        Ok(None) | Err(_) => break,
                    },
                }
            }
            self.process_batch(batch).await;
        }
        debug!("批处理任务结束");
    }

    #[instrument(name = "process_batch", skip_all, fields(first, last, count = batch.len()))]
    async fn process_batch(&self, batch: Vec<Admitted>) {
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            return;
        };
        let (first, last) = (first.record.offset, last.record.offset);
        Span::current().record("first", first).record("last", last);

        let messages: MessageBatch = batch
            .iter()
            .map(|admitted| self.options.converter.convert(&admitted.record))
            .collect();
        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                debug!("工作者已取消，放弃批次");
                return;
            }
            if let Some(committed) = self
                .state
                .latest_committed_offset(&self.partition)
                .filter(|committed| last < *committed)
            {
                warn!("批次已过期，提交位置为 {committed}，跳过");
                return;
            }

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("工作者已取消，放弃批次");
                    return;
                }
                outcome = self.options.handler.handle(Arc::clone(&messages), self.cancel.child_token()) => outcome,
            };
            match outcome {
                Ok(()) => {
                    drop(batch);
                    self.state
                        .store_offset(&PartitionOffset::new(self.partition.clone(), last));
                    self.state.resume(&self.partition);
                    trace!("批次处理完成");
                    return;
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    let delay = retry_delay(attempt, self.options.max_retry_delay);
                    error!("第 {attempt} 次处理批次失败，{delay:?} 后重试：{e}");
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {
                            debug!("工作者已取消，放弃重试");
                            return;
                        }
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// 重试间隔：`10^attempt` 毫秒，不超过最大间隔，另加 3 到 30 毫秒的随机抖动
fn retry_delay(attempt: u32, max: Duration) -> Duration {
    let backoff = 10u64
        .checked_pow(attempt)
        .map(Duration::from_millis)
        .unwrap_or(max)
        .min(max);
    backoff + Duration::from_millis(rand::thread_rng().gen_range(3..30))
}
