use super::{ConsumerInfo, ConsumerSettings, ConsumerView, RecoveryBehaviour};
use crate::{
    broker::{Broker, KafkaBroker, PollEvent, RebalanceListener, Record},
    errors::{BrokerError, ConsumerError},
    state::{StateManager, TopicStateManager},
    worker::PartitionWorker,
};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use rill::TopicPartition;
use std::sync::{
    Arc, OnceLock, Weak,
    atomic::{AtomicBool, Ordering},
};
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// 基于 `rdkafka` 的消费者
pub type RdKafkaConsumer = KafkaConsumer<KafkaBroker>;

/// 消费者
///
/// 启动后在独立任务中运行拉取循环，按分区把消息分发给分区工作者。
/// 分区的分配与撤销由代理的再均衡回调驱动。
pub struct KafkaConsumer<B: Broker> {
    core: Arc<ConsumerCore<B>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl KafkaConsumer<KafkaBroker> {
    /// 以 `rdkafka` 客户端创建消费者
    pub fn create(settings: ConsumerSettings) -> Result<Self, ConsumerError> {
        settings.validate()?;
        let broker = KafkaBroker::new(&settings.client_config())?;
        Self::with_broker(settings, Arc::new(broker))
    }
}

impl<B: Broker> KafkaConsumer<B> {
    /// 以指定代理创建消费者
    pub fn with_broker(settings: ConsumerSettings, broker: Arc<B>) -> Result<Self, ConsumerError> {
        settings.validate()?;
        let state = Arc::new(TopicStateManager::new(
            Arc::clone(&broker),
            Arc::clone(&settings.clock),
        ));
        let info = settings.info();
        let core = Arc::new(ConsumerCore {
            settings,
            info,
            broker,
            state,
            workers: DashMap::with_hasher(RandomState::new()),
            rebalance: Mutex::new(()),
            revoked: Mutex::new(Vec::new()),
            worker_cancel: CancellationToken::new(),
            loop_cancel: OnceLock::new(),
            runtime: OnceLock::new(),
            disposed: AtomicBool::new(false),
        });
        let weak = Arc::downgrade(&core);
        let listener: Weak<dyn RebalanceListener> = weak;
        core.broker.set_listener(listener);
        Ok(Self {
            core,
            poll_task: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// 订阅全部主题并启动拉取循环
    ///
    /// 关闭令牌取消后拉取循环退出，随后关闭全部分区工作者。
    pub fn start(&self, shutdown: &CancellationToken) -> Result<(), ConsumerError> {
        if self.core.disposed.load(Ordering::Acquire) {
            return Err(ConsumerError::Disposed);
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConsumerError::AlreadyStarted);
        }
        let runtime = Handle::try_current()?;
        let _ = self.core.runtime.set(runtime.clone());

        let topics = self.core.settings.topics();
        if let Err(e) = self.core.broker.subscribe(&topics) {
            error!("{} 订阅主题 {topics:?} 失败：{e}", self.core.info.name);
            return Err(ConsumerError::Subscribe(e));
        }
        info!("{} 成功订阅主题 {topics:?}", self.core.info.name);

        let token = self.core.loop_cancel.get_or_init(|| shutdown.child_token()).clone();
        let core = Arc::clone(&self.core);
        *self.poll_task.lock() = Some(runtime.spawn(core.consume(token)));
        Ok(())
    }

    /// 关闭消费者
    ///
    /// 停止拉取，排空并关闭全部分区工作者，取消订阅并关闭代理，最后调用关闭回调。
    /// 可重复调用。
    pub async fn dispose(&self) {
        if let Some(token) = self.core.loop_cancel.get() {
            token.cancel();
        }
        let task = self.poll_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("拉取任务异常结束：{e}");
            }
        }
        self.core.shutdown().await;
    }

    /// 消费者标识
    pub fn info(&self) -> &ConsumerInfo {
        &self.core.info
    }

    /// 当前持有工作者的分区，按主题与分区号排序
    pub fn assigned(&self) -> Vec<TopicPartition> {
        self.core.assigned()
    }

    /// 分区工作者
    pub fn worker(&self, partition: &TopicPartition) -> Option<Arc<PartitionWorker>> {
        self.core.worker(partition)
    }

    /// 主题状态管理器
    pub fn state(&self) -> &Arc<TopicStateManager<B>> {
        &self.core.state
    }

    /// 是否已关闭
    pub fn is_disposed(&self) -> bool {
        self.core.is_disposed()
    }
}

struct ConsumerCore<B: Broker> {
    settings: ConsumerSettings,
    info: ConsumerInfo,
    broker: Arc<B>,
    state: Arc<TopicStateManager<B>>,
    workers: DashMap<TopicPartition, Arc<PartitionWorker>, RandomState>,
    rebalance: Mutex<()>,
    revoked: Mutex<Vec<JoinHandle<()>>>,
    // 不挂在应用关闭令牌下，应用关闭时工作者先排空
    worker_cancel: CancellationToken,
    loop_cancel: OnceLock<CancellationToken>,
    runtime: OnceLock<Handle>,
    disposed: AtomicBool,
}

impl<B: Broker> ConsumerCore<B> {
    #[instrument(name = "consume", skip_all, fields(consumer = %self.info.name))]
    async fn consume(self: Arc<Self>, cancel: CancellationToken) {
        info!("开始拉取消息");
        loop {
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("收到关闭信号，停止拉取");
                    break;
                }
                polled = self.broker.poll(self.settings.poll_timeout) => polled,
            };
            match polled {
                Ok(None) => {}
                Ok(Some(PollEvent::EndOfPartition(partition))) => {
                    trace!("已读到分区 {partition} 末尾");
                }
                Ok(Some(PollEvent::Record(record))) => self.dispatch(record).await,
                Err(e) if e.is_drop() => {
                    error!("消费者掉线：{e}");
                    if !Arc::clone(&self).recover(e).await {
                        break;
                    }
                }
                Err(e) => warn!("拉取消息失败：{e}"),
            }
        }
        self.shutdown().await;
    }

    async fn dispatch(&self, record: Record) {
        let Some(worker) = self.workers.get(&record.partition).map(|w| Arc::clone(&w)) else {
            warn!("分区 {} 没有工作者，忽略偏移量 {}", record.partition, record.offset);
            return;
        };
        if let Err(e) = worker.enqueue(record).await {
            warn!("消息入队失败：{e}");
        }
    }

    async fn recover(self: Arc<Self>, e: BrokerError) -> bool {
        let handler = Arc::clone(&self.settings.drop_handler);
        let view: Arc<dyn ConsumerView> = self;
        match handler.on_dropped(view, e).await {
            Ok(RecoveryBehaviour::Retry) => {
                info!("掉线处理器要求继续拉取");
                true
            }
            Ok(RecoveryBehaviour::Stop) => {
                info!("掉线处理器要求停止消费者");
                false
            }
            Err(e) => {
                error!("掉线处理器执行失败，停止消费者：{e}");
                false
            }
        }
    }

    fn spawn_worker(&self, partition: &TopicPartition) -> Option<Arc<PartitionWorker>> {
        let Some(options) = self.settings.subscription_for(partition.topic()) else {
            error!("主题 {} 没有订阅选项，跳过分区 {partition}", partition.topic());
            return None;
        };
        let state: Arc<dyn StateManager> = self.state.clone();
        Some(PartitionWorker::spawn(
            partition.clone(),
            state,
            options,
            &self.worker_cancel,
        ))
    }

    async fn shutdown(&self) {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        info!("{} 开始关闭", self.info.name);
        if let Some(token) = self.loop_cancel.get() {
            token.cancel();
        }

        let workers: Vec<Arc<PartitionWorker>> = {
            let _guard = self.rebalance.lock();
            let partitions: Vec<TopicPartition> =
                self.workers.iter().map(|e| e.key().clone()).collect();
            partitions
                .iter()
                .filter_map(|tp| self.workers.remove(tp).map(|(_, w)| w))
                .collect()
        };
        for worker in &workers {
            worker.dispose().await;
        }

        let revoked = std::mem::take(&mut *self.revoked.lock());
        for handle in revoked {
            if let Err(e) = handle.await {
                error!("分区工作者关闭任务异常结束：{e}");
            }
        }
        self.worker_cancel.cancel();

        self.broker.unsubscribe();
        self.broker.close();
        if let Some(hook) = &self.settings.disposed_hook {
            if let Err(e) = hook.on_disposed(self.info.clone()).await {
                warn!("关闭回调执行失败：{e}");
            }
        }
        info!("{} 已关闭", self.info.name);
    }
}

impl<B: Broker> ConsumerView for ConsumerCore<B> {
    fn info(&self) -> &ConsumerInfo {
        &self.info
    }

    fn assigned(&self) -> Vec<TopicPartition> {
        let mut partitions: Vec<TopicPartition> =
            self.workers.iter().map(|e| e.key().clone()).collect();
        partitions.sort();
        partitions
    }

    fn worker(&self, partition: &TopicPartition) -> Option<Arc<PartitionWorker>> {
        self.workers.get(partition).map(|w| Arc::clone(&w))
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl<B: Broker> RebalanceListener for ConsumerCore<B> {
    fn on_assigned(&self, partitions: &[TopicPartition]) {
        let _guard = self.rebalance.lock();
        if self.disposed.load(Ordering::Acquire) {
            debug!("消费者已关闭，忽略分区分配");
            return;
        }
        let runtime = match self.runtime.get() {
            Some(runtime) => runtime.clone(),
            None => match Handle::try_current() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("分区分配不在异步运行时中：{e}");
                    return;
                }
            },
        };
        let _enter = runtime.enter();

        for tp in partitions {
            if self.workers.contains_key(tp) {
                continue;
            }
            if let Some(worker) = self.spawn_worker(tp) {
                self.workers.insert(tp.clone(), worker);
            }
        }

        let removed: Vec<TopicPartition> = self
            .workers
            .iter()
            .map(|e| e.key().clone())
            .filter(|tp| !partitions.contains(tp))
            .collect();
        let mut revoked = self.revoked.lock();
        revoked.retain(|handle| !handle.is_finished());
        for tp in removed {
            if let Some((_, worker)) = self.workers.remove(&tp) {
                info!("分区 {tp} 不再分配，关闭工作者");
                revoked.push(runtime.spawn(async move { worker.dispose().await }));
            }
        }
        info!("当前持有 {} 个分区", self.workers.len());
    }

    fn on_revoked(&self, partitions: &[TopicPartition]) {
        let _guard = self.rebalance.lock();
        for tp in partitions {
            if self.workers.contains_key(tp) {
                self.state.commit_latest_stored_offset(tp);
            }
        }
    }
}
