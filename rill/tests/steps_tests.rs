mod common;
use common::*;
use futures::future::BoxFuture;
use rill::{
    BatchContext, Items, MessageContext, Next, PipelineBuilder, Step, StepResult,
    domain::{BatchHandler, Clock},
    errors::PipelineError,
    message::headers,
    steps::{BatchToMessages, DelayStep, KeyCompactionStep, MessageExecutor},
};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use time::{Duration as TimeDuration, OffsetDateTime};
use tokio::time::{Duration, Instant, sleep};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct Seen(Arc<Mutex<Vec<i64>>>);

impl Seen {
    fn offsets(&self) -> Vec<i64> {
        self.0.lock().unwrap().clone()
    }
}

impl Step<MessageContext> for Seen {
    fn execute<'a>(
        &'a self,
        ctx: &'a mut MessageContext,
        next: Next<'a, MessageContext>,
    ) -> BoxFuture<'a, StepResult> {
        self.0.lock().unwrap().push(ctx.message.offset);
        next.run(ctx)
    }
}

#[derive(Clone, Default)]
struct Concurrency {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Step<MessageContext> for Concurrency {
    fn execute<'a>(
        &'a self,
        ctx: &'a mut MessageContext,
        next: Next<'a, MessageContext>,
    ) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            next.run(ctx).await
        })
    }
}

#[tokio::test]
async fn compaction_keeps_latest_per_key() {
    init();
    let seen = Seen::default();
    let probe = seen.clone();
    let pipeline = PipelineBuilder::new()
        .use_step(KeyCompactionStep)
        .use_fn(move |ctx: &mut BatchContext, next| {
            probe
                .0
                .lock()
                .unwrap()
                .extend(ctx.messages.iter().map(|m| m.offset));
            next.run(ctx)
        })
        .build();
    let mut ctx = BatchContext::new(
        vec![
            message(1, "a", 1),
            message(2, "b", 1),
            message(3, "a", 3),
            message(4, "a", 2),
            message(5, "b", 1),
        ],
        CancellationToken::new(),
    );

    pipeline.execute(&mut ctx).await.unwrap();

    assert_eq!(seen.offsets(), [3, 5]);
    assert_eq!(ctx.messages.len(), 2);
    assert_eq!(ctx.messages[0].key.as_deref(), Some("a"));
}

#[tokio::test]
async fn executor_runs_messages_in_offset_order() {
    let seen = Seen::default();
    let executor = MessageExecutor::new(PipelineBuilder::new().use_step(seen.clone()).build());
    let messages = [message(3, "a", 0), message(1, "b", 0), message(2, "c", 0)];

    executor
        .execute(&messages, &CancellationToken::new(), &Items::new())
        .await
        .unwrap();

    assert_eq!(seen.offsets(), [1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn executor_bounds_parallelism() {
    let probe = Concurrency::default();
    let seen = Seen::default();
    let pipeline = PipelineBuilder::new()
        .use_step(probe.clone())
        .use_step(seen.clone())
        .build();
    let executor = MessageExecutor::with_parallelism(pipeline, 2).unwrap();
    let messages: Vec<_> = (1..=6).map(|i| message(i, "k", 0)).collect();

    executor
        .execute(&messages, &CancellationToken::new(), &Items::new())
        .await
        .unwrap();

    assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
    let mut offsets = seen.offsets();
    offsets.sort();
    assert_eq!(offsets, [1, 2, 3, 4, 5, 6]);
}

#[test]
fn executor_rejects_zero_parallelism() {
    let pipeline = PipelineBuilder::<MessageContext>::new().build();
    assert!(matches!(
        MessageExecutor::with_parallelism(pipeline, 0),
        Err(PipelineError::InvalidParallelism(0))
    ));
}

#[tokio::test]
async fn executor_waits_for_all_before_failing() {
    let seen = Seen::default();
    let pipeline = PipelineBuilder::new()
        .use_step(seen.clone())
        .use_fn(|ctx: &mut MessageContext, next| {
            Box::pin(async move {
                if ctx.message.offset == 2 {
                    return Err("消息处理失败".into());
                }
                next.run(ctx).await
            })
        })
        .build();
    let executor = MessageExecutor::with_parallelism(pipeline, 4).unwrap();
    let messages: Vec<_> = (1..=5).map(|i| message(i, "k", 0)).collect();

    let err = executor
        .execute(&messages, &CancellationToken::new(), &Items::new())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "消息处理失败");
    assert_eq!(seen.offsets().len(), 5);
}

#[tokio::test]
async fn items_are_cloned_per_message() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let probe = Arc::clone(&seen);
    let messages = PipelineBuilder::new()
        .use_fn(move |ctx: &mut MessageContext, next| {
            let offset = ctx.message.offset.to_string();
            let previous = ctx.items.insert("offset".to_string(), offset);
            probe.lock().unwrap().push(previous);
            next.run(ctx)
        })
        .build();
    let pipeline = PipelineBuilder::new()
        .use_step(BatchToMessages::new(MessageExecutor::new(messages)))
        .build();
    let mut ctx = BatchContext::new(
        vec![message(1, "a", 0), message(2, "b", 0)],
        CancellationToken::new(),
    );
    ctx.items.insert("tenant".to_string(), "t1".to_string());

    pipeline.execute(&mut ctx).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), [None::<String>, None]);
    assert_eq!(ctx.items.len(), 1);
}

#[tokio::test]
async fn pipeline_handles_batches() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let probe = Arc::clone(&seen);
    let pipeline = PipelineBuilder::new()
        .use_fn(move |ctx: &mut BatchContext, next| {
            probe
                .lock()
                .unwrap()
                .extend(ctx.messages.iter().map(|m| m.offset));
            next.run(ctx)
        })
        .build();

    pipeline
        .handle(
            vec![message(7, "a", 0), message(8, "a", 1)].into(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), [7, 8]);
}

fn delayed(published_at: OffsetDateTime, delay: i64) -> MessageContext {
    let mut msg = message(1, "a", 0);
    msg.headers.insert(
        headers::PUBLISHED_AT,
        published_at
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap(),
    );
    msg.headers.insert(headers::DELAY_SECONDS, delay.to_string());
    MessageContext::new(msg, CancellationToken::new(), Items::new())
}

#[tokio::test(start_paused = true)]
async fn delay_waits_until_due() {
    let pipeline = PipelineBuilder::new()
        .use_step(DelayStep::new(|| BASE_TIME))
        .build();
    let mut ctx = delayed(BASE_TIME - TimeDuration::seconds(2), 5);
    let start = Instant::now();

    pipeline.execute(&mut ctx).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(3));
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn delay_skips_when_due_or_missing_headers() {
    let pipeline = PipelineBuilder::new()
        .use_step(DelayStep::new(|| BASE_TIME))
        .build();
    let start = Instant::now();

    let mut overdue = delayed(BASE_TIME - TimeDuration::seconds(10), 5);
    pipeline.execute(&mut overdue).await.unwrap();
    let mut plain = MessageContext::new(message(2, "a", 0), CancellationToken::new(), Items::new());
    pipeline.execute(&mut plain).await.unwrap();

    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn delay_observes_cancellation() {
    let pipeline = PipelineBuilder::new()
        .use_step(DelayStep::new(|| BASE_TIME))
        .build();
    let mut ctx = delayed(BASE_TIME, 60);
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(1)).await;
        cancel.cancel();
    });

    let err = pipeline.execute(&mut ctx).await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::Cancelled)
    ));
}

#[tokio::test(start_paused = true)]
async fn delay_steps_share_one_clock() {
    let clock: Arc<dyn Clock> = Arc::new(|| BASE_TIME);
    let pipeline = PipelineBuilder::new()
        .use_step(DelayStep::with_clock(Arc::clone(&clock)))
        .use_step(DelayStep::with_clock(clock))
        .build();
    let mut ctx = delayed(BASE_TIME - TimeDuration::seconds(1), 3);
    let start = Instant::now();

    pipeline.execute(&mut ctx).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(4));
    assert!(start.elapsed() < Duration::from_secs(5));
}
