mod common;
use common::*;
use futures::future::BoxFuture;
use rill::{Next, PipelineBuilder, Step, StepResult};
use std::sync::Arc;

#[derive(Default)]
struct Trace {
    log: Vec<String>,
    flag: bool,
    failures: usize,
}

struct Record(&'static str);

impl Step<Trace> for Record {
    fn execute<'a>(&'a self, ctx: &'a mut Trace, next: Next<'a, Trace>) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            ctx.log.push(format!("{}:before", self.0));
            next.run(ctx).await?;
            ctx.log.push(format!("{}:after", self.0));
            Ok(())
        })
    }
}

struct Stop;

impl Step<Trace> for Stop {
    fn execute<'a>(&'a self, ctx: &'a mut Trace, _next: Next<'a, Trace>) -> BoxFuture<'a, StepResult> {
        ctx.log.push("stop".to_string());
        Box::pin(async { Ok(()) })
    }
}

struct Fail;

impl Step<Trace> for Fail {
    fn execute<'a>(&'a self, ctx: &'a mut Trace, next: Next<'a, Trace>) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            if ctx.failures > 0 {
                ctx.failures -= 1;
                ctx.log.push("fail".to_string());
                return Err("步骤失败".into());
            }
            next.run(ctx).await
        })
    }
}

struct Retry(usize);

impl Step<Trace> for Retry {
    fn execute<'a>(&'a self, ctx: &'a mut Trace, next: Next<'a, Trace>) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            let mut attempt = 0;
            loop {
                match next.run(ctx).await {
                    Ok(()) => return Ok(()),
                    Err(e) if attempt >= self.0 => return Err(e),
                    Err(_) => attempt += 1,
                }
            }
        })
    }
}

#[tokio::test]
async fn steps_run_in_registration_order() {
    init();
    let pipeline = PipelineBuilder::new()
        .use_step(Record("a"))
        .use_step(Record("b"))
        .use_step(Record("c"))
        .build();
    let mut ctx = Trace::default();

    pipeline.execute(&mut ctx).await.unwrap();

    assert_eq!(pipeline.len(), 3);
    assert_eq!(
        ctx.log,
        ["a:before", "b:before", "c:before", "c:after", "b:after", "a:after"]
    );
}

#[tokio::test]
async fn empty_pipeline_succeeds() {
    let pipeline = PipelineBuilder::<Trace>::new().build();
    let mut ctx = Trace::default();
    assert!(pipeline.is_empty());
    assert!(pipeline.execute(&mut ctx).await.is_ok());
}

#[tokio::test]
async fn step_without_next_short_circuits() {
    let pipeline = PipelineBuilder::new()
        .use_step(Record("a"))
        .use_step(Stop)
        .use_step(Record("b"))
        .build();
    let mut ctx = Trace::default();

    pipeline.execute(&mut ctx).await.unwrap();

    assert_eq!(ctx.log, ["a:before", "stop", "a:after"]);
}

#[tokio::test]
async fn error_propagates_to_caller() {
    let pipeline = PipelineBuilder::new()
        .use_step(Record("a"))
        .use_step(Fail)
        .use_step(Record("b"))
        .build();
    let mut ctx = Trace {
        failures: 1,
        ..Default::default()
    };

    let err = pipeline.execute(&mut ctx).await.unwrap_err();

    assert_eq!(err.to_string(), "步骤失败");
    assert_eq!(ctx.log, ["a:before", "fail"]);
}

#[tokio::test]
async fn continuation_can_run_again() {
    let pipeline = PipelineBuilder::new()
        .use_step(Retry(2))
        .use_step(Fail)
        .use_step(Record("b"))
        .build();
    let mut ctx = Trace {
        failures: 2,
        ..Default::default()
    };

    pipeline.execute(&mut ctx).await.unwrap();

    assert_eq!(ctx.log, ["fail", "fail", "b:before", "b:after"]);
}

#[tokio::test]
async fn closure_steps_share_context() {
    let pipeline = PipelineBuilder::new()
        .use_fn(|ctx: &mut Trace, next| {
            Box::pin(async move {
                ctx.flag = true;
                next.run(ctx).await
            })
        })
        .use_fn(|ctx: &mut Trace, next| {
            Box::pin(async move {
                ctx.log.push(format!("flag={}", ctx.flag));
                next.run(ctx).await
            })
        })
        .build();
    let mut ctx = Trace::default();

    pipeline.execute(&mut ctx).await.unwrap();

    assert_eq!(ctx.log, ["flag=true"]);
}

#[tokio::test]
async fn guarded_step_is_skipped_when_predicate_fails() {
    let pipeline = PipelineBuilder::new()
        .use_step_when(|ctx: &Trace| ctx.flag, Stop)
        .use_step(Record("b"))
        .build();

    let mut skipped = Trace::default();
    pipeline.execute(&mut skipped).await.unwrap();
    assert_eq!(skipped.log, ["b:before", "b:after"]);

    let mut taken = Trace {
        flag: true,
        ..Default::default()
    };
    pipeline.execute(&mut taken).await.unwrap();
    assert_eq!(taken.log, ["stop"]);
}

#[tokio::test]
async fn branch_replaces_remaining_chain() {
    let pipeline = PipelineBuilder::new()
        .use_step(Record("a"))
        .map(
            |ctx: &Trace| ctx.flag,
            |branch| branch.use_step(Record("x")).use_step(Record("y")),
        )
        .use_step(Record("b"))
        .build();

    let mut branched = Trace {
        flag: true,
        ..Default::default()
    };
    pipeline.execute(&mut branched).await.unwrap();
    assert_eq!(
        branched.log,
        ["a:before", "x:before", "y:before", "y:after", "x:after", "a:after"]
    );

    let mut straight = Trace::default();
    pipeline.execute(&mut straight).await.unwrap();
    assert_eq!(
        straight.log,
        ["a:before", "b:before", "b:after", "a:after"]
    );
}

#[tokio::test]
async fn shared_step_serves_several_pipelines() {
    let shared: Arc<dyn Step<Trace>> = Arc::new(Record("shared"));
    let first = PipelineBuilder::new()
        .use_shared(Arc::clone(&shared))
        .use_step(Record("a"))
        .build();
    let second = PipelineBuilder::new()
        .use_step(Record("b"))
        .use_shared(shared)
        .build();
    let mut one = Trace::default();
    let mut two = Trace::default();

    first.execute(&mut one).await.unwrap();
    second.execute(&mut two).await.unwrap();

    assert_eq!(one.log, ["shared:before", "a:before", "a:after", "shared:after"]);
    assert_eq!(two.log, ["b:before", "shared:before", "shared:after", "b:after"]);
}
