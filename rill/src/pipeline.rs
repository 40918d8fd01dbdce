//! # **rill** 管道引擎
//!
//! 管道由有序的处理步骤组成。每个步骤拿到上下文与后续链 [`Next`]，
//! 可以在调用后续链之前或之后处理，也可以不调用后续链直接结束。
//!
//! ```ignore
//! let pipeline = PipelineBuilder::<MessageContext>::new()
//!     .use_fn(|ctx, next| {
//!         Box::pin(async move {
//!             info!("开始处理：{}", ctx.message);
//!             next.run(ctx).await
//!         })
//!     })
//!     .use_step(DelayStep::new(SystemClock))
//!     .build();
//! ```

mod builder;

pub use builder::PipelineBuilder;

use crate::errors::BoxError;
use futures::future::BoxFuture;
use std::sync::Arc;

/// 步骤执行结果
pub type StepResult = Result<(), BoxError>;

/// 处理步骤特征
pub trait Step<C>: Send + Sync + 'static {
    /// 执行步骤
    fn execute<'a>(&'a self, ctx: &'a mut C, next: Next<'a, C>) -> BoxFuture<'a, StepResult>;
}

/// 后续步骤链
///
/// 可以多次调用，每次都从下一个步骤开始执行。
pub struct Next<'a, C> {
    rest: &'a [Arc<dyn Step<C>>],
}

impl<C> Clone for Next<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Next<'_, C> {}

impl<'a, C: Send + 'static> Next<'a, C> {
    /// 执行后续步骤链
    pub fn run<'b>(&self, ctx: &'b mut C) -> BoxFuture<'b, StepResult>
    where
        'a: 'b,
    {
        let steps: &'a [Arc<dyn Step<C>>] = self.rest;
        match steps.split_first() {
            Some((step, rest)) => step.execute(ctx, Next { rest }),
            None => Box::pin(async { Ok(()) }),
        }
    }

    /// 剩余步骤数
    #[inline]
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

/// 管道
///
/// 构建后不可变，克隆开销很小。
pub struct Pipeline<C> {
    steps: Arc<[Arc<dyn Step<C>>]>,
}

impl<C> Clone for Pipeline<C> {
    fn clone(&self) -> Self {
        Self {
            steps: Arc::clone(&self.steps),
        }
    }
}

impl<C: Send + 'static> Pipeline<C> {
    pub(crate) fn new(steps: Vec<Arc<dyn Step<C>>>) -> Self {
        Self {
            steps: steps.into(),
        }
    }

    /// 按注册顺序执行所有步骤
    pub async fn execute(&self, ctx: &mut C) -> StepResult {
        Next { rest: &self.steps }.run(ctx).await
    }

    /// 步骤数
    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// 是否为空管道
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// 闭包步骤
pub struct FnStep<F>(F);

impl<C, F> Step<C> for FnStep<F>
where
    C: Send + 'static,
    F: for<'a> Fn(&'a mut C, Next<'a, C>) -> BoxFuture<'a, StepResult> + Send + Sync + 'static,
{
    fn execute<'a>(&'a self, ctx: &'a mut C, next: Next<'a, C>) -> BoxFuture<'a, StepResult> {
        (self.0)(ctx, next)
    }
}

pub(crate) type Predicate<C> = Arc<dyn Fn(&C) -> bool + Send + Sync>;

/// 条件步骤，条件不满足时直接执行后续链
pub(crate) struct When<C> {
    predicate: Predicate<C>,
    step: Arc<dyn Step<C>>,
}

impl<C: Send + 'static> Step<C> for When<C> {
    fn execute<'a>(&'a self, ctx: &'a mut C, next: Next<'a, C>) -> BoxFuture<'a, StepResult> {
        if (self.predicate)(ctx) {
            self.step.execute(ctx, next)
        } else {
            next.run(ctx)
        }
    }
}

/// 分支步骤，条件满足时只执行分支管道
pub(crate) struct Branch<C> {
    predicate: Predicate<C>,
    branch: Pipeline<C>,
}

impl<C: Send + 'static> Step<C> for Branch<C> {
    fn execute<'a>(&'a self, ctx: &'a mut C, next: Next<'a, C>) -> BoxFuture<'a, StepResult> {
        if (self.predicate)(ctx) {
            Box::pin(self.branch.execute(ctx))
        } else {
            next.run(ctx)
        }
    }
}
