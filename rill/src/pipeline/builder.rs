use super::{Branch, FnStep, Next, Pipeline, Step, StepResult, When};
use futures::future::BoxFuture;
use std::sync::Arc;

/// 管道构建器
///
/// 步骤按注册顺序执行。
pub struct PipelineBuilder<C> {
    steps: Vec<Arc<dyn Step<C>>>,
}

impl<C: Send + 'static> Default for PipelineBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + 'static> PipelineBuilder<C> {
    /// 构造函数
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// 注册步骤
    pub fn use_step<S>(mut self, step: S) -> Self
    where
        S: Step<C>,
    {
        self.steps.push(Arc::new(step));
        self
    }

    /// 注册共享步骤
    pub fn use_shared(mut self, step: Arc<dyn Step<C>>) -> Self {
        self.steps.push(step);
        self
    }

    /// 注册闭包步骤
    pub fn use_fn<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut C, Next<'a, C>) -> BoxFuture<'a, StepResult> + Send + Sync + 'static,
    {
        self.use_step(FnStep(f))
    }

    /// 注册条件步骤
    ///
    /// 条件不满足时跳过该步骤，继续执行后续链。
    pub fn use_step_when<P, S>(self, predicate: P, step: S) -> Self
    where
        P: Fn(&C) -> bool + Send + Sync + 'static,
        S: Step<C>,
    {
        self.use_step(When {
            predicate: Arc::new(predicate),
            step: Arc::new(step),
        })
    }

    /// 注册分支
    ///
    /// 条件满足时执行分支管道，且不再执行外层的后续步骤；否则继续外层链。
    pub fn map<P, F>(self, predicate: P, configure: F) -> Self
    where
        P: Fn(&C) -> bool + Send + Sync + 'static,
        F: FnOnce(PipelineBuilder<C>) -> PipelineBuilder<C>,
    {
        let branch = configure(PipelineBuilder::new()).build();
        self.use_step(Branch {
            predicate: Arc::new(predicate),
            branch,
        })
    }

    /// 构建管道
    pub fn build(self) -> Pipeline<C> {
        Pipeline::new(self.steps)
    }
}
