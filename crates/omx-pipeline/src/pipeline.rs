//! Pipeline definition and the orchestrator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use omx_errors::OmxError;

use crate::metrics::{MetricsSink, NoopMetrics};
use crate::task::{PipelineContext, Task, TaskResult, TaskStatus};

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// An ordered, immutable-after-construction task list.
pub struct Pipeline<Ctx: Send> {
    name: String,
    tasks: Vec<Box<dyn Task<Ctx>>>,
    stop_on_failure: bool,
    sort_by_order: bool,
}

impl<Ctx: Send> Pipeline<Ctx> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            stop_on_failure: true,
            sort_by_order: true,
        }
    }

    pub fn add_task(mut self, task: impl Task<Ctx> + 'static) -> Self {
        self.tasks.push(Box::new(task));
        self
    }

    pub fn stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    pub fn sort_by_order(mut self, sort: bool) -> Self {
        self.sort_by_order = sort;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Execution order: insertion order, or a stable sort by order key.
    fn ordered_tasks(&self) -> Vec<&dyn Task<Ctx>> {
        let mut tasks: Vec<&dyn Task<Ctx>> = self.tasks.iter().map(|t| t.as_ref()).collect();
        if self.sort_by_order {
            tasks.sort_by_key(|t| t.order());
        }
        tasks
    }
}

// ---------------------------------------------------------------------------
// PipelineResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub task: String,
    pub result: TaskResult,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub pipeline_name: String,
    pub task_results: Vec<TaskExecution>,
    pub success: bool,
    pub execution_time: Duration,
}

impl PipelineResult {
    /// The first FAILED task's typed error, if any.
    pub fn first_error(&self) -> Option<&OmxError> {
        self.task_results
            .iter()
            .find(|t| t.result.is_failed())
            .and_then(|t| t.result.error.as_ref())
    }

    pub fn statuses(&self) -> Vec<(&str, TaskStatus)> {
        self.task_results
            .iter()
            .map(|t| (t.task.as_str(), t.result.status))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives pipelines and reports per-task timing to the metrics sink.
pub struct Orchestrator {
    metrics: Arc<dyn MetricsSink>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self {
            metrics: Arc::new(NoopMetrics),
        }
    }
}

impl Orchestrator {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self { metrics }
    }

    /// Run every task of `pipeline` against `ctx`.
    ///
    /// The deadline is checked before each task; once expired the pipeline
    /// aborts with a FAILED timeout result (the caller rolls the
    /// transaction back). Cancellation is cooperative at task boundaries;
    /// a running task is never interrupted mid-flight.
    pub async fn execute<Ctx: PipelineContext>(
        &self,
        pipeline: &Pipeline<Ctx>,
        ctx: &mut Ctx,
    ) -> PipelineResult {
        let started = Instant::now();
        let correlation_id = ctx.correlation_id();
        let mut task_results = Vec::with_capacity(pipeline.tasks.len());
        let mut success = true;

        for task in pipeline.ordered_tasks() {
            if ctx.deadline_expired() {
                let error = OmxError::external(format!(
                    "deadline expired before task {}",
                    task.name()
                ))
                .with_code("OMS-TIME-001")
                .with_correlation_id(correlation_id);
                task_results.push(TaskExecution {
                    task: task.name().to_string(),
                    result: TaskResult::failed(error),
                    duration: Duration::ZERO,
                });
                success = false;
                break;
            }

            if !task.precondition(ctx) {
                let result = TaskResult::skipped("precondition not met");
                self.metrics
                    .record_task(pipeline.name(), task.name(), result.status, Duration::ZERO);
                tracing::debug!(
                    pipeline = pipeline.name(),
                    task = task.name(),
                    %correlation_id,
                    "task skipped"
                );
                task_results.push(TaskExecution {
                    task: task.name().to_string(),
                    result,
                    duration: Duration::ZERO,
                });
                continue;
            }

            let task_started = Instant::now();
            let result = task.execute(ctx).await;
            let duration = task_started.elapsed();

            self.metrics
                .record_task(pipeline.name(), task.name(), result.status, duration);
            tracing::debug!(
                pipeline = pipeline.name(),
                task = task.name(),
                status = result.status.as_str(),
                duration_ms = duration.as_millis() as u64,
                %correlation_id,
                "task executed"
            );

            let failed = result.is_failed();
            task_results.push(TaskExecution {
                task: task.name().to_string(),
                result,
                duration,
            });

            if failed {
                success = false;
                if pipeline.stop_on_failure {
                    break;
                }
            }
        }

        let execution_time = started.elapsed();
        self.metrics
            .record_pipeline(pipeline.name(), success, execution_time);

        PipelineResult {
            pipeline_name: pipeline.name().to_string(),
            task_results,
            success,
            execution_time,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    struct Ctx {
        correlation_id: Uuid,
        deadline: Option<DateTime<Utc>>,
        log: Vec<&'static str>,
        flag: bool,
    }

    impl Ctx {
        fn new() -> Self {
            Self {
                correlation_id: Uuid::new_v4(),
                deadline: None,
                log: Vec::new(),
                flag: false,
            }
        }
    }

    impl PipelineContext for Ctx {
        fn correlation_id(&self) -> Uuid {
            self.correlation_id
        }

        fn deadline(&self) -> Option<DateTime<Utc>> {
            self.deadline
        }
    }

    struct Record {
        name: &'static str,
        order: i32,
    }

    #[async_trait]
    impl Task<Ctx> for Record {
        fn name(&self) -> &str {
            self.name
        }

        fn order(&self) -> i32 {
            self.order
        }

        async fn execute(&self, ctx: &mut Ctx) -> TaskResult {
            ctx.log.push(self.name);
            TaskResult::success()
        }
    }

    struct Fail;

    #[async_trait]
    impl Task<Ctx> for Fail {
        fn name(&self) -> &str {
            "fail"
        }

        fn order(&self) -> i32 {
            5
        }

        async fn execute(&self, ctx: &mut Ctx) -> TaskResult {
            ctx.log.push("fail");
            TaskResult::failed(omx_errors::OmxError::validation("boom"))
        }
    }

    struct OnlyWhenFlag;

    #[async_trait]
    impl Task<Ctx> for OnlyWhenFlag {
        fn name(&self) -> &str {
            "conditional"
        }

        fn precondition(&self, ctx: &Ctx) -> bool {
            ctx.flag
        }

        async fn execute(&self, ctx: &mut Ctx) -> TaskResult {
            ctx.log.push("conditional");
            TaskResult::success()
        }
    }

    #[tokio::test]
    async fn tasks_run_in_order_key_order() {
        let pipeline = Pipeline::new("test")
            .add_task(Record {
                name: "third",
                order: 30,
            })
            .add_task(Record {
                name: "first",
                order: 10,
            })
            .add_task(Record {
                name: "second",
                order: 20,
            });

        let mut ctx = Ctx::new();
        let result = Orchestrator::default().execute(&pipeline, &mut ctx).await;
        assert!(result.success);
        assert_eq!(ctx.log, ["first", "second", "third"]);
    }

    #[tokio::test]
    async fn insertion_order_kept_when_sorting_disabled() {
        let pipeline = Pipeline::new("test")
            .sort_by_order(false)
            .add_task(Record {
                name: "b",
                order: 20,
            })
            .add_task(Record { name: "a", order: 10 });

        let mut ctx = Ctx::new();
        Orchestrator::default().execute(&pipeline, &mut ctx).await;
        assert_eq!(ctx.log, ["b", "a"]);
    }

    #[tokio::test]
    async fn stop_on_failure_aborts_pipeline() {
        let pipeline = Pipeline::new("test")
            .add_task(Record {
                name: "before",
                order: 1,
            })
            .add_task(Fail)
            .add_task(Record {
                name: "after",
                order: 10,
            });

        let mut ctx = Ctx::new();
        let result = Orchestrator::default().execute(&pipeline, &mut ctx).await;
        assert!(!result.success);
        assert_eq!(ctx.log, ["before", "fail"]);
        assert_eq!(result.task_results.len(), 2);
        assert_eq!(
            result.first_error().unwrap().kind(),
            omx_errors::ErrorKind::Validation
        );
    }

    #[tokio::test]
    async fn failures_collected_when_stop_disabled() {
        let pipeline = Pipeline::new("test")
            .stop_on_failure(false)
            .add_task(Record {
                name: "before",
                order: 1,
            })
            .add_task(Fail)
            .add_task(Record {
                name: "after",
                order: 10,
            });

        let mut ctx = Ctx::new();
        let result = Orchestrator::default().execute(&pipeline, &mut ctx).await;
        assert!(!result.success);
        assert_eq!(ctx.log, ["before", "fail", "after"]);
        assert_eq!(result.task_results.len(), 3);
    }

    #[tokio::test]
    async fn unmet_precondition_records_skipped_and_continues() {
        let pipeline = Pipeline::new("test").add_task(OnlyWhenFlag).add_task(Record {
            name: "always",
            order: 10,
        });

        let mut ctx = Ctx::new();
        let result = Orchestrator::default().execute(&pipeline, &mut ctx).await;
        assert!(result.success);
        assert_eq!(ctx.log, ["always"]);
        assert_eq!(result.task_results[0].result.status, TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn expired_deadline_aborts_before_first_task() {
        let pipeline = Pipeline::new("test").add_task(Record {
            name: "never",
            order: 1,
        });

        let mut ctx = Ctx::new();
        ctx.deadline = Some(Utc::now() - chrono::Duration::seconds(1));
        let result = Orchestrator::default().execute(&pipeline, &mut ctx).await;
        assert!(!result.success);
        assert!(ctx.log.is_empty());
        let err = result.first_error().unwrap();
        assert_eq!(err.code, "OMS-TIME-001");
    }

    #[tokio::test]
    async fn warning_status_does_not_fail_pipeline() {
        struct Warn;

        #[async_trait]
        impl Task<Ctx> for Warn {
            fn name(&self) -> &str {
                "warn"
            }

            async fn execute(&self, _ctx: &mut Ctx) -> TaskResult {
                TaskResult::warning("odd but fine", vec!["detail".into()])
            }
        }

        let pipeline = Pipeline::new("test").add_task(Warn);
        let mut ctx = Ctx::new();
        let result = Orchestrator::default().execute(&pipeline, &mut ctx).await;
        assert!(result.success);
        assert_eq!(result.task_results[0].result.warnings, ["detail"]);
    }
}
