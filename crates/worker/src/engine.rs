use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use tasker_core::models::{Job, JobDetail, JobLog, JobLogStatus, SchedulerRegistration};
use tasker_core::traits::{JobExecutor, TaskStore};
use tasker_core::{JobContext, Result, SchedulerError};

/// 任务执行引擎
///
/// 按优先级解析JobExecutor、构建JobContext、带重试执行并记录执行日志。
/// 不变式: 每个被认领的触发恰好产生一次终态JobLog写入(Success/Failed/Cancelled)。
pub struct JobExecutionEngine {
    store: Arc<dyn TaskStore>,
    executors: Vec<Arc<dyn JobExecutor>>,
}

impl JobExecutionEngine {
    /// 创建执行引擎，执行器按order()升序排列
    pub fn new(store: Arc<dyn TaskStore>, mut executors: Vec<Arc<dyn JobExecutor>>) -> Self {
        executors.sort_by_key(|executor| executor.order());
        Self { store, executors }
    }

    /// 按任务类型解析执行器，升序遍历第一个命中的生效
    fn resolve_executor(&self, job: &Job) -> Result<&Arc<dyn JobExecutor>> {
        self.executors
            .iter()
            .find(|executor| executor.support(job.job_type))
            .ok_or(SchedulerError::UnsupportedJobType {
                job_type: job.job_type,
            })
    }

    /// 执行一次被认领的触发
    ///
    /// 领域失败(详情缺失/类型不支持/执行器报错)记录在JobLog上，不向外传播；
    /// 只有存储失败会作为Err返回。
    pub async fn execute(
        &self,
        job: Job,
        trigger_id: Option<i64>,
        trigger_log_id: i64,
        fire_time: DateTime<Utc>,
        scheduler: SchedulerRegistration,
    ) -> Result<JobLog> {
        let now = self.store.current_datetime().await?;
        let run_count = self
            .store
            .increment_run_count(&job.namespace, job.id)
            .await?;

        let mut job_log = JobLog::new(
            job.namespace.as_str(),
            job.id,
            trigger_id,
            trigger_log_id,
            fire_time,
        );
        job_log.start_time = Some(now);
        job_log.run_count = run_count;
        job_log.before_job_data = Some(job.job_data.to_string());
        let mut job_log = self.store.save_job_log(&job_log).await?;

        let detail = self.store.job_detail(&job.namespace, job.id).await?;
        self.run_with_retry(&job, detail, &scheduler, now, &mut job_log)
            .await?;

        job_log.end_time = Some(self.store.current_datetime().await?);
        self.store.update_job_log(&job_log).await?;
        Ok(job_log)
    }

    /// 记录一次因重入冲突被跳过的触发
    pub async fn record_reentry_conflict(
        &self,
        job: &Job,
        trigger_id: Option<i64>,
        trigger_log_id: i64,
        fire_time: DateTime<Utc>,
        overlapping: i32,
    ) -> Result<JobLog> {
        let now = self.store.current_datetime().await?;
        let mut job_log = JobLog::new(
            job.namespace.as_str(),
            job.id,
            trigger_id,
            trigger_log_id,
            fire_time,
        );
        job_log.start_time = Some(now);
        job_log.end_time = Some(now);
        job_log.status = JobLogStatus::Cancelled;
        job_log.error_info = Some(format!(
            "当前节点超过最大重入执行次数 overlapping={overlapping} | max_reentry={}",
            job.max_reentry
        ));
        let job_log = self.store.save_job_log(&job_log).await?;
        self.store.update_job_log(&job_log).await?;
        Ok(job_log)
    }

    /// 带重试执行: 共尝试 1 + max_retry_count 次，重试之间不做延时
    async fn run_with_retry(
        &self,
        job: &Job,
        detail: Option<JobDetail>,
        scheduler: &SchedulerRegistration,
        now: DateTime<Utc>,
        job_log: &mut JobLog,
    ) -> Result<()> {
        let executor = match self.resolve_executor(job) {
            Ok(executor) => executor,
            Err(e) => {
                error!(job_id = job.id, "解析任务执行器失败: {e}");
                job_log.status = JobLogStatus::Failed;
                job_log.error_info = Some(e.to_string());
                return Ok(());
            }
        };

        let ctx = JobContext::new(
            now,
            job.clone(),
            job_log.id,
            scheduler.clone(),
            Arc::clone(&self.store),
            detail,
        );
        let max_attempts = 1 + job.max_retry_count.max(0);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match executor.exec(&ctx).await {
                Ok(()) => {
                    job_log.status = JobLogStatus::Success;
                    job_log.error_info = None;
                    info!(
                        job_id = job.id,
                        job_log_id = job_log.id,
                        attempt,
                        executor = executor.name(),
                        "任务执行成功"
                    );
                    break;
                }
                Err(e) => {
                    job_log.error_info = Some(e.to_string());
                    if attempt < max_attempts {
                        job_log.retry_count = attempt;
                        warn!(
                            job_id = job.id,
                            job_log_id = job_log.id,
                            attempt,
                            "任务执行失败，立即重试: {e}"
                        );
                        continue;
                    }
                    job_log.retry_count = attempt - 1;
                    job_log.status = JobLogStatus::Failed;
                    error!(
                        job_id = job.id,
                        job_log_id = job_log.id,
                        attempt,
                        "任务执行失败，重试次数耗尽: {e}"
                    );
                    break;
                }
            }
        }

        // 执行成功后回写任务数据，后续触发可见
        if job_log.status == JobLogStatus::Success {
            let after = ctx.job_data_snapshot();
            job_log.after_job_data = Some(after.to_string());
            if job.is_update_data && after != job.job_data {
                self.store
                    .update_job_data(&job.namespace, job.id, &after)
                    .await?;
            }
        }
        Ok(())
    }
}
