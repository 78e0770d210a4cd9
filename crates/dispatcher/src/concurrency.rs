use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use tasker_core::models::Job;
use tasker_core::traits::TaskStore;
use tasker_core::Result;

use crate::context::{ReentryPermit, SchedulerContext};

/// 并发授权结果
pub enum Authorization {
    /// 允许执行，持有重入许可(Drop时归还名额)
    Granted(ReentryPermit),
    /// 未抢到`(job_id, fire_time)`互斥令牌，已被其他节点执行，静默放弃
    LockLost,
    /// 超过重入上限，本次触发跳过并记录为重入冲突
    ReentryConflict { overlapping: i32 },
}

/// 并发控制
///
/// 两层限制相互独立:
/// 1. 跨节点互斥: `allow_concurrent=false` 的任务执行前必须通过存储层
///    原子认领拿到`(job_id, fire_time)`令牌，拿不到说明触发已被其他节点持有;
/// 2. 重入控制: 上一次执行未结束时到期的新触发，未结束的执行数量
///    超过重入上限则跳过。
pub struct ConcurrencyGuard {
    context: Arc<SchedulerContext>,
    store: Arc<dyn TaskStore>,
}

impl ConcurrencyGuard {
    pub fn new(context: Arc<SchedulerContext>, store: Arc<dyn TaskStore>) -> Self {
        Self { context, store }
    }

    /// 在把触发标记为Running之前做并发授权
    pub async fn authorize(&self, job: &Job, fire_time: DateTime<Utc>) -> Result<Authorization> {
        // 跨节点互斥令牌，失败的节点不产生任何副作用
        if !job.allow_concurrent
            && !self
                .store
                .try_claim_job(&job.namespace, job.id, fire_time)
                .await?
        {
            debug!(
                job_id = job.id,
                %fire_time,
                "任务触发已被其他节点认领，放弃执行"
            );
            return Ok(Authorization::LockLost);
        }

        // 重入控制: 正在运行的JobLog数量和本地重入计数取较大值
        let running = self.store.running_job_count(&job.namespace, job.id).await? as i32;
        let (permit, local_previous) = self.context.acquire_reentry(job.id);
        let overlapping = local_previous.max(running);
        if overlapping > job.reentry_limit() {
            debug!(
                job_id = job.id,
                overlapping,
                max_reentry = job.max_reentry,
                "超过最大重入执行次数，跳过本次触发"
            );
            return Ok(Authorization::ReentryConflict { overlapping });
        }
        Ok(Authorization::Granted(permit))
    }
}
