use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;

use tasker_core::models::SchedulerRegistration;
use tasker_core::SchedulerConfig;

/// 调度器节点上下文
///
/// 维护当前节点的注册信息、集群可用节点列表缓存，
/// 以及本节点上每个任务的重入执行计数。
pub struct SchedulerContext {
    config: SchedulerConfig,
    current_scheduler: RwLock<Option<SchedulerRegistration>>,
    available_schedulers: RwLock<Vec<SchedulerRegistration>>,
    reentry_counts: Mutex<HashMap<i64, Arc<AtomicI32>>>,
}

impl SchedulerContext {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            current_scheduler: RwLock::new(None),
            available_schedulers: RwLock::new(Vec::new()),
            reentry_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn instance_name(&self) -> &str {
        &self.config.instance_name
    }

    pub async fn set_current_scheduler(&self, registration: SchedulerRegistration) {
        *self.current_scheduler.write().await = Some(registration);
    }

    pub async fn current_scheduler(&self) -> Option<SchedulerRegistration> {
        self.current_scheduler.read().await.clone()
    }

    /// 刷新集群可用节点列表缓存
    pub async fn set_available_schedulers(&self, schedulers: Vec<SchedulerRegistration>) {
        *self.available_schedulers.write().await = schedulers;
    }

    pub async fn available_schedulers(&self) -> Vec<SchedulerRegistration> {
        self.available_schedulers.read().await.clone()
    }

    /// 当前任务在本节点的重入执行数量
    pub fn reentry_count(&self, job_id: i64) -> i32 {
        self.counter(job_id).load(Ordering::SeqCst)
    }

    /// 占用一个重入名额，返回占用前的计数，许可在Drop时自动归还
    pub fn acquire_reentry(&self, job_id: i64) -> (ReentryPermit, i32) {
        let counter = self.counter(job_id);
        let previous = counter.fetch_add(1, Ordering::SeqCst);
        (ReentryPermit { counter }, previous)
    }

    fn counter(&self, job_id: i64) -> Arc<AtomicI32> {
        let mut counts = self.reentry_counts.lock().expect("reentry_counts锁中毒");
        counts
            .entry(job_id)
            .or_insert_with(|| Arc::new(AtomicI32::new(0)))
            .clone()
    }
}

/// 重入许可，Drop时归还名额
pub struct ReentryPermit {
    counter: Arc<AtomicI32>,
}

impl Drop for ReentryPermit {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reentry_permit_released_on_drop() {
        let context = SchedulerContext::new(SchedulerConfig::default());
        assert_eq!(context.reentry_count(1), 0);

        let (permit, previous) = context.acquire_reentry(1);
        assert_eq!(previous, 0);
        assert_eq!(context.reentry_count(1), 1);

        let (second, previous) = context.acquire_reentry(1);
        assert_eq!(previous, 1);
        assert_eq!(context.reentry_count(1), 2);

        drop(permit);
        drop(second);
        assert_eq!(context.reentry_count(1), 0);
    }
}
