use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::models::{
    ConsoleLogLevel, Job, JobConsoleLog, JobDetail, SchedulerRegistration,
};
use crate::traits::TaskStore;
use crate::Result;

/// 单次任务执行的上下文
///
/// 聚合了本次触发的存储时间、任务定义、JobLog引用、当前调度器节点、
/// 存储句柄、可变的任务数据和解析好的任务详情，不作为整体持久化。
pub struct JobContext {
    /// 触发时的存储权威时间
    now: DateTime<Utc>,
    job: Job,
    job_log_id: i64,
    scheduler: SchedulerRegistration,
    store: Arc<dyn TaskStore>,
    /// 跨执行传递的任务数据，执行器可读写
    job_data: Mutex<serde_json::Map<String, serde_json::Value>>,
    /// 每次执行解析一次的任务详情
    detail: Option<JobDetail>,
    /// 控制台日志行号计数器
    line_num: AtomicU32,
}

impl JobContext {
    pub fn new(
        now: DateTime<Utc>,
        job: Job,
        job_log_id: i64,
        scheduler: SchedulerRegistration,
        store: Arc<dyn TaskStore>,
        detail: Option<JobDetail>,
    ) -> Self {
        let job_data = match &job.job_data {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        Self {
            now,
            job,
            job_log_id,
            scheduler,
            store,
            job_data: Mutex::new(job_data),
            detail,
            line_num: AtomicU32::new(0),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_log_id(&self) -> i64 {
        self.job_log_id
    }

    pub fn scheduler(&self) -> &SchedulerRegistration {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn detail(&self) -> Option<&JobDetail> {
        self.detail.as_ref()
    }

    /// 读取任务数据
    pub fn get_data(&self, key: &str) -> Option<serde_json::Value> {
        self.job_data.lock().expect("job_data锁中毒").get(key).cloned()
    }

    /// 写入任务数据，`is_update_data` 的任务执行成功后会回写到任务行
    pub fn set_data(&self, key: impl Into<String>, value: serde_json::Value) {
        self.job_data
            .lock()
            .expect("job_data锁中毒")
            .insert(key.into(), value);
    }

    /// 任务数据快照
    pub fn job_data_snapshot(&self) -> serde_json::Value {
        serde_json::Value::Object(self.job_data.lock().expect("job_data锁中毒").clone())
    }

    pub async fn debug(&self, content: impl Into<String>) -> Result<()> {
        self.log(ConsoleLogLevel::Debug, content.into()).await
    }

    pub async fn info(&self, content: impl Into<String>) -> Result<()> {
        self.log(ConsoleLogLevel::Info, content.into()).await
    }

    pub async fn warn(&self, content: impl Into<String>) -> Result<()> {
        self.log(ConsoleLogLevel::Warn, content.into()).await
    }

    pub async fn error(&self, content: impl Into<String>) -> Result<()> {
        self.log(ConsoleLogLevel::Error, content.into()).await
    }

    /// 双写日志: 同时输出到进程日志和JobConsoleLog，
    /// 行号从1开始严格递增，保证完整有序的执行记录
    async fn log(&self, level: ConsoleLogLevel, content: String) -> Result<()> {
        match level {
            ConsoleLogLevel::Debug => {
                tracing::debug!(job_id = self.job.id, job_log_id = self.job_log_id, "{content}")
            }
            ConsoleLogLevel::Info => {
                tracing::info!(job_id = self.job.id, job_log_id = self.job_log_id, "{content}")
            }
            ConsoleLogLevel::Warn => {
                tracing::warn!(job_id = self.job.id, job_log_id = self.job_log_id, "{content}")
            }
            ConsoleLogLevel::Error => {
                tracing::error!(job_id = self.job.id, job_log_id = self.job_log_id, "{content}")
            }
        }
        let line = JobConsoleLog {
            id: 0, // 由存储层生成
            job_log_id: self.job_log_id,
            line_num: self.line_num.fetch_add(1, Ordering::SeqCst) + 1,
            level,
            content,
            created_at: self.now,
        };
        self.store.append_console_line(&line).await
    }
}
