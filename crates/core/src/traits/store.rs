use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Job, JobConsoleLog, JobDetail, JobLog, JobTriggerLog, SchedulerCommand, SchedulerRegistration,
    Trigger,
};
use crate::Result;

/// 调度器数据存储接口
///
/// 多个独立的调度器进程共享同一个存储，没有选主节点，
/// 跨节点互斥完全依赖 `try_claim_trigger` / `try_claim_job` 两个原子认领原语。
/// 实现必须保证认领操作的原子性(行锁update或唯一约束insert均可)，
/// 这是约定的硬性前提而非优化项。
///
/// 核心只使用 `current_time_millis` 返回的存储权威时间做时间推理，
/// 从不使用本地时钟，以容忍节点间的时钟漂移。
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 生成集群唯一ID(snowflake风格)
    async fn next_id(&self) -> Result<i64>;

    /// 存储权威的当前时间(毫秒时间戳)
    async fn current_time_millis(&self) -> Result<i64>;

    /// 存储权威的当前时间
    async fn current_datetime(&self) -> Result<DateTime<Utc>> {
        let millis = self.current_time_millis().await?;
        DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| crate::SchedulerError::Store(format!("无效的存储时间: {millis}")))
    }

    // ------------------------------------------------------------------ 调度器节点

    /// 注册调度器节点(存在则更新心跳)，返回注册信息
    async fn register_scheduler(
        &self,
        registration: SchedulerRegistration,
    ) -> Result<SchedulerRegistration>;

    /// 更新节点心跳时间
    async fn heartbeat(&self, namespace: &str, instance_name: &str) -> Result<()>;

    /// 查询当前可用的调度器节点列表
    async fn available_schedulers(&self, namespace: &str) -> Result<Vec<SchedulerRegistration>>;

    // ------------------------------------------------------------------ 任务

    async fn save_job(&self, job: &Job) -> Result<Job>;

    async fn get_job(&self, namespace: &str, job_id: i64) -> Result<Option<Job>>;

    /// 回写任务数据(job_data)，后续触发可见
    async fn update_job_data(
        &self,
        namespace: &str,
        job_id: i64,
        job_data: &serde_json::Value,
    ) -> Result<()>;

    /// 递增并返回任务执行总次数(轮询/随机负载均衡的持久化计数器)
    async fn increment_run_count(&self, namespace: &str, job_id: i64) -> Result<i64>;

    /// 按任务类型解析的详情数据
    async fn job_detail(&self, namespace: &str, job_id: i64) -> Result<Option<JobDetail>>;

    async fn save_job_detail(&self, namespace: &str, job_id: i64, detail: &JobDetail)
        -> Result<()>;

    // ------------------------------------------------------------------ 触发器

    async fn save_trigger(&self, trigger: &Trigger) -> Result<Trigger>;

    async fn get_trigger(&self, namespace: &str, trigger_id: i64) -> Result<Option<Trigger>>;

    /// 查询启用状态的触发器列表
    async fn enabled_triggers(&self, namespace: &str) -> Result<Vec<Trigger>>;

    /// 查询到期需要触发的触发器(next_fire_time <= now)
    async fn due_triggers(&self, namespace: &str, now: DateTime<Utc>) -> Result<Vec<Trigger>>;

    /// 初始化/修复触发器的下一次触发时间(不递增fire_count)
    async fn update_next_fire_time(
        &self,
        namespace: &str,
        trigger_id: i64,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// 更新触发器的触发时间并递增fire_count，返回false表示触发器已不存在
    async fn update_fire_times(
        &self,
        namespace: &str,
        trigger_id: i64,
        last_fire_time: Option<DateTime<Utc>>,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    // ------------------------------------------------------------------ 原子认领

    /// 认领触发器的一次触发 `(trigger_id, fire_time)`，先到先得
    ///
    /// 返回true表示本节点获得该触发的处理权；false表示已被其他节点认领。
    async fn try_claim_trigger(
        &self,
        namespace: &str,
        trigger_id: i64,
        fire_time: DateTime<Utc>,
    ) -> Result<bool>;

    /// 认领任务的一次执行 `(job_id, fire_time)`，先到先得
    ///
    /// `allow_concurrent=false` 的任务在执行前必须持有该令牌。
    async fn try_claim_job(
        &self,
        namespace: &str,
        job_id: i64,
        fire_time: DateTime<Utc>,
    ) -> Result<bool>;

    // ------------------------------------------------------------------ 日志

    async fn save_trigger_log(&self, log: &JobTriggerLog) -> Result<JobTriggerLog>;

    async fn save_job_log(&self, log: &JobLog) -> Result<JobLog>;

    /// 更新JobLog到终态(每个被认领的触发恰好一次)
    async fn update_job_log(&self, log: &JobLog) -> Result<()>;

    /// 统计任务当前处于Running状态的JobLog行数
    async fn running_job_count(&self, namespace: &str, job_id: i64) -> Result<i64>;

    /// 追加一行控制台日志(只追加，从不修改)
    async fn append_console_line(&self, line: &JobConsoleLog) -> Result<()>;

    // ------------------------------------------------------------------ 调度器指令

    async fn save_command(&self, command: &SchedulerCommand) -> Result<SchedulerCommand>;

    /// 查询待本节点执行的指令(目标为本节点或未指定目标)
    async fn pending_commands(
        &self,
        namespace: &str,
        instance_name: &str,
    ) -> Result<Vec<SchedulerCommand>>;

    async fn finish_command(&self, command_id: i64) -> Result<()>;
}
