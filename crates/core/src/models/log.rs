use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 任务执行日志，每个被认领的触发产生一行，状态只会从Running迁移到终态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLog {
    pub id: i64,
    pub namespace: String,
    pub job_id: i64,
    pub trigger_id: Option<i64>,
    pub trigger_log_id: i64,
    /// 本次触发的触发时间(存储时间)
    pub fire_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: JobLogStatus,
    /// 实际发生的重试次数
    pub retry_count: i32,
    /// 任务执行总次数快照
    pub run_count: i64,
    pub error_info: Option<String>,
    /// 执行前的任务数据快照
    pub before_job_data: Option<String>,
    /// 执行后的任务数据快照
    pub after_job_data: Option<String>,
}

/// 任务执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobLogStatus {
    Running,
    Success,
    Failed,
    Cancelled,
}

impl JobLogStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobLogStatus::Running)
    }
}

impl JobLog {
    pub fn new(
        namespace: impl Into<String>,
        job_id: i64,
        trigger_id: Option<i64>,
        trigger_log_id: i64,
        fire_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0, // 由存储层生成
            namespace: namespace.into(),
            job_id,
            trigger_id,
            trigger_log_id,
            fire_time,
            start_time: None,
            end_time: None,
            status: JobLogStatus::Running,
            retry_count: 0,
            run_count: 0,
            error_info: None,
            before_job_data: None,
            after_job_data: None,
        }
    }
}

/// 触发器触发日志，每次触发决策产生一行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTriggerLog {
    pub id: i64,
    pub namespace: String,
    pub trigger_id: i64,
    pub job_id: i64,
    pub trigger_name: String,
    /// 计划触发时间
    pub scheduled_time: Option<DateTime<Utc>>,
    /// 实际触发时间
    pub fire_time: DateTime<Utc>,
    /// 是否错过了触发
    pub mis_fired: bool,
    /// 触发决策说明
    pub trigger_msg: Option<String>,
    /// 触发总次数快照
    pub fire_count: i64,
}

/// 任务执行控制台日志，按job_log_id分组，行号从1开始严格递增无空洞
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConsoleLog {
    pub id: i64,
    pub job_log_id: i64,
    pub line_num: u32,
    pub level: ConsoleLogLevel,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// 控制台日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}
