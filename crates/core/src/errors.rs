use thiserror::Error;

use crate::models::JobType;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("存储访问错误: {0}")]
    Store(String),

    #[error("任务未找到: namespace={namespace}, id={id}")]
    JobNotFound { namespace: String, id: i64 },

    #[error("触发器未找到: namespace={namespace}, id={id}")]
    TriggerNotFound { namespace: String, id: i64 },

    #[error("任务详情数据不存在: jobId={job_id}")]
    JobDetailNotFound { job_id: i64 },

    #[error("暂不支持的任务类型: {job_type}")]
    UnsupportedJobType { job_type: JobType },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的触发器配置: id={id} - {message}")]
    InvalidTrigger { id: i64, message: String },

    #[error("无效的操作，当前调度器状态: {state}")]
    InvalidState { state: String },

    #[error("任务执行错误: {0}")]
    JobExecution(String),

    #[error("无效的任务参数: {0}")]
    InvalidJobParams(String),

    #[error("配置错误: {0}")]
    Configuration(String),
}

impl SchedulerError {
    /// 是否是领域失败(记录到JobLog，不传播导致节点退出)
    pub fn is_domain_failure(&self) -> bool {
        !matches!(self, SchedulerError::Store(_))
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;
