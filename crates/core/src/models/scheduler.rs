use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 调度器节点注册信息，集群在线节点的权威列表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerRegistration {
    pub id: i64,
    pub namespace: String,
    pub instance_name: String,
    pub last_heartbeat: DateTime<Utc>,
    pub available: bool,
}

impl SchedulerRegistration {
    pub fn new(namespace: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self {
            id: 0, // 由存储层生成
            namespace: namespace.into(),
            instance_name: instance_name.into(),
            last_heartbeat: Utc::now(),
            available: true,
        }
    }

    /// 心跳超时判定
    pub fn is_alive(&self, now: DateTime<Utc>, timeout_seconds: i64) -> bool {
        self.available && now - self.last_heartbeat <= Duration::seconds(timeout_seconds)
    }
}

/// 调度器指令
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerCommand {
    pub id: i64,
    pub namespace: String,
    /// 目标节点，None表示任意节点均可执行
    pub instance_name: Option<String>,
    pub kind: CommandKind,
    pub state: CommandState,
    pub created_at: DateTime<Utc>,
}

/// 指令类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum CommandKind {
    /// 立即执行任务(计划外的即时认领尝试)
    ExecJob { job_id: i64 },
    /// 暂停调度器的认领循环
    PauseScheduler,
    /// 恢复调度器的认领循环
    ResumeScheduler,
}

/// 指令执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    Pending,
    Running,
    Done,
}

impl SchedulerCommand {
    pub fn new(
        namespace: impl Into<String>,
        instance_name: Option<String>,
        kind: CommandKind,
    ) -> Self {
        Self {
            id: 0, // 由存储层生成
            namespace: namespace.into(),
            instance_name,
            kind,
            state: CommandState::Pending,
            created_at: Utc::now(),
        }
    }
}
