use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 触发器定义，一个触发器属于唯一的任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: i64,
    pub namespace: String,
    pub job_id: i64,
    pub name: String,
    /// 有效期开始时间
    pub start_time: DateTime<Utc>,
    /// 有效期结束时间，None表示永久有效
    pub end_time: Option<DateTime<Utc>>,
    pub misfire_strategy: MisfireStrategy,
    /// 是否允许多节点并行触发，禁止时使用存储层的原子认领实现互斥
    pub allow_concurrent: bool,
    pub disable: bool,
    pub schedule: ScheduleKind,
    pub last_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    /// 触发总次数
    pub fire_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 触发类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleKind {
    /// cron表达式触发
    Cron { expr: String },
    /// 固定间隔触发(单位: 秒)
    FixedInterval { seconds: i64 },
}

/// 错过触发策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfireStrategy {
    /// 忽略错过的触发，重新计算下一次触发时间
    #[default]
    Ignore,
    /// 立即补偿触发一次，之后恢复正常调度
    Compensate,
}

impl Trigger {
    /// 创建新触发器
    pub fn new(
        namespace: impl Into<String>,
        job_id: i64,
        name: impl Into<String>,
        start_time: DateTime<Utc>,
        schedule: ScheduleKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 由存储层生成
            namespace: namespace.into(),
            job_id,
            name: name.into(),
            start_time,
            end_time: None,
            misfire_strategy: MisfireStrategy::Ignore,
            allow_concurrent: false,
            disable: false,
            schedule,
            last_fire_time: None,
            next_fire_time: None,
            fire_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// 检查触发器在指定时间是否处于有效期内
    pub fn is_within_window(&self, at: DateTime<Utc>) -> bool {
        if self.disable {
            return false;
        }
        if let Some(end_time) = self.end_time {
            if at > end_time {
                return false;
            }
        }
        true
    }
}
