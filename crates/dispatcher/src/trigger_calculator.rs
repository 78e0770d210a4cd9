use std::str::FromStr;

use chrono::{DateTime, Duration, Timelike, Utc};
use cron::Schedule;

use tasker_core::models::{MisfireStrategy, ScheduleKind, Trigger};
use tasker_core::{Result, SchedulerError};

/// 清除时间的毫秒信息到整秒，触发时间只精确到秒
pub fn truncate_to_second(time: DateTime<Utc>) -> DateTime<Utc> {
    time.with_nanosecond(0).unwrap_or(time)
}

/// 解析cron表达式(6/7字段: 秒 分 时 日 月 周 [年])
fn parse_schedule(trigger_id: i64, expr: &str) -> Result<Schedule> {
    if expr.trim().is_empty() {
        return Err(SchedulerError::InvalidTrigger {
            id: trigger_id,
            message: "cron表达式不能为空".to_string(),
        });
    }
    Schedule::from_str(expr).map_err(|e| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        message: e.to_string(),
    })
}

/// 校验cron表达式是否有效
pub fn validate_expression(expr: &str) -> bool {
    Schedule::from_str(expr).is_ok()
}

/// 计算触发器的首次触发时间(next_fire_time为空时使用)
///
/// 起始时间取 max(last_fire_time, start_time)，
/// 返回None表示触发器已禁用或超出有效期。
pub fn initial_fire_time(trigger: &Trigger) -> Result<Option<DateTime<Utc>>> {
    if trigger.disable {
        return Ok(None);
    }
    let mut calc_start = trigger.last_fire_time.unwrap_or(trigger.start_time);
    if trigger.start_time > calc_start {
        calc_start = trigger.start_time;
    }
    let next = match &trigger.schedule {
        ScheduleKind::Cron { expr } => parse_schedule(trigger.id, expr)?
            .after(&calc_start)
            .next(),
        ScheduleKind::FixedInterval { seconds } => {
            if *seconds <= 0 {
                return Err(SchedulerError::InvalidTrigger {
                    id: trigger.id,
                    message: format!("fixed_interval字段值错误: {seconds}"),
                });
            }
            Some(calc_start + Duration::seconds(*seconds))
        }
    };
    Ok(clamp_to_window(trigger, next))
}

/// 计算触发器的下一次触发时间(严格大于now)
///
/// cron触发器从now向后找下一个匹配时间；
/// 固定间隔触发器保持原有相位，对齐到now之后的下一个间隔槽位。
/// 返回None表示触发器已禁用或超出有效期。
pub fn next_fire_time(trigger: &Trigger, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    if trigger.disable {
        return Ok(None);
    }
    let next = match &trigger.schedule {
        ScheduleKind::Cron { expr } => {
            let from = now.max(trigger.start_time);
            parse_schedule(trigger.id, expr)?.after(&from).next()
        }
        ScheduleKind::FixedInterval { seconds } => {
            if *seconds <= 0 {
                return Err(SchedulerError::InvalidTrigger {
                    id: trigger.id,
                    message: format!("fixed_interval字段值错误: {seconds}"),
                });
            }
            let anchor = trigger.next_fire_time.ok_or_else(|| {
                SchedulerError::InvalidTrigger {
                    id: trigger.id,
                    message: "next_fire_time字段不能为空".to_string(),
                }
            })?;
            let interval_ms = seconds * 1000;
            let how_long = (now.timestamp_millis() - anchor.timestamp_millis()).abs();
            let base = now.timestamp_millis().max(anchor.timestamp_millis());
            let next_ms = base - how_long % interval_ms + interval_ms;
            DateTime::from_timestamp_millis(next_ms)
        }
    };
    Ok(clamp_to_window(trigger, next))
}

/// 判断是否错过了触发: now超过计划触发时间的幅度大于阈值
pub fn is_misfired(scheduled: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> bool {
    now - scheduled > threshold
}

/// 错过触发后的处理动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MisfireAction {
    /// 丢弃错过的触发，直接重算下一次触发时间
    Skip,
    /// 立即补偿触发一次，再恢复正常调度
    FireNow,
}

/// 根据错过触发策略决定处理动作
pub fn apply_misfire_strategy(strategy: MisfireStrategy) -> MisfireAction {
    match strategy {
        MisfireStrategy::Ignore => MisfireAction::Skip,
        MisfireStrategy::Compensate => MisfireAction::FireNow,
    }
}

fn clamp_to_window(trigger: &Trigger, next: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    let next = truncate_to_second(next?);
    if let Some(end_time) = trigger.end_time {
        if next > end_time {
            return None;
        }
    }
    Some(next)
}
